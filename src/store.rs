// =============================================================================
// Snapshot Store — append-only per-symbol CSV files
// =============================================================================
//
// Layout: `<data_dir>/<SYMBOL>.csv`, header on the first line, one row per
// collection cycle after it. Rows are only ever appended, and an append that
// would move time backwards is rejected so every file stays in
// non-decreasing timestamp order. The only rewrite is `prune`, which keeps the
// newest rows and swaps the file in atomically (tmp + rename).
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::types::{SnapshotRow, CSV_HEADER};

/// Outcome of a `prune` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub files_processed: usize,
    pub files_pruned: usize,
    pub rows_removed: usize,
}

pub struct SnapshotStore {
    dir: PathBuf,
    /// Timestamp of the newest row per symbol, filled lazily.
    last_seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SnapshotStore {
    /// Open (and create if needed) the data directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        Ok(Self {
            dir,
            last_seen: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `symbol`. Symbols are exchange tickers; anything that
    /// could escape the data directory is refused.
    pub fn path_for(&self, symbol: &str) -> Result<PathBuf> {
        let valid = !symbol.is_empty()
            && symbol
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            anyhow::bail!("invalid symbol name {symbol:?}");
        }
        Ok(self.dir.join(format!("{symbol}.csv")))
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Append `row` to the symbol's file, writing the header if the file is
    /// new.
    pub fn append(&self, symbol: &str, row: &SnapshotRow) -> Result<()> {
        let path = self.path_for(symbol)?;

        let cached = self.last_seen.lock().get(symbol).copied();
        let last = match cached {
            Some(ts) => Some(ts),
            None => self.read_tail(symbol, 1)?.last().map(|r| r.timestamp),
        };
        if let Some(last) = last {
            if row.timestamp < last {
                anyhow::bail!(
                    "refusing out-of-order row for {symbol}: {} is older than {}",
                    row.timestamp,
                    last
                );
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let is_new = file.metadata()?.len() == 0;
        if !is_new && !ends_with_newline(&mut file)? {
            warn!(symbol, "data file does not end in a newline, terminating partial line");
            file.write_all(b"\n")
                .with_context(|| format!("failed to repair {}", path.display()))?;
        }

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        wtr.serialize(row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
        wtr.flush()
            .with_context(|| format!("failed to flush {}", path.display()))?;

        self.last_seen.lock().insert(symbol.to_string(), row.timestamp);
        debug!(symbol, new_file = is_new, "snapshot row appended");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// The last `k` rows in file order. A missing file or a short history
    /// yields fewer rows, not an error. Records with the wrong number of
    /// fields (a line cut short by a crash) are skipped with a warning.
    pub fn read_tail(&self, symbol: &str, k: usize) -> Result<Vec<SnapshotRow>> {
        let path = self.path_for(symbol)?;
        if k == 0 || !path.exists() {
            return Ok(Vec::new());
        }

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let headers = rdr
            .headers()
            .with_context(|| format!("failed to read header of {}", path.display()))?
            .clone();

        let mut window: VecDeque<SnapshotRow> = VecDeque::with_capacity(k.min(1024));
        for rec in rdr.records() {
            let rec = rec.with_context(|| format!("failed to read {}", path.display()))?;
            let line = rec.position().map_or(0, |p| p.line());
            if rec.len() != CSV_HEADER.len() {
                warn!(
                    symbol,
                    line,
                    fields = rec.len(),
                    "skipping truncated row"
                );
                continue;
            }
            let row: SnapshotRow = rec
                .deserialize(Some(&headers))
                .with_context(|| format!("malformed row {line} in {}", path.display()))?;
            if window.len() == k {
                window.pop_front();
            }
            window.push_back(row);
        }
        Ok(window.into())
    }

    /// Every row of the symbol's file.
    pub fn read_all(&self, symbol: &str) -> Result<Vec<SnapshotRow>> {
        self.read_tail(symbol, usize::MAX)
    }

    /// Symbols that have a data file, sorted.
    pub fn symbols(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for path in self.csv_files()? {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                out.push(stem.to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    /// Combined size of all data files in bytes.
    pub fn total_size_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for path in self.csv_files()? {
            match fs::metadata(&path) {
                Ok(m) => total += m.len(),
                Err(e) => warn!(path = %path.display(), error = %e, "cannot stat data file"),
            }
        }
        Ok(total)
    }

    fn csv_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "csv") {
                files.push(path);
            }
        }
        Ok(files)
    }

    // -------------------------------------------------------------------------
    // Retention
    // -------------------------------------------------------------------------

    /// Trim every file with more than `keep_rows` rows down to its newest
    /// `keep_rows`. A file that fails is logged and left untouched.
    pub fn prune(&self, keep_rows: usize) -> Result<PruneSummary> {
        let mut summary = PruneSummary::default();

        for symbol in self.symbols()? {
            summary.files_processed += 1;
            match self.prune_one(&symbol, keep_rows) {
                Ok(0) => {}
                Ok(removed) => {
                    summary.files_pruned += 1;
                    summary.rows_removed += removed;
                    info!(symbol = %symbol, kept = keep_rows, removed, "data file pruned");
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "failed to prune data file"),
            }
        }

        Ok(summary)
    }

    fn prune_one(&self, symbol: &str, keep_rows: usize) -> Result<usize> {
        let rows = self.read_all(symbol)?;
        if rows.len() <= keep_rows {
            return Ok(0);
        }
        let removed = rows.len() - keep_rows;

        let path = self.path_for(symbol)?;
        let tmp_path = path.with_extension("csv.tmp");
        {
            let mut wtr = csv::Writer::from_path(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            for row in &rows[removed..] {
                wtr.serialize(row)?;
            }
            wtr.flush()?;
        }
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;

        Ok(removed)
    }
}

/// True for an empty file or one whose last byte is `\n`.
fn ends_with_newline(file: &mut File) -> Result<bool> {
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    /// Row `i` of a synthetic series, five minutes apart.
    pub(crate) fn row(i: i64, oi: f64, funding: f64) -> SnapshotRow {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(5 * i);
        SnapshotRow {
            timestamp: ts,
            mark_price: 100.0 + i as f64,
            index_price: 99.5 + i as f64,
            basis: Some(0.5),
            basis_percent: Some(0.5 / (99.5 + i as f64) * 100.0),
            last_funding_rate: Some(funding),
            next_funding_time: Some(1_704_096_000_000),
            oi: Some(oi),
            long_short_account_ratio: Some(1.2),
            top_trader_account_ls_ratio: None,
            top_trader_position_ls_ratio: Some(0.9),
            taker_buy_sell_ratio: Some(1.05),
        }
    }

    #[test]
    fn header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.append("BTCUSDT", &row(0, 1.0, 0.0)).unwrap();
        store.append("BTCUSDT", &row(1, 2.0, 0.0)).unwrap();

        let text = fs::read_to_string(dir.path().join("BTCUSDT.csv")).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], crate::types::CSV_HEADER.join(","));
        assert_eq!(text.matches("timestamp").count(), 1);
    }

    #[test]
    fn tail_preserves_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        for i in 0..25 {
            store.append("ETHUSDT", &row(i, i as f64, 0.0)).unwrap();
        }

        let tail = store.read_tail("ETHUSDT", 10).unwrap();
        let ois: Vec<f64> = tail.iter().map(|r| r.oi.unwrap()).collect();
        assert_eq!(ois, (15..25).map(|i| i as f64).collect::<Vec<_>>());
        assert_eq!(store.read_all("ETHUSDT").unwrap().len(), 25);
    }

    #[test]
    fn short_history_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        assert!(store.read_tail("NOPEUSDT", 10).unwrap().is_empty());

        for i in 0..3 {
            store.append("SOLUSDT", &row(i, 1.0, 0.0)).unwrap();
        }
        assert_eq!(store.read_tail("SOLUSDT", 10).unwrap().len(), 3);
    }

    #[test]
    fn missing_metrics_round_trip_as_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let mut r = row(0, 1.0, 0.0);
        r.oi = None;
        r.basis = None;
        store.append("XRPUSDT", &r).unwrap();

        let back = store.read_tail("XRPUSDT", 1).unwrap();
        assert_eq!(back[0], r);
        let text = fs::read_to_string(dir.path().join("XRPUSDT.csv")).unwrap();
        assert!(text.lines().nth(1).unwrap().contains(",,"));
    }

    #[test]
    fn out_of_order_append_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.append("BNBUSDT", &row(5, 1.0, 0.0)).unwrap();
        assert!(store.append("BNBUSDT", &row(4, 1.0, 0.0)).is_err());
        // Equal timestamps are allowed.
        store.append("BNBUSDT", &row(5, 2.0, 0.0)).unwrap();

        // A fresh store instance learns the last timestamp from disk.
        let reopened = SnapshotStore::open(dir.path()).unwrap();
        assert!(reopened.append("BNBUSDT", &row(1, 1.0, 0.0)).is_err());
    }

    #[test]
    fn truncated_last_line_does_not_block_the_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        for i in 0..10 {
            store.append("BTCUSDT", &row(i, 100.0, 0.0)).unwrap();
        }
        // A crash mid-write leaves a partial record with no newline.
        let path = dir.path().join("BTCUSDT.csv");
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"2024-01-01T01:00:00Z,150.0,149").unwrap();
        drop(f);

        let reopened = SnapshotStore::open(dir.path()).unwrap();
        let tail = reopened.read_tail("BTCUSDT", 10).unwrap();
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[9].timestamp, row(9, 0.0, 0.0).timestamp);

        reopened.append("BTCUSDT", &row(10, 200.0, 0.0)).unwrap();
        let rows = reopened.read_all("BTCUSDT").unwrap();
        assert_eq!(rows.len(), 11);
        assert_eq!(rows[10].oi, Some(200.0));

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("149\n"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn path_traversal_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        assert!(store.path_for("../etc/passwd").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for("1000PEPEUSDT").is_ok());
    }

    #[test]
    fn symbols_lists_data_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.append("ETHUSDT", &row(0, 1.0, 0.0)).unwrap();
        store.append("BTCUSDT", &row(0, 1.0, 0.0)).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(store.symbols().unwrap(), vec!["BTCUSDT", "ETHUSDT"]);
        assert!(store.total_size_bytes().unwrap() > 0);
    }

    #[test]
    fn prune_keeps_newest_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        for i in 0..12 {
            store.append("BTCUSDT", &row(i, i as f64, 0.0)).unwrap();
        }
        for i in 0..3 {
            store.append("ETHUSDT", &row(i, i as f64, 0.0)).unwrap();
        }

        let summary = store.prune(5).unwrap();
        assert_eq!(
            summary,
            PruneSummary {
                files_processed: 2,
                files_pruned: 1,
                rows_removed: 7,
            }
        );

        let rows = store.read_all("BTCUSDT").unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].oi, Some(7.0));
        assert_eq!(store.read_all("ETHUSDT").unwrap().len(), 3);
        // Appending after a prune still works and keeps the header.
        store.append("BTCUSDT", &row(12, 12.0, 0.0)).unwrap();
        assert_eq!(store.read_all("BTCUSDT").unwrap().len(), 6);
    }
}
