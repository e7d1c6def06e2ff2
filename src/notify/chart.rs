// =============================================================================
// Monitor chart — 2x2 SVG panels rendered from stored history
// =============================================================================
//
//   ┌──────────────────────┬──────────────────────┐
//   │ mark vs index price  │ basis percent        │
//   ├──────────────────────┼──────────────────────┤
//   │ open interest        │ funding rate (%)     │
//   └──────────────────────┴──────────────────────┘
//
// Gaps (`None` cells) break the line instead of being drawn as zero.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::types::SnapshotRow;

/// Fewer rows than this produce no chart.
pub const MIN_CHART_ROWS: usize = 5;

const WIDTH: f64 = 1200.0;
const HEIGHT: f64 = 860.0;
const HEADER: f64 = 60.0;
const PANEL_W: f64 = WIDTH / 2.0;
const PANEL_H: f64 = (HEIGHT - HEADER) / 2.0;
const PAD_LEFT: f64 = 80.0;
const PAD_RIGHT: f64 = 20.0;
const PAD_TOP: f64 = 36.0;
const PAD_BOTTOM: f64 = 40.0;

/// Funding reference lines, in percent.
const FUNDING_GUIDE_PCT: f64 = 0.1;

struct Series {
    label: &'static str,
    color: &'static str,
    dashed: bool,
    values: Vec<Option<f64>>,
}

struct Panel {
    title: &'static str,
    y_label: &'static str,
    series: Vec<Series>,
    guides: Vec<(f64, &'static str)>,
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Compact tick label.
fn tick(v: f64) -> String {
    let a = v.abs();
    if a >= 1e9 {
        format!("{:.2}B", v / 1e9)
    } else if a >= 1e6 {
        format!("{:.2}M", v / 1e6)
    } else if a >= 1e3 {
        format!("{:.1}K", v / 1e3)
    } else if a >= 1.0 || a == 0.0 {
        format!("{v:.2}")
    } else {
        format!("{v:.4}")
    }
}

fn y_range(panel: &Panel) -> Option<(f64, f64)> {
    let values = panel
        .series
        .iter()
        .flat_map(|s| s.values.iter().flatten().copied())
        .chain(panel.guides.iter().map(|(g, _)| *g))
        .filter(|v| v.is_finite());

    let (lo, hi) = values.fold(None, |acc: Option<(f64, f64)>, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })?;

    if (hi - lo).abs() < f64::EPSILON {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.01 };
        return Some((lo - pad, hi + pad));
    }
    let pad = (hi - lo) * 0.05;
    Some((lo - pad, hi + pad))
}

fn render_panel(out: &mut String, panel: &Panel, x0: f64, y0: f64, xs: &[f64], times: (&str, &str)) {
    let plot_x = x0 + PAD_LEFT;
    let plot_y = y0 + PAD_TOP;
    let plot_w = PANEL_W - PAD_LEFT - PAD_RIGHT;
    let plot_h = PANEL_H - PAD_TOP - PAD_BOTTOM;

    let _ = writeln!(
        out,
        r##"<text x="{:.1}" y="{:.1}" font-size="16" font-weight="bold" text-anchor="middle">{}</text>"##,
        x0 + PANEL_W / 2.0,
        y0 + 22.0,
        panel.title
    );
    let _ = writeln!(
        out,
        r##"<rect x="{plot_x:.1}" y="{plot_y:.1}" width="{plot_w:.1}" height="{plot_h:.1}" fill="#fafafa" stroke="#999"/>"##
    );
    let _ = writeln!(
        out,
        r##"<text x="{:.1}" y="{:.1}" font-size="12" text-anchor="middle" transform="rotate(-90 {:.1} {:.1})">{}</text>"##,
        x0 + 14.0,
        plot_y + plot_h / 2.0,
        x0 + 14.0,
        plot_y + plot_h / 2.0,
        panel.y_label
    );

    let Some((lo, hi)) = y_range(panel) else {
        let _ = writeln!(
            out,
            r##"<text x="{:.1}" y="{:.1}" font-size="14" fill="#999" text-anchor="middle">no data</text>"##,
            plot_x + plot_w / 2.0,
            plot_y + plot_h / 2.0
        );
        return;
    };
    let sx = |x: f64| plot_x + x * plot_w;
    let sy = |v: f64| plot_y + plot_h - (v - lo) / (hi - lo) * plot_h;

    // y ticks
    for i in 0..=4 {
        let v = lo + (hi - lo) * i as f64 / 4.0;
        let y = sy(v);
        let _ = writeln!(
            out,
            r##"<line x1="{plot_x:.1}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="#e0e0e0"/>"##,
            plot_x + plot_w
        );
        let _ = writeln!(
            out,
            r##"<text x="{:.1}" y="{:.1}" font-size="11" text-anchor="end">{}</text>"##,
            plot_x - 6.0,
            y + 4.0,
            tick(v)
        );
    }

    // x labels: first and last timestamp
    let _ = writeln!(
        out,
        r##"<text x="{plot_x:.1}" y="{:.1}" font-size="11">{}</text>"##,
        plot_y + plot_h + 16.0,
        times.0
    );
    let _ = writeln!(
        out,
        r##"<text x="{:.1}" y="{:.1}" font-size="11" text-anchor="end">{}</text>"##,
        plot_x + plot_w,
        plot_y + plot_h + 16.0,
        times.1
    );

    for (g, color) in &panel.guides {
        let y = sy(*g);
        let _ = writeln!(
            out,
            r##"<line x1="{plot_x:.1}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="{color}" stroke-dasharray="6 4" stroke-opacity="0.7"/>"##,
            plot_x + plot_w
        );
    }

    for (i, s) in panel.series.iter().enumerate() {
        let mut d = String::new();
        let mut pen_down = false;
        for (x, v) in xs.iter().zip(&s.values) {
            match v.filter(|v| v.is_finite()) {
                Some(v) => {
                    let cmd = if pen_down { 'L' } else { 'M' };
                    let _ = write!(d, "{cmd}{:.1},{:.1} ", sx(*x), sy(v));
                    pen_down = true;
                }
                None => pen_down = false,
            }
        }
        let dash = if s.dashed { r#" stroke-dasharray="8 4""# } else { "" };
        let _ = writeln!(
            out,
            r##"<path d="{}" fill="none" stroke="{}" stroke-width="2"{dash}/>"##,
            d.trim_end(),
            s.color
        );

        // legend
        let ly = plot_y + 14.0 + i as f64 * 16.0;
        let _ = writeln!(
            out,
            r##"<line x1="{:.1}" y1="{ly:.1}" x2="{:.1}" y2="{ly:.1}" stroke="{}" stroke-width="2"{dash}/>"##,
            plot_x + 10.0,
            plot_x + 30.0,
            s.color
        );
        let _ = writeln!(
            out,
            r##"<text x="{:.1}" y="{:.1}" font-size="11">{}</text>"##,
            plot_x + 36.0,
            ly + 4.0,
            s.label
        );
    }
}

/// Render the four-panel chart as an SVG document.
///
/// `None` when fewer than `MIN_CHART_ROWS` rows are available.
pub fn render_svg(symbol: &str, rows: &[SnapshotRow], funding_rate: f64, oi_ratio: f64) -> Option<String> {
    if rows.len() < MIN_CHART_ROWS {
        return None;
    }

    let t0 = rows[0].timestamp.timestamp_millis() as f64;
    let t1 = rows[rows.len() - 1].timestamp.timestamp_millis() as f64;
    let span = t1 - t0;
    let xs: Vec<f64> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| {
            if span > 0.0 {
                (r.timestamp.timestamp_millis() as f64 - t0) / span
            } else {
                i as f64 / (rows.len() - 1) as f64
            }
        })
        .collect();
    let first = rows[0].timestamp.format("%m-%d %H:%M").to_string();
    let last = rows[rows.len() - 1].timestamp.format("%m-%d %H:%M").to_string();

    let panels = [
        Panel {
            title: "Price",
            y_label: "USDT",
            series: vec![
                Series {
                    label: "mark",
                    color: "#1f77b4",
                    dashed: false,
                    values: rows.iter().map(|r| Some(r.mark_price)).collect(),
                },
                Series {
                    label: "index",
                    color: "#ff7f0e",
                    dashed: true,
                    values: rows.iter().map(|r| Some(r.index_price).filter(|p| *p > 0.0)).collect(),
                },
            ],
            guides: vec![],
        },
        Panel {
            title: "Basis",
            y_label: "basis (%)",
            series: vec![Series {
                label: "basis %",
                color: "#2ca02c",
                dashed: false,
                values: rows.iter().map(|r| r.basis_percent).collect(),
            }],
            guides: vec![(0.0, "#d62728")],
        },
        Panel {
            title: "Open interest",
            y_label: "contracts",
            series: vec![Series {
                label: "OI",
                color: "#9467bd",
                dashed: false,
                values: rows.iter().map(|r| r.oi).collect(),
            }],
            guides: vec![],
        },
        Panel {
            title: "Funding rate",
            y_label: "funding (%)",
            series: vec![Series {
                label: "funding %",
                color: "#8c564b",
                dashed: false,
                values: rows
                    .iter()
                    .map(|r| r.last_funding_rate.map(|f| f * 100.0))
                    .collect(),
            }],
            guides: vec![(FUNDING_GUIDE_PCT, "#d62728"), (-FUNDING_GUIDE_PCT, "#d62728")],
        },
    ];

    let mut out = String::with_capacity(16 * 1024);
    let _ = writeln!(
        out,
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif">"##
    );
    let _ = writeln!(out, r##"<rect width="100%" height="100%" fill="white"/>"##);
    let _ = writeln!(
        out,
        r##"<text x="{:.1}" y="28" font-size="20" font-weight="bold" text-anchor="middle">{} monitor</text>"##,
        WIDTH / 2.0,
        escape(symbol)
    );
    let _ = writeln!(
        out,
        r##"<text x="{:.1}" y="50" font-size="14" text-anchor="middle">funding {:.4}%, OI ratio {:.2}x</text>"##,
        WIDTH / 2.0,
        funding_rate * 100.0,
        oi_ratio
    );

    for (i, panel) in panels.iter().enumerate() {
        let x0 = (i % 2) as f64 * PANEL_W;
        let y0 = HEADER + (i / 2) as f64 * PANEL_H;
        render_panel(&mut out, panel, x0, y0, &xs, (&first, &last));
    }

    out.push_str("</svg>\n");
    Some(out)
}

/// Writes charts under a fixed directory.
pub struct ChartRenderer {
    dir: PathBuf,
}

impl ChartRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Render and write `<dir>/<SYMBOL>_monitor_<YYYYmmdd_HHMMSS>.svg`.
    /// `Ok(None)` when the history is too short to chart.
    pub fn write(
        &self,
        symbol: &str,
        rows: &[SnapshotRow],
        funding_rate: f64,
        oi_ratio: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<PathBuf>> {
        let Some(svg) = render_svg(symbol, rows, funding_rate, oi_ratio) else {
            debug!(symbol, rows = rows.len(), "not enough history for a chart");
            return Ok(None);
        };

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create chart directory {}", self.dir.display()))?;
        let path = self
            .dir
            .join(format!("{symbol}_monitor_{}.svg", at.format("%Y%m%d_%H%M%S")));
        fs::write(&path, svg).with_context(|| format!("failed to write {}", path.display()))?;

        info!(symbol, path = %path.display(), "chart saved");
        Ok(Some(path))
    }
}
