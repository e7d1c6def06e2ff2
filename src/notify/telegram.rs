// =============================================================================
// Telegram Bot API client — sendMessage / sendDocument
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::runtime_config::TelegramConfig;

pub struct TelegramNotifier {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("config", &self.config)
            .finish()
    }
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { config, client })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// Post an HTML-formatted text message.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let resp = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .context("Telegram sendMessage request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage returned {}: {}", status, text);
        }

        debug!(chars = text.len(), "Telegram message sent");
        Ok(())
    }

    /// Upload `path` as a document with an HTML caption.
    pub async fn send_document(&self, path: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("chart.svg")
            .to_string();

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/svg+xml")
            .context("invalid document mime type")?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("document", part);

        let resp = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .context("Telegram sendDocument request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendDocument returned {}: {}", status, text);
        }

        info!(path = %path.display(), "chart sent to Telegram");
        Ok(())
    }

    /// Send `text`, attached to `chart` when one is given. A failed upload
    /// falls back to the plain message.
    pub async fn send_with_chart(&self, text: &str, chart: Option<&Path>) -> Result<()> {
        if let Some(path) = chart {
            match self.send_document(path, text).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(error = %e, "chart upload failed, sending text only"),
            }
        }
        self.send_message(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_url_and_debug_redaction() {
        let n = TelegramNotifier::new(TelegramConfig {
            bot_token: "123:SECRET".into(),
            chat_id: "-100".into(),
            api_url: "https://api.telegram.org/".into(),
        })
        .unwrap();
        assert_eq!(
            n.method_url("sendMessage"),
            "https://api.telegram.org/bot123:SECRET/sendMessage"
        );
        assert!(!format!("{n:?}").contains("SECRET"));
    }

    #[tokio::test]
    async fn unreachable_api_is_an_error() {
        let n = TelegramNotifier::new(TelegramConfig {
            bot_token: "t".into(),
            chat_id: "c".into(),
            api_url: "http://127.0.0.1:9".into(),
        })
        .unwrap();
        assert!(n.send_message("hello").await.is_err());
        // Missing chart file falls through to the text path, which also fails here.
        assert!(n
            .send_with_chart("hello", Some(Path::new("/nonexistent/chart.svg")))
            .await
            .is_err());
    }
}
