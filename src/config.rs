//! Run parameters, read from ~/.mailsheet/config.json.
//!
//! Everything except the spreadsheet ID has a sensible default, so a
//! minimal config is `{"spreadsheetId": "..."}`.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Target spreadsheet, from its URL:
    /// https://docs.google.com/spreadsheets/d/{id}/edit
    pub spreadsheet_id: String,

    /// Gmail search query selecting candidate messages.
    #[serde(default = "default_query")]
    pub query: String,

    /// Upper bound on messages considered per run.
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Tab the rows land in.
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,

    /// Column labels; the message ID goes in the last column.
    #[serde(default = "default_column_headers")]
    pub column_headers: Vec<String>,

    /// Pause after each appended row, in milliseconds.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
}

fn default_query() -> String {
    "is:unread".to_string()
}

fn default_max_results() -> u32 {
    50
}

fn default_sheet_name() -> String {
    "Emails".to_string()
}

fn default_column_headers() -> Vec<String> {
    ["From", "Subject", "Date", "Content", "Email ID"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_rate_limit_ms() -> u64 {
    500
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config at {0}; create it with at least {{\"spreadsheetId\": \"...\"}}")]
    NotFound(PathBuf),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
    #[error("columnHeaders must have 1 to 26 entries, got {0}")]
    ColumnCount(usize),
}

/// Directory holding config, token, credentials, and the ledger.
pub fn data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".mailsheet")
}

/// Config file location; MAILSHEET_CONFIG overrides for testing and
/// multi-account setups.
pub fn config_path() -> PathBuf {
    match std::env::var_os("MAILSHEET_CONFIG") {
        Some(path) => PathBuf::from(path),
        None => data_dir().join("config.json"),
    }
}

/// Ledger file location.
pub fn ledger_path() -> PathBuf {
    data_dir().join("processed.json")
}

impl Config {
    pub fn load() -> Result<Config, ConfigError> {
        Self::load_from(config_path())
    }

    pub fn load_from(path: PathBuf) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let content =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// The ID column is addressed by a single letter, so anything past
    /// column Z is out of range.
    fn validate(&self) -> Result<(), ConfigError> {
        let count = self.column_headers.len();
        if count == 0 || count > 26 {
            return Err(ConfigError::ColumnCount(count));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
