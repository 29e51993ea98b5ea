//! Sheets API v4 — header setup, duplicate check, row append.
//!
//! The message ID lives in the last configured column; that column is
//! what the duplicate check scans. The sheet content, not the local
//! ledger, is the source of truth for dedup.

use async_trait::async_trait;
use serde::Deserialize;

use super::ApiError;
use crate::parser::EmailRecord;
use crate::pipeline::RecordSink;

const SHEETS_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Thin Sheets client bound to one spreadsheet tab.
pub struct SheetsClient {
    client: reqwest::Client,
    access_token: String,
    spreadsheet_id: String,
    sheet_name: String,
    /// Letter of the last column, where the message ID is written.
    id_column: char,
}

impl SheetsClient {
    pub fn new(
        access_token: String,
        spreadsheet_id: String,
        sheet_name: String,
        column_count: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
            spreadsheet_id,
            sheet_name,
            id_column: column_letter(column_count),
        }
    }

    /// A1 notation for a range on our tab. Tab names that aren't bare
    /// identifiers must be single-quoted, with embedded quotes doubled.
    fn a1_range(&self, range: &str) -> String {
        let bare = !self.sheet_name.is_empty()
            && self
                .sheet_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if bare {
            format!("{}!{}", self.sheet_name, range)
        } else {
            format!("'{}'!{}", self.sheet_name.replace('\'', "''"), range)
        }
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            SHEETS_BASE,
            self.spreadsheet_id,
            encode_path_segment(&self.a1_range(range))
        )
    }

    async fn read_range(&self, range: &str) -> Result<ValueRange, ApiError> {
        let resp = self
            .client
            .get(self.values_url(range))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        Ok(resp.json().await?)
    }

    async fn write_header_row(&self, headers: &[String]) -> Result<(), ApiError> {
        let body = serde_json::json!({ "values": [headers] });

        let resp = self
            .client
            .put(self.values_url("A1"))
            .bearer_auth(&self.access_token)
            .query(&[("valueInputOption", "RAW")])
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        log::info!("Header row written to '{}'", self.sheet_name);
        Ok(())
    }

    /// Create the target tab via batchUpdate addSheet.
    async fn create_sheet(&self) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "requests": [{
                "addSheet": {
                    "properties": { "title": self.sheet_name }
                }
            }]
        });

        let resp = self
            .client
            .post(format!(
                "{}/{}:batchUpdate",
                SHEETS_BASE, self.spreadsheet_id
            ))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        log::info!("Created sheet tab '{}'", self.sheet_name);
        Ok(())
    }
}

#[async_trait]
impl RecordSink for SheetsClient {
    /// Idempotent setup: make sure the tab exists and row 1 holds headers.
    async fn ensure_schema(&self, headers: &[String]) -> Result<(), ApiError> {
        let range = format!("A1:{}1", self.id_column);
        match self.read_range(&range).await {
            Ok(existing) if existing.values.is_empty() => self.write_header_row(headers).await,
            Ok(_) => Ok(()),
            // Read fails when the tab doesn't exist yet; create it and retry
            Err(ApiError::Api { status: 400, .. }) => {
                self.create_sheet().await?;
                self.write_header_row(headers).await
            }
            Err(e) => Err(e),
        }
    }

    async fn duplicate_exists(&self, id: &str) -> Result<bool, ApiError> {
        let range = format!("{0}:{0}", self.id_column);
        let existing = self.read_range(&range).await?;
        Ok(existing
            .values
            .iter()
            .any(|row| row.first().map(String::as_str) == Some(id)))
    }

    async fn append(&self, record: &EmailRecord) -> Result<(), ApiError> {
        let body = serde_json::json!({ "values": [row_values(record)] });

        let resp = self
            .client
            .post(format!(
                "{}:append",
                self.values_url(&format!("A:{}", self.id_column))
            ))
            .bearer_auth(&self.access_token)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        Ok(())
    }
}

/// Cell values for one record, in column-header order: the ID lands in
/// the last column, where `duplicate_exists` scans for it.
fn row_values(record: &EmailRecord) -> Vec<&str> {
    vec![
        &record.from,
        &record.subject,
        &record.date,
        &record.body,
        &record.id,
    ]
}

/// Letter of the n-th column (1-based). Config load rejects header lists
/// longer than 26 columns.
fn column_letter(n: usize) -> char {
    let clamped = n.clamp(1, 26);
    (b'A' + clamped as u8 - 1) as char
}

/// Percent-encode one URL path segment. Unreserved characters and the A1
/// punctuation Sheets accepts literally (`!`, `:`, `'`) pass through;
/// everything else, spaces included, becomes %XX. Form encoding is wrong
/// here: `+` in a path segment is a literal plus.
fn encode_path_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => out.push(byte as char),
            b'-' | b'.' | b'_' | b'~' | b'!' | b':' | b'\'' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
