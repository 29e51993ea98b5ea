//! Ingestion coordinator — drives one run of the mailbox-to-sheet pipeline.
//!
//! Per-item order on success is append-to-sheet, then mark-read, then
//! ledger insert. A crash between append and ledger insert leaves the row
//! in the sheet but not in the ledger; the sheet-side duplicate check on
//! the next run is what keeps that item from being appended twice. The
//! ledger is a cache that saves duplicate-check round-trips, not the
//! source of truth.

use std::time::Duration;

use async_trait::async_trait;

use crate::google::gmail::RawMessage;
use crate::google::ApiError;
use crate::ledger::Ledger;
use crate::parser::{parse_message, EmailRecord};

/// Where candidate items come from.
#[async_trait]
pub trait MailSource {
    /// IDs of candidate messages matching a search query, in source order.
    async fn list(&self, query: &str, max_results: u32) -> Result<Vec<String>, ApiError>;
    /// Full message detail. `Ok(None)` when the message no longer exists.
    async fn fetch(&self, id: &str) -> Result<Option<RawMessage>, ApiError>;
    /// Advance the item's state so it stops matching the query.
    async fn mark_done(&self, id: &str) -> Result<(), ApiError>;
}

/// Where normalized records go.
#[async_trait]
pub trait RecordSink {
    /// Idempotent setup: target exists, header row present.
    async fn ensure_schema(&self, headers: &[String]) -> Result<(), ApiError>;
    /// Whether a record with this ID is already present downstream.
    async fn duplicate_exists(&self, id: &str) -> Result<bool, ApiError>;
    /// Append one record.
    async fn append(&self, record: &EmailRecord) -> Result<(), ApiError>;
}

/// Run parameters, opaque to the coordinator.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub query: String,
    pub max_results: u32,
    pub column_headers: Vec<String>,
    /// Pause after each successful append, to stay under the sink's
    /// write-rate limit.
    pub rate_limit_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Items newly appended this run.
    pub processed: usize,
    /// Total IDs in the ledger after the run.
    pub total_recorded: usize,
}

/// One full ingestion run: list, dedup, normalize, append, advance, and
/// finally persist the ledger. Transient collaborator failures skip the
/// item and leave it for the next run; only schema setup and the final
/// ledger save can fail the run as a whole.
pub async fn run<S: MailSource, K: RecordSink>(
    source: &S,
    sink: &K,
    ledger: &mut Ledger,
    params: &RunParams,
) -> Result<RunSummary, ApiError> {
    sink.ensure_schema(&params.column_headers).await?;

    let candidates = match source.list(&params.query, params.max_results).await {
        Ok(ids) => ids,
        Err(e) => {
            log::warn!("Listing candidates failed: {}; nothing to process", e);
            Vec::new()
        }
    };
    log::info!("Found {} candidate message(s)", candidates.len());

    let mut processed = 0usize;

    for id in &candidates {
        if ledger.contains(id) {
            log::debug!("{}: already in ledger, skipping", id);
            continue;
        }

        // The sheet is the source of truth; the ledger may lag behind it
        // if a previous run died between append and ledger save.
        match sink.duplicate_exists(id).await {
            Ok(true) => {
                log::info!("{}: already in sheet, recording in ledger", id);
                ledger.insert(id.clone());
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                // Fail-open: a failed check means one extra append at worst
                log::warn!("{}: duplicate check failed ({}); treating as new", id, e);
            }
        }

        let raw = match source.fetch(id).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log::warn!("{}: no longer available, skipping", id);
                continue;
            }
            Err(e) => {
                log::warn!("{}: fetch failed ({}); will retry next run", id, e);
                continue;
            }
        };

        let record = match parse_message(&raw) {
            Some(record) => record,
            None => {
                log::warn!("{}: nothing to extract, skipping", id);
                continue;
            }
        };

        if let Err(e) = sink.append(&record).await {
            log::warn!("{}: append failed ({}); will retry next run", id, e);
            continue;
        }

        // Row is durable; mark-read failure just means the item is listed
        // again next run and caught by the ledger check.
        if let Err(e) = source.mark_done(id).await {
            log::warn!("{}: mark-done failed ({})", id, e);
        }

        ledger.insert(id.clone());
        processed += 1;
        log::info!("{}: appended ({})", id, record.subject);

        tokio::time::sleep(params.rate_limit_delay).await;
    }

    // Unconditional: duplicate-detected additions from step b must land
    // even when nothing was appended.
    ledger.save()?;

    Ok(RunSummary {
        processed,
        total_recorded: ledger.len(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;
    use crate::google::gmail::{Header, MessagePart, PartBody};

    fn api_err(message: &str) -> ApiError {
        ApiError::Api {
            status: 500,
            message: message.to_string(),
        }
    }

    fn text_message(id: &str, body: &str) -> RawMessage {
        use base64::Engine;
        RawMessage {
            id: id.to_string(),
            payload: Some(MessagePart {
                mime_type: "text/plain".to_string(),
                headers: vec![
                    Header {
                        name: "From".to_string(),
                        value: format!("{}@example.com", id),
                    },
                    Header {
                        name: "Subject".to_string(),
                        value: format!("subject {}", id),
                    },
                    Header {
                        name: "Date".to_string(),
                        value: "Sat, 8 Feb 2026 09:30:00 +0000".to_string(),
                    },
                ],
                body: Some(PartBody {
                    data: Some(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(body)),
                }),
                parts: Vec::new(),
            }),
        }
    }

    #[derive(Default)]
    struct MockSource {
        ids: Vec<String>,
        messages: HashMap<String, RawMessage>,
        fail_fetch: HashSet<String>,
        marked: Mutex<Vec<String>>,
    }

    impl MockSource {
        fn with_messages(ids: &[&str]) -> Self {
            Self {
                ids: ids.iter().map(|s| s.to_string()).collect(),
                messages: ids
                    .iter()
                    .map(|s| (s.to_string(), text_message(s, "hello")))
                    .collect(),
                ..Default::default()
            }
        }

        fn marked(&self) -> Vec<String> {
            self.marked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailSource for MockSource {
        async fn list(&self, _query: &str, max_results: u32) -> Result<Vec<String>, ApiError> {
            Ok(self
                .ids
                .iter()
                .take(max_results as usize)
                .cloned()
                .collect())
        }

        async fn fetch(&self, id: &str) -> Result<Option<RawMessage>, ApiError> {
            if self.fail_fetch.contains(id) {
                return Err(api_err("fetch boom"));
            }
            Ok(self.messages.get(id).cloned())
        }

        async fn mark_done(&self, id: &str) -> Result<(), ApiError> {
            self.marked.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockSink {
        existing: Mutex<HashSet<String>>,
        rows: Mutex<Vec<EmailRecord>>,
        fail_append: HashSet<String>,
        fail_duplicate_check: bool,
        duplicate_calls: Mutex<Vec<String>>,
    }

    impl MockSink {
        fn rows(&self) -> Vec<EmailRecord> {
            self.rows.lock().unwrap().clone()
        }

        fn duplicate_calls(&self) -> Vec<String> {
            self.duplicate_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordSink for MockSink {
        async fn ensure_schema(&self, _headers: &[String]) -> Result<(), ApiError> {
            Ok(())
        }

        async fn duplicate_exists(&self, id: &str) -> Result<bool, ApiError> {
            self.duplicate_calls.lock().unwrap().push(id.to_string());
            if self.fail_duplicate_check {
                return Err(api_err("check boom"));
            }
            Ok(self.existing.lock().unwrap().contains(id))
        }

        async fn append(&self, record: &EmailRecord) -> Result<(), ApiError> {
            if self.fail_append.contains(&record.id) {
                return Err(api_err("append boom"));
            }
            self.existing.lock().unwrap().insert(record.id.clone());
            self.rows.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn params() -> RunParams {
        RunParams {
            query: "is:unread".to_string(),
            max_results: 50,
            column_headers: ["From", "Subject", "Date", "Content", "Email ID"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rate_limit_delay: Duration::ZERO,
        }
    }

    fn temp_ledger(dir: &tempfile::TempDir) -> Ledger {
        Ledger::load(dir.path().join("ledger.json"))
    }

    #[tokio::test]
    async fn test_happy_path_two_messages() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::with_messages(&["m1", "m2"]);
        let sink = MockSink::default();
        let mut ledger = temp_ledger(&dir);

        let summary = run(&source, &sink, &mut ledger, &params()).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.total_recorded, 2);
        assert_eq!(sink.rows().len(), 2);
        assert_eq!(source.marked(), vec!["m1", "m2"]);
        assert!(ledger.contains("m1") && ledger.contains("m2"));
    }

    #[tokio::test]
    async fn test_append_failure_leaves_item_for_next_run() {
        // Source lists [m1, m2]; append succeeds for m1, fails for m2.
        // Expected: processed 1, ledger {m1}, only m1 advanced.
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::with_messages(&["m1", "m2"]);
        let sink = MockSink {
            fail_append: HashSet::from(["m2".to_string()]),
            ..Default::default()
        };
        let mut ledger = temp_ledger(&dir);

        let summary = run(&source, &sink, &mut ledger, &params()).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert!(ledger.contains("m1"));
        assert!(!ledger.contains("m2"));
        assert_eq!(source.marked(), vec!["m1"]);
        assert_eq!(sink.rows().len(), 1);
        assert_eq!(sink.rows()[0].id, "m1");
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::with_messages(&["m1", "m2"]);
        let sink = MockSink::default();
        let mut ledger = temp_ledger(&dir);

        let first = run(&source, &sink, &mut ledger, &params()).await.unwrap();
        assert_eq!(first.processed, 2);

        // Same source state, reloaded ledger — nothing new to do
        let mut ledger = temp_ledger(&dir);
        let second = run(&source, &sink, &mut ledger, &params()).await.unwrap();

        assert_eq!(second.processed, 0);
        assert_eq!(second.total_recorded, 2);
        assert_eq!(sink.rows().len(), 2);
        assert_eq!(source.marked().len(), 2);
    }

    #[tokio::test]
    async fn test_ledger_short_circuits_duplicate_check() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::with_messages(&["m1", "m2"]);
        let sink = MockSink::default();
        let mut ledger = temp_ledger(&dir);
        ledger.insert("m1");

        let summary = run(&source, &sink, &mut ledger, &params()).await.unwrap();

        assert_eq!(summary.processed, 1);
        // m1 never reached the sink-side check
        assert_eq!(sink.duplicate_calls(), vec!["m2"]);
    }

    #[tokio::test]
    async fn test_sheet_duplicate_recorded_in_ledger_without_rewrite() {
        // m1 is in the sheet but not the ledger — the crashed-between-
        // append-and-save case. It must be adopted, not re-appended.
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::with_messages(&["m1"]);
        let sink = MockSink::default();
        sink.existing.lock().unwrap().insert("m1".to_string());
        let mut ledger = temp_ledger(&dir);

        let summary = run(&source, &sink, &mut ledger, &params()).await.unwrap();

        assert_eq!(summary.processed, 0);
        assert_eq!(summary.total_recorded, 1);
        assert!(ledger.contains("m1"));
        assert!(sink.rows().is_empty());
        assert!(source.marked().is_empty());

        // The adoption must have been persisted despite zero processed
        let reloaded = temp_ledger(&dir);
        assert!(reloaded.contains("m1"));
    }

    #[tokio::test]
    async fn test_duplicate_check_failure_is_fail_open() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::with_messages(&["m1"]);
        let sink = MockSink {
            fail_duplicate_check: true,
            ..Default::default()
        };
        let mut ledger = temp_ledger(&dir);

        let summary = run(&source, &sink, &mut ledger, &params()).await.unwrap();

        // Treated as new: still fetched, appended, recorded
        assert_eq!(summary.processed, 1);
        assert_eq!(sink.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_item() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockSource::with_messages(&["m1", "m2"]);
        source.fail_fetch.insert("m1".to_string());
        let sink = MockSink::default();
        let mut ledger = temp_ledger(&dir);

        let summary = run(&source, &sink, &mut ledger, &params()).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert!(!ledger.contains("m1"));
        assert!(ledger.contains("m2"));
        assert_eq!(sink.rows().len(), 1);
        assert_eq!(sink.rows()[0].id, "m2");
    }

    #[tokio::test]
    async fn test_vanished_message_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockSource::with_messages(&["m1"]);
        source.messages.remove("m1"); // listed but fetch returns None
        let sink = MockSink::default();
        let mut ledger = temp_ledger(&dir);

        let summary = run(&source, &sink, &mut ledger, &params()).await.unwrap();

        assert_eq!(summary.processed, 0);
        assert!(!ledger.contains("m1"));
        assert!(sink.rows().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_message_skipped_without_ledger_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockSource::with_messages(&["m1"]);
        source
            .messages
            .insert("m1".to_string(), RawMessage::default()); // no payload
        let sink = MockSink::default();
        let mut ledger = temp_ledger(&dir);

        let summary = run(&source, &sink, &mut ledger, &params()).await.unwrap();

        assert_eq!(summary.processed, 0);
        assert!(!ledger.contains("m1"));
    }

    #[tokio::test]
    async fn test_empty_listing_terminates_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default();
        let sink = MockSink::default();
        let mut ledger = temp_ledger(&dir);

        let summary = run(&source, &sink, &mut ledger, &params()).await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                processed: 0,
                total_recorded: 0
            }
        );
    }

    #[tokio::test]
    async fn test_max_results_respected() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::with_messages(&["m1", "m2", "m3"]);
        let sink = MockSink::default();
        let mut ledger = temp_ledger(&dir);

        let mut p = params();
        p.max_results = 2;
        let summary = run(&source, &sink, &mut ledger, &p).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert!(!ledger.contains("m3"));
    }

    #[tokio::test]
    async fn test_no_duplicate_rows_across_runs_with_stale_ledger() {
        // Run once, throw the ledger away, run again: the sheet-side
        // check alone must keep the row count at one per ID.
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::with_messages(&["m1"]);
        let sink = MockSink::default();

        let mut ledger = temp_ledger(&dir);
        run(&source, &sink, &mut ledger, &params()).await.unwrap();
        assert_eq!(sink.rows().len(), 1);

        let mut fresh = Ledger::load(dir.path().join("other.json"));
        let second = run(&source, &sink, &mut fresh, &params()).await.unwrap();

        assert_eq!(second.processed, 0);
        assert_eq!(sink.rows().len(), 1);
        assert!(fresh.contains("m1"));
    }
}
