//! Client-side view of the backend: the record list, the selected record and
//! its history.
//!
//! Nothing is mutated optimistically. Every successful add, update or delete
//! is followed by a full reload of `/records`, and every selection replaces
//! the history list with a fresh fetch. Each selection bumps a generation
//! counter; a history response that arrives after a newer selection is
//! dropped instead of overwriting the newer one. Record reloads are numbered
//! the same way, so an older list never replaces a newer one.

use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::client::ProvenanceApi;
use crate::dialog::{Dialog, Field};
use crate::error::{ClientError, SyncError};
use crate::record::{HistoryEntry, Record, RecordId, Verification};

/// Why an action stopped before reaching the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Validation(String),
    Cancelled(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Validation(msg) | Notice::Cancelled(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome<T> {
    Completed(T),
    Aborted(Notice),
}

impl<T> ActionOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, ActionOutcome::Completed(_))
    }

    pub fn notice(&self) -> Option<&Notice> {
        match self {
            ActionOutcome::Aborted(n) => Some(n),
            ActionOutcome::Completed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// The response was shown; holds the entry count.
    Applied(usize),
    /// A newer selection was made while this one was in flight.
    Superseded,
}

/// The selected record, or a bare id typed into the search box.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Record(Record),
    Manual(RecordId),
}

impl Selection {
    pub fn id(&self) -> &RecordId {
        match self {
            Selection::Record(r) => &r.id,
            Selection::Manual(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPhase {
    NoSelection,
    Selected,
    Loading,
}

/// Pending input for the add form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub user: String,
    pub data: String,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    records: Vec<Record>,
    history: Vec<HistoryEntry>,
    history_source: Option<String>,
    selection: Option<Selection>,
    draft: Draft,
    generation: u64,
    records_issued: u64,
    records_applied: u64,
    records_pending: usize,
    history_loading: bool,
    last_error: Option<String>,
}

impl Session {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// `database` or `blockchain`, as reported by the last applied history page.
    pub fn history_source(&self) -> Option<&str> {
        self.history_source.as_deref()
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn phase(&self) -> Phase {
        if self.records_pending > 0 {
            Phase::Loading
        } else {
            Phase::Idle
        }
    }

    pub fn history_phase(&self) -> HistoryPhase {
        match (&self.selection, self.history_loading) {
            (None, _) => HistoryPhase::NoSelection,
            (Some(_), true) => HistoryPhase::Loading,
            (Some(_), false) => HistoryPhase::Selected,
        }
    }

    /// Replaces the selection and drops the old history.
    fn select(&mut self, selection: Selection) {
        self.generation += 1;
        self.selection = Some(selection);
        self.history.clear();
        self.history_source = None;
        self.history_loading = false;
    }

    fn deselect(&mut self) {
        self.generation += 1;
        self.selection = None;
        self.history.clear();
        self.history_source = None;
        self.history_loading = false;
    }
}

pub struct Synchronizer<A, D> {
    api: A,
    dialog: D,
    session: Mutex<Session>,
}

impl<A: ProvenanceApi, D: Dialog> Synchronizer<A, D> {
    pub fn new(api: A, dialog: D) -> Self {
        Self {
            api,
            dialog,
            session: Mutex::new(Session::default()),
        }
    }

    /// Builds a synchronizer and performs the initial record load.
    pub async fn start(api: A, dialog: D) -> Result<Self, SyncError> {
        let sync = Self::new(api, dialog);
        sync.load_records().await?;
        Ok(sync)
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn dialog(&self) -> &D {
        &self.dialog
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> Session {
        self.session.lock().clone()
    }

    pub fn records(&self) -> Vec<Record> {
        self.session.lock().records.clone()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.session.lock().history.clone()
    }

    pub fn selection(&self) -> Option<Selection> {
        self.session.lock().selection.clone()
    }

    pub fn set_draft(&self, user: impl Into<String>, data: impl Into<String>) {
        let mut s = self.session.lock();
        s.draft = Draft {
            user: user.into(),
            data: data.into(),
        };
    }

    /// Replaces the local record list with the backend's. A response is
    /// dropped if a reload started after it has already been applied.
    pub async fn load_records(&self) -> Result<usize, SyncError> {
        let seq = {
            let mut s = self.session.lock();
            s.records_pending += 1;
            s.records_issued += 1;
            s.records_issued
        };
        let result = self.api.list_records().await;

        let mut s = self.session.lock();
        s.records_pending = s.records_pending.saturating_sub(1);
        match result {
            Ok(records) => {
                let count = records.len();
                if seq < s.records_applied {
                    debug!(seq, applied = s.records_applied, "dropping superseded record list");
                    return Ok(count);
                }
                s.records_applied = seq;
                s.records = records;
                s.last_error = None;
                debug!(count, "records loaded");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "record load failed");
                s.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Fetches history for `id` and shows it unless a newer selection has
    /// been made in the meantime.
    pub async fn load_history(&self, id: &RecordId) -> Result<HistoryOutcome, SyncError> {
        let generation = {
            let mut s = self.session.lock();
            s.history_loading = true;
            s.generation
        };
        let result = self.api.fetch_history(id).await;

        let mut s = self.session.lock();
        if s.generation != generation {
            debug!(record = %id, "dropping history for superseded selection");
            return Ok(HistoryOutcome::Superseded);
        }
        s.history_loading = false;
        match result {
            Ok(page) => {
                s.history_source = page.source.clone();
                s.history = page.into_entries();
                s.last_error = None;
                debug!(record = %id, count = s.history.len(), "history loaded");
                Ok(HistoryOutcome::Applied(s.history.len()))
            }
            Err(e) => {
                warn!(record = %id, error = %e, "history load failed");
                s.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Selects a row from the record list and loads its history.
    pub async fn select_record(&self, record: Record) -> Result<HistoryOutcome, SyncError> {
        let id = record.id.clone();
        self.session.lock().select(Selection::Record(record));
        self.load_history(&id).await
    }

    /// Selects a bare id, which need not be in the record list, so history
    /// of deleted records stays reachable.
    pub async fn search_history_by_id(
        &self,
        id: &str,
    ) -> Result<ActionOutcome<HistoryOutcome>, SyncError> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(validation("Enter record ID to search history"));
        }
        let id = RecordId::from(id);
        self.session.lock().select(Selection::Manual(id.clone()));
        let outcome = self.load_history(&id).await?;
        Ok(ActionOutcome::Completed(outcome))
    }

    pub fn clear_selection(&self) {
        self.session.lock().deselect();
    }

    pub async fn submit_draft(&self) -> Result<ActionOutcome<()>, SyncError> {
        let Draft { user, data } = self.session.lock().draft.clone();
        self.add_record(&user, &data).await
    }

    pub async fn add_record(&self, user: &str, data: &str) -> Result<ActionOutcome<()>, SyncError> {
        let (user, data) = (user.trim(), data.trim());
        if user.is_empty() || data.is_empty() {
            return Ok(validation("Username or data is missing."));
        }

        self.api
            .add_record(data, user)
            .await
            .map_err(|e| self.failed(e))?;
        info!(user = %user, "record added");

        self.session.lock().draft = Draft::default();
        self.load_records().await?;
        Ok(ActionOutcome::Completed(()))
    }

    /// Asks for new data (pre-filled with `current_value`) and a user, then
    /// updates. History is left as it is.
    pub async fn update_record(
        &self,
        id: &RecordId,
        current_value: &str,
    ) -> Result<ActionOutcome<()>, SyncError> {
        let data = self
            .dialog
            .prompt(
                Field::Data,
                &format!("Enter new data for record #{id}:"),
                Some(current_value),
            )
            .await;
        let Some(data) = non_blank(data) else {
            return Ok(cancelled("Update cancelled or no data entered."));
        };

        let user = self
            .dialog
            .prompt(Field::User, "Enter your username for this update:", None)
            .await;
        let Some(user) = non_blank(user) else {
            return Ok(validation("Username is required to update a record."));
        };

        self.api
            .update_record(id, &data, &user)
            .await
            .map_err(|e| self.failed(e))?;
        info!(record = %id, user = %user, "record updated");

        self.load_records().await?;
        Ok(ActionOutcome::Completed(()))
    }

    pub async fn delete_record(&self, id: &RecordId) -> Result<ActionOutcome<()>, SyncError> {
        let confirmed = self
            .dialog
            .confirm(&format!("Are you sure you want to delete record #{id}?"))
            .await;
        if !confirmed {
            return Ok(cancelled(format!("Deletion of record #{id} cancelled.")));
        }

        let user = self
            .dialog
            .prompt(Field::User, "Enter your username to delete:", None)
            .await;
        let Some(user) = non_blank(user) else {
            return Ok(validation("Username is required to delete a record."));
        };

        self.api
            .delete_record(id, &user)
            .await
            .map_err(|e| self.failed(e))?;
        info!(record = %id, user = %user, "record deleted");

        self.load_records().await?;
        Ok(ActionOutcome::Completed(()))
    }

    /// Read-only. Lists are not touched.
    pub async fn verify_record(&self, id: &RecordId) -> Result<Verification, SyncError> {
        let verification = self
            .api
            .verify_record(id)
            .await
            .map_err(|e| self.failed(e))?;
        info!(record = %id, verified = verification.is_verified(), "record verified");
        Ok(verification)
    }

    /// Wipes the backend, then starts over with no selection.
    pub async fn reset_backend(&self) -> Result<ActionOutcome<()>, SyncError> {
        let confirmed = self
            .dialog
            .confirm("Delete ALL records and provenance logs from the backend?")
            .await;
        if !confirmed {
            return Ok(cancelled("Reset cancelled."));
        }

        self.api.reset().await.map_err(|e| self.failed(e))?;
        warn!("backend reset");

        self.clear_selection();
        self.load_records().await?;
        Ok(ActionOutcome::Completed(()))
    }

    fn failed(&self, e: ClientError) -> SyncError {
        warn!(error = %e, retryable = e.is_retryable(), "backend call failed");
        self.session.lock().last_error = Some(e.to_string());
        SyncError::Backend(e)
    }
}

fn validation<T>(msg: impl Into<String>) -> ActionOutcome<T> {
    ActionOutcome::Aborted(Notice::Validation(msg.into()))
}

fn cancelled<T>(msg: impl Into<String>) -> ActionOutcome<T> {
    ActionOutcome::Aborted(Notice::Cancelled(msg.into()))
}

fn non_blank(input: Option<String>) -> Option<String> {
    input
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::ScriptedDialog;
    use crate::normalizer::TimestampValue;
    use crate::record::{HistoryPage, Operation};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct FakeBackend {
        records: Mutex<Vec<Record>>,
        history: Mutex<HashMap<String, Vec<HistoryEntry>>>,
        calls: Mutex<Vec<String>>,
        // history requests for these ids wait for the sender
        held: Mutex<HashMap<String, oneshot::Receiver<()>>>,
        // the next /records request snapshots the list, then waits
        held_list: Mutex<Option<oneshot::Receiver<()>>>,
        down: Mutex<bool>,
        next_id: Mutex<u64>,
    }

    impl FakeBackend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn log(&self, call: String) -> Result<(), ClientError> {
            self.calls.lock().push(call);
            if *self.down.lock() {
                return Err(ClientError::Status {
                    status: 503,
                    message: "down".into(),
                });
            }
            Ok(())
        }

        fn hold(&self, id: &str) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.held.lock().insert(id.to_string(), rx);
            tx
        }

        fn hold_list(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.held_list.lock() = Some(rx);
            tx
        }

        fn seed(&self, id: u64, data: &str, user: &str) {
            self.records.lock().push(record(id, data, user));
            *self.next_id.lock() = id + 1;
        }
    }

    fn record(id: u64, data: &str, user: &str) -> Record {
        Record {
            id: RecordId::from(id),
            data: data.into(),
            modified_by: user.into(),
            timestamp: TimestampValue::from(1_700_000_000i64),
        }
    }

    fn entry(log_id: u64, op: Operation, user: &str) -> HistoryEntry {
        HistoryEntry {
            log_id: Some(log_id),
            operation: op,
            user_id: user.into(),
            timestamp: TimestampValue::from("2025-10-01T12:00:00Z"),
            blockchain_tx: None,
            verified: false,
            record_hash: None,
            block_number: None,
        }
    }

    #[async_trait]
    impl ProvenanceApi for Arc<FakeBackend> {
        async fn list_records(&self) -> Result<Vec<Record>, ClientError> {
            self.log("GET /records".into())?;
            let records = self.records.lock().clone();
            let gate = self.held_list.lock().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(records)
        }

        async fn add_record(&self, data: &str, user: &str) -> Result<(), ClientError> {
            self.log(format!("POST /add {data} {user}"))?;
            let id = {
                let mut next = self.next_id.lock();
                *next += 1;
                *next
            };
            self.records.lock().push(record(id, data, user));
            self.history
                .lock()
                .entry(id.to_string())
                .or_default()
                .push(entry(id, Operation::Add, user));
            Ok(())
        }

        async fn update_record(
            &self,
            id: &RecordId,
            data: &str,
            user: &str,
        ) -> Result<(), ClientError> {
            self.log(format!("PUT /update/{id} {data} {user}"))?;
            for r in self.records.lock().iter_mut().filter(|r| &r.id == id) {
                r.data = data.into();
                r.modified_by = user.into();
            }
            Ok(())
        }

        async fn delete_record(&self, id: &RecordId, user: &str) -> Result<(), ClientError> {
            self.log(format!("DELETE /delete/{id} {user}"))?;
            self.records.lock().retain(|r| &r.id != id);
            Ok(())
        }

        async fn verify_record(&self, id: &RecordId) -> Result<Verification, ClientError> {
            self.log(format!("GET /verify/{id}"))?;
            Ok(serde_json::from_value(serde_json::json!({
                "record_id": id.as_str(),
                "verified": true,
                "reason": "match"
            }))
            .unwrap())
        }

        async fn fetch_history(&self, id: &RecordId) -> Result<HistoryPage, ClientError> {
            self.log(format!("GET /history/{id}"))?;
            let gate = self.held.lock().remove(id.as_str());
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            let history = self.history.lock().get(id.as_str()).cloned();
            Ok(HistoryPage {
                source: Some("database".into()),
                history,
                ..HistoryPage::default()
            })
        }

        async fn reset(&self) -> Result<(), ClientError> {
            self.log("DELETE /reset_db".into())?;
            self.records.lock().clear();
            self.history.lock().clear();
            Ok(())
        }
    }

    fn sync_with(
        backend: &Arc<FakeBackend>,
        dialog: ScriptedDialog,
    ) -> Synchronizer<Arc<FakeBackend>, ScriptedDialog> {
        Synchronizer::new(Arc::clone(backend), dialog)
    }

    #[tokio::test]
    async fn start_loads_records() {
        let backend = Arc::new(FakeBackend::default());
        backend.seed(1, "doc1", "alice");
        let sync = Synchronizer::start(Arc::clone(&backend), ScriptedDialog::new())
            .await
            .unwrap();
        assert_eq!(sync.records(), backend.records.lock().clone());
        assert_eq!(sync.snapshot().phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn load_replaces_without_merging() {
        let backend = Arc::new(FakeBackend::default());
        backend.seed(1, "doc1", "alice");
        let sync = sync_with(&backend, ScriptedDialog::new());
        sync.load_records().await.unwrap();

        *backend.records.lock() = vec![record(2, "doc2", "bob")];
        sync.load_records().await.unwrap();
        assert_eq!(sync.records(), vec![record(2, "doc2", "bob")]);
    }

    #[tokio::test]
    async fn older_record_list_never_wins() {
        let backend = Arc::new(FakeBackend::default());
        backend.seed(1, "doc1", "alice");
        let release = backend.hold_list();
        let sync = Arc::new(sync_with(&backend, ScriptedDialog::new()));

        let slow = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.load_records().await })
        };
        while !backend.calls().contains(&"GET /records".to_string()) {
            tokio::task::yield_now().await;
        }

        backend.seed(2, "doc2", "bob");
        sync.load_records().await.unwrap();
        assert_eq!(sync.records().len(), 2);
        assert_eq!(sync.snapshot().phase(), Phase::Loading);

        release.send(()).unwrap();
        assert_eq!(slow.await.unwrap().unwrap(), 1);
        assert_eq!(sync.records().len(), 2);
        assert_eq!(sync.snapshot().phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn add_rejects_blank_fields_offline() {
        let backend = Arc::new(FakeBackend::default());
        let sync = sync_with(&backend, ScriptedDialog::new());

        let a = sync.add_record("", "x").await.unwrap();
        let b = sync.add_record("u", "   ").await.unwrap();
        assert!(matches!(a, ActionOutcome::Aborted(Notice::Validation(_))));
        assert!(matches!(b, ActionOutcome::Aborted(Notice::Validation(_))));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn add_then_select_shows_add_entry() {
        let backend = Arc::new(FakeBackend::default());
        let sync = sync_with(&backend, ScriptedDialog::new());
        sync.set_draft(" alice ", "doc1");

        let outcome = sync.submit_draft().await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(sync.snapshot().draft(), &Draft::default());
        assert_eq!(backend.calls(), vec!["POST /add doc1 alice", "GET /records"]);

        let rows = sync.records();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].modified_by, "alice");

        let applied = sync.select_record(rows[0].clone()).await.unwrap();
        assert_eq!(applied, HistoryOutcome::Applied(1));
        let history = sync.history();
        assert_eq!(history[0].operation, Operation::Add);
        assert_eq!(history[0].user_id, "alice");
        assert!(!history[0].verified);
        assert_eq!(sync.snapshot().history_source(), Some("database"));
    }

    #[tokio::test]
    async fn update_prompts_then_reloads() {
        let backend = Arc::new(FakeBackend::default());
        backend.seed(1, "doc1", "alice");
        let dialog = ScriptedDialog::new().then_answer(" doc1-v2 ").then_answer("bob");
        let sync = sync_with(&backend, dialog);

        let outcome = sync.update_record(&RecordId::from(1u64), "doc1").await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(
            sync.dialog().asked(),
            vec![
                "Enter new data for record #1:",
                "Enter your username for this update:"
            ]
        );
        assert_eq!(backend.calls(), vec!["PUT /update/1 doc1-v2 bob", "GET /records"]);
        assert_eq!(sync.records()[0].data, "doc1-v2");
    }

    #[tokio::test]
    async fn update_cancel_and_blank_user_stay_offline() {
        let backend = Arc::new(FakeBackend::default());
        let sync = sync_with(
            &backend,
            ScriptedDialog::new()
                .then_dismiss()
                .then_answer("   ")
                .then_answer("new")
                .then_answer(""),
        );
        let id = RecordId::from(1u64);

        let dismissed = sync.update_record(&id, "old").await.unwrap();
        assert!(matches!(dismissed, ActionOutcome::Aborted(Notice::Cancelled(_))));
        let blank = sync.update_record(&id, "old").await.unwrap();
        assert!(matches!(blank, ActionOutcome::Aborted(Notice::Cancelled(_))));
        let no_user = sync.update_record(&id, "old").await.unwrap();
        assert!(matches!(no_user, ActionOutcome::Aborted(Notice::Validation(_))));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn update_leaves_history_alone() {
        let backend = Arc::new(FakeBackend::default());
        backend.seed(1, "doc1", "alice");
        backend
            .history
            .lock()
            .insert("1".into(), vec![entry(1, Operation::Add, "alice")]);
        let sync = sync_with(&backend, ScriptedDialog::new().then_answer("v2").then_answer("bob"));
        sync.search_history_by_id("1").await.unwrap();

        sync.update_record(&RecordId::from(1u64), "doc1").await.unwrap();
        assert_eq!(sync.history().len(), 1);
        assert_eq!(
            backend.calls().iter().filter(|c| c.starts_with("GET /history")).count(),
            1
        );
    }

    #[tokio::test]
    async fn delete_requires_confirmation_and_user() {
        let backend = Arc::new(FakeBackend::default());
        backend.seed(1, "doc1", "alice");
        let sync = sync_with(
            &backend,
            ScriptedDialog::new()
                .then_confirm(false)
                .then_confirm(true)
                .then_dismiss()
                .then_confirm(true)
                .then_answer("carol"),
        );
        let id = RecordId::from(1u64);

        let declined = sync.delete_record(&id).await.unwrap();
        assert!(matches!(declined, ActionOutcome::Aborted(Notice::Cancelled(_))));
        let no_user = sync.delete_record(&id).await.unwrap();
        assert!(matches!(no_user, ActionOutcome::Aborted(Notice::Validation(_))));
        assert!(backend.calls().is_empty());

        let done = sync.delete_record(&id).await.unwrap();
        assert!(done.is_completed());
        assert_eq!(backend.calls(), vec!["DELETE /delete/1 carol", "GET /records"]);
        assert!(sync.records().is_empty());
    }

    #[tokio::test]
    async fn search_reaches_deleted_records() {
        let backend = Arc::new(FakeBackend::default());
        backend
            .history
            .lock()
            .insert("42".into(), vec![entry(9, Operation::Delete, "dave")]);
        let sync = sync_with(&backend, ScriptedDialog::new());
        sync.load_records().await.unwrap();
        assert!(sync.records().is_empty());

        let outcome = sync.search_history_by_id(" 42 ").await.unwrap();
        assert_eq!(outcome, ActionOutcome::Completed(HistoryOutcome::Applied(1)));
        assert_eq!(sync.selection(), Some(Selection::Manual(RecordId::from("42"))));
        assert!(backend.calls().contains(&"GET /history/42".to_string()));
        assert_eq!(sync.history()[0].operation, Operation::Delete);
    }

    #[tokio::test]
    async fn search_rejects_blank_id() {
        let backend = Arc::new(FakeBackend::default());
        let sync = sync_with(&backend, ScriptedDialog::new());
        let outcome = sync.search_history_by_id("  ").await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Aborted(Notice::Validation(_))));
        assert!(backend.calls().is_empty());
        assert_eq!(sync.snapshot().history_phase(), HistoryPhase::NoSelection);
    }

    #[tokio::test]
    async fn missing_history_is_empty_list() {
        let backend = Arc::new(FakeBackend::default());
        let sync = sync_with(&backend, ScriptedDialog::new());
        let outcome = sync.search_history_by_id("7").await.unwrap();
        assert_eq!(outcome, ActionOutcome::Completed(HistoryOutcome::Applied(0)));
        assert!(sync.history().is_empty());
        assert_eq!(sync.snapshot().history_phase(), HistoryPhase::Selected);
    }

    #[tokio::test]
    async fn stale_history_is_dropped() {
        let backend = Arc::new(FakeBackend::default());
        backend
            .history
            .lock()
            .insert("1".into(), vec![entry(1, Operation::Add, "alice")]);
        backend.history.lock().insert(
            "2".into(),
            vec![entry(2, Operation::Add, "bob"), entry(3, Operation::Update, "bob")],
        );
        let release = backend.hold("1");
        let sync = Arc::new(sync_with(&backend, ScriptedDialog::new()));

        let slow = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.search_history_by_id("1").await })
        };
        // let the first request reach the gate
        while !backend.calls().contains(&"GET /history/1".to_string()) {
            tokio::task::yield_now().await;
        }
        assert_eq!(sync.snapshot().history_phase(), HistoryPhase::Loading);

        let fast = sync.search_history_by_id("2").await.unwrap();
        assert_eq!(fast, ActionOutcome::Completed(HistoryOutcome::Applied(2)));

        release.send(()).unwrap();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow, ActionOutcome::Completed(HistoryOutcome::Superseded));
        assert_eq!(sync.history().len(), 2);
        assert_eq!(sync.selection().unwrap().id(), &RecordId::from("2"));
    }

    #[tokio::test]
    async fn new_selection_clears_history_immediately() {
        let backend = Arc::new(FakeBackend::default());
        backend
            .history
            .lock()
            .insert("1".into(), vec![entry(1, Operation::Add, "alice")]);
        let sync = Arc::new(sync_with(&backend, ScriptedDialog::new()));
        sync.search_history_by_id("1").await.unwrap();
        assert_eq!(sync.history().len(), 1);

        let release = backend.hold("2");
        let pending = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.search_history_by_id("2").await })
        };
        while !backend.calls().contains(&"GET /history/2".to_string()) {
            tokio::task::yield_now().await;
        }
        assert!(sync.history().is_empty());

        release.send(()).unwrap();
        pending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn clear_selection_resets_panel() {
        let backend = Arc::new(FakeBackend::default());
        backend
            .history
            .lock()
            .insert("1".into(), vec![entry(1, Operation::Add, "alice")]);
        let sync = sync_with(&backend, ScriptedDialog::new());
        sync.search_history_by_id("1").await.unwrap();

        sync.clear_selection();
        let s = sync.snapshot();
        assert!(s.selection().is_none());
        assert!(s.history().is_empty());
        assert_eq!(s.history_phase(), HistoryPhase::NoSelection);
    }

    #[tokio::test]
    async fn verify_is_read_only() {
        let backend = Arc::new(FakeBackend::default());
        backend.seed(1, "doc1", "alice");
        let sync = sync_with(&backend, ScriptedDialog::new());
        let v = sync.verify_record(&RecordId::from(1u64)).await.unwrap();
        assert!(v.is_verified());
        assert_eq!(backend.calls(), vec!["GET /verify/1"]);
        assert!(sync.records().is_empty());
    }

    #[tokio::test]
    async fn backend_failure_is_recorded() {
        let backend = Arc::new(FakeBackend::default());
        *backend.down.lock() = true;
        let sync = sync_with(&backend, ScriptedDialog::new());

        let err = sync.load_records().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(sync.snapshot().last_error().is_some());
        assert_eq!(sync.snapshot().phase(), Phase::Idle);

        *backend.down.lock() = false;
        sync.load_records().await.unwrap();
        assert!(sync.snapshot().last_error().is_none());
    }

    #[tokio::test]
    async fn failed_add_keeps_draft() {
        let backend = Arc::new(FakeBackend::default());
        *backend.down.lock() = true;
        let sync = sync_with(&backend, ScriptedDialog::new());
        sync.set_draft("alice", "doc1");

        assert!(sync.submit_draft().await.is_err());
        assert_eq!(sync.snapshot().draft().user, "alice");
    }

    #[tokio::test]
    async fn reset_needs_confirmation() {
        let backend = Arc::new(FakeBackend::default());
        backend.seed(1, "doc1", "alice");
        let sync = sync_with(
            &backend,
            ScriptedDialog::new().then_confirm(false).then_confirm(true),
        );
        sync.search_history_by_id("1").await.unwrap();

        let declined = sync.reset_backend().await.unwrap();
        assert!(matches!(declined, ActionOutcome::Aborted(Notice::Cancelled(_))));
        assert!(!backend.calls().contains(&"DELETE /reset_db".to_string()));

        let done = sync.reset_backend().await.unwrap();
        assert!(done.is_completed());
        assert!(sync.selection().is_none());
        assert!(sync.records().is_empty());
    }
}
