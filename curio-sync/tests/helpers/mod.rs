//! In-memory collaborators for controller and surface tests
//!
//! The stores behave like a tiny server: state updates are persisted and show
//! up in the next fetch, result deletes remove rows.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use curio_common::{AnalysisResult, CriteriaKind, CriterionState, EventBus, JobCommand, JobKind, ProjectCriterion};
use curio_sync::{
    ChannelError, CommandSender, CriteriaJobController, CriterionStore, JobCapabilities, ResultStore, SyncError,
};
use tokio::sync::Notify;

pub const PROJECT: &str = "p1";

pub fn criterion(id: &str, state: CriterionState) -> ProjectCriterion {
    let mut c = ProjectCriterion::new(PROJECT, format!("def-{}", id), format!("Rule {}", id), CriteriaKind::Pass);
    c.id = id.to_string();
    c.state = state;
    c
}

pub fn result(id: &str, criteria_id: &str) -> AnalysisResult {
    AnalysisResult {
        id: id.to_string(),
        criteria_id: criteria_id.to_string(),
        criteria_name: None,
        start_time: "0".to_string(),
        end_time: "1".to_string(),
        message: None,
        score: None,
        color: None,
    }
}

fn unavailable() -> SyncError {
    SyncError::Store {
        status: 503,
        message: "unavailable".to_string(),
    }
}

#[derive(Default)]
pub struct FakeCriteria {
    pub rows: Mutex<Vec<ProjectCriterion>>,
    pub fetches: AtomicUsize,
    pub fail_fetch: AtomicBool,
    pub fail_update: AtomicBool,
    pub updates: Mutex<Vec<(String, CriterionState)>>,
    pub deleted: Mutex<Vec<String>>,
    /// Bodies received by `save_criterion`, before an id is assigned
    pub saved: Mutex<Vec<ProjectCriterion>>,
}

impl FakeCriteria {
    pub fn with(rows: Vec<ProjectCriterion>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            ..Default::default()
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> Vec<(String, CriterionState)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn saved(&self) -> Vec<ProjectCriterion> {
        self.saved.lock().unwrap().clone()
    }

    pub fn remove(&self, id: &str) {
        self.rows.lock().unwrap().retain(|c| c.id != id);
    }

    /// Server-side state change not yet seen by the client
    pub fn set_state(&self, id: &str, state: CriterionState) {
        if let Some(row) = self.rows.lock().unwrap().iter_mut().find(|c| c.id == id) {
            row.state = state;
        }
    }
}

#[async_trait]
impl CriterionStore for FakeCriteria {
    async fn criteria_by_project(&self, project_id: &str) -> curio_sync::Result<Vec<ProjectCriterion>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn update_state(&self, criteria_id: &str, state: CriterionState) -> curio_sync::Result<()> {
        self.updates.lock().unwrap().push((criteria_id.to_string(), state));
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.set_state(criteria_id, state);
        Ok(())
    }

    async fn delete_criterion(&self, criteria_id: &str) -> curio_sync::Result<()> {
        self.deleted.lock().unwrap().push(criteria_id.to_string());
        self.rows.lock().unwrap().retain(|c| c.id != criteria_id);
        Ok(())
    }

    async fn save_criterion(&self, criterion: &ProjectCriterion) -> curio_sync::Result<ProjectCriterion> {
        self.saved.lock().unwrap().push(criterion.clone());
        let mut rows = self.rows.lock().unwrap();
        let mut saved = criterion.clone();
        saved.id = format!("pc-{}", rows.len() + 1);
        rows.push(saved.clone());
        Ok(saved)
    }
}

#[derive(Default)]
pub struct FakeResults {
    pub rows: Mutex<Vec<AnalysisResult>>,
    pub fetches: AtomicUsize,
    pub fail_fetch: AtomicBool,
    pub fail_delete: AtomicBool,
    pub deleted_for: Mutex<Vec<String>>,
}

impl FakeResults {
    pub fn with(rows: Vec<AnalysisResult>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            ..Default::default()
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn deleted_for(&self) -> Vec<String> {
        self.deleted_for.lock().unwrap().clone()
    }

    pub fn push(&self, row: AnalysisResult) {
        self.rows.lock().unwrap().push(row);
    }
}

#[async_trait]
impl ResultStore for FakeResults {
    async fn results_by_project(&self, _project_id: &str) -> curio_sync::Result<Vec<AnalysisResult>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn delete_results_by_criterion(&self, criteria_id: &str) -> curio_sync::Result<()> {
        self.deleted_for.lock().unwrap().push(criteria_id.to_string());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.rows.lock().unwrap().retain(|r| r.criteria_id != criteria_id);
        Ok(())
    }
}

/// Records outbound commands; can fail or hold each send until released
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(String, JobCommand)>>,
    pub fail: AtomicBool,
    /// When set, each send waits on `release` after signalling `entered`
    pub gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated(entered: Arc<Notify>, release: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some((entered, release)),
            ..Default::default()
        })
    }

    pub fn sent(&self) -> Vec<(String, JobCommand)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandSender for RecordingSender {
    async fn send_command(&self, criteria_id: &str, command: JobCommand) -> Result<(), ChannelError> {
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.sent.lock().unwrap().push((criteria_id.to_string(), command));
        Ok(())
    }
}

/// Controller wired to fakes, with handles kept for assertions
pub struct Fixture {
    pub controller: Arc<CriteriaJobController>,
    pub criteria: Arc<FakeCriteria>,
    pub results: Arc<FakeResults>,
    pub sender: Arc<RecordingSender>,
    pub events: EventBus,
}

impl Fixture {
    /// Fixture with the snapshot already loaded
    pub async fn loaded(rows: Vec<ProjectCriterion>, results: Vec<AnalysisResult>) -> Self {
        Self::loaded_with_sender(rows, results, RecordingSender::new()).await
    }

    pub async fn loaded_with_sender(
        rows: Vec<ProjectCriterion>,
        results: Vec<AnalysisResult>,
        sender: Arc<RecordingSender>,
    ) -> Self {
        let fx = Self::unloaded(JobKind::PassEval, rows, results, sender);
        fx.controller.refresh().await.unwrap();

        // Count only what happens after the initial load
        fx.criteria.fetches.store(0, Ordering::SeqCst);
        fx.results.fetches.store(0, Ordering::SeqCst);
        fx
    }

    /// Fixture for any kind, nothing fetched yet
    pub fn unloaded(
        kind: JobKind,
        rows: Vec<ProjectCriterion>,
        results: Vec<AnalysisResult>,
        sender: Arc<RecordingSender>,
    ) -> Self {
        let criteria = FakeCriteria::with(rows);
        let results = FakeResults::with(results);
        let events = EventBus::new(64);
        let caps = JobCapabilities::new(criteria.clone(), results.clone(), sender.clone());
        let controller = Arc::new(CriteriaJobController::new(kind, PROJECT, caps, events.clone()));
        Self {
            controller,
            criteria,
            results,
            sender,
            events,
        }
    }
}
