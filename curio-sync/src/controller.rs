//! Criteria job controller
//!
//! Owns the run state of every criterion bound to one project for one
//! [`JobKind`]. User intent is applied optimistically: the local state changes
//! synchronously, before the command is sent or the new state persisted.
//! Server pushes are the only authoritative input; each one triggers a full
//! refetch that replaces the snapshot (reconciliation, not patching).
//!
//! The snapshot sits behind a short-held `std::sync::RwLock` that is never
//! held across an `.await`.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use curio_common::{
    AnalysisResult, CriterionState, CurioEvent, EventBus, FileTarget, JobCommand, JobKind, JobOperation,
    ProjectCriterion, PushEvent, PushSignal, RunAction,
};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::store::JobCapabilities;

/// Outcome of a user operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied {
        criteria_id: String,
        from: CriterionState,
        to: CriterionState,
        command: Option<JobCommand>,
    },
    /// Not valid from the current state; nothing was sent or persisted
    Ignored {
        criteria_id: String,
        state: CriterionState,
        operation: JobOperation,
    },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }

    pub fn criteria_id(&self) -> &str {
        match self {
            Transition::Applied { criteria_id, .. } | Transition::Ignored { criteria_id, .. } => criteria_id,
        }
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    criteria: Vec<ProjectCriterion>,
    results: Vec<AnalysisResult>,
}

impl Snapshot {
    fn find(&self, criteria_id: &str) -> Option<&ProjectCriterion> {
        self.criteria.iter().find(|c| c.id == criteria_id)
    }

    fn find_mut(&mut self, criteria_id: &str) -> Option<&mut ProjectCriterion> {
        self.criteria.iter_mut().find(|c| c.id == criteria_id)
    }
}

pub struct CriteriaJobController {
    kind: JobKind,
    project_id: String,
    caps: JobCapabilities,
    snapshot: RwLock<Snapshot>,
    events: EventBus,
}

impl CriteriaJobController {
    /// Controller with an empty snapshot; call [`refresh`](Self::refresh) to load it
    pub fn new(kind: JobKind, project_id: impl Into<String>, caps: JobCapabilities, events: EventBus) -> Self {
        Self {
            kind,
            project_id: project_id.into(),
            caps,
            snapshot: RwLock::new(Snapshot::default()),
            events,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- snapshot accessors ----

    pub fn criteria(&self) -> Vec<ProjectCriterion> {
        self.read().criteria.clone()
    }

    pub fn results(&self) -> Vec<AnalysisResult> {
        self.read().results.clone()
    }

    pub fn state_of(&self, criteria_id: &str) -> Option<CriterionState> {
        self.read().find(criteria_id).map(|c| c.state)
    }

    /// Results belonging to one binding
    pub fn results_for(&self, criteria_id: &str) -> Vec<AnalysisResult> {
        let snapshot = self.read();
        match snapshot.find(criteria_id) {
            Some(criterion) => snapshot
                .results
                .iter()
                .filter(|r| criterion.owns(r))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn run_action(&self, criteria_id: &str) -> Option<RunAction> {
        self.read().find(criteria_id).map(|c| c.run_action())
    }

    // ---- user operations ----

    /// Run from NONE (START) or resume from PAUSED (RESUME)
    pub async fn start(&self, criteria_id: &str) -> Result<Transition> {
        self.command_transition(criteria_id, JobOperation::Start).await
    }

    pub async fn pause(&self, criteria_id: &str) -> Result<Transition> {
        self.command_transition(criteria_id, JobOperation::Pause).await
    }

    /// Delete a completed criterion's results and return it to NONE
    ///
    /// If the delete fails the state stays COMPLETE and the error is returned.
    pub async fn clear_results(&self, criteria_id: &str) -> Result<Transition> {
        self.reset_transition(criteria_id, JobOperation::ClearResults).await
    }

    /// Drop a failed criterion's partial results and return it to NONE
    pub async fn retry(&self, criteria_id: &str) -> Result<Transition> {
        self.reset_transition(criteria_id, JobOperation::Retry).await
    }

    /// Start every criterion that is NONE or PAUSED
    pub async fn run_all(&self) -> Result<Vec<Transition>> {
        let startable: Vec<String> = self
            .read()
            .criteria
            .iter()
            .filter(|c| matches!(c.state, CriterionState::None | CriterionState::Paused))
            .map(|c| c.id.clone())
            .collect();

        let mut applied = Vec::with_capacity(startable.len());
        for criteria_id in startable {
            match self.start(&criteria_id).await {
                Ok(transition) if transition.is_applied() => applied.push(transition),
                Ok(_) => {}
                Err(e) => warn!(kind = %self.kind, criteria_id = %criteria_id, "Run all skipped criterion: {}", e),
            }
        }
        info!(kind = %self.kind, started = applied.len(), "Run all");
        Ok(applied)
    }

    /// Bind a rule definition to the project in state NONE
    ///
    /// Curation bindings are per file and need `file`. Binding a rule that is
    /// already bound (to the same file) returns the existing binding.
    pub async fn attach(
        &self,
        criterion_id: &str,
        criterion_name: &str,
        tag_color: Option<String>,
        file: Option<&FileTarget>,
    ) -> Result<ProjectCriterion> {
        if self.kind == JobKind::Curation && file.is_none() {
            return Err(SyncError::InvalidState(format!(
                "curation criterion {} needs a target file",
                criterion_id
            )));
        }

        let existing = self
            .read()
            .criteria
            .iter()
            .find(|c| c.binds(criterion_id, file))
            .cloned();
        if let Some(existing) = existing {
            debug!(kind = %self.kind, criteria_id = %existing.id, criterion = %criterion_id, "Criterion already attached");
            return Ok(existing);
        }

        let mut criterion =
            ProjectCriterion::new(&self.project_id, criterion_id, criterion_name, self.kind.criteria_kind());
        criterion.tag_color = tag_color;
        if let Some(file) = file {
            criterion = criterion.with_file(file);
        }

        let saved = self.caps.criteria.save_criterion(&criterion).await?;
        info!(kind = %self.kind, criteria_id = %saved.id, criterion = %criterion_id, "Criterion attached");

        let mut snapshot = self.write();
        snapshot.criteria.retain(|c| c.id != saved.id);
        snapshot.criteria.push(saved.clone());
        Ok(saved)
    }

    /// Unbind a criterion and delete its results; refused while RUNNING
    pub async fn detach(&self, criteria_id: &str) -> Result<()> {
        let state = self.require_state(criteria_id)?;
        if state == CriterionState::Running {
            return Err(SyncError::InvalidState(format!(
                "criterion {} is running; pause it before detaching",
                criteria_id
            )));
        }

        self.caps.results.delete_results_by_criterion(criteria_id).await?;
        self.caps.criteria.delete_criterion(criteria_id).await?;

        let mut snapshot = self.write();
        if let Some(pos) = snapshot.criteria.iter().position(|c| c.id == criteria_id) {
            let removed = snapshot.criteria.remove(pos);
            snapshot.results.retain(|r| !removed.owns(r));
        }
        info!(kind = %self.kind, criteria_id = %criteria_id, "Criterion detached");
        Ok(())
    }

    // ---- authoritative input ----

    /// Apply a server push
    ///
    /// Progress triggers a refetch; completion marks the criterion COMPLETE,
    /// persists it, then refetches. Events for another kind are ignored.
    pub async fn handle_push_event(&self, event: &PushEvent) -> Result<()> {
        if event.kind != self.kind {
            debug!(kind = %self.kind, event_kind = %event.kind, "Ignoring push event for another kind");
            return Ok(());
        }

        // The server record is updated even when the binding is not loaded
        // locally; otherwise the refetch would bring RUNNING back
        if let PushSignal::Completed { criteria_id } = &event.signal {
            if self.apply_local(criteria_id, JobOperation::Complete, true).is_none() {
                debug!(criteria_id = %criteria_id, "Completion for criterion not in snapshot");
            }
            self.persist(criteria_id, CriterionState::Complete).await;
        }

        self.refresh().await
    }

    /// Refetch criteria and results together and replace the snapshot
    ///
    /// On failure the previous snapshot is kept.
    pub async fn refresh(&self) -> Result<()> {
        let fetched = tokio::try_join!(
            self.caps.criteria.criteria_by_project(&self.project_id),
            self.caps.results.results_by_project(&self.project_id),
        );

        match fetched {
            Ok((criteria, results)) => {
                let (criteria_count, result_count) = (criteria.len(), results.len());
                {
                    let mut snapshot = self.write();
                    snapshot.criteria = criteria;
                    snapshot.results = results;
                }
                debug!(kind = %self.kind, criteria_count, result_count, "Snapshot reconciled");
                self.events.emit_lossy(CurioEvent::SnapshotReconciled {
                    kind: self.kind,
                    project_id: self.project_id.clone(),
                    criteria_count,
                    result_count,
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(kind = %self.kind, project_id = %self.project_id, "Refetch failed, keeping snapshot: {}", e);
                self.events.emit_lossy(CurioEvent::ReconcileFailed {
                    kind: self.kind,
                    project_id: self.project_id.clone(),
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    // ---- internals ----

    fn require_state(&self, criteria_id: &str) -> Result<CriterionState> {
        self.state_of(criteria_id)
            .ok_or_else(|| SyncError::NotFound(criteria_id.to_string()))
    }

    /// Check and apply `op` under one write lock
    ///
    /// Returns `(from, to, command)` when applied, `None` when the operation is
    /// a no-op from the current state or the criterion is unknown.
    fn apply_local(
        &self,
        criteria_id: &str,
        op: JobOperation,
        authoritative: bool,
    ) -> Option<(CriterionState, CriterionState, Option<JobCommand>)> {
        let (from, to, command) = {
            let mut snapshot = self.write();
            let criterion = snapshot.find_mut(criteria_id)?;
            let from = criterion.state;
            let (to, command) = from.transition(op)?;
            criterion.state = to;
            (from, to, command)
        };

        debug!(kind = %self.kind, criteria_id = %criteria_id, %from, %to, %op, "State changed");
        self.events.emit_lossy(CurioEvent::CriterionStateChanged {
            kind: self.kind,
            criteria_id: criteria_id.to_string(),
            old_state: from,
            new_state: to,
            authoritative,
            timestamp: Utc::now(),
        });
        Some((from, to, command))
    }

    fn ignored(&self, criteria_id: &str, state: CriterionState, operation: JobOperation) -> Transition {
        debug!(kind = %self.kind, criteria_id = %criteria_id, %state, %operation, "Operation ignored in current state");
        Transition::Ignored {
            criteria_id: criteria_id.to_string(),
            state,
            operation,
        }
    }

    async fn command_transition(&self, criteria_id: &str, op: JobOperation) -> Result<Transition> {
        let state = self.require_state(criteria_id)?;
        let Some((from, to, command)) = self.apply_local(criteria_id, op, false) else {
            return Ok(self.ignored(criteria_id, state, op));
        };

        if let Some(command) = command {
            if let Err(e) = self.caps.commands.send_command(criteria_id, command).await {
                warn!(kind = %self.kind, criteria_id = %criteria_id, %command, "Command dropped: {}", e);
                self.events.emit_lossy(CurioEvent::CommandDropped {
                    kind: self.kind,
                    criteria_id: criteria_id.to_string(),
                    command,
                    timestamp: Utc::now(),
                });
            }
        }
        self.persist(criteria_id, to).await;

        Ok(Transition::Applied {
            criteria_id: criteria_id.to_string(),
            from,
            to,
            command,
        })
    }

    async fn reset_transition(&self, criteria_id: &str, op: JobOperation) -> Result<Transition> {
        let state = self.require_state(criteria_id)?;
        if state.apply(op).is_none() {
            return Ok(self.ignored(criteria_id, state, op));
        }

        self.caps.results.delete_results_by_criterion(criteria_id).await?;

        {
            let mut snapshot = self.write();
            let owner = snapshot.find(criteria_id).cloned();
            if let Some(criterion) = owner {
                snapshot.results.retain(|r| !criterion.owns(r));
            }
        }

        // A push may have moved the state while the delete was in flight
        let Some((from, to, _)) = self.apply_local(criteria_id, op, false) else {
            let current = self.state_of(criteria_id).unwrap_or(state);
            return Ok(self.ignored(criteria_id, current, op));
        };
        self.persist(criteria_id, to).await;

        Ok(Transition::Applied {
            criteria_id: criteria_id.to_string(),
            from,
            to,
            command: None,
        })
    }

    async fn persist(&self, criteria_id: &str, state: CriterionState) {
        if let Err(e) = self.caps.criteria.update_state(criteria_id, state).await {
            warn!(kind = %self.kind, criteria_id = %criteria_id, %state, "Failed to persist state: {}", e);
        }
    }
}
