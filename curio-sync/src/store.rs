//! Collaborator traits used by the job controller
//!
//! The controller never talks to HTTP or WebSocket directly; it is handed a
//! [`JobCapabilities`] set and works the same for every [`JobKind`].

use std::sync::Arc;

use async_trait::async_trait;
use curio_common::{AnalysisResult, CriterionState, JobCommand, ProjectCriterion};

use crate::error::{ChannelError, Result};

/// Criterion bindings of one job kind
#[async_trait]
pub trait CriterionStore: Send + Sync {
    async fn criteria_by_project(&self, project_id: &str) -> Result<Vec<ProjectCriterion>>;

    async fn update_state(&self, criteria_id: &str, state: CriterionState) -> Result<()>;

    async fn delete_criterion(&self, criteria_id: &str) -> Result<()>;

    /// Persist a new binding; returns it with the server-assigned id
    async fn save_criterion(&self, criterion: &ProjectCriterion) -> Result<ProjectCriterion>;
}

/// Analysis results of one job kind
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn results_by_project(&self, project_id: &str) -> Result<Vec<AnalysisResult>>;

    /// Delete every result produced for the binding `criteria_id`
    async fn delete_results_by_criterion(&self, criteria_id: &str) -> Result<()>;
}

/// Outbound half of a notification channel
#[async_trait]
pub trait CommandSender: Send + Sync {
    /// Fire-and-forget; no acknowledgement is awaited
    async fn send_command(&self, criteria_id: &str, command: JobCommand) -> std::result::Result<(), ChannelError>;
}

/// Everything a controller needs from the outside world
#[derive(Clone)]
pub struct JobCapabilities {
    pub criteria: Arc<dyn CriterionStore>,
    pub results: Arc<dyn ResultStore>,
    pub commands: Arc<dyn CommandSender>,
}

impl JobCapabilities {
    pub fn new(
        criteria: Arc<dyn CriterionStore>,
        results: Arc<dyn ResultStore>,
        commands: Arc<dyn CommandSender>,
    ) -> Self {
        Self {
            criteria,
            results,
            commands,
        }
    }
}
