//! Criterion binding and analysis-result models
//!
//! A [`ProjectCriterion`] binds a reusable rule definition to one project and
//! carries the run state of the analysis job for that binding. Its
//! [`CriterionState`] is the only input used to decide what the run control
//! offers next ([`RunAction`]); result emptiness never is.

use serde::{Deserialize, Serialize};

use crate::events::JobCommand;

/// Run state of a project criterion's analysis job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum CriterionState {
    /// Attached, never run (or results cleared)
    #[default]
    None,
    /// Job executing on the server
    Running,
    /// Job suspended by the user
    Paused,
    /// Server reported completion
    Complete,
    /// Job failed server-side
    Error,
}

impl CriterionState {
    /// All states, in declaration order
    pub const ALL: [CriterionState; 5] = [
        CriterionState::None,
        CriterionState::Running,
        CriterionState::Paused,
        CriterionState::Complete,
        CriterionState::Error,
    ];

    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CriterionState::None => "NONE",
            CriterionState::Running => "RUNNING",
            CriterionState::Paused => "PAUSED",
            CriterionState::Complete => "COMPLETE",
            CriterionState::Error => "ERROR",
        }
    }

    /// Apply an operation to this state
    ///
    /// Returns the next state and the command that must be sent to the server
    /// for the transition, or `None` when the operation is not valid from this
    /// state. Completion is authoritative and accepted from every state.
    pub fn transition(self, op: JobOperation) -> Option<(CriterionState, Option<JobCommand>)> {
        use CriterionState as S;
        match (self, op) {
            (S::None, JobOperation::Start) => Some((S::Running, Some(JobCommand::Start))),
            (S::Paused, JobOperation::Start) => Some((S::Running, Some(JobCommand::Resume))),
            (S::Running, JobOperation::Pause) => Some((S::Paused, Some(JobCommand::Pause))),
            (S::Complete, JobOperation::ClearResults) => Some((S::None, None)),
            (S::Error, JobOperation::Retry) => Some((S::None, None)),
            (_, JobOperation::Complete) => Some((S::Complete, None)),
            _ => None,
        }
    }

    /// Next state for `op`, ignoring the command
    pub fn apply(self, op: JobOperation) -> Option<CriterionState> {
        self.transition(op).map(|(next, _)| next)
    }
}

impl From<String> for CriterionState {
    /// Unknown wire values fall back to `None`
    fn from(value: String) -> Self {
        match value.as_str() {
            "RUNNING" => CriterionState::Running,
            "PAUSED" => CriterionState::Paused,
            "COMPLETE" => CriterionState::Complete,
            "ERROR" => CriterionState::Error,
            _ => CriterionState::None,
        }
    }
}

impl std::fmt::Display for CriterionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operations that move a criterion through its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOperation {
    /// Run from NONE, resume from PAUSED
    Start,
    /// Suspend a running job
    Pause,
    /// Drop a completed job's results
    ClearResults,
    /// Leave the ERROR state, dropping partial results
    Retry,
    /// Server-reported completion
    Complete,
}

impl JobOperation {
    pub const ALL: [JobOperation; 5] = [
        JobOperation::Start,
        JobOperation::Pause,
        JobOperation::ClearResults,
        JobOperation::Retry,
        JobOperation::Complete,
    ];
}

impl std::fmt::Display for JobOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOperation::Start => write!(f, "start"),
            JobOperation::Pause => write!(f, "pause"),
            JobOperation::ClearResults => write!(f, "clear-results"),
            JobOperation::Retry => write!(f, "retry"),
            JobOperation::Complete => write!(f, "complete"),
        }
    }
}

/// What the run control offers for a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    Run,
    Pause,
    ClearResults,
    Resume,
    Retry,
}

impl RunAction {
    /// The single state → action mapping
    pub fn for_state(state: CriterionState) -> Self {
        match state {
            CriterionState::None => RunAction::Run,
            CriterionState::Running => RunAction::Pause,
            CriterionState::Complete => RunAction::ClearResults,
            CriterionState::Paused => RunAction::Resume,
            CriterionState::Error => RunAction::Retry,
        }
    }

    /// Operation triggered by the control
    pub fn operation(&self) -> JobOperation {
        match self {
            RunAction::Run | RunAction::Resume => JobOperation::Start,
            RunAction::Pause => JobOperation::Pause,
            RunAction::ClearResults => JobOperation::ClearResults,
            RunAction::Retry => JobOperation::Retry,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunAction::Run => "Run",
            RunAction::Pause => "Pause",
            RunAction::ClearResults => "Clear results",
            RunAction::Resume => "Resume",
            RunAction::Retry => "Retry",
        }
    }
}

/// Evaluation type of a criterion binding
///
/// Serialized as the numeric criteria type used by the server
/// (0 = untyped/curation, 1 = pass, 2 = score, 3 = tagging).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(from = "u8", into = "u8")]
pub enum CriteriaKind {
    #[default]
    Untyped,
    Pass,
    Score,
    Tagging,
}

impl From<u8> for CriteriaKind {
    fn from(value: u8) -> Self {
        match value {
            1 => CriteriaKind::Pass,
            2 => CriteriaKind::Score,
            3 => CriteriaKind::Tagging,
            _ => CriteriaKind::Untyped,
        }
    }
}

impl From<CriteriaKind> for u8 {
    fn from(kind: CriteriaKind) -> Self {
        match kind {
            CriteriaKind::Untyped => 0,
            CriteriaKind::Pass => 1,
            CriteriaKind::Score => 2,
            CriteriaKind::Tagging => 3,
        }
    }
}

/// A criterion bound to a project, with its job state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCriterion {
    /// Binding id, stable for the binding's lifetime
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    /// Reusable rule definition id
    #[serde(rename = "criteriaId")]
    pub criterion_id: String,
    #[serde(rename = "criteriaName")]
    pub criterion_name: String,
    #[serde(rename = "type", default)]
    pub kind: CriteriaKind,
    #[serde(default)]
    pub state: CriterionState,
    /// Display colour, tagging bindings only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Target file, curation bindings only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_file_extension: Option<String>,
}

/// Project file a curation binding runs against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    pub project_file_id: String,
    /// File stem, without extension
    pub name: String,
    pub extension: String,
}

impl FileTarget {
    /// Split `file_name` at its first dot into stem and extension
    pub fn new(project_file_id: impl Into<String>, file_name: &str) -> Self {
        let (name, extension) = file_name.split_once('.').unwrap_or((file_name, ""));
        Self {
            project_file_id: project_file_id.into(),
            name: name.to_string(),
            extension: extension.to_string(),
        }
    }
}

impl ProjectCriterion {
    /// New binding in state NONE; the server assigns the id on save
    pub fn new(
        project_id: impl Into<String>,
        criterion_id: impl Into<String>,
        criterion_name: impl Into<String>,
        kind: CriteriaKind,
    ) -> Self {
        Self {
            id: String::new(),
            project_id: project_id.into(),
            criterion_id: criterion_id.into(),
            criterion_name: criterion_name.into(),
            kind,
            state: CriterionState::None,
            tag_color: None,
            created_at: None,
            project_file_id: None,
            upload_file_name: None,
            upload_file_extension: None,
        }
    }

    /// Bind to one project file
    pub fn with_file(mut self, file: &FileTarget) -> Self {
        self.project_file_id = Some(file.project_file_id.clone());
        self.upload_file_name = Some(file.name.clone());
        self.upload_file_extension = Some(file.extension.clone());
        self
    }

    /// Whether this binding already covers `criterion_id` on `file`
    ///
    /// Bindings without a file match on the rule definition alone.
    pub fn binds(&self, criterion_id: &str, file: Option<&FileTarget>) -> bool {
        if self.criterion_id != criterion_id {
            return false;
        }
        match file {
            Some(file) => {
                self.upload_file_name.as_deref() == Some(file.name.as_str())
                    && self.upload_file_extension.as_deref() == Some(file.extension.as_str())
            }
            None => self.upload_file_name.is_none(),
        }
    }

    /// Whether `result` belongs to this binding
    ///
    /// Evaluation results reference the rule definition, curation results
    /// reference the binding itself.
    pub fn owns(&self, result: &AnalysisResult) -> bool {
        result.criteria_id == self.id || result.criteria_id == self.criterion_id
    }

    pub fn run_action(&self) -> RunAction {
        RunAction::for_state(self.state)
    }
}

/// One output of a criterion's analysis job
///
/// Failure intervals, score samples, tag events and curation hits share this
/// shape; kind-specific fields are optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub id: String,
    #[serde(alias = "projectCriteriaId")]
    pub criteria_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_name: Option<String>,
    #[serde(alias = "failStartTime", default)]
    pub start_time: String,
    #[serde(alias = "failEndTime", default)]
    pub end_time: String,
    #[serde(alias = "failMessage", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_state_operation_pair_is_defined_or_noop() {
        for state in CriterionState::ALL {
            for op in JobOperation::ALL {
                // Must not panic; result is a next state or a no-op
                let next = state.apply(op);
                if let Some(next) = next {
                    assert!(CriterionState::ALL.contains(&next));
                }
            }
        }
    }

    #[test]
    fn test_start_from_complete_is_noop() {
        assert_eq!(CriterionState::Complete.apply(JobOperation::Start), None);
        assert_eq!(CriterionState::Running.apply(JobOperation::Start), None);
        assert_eq!(CriterionState::Error.apply(JobOperation::Start), None);
    }

    #[test]
    fn test_start_sends_start_or_resume() {
        assert_eq!(
            CriterionState::None.transition(JobOperation::Start),
            Some((CriterionState::Running, Some(JobCommand::Start)))
        );
        assert_eq!(
            CriterionState::Paused.transition(JobOperation::Start),
            Some((CriterionState::Running, Some(JobCommand::Resume)))
        );
        assert_eq!(
            CriterionState::Running.transition(JobOperation::Pause),
            Some((CriterionState::Paused, Some(JobCommand::Pause)))
        );
    }

    #[test]
    fn test_local_only_transitions_send_nothing() {
        assert_eq!(
            CriterionState::Complete.transition(JobOperation::ClearResults),
            Some((CriterionState::None, None))
        );
        assert_eq!(
            CriterionState::Error.transition(JobOperation::Retry),
            Some((CriterionState::None, None))
        );
        assert_eq!(CriterionState::Paused.apply(JobOperation::Retry), None);
    }

    #[test]
    fn test_completion_accepted_from_any_state() {
        for state in CriterionState::ALL {
            assert_eq!(state.apply(JobOperation::Complete), Some(CriterionState::Complete));
        }
    }

    #[test]
    fn test_run_action_follows_state_only() {
        assert_eq!(RunAction::for_state(CriterionState::None), RunAction::Run);
        assert_eq!(RunAction::for_state(CriterionState::Running), RunAction::Pause);
        assert_eq!(RunAction::for_state(CriterionState::Complete), RunAction::ClearResults);
        assert_eq!(RunAction::for_state(CriterionState::Paused), RunAction::Resume);
        assert_eq!(RunAction::for_state(CriterionState::Error), RunAction::Retry);

        // Every offered action is valid from the state that offers it
        for state in CriterionState::ALL {
            let op = RunAction::for_state(state).operation();
            assert!(state.apply(op).is_some(), "{} offers invalid {}", state, op);
        }
    }

    #[test]
    fn test_unknown_state_decodes_as_none() {
        let state: CriterionState = serde_json::from_str("\"SOMETHING\"").unwrap();
        assert_eq!(state, CriterionState::None);
        let state: CriterionState = serde_json::from_str("\"PAUSED\"").unwrap();
        assert_eq!(state, CriterionState::Paused);
        assert_eq!(serde_json::to_string(&CriterionState::Complete).unwrap(), "\"COMPLETE\"");
    }

    #[test]
    fn test_project_criterion_wire_shape() {
        let json = r##"{
            "id": "pc-1",
            "createdAt": "2025-03-01T10:00:00",
            "projectId": "p-1",
            "criteriaId": "c-9",
            "criteriaName": "hard braking",
            "type": 3,
            "state": "RUNNING",
            "tagColor": "#ff0000"
        }"##;
        let pc: ProjectCriterion = serde_json::from_str(json).unwrap();
        assert_eq!(pc.kind, CriteriaKind::Tagging);
        assert_eq!(pc.state, CriterionState::Running);
        assert_eq!(pc.tag_color.as_deref(), Some("#ff0000"));
        assert_eq!(pc.run_action(), RunAction::Pause);

        let back = serde_json::to_value(&pc).unwrap();
        assert_eq!(back["criteriaId"], "c-9");
        assert_eq!(back["type"], 3);
    }

    #[test]
    fn test_curation_binding_without_type() {
        let json = r#"{"id":"pc-2","projectId":"p","criteriaId":"c","criteriaName":"n","state":"NONE","uploadFileName":"drive.csv"}"#;
        let pc: ProjectCriterion = serde_json::from_str(json).unwrap();
        assert_eq!(pc.kind, CriteriaKind::Untyped);
        assert!(pc.tag_color.is_none());
        assert_eq!(pc.upload_file_name.as_deref(), Some("drive.csv"));
    }

    #[test]
    fn test_curation_file_fields_survive_round_trip() {
        let json = r#"{"id":"pc-3","projectId":"p","criteriaId":"c","criteriaName":"n","state":"RUNNING","projectFileId":"pf-1","uploadFileName":"drive","uploadFileExtension":"csv"}"#;
        let pc: ProjectCriterion = serde_json::from_str(json).unwrap();
        assert_eq!(pc.project_file_id.as_deref(), Some("pf-1"));

        let back = serde_json::to_value(&pc).unwrap();
        assert_eq!(back["projectFileId"], "pf-1");
        assert_eq!(back["uploadFileName"], "drive");
        assert_eq!(back["uploadFileExtension"], "csv");

        // Evaluation bindings carry none of them
        let plain = serde_json::to_value(ProjectCriterion::new("p", "c", "n", CriteriaKind::Pass)).unwrap();
        assert!(plain.get("projectFileId").is_none());
        assert!(plain.get("uploadFileName").is_none());
    }

    #[test]
    fn test_binds_matches_rule_and_file() {
        let drive = FileTarget::new("pf-1", "drive.csv");
        assert_eq!(drive.name, "drive");
        assert_eq!(drive.extension, "csv");

        let on_drive = ProjectCriterion::new("p", "c", "n", CriteriaKind::Untyped).with_file(&drive);
        assert!(on_drive.binds("c", Some(&drive)));
        assert!(!on_drive.binds("c", Some(&FileTarget::new("pf-2", "lap.csv"))));
        assert!(!on_drive.binds("other", Some(&drive)));
        assert!(!on_drive.binds("c", None));

        let plain = ProjectCriterion::new("p", "c", "n", CriteriaKind::Pass);
        assert!(plain.binds("c", None));
    }

    #[test]
    fn test_result_ownership_by_binding_or_definition() {
        let mut pc = ProjectCriterion::new("p", "def-1", "speeding", CriteriaKind::Pass);
        pc.id = "pc-1".to_string();

        let pass: AnalysisResult = serde_json::from_str(
            r#"{"id":"r1","criteriaId":"def-1","failStartTime":"1.0","failEndTime":"2.0","failMessage":"over limit"}"#,
        )
        .unwrap();
        let curation: AnalysisResult = serde_json::from_str(
            r#"{"id":"r2","projectCriteriaId":"pc-1","startTime":"0","endTime":"5"}"#,
        )
        .unwrap();
        let other: AnalysisResult =
            serde_json::from_str(r#"{"id":"r3","criteriaId":"def-2","startTime":"0","endTime":"1"}"#).unwrap();

        assert!(pc.owns(&pass));
        assert_eq!(pass.message.as_deref(), Some("over limit"));
        assert!(pc.owns(&curation));
        assert!(!pc.owns(&other));
    }
}
