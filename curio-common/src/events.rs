//! Job commands, push events and the in-process event bus
//!
//! Server pushes arrive as flat JSON objects keyed by a `message` string. They
//! are decoded exactly once, at the channel boundary, into [`PushEvent`]; from
//! there on every consumer matches on [`JobKind`] and [`PushSignal`].
//!
//! Local state changes are published on an [`EventBus`] so that views and
//! the CLI can follow a controller without polling it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::criteria::{CriteriaKind, CriterionState};
use crate::Result;

/// Command sent to the server for a criterion's job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobCommand {
    Start,
    Pause,
    Resume,
}

impl std::fmt::Display for JobCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobCommand::Start => write!(f, "START"),
            JobCommand::Pause => write!(f, "PAUSE"),
            JobCommand::Resume => write!(f, "RESUME"),
        }
    }
}

/// Outbound command frame: `{"command": "...", "projectCriteriaId": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCommand {
    pub command: JobCommand,
    pub project_criteria_id: String,
}

impl OutboundCommand {
    pub fn new(project_criteria_id: impl Into<String>, command: JobCommand) -> Self {
        Self {
            command,
            project_criteria_id: project_criteria_id.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Family of analysis jobs
///
/// The four families differ only in the message vocabulary they push and the
/// stores backing them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    PassEval,
    ScoreEval,
    Tagging,
    Curation,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::PassEval,
        JobKind::ScoreEval,
        JobKind::Tagging,
        JobKind::Curation,
    ];

    /// Message prefix shared by this kind's push messages
    pub fn message_prefix(&self) -> &'static str {
        match self {
            JobKind::PassEval => "PASS_EVAL",
            JobKind::ScoreEval => "SCORE_EVAL",
            JobKind::Tagging => "TAGGING",
            JobKind::Curation => "CURATION",
        }
    }

    /// `NEW_<KIND>_RESULT`
    pub fn progress_message(&self) -> String {
        format!("NEW_{}_RESULT", self.message_prefix())
    }

    /// `<KIND>_COMPLETED`
    pub fn completed_message(&self) -> String {
        format!("{}_COMPLETED", self.message_prefix())
    }

    /// Surface that hosts jobs of this kind
    pub fn surface(&self) -> SurfaceKind {
        match self {
            JobKind::Curation => SurfaceKind::Curation,
            _ => SurfaceKind::Evaluation,
        }
    }

    /// `type` carried by bindings of this kind
    pub fn criteria_kind(&self) -> CriteriaKind {
        match self {
            JobKind::PassEval => CriteriaKind::Pass,
            JobKind::ScoreEval => CriteriaKind::Score,
            JobKind::Tagging => CriteriaKind::Tagging,
            JobKind::Curation => CriteriaKind::Untyped,
        }
    }

    /// Classify a `message` value
    fn classify(message: &str) -> Option<(JobKind, bool)> {
        JobKind::ALL.into_iter().find_map(|kind| {
            let prefix = kind.message_prefix();
            if let Some(rest) = message.strip_prefix("NEW_") {
                if rest.strip_prefix(prefix) == Some("_RESULT") {
                    return Some((kind, false));
                }
            }
            match message.strip_prefix(prefix) {
                Some("_COMPLETED") => Some((kind, true)),
                _ => None,
            }
        })
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::PassEval => write!(f, "pass-eval"),
            JobKind::ScoreEval => write!(f, "score-eval"),
            JobKind::Tagging => write!(f, "tagging"),
            JobKind::Curation => write!(f, "curation"),
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pass-eval" | "pass" => Ok(JobKind::PassEval),
            "score-eval" | "score" => Ok(JobKind::ScoreEval),
            "tagging" => Ok(JobKind::Tagging),
            "curation" => Ok(JobKind::Curation),
            other => Err(crate::Error::InvalidInput(format!("unknown job kind: {}", other))),
        }
    }
}

/// Analysis surface owning one notification channel per user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    /// Pass / score / tagging dashboard
    Evaluation,
    /// Dataset curation dashboard
    Curation,
}

impl SurfaceKind {
    /// Path segment of the surface's channel endpoint (`/ws/<segment>`)
    pub fn channel_segment(&self) -> &'static str {
        match self {
            SurfaceKind::Evaluation => "analysis",
            SurfaceKind::Curation => "curation",
        }
    }

    /// Job kinds hosted on this surface
    pub fn job_kinds(&self) -> &'static [JobKind] {
        match self {
            SurfaceKind::Evaluation => &[JobKind::PassEval, JobKind::ScoreEval, JobKind::Tagging],
            SurfaceKind::Curation => &[JobKind::Curation],
        }
    }
}

impl std::fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceKind::Evaluation => write!(f, "evaluation"),
            SurfaceKind::Curation => write!(f, "curation"),
        }
    }
}

impl std::str::FromStr for SurfaceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "evaluation" | "analysis" => Ok(SurfaceKind::Evaluation),
            "curation" => Ok(SurfaceKind::Curation),
            other => Err(crate::Error::InvalidInput(format!("unknown surface: {}", other))),
        }
    }
}

/// What a push event says about a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushSignal {
    /// New results were stored for some criterion of the kind
    Progress,
    /// The job of `criteria_id` finished
    Completed { criteria_id: String },
}

/// Decoded server push
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub kind: JobKind,
    pub signal: PushSignal,
    /// Fields of the frame other than `message` and `projectCriteriaId`
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPushFrame {
    message: String,
    #[serde(default)]
    project_criteria_id: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl PushEvent {
    pub fn progress(kind: JobKind) -> Self {
        Self {
            kind,
            signal: PushSignal::Progress,
            extra: serde_json::Map::new(),
            received_at: Utc::now(),
        }
    }

    pub fn completed(kind: JobKind, criteria_id: impl Into<String>) -> Self {
        Self {
            kind,
            signal: PushSignal::Completed {
                criteria_id: criteria_id.into(),
            },
            extra: serde_json::Map::new(),
            received_at: Utc::now(),
        }
    }

    /// Decode one inbound text frame
    ///
    /// Returns `Ok(None)` for frames outside the known vocabulary and for
    /// completions that do not name a criterion; `Err` only for frames that
    /// are not a JSON object with a `message` field.
    pub fn decode(text: &str) -> Result<Option<PushEvent>> {
        let frame: RawPushFrame = serde_json::from_str(text)?;

        let Some((kind, completed)) = JobKind::classify(&frame.message) else {
            debug!(message = %frame.message, "Ignoring unrecognized push message");
            return Ok(None);
        };

        let signal = if completed {
            match frame.project_criteria_id {
                Some(criteria_id) if !criteria_id.is_empty() => PushSignal::Completed { criteria_id },
                _ => {
                    debug!(message = %frame.message, "Completion without projectCriteriaId, ignoring");
                    return Ok(None);
                }
            }
        } else {
            PushSignal::Progress
        };

        Ok(Some(PushEvent {
            kind,
            signal,
            extra: frame.extra,
            received_at: Utc::now(),
        }))
    }
}

/// Local state-change notifications published by controllers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CurioEvent {
    /// A criterion's state changed locally (optimistic or authoritative)
    CriterionStateChanged {
        kind: JobKind,
        criteria_id: String,
        old_state: CriterionState,
        new_state: CriterionState,
        /// True when caused by a server push rather than a user action
        authoritative: bool,
        timestamp: DateTime<Utc>,
    },

    /// Snapshot replaced by a successful refetch
    SnapshotReconciled {
        kind: JobKind,
        project_id: String,
        criteria_count: usize,
        result_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Refetch failed; previous snapshot kept
    ReconcileFailed {
        kind: JobKind,
        project_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Command could not be sent (channel closed)
    CommandDropped {
        kind: JobKind,
        criteria_id: String,
        command: JobCommand,
        timestamp: DateTime<Utc>,
    },
}

impl CurioEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            CurioEvent::CriterionStateChanged { .. } => "CriterionStateChanged",
            CurioEvent::SnapshotReconciled { .. } => "SnapshotReconciled",
            CurioEvent::ReconcileFailed { .. } => "ReconcileFailed",
            CurioEvent::CommandDropped { .. } => "CommandDropped",
        }
    }
}

/// Central event distribution bus
///
/// Uses `tokio::broadcast` internally: publishing never blocks on slow
/// subscribers, and lagging subscribers observe `RecvError::Lagged`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CurioEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CurioEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: CurioEvent) -> std::result::Result<usize, broadcast::error::SendError<CurioEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CurioEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_command_wire_shape() {
        let json = OutboundCommand::new("pc-7", JobCommand::Resume).to_json().unwrap();
        assert_eq!(json, r#"{"command":"RESUME","projectCriteriaId":"pc-7"}"#);
    }

    #[test]
    fn test_decode_every_known_message() {
        for kind in JobKind::ALL {
            let progress = format!(r#"{{"message":"{}"}}"#, kind.progress_message());
            let event = PushEvent::decode(&progress).unwrap().expect("progress should decode");
            assert_eq!(event.kind, kind);
            assert_eq!(event.signal, PushSignal::Progress);

            let done = format!(
                r#"{{"message":"{}","projectCriteriaId":"pc-1"}}"#,
                kind.completed_message()
            );
            let event = PushEvent::decode(&done).unwrap().expect("completion should decode");
            assert_eq!(event.kind, kind);
            assert_eq!(
                event.signal,
                PushSignal::Completed {
                    criteria_id: "pc-1".to_string()
                }
            );
        }
    }

    #[test]
    fn test_decode_literal_vocabulary() {
        let event = PushEvent::decode(r#"{"message":"PASS_EVAL_COMPLETED","projectCriteriaId":"c1"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, JobKind::PassEval);

        let event = PushEvent::decode(r#"{"message":"NEW_TAGGING_RESULT","count":3}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, JobKind::Tagging);
        assert_eq!(event.extra["count"], 3);
    }

    #[test]
    fn test_decode_ignores_unknown_and_incomplete() {
        assert!(PushEvent::decode(r#"{"message":"HELLO"}"#).unwrap().is_none());
        assert!(PushEvent::decode(r#"{"message":"NEW_PASS_EVAL_RESULTS"}"#).unwrap().is_none());
        assert!(PushEvent::decode(r#"{"message":"SCORE_EVAL_COMPLETED"}"#).unwrap().is_none());
        assert!(PushEvent::decode(r#"{"message":"CURATION_COMPLETED","projectCriteriaId":""}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_rejects_non_frames() {
        assert!(PushEvent::decode("not json").is_err());
        assert!(PushEvent::decode(r#"{"projectCriteriaId":"x"}"#).is_err());
    }

    #[test]
    fn test_surface_hosts_kinds() {
        for kind in JobKind::ALL {
            assert!(kind.surface().job_kinds().contains(&kind));
        }
        assert_eq!(SurfaceKind::Evaluation.channel_segment(), "analysis");
        assert_eq!("curation".parse::<SurfaceKind>().unwrap(), SurfaceKind::Curation);
        assert!("storage".parse::<SurfaceKind>().is_err());

        for kind in JobKind::ALL {
            assert_eq!(kind.to_string().parse::<JobKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_eventbus_emit() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(CurioEvent::CommandDropped {
            kind: JobKind::Curation,
            criteria_id: "pc-1".to_string(),
            command: JobCommand::Start,
            timestamp: Utc::now(),
        })
        .expect("emit should succeed");

        let received = rx.try_recv().expect("Should receive event");
        assert_eq!(received.event_type(), "CommandDropped");
    }

    #[test]
    fn test_eventbus_emit_lossy_without_subscribers() {
        let bus = EventBus::new(2);
        for _ in 0..5 {
            bus.emit_lossy(CurioEvent::ReconcileFailed {
                kind: JobKind::PassEval,
                project_id: "p".to_string(),
                reason: "timeout".to_string(),
                timestamp: Utc::now(),
            });
        }
        assert_eq!(bus.capacity(), 2);
    }
}
