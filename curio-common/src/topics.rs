//! Real-time topic vocabulary
//!
//! Topic names published by the visualization pipeline and the decoder for
//! their payloads. Producers are not consistent about framing: payloads may be
//! raw JSON, JSON wrapped in single quotes, or a JSON string holding JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// `global/user/<userId>/visualization/complete`
pub fn visualization_complete(user_id: &str) -> String {
    format!("global/user/{}/visualization/complete", user_id)
}

/// `visualization/frontend/progress/<userId>/<projectId>`
pub fn visualization_progress(user_id: &str, project_id: &str) -> String {
    format!("visualization/frontend/progress/{}/{}", user_id, project_id)
}

/// Decode a topic payload into a JSON value
pub fn decode_payload(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    let unquoted = match trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(inner) => inner,
        None => trimmed,
    };

    let value: Value = serde_json::from_str(unquoted)?;
    match value {
        // Double-encoded: the outer document is a string holding the real one
        Value::String(inner) => Ok(serde_json::from_str(&inner)?),
        other => Ok(other),
    }
}

/// Processing status of a visualization project
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisualizationStatus {
    Progressing,
    Complete,
}

/// Payload of both visualization topics
///
/// The completion topic only carries `projectId`; progress frames carry the
/// status and, while progressing, one rendered segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisualizationNotice {
    #[serde(rename = "projectId", default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub status: Option<VisualizationStatus>,
    #[serde(default)]
    pub rrd_url: Option<String>,
    #[serde(default)]
    pub segment_index: Option<u32>,
    #[serde(default)]
    pub segment_name: Option<String>,
}

impl VisualizationNotice {
    pub fn decode(raw: &str) -> Result<Self> {
        let value = decode_payload(raw)?;
        if !value.is_object() {
            return Err(Error::InvalidInput(format!(
                "visualization payload is not an object: {}",
                value
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// A newly rendered segment, if this frame carries one
    pub fn segment(&self) -> Option<(u32, &str)> {
        match (self.status, self.segment_index, self.rrd_url.as_deref()) {
            (Some(VisualizationStatus::Progressing), Some(index), Some(url)) => Some((index, url)),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == Some(VisualizationStatus::Complete)
    }
}
