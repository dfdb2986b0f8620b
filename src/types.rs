//! Read projection returned by `get`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of polling a task identifier.
///
/// Derived on read, never stored. Serializes with a `status` tag:
/// `{"status":"pending"}` or `{"status":"completed","data":...}`.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use task_cache::TaskResult;
///
/// let done = TaskResult::Completed { data: json!({"x": 1}) };
/// assert_eq!(
///     serde_json::to_value(&done).unwrap(),
///     json!({"status": "completed", "data": {"x": 1}})
/// );
/// assert_eq!(
///     serde_json::to_value(TaskResult::Pending).unwrap(),
///     json!({"status": "pending"})
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    /// No live record exists (never written, or expired).
    Pending,
    /// A record exists; carries the decoded payload.
    Completed {
        /// The payload written by the producer.
        data: Value,
    },
}

impl TaskResult {
    /// Returns `true` for [`TaskResult::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Returns the completed payload, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Completed { data } => Some(data),
            Self::Pending => None,
        }
    }

    /// Consumes the result and returns the completed payload, if any.
    pub fn into_data(self) -> Option<Value> {
        match self {
            Self::Completed { data } => Some(data),
            Self::Pending => None,
        }
    }
}
