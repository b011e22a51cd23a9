//! Operation record: one durable unit of pending work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::OperationId;

/// A client mutation waiting to be executed against the remote authority.
///
/// This is the single source of truth for an operation's delivery state and
/// exactly what gets persisted. There is no "succeeded" state: a delivered
/// operation is removed from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,

    /// Tag selecting the handler.
    pub op_type: String,

    /// Handler-interpreted data. Typed at the edges via `Mutation`.
    pub payload: serde_json::Value,

    /// Enqueue time. Diagnostics only, not used for eligibility.
    pub created_at: DateTime<Utc>,

    /// Number of failed execution attempts so far.
    pub attempts: u32,

    /// Ceiling on `attempts`. Reaching it parks the operation for inspection.
    pub max_attempts: u32,

    /// Time of the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Resolved deduplication key, scoped to `op_type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,

    /// Message of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Operation {
    /// Fresh operation with no attempts recorded.
    pub fn new(
        id: OperationId,
        op_type: impl Into<String>,
        payload: serde_json::Value,
        max_attempts: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            op_type: op_type.into(),
            payload,
            created_at,
            attempts: 0,
            max_attempts,
            last_attempt_at: None,
            dedupe_key: None,
            last_error: None,
        }
    }

    /// Attach a resolved dedupe key.
    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    /// Retries used up. The operation stays visible but is never attempted again.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(at);
        self.last_error = Some(error.into());
    }

    /// Record a failure that retrying cannot fix: jump straight to the ceiling.
    pub fn record_permanent_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.attempts = self.attempts.max(self.max_attempts);
        self.last_attempt_at = Some(at);
        self.last_error = Some(error.into());
    }

    /// Whether this operation blocks a new enqueue with the same dedupe key.
    pub fn matches_dedupe(&self, op_type: &str, key: &str) -> bool {
        !self.is_exhausted() && self.op_type == op_type && self.dedupe_key.as_deref() == Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn op(max_attempts: u32) -> Operation {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        Operation::new(
            OperationId::from_ulid(Ulid::new()),
            "createTask",
            serde_json::json!({"title": "Buy milk"}),
            max_attempts,
            at,
        )
    }

    #[test]
    fn new_operation_has_no_attempts() {
        let op = op(3);
        assert_eq!(op.attempts, 0);
        assert!(op.last_attempt_at.is_none());
        assert!(!op.is_exhausted());
    }

    #[test]
    fn failures_accumulate_until_exhausted() {
        let mut op = op(2);
        let at = Utc::now();

        op.record_failure(at, "timeout");
        assert_eq!(op.attempts, 1);
        assert_eq!(op.last_attempt_at, Some(at));
        assert!(!op.is_exhausted());

        op.record_failure(at, "timeout again");
        assert!(op.is_exhausted());
        assert_eq!(op.last_error.as_deref(), Some("timeout again"));
    }

    #[test]
    fn permanent_failure_exhausts_immediately() {
        let mut op = op(5);
        op.record_permanent_failure(Utc::now(), "bad payload");
        assert_eq!(op.attempts, 5);
        assert!(op.is_exhausted());
    }

    #[test]
    fn exhausted_operation_does_not_match_dedupe() {
        let mut op = op(1).with_dedupe_key("k");
        assert!(op.matches_dedupe("createTask", "k"));
        assert!(!op.matches_dedupe("deleteTask", "k"));

        op.record_failure(Utc::now(), "nope");
        assert!(!op.matches_dedupe("createTask", "k"));
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let json = serde_json::to_value(op(3)).unwrap();
        assert!(json.get("last_attempt_at").is_none());
        assert!(json.get("dedupe_key").is_none());
        assert_eq!(json["op_type"], "createTask");
        assert_eq!(json["attempts"], 0);
    }
}
