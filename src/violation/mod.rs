//! Violation domain types
//!
//! ## Responsibilities
//!
//! - Closed enumerations for violation kind and review status
//! - The single transition table every review action goes through
//!
//! Violations are never deleted; they are the audit trail. Evidence rows
//! cascade with them at the schema level.

mod aggregator;
mod repository;
mod state_machine;

pub use aggregator::{AggregationOutcome, ViolationAggregator};
pub use repository::ViolationRepository;
pub use state_machine::ViolationStateMachine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of safety violation a detection event aggregates into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    FallDetected,
    PpeViolation,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::FallDetected => "fall_detected",
            ViolationKind::PpeViolation => "ppe_violation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fall_detected" => Some(ViolationKind::FallDetected),
            "ppe_violation" => Some(ViolationKind::PpeViolation),
            _ => None,
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationStatus {
    Open,
    Reviewed,
    Dismissed,
    Resolved,
}

impl ViolationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationStatus::Open => "open",
            ViolationStatus::Reviewed => "reviewed",
            ViolationStatus::Dismissed => "dismissed",
            ViolationStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ViolationStatus::Open),
            "reviewed" => Some(ViolationStatus::Reviewed),
            "dismissed" => Some(ViolationStatus::Dismissed),
            "resolved" => Some(ViolationStatus::Resolved),
            _ => None,
        }
    }

    /// Resolved is terminal; nothing leaves it, including reopen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ViolationStatus::Resolved)
    }

    /// The transition table. All review actions route through this;
    /// there are no ad-hoc paths.
    pub fn can_transition_to(&self, target: ViolationStatus) -> bool {
        use ViolationStatus::*;
        matches!(
            (self, target),
            (Open, Reviewed)
                | (Open, Dismissed)
                | (Reviewed, Dismissed)
                | (Reviewed, Resolved)
                | (Dismissed, Open)
        )
    }
}

impl std::fmt::Display for ViolationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted safety violation (matches violations table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub id: i64,
    pub device_id: i64,
    pub stream_session_id: Option<i64>,
    pub violation_type: ViolationKind,
    pub status: ViolationStatus,
    /// Running maximum across all linked events
    pub confidence: f64,
    /// First triggering event's timestamp
    pub occurred_at: DateTime<Utc>,
    /// Denormalized for display
    pub device_name: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_exhaustive() {
        use ViolationStatus::*;
        let all = [Open, Reviewed, Dismissed, Resolved];

        for target in all {
            assert!(!Resolved.can_transition_to(target), "resolved is terminal");
        }

        assert!(Open.can_transition_to(Reviewed));
        assert!(Open.can_transition_to(Dismissed));
        assert!(!Open.can_transition_to(Resolved), "must pass through reviewed");
        assert!(Reviewed.can_transition_to(Dismissed));
        assert!(Reviewed.can_transition_to(Resolved));
        assert!(!Reviewed.can_transition_to(Open));
        assert!(Dismissed.can_transition_to(Open));
        assert!(!Dismissed.can_transition_to(Resolved));
    }

    #[test]
    fn test_status_string_roundtrip() {
        use ViolationStatus::*;
        for status in [Open, Reviewed, Dismissed, Resolved] {
            assert_eq!(ViolationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ViolationStatus::parse("garbage"), None);
    }
}
