//! Engine Types - 사이클과 이벤트 타입
//!
//! ChangeEvent는 사이클 안에서만 사는 임시 값이다. 영속되는 것은
//! tracked_entities의 fingerprint와 delivery_records 뿐이다.

use serde::{Deserialize, Serialize};
use vigia_foundation::{EntityState, Fingerprint, SubscriptionKind};

// ============================================================================
// Change Detection
// ============================================================================

/// 알림 대상이 되는 변경의 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Entity appeared in a tracked scope for the first time
    New,
    /// Persisted fingerprint differs from the observed one
    Updated,
}

/// Detector verdict for one observed entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// First observation via a tracked scope, notify
    New,
    /// Fingerprint moved, notify
    Updated,
    /// First observation without scope provenance, persist silently
    Baseline,
    /// Nothing moved (or the storage read failed and we stay conservative)
    Unchanged,
}

/// An in-memory change event, never persisted
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub entity: EntityState,
    pub kind: ChangeKind,
    pub fingerprint_before: Option<Fingerprint>,
    pub fingerprint_after: Fingerprint,
    /// Theme through which this entity was observed, if any
    pub theme_scope: Option<String>,
    pub detected_at: String,
}

// ============================================================================
// Dispatch
// ============================================================================

/// A subscriber resolved for an event, with the rule that matched
///
/// specificity가 메시지 스타일을 고른다: dataset > theme > keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub subscriber_id: i64,
    pub specificity: SubscriptionKind,
}

/// Outcome of one dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Channel confirmed the send
    Delivered,
    /// A record for this exact change already exists, skipped
    AlreadyDelivered,
    /// The channel rejected the subscriber permanently (blocked the bot);
    /// the delivery is recorded as resolved and the subscriber deactivated
    Rejected,
    /// Send failed, no record written, redelivered next cycle
    Failed(String),
}

// ============================================================================
// Cycle Reporting
// ============================================================================

/// Counters accumulated over one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub entities_checked: usize,
    pub events_detected: usize,
    pub notifications_sent: usize,
    pub notifications_deduped: usize,
    pub send_failures: usize,
    /// Deliveries resolved without a send because the channel blocked them
    pub send_rejections: usize,
    /// Entities skipped because their read or commit failed
    pub entity_failures: usize,
}

/// Result of one completed cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub stats: CycleStats,
}

/// Scheduler state, an explicit enum rather than ambient flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running => f.write_str("running"),
        }
    }
}

/// Snapshot of the scheduler for status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleStatus {
    pub state: SchedulerState,
    pub last_run_at: Option<String>,
    pub last_summary: Option<CycleSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_state_display() {
        assert_eq!(SchedulerState::Idle.to_string(), "idle");
        assert_eq!(SchedulerState::Running.to_string(), "running");
    }

    #[test]
    fn cycle_stats_default_is_zeroed() {
        let stats = CycleStats::default();
        assert_eq!(stats.entities_checked, 0);
        assert_eq!(stats.send_failures, 0);
    }
}
