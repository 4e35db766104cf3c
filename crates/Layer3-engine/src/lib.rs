//! # Vigia Engine
//!
//! 변경 감지와 알림 전달의 전체 파이프라인:
//!
//! ```text
//! Scheduler ──► CycleRunner ──► ChangeDetector ──► SubscriptionIndex
//!                    │                                    │
//!                    ▼                                    ▼
//!              SnapshotSource                        Dispatcher ──► Channel
//!                    │                                    │
//!                    └──────────► Storage ◄───────────────┘
//!                          (per-entity atomic commit)
//! ```
//!
//! 전달 보장은 at-least-once이고, (subscriber, entity, fingerprint) 단위의
//! delivery_records가 중복을 걸러낸다. fingerprint는 해당 변경의 전달이
//! 모두 확인된 뒤에만 전진한다.

pub mod cycle;
pub mod detector;
pub mod dispatcher;
pub mod fingerprint;
pub mod index;
pub mod render;
pub mod scheduler;
pub mod summary;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cycle::{CycleRunner, EngineSettings};
pub use detector::{ChangeDetector, Detection};
pub use dispatcher::{DispatchResult, Dispatcher};
pub use fingerprint::{effective_fields, theme_fingerprint, EffectiveFields};
pub use index::SubscriptionIndex;
pub use render::Renderer;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use summary::{SummaryOutcome, SummaryRunner};
pub use types::{
    ChangeEvent, ChangeKind, Classification, CycleStats, CycleStatus, CycleSummary,
    DeliveryOutcome, Recipient, SchedulerState,
};
