//! Core - 공용 타입 및 경계 trait

pub mod traits;
pub mod types;

pub use traits::{NotificationChannel, SnapshotSource};
pub use types::{
    DeliveryRecord, EntityKind, EntityRef, EntityState, Fingerprint, Subscriber, Subscription,
    SubscriptionKind, TrackedEntity, UNAVAILABLE,
};
