//! # vigia-foundation
//!
//! Foundation layer for Vigia:
//! - Core: 공용 타입과 경계 trait (SnapshotSource, NotificationChannel)
//! - Storage: SQLite (런타임), JsonStore (설정)
//! - Config: 통합 설정 (VigiaConfig)
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Scheduler (interval + daily)                           │
//! │        │                                                │
//! │        ▼                                                │
//! │  Snapshot Reader ──► Change Detector ──► Dispatcher     │
//! │  (catalog HTTP)      (fingerprints)      (channel)      │
//! │                           │                  │          │
//! │                           ▼                  ▼          │
//! │                  Tracked Entities     Delivery Records  │
//! │                        (SQLite, atomic per entity)      │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Core (공용 타입 및 trait)
// ============================================================================
pub use core::{
    DeliveryRecord, EntityKind, EntityRef, EntityState, Fingerprint, NotificationChannel,
    SnapshotSource, Subscriber, Subscription, SubscriptionKind, TrackedEntity, UNAVAILABLE,
};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{AlertsConfig, ChannelConfig, SummaryConfig, VigiaConfig, VIGIA_CONFIG_FILE};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{
    DailySummaryRecord, EntityObservation, JsonStore, KnownDatasetRecord, Storage,
};
