//! Storage - SQLite (런타임 데이터) + JSON (설정)

pub mod db;
pub mod json;

pub use db::{DailySummaryRecord, EntityObservation, KnownDatasetRecord, Storage};
pub use json::JsonStore;
