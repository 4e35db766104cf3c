//! JSON 저장소 (설정 파일용)

mod store;

pub use store::JsonStore;
