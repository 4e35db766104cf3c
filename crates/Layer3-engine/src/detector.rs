//! Change Detector
//!
//! 관찰된 엔티티 상태를 저장된 마지막 상태와 비교해 분류한다.
//!
//! - 저장된 행이 없으면: 추적 중인 scope를 통해 나타난 경우에만 New,
//!   아니면 조용한 baseline
//! - fingerprint가 다르면: 엔티티 단위로 Updated 하나
//! - 같으면: Unchanged
//!
//! 저장소 읽기 실패는 보수적으로 Unchanged 처리한다. 놓친 변경은 다음
//! 사이클에 다시 잡히지만, 잘못 보낸 알림은 되돌릴 수 없다.

use crate::{
    fingerprint::{effective_fields, EffectiveFields},
    types::Classification,
};
use std::sync::Arc;
use tracing::warn;
use vigia_foundation::{EntityState, Fingerprint, Storage};

/// One detection result: verdict plus everything the commit needs
#[derive(Debug, Clone)]
pub struct Detection {
    pub classification: Classification,
    pub fingerprint_before: Option<Fingerprint>,
    pub fingerprint_after: Fingerprint,
    pub effective: EffectiveFields,
}

pub struct ChangeDetector {
    storage: Arc<Storage>,
}

impl ChangeDetector {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Classify one observed entity state.
    ///
    /// `via_tracked_scope` is true when the entity surfaced by appearing in
    /// a scope we already track (the only case a first observation is New).
    pub fn detect(&self, state: &EntityState, via_tracked_scope: bool) -> Detection {
        let previous = match self.storage.load_tracked_entity(state.kind, &state.id) {
            Ok(previous) => previous,
            Err(e) => {
                warn!(
                    entity = %state.entity_ref(),
                    "Storage read failed, treating as unchanged: {}",
                    e
                );
                let effective = effective_fields(state, None);
                let fingerprint_after = effective.fingerprint();
                return Detection {
                    classification: Classification::Unchanged,
                    fingerprint_before: None,
                    fingerprint_after,
                    effective,
                };
            }
        };

        let effective = effective_fields(state, previous.as_ref());
        let fingerprint_after = effective.fingerprint();

        match previous {
            None => Detection {
                classification: if via_tracked_scope {
                    Classification::New
                } else {
                    Classification::Baseline
                },
                fingerprint_before: None,
                fingerprint_after,
                effective,
            },
            Some(previous) if previous.fingerprint == fingerprint_after => Detection {
                classification: Classification::Unchanged,
                fingerprint_before: Some(previous.fingerprint),
                fingerprint_after,
                effective,
            },
            Some(previous) => Detection {
                classification: Classification::Updated,
                fingerprint_before: Some(previous.fingerprint),
                fingerprint_after,
                effective,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigia_foundation::{EntityKind, EntityObservation, EntityRef, UNAVAILABLE};

    fn state(id: &str, modified: &str, count: i64) -> EntityState {
        EntityState {
            kind: EntityKind::Dataset,
            id: id.to_string(),
            title: id.to_string(),
            description: None,
            publisher: None,
            modified: Some(modified.to_string()),
            data_processed: None,
            metadata_processed: None,
            records_count: count,
            themes: vec![],
            keywords: vec![],
        }
    }

    fn commit(storage: &Storage, state: &EntityState, detection: &Detection) {
        storage
            .commit_entity_observation(&EntityObservation {
                entity: EntityRef::dataset(&state.id),
                fingerprint: detection.fingerprint_after.clone(),
                modified: detection.effective.modified.clone(),
                data_processed: detection.effective.data_processed.clone(),
                metadata_processed: detection.effective.metadata_processed.clone(),
                records_count: detection.effective.records_count,
                member_ids: vec![],
                delivered_to: vec![],
            })
            .expect("commit");
    }

    #[test]
    fn first_observation_is_baseline_unless_scoped() {
        let storage = Arc::new(Storage::in_memory().expect("storage"));
        let detector = ChangeDetector::new(storage);

        let unscoped = detector.detect(&state("a", "2025-08-01", 1), false);
        assert_eq!(unscoped.classification, Classification::Baseline);

        let scoped = detector.detect(&state("b", "2025-08-01", 1), true);
        assert_eq!(scoped.classification, Classification::New);
    }

    #[test]
    fn fingerprint_change_is_updated_once() {
        let storage = Arc::new(Storage::in_memory().expect("storage"));
        let detector = ChangeDetector::new(storage.clone());

        let s1 = state("d", "2025-08-01", 100);
        let first = detector.detect(&s1, false);
        commit(&storage, &s1, &first);

        // Same observation again
        let again = detector.detect(&s1, false);
        assert_eq!(again.classification, Classification::Unchanged);

        // Two fields moved, still a single Updated
        let s2 = state("d", "2025-08-05", 150);
        let changed = detector.detect(&s2, false);
        assert_eq!(changed.classification, Classification::Updated);
        assert_eq!(changed.fingerprint_before, Some(first.fingerprint_after));
    }

    #[test]
    fn sentinel_hiccup_is_unchanged() {
        let storage = Arc::new(Storage::in_memory().expect("storage"));
        let detector = ChangeDetector::new(storage.clone());

        let s1 = state("d", "2025-08-01", 100);
        let first = detector.detect(&s1, false);
        commit(&storage, &s1, &first);

        let mut hiccup = s1.clone();
        hiccup.modified = Some(UNAVAILABLE.to_string());
        let detection = detector.detect(&hiccup, false);
        assert_eq!(detection.classification, Classification::Unchanged);
    }
}
