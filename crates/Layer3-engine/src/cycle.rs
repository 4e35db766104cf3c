//! Cycle Runner
//!
//! 한 사이클의 전체 파이프라인: 구독에서 scope를 뽑고, 카탈로그를 읽고,
//! 변경을 분류하고, 수신자를 해석해 전달한 뒤 엔티티 단위로 커밋한다.
//!
//! 커밋 규칙이 이 모듈의 핵심 불변식이다:
//! - 모든 전송이 확인된 엔티티: fingerprint 전진 + 전달 기록을 하나의
//!   트랜잭션으로 커밋
//! - 일부 전송이 실패한 엔티티: 해결된 전달 기록만 남기고 fingerprint는
//!   전진하지 않는다. 다음 사이클이 같은 변경을 다시 감지하고, 이미 받은
//!   구독자는 delivery_exists로 걸러진다.
//! - 영구 거부(차단된 구독자)는 실패가 아니라 해결이다. 기록을 남기고
//!   fingerprint 전진을 막지 않는다.
//!
//! Scope 읽기는 worker_pool_size로 제한된 병렬로, 엔티티별
//! 감지→해석→전달은 순차로 진행된다.

use crate::{
    detector::{ChangeDetector, Detection},
    dispatcher::Dispatcher,
    fingerprint::theme_fingerprint,
    index::SubscriptionIndex,
    render::Renderer,
    types::{ChangeEvent, ChangeKind, Classification, CycleStats, CycleSummary},
};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigia_foundation::{
    EntityKind, EntityObservation, EntityRef, EntityState, NotificationChannel, Result,
    SnapshotSource, Storage, SubscriptionKind,
};

/// Engine knobs, resolved from configuration by the caller
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub worker_pool_size: usize,
    pub catalog_base_url: String,
    pub synonyms: HashMap<String, Vec<String>>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            catalog_base_url: String::new(),
            synonyms: HashMap::new(),
        }
    }
}

pub struct CycleRunner {
    storage: Arc<Storage>,
    source: Arc<dyn SnapshotSource>,
    detector: ChangeDetector,
    dispatcher: Dispatcher,
    settings: EngineSettings,
}

impl CycleRunner {
    pub fn new(
        storage: Arc<Storage>,
        source: Arc<dyn SnapshotSource>,
        channel: Arc<dyn NotificationChannel>,
        settings: EngineSettings,
    ) -> Self {
        let detector = ChangeDetector::new(storage.clone());
        let dispatcher = Dispatcher::new(
            storage.clone(),
            channel,
            Renderer::new(settings.catalog_base_url.clone()),
        );
        Self {
            storage,
            source,
            detector,
            dispatcher,
            settings,
        }
    }

    /// Run one complete detection cycle
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let cycle_id = Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now().to_rfc3339();
        info!(cycle_id = %cycle_id, "Cycle started");

        // A storage failure here is fatal for the cycle: no index, no scopes,
        // nothing touched.
        let index = SubscriptionIndex::build(&self.storage, &self.settings.synonyms)?;
        let subscriptions = self.storage.list_active_subscriptions(None, None)?;

        let mut theme_scopes: BTreeSet<String> = BTreeSet::new();
        let mut direct_datasets: BTreeSet<String> = BTreeSet::new();
        for sub in &subscriptions {
            match sub.kind {
                SubscriptionKind::Theme => {
                    theme_scopes.insert(sub.target_id.clone());
                }
                SubscriptionKind::Dataset => {
                    direct_datasets.insert(sub.target_id.clone());
                }
                // Keyword subscriptions don't define scopes of their own;
                // they match against events from theme and dataset scans.
                SubscriptionKind::Keyword => {}
            }
        }

        let mut stats = CycleStats::default();
        let mut processed: HashSet<String> = HashSet::new();

        // Scope reads in parallel, bounded by the worker pool size
        let scope_results: Vec<(String, Result<Vec<EntityState>>)> =
            stream::iter(theme_scopes.into_iter())
                .map(|scope| async move {
                    let result = self
                        .source
                        .fetch_entities(EntityKind::Dataset, Some(&scope))
                        .await;
                    (scope, result)
                })
                .buffer_unordered(self.settings.worker_pool_size.max(1))
                .collect()
                .await;

        for (scope, result) in scope_results {
            match result {
                Ok(datasets) => {
                    self.process_scope(&scope, datasets, &index, &mut processed, &mut stats)
                        .await;
                }
                Err(e) => {
                    warn!(scope = %scope, "Scope read failed, skipping: {}", e);
                    stats.entity_failures += 1;
                }
            }
        }

        // Direct dataset subscriptions not already covered by a scope
        let remaining: Vec<String> = direct_datasets
            .into_iter()
            .filter(|id| !processed.contains(&EntityRef::dataset(id.clone()).full_id()))
            .collect();

        let dataset_results: Vec<(String, Result<Option<EntityState>>)> =
            stream::iter(remaining.into_iter())
                .map(|id| async move {
                    let result = self.source.fetch_entity(EntityKind::Dataset, &id).await;
                    (id, result)
                })
                .buffer_unordered(self.settings.worker_pool_size.max(1))
                .collect()
                .await;

        for (id, result) in dataset_results {
            match result {
                Ok(Some(state)) => {
                    self.process_dataset(state, false, None, &index, &mut processed, &mut stats)
                        .await;
                }
                Ok(None) => {
                    debug!(dataset = %id, "Dataset no longer exists upstream");
                }
                Err(e) => {
                    warn!(dataset = %id, "Dataset read failed, skipping: {}", e);
                    stats.entity_failures += 1;
                }
            }
        }

        let finished_at = chrono::Utc::now().to_rfc3339();
        info!(
            cycle_id = %cycle_id,
            checked = stats.entities_checked,
            events = stats.events_detected,
            sent = stats.notifications_sent,
            deduped = stats.notifications_deduped,
            send_failures = stats.send_failures,
            send_rejections = stats.send_rejections,
            entity_failures = stats.entity_failures,
            "Cycle finished"
        );

        Ok(CycleSummary {
            cycle_id,
            started_at,
            finished_at,
            stats,
        })
    }

    async fn process_scope(
        &self,
        scope: &str,
        datasets: Vec<EntityState>,
        index: &SubscriptionIndex,
        processed: &mut HashSet<String>,
        stats: &mut CycleStats,
    ) {
        // A first scan of a scope baselines its members silently
        let theme_row = match self.storage.load_tracked_entity(EntityKind::Theme, scope) {
            Ok(row) => row,
            Err(e) => {
                warn!(scope = %scope, "Theme row read failed: {}", e);
                None
            }
        };
        let scope_tracked = theme_row.is_some();

        let mut member_ids: Vec<String> = Vec::with_capacity(datasets.len());
        for state in datasets {
            member_ids.push(state.id.clone());
            self.process_dataset(state, scope_tracked, Some(scope), index, processed, stats)
                .await;
        }

        let observation = EntityObservation {
            entity: EntityRef::theme(scope),
            fingerprint: theme_fingerprint(&member_ids),
            modified: None,
            data_processed: None,
            metadata_processed: None,
            records_count: member_ids.len() as i64,
            member_ids,
            delivered_to: vec![],
        };
        if let Err(e) = self.storage.commit_entity_observation(&observation) {
            warn!(scope = %scope, "Theme membership commit failed: {}", e);
            stats.entity_failures += 1;
        }
    }

    async fn process_dataset(
        &self,
        state: EntityState,
        via_tracked_scope: bool,
        theme_scope: Option<&str>,
        index: &SubscriptionIndex,
        processed: &mut HashSet<String>,
        stats: &mut CycleStats,
    ) {
        let full_id = state.entity_ref().full_id();
        if !processed.insert(full_id) {
            // Already handled through another scope this cycle
            return;
        }
        stats.entities_checked += 1;

        let detection = self.detector.detect(&state, via_tracked_scope);
        match detection.classification {
            Classification::Unchanged => {}
            Classification::Baseline => {
                debug!(entity = %state.entity_ref(), "Baselined silently");
                if let Err(e) = self.commit(&state, &detection, vec![]) {
                    warn!(entity = %state.entity_ref(), "Baseline commit failed: {}", e);
                    stats.entity_failures += 1;
                }
            }
            Classification::New | Classification::Updated => {
                stats.events_detected += 1;
                let event = ChangeEvent {
                    kind: if detection.classification == Classification::New {
                        ChangeKind::New
                    } else {
                        ChangeKind::Updated
                    },
                    fingerprint_before: detection.fingerprint_before.clone(),
                    fingerprint_after: detection.fingerprint_after.clone(),
                    theme_scope: theme_scope.map(str::to_string),
                    detected_at: chrono::Utc::now().to_rfc3339(),
                    entity: state,
                };

                let recipients = index.resolve(&event);
                let result = self.dispatcher.dispatch_event(&event, &recipients).await;
                stats.notifications_sent += result.delivered_to.len();
                stats.notifications_deduped += result.deduped;
                stats.send_failures += result.failures;
                stats.send_rejections += result.rejected_to.len();

                if result.failures == 0 {
                    // Every delivery settled (sent or permanently rejected):
                    // advance the fingerprint together with the delivery
                    // records, atomically.
                    if let Err(e) = self.commit(&event.entity, &detection, result.resolved_to()) {
                        warn!(entity = %event.entity.entity_ref(), "Commit failed: {}", e);
                        stats.entity_failures += 1;
                    }
                } else {
                    // Some sends failed: record what settled, keep the
                    // fingerprint where it is so the change re-detects next
                    // cycle. delivery_exists dedupes the ones already served.
                    let entity = event.entity.entity_ref();
                    for subscriber_id in result.resolved_to() {
                        if let Err(e) = self.storage.record_delivery(
                            subscriber_id,
                            &entity,
                            &event.fingerprint_after,
                        ) {
                            warn!(
                                subscriber = subscriber_id,
                                entity = %entity,
                                "Delivery record failed: {}",
                                e
                            );
                        }
                    }
                }
            }
        }
    }

    fn commit(
        &self,
        state: &EntityState,
        detection: &Detection,
        delivered_to: Vec<i64>,
    ) -> Result<()> {
        self.storage.commit_entity_observation(&EntityObservation {
            entity: state.entity_ref(),
            fingerprint: detection.fingerprint_after.clone(),
            modified: detection.effective.modified.clone(),
            data_processed: detection.effective.data_processed.clone(),
            metadata_processed: detection.effective.metadata_processed.clone(),
            records_count: detection.effective.records_count,
            member_ids: vec![],
            delivered_to,
        })
    }
}
