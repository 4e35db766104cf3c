//! Shared test doubles for the engine
//!
//! 사이클/디스패처 테스트가 같이 쓰는 mock 구현들.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use vigia_foundation::{
    EntityKind, EntityState, Error, NotificationChannel, Result, SnapshotSource,
};

/// Snapshot source backed by fixed in-memory data
#[derive(Default)]
pub(crate) struct MockSource {
    /// Scope name → datasets returned for that scope
    pub datasets_by_scope: HashMap<String, Vec<EntityState>>,
    /// Dataset id → state returned by fetch_entity
    pub datasets_by_id: HashMap<String, EntityState>,
    /// Full-listing page (daily summary path)
    pub listing: Vec<EntityState>,
    /// Scopes whose fetch fails with a transport error
    pub fail_scopes: HashSet<String>,
    /// Dataset ids whose fetch fails with a transport error
    pub fail_ids: HashSet<String>,
}

impl MockSource {
    pub fn with_scope(mut self, scope: &str, datasets: Vec<EntityState>) -> Self {
        self.datasets_by_scope.insert(scope.to_string(), datasets);
        self
    }

    pub fn with_dataset(mut self, state: EntityState) -> Self {
        self.datasets_by_id.insert(state.id.clone(), state);
        self
    }

    pub fn failing_dataset(mut self, id: &str) -> Self {
        self.fail_ids.insert(id.to_string());
        self
    }
}

#[async_trait]
impl SnapshotSource for MockSource {
    async fn fetch_entities(
        &self,
        kind: EntityKind,
        scope: Option<&str>,
    ) -> Result<Vec<EntityState>> {
        match (kind, scope) {
            (EntityKind::Dataset, Some(scope)) => {
                if self.fail_scopes.contains(scope) {
                    return Err(Error::Transport(format!("scope {} unreachable", scope)));
                }
                Ok(self
                    .datasets_by_scope
                    .get(scope)
                    .cloned()
                    .unwrap_or_default())
            }
            (EntityKind::Dataset, None) => Ok(self.listing.clone()),
            (EntityKind::Theme, _) => Ok(vec![]),
        }
    }

    async fn fetch_entity(&self, kind: EntityKind, id: &str) -> Result<Option<EntityState>> {
        if self.fail_ids.contains(id) {
            return Err(Error::Transport(format!("dataset {} unreachable", id)));
        }
        match kind {
            EntityKind::Dataset => Ok(self.datasets_by_id.get(id).cloned()),
            EntityKind::Theme => Ok(None),
        }
    }
}

/// Channel that records sends and can fail or reject for chosen chat ids
pub(crate) struct RecordingChannel {
    pub sent: Mutex<Vec<(i64, String)>>,
    /// Transient outage: send fails, retried next cycle
    pub fail_for: Mutex<HashSet<i64>>,
    /// Permanent rejection: the chat blocked the bot
    pub reject_for: Mutex<HashSet<i64>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_for: Mutex::new(HashSet::new()),
            reject_for: Mutex::new(HashSet::new()),
        }
    }

    pub fn failing_for(external_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_for: Mutex::new(external_ids.into_iter().collect()),
            reject_for: Mutex::new(HashSet::new()),
        }
    }

    pub fn rejecting_for(external_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_for: Mutex::new(HashSet::new()),
            reject_for: Mutex::new(external_ids.into_iter().collect()),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("lock").len()
    }

    pub fn sent_to(&self) -> Vec<i64> {
        self.sent.lock().expect("lock").iter().map(|(id, _)| *id).collect()
    }

    /// Clear the failure set (outage over)
    pub fn heal(&self) {
        self.fail_for.lock().expect("lock").clear();
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(&self, subscriber_external_id: i64, rendered: &str) -> Result<()> {
        if self.reject_for.lock().expect("lock").contains(&subscriber_external_id) {
            return Err(Error::SubscriberUnreachable("chat blocked the bot".to_string()));
        }
        if self.fail_for.lock().expect("lock").contains(&subscriber_external_id) {
            return Err(Error::Channel("simulated outage".to_string()));
        }
        self.sent
            .lock()
            .expect("lock")
            .push((subscriber_external_id, rendered.to_string()));
        Ok(())
    }
}

/// Minimal dataset state for tests
pub(crate) fn dataset_state(id: &str, modified: &str, themes: &[&str]) -> EntityState {
    EntityState {
        kind: EntityKind::Dataset,
        id: id.to_string(),
        title: format!("Dataset {}", id),
        description: None,
        publisher: None,
        modified: Some(modified.to_string()),
        data_processed: None,
        metadata_processed: None,
        records_count: 100,
        themes: themes.iter().map(|s| s.to_string()).collect(),
        keywords: vec![],
    }
}
