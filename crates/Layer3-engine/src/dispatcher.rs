//! Notification Dispatcher
//!
//! 이벤트 하나를 수신자들에게 전달한다. 전달 규칙:
//! - 보내기 전에 delivery_exists로 같은 변경에 대한 기록이 있는지 확인
//!   (재시도 사이클에서 멱등)
//! - 전송 실패는 구독자 단위로 격리되고 기록을 남기지 않는다. 그 구독자는
//!   다음 사이클에 같은 변경을 다시 받는다.
//! - 채널이 구독자를 영구 거부하면(봇 차단) 재시도해도 소용없다. 구독자를
//!   비활성화하고 전달은 해결된 것으로 기록해 fingerprint를 붙잡지 않는다.
//! - 성공한 전송만 모아서 돌려준다. 기록 쓰기는 사이클이 엔티티 커밋과
//!   같은 트랜잭션으로 묶는다.

use crate::{
    render::Renderer,
    types::{ChangeEvent, DeliveryOutcome, Recipient},
};
use std::sync::Arc;
use tracing::{debug, warn};
use vigia_foundation::{Error, NotificationChannel, Storage};

/// Aggregate result of dispatching one event
#[derive(Debug, Default)]
pub struct DispatchResult {
    /// Subscriber ids whose sends the channel confirmed
    pub delivered_to: Vec<i64>,
    /// Subscriber ids the channel rejected permanently, resolved without a send
    pub rejected_to: Vec<i64>,
    pub deduped: usize,
    pub failures: usize,
}

impl DispatchResult {
    /// Everyone whose delivery is settled for this change, sent or rejected
    pub fn resolved_to(&self) -> Vec<i64> {
        self.delivered_to
            .iter()
            .chain(self.rejected_to.iter())
            .copied()
            .collect()
    }
}

pub struct Dispatcher {
    storage: Arc<Storage>,
    channel: Arc<dyn NotificationChannel>,
    renderer: Renderer,
}

impl Dispatcher {
    pub fn new(
        storage: Arc<Storage>,
        channel: Arc<dyn NotificationChannel>,
        renderer: Renderer,
    ) -> Self {
        Self {
            storage,
            channel,
            renderer,
        }
    }

    /// Dispatch one event to one recipient
    pub async fn dispatch_one(&self, recipient: &Recipient, event: &ChangeEvent) -> DeliveryOutcome {
        let entity = event.entity.entity_ref();

        match self
            .storage
            .delivery_exists(recipient.subscriber_id, &entity, &event.fingerprint_after)
        {
            Ok(true) => return DeliveryOutcome::AlreadyDelivered,
            Ok(false) => {}
            Err(e) => {
                // Can't prove it wasn't sent; skipping beats a duplicate
                warn!(
                    subscriber = recipient.subscriber_id,
                    entity = %entity,
                    "Delivery check failed, skipping: {}",
                    e
                );
                return DeliveryOutcome::Failed(e.to_string());
            }
        }

        let subscriber = match self.storage.get_subscriber(recipient.subscriber_id) {
            Ok(Some(subscriber)) if subscriber.is_active => subscriber,
            Ok(_) => {
                debug!(
                    subscriber = recipient.subscriber_id,
                    "Subscriber missing or inactive, skipping"
                );
                return DeliveryOutcome::Failed("subscriber inactive".to_string());
            }
            Err(e) => return DeliveryOutcome::Failed(e.to_string()),
        };

        let rendered = self.renderer.render_event(event, recipient.specificity);
        match self.channel.send(subscriber.external_id, &rendered).await {
            Ok(()) => {
                debug!(
                    subscriber = recipient.subscriber_id,
                    entity = %entity,
                    fingerprint = %event.fingerprint_after,
                    "Notification delivered"
                );
                DeliveryOutcome::Delivered
            }
            Err(Error::SubscriberUnreachable(reason)) => {
                // Blocked chats never come back on retry; deactivate instead
                warn!(
                    subscriber = recipient.subscriber_id,
                    entity = %entity,
                    "Subscriber rejected the channel, deactivating: {}",
                    reason
                );
                if let Err(e) = self.storage.deactivate_subscriber(recipient.subscriber_id) {
                    warn!(
                        subscriber = recipient.subscriber_id,
                        "Deactivation failed: {}",
                        e
                    );
                }
                DeliveryOutcome::Rejected
            }
            Err(e) => {
                warn!(
                    subscriber = recipient.subscriber_id,
                    entity = %entity,
                    "Send failed: {}",
                    e
                );
                DeliveryOutcome::Failed(e.to_string())
            }
        }
    }

    /// Dispatch one event to all its recipients, isolating failures
    pub async fn dispatch_event(
        &self,
        event: &ChangeEvent,
        recipients: &[Recipient],
    ) -> DispatchResult {
        let mut result = DispatchResult::default();

        for recipient in recipients {
            match self.dispatch_one(recipient, event).await {
                DeliveryOutcome::Delivered => result.delivered_to.push(recipient.subscriber_id),
                DeliveryOutcome::AlreadyDelivered => result.deduped += 1,
                DeliveryOutcome::Rejected => result.rejected_to.push(recipient.subscriber_id),
                DeliveryOutcome::Failed(_) => result.failures += 1,
            }
        }

        result
    }
}
