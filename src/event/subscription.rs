use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

use super::events::{Category, MapEvent, TenantId};

/// Errors that end a subscription
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The subscriber fell behind the ring buffer of a channel
    #[error("subscriber lagged behind on {category} channel, {skipped} events lost")]
    Lagged { category: Category, skipped: u64 },

    #[error("event bus closed")]
    Closed,
}

/// A session's handle on the bus, bound to exactly one tenant
///
/// Owns one receiver per subscribed category; dropping the subscription
/// releases all of them.
pub struct Subscription {
    tenant_id: TenantId,
    receivers: Vec<(Category, broadcast::Receiver<MapEvent>)>,
}

impl Subscription {
    pub(super) fn new(
        tenant_id: TenantId,
        receivers: Vec<(Category, broadcast::Receiver<MapEvent>)>,
    ) -> Self {
        debug!(
            tenant_id = %tenant_id,
            categories = receivers.len(),
            "Subscription opened"
        );
        Self {
            tenant_id,
            receivers,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.receivers.iter().map(|(category, _)| *category)
    }

    /// Takes everything currently queued, category by category, without waiting
    ///
    /// Each channel is read at most as many times as it had queued events on
    /// entry, so a producer publishing concurrently cannot keep the drain
    /// going forever.
    pub fn try_drain(&mut self) -> Result<Vec<MapEvent>, SubscriptionError> {
        let mut events = Vec::new();

        for (category, receiver) in &mut self.receivers {
            let queued = receiver.len();

            for _ in 0..queued {
                match receiver.try_recv() {
                    Ok(event) => events.push(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(
                            tenant_id = %self.tenant_id,
                            category = %category,
                            skipped = skipped,
                            "Subscriber fell behind its ring"
                        );
                        return Err(SubscriptionError::Lagged {
                            category: *category,
                            skipped,
                        });
                    }
                    Err(TryRecvError::Closed) => return Err(SubscriptionError::Closed),
                }
            }
        }

        Ok(events)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(tenant_id = %self.tenant_id, "Subscription released");
    }
}
