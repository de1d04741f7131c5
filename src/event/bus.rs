use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use strum::IntoEnumIterator;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::events::{Category, MapEvent, TenantId};
use super::subscription::Subscription;

type ChannelKey = (TenantId, Category);

/// Event bus distributing map changes to every live stream session
///
/// Holds one broadcast ring per tenant and [`Category`], created when the
/// first session of the tenant subscribes. A tenant's burst only fills its
/// own rings, so it can never push another tenant's sessions behind.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Debug)]
struct BusInner {
    channels: DashMap<ChannelKey, broadcast::Sender<MapEvent>>,
    capacity: usize,
    shutdown: CancellationToken,
}

impl EventBus {
    /// Creates a new event bus whose rings hold `capacity` events each
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: DashMap::new(),
                capacity: capacity.max(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Publishes an event to every subscriber of its tenant and category
    ///
    /// Never blocks and never fails; returns the number of subscribers the
    /// event was queued for.
    pub fn publish(&self, event: MapEvent) -> usize {
        let category = event.category();

        if self.inner.shutdown.is_cancelled() {
            debug!(category = %category, "Event bus is shut down, dropping event");
            return 0;
        }

        let key = (event.tenant_id().clone(), category);
        let Some(sender) = self.inner.channels.get(&key).map(|sender| sender.clone()) else {
            trace!(category = %category, "Event published with no receivers");
            return 0;
        };

        match sender.send(event) {
            Ok(receivers) => {
                trace!(category = %category, receivers = receivers, "Event published");
                receivers
            }
            Err(_) => {
                // Every session of the tenant is gone; drop the idle ring.
                self.inner
                    .channels
                    .remove_if(&key, |_, sender| sender.receiver_count() == 0);
                trace!(category = %category, "Event published with no receivers");
                0
            }
        }
    }

    /// Subscribes to the given categories on behalf of one tenant
    pub fn subscribe(
        &self,
        tenant_id: TenantId,
        categories: impl IntoIterator<Item = Category>,
    ) -> Subscription {
        let wanted: BTreeSet<usize> = categories.into_iter().map(Category::index).collect();
        let receivers = Category::iter()
            .filter(|category| wanted.contains(&category.index()))
            .map(|category| {
                let receiver = self
                    .inner
                    .channels
                    .entry((tenant_id.clone(), category))
                    .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
                    .subscribe();
                (category, receiver)
            })
            .collect();

        Subscription::new(tenant_id, receivers)
    }

    /// Number of live receivers on a category, across all tenants
    pub fn subscriber_count(&self, category: Category) -> usize {
        self.inner
            .channels
            .iter()
            .filter(|entry| entry.key().1 == category)
            .map(|entry| entry.value().receiver_count())
            .sum()
    }

    /// Root cancellation scope; every session derives a child token from it
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stops accepting events and cancels every live session
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Shutting down event bus");
            self.inner.shutdown.cancel();
        }
    }
}
