use super::item::InventoryItem;
use super::transaction::TransactionResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// Notifications the economy publishes to collaborators.
#[derive(Debug, Clone)]
pub enum EconomyEvent {
    BalanceChanged {
        currency: String,
        old: i64,
        new: i64,
    },
    ItemAdded(Arc<InventoryItem>),
    /// Emitted while the item is still readable, right before it is discarded.
    ItemRemoved(Arc<InventoryItem>),
    TransactionInitiated {
        transaction: String,
    },
    TransactionProgressed {
        transaction: String,
        current: u32,
        total: u32,
    },
    TransactionSucceeded {
        transaction: String,
        result: TransactionResult,
    },
    TransactionFailed {
        transaction: String,
        error: String,
    },
    PurchasingInitialized,
    PurchasingInitializeFailed {
        reason: String,
    },
}

type Listener = Box<dyn Fn(&EconomyEvent) + Send + Sync>;

/// Synchronous fan-out of [`EconomyEvent`]s.
///
/// Listeners run inline on the emitting task and must not call back into the economy.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&EconomyEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(listener));
    }

    pub fn emit(&self, event: &EconomyEvent) {
        for listener in self.listeners.read().iter() {
            listener(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_every_listener_sees_event() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let hits = hits.clone();
            bus.subscribe(move |event| {
                if matches!(event, EconomyEvent::PurchasingInitialized) {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        bus.emit(&EconomyEvent::PurchasingInitialized);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
