use crate::domain::ports::PurchasingPlatform;
use crate::domain::purchase::{
    AppStore, PlatformEvent, PlatformEventSender, PlatformPurchase, ProductDefinition,
    PurchaseFailure, PurchaseFailureReason, PurchaseReceipt,
};
use crate::domain::transaction::ProductType;
use crate::error::{EconomyError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

/// How the fake store answers `initiate_purchase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOutcome {
    Succeed,
    Fail(PurchaseFailureReason),
    /// Never reports back, leaving the purchase pending.
    Hang,
}

struct FakeState {
    outcome: FakeOutcome,
    sender: Option<PlatformEventSender>,
    products: Vec<ProductDefinition>,
    confirmed: Vec<PlatformPurchase>,
    next_transaction: u64,
}

/// Scriptable stand-in for a platform store, used by the CLI and tests.
pub struct FakePurchasingPlatform {
    store: AppStore,
    fail_initialize: bool,
    state: Mutex<FakeState>,
}

impl FakePurchasingPlatform {
    pub fn new(store: AppStore) -> Self {
        Self {
            store,
            fail_initialize: false,
            state: Mutex::new(FakeState {
                outcome: FakeOutcome::Succeed,
                sender: None,
                products: Vec::new(),
                confirmed: Vec::new(),
                next_transaction: 1,
            }),
        }
    }

    /// A store whose initialization always fails.
    pub fn unavailable(store: AppStore) -> Self {
        Self {
            fail_initialize: true,
            ..Self::new(store)
        }
    }

    pub fn set_outcome(&self, outcome: FakeOutcome) {
        self.state.lock().outcome = outcome;
    }

    pub fn products(&self) -> Vec<ProductDefinition> {
        self.state.lock().products.clone()
    }

    /// Purchases confirmed by the economy, oldest first.
    pub fn confirmed(&self) -> Vec<PlatformPurchase> {
        self.state.lock().confirmed.clone()
    }

    /// Reports a successful purchase the player did not start in this session.
    pub fn simulate_background_purchase(&self, product_id: &str) -> Result<PlatformPurchase> {
        let purchase = self.make_purchase(product_id);
        self.send(PlatformEvent::PurchaseSucceeded(purchase.clone()))?;
        Ok(purchase)
    }

    /// Reports the same platform purchase again, as stores do after an app restart.
    pub fn redeliver(&self, purchase: &PlatformPurchase) -> Result<()> {
        self.send(PlatformEvent::PurchaseSucceeded(purchase.clone()))
    }

    fn make_purchase(&self, product_id: &str) -> PlatformPurchase {
        let transaction_id = {
            let mut state = self.state.lock();
            let id = state.next_transaction;
            state.next_transaction += 1;
            format!("fake-{id}")
        };
        let receipt = match self.store {
            AppStore::Apple => PurchaseReceipt::Apple {
                receipt: format!("receipt:{transaction_id}"),
            },
            AppStore::Google => PurchaseReceipt::Google {
                purchase_data: format!("{{\"orderId\":\"{transaction_id}\",\"productId\":\"{product_id}\"}}"),
                signature: format!("signature:{transaction_id}"),
            },
        };
        PlatformPurchase {
            product_id: product_id.to_string(),
            transaction_id,
            receipt,
        }
    }

    fn send(&self, event: PlatformEvent) -> Result<()> {
        let sender = self
            .state
            .lock()
            .sender
            .clone()
            .ok_or(EconomyError::NotInitialized("fake store"))?;
        if sender.send(event).is_err() {
            debug!("platform event dropped, the economy is gone");
        }
        Ok(())
    }
}

#[async_trait]
impl PurchasingPlatform for FakePurchasingPlatform {
    fn store(&self) -> AppStore {
        self.store
    }

    async fn initialize(
        &self,
        products: &[ProductDefinition],
        events: PlatformEventSender,
    ) -> Result<()> {
        if self.fail_initialize {
            return Err(EconomyError::Purchase {
                product_id: String::new(),
                reason: PurchaseFailureReason::PurchasingUnavailable.to_string(),
                message: "store is not reachable".to_string(),
            });
        }
        let mut state = self.state.lock();
        state.products = products.to_vec();
        state.sender = Some(events);
        Ok(())
    }

    fn initiate_purchase(&self, product_id: &str) -> Result<()> {
        let (outcome, known) = {
            let state = self.state.lock();
            let known = state
                .products
                .iter()
                .any(|product| product.product_id == product_id);
            (state.outcome, known)
        };

        let failure = |reason: PurchaseFailureReason, code: &str| {
            PlatformEvent::PurchaseFailed(PurchaseFailure {
                product_id: product_id.to_string(),
                reason,
                message: format!("fake store refused {product_id}"),
                store_error_code: Some(code.to_string()),
            })
        };
        let event = match outcome {
            _ if !known => failure(PurchaseFailureReason::ProductUnavailable, "404"),
            FakeOutcome::Succeed => PlatformEvent::PurchaseSucceeded(self.make_purchase(product_id)),
            FakeOutcome::Fail(reason) => failure(reason, "402"),
            FakeOutcome::Hang => return Ok(()),
        };
        self.send(event)
    }

    fn confirm_pending_purchase(&self, purchase: &PlatformPurchase) {
        self.state.lock().confirmed.push(purchase.clone());
    }

    fn restore_purchases(&self) -> Result<()> {
        let restored: Vec<PlatformPurchase> = {
            let state = self.state.lock();
            state
                .confirmed
                .iter()
                .filter(|purchase| {
                    state.products.iter().any(|product| {
                        product.product_id == purchase.product_id
                            && product.product_type == ProductType::NonConsumable
                    })
                })
                .cloned()
                .collect()
        };
        for purchase in restored {
            self.send(PlatformEvent::PurchaseSucceeded(purchase))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn gems() -> ProductDefinition {
        ProductDefinition {
            product_id: "gems".to_string(),
            product_type: ProductType::Consumable,
        }
    }

    #[tokio::test]
    async fn test_successful_purchase_is_reported() {
        let store = FakePurchasingPlatform::new(AppStore::Google);
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.initialize(&[gems()], tx).await.unwrap();

        store.initiate_purchase("gems").unwrap();
        match rx.recv().await.unwrap() {
            PlatformEvent::PurchaseSucceeded(purchase) => {
                assert_eq!(purchase.product_id, "gems");
                assert!(matches!(purchase.receipt, PurchaseReceipt::Google { .. }));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_product_fails_with_store_code() {
        let store = FakePurchasingPlatform::new(AppStore::Apple);
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.initialize(&[gems()], tx).await.unwrap();

        store.initiate_purchase("coins").unwrap();
        match rx.recv().await.unwrap() {
            PlatformEvent::PurchaseFailed(failure) => {
                assert_eq!(failure.reason, PurchaseFailureReason::ProductUnavailable);
                assert_eq!(failure.store_error_code.as_deref(), Some("404"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_background_purchase_requires_initialization() {
        let store = FakePurchasingPlatform::new(AppStore::Apple);
        assert!(matches!(
            store.simulate_background_purchase("gems"),
            Err(EconomyError::NotInitialized(_))
        ));
    }
}
