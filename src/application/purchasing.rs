//! Bridge between the transaction manager and the platform purchasing SDK.
//!
//! The adapter keeps the FIFO of successful platform purchases, the purchase the
//! player is currently waiting on, the purchases parked for manual handling and the
//! set of owned non-consumable products.

use crate::domain::ports::{PurchasingPlatformBox, ReceiptValidatorBox};
use crate::domain::purchase::{
    PlatformEventSender, PlatformPurchase, ProductDefinition, PurchaseFailure,
};
use crate::error::{EconomyError, Result};
use crate::infrastructure::owned_products::OwnedProductsFile;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type PendingResponder = oneshot::Sender<Result<PlatformPurchase>>;

struct PendingPurchase {
    product_id: String,
    responder: PendingResponder,
}

#[derive(Default)]
struct PurchasingState {
    initialized: bool,
    validating: bool,
    queue: VecDeque<PlatformPurchase>,
    in_validation: Option<String>,
    pending: Option<PendingPurchase>,
    unprocessed: Vec<PlatformPurchase>,
    owned: Vec<String>,
}

/// What the purchase loop should do with the next queued purchase.
#[derive(Debug)]
pub enum NextPurchase {
    /// Matches the purchase the player is waiting on; it was handed to that transaction.
    Pending,
    /// Not tied to the in-flight transaction.
    Background(PlatformPurchase),
}

pub struct PurchasingAdapter {
    platform: PurchasingPlatformBox,
    validator: Option<ReceiptValidatorBox>,
    owned_file: Option<OwnedProductsFile>,
    state: Mutex<PurchasingState>,
}

impl PurchasingAdapter {
    pub fn new(
        platform: PurchasingPlatformBox,
        validator: Option<ReceiptValidatorBox>,
        owned_file: Option<OwnedProductsFile>,
    ) -> Self {
        let owned = owned_file
            .as_ref()
            .map(OwnedProductsFile::load)
            .unwrap_or_default();
        Self {
            platform,
            validator,
            owned_file,
            state: Mutex::new(PurchasingState {
                owned,
                ..Default::default()
            }),
        }
    }

    pub fn platform(&self) -> &PurchasingPlatformBox {
        &self.platform
    }

    pub async fn initialize(
        &self,
        products: &[ProductDefinition],
        events: PlatformEventSender,
    ) -> Result<()> {
        self.platform.initialize(products, events).await?;
        self.state.lock().initialized = true;
        info!(products = products.len(), "purchasing initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Queues a successful platform purchase unless the same platform transaction is
    /// already queued or being validated.
    pub fn enqueue(&self, purchase: PlatformPurchase) -> bool {
        let mut state = self.state.lock();
        let duplicate = state.in_validation.as_deref() == Some(purchase.transaction_id.as_str())
            || state
                .queue
                .iter()
                .any(|queued| queued.transaction_id == purchase.transaction_id);
        if duplicate {
            debug!(transaction_id = %purchase.transaction_id, "duplicate purchase notification ignored");
            return false;
        }
        state.queue.push_back(purchase);
        true
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Registers the product the in-flight IAP transaction is buying.
    pub fn register_pending(&self, product_id: &str) -> oneshot::Receiver<Result<PlatformPurchase>> {
        let (responder, receiver) = oneshot::channel();
        self.state.lock().pending = Some(PendingPurchase {
            product_id: product_id.to_string(),
            responder,
        });
        receiver
    }

    pub fn clear_pending(&self) {
        self.state.lock().pending = None;
    }

    /// Rejects the pending purchase if the failure is about its product.
    pub fn fail_pending(&self, failure: PurchaseFailure) -> bool {
        let pending = {
            let mut state = self.state.lock();
            let matches = state
                .pending
                .as_ref()
                .is_some_and(|pending| pending.product_id == failure.product_id);
            if matches { state.pending.take() } else { None }
        };
        match pending {
            Some(pending) => {
                let _ = pending.responder.send(Err(EconomyError::Purchase {
                    product_id: failure.product_id.clone(),
                    reason: failure.reason.to_string(),
                    message: failure.composite_message(),
                }));
                true
            }
            None => {
                warn!(product_id = %failure.product_id, reason = %failure.reason, "purchase failure for a product nobody is waiting on");
                false
            }
        }
    }

    /// One step of the purchase loop.
    ///
    /// Returns `None` when uninitialized, while another purchase is validating, or when
    /// the queue is empty. Otherwise marks the dequeued purchase as validating; the
    /// caller must end that with [`finish_validation`](Self::finish_validation).
    pub fn next_purchase(&self) -> Option<NextPurchase> {
        let (purchase, pending) = {
            let mut state = self.state.lock();
            if !state.initialized || state.validating {
                return None;
            }
            let purchase = state.queue.pop_front()?;
            state.validating = true;
            state.in_validation = Some(purchase.transaction_id.clone());

            let is_pending = state
                .pending
                .as_ref()
                .is_some_and(|pending| pending.product_id == purchase.product_id);
            let pending = if is_pending { state.pending.take() } else { None };
            (purchase, pending)
        };

        let Some(pending) = pending else {
            return Some(NextPurchase::Background(purchase));
        };

        let outcome = self.validate(&purchase).map(|()| purchase);
        let failed = outcome.is_err();
        if pending.responder.send(outcome).is_err() || failed {
            // Nobody will redeem it; free the loop for the next entry.
            self.finish_validation();
        }
        Some(NextPurchase::Pending)
    }

    pub fn validate(&self, purchase: &PlatformPurchase) -> Result<()> {
        match &self.validator {
            Some(validator) => validator.validate(purchase).map_err(|err| {
                EconomyError::ReceiptValidation {
                    product_id: purchase.product_id.clone(),
                    message: err.to_string(),
                }
            }),
            None => Ok(()),
        }
    }

    pub fn finish_validation(&self) {
        let mut state = self.state.lock();
        state.validating = false;
        state.in_validation = None;
    }

    pub fn park_unprocessed(&self, purchase: PlatformPurchase) {
        info!(product_id = %purchase.product_id, "background purchase parked for manual processing");
        self.state.lock().unprocessed.push(purchase);
    }

    pub fn unprocessed_purchases(&self) -> Vec<PlatformPurchase> {
        self.state.lock().unprocessed.clone()
    }

    pub fn take_unprocessed(&self, transaction_id: &str) -> Option<PlatformPurchase> {
        let mut state = self.state.lock();
        let index = state
            .unprocessed
            .iter()
            .position(|purchase| purchase.transaction_id == transaction_id)?;
        Some(state.unprocessed.remove(index))
    }

    pub fn is_product_owned(&self, product_id: &str) -> bool {
        self.state.lock().owned.iter().any(|owned| owned == product_id)
    }

    pub fn owned_products(&self) -> Vec<String> {
        self.state.lock().owned.clone()
    }

    /// Records a redeemed non-consumable and writes the owned list through to disk.
    pub fn record_owned(&self, product_id: &str) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock();
            if state.owned.iter().any(|owned| owned == product_id) {
                return Ok(());
            }
            state.owned.push(product_id.to_string());
            state.owned.clone()
        };
        self.persist(&snapshot)
    }

    pub fn reset_owned(&self) -> Result<()> {
        self.state.lock().owned.clear();
        self.persist(&[])
    }

    fn persist(&self, products: &[String]) -> Result<()> {
        match &self.owned_file {
            Some(file) => file.save(products),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::PurchasingPlatform;
    use crate::domain::purchase::{AppStore, PurchaseFailureReason, PurchaseReceipt};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct NullPlatform;

    #[async_trait]
    impl PurchasingPlatform for NullPlatform {
        fn store(&self) -> AppStore {
            AppStore::Apple
        }

        async fn initialize(
            &self,
            _products: &[ProductDefinition],
            _events: PlatformEventSender,
        ) -> Result<()> {
            Ok(())
        }

        fn initiate_purchase(&self, _product_id: &str) -> Result<()> {
            Ok(())
        }

        fn confirm_pending_purchase(&self, _purchase: &PlatformPurchase) {}

        fn restore_purchases(&self) -> Result<()> {
            Ok(())
        }
    }

    fn purchase(product_id: &str, transaction_id: &str) -> PlatformPurchase {
        PlatformPurchase {
            product_id: product_id.to_string(),
            transaction_id: transaction_id.to_string(),
            receipt: PurchaseReceipt::Apple {
                receipt: "r".to_string(),
            },
        }
    }

    async fn adapter() -> PurchasingAdapter {
        let adapter = PurchasingAdapter::new(Arc::new(NullPlatform), None, None);
        let (events, _rx) = mpsc::unbounded_channel();
        adapter.initialize(&[], events).await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_duplicate_notifications_are_ignored() {
        let adapter = adapter().await;
        assert!(adapter.enqueue(purchase("gems", "t1")));
        assert!(!adapter.enqueue(purchase("gems", "t1")));
        assert!(adapter.enqueue(purchase("gems", "t2")));
        assert_eq!(adapter.queued(), 2);
    }

    #[test]
    fn test_uninitialized_adapter_does_not_dequeue() {
        let adapter = PurchasingAdapter::new(Arc::new(NullPlatform), None, None);
        adapter.enqueue(purchase("gems", "t1"));
        assert!(adapter.next_purchase().is_none());
        assert_eq!(adapter.queued(), 1);
    }

    #[tokio::test]
    async fn test_validating_purchase_blocks_the_queue() {
        let adapter = adapter().await;
        adapter.enqueue(purchase("a", "t1"));
        adapter.enqueue(purchase("b", "t2"));

        assert!(matches!(
            adapter.next_purchase(),
            Some(NextPurchase::Background(p)) if p.transaction_id == "t1"
        ));
        assert!(adapter.next_purchase().is_none());

        adapter.finish_validation();
        assert!(matches!(
            adapter.next_purchase(),
            Some(NextPurchase::Background(p)) if p.transaction_id == "t2"
        ));
    }

    #[tokio::test]
    async fn test_matching_purchase_resolves_pending() {
        let adapter = adapter().await;
        let receiver = adapter.register_pending("gems");
        adapter.enqueue(purchase("gems", "t1"));

        assert!(matches!(adapter.next_purchase(), Some(NextPurchase::Pending)));
        let delivered = receiver.await.unwrap().unwrap();
        assert_eq!(delivered.transaction_id, "t1");
    }

    #[tokio::test]
    async fn test_failure_rejects_pending_with_store_code() {
        let adapter = adapter().await;
        let receiver = adapter.register_pending("gems");

        assert!(adapter.fail_pending(PurchaseFailure {
            product_id: "gems".to_string(),
            reason: PurchaseFailureReason::UserCancelled,
            message: "cancelled".to_string(),
            store_error_code: Some("2".to_string()),
        }));

        match receiver.await.unwrap() {
            Err(EconomyError::Purchase { message, .. }) => {
                assert_eq!(message, "cancelled (store error code 2)");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_owned_products_are_deduplicated() {
        let adapter = adapter().await;
        adapter.record_owned("noads").unwrap();
        adapter.record_owned("noads").unwrap();
        assert_eq!(adapter.owned_products(), vec!["noads".to_string()]);

        adapter.reset_owned().unwrap();
        assert!(!adapter.is_product_owned("noads"));
    }
}
