//! Transaction orchestration.
//!
//! A [`TransactionManager`] owns one virtual and one IAP in-flight slot. Each accepted
//! transaction runs on its own task that drives the state machine and completes the
//! [`Deferred`] handed back to the caller. IAP transactions also depend on the purchase
//! loop, which drains platform notifications and feeds the purchasing adapter.

use super::economy::EconomyCore;
use super::purchasing::{NextPurchase, PurchasingAdapter};
use crate::config::EconomySettings;
use crate::domain::deferred::{Completer, Deferred, deferred};
use crate::domain::events::EconomyEvent;
use crate::domain::purchase::{
    AppStore, PlatformEvent, PlatformEventReceiver, PlatformPurchase, ProductDefinition,
    PurchaseFailureReason, PurchaseReceipt,
};
use crate::domain::transaction::{
    IapTransaction, ProductType, Transaction, TransactionExchangeData, TransactionResult,
    TransactionState, VirtualTransaction,
};
use crate::error::{EconomyError, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const VIRTUAL_STEPS: u32 = 3;
const IAP_STEPS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    Virtual,
    Iap,
}

#[derive(Default)]
struct Slot {
    active: Option<Transaction>,
    state: TransactionState,
}

#[derive(Default)]
struct Slots {
    virtual_slot: Slot,
    iap_slot: Slot,
}

impl Slots {
    fn get_mut(&mut self, kind: SlotKind) -> &mut Slot {
        match kind {
            SlotKind::Virtual => &mut self.virtual_slot,
            SlotKind::Iap => &mut self.iap_slot,
        }
    }
}

struct ManagerInner {
    core: Arc<EconomyCore>,
    purchasing: Option<Arc<PurchasingAdapter>>,
    settings: EconomySettings,
    slots: Mutex<Slots>,
    purchase_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.purchase_loop.get_mut().take() {
            handle.abort();
        }
    }
}

/// A running transaction's claim on its slot.
///
/// If the task ends without calling [`InFlight::finish`], for instance because it
/// panicked, dropping the claim vacates the slot and rejects with
/// [`EconomyError::Abandoned`].
struct InFlight {
    inner: Arc<ManagerInner>,
    kind: SlotKind,
    key: String,
    completer: Option<Completer<TransactionResult>>,
}

impl InFlight {
    fn new(
        inner: Arc<ManagerInner>,
        kind: SlotKind,
        key: String,
        completer: Completer<TransactionResult>,
    ) -> Self {
        Self {
            inner,
            kind,
            key,
            completer: Some(completer),
        }
    }

    fn completer(&self) -> Option<&Completer<TransactionResult>> {
        self.completer.as_ref()
    }

    fn finish(mut self, outcome: Result<TransactionResult>) {
        if let Some(completer) = self.completer.take() {
            self.inner.finish(self.kind, &self.key, completer, outcome);
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(completer) = self.completer.take() {
            warn!(transaction = %self.key, "transaction task ended before completing");
            self.inner
                .finish(self.kind, &self.key, completer, Err(EconomyError::Abandoned));
        }
    }
}

/// Single-flight executor for virtual and IAP transactions.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl TransactionManager {
    pub(crate) fn new(
        core: Arc<EconomyCore>,
        purchasing: Option<Arc<PurchasingAdapter>>,
        settings: EconomySettings,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                core,
                purchasing,
                settings,
                slots: Mutex::new(Slots::default()),
                purchase_loop: Mutex::new(None),
            }),
        }
    }

    /// Initializes the platform with the catalog's products and starts the purchase loop.
    ///
    /// A failed initialization is reported through `PurchasingInitializeFailed` and
    /// leaves IAP transactions unavailable.
    pub(crate) async fn start_purchasing(&self) {
        let Some(purchasing) = self.inner.purchasing.clone() else {
            return;
        };
        let products: Vec<ProductDefinition> = self
            .inner
            .core
            .catalog
            .iap_products()
            .into_iter()
            .map(|(product_id, product_type)| ProductDefinition {
                product_id,
                product_type,
            })
            .collect();

        let (sender, receiver) = mpsc::unbounded_channel();
        match purchasing.initialize(&products, sender).await {
            Ok(()) => {
                self.inner.core.events.emit(&EconomyEvent::PurchasingInitialized);
                let handle = spawn_purchase_loop(&self.inner, receiver);
                *self.inner.purchase_loop.lock() = Some(handle);
            }
            Err(err) => {
                warn!(error = %err, "purchasing initialization failed");
                self.inner
                    .core
                    .events
                    .emit(&EconomyEvent::PurchasingInitializeFailed {
                        reason: err.to_string(),
                    });
            }
        }
    }

    pub fn begin_transaction_by_key(
        &self,
        key: &str,
        cost_item_ids: Option<Vec<String>>,
    ) -> Result<Deferred<TransactionResult>> {
        let transaction = self
            .inner
            .core
            .catalog
            .transaction(key)
            .cloned()
            .ok_or_else(|| EconomyError::UnknownTransaction(key.to_string()))?;
        self.begin_transaction(&transaction, cost_item_ids)
    }

    /// Starts `transaction` and returns a handle to its outcome.
    ///
    /// Argument and single-flight violations are returned here and change nothing.
    /// Everything else, including unaffordable costs, rejects the returned handle.
    pub fn begin_transaction(
        &self,
        transaction: &Transaction,
        cost_item_ids: Option<Vec<String>>,
    ) -> Result<Deferred<TransactionResult>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| EconomyError::NotInitialized("no async runtime is running"))?;

        let linked = self
            .inner
            .core
            .catalog
            .transaction(transaction.key())
            .is_some_and(|known| known.is_same_instance(transaction));
        if !linked {
            return Err(EconomyError::UnknownTransaction(
                transaction.key().to_string(),
            ));
        }

        let kind = match transaction {
            Transaction::Virtual(_) => SlotKind::Virtual,
            Transaction::Iap(_) => {
                let ready = self
                    .inner
                    .purchasing
                    .as_ref()
                    .is_some_and(|purchasing| purchasing.is_initialized());
                if !ready {
                    return Err(EconomyError::NotInitialized("purchasing"));
                }
                SlotKind::Iap
            }
        };
        self.inner.occupy(kind, transaction)?;

        let key = transaction.key().to_string();
        info!(transaction = %key, "transaction initiated");
        self.inner
            .core
            .events
            .emit(&EconomyEvent::TransactionInitiated {
                transaction: key.clone(),
            });

        let (completer, deferred) = deferred();
        match transaction {
            Transaction::Virtual(tx) => {
                self.inner.checkpoint(&key, Some(&completer), 0, VIRTUAL_STEPS);
                let flight = InFlight::new(self.inner.clone(), SlotKind::Virtual, key, completer);
                let tx = tx.clone();
                runtime.spawn(async move {
                    let outcome = flight
                        .inner
                        .execute_virtual(&tx, cost_item_ids.as_deref(), flight.completer())
                        .await;
                    flight.finish(outcome);
                });
            }
            Transaction::Iap(tx) => {
                if cost_item_ids.is_some() {
                    debug!(transaction = %key, "cost item ids ignored for an IAP transaction");
                }
                self.inner.checkpoint(&key, Some(&completer), 0, IAP_STEPS);
                let flight = InFlight::new(self.inner.clone(), SlotKind::Iap, key, completer);
                let tx = tx.clone();
                runtime.spawn(async move {
                    let outcome = flight.inner.execute_iap(&tx, flight.completer()).await;
                    flight.finish(outcome);
                });
            }
        }
        Ok(deferred)
    }

    pub fn virtual_state(&self) -> TransactionState {
        self.inner.slots.lock().virtual_slot.state
    }

    pub fn iap_state(&self) -> TransactionState {
        self.inner.slots.lock().iap_slot.state
    }

    pub fn active_virtual_transaction(&self) -> Option<Transaction> {
        self.inner.slots.lock().virtual_slot.active.clone()
    }

    pub fn active_iap_transaction(&self) -> Option<Transaction> {
        self.inner.slots.lock().iap_slot.active.clone()
    }

    pub fn is_purchasing_initialized(&self) -> bool {
        self.inner
            .purchasing
            .as_ref()
            .is_some_and(|purchasing| purchasing.is_initialized())
    }

    pub fn is_product_owned(&self, product_id: &str) -> bool {
        self.inner
            .purchasing
            .as_ref()
            .is_some_and(|purchasing| purchasing.is_product_owned(product_id))
    }

    pub fn owned_products(&self) -> Vec<String> {
        self.inner
            .purchasing
            .as_ref()
            .map(|purchasing| purchasing.owned_products())
            .unwrap_or_default()
    }

    pub fn reset_owned_products(&self) -> Result<()> {
        self.inner.purchasing()?.reset_owned()
    }

    pub fn restore_purchases(&self) -> Result<()> {
        self.inner.purchasing()?.platform().restore_purchases()
    }

    pub fn unprocessed_purchases(&self) -> Vec<PlatformPurchase> {
        self.inner
            .purchasing
            .as_ref()
            .map(|purchasing| purchasing.unprocessed_purchases())
            .unwrap_or_default()
    }

    /// Redeems a parked background purchase. On failure it stays parked.
    pub async fn process_unprocessed_purchase(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionResult> {
        let purchasing = self.inner.purchasing()?;
        let purchase = purchasing.take_unprocessed(transaction_id).ok_or_else(|| {
            EconomyError::InvalidArgument(format!(
                "no unprocessed purchase with transaction id '{transaction_id}'"
            ))
        })?;
        let outcome = self.inner.redeem_background(&purchase).await;
        if outcome.is_err() {
            purchasing.park_unprocessed(purchase);
        }
        outcome
    }

    /// Stops the purchase loop. Transactions already running still complete.
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.purchase_loop.lock().take() {
            handle.abort();
            debug!("purchase loop stopped");
        }
    }
}

impl ManagerInner {
    fn purchasing(&self) -> Result<&Arc<PurchasingAdapter>> {
        self.purchasing
            .as_ref()
            .ok_or(EconomyError::NotInitialized("purchasing"))
    }

    fn occupy(&self, kind: SlotKind, transaction: &Transaction) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(kind);
        if let Some(active) = &slot.active {
            let requested = transaction.key().to_string();
            if active.is_same_instance(transaction) {
                return Err(EconomyError::AlreadyProcessing(requested));
            }
            let active = active.key().to_string();
            return Err(match kind {
                SlotKind::Virtual => EconomyError::AnotherTransactionInProgress { requested, active },
                SlotKind::Iap => EconomyError::AnotherPurchaseInProgress { requested, active },
            });
        }
        slot.active = Some(transaction.clone());
        slot.state = TransactionState::Initiated;
        Ok(())
    }

    fn set_state(&self, kind: SlotKind, state: TransactionState) {
        self.slots.lock().get_mut(kind).state = state;
    }

    fn checkpoint(
        &self,
        key: &str,
        completer: Option<&Completer<TransactionResult>>,
        current: u32,
        total: u32,
    ) {
        if let Some(completer) = completer {
            completer.set_progress(current, total);
        }
        self.core.events.emit(&EconomyEvent::TransactionProgressed {
            transaction: key.to_string(),
            current,
            total,
        });
    }

    /// Vacates the slot, publishes the outcome and completes the caller's handle.
    fn finish(
        &self,
        kind: SlotKind,
        key: &str,
        completer: Completer<TransactionResult>,
        outcome: Result<TransactionResult>,
    ) {
        {
            let mut slots = self.slots.lock();
            let slot = slots.get_mut(kind);
            slot.active = None;
            slot.state = if outcome.is_ok() {
                TransactionState::Succeeded
            } else {
                TransactionState::Failed
            };
        }
        match outcome {
            Ok(result) => {
                self.report_success(key, &result);
                completer.resolve(result);
            }
            Err(err) => {
                self.report_failure(key, &err);
                completer.reject(err);
            }
        }
    }

    fn report_success(&self, key: &str, result: &TransactionResult) {
        info!(transaction = %key, "transaction succeeded");
        self.core.events.emit(&EconomyEvent::TransactionSucceeded {
            transaction: key.to_string(),
            result: result.clone(),
        });
    }

    fn report_failure(&self, key: &str, err: &EconomyError) {
        warn!(transaction = %key, error = %err, "transaction failed");
        self.core.events.emit(&EconomyEvent::TransactionFailed {
            transaction: key.to_string(),
            error: err.to_string(),
        });
    }

    async fn execute_virtual(
        &self,
        tx: &VirtualTransaction,
        cost_item_ids: Option<&[String]>,
        completer: Option<&Completer<TransactionResult>>,
    ) -> Result<TransactionResult> {
        self.set_state(SlotKind::Virtual, TransactionState::LocallyValidating);
        let selected = self.core.validate_costs(tx, cost_item_ids)?;
        self.checkpoint(&tx.key, completer, 1, VIRTUAL_STEPS);

        self.set_state(SlotKind::Virtual, TransactionState::AwaitingDataLayer);
        self.core.flush_sync().await;
        let data = self
            .core
            .data_layer
            .make_virtual_transaction(&tx.key, &selected)
            .await?;
        self.checkpoint(&tx.key, completer, 2, VIRTUAL_STEPS);

        let result = self.core.apply_exchange(&tx.key, &data)?;
        self.checkpoint(&tx.key, completer, 3, VIRTUAL_STEPS);
        Ok(result)
    }

    async fn execute_iap(
        &self,
        tx: &Arc<IapTransaction>,
        completer: Option<&Completer<TransactionResult>>,
    ) -> Result<TransactionResult> {
        let purchasing = self.purchasing()?;

        self.set_state(SlotKind::Iap, TransactionState::LocallyValidating);
        if tx.product_type == ProductType::NonConsumable
            && purchasing.is_product_owned(&tx.product_id)
        {
            return Err(EconomyError::Purchase {
                product_id: tx.product_id.clone(),
                reason: PurchaseFailureReason::DuplicateTransaction.to_string(),
                message: "product is already owned".to_string(),
            });
        }

        self.set_state(SlotKind::Iap, TransactionState::Reconciling);
        let receiver = purchasing.register_pending(&tx.product_id);
        if let Err(err) = purchasing.platform().initiate_purchase(&tx.product_id) {
            purchasing.clear_pending();
            return Err(err);
        }
        let purchase = receiver.await.map_err(|_| EconomyError::Abandoned)??;
        self.checkpoint(&tx.key, completer, 1, IAP_STEPS);

        // The adapter keeps the queue blocked until this purchase is redeemed.
        self.set_state(SlotKind::Iap, TransactionState::AwaitingDataLayer);
        let outcome = self.redeem(tx, &purchase, completer).await;
        purchasing.finish_validation();
        outcome
    }

    /// Redeems a validated purchase, applies its rewards and confirms it at the platform.
    async fn redeem(
        &self,
        tx: &IapTransaction,
        purchase: &PlatformPurchase,
        completer: Option<&Completer<TransactionResult>>,
    ) -> Result<TransactionResult> {
        let purchasing = self.purchasing()?;
        let data_layer = &self.core.data_layer;
        self.core.flush_sync().await;

        let data = match (purchasing.platform().store(), &purchase.receipt) {
            (AppStore::Apple, PurchaseReceipt::Apple { receipt }) => {
                data_layer.redeem_apple_iap(&tx.key, receipt).await?
            }
            (
                AppStore::Google,
                PurchaseReceipt::Google {
                    purchase_data,
                    signature,
                },
            ) => {
                data_layer
                    .redeem_google_iap(&tx.key, purchase_data, signature)
                    .await?
            }
            (store, _) => {
                return Err(EconomyError::ReceiptValidation {
                    product_id: purchase.product_id.clone(),
                    message: format!("receipt was not issued by the {store:?} store"),
                });
            }
        };
        self.checkpoint(&tx.key, completer, 2, IAP_STEPS);

        if !data.costs.currencies.is_empty() || !data.costs.item_ids.is_empty() {
            warn!(transaction = %tx.key, "redemption returned costs; only rewards are applied");
        }
        let rewards = TransactionExchangeData {
            costs: Default::default(),
            rewards: data.rewards,
        };
        let result = self.core.apply_exchange(&tx.key, &rewards)?;
        self.checkpoint(&tx.key, completer, 3, IAP_STEPS);

        if tx.product_type == ProductType::NonConsumable
            && let Err(err) = purchasing.record_owned(&tx.product_id)
        {
            warn!(product_id = %tx.product_id, error = %err, "could not persist owned product");
        }
        purchasing.platform().confirm_pending_purchase(purchase);
        self.checkpoint(&tx.key, completer, 4, IAP_STEPS);
        Ok(result)
    }

    /// Redeems a purchase nobody is waiting on, publishing the usual transaction events.
    async fn redeem_background(&self, purchase: &PlatformPurchase) -> Result<TransactionResult> {
        let purchasing = self.purchasing()?;
        let tx = self
            .core
            .catalog
            .iap_transaction_by_product(&purchase.product_id)
            .cloned()
            .ok_or_else(|| EconomyError::UnknownTransaction(purchase.product_id.clone()))?;

        info!(transaction = %tx.key, product_id = %purchase.product_id, "redeeming background purchase");
        self.core.events.emit(&EconomyEvent::TransactionInitiated {
            transaction: tx.key.clone(),
        });
        self.checkpoint(&tx.key, None, 0, IAP_STEPS);

        let outcome = match purchasing.validate(purchase) {
            Ok(()) => {
                self.checkpoint(&tx.key, None, 1, IAP_STEPS);
                self.redeem(&tx, purchase, None).await
            }
            Err(err) => Err(err),
        };
        match &outcome {
            Ok(result) => self.report_success(&tx.key, result),
            Err(err) => self.report_failure(&tx.key, err),
        }
        outcome
    }

    fn handle_platform_event(&self, event: PlatformEvent) {
        let Some(purchasing) = &self.purchasing else {
            return;
        };
        match event {
            PlatformEvent::PurchaseSucceeded(purchase) => {
                debug!(product_id = %purchase.product_id, transaction_id = %purchase.transaction_id, "purchase reported");
                purchasing.enqueue(purchase);
            }
            PlatformEvent::PurchaseFailed(failure) => {
                purchasing.fail_pending(failure);
            }
        }
    }

    /// One tick of the purchase loop.
    async fn process_next_purchase(&self) {
        let Some(purchasing) = &self.purchasing else {
            return;
        };
        let Some(NextPurchase::Background(purchase)) = purchasing.next_purchase() else {
            return;
        };

        if self.settings.process_background_purchases {
            if let Err(err) = self.redeem_background(&purchase).await {
                warn!(product_id = %purchase.product_id, error = %err, "background purchase not redeemed");
            }
        } else {
            purchasing.park_unprocessed(purchase);
        }
        purchasing.finish_validation();
    }
}

fn spawn_purchase_loop(inner: &Arc<ManagerInner>, mut events: PlatformEventReceiver) -> JoinHandle<()> {
    let weak: Weak<ManagerInner> = Arc::downgrade(inner);
    let period = inner.settings.purchase_tick();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut open = true;
        loop {
            tokio::select! {
                event = events.recv(), if open => match event {
                    Some(event) => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.handle_platform_event(event);
                    }
                    None => {
                        debug!("platform event channel closed");
                        open = false;
                    }
                },
                _ = ticker.tick() => {
                    let Some(inner) = weak.upgrade() else { break };
                    inner.process_next_purchase().await;
                }
            }
        }
    })
}
