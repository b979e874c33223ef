//! Economy facade.
//!
//! `Economy` owns the wallet ledger and the inventory registry, mirrors public
//! mutations to the data layer, and exposes the transaction manager.

use super::purchasing::PurchasingAdapter;
use super::transactions::TransactionManager;
use crate::config::EconomySettings;
use crate::domain::catalog::Catalog;
use crate::domain::deferred::Deferred;
use crate::domain::events::{EconomyEvent, EventBus};
use crate::domain::inventory::InventoryRegistry;
use crate::domain::item::{InventoryItem, ItemHandle};
use crate::domain::ports::{
    DataLayerBox, DataSnapshot, PurchasingPlatformBox, ReceiptValidatorBox,
};
use crate::domain::purchase::PlatformPurchase;
use crate::domain::transaction::{
    Transaction, TransactionCosts, TransactionExchangeData, TransactionResult, TransactionRewards,
    VirtualTransaction,
};
use crate::domain::wallet::WalletLedger;
use crate::error::{CostViolation, EconomyError, Result};
use crate::infrastructure::owned_products::OwnedProductsFile;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// State shared by the facade and the transaction manager.
pub(crate) struct EconomyCore {
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) wallet: Mutex<WalletLedger>,
    pub(crate) inventory: Mutex<InventoryRegistry>,
    pub(crate) data_layer: DataLayerBox,
    pub(crate) events: EventBus,
    sync_queue: Option<mpsc::UnboundedSender<SyncRequest>>,
}

fn mismatch(transaction: &str, reason: impl Into<String>) -> EconomyError {
    EconomyError::DataLayerMismatch {
        transaction: transaction.to_string(),
        reason: reason.into(),
    }
}

/// Sums amounts per key, keeping first-seen order.
fn aggregate<'a, I>(lines: I) -> Vec<(&'a str, i64)>
where
    I: IntoIterator<Item = (&'a str, i64)>,
{
    let mut totals: Vec<(&str, i64)> = Vec::new();
    for (key, amount) in lines {
        match totals.iter_mut().find(|(seen, _)| *seen == key) {
            Some((_, total)) => *total = total.saturating_add(amount),
            None => totals.push((key, amount)),
        }
    }
    totals
}

impl EconomyCore {
    fn new(catalog: Arc<Catalog>, data_layer: DataLayerBox, events: EventBus) -> Self {
        Self {
            wallet: Mutex::new(WalletLedger::new(catalog.clone(), events.clone())),
            inventory: Mutex::new(InventoryRegistry::new(catalog.clone(), events.clone())),
            catalog,
            data_layer,
            events,
            sync_queue: spawn_sync_worker(),
        }
    }

    fn load(&self, snapshot: DataSnapshot) -> Result<()> {
        let mut wallet = self.wallet.lock();
        for balance in &snapshot.balances {
            if !wallet.set_balance_internal(&balance.currency, balance.amount)? {
                return Err(EconomyError::InvalidArgument(format!(
                    "stored balance {} of '{}' exceeds its maximum",
                    balance.amount, balance.currency
                )));
            }
        }
        drop(wallet);

        let mut inventory = self.inventory.lock();
        for item in snapshot.items {
            inventory.create_item_internal(&item.definition, Some(item.id))?;
        }
        debug!(
            balances = snapshot.balances.len(),
            items = inventory.count(),
            "economy state loaded"
        );
        Ok(())
    }

    /// Checks that the player can pay for `tx` and picks the items to consume.
    ///
    /// With explicit ids every id must be live, listed once and belong to an item cost,
    /// and each cost definition must receive exactly its required count.
    /// Without them the oldest items of each cost definition are selected.
    pub(crate) fn validate_costs(
        &self,
        tx: &VirtualTransaction,
        explicit_item_ids: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let wallet = self.wallet.lock();
        let inventory = self.inventory.lock();
        let mut violations = Vec::new();

        let currency_costs = aggregate(
            tx.costs
                .currencies
                .iter()
                .map(|cost| (cost.currency.key.as_str(), cost.amount)),
        );
        for (currency, required) in currency_costs {
            let available = wallet.get_balance(currency)?;
            if available < required {
                violations.push(CostViolation::InsufficientCurrency {
                    currency: currency.to_string(),
                    required,
                    available,
                });
            }
        }

        let item_costs = aggregate(
            tx.costs
                .items
                .iter()
                .map(|cost| (cost.item.key.as_str(), cost.amount as i64)),
        );
        let mut selected = Vec::new();
        match explicit_item_ids {
            Some(ids) => {
                let mut seen = HashSet::new();
                let mut provided: HashMap<String, usize> = HashMap::new();
                for id in ids {
                    if !seen.insert(id.as_str()) {
                        violations.push(CostViolation::DuplicateItem(id.clone()));
                        continue;
                    }
                    let Some(item) = inventory.find_item(id) else {
                        violations.push(CostViolation::UnknownItem(id.clone()));
                        continue;
                    };
                    let definition = item.raw_definition_key();
                    if !item_costs.iter().any(|(key, _)| *key == definition) {
                        violations.push(CostViolation::UnexpectedItem(id.clone()));
                        continue;
                    }
                    *provided.entry(definition.to_string()).or_default() += 1;
                }
                for (definition, required) in &item_costs {
                    let available = provided.get(*definition).copied().unwrap_or(0);
                    let required = *required as usize;
                    if available < required {
                        violations.push(CostViolation::InsufficientItems {
                            definition: definition.to_string(),
                            required,
                            available,
                        });
                    } else if available > required {
                        violations.push(CostViolation::SurplusItems {
                            definition: definition.to_string(),
                            required,
                            provided: available,
                        });
                    }
                }
                selected.extend(ids.iter().cloned());
            }
            None => {
                for (definition, required) in &item_costs {
                    let candidates = inventory.find_items_by_definition(definition);
                    let required = *required as usize;
                    if candidates.len() < required {
                        violations.push(CostViolation::InsufficientItems {
                            definition: definition.to_string(),
                            required,
                            available: candidates.len(),
                        });
                        continue;
                    }
                    selected.extend(
                        candidates
                            .iter()
                            .take(required)
                            .map(|item| item.raw_id().to_string()),
                    );
                }
            }
        }

        if !violations.is_empty() {
            return Err(EconomyError::CostViolations {
                transaction: tx.key.clone(),
                violations,
            });
        }
        Ok(selected)
    }

    /// Applies authoritative deltas to the ledger and registry, all or nothing.
    ///
    /// Every delta is checked against local state first; a mismatch applies nothing.
    pub(crate) fn apply_exchange(
        &self,
        transaction: &str,
        data: &TransactionExchangeData,
    ) -> Result<TransactionResult> {
        let mut wallet = self.wallet.lock();
        let mut inventory = self.inventory.lock();

        let costs = aggregate(
            data.costs
                .currencies
                .iter()
                .map(|line| (line.currency.as_str(), line.amount)),
        );
        let rewards = aggregate(
            data.rewards
                .currencies
                .iter()
                .map(|line| (line.currency.as_str(), line.amount)),
        );
        if let Some((currency, amount)) = costs.iter().chain(&rewards).find(|(_, a)| *a < 0) {
            return Err(mismatch(
                transaction,
                format!("negative amount {amount} for '{currency}'"),
            ));
        }

        let mut net: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
        for (currency, amount) in &costs {
            net.entry(*currency).or_default().0 = *amount;
        }
        for (currency, amount) in &rewards {
            net.entry(*currency).or_default().1 = *amount;
        }
        for (currency, (cost, reward)) in &net {
            let balance = wallet
                .get_balance(currency)
                .map_err(|err| mismatch(transaction, err.to_string()))?;
            if *cost > balance {
                return Err(mismatch(
                    transaction,
                    format!("cannot deduct {cost} '{currency}' from {balance}"),
                ));
            }
            let Some(result) = balance
                .checked_sub(*cost)
                .and_then(|remaining| remaining.checked_add(*reward))
            else {
                return Err(mismatch(
                    transaction,
                    format!("'{currency}' overflows when granting {reward}"),
                ));
            };
            if !wallet.can_hold(currency, result)? {
                return Err(mismatch(
                    transaction,
                    format!("'{currency}' would end at {result}, outside its bounds"),
                ));
            }
        }

        let mut consumed = HashSet::new();
        for id in &data.costs.item_ids {
            if !consumed.insert(id.as_str()) || !inventory.contains(id) {
                return Err(mismatch(transaction, format!("cannot consume item '{id}'")));
            }
        }
        let mut granted = HashSet::new();
        for grant in &data.rewards.items {
            if self.catalog.item_definition(&grant.definition).is_none() {
                return Err(mismatch(
                    transaction,
                    format!("unknown item definition '{}'", grant.definition),
                ));
            }
            if grant.id.is_empty() {
                continue;
            }
            let clashes = inventory.contains(&grant.id) && !consumed.contains(grant.id.as_str());
            if clashes || !granted.insert(grant.id.as_str()) {
                return Err(mismatch(
                    transaction,
                    format!("item id '{}' is already taken", grant.id),
                ));
            }
        }

        for id in &data.costs.item_ids {
            inventory.remove_item_internal(id);
        }
        for (currency, amount) in &costs {
            if !wallet.remove_balance_internal(currency, *amount)? {
                return Err(mismatch(transaction, format!("deducting '{currency}' failed")));
            }
        }
        let mut items = Vec::with_capacity(data.rewards.items.len());
        for grant in &data.rewards.items {
            let id = (!grant.id.is_empty()).then(|| grant.id.clone());
            items.push(inventory.create_item_internal(&grant.definition, id)?);
        }
        for (currency, amount) in &rewards {
            if !wallet.add_balance_internal(currency, *amount)? {
                return Err(mismatch(transaction, format!("granting '{currency}' failed")));
            }
        }

        Ok(TransactionResult {
            costs: TransactionCosts {
                currencies: data.costs.currencies.clone(),
                item_ids: data.costs.item_ids.clone(),
            },
            rewards: TransactionRewards {
                currencies: data.rewards.currencies.clone(),
                items,
            },
        })
    }

    /// Queues a data layer mirror call. Calls run one at a time in submission order;
    /// failures are only logged.
    fn sync<F>(&self, operation: String, call: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let Some(queue) = &self.sync_queue else {
            warn!(%operation, "no async runtime, data layer sync skipped");
            return;
        };
        let request = SyncRequest::Call {
            operation,
            call: Box::pin(call),
        };
        if let Err(mpsc::error::SendError(request)) = queue.send(request)
            && let SyncRequest::Call { operation, .. } = request
        {
            warn!(%operation, "sync worker stopped, data layer sync skipped");
        }
    }

    /// Waits until every mirror call queued so far has reached the data layer.
    pub(crate) async fn flush_sync(&self) {
        let Some(queue) = &self.sync_queue else {
            return;
        };
        let (done, flushed) = oneshot::channel();
        if queue.send(SyncRequest::Flush(done)).is_ok() {
            let _ = flushed.await;
        }
    }
}

type SyncCall = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

enum SyncRequest {
    Call { operation: String, call: SyncCall },
    Flush(oneshot::Sender<()>),
}

fn spawn_sync_worker() -> Option<mpsc::UnboundedSender<SyncRequest>> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let (queue, mut requests) = mpsc::unbounded_channel::<SyncRequest>();
    runtime.spawn(async move {
        while let Some(request) = requests.recv().await {
            match request {
                SyncRequest::Call { operation, call } => {
                    if let Err(err) = call.await {
                        warn!(%operation, error = %err, "data layer sync failed");
                    }
                }
                SyncRequest::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    });
    Some(queue)
}

/// Assembles an [`Economy`]: loads persisted state and starts purchasing when a
/// platform is configured.
pub struct EconomyBuilder {
    catalog: Arc<Catalog>,
    data_layer: DataLayerBox,
    settings: EconomySettings,
    events: EventBus,
    platform: Option<PurchasingPlatformBox>,
    validator: Option<ReceiptValidatorBox>,
}

impl EconomyBuilder {
    pub fn new(catalog: Arc<Catalog>, data_layer: DataLayerBox) -> Self {
        Self {
            catalog,
            data_layer,
            settings: EconomySettings::default(),
            events: EventBus::new(),
            platform: None,
            validator: None,
        }
    }

    pub fn settings(mut self, settings: EconomySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Uses an existing bus so listeners subscribed before `build` see startup events.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn purchasing(mut self, platform: PurchasingPlatformBox) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn receipt_validator(mut self, validator: ReceiptValidatorBox) -> Self {
        self.validator = Some(validator);
        self
    }

    pub async fn build(self) -> Result<Economy> {
        let core = Arc::new(EconomyCore::new(
            self.catalog,
            self.data_layer,
            self.events,
        ));
        let snapshot = core.data_layer.get_data().await?;
        core.load(snapshot)?;

        let adapter = self.platform.map(|platform| {
            let owned_file = self
                .settings
                .owned_products_path
                .as_ref()
                .map(OwnedProductsFile::new);
            Arc::new(PurchasingAdapter::new(platform, self.validator, owned_file))
        });

        let transactions = TransactionManager::new(core.clone(), adapter, self.settings);
        transactions.start_purchasing().await;

        Ok(Economy { core, transactions })
    }
}

/// Player wallet, inventory and transactions backed by a data layer.
#[derive(Clone)]
pub struct Economy {
    core: Arc<EconomyCore>,
    transactions: TransactionManager,
}

impl Economy {
    pub fn builder(catalog: Arc<Catalog>, data_layer: DataLayerBox) -> EconomyBuilder {
        EconomyBuilder::new(catalog, data_layer)
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.core.catalog
    }

    pub fn events(&self) -> &EventBus {
        &self.core.events
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&EconomyEvent) + Send + Sync + 'static,
    {
        self.core.events.subscribe(listener);
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    // Wallet

    pub fn get_balance(&self, currency: &str) -> Result<i64> {
        self.core.wallet.lock().get_balance(currency)
    }

    pub fn balances(&self) -> Vec<(String, i64)> {
        self.core.wallet.lock().balances()
    }

    pub fn set_balance(&self, currency: &str, balance: i64) -> Result<bool> {
        let (changed, applied) = {
            let mut wallet = self.core.wallet.lock();
            let before = wallet.get_balance(currency)?;
            let applied = wallet.set_balance_internal(currency, balance)?;
            (applied && before != balance, applied)
        };
        if changed {
            let data_layer = self.core.data_layer.clone();
            let key = currency.to_string();
            self.core.sync(format!("set_balance {currency}"), async move {
                data_layer.set_balance(&key, balance).await
            });
        }
        Ok(applied)
    }

    pub fn add_balance(&self, currency: &str, amount: i64) -> Result<bool> {
        let applied = self.core.wallet.lock().add_balance_internal(currency, amount)?;
        if applied && amount > 0 {
            let data_layer = self.core.data_layer.clone();
            let key = currency.to_string();
            self.core.sync(format!("add_balance {currency}"), async move {
                data_layer.add_balance(&key, amount).await
            });
        }
        Ok(applied)
    }

    pub fn remove_balance(&self, currency: &str, amount: i64) -> Result<bool> {
        let applied = self
            .core
            .wallet
            .lock()
            .remove_balance_internal(currency, amount)?;
        if applied && amount > 0 {
            let data_layer = self.core.data_layer.clone();
            let key = currency.to_string();
            self.core.sync(format!("remove_balance {currency}"), async move {
                data_layer.remove_balance(&key, amount).await
            });
        }
        Ok(applied)
    }

    // Inventory

    pub fn create_item(&self, definition: &str, id: Option<String>) -> Result<Arc<InventoryItem>> {
        let item = self.core.inventory.lock().create_item_internal(definition, id)?;
        let data_layer = self.core.data_layer.clone();
        let (definition, id) = (definition.to_string(), item.raw_id().to_string());
        self.core.sync(format!("create_item {id}"), async move {
            data_layer.create_item(&definition, &id).await
        });
        Ok(item)
    }

    pub fn remove_item(&self, id: &str) -> bool {
        let removed = self.core.inventory.lock().remove_item_internal(id);
        if removed {
            self.sync_deletes([id.to_string()]);
        }
        removed
    }

    pub fn remove_items_by_definition(&self, definition: &str) -> Result<usize> {
        let mut scratch = Vec::new();
        let removed = self
            .core
            .inventory
            .lock()
            .remove_items_by_definition_internal(definition, &mut scratch)?;
        self.sync_deletes(scratch.iter().map(|item| item.raw_id().to_string()));
        Ok(removed)
    }

    pub fn remove_all_items(&self) -> usize {
        let mut scratch = Vec::new();
        let removed = self
            .core
            .inventory
            .lock()
            .remove_all_items_internal(&mut scratch);
        self.sync_deletes(scratch.iter().map(|item| item.raw_id().to_string()));
        removed
    }

    fn sync_deletes(&self, ids: impl IntoIterator<Item = String>) {
        for id in ids {
            let data_layer = self.core.data_layer.clone();
            self.core.sync(format!("delete_item {id}"), async move {
                data_layer.delete_item(&id).await
            });
        }
    }

    pub fn find_item(&self, id: &str) -> Option<Arc<InventoryItem>> {
        self.core.inventory.lock().find_item(id)
    }

    pub fn find_item_by_handle(&self, handle: ItemHandle) -> Option<Arc<InventoryItem>> {
        self.core.inventory.lock().find_item_by_handle(handle)
    }

    pub fn find_items_by_definition(&self, definition: &str) -> Vec<Arc<InventoryItem>> {
        self.core.inventory.lock().find_items_by_definition(definition)
    }

    pub fn find_items_by_tag(&self, tag: &str) -> Vec<Arc<InventoryItem>> {
        self.core.inventory.lock().find_items_by_tag(tag)
    }

    pub fn items(&self) -> Vec<Arc<InventoryItem>> {
        self.core.inventory.lock().items()
    }

    // Transactions

    pub fn begin_transaction(
        &self,
        transaction: &Transaction,
        cost_item_ids: Option<Vec<String>>,
    ) -> Result<Deferred<TransactionResult>> {
        self.transactions.begin_transaction(transaction, cost_item_ids)
    }

    pub fn begin_transaction_by_key(
        &self,
        key: &str,
        cost_item_ids: Option<Vec<String>>,
    ) -> Result<Deferred<TransactionResult>> {
        self.transactions.begin_transaction_by_key(key, cost_item_ids)
    }

    pub fn is_product_owned(&self, product_id: &str) -> bool {
        self.transactions.is_product_owned(product_id)
    }

    pub fn owned_products(&self) -> Vec<String> {
        self.transactions.owned_products()
    }

    pub fn reset_owned_products(&self) -> Result<()> {
        self.transactions.reset_owned_products()
    }

    pub fn restore_purchases(&self) -> Result<()> {
        self.transactions.restore_purchases()
    }

    pub fn unprocessed_purchases(&self) -> Vec<PlatformPurchase> {
        self.transactions.unprocessed_purchases()
    }

    pub async fn process_unprocessed_purchase(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionResult> {
        self.transactions
            .process_unprocessed_purchase(transaction_id)
            .await
    }

    /// Resolves once every mirrored mutation made so far has reached the data layer.
    pub async fn flush(&self) {
        self.core.flush_sync().await;
    }

    pub fn shutdown(&self) {
        self.transactions.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::config::CatalogConfig;
    use crate::domain::transaction::{CostExchangeData, CurrencyAmount, ItemGrant, RewardExchangeData};
    use crate::infrastructure::in_memory::InMemoryDataLayer;

    fn core() -> EconomyCore {
        let config: CatalogConfig = serde_json::from_str(
            r#"{
                "currencies": [{"key": "coin"}, {"key": "gem", "maximum_balance": 10}],
                "items": [{"key": "sword"}]
            }"#,
        )
        .unwrap();
        let catalog = Arc::new(Catalog::from_config(config).unwrap());
        let data_layer = Arc::new(InMemoryDataLayer::new(catalog.clone()));
        EconomyCore::new(catalog, data_layer, EventBus::new())
    }

    #[test]
    fn test_apply_exchange_is_all_or_nothing() {
        let core = core();
        core.wallet.lock().set_balance_internal("coin", 5).unwrap();
        core.wallet.lock().set_balance_internal("gem", 8).unwrap();

        let data = TransactionExchangeData {
            costs: CostExchangeData {
                currencies: vec![CurrencyAmount {
                    currency: "coin".to_string(),
                    amount: 5,
                }],
                item_ids: Vec::new(),
            },
            rewards: RewardExchangeData {
                currencies: vec![CurrencyAmount {
                    currency: "gem".to_string(),
                    amount: 3,
                }],
                items: vec![ItemGrant {
                    definition: "sword".to_string(),
                    id: "s1".to_string(),
                }],
            },
        };

        let err = core.apply_exchange("trade", &data).unwrap_err();
        assert!(matches!(err, EconomyError::DataLayerMismatch { .. }));
        assert_eq!(core.wallet.lock().get_balance("coin").unwrap(), 5);
        assert_eq!(core.inventory.lock().count(), 0);
    }

    #[test]
    fn test_apply_exchange_generates_missing_ids() {
        let core = core();
        let data = TransactionExchangeData {
            rewards: RewardExchangeData {
                currencies: Vec::new(),
                items: vec![ItemGrant {
                    definition: "sword".to_string(),
                    id: String::new(),
                }],
            },
            ..Default::default()
        };

        let result = core.apply_exchange("gift", &data).unwrap();
        assert_eq!(result.rewards.items.len(), 1);
        assert!(!result.rewards.items[0].id().unwrap().is_empty());
    }

    #[test]
    fn test_apply_exchange_rejects_overflowing_reward() {
        let core = core();
        core.wallet.lock().set_balance_internal("coin", 1).unwrap();
        let data = TransactionExchangeData {
            rewards: RewardExchangeData {
                currencies: vec![CurrencyAmount {
                    currency: "coin".to_string(),
                    amount: i64::MAX,
                }],
                items: Vec::new(),
            },
            ..Default::default()
        };

        let err = core.apply_exchange("jackpot", &data).unwrap_err();
        assert!(matches!(err, EconomyError::DataLayerMismatch { .. }));
        assert_eq!(core.wallet.lock().get_balance("coin").unwrap(), 1);
    }

    #[test]
    fn test_load_rejects_balance_over_cap() {
        let core = core();
        let snapshot = DataSnapshot {
            balances: vec![CurrencyAmount {
                currency: "gem".to_string(),
                amount: 11,
            }],
            items: Vec::new(),
        };
        assert!(matches!(
            core.load(snapshot),
            Err(EconomyError::InvalidArgument(_))
        ));
    }
}
