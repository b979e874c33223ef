use crate::domain::catalog::Catalog;
use crate::domain::ports::{DataLayer, DataSnapshot};
use crate::domain::transaction::{
    CostExchangeData, CurrencyAmount, ExchangeDefinition, ItemGrant, RewardExchangeData,
    TransactionExchangeData,
};
use crate::error::{EconomyError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    balances: BTreeMap<String, i64>,
    items: Vec<ItemGrant>,
    redeemed_receipts: HashSet<String>,
}

impl State {
    fn balance(&self, currency: &str) -> i64 {
        self.balances.get(currency).copied().unwrap_or(0)
    }

    fn has_item(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }
}

fn rejected(reason: impl Into<String>) -> EconomyError {
    EconomyError::DataLayer(reason.into())
}

/// Authoritative data layer kept in process memory.
///
/// It validates and fulfills transactions against its own copy of the player state,
/// the way a backend would, and hands the resulting deltas back to the economy.
/// Cloning shares the underlying state.
#[derive(Clone)]
pub struct InMemoryDataLayer {
    catalog: Arc<Catalog>,
    state: Arc<RwLock<State>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryDataLayer {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            state: Arc::new(RwLock::new(State::default())),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts from previously persisted player state.
    pub fn with_snapshot(catalog: Arc<Catalog>, snapshot: DataSnapshot) -> Self {
        let state = State {
            balances: snapshot
                .balances
                .into_iter()
                .map(|line| (line.currency, line.amount))
                .collect(),
            items: snapshot.items,
            redeemed_receipts: HashSet::new(),
        };
        Self {
            catalog,
            state: Arc::new(RwLock::new(state)),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// While offline every call fails with a data layer error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(rejected("data layer is offline"));
        }
        Ok(())
    }

    fn check_cap(&self, currency: &str, balance: i64) -> Result<()> {
        let definition = self
            .catalog
            .currency(currency)
            .ok_or_else(|| rejected(format!("unknown currency '{currency}'")))?;
        if !definition.accepts(balance) {
            return Err(rejected(format!(
                "'{currency}' balance {balance} is out of bounds"
            )));
        }
        Ok(())
    }

    /// Grants a reward template, generating ids for new items.
    fn grant(&self, state: &mut State, rewards: &ExchangeDefinition) -> Result<RewardExchangeData> {
        for line in &rewards.currencies {
            let key = &line.currency.key;
            self.check_cap(key, state.balance(key).saturating_add(line.amount))?;
        }

        let mut granted = RewardExchangeData::default();
        for line in &rewards.currencies {
            *state.balances.entry(line.currency.key.clone()).or_default() += line.amount;
            granted.currencies.push(CurrencyAmount {
                currency: line.currency.key.clone(),
                amount: line.amount,
            });
        }
        for line in &rewards.items {
            for _ in 0..line.amount {
                let grant = ItemGrant {
                    definition: line.item.key.clone(),
                    id: Uuid::new_v4().to_string(),
                };
                state.items.push(grant.clone());
                granted.items.push(grant);
            }
        }
        Ok(granted)
    }

    async fn redeem(&self, transaction_key: &str, receipt: String) -> Result<TransactionExchangeData> {
        self.ensure_online()?;
        let tx = self
            .catalog
            .iap_transaction(transaction_key)
            .ok_or_else(|| rejected(format!("unknown IAP transaction '{transaction_key}'")))?;

        let mut state = self.state.write().await;
        if state.redeemed_receipts.contains(&receipt) {
            return Err(rejected(format!(
                "receipt for '{}' was already redeemed",
                tx.product_id
            )));
        }
        let rewards = self.grant(&mut state, &tx.rewards)?;
        state.redeemed_receipts.insert(receipt);
        Ok(TransactionExchangeData {
            costs: CostExchangeData::default(),
            rewards,
        })
    }
}

#[async_trait]
impl DataLayer for InMemoryDataLayer {
    async fn get_data(&self) -> Result<DataSnapshot> {
        self.ensure_online()?;
        let state = self.state.read().await;
        Ok(DataSnapshot {
            balances: state
                .balances
                .iter()
                .map(|(currency, amount)| CurrencyAmount {
                    currency: currency.clone(),
                    amount: *amount,
                })
                .collect(),
            items: state.items.clone(),
        })
    }

    async fn create_item(&self, definition_key: &str, id: &str) -> Result<()> {
        self.ensure_online()?;
        if self.catalog.item_definition(definition_key).is_none() {
            return Err(rejected(format!("unknown item definition '{definition_key}'")));
        }
        let mut state = self.state.write().await;
        if state.has_item(id) {
            return Err(rejected(format!("item '{id}' already exists")));
        }
        state.items.push(ItemGrant {
            definition: definition_key.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }

    async fn delete_item(&self, id: &str) -> Result<()> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        let before = state.items.len();
        state.items.retain(|item| item.id != id);
        if state.items.len() == before {
            return Err(rejected(format!("item '{id}' does not exist")));
        }
        Ok(())
    }

    async fn set_balance(&self, currency_key: &str, balance: i64) -> Result<()> {
        self.ensure_online()?;
        self.check_cap(currency_key, balance)?;
        let mut state = self.state.write().await;
        state.balances.insert(currency_key.to_string(), balance);
        Ok(())
    }

    async fn add_balance(&self, currency_key: &str, amount: i64) -> Result<()> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        let balance = state.balance(currency_key).saturating_add(amount);
        self.check_cap(currency_key, balance)?;
        state.balances.insert(currency_key.to_string(), balance);
        Ok(())
    }

    async fn remove_balance(&self, currency_key: &str, amount: i64) -> Result<()> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        let balance = state.balance(currency_key) - amount;
        self.check_cap(currency_key, balance)?;
        state.balances.insert(currency_key.to_string(), balance);
        Ok(())
    }

    async fn make_virtual_transaction(
        &self,
        transaction_key: &str,
        cost_item_ids: &[String],
    ) -> Result<TransactionExchangeData> {
        self.ensure_online()?;
        let tx = self
            .catalog
            .virtual_transaction(transaction_key)
            .ok_or_else(|| rejected(format!("unknown virtual transaction '{transaction_key}'")))?;

        let mut state = self.state.write().await;
        for line in &tx.costs.currencies {
            let balance = state.balance(&line.currency.key);
            if balance < line.amount {
                return Err(rejected(format!(
                    "'{}' balance {balance} cannot cover {}",
                    line.currency.key, line.amount
                )));
            }
        }

        let mut provided: HashMap<&str, usize> = HashMap::new();
        let mut seen = HashSet::new();
        for id in cost_item_ids {
            if !seen.insert(id.as_str()) {
                return Err(rejected(format!("item '{id}' was listed twice")));
            }
            let item = state
                .items
                .iter()
                .find(|item| &item.id == id)
                .ok_or_else(|| rejected(format!("item '{id}' does not exist")))?;
            if !tx.costs.items.iter().any(|line| line.item.key == item.definition) {
                return Err(rejected(format!("item '{id}' is not part of the cost")));
            }
            *provided.entry(item.definition.as_str()).or_default() += 1;
        }
        let mut required: HashMap<&str, usize> = HashMap::new();
        for line in &tx.costs.items {
            *required.entry(line.item.key.as_str()).or_default() += line.amount;
        }
        for (definition, needed) in &required {
            let given = provided.get(definition).copied().unwrap_or(0);
            if given != *needed {
                return Err(rejected(format!(
                    "'{definition}' needs {needed} items, {given} provided"
                )));
            }
        }
        drop(provided);
        drop(seen);

        // Rewards are capped against the balances left after paying; restore both on failure.
        let saved_balances = state.balances.clone();
        let saved_items = state.items.clone();

        let mut costs = CostExchangeData::default();
        for line in &tx.costs.currencies {
            *state.balances.entry(line.currency.key.clone()).or_default() -= line.amount;
            costs.currencies.push(CurrencyAmount {
                currency: line.currency.key.clone(),
                amount: line.amount,
            });
        }
        state.items.retain(|item| !cost_item_ids.contains(&item.id));
        costs.item_ids = cost_item_ids.to_vec();

        let rewards = match self.grant(&mut state, &tx.rewards) {
            Ok(rewards) => rewards,
            Err(err) => {
                state.balances = saved_balances;
                state.items = saved_items;
                return Err(err);
            }
        };
        Ok(TransactionExchangeData { costs, rewards })
    }

    async fn redeem_apple_iap(
        &self,
        transaction_key: &str,
        receipt: &str,
    ) -> Result<TransactionExchangeData> {
        if receipt.is_empty() {
            return Err(rejected("empty Apple receipt"));
        }
        self.redeem(transaction_key, receipt.to_string()).await
    }

    async fn redeem_google_iap(
        &self,
        transaction_key: &str,
        purchase_data: &str,
        signature: &str,
    ) -> Result<TransactionExchangeData> {
        if purchase_data.is_empty() || signature.is_empty() {
            return Err(rejected("incomplete Google purchase data"));
        }
        self.redeem(transaction_key, purchase_data.to_string()).await
    }
}
