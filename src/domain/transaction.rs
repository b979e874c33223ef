use super::currency::Currency;
use super::item::{InventoryItem, InventoryItemDefinition, Tag};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A currency line of a cost or reward template. The amount is always positive.
#[derive(Debug, PartialEq, Clone)]
pub struct CurrencyExchange {
    pub currency: Arc<Currency>,
    pub amount: i64,
}

/// An item line of a cost or reward template. The amount is always positive.
#[derive(Debug, PartialEq, Clone)]
pub struct ItemExchange {
    pub item: Arc<InventoryItemDefinition>,
    pub amount: usize,
}

/// Cost or reward side of a transaction template.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct ExchangeDefinition {
    pub currencies: Vec<CurrencyExchange>,
    pub items: Vec<ItemExchange>,
}

impl ExchangeDefinition {
    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty() && self.items.is_empty()
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct VirtualTransaction {
    pub key: String,
    pub display_name: String,
    pub tags: Vec<Arc<Tag>>,
    pub costs: ExchangeDefinition,
    pub rewards: ExchangeDefinition,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    #[default]
    Consumable,
    NonConsumable,
}

/// A real-money purchase. The cost is paid on the platform store, so only rewards are virtual.
#[derive(Debug, PartialEq, Clone)]
pub struct IapTransaction {
    pub key: String,
    pub display_name: String,
    pub tags: Vec<Arc<Tag>>,
    pub product_id: String,
    pub product_type: ProductType,
    pub rewards: ExchangeDefinition,
}

/// A linked transaction, dispatched once on its variant by the orchestrator.
#[derive(Debug, Clone)]
pub enum Transaction {
    Virtual(Arc<VirtualTransaction>),
    Iap(Arc<IapTransaction>),
}

impl Transaction {
    pub fn key(&self) -> &str {
        match self {
            Self::Virtual(tx) => &tx.key,
            Self::Iap(tx) => &tx.key,
        }
    }

    pub fn tags(&self) -> &[Arc<Tag>] {
        match self {
            Self::Virtual(tx) => &tx.tags,
            Self::Iap(tx) => &tx.tags,
        }
    }

    pub fn rewards(&self) -> &ExchangeDefinition {
        match self {
            Self::Virtual(tx) => &tx.rewards,
            Self::Iap(tx) => &tx.rewards,
        }
    }

    /// Instance identity, not structural equality.
    pub fn is_same_instance(&self, other: &Transaction) -> bool {
        match (self, other) {
            (Self::Virtual(a), Self::Virtual(b)) => Arc::ptr_eq(a, b),
            (Self::Iap(a), Self::Iap(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct CurrencyAmount {
    pub currency: String,
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct ItemGrant {
    pub definition: String,
    pub id: String,
}

/// Costs actually deducted by the data layer.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct CostExchangeData {
    #[serde(default)]
    pub currencies: Vec<CurrencyAmount>,
    #[serde(default)]
    pub item_ids: Vec<String>,
}

/// Rewards actually granted by the data layer.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct RewardExchangeData {
    #[serde(default)]
    pub currencies: Vec<CurrencyAmount>,
    #[serde(default)]
    pub items: Vec<ItemGrant>,
}

/// Authoritative deltas returned by the data layer for a fulfilled or redeemed transaction.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct TransactionExchangeData {
    #[serde(default)]
    pub costs: CostExchangeData,
    #[serde(default)]
    pub rewards: RewardExchangeData,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionCosts {
    pub currencies: Vec<CurrencyAmount>,
    pub item_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionRewards {
    pub currencies: Vec<CurrencyAmount>,
    pub items: Vec<Arc<InventoryItem>>,
}

/// What a completed transaction actually cost and granted.
#[derive(Debug, Clone, Default)]
pub struct TransactionResult {
    pub costs: TransactionCosts,
    pub rewards: TransactionRewards,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    Initiated,
    LocallyValidating,
    AwaitingDataLayer,
    Reconciling,
    Succeeded,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iap(key: &str) -> Arc<IapTransaction> {
        Arc::new(IapTransaction {
            key: key.to_string(),
            display_name: key.to_string(),
            tags: Vec::new(),
            product_id: format!("com.game.{key}"),
            product_type: ProductType::Consumable,
            rewards: ExchangeDefinition::default(),
        })
    }

    #[test]
    fn test_same_instance_uses_identity() {
        let shared = iap("gems");
        let a = Transaction::Iap(shared.clone());
        let b = Transaction::Iap(shared);
        let c = Transaction::Iap(iap("gems"));

        assert!(a.is_same_instance(&b));
        assert!(!a.is_same_instance(&c));
    }

    #[test]
    fn test_exchange_data_tolerates_missing_sections() {
        let data: TransactionExchangeData =
            serde_json::from_str(r#"{"rewards":{"currencies":[{"currency":"gem","amount":5}]}}"#)
                .unwrap();
        assert!(data.costs.currencies.is_empty());
        assert_eq!(data.rewards.currencies[0].amount, 5);
    }
}
