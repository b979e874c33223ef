//! Catalog linker.
//!
//! Turns authored templates into immutable, fully linked catalogs in two phases:
//! every template compiles itself in isolation, then every cross reference is
//! resolved. A `Catalog` is only handed out once both phases succeed.

pub mod config;

use self::config::{
    CatalogConfig, CurrencyConfig, ExchangeConfig, ItemDefinitionConfig, ParameterConfig,
    StoreConfig, TagConfig, TransactionConfig,
};
use crate::domain::currency::Currency;
use crate::domain::item::{InventoryItemDefinition, PropertyValue, Tag};
use crate::domain::transaction::{
    CurrencyExchange, ExchangeDefinition, IapTransaction, ItemExchange, ProductType, Transaction,
    VirtualTransaction,
};
use crate::error::{EconomyError, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A linked store: an ordered shelf of transactions.
#[derive(Debug, Clone)]
pub struct StoreDefinition {
    pub key: String,
    pub display_name: String,
    pub transactions: Vec<Transaction>,
}

/// Immutable lookup tables produced by [`CatalogBuilder::build`].
#[derive(Debug, Default)]
pub struct Catalog {
    tags: BTreeMap<String, Arc<Tag>>,
    currencies: BTreeMap<String, Arc<Currency>>,
    items: BTreeMap<String, Arc<InventoryItemDefinition>>,
    transactions: BTreeMap<String, Transaction>,
    stores: BTreeMap<String, StoreDefinition>,
    parameters: BTreeMap<String, PropertyValue>,
}

impl Catalog {
    pub fn from_config(config: CatalogConfig) -> Result<Self> {
        CatalogBuilder::from_config(config)?.build()
    }

    pub fn tag(&self, key: &str) -> Option<&Arc<Tag>> {
        self.tags.get(key)
    }

    pub fn currency(&self, key: &str) -> Option<&Arc<Currency>> {
        self.currencies.get(key)
    }

    pub fn currencies(&self) -> impl Iterator<Item = &Arc<Currency>> {
        self.currencies.values()
    }

    pub fn item_definition(&self, key: &str) -> Option<&Arc<InventoryItemDefinition>> {
        self.items.get(key)
    }

    pub fn item_definitions(&self) -> impl Iterator<Item = &Arc<InventoryItemDefinition>> {
        self.items.values()
    }

    pub fn transaction(&self, key: &str) -> Option<&Transaction> {
        self.transactions.get(key)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    pub fn transactions_with_tag<'a>(
        &'a self,
        tag_key: &'a str,
    ) -> impl Iterator<Item = &'a Transaction> + 'a {
        self.transactions
            .values()
            .filter(move |tx| tx.tags().iter().any(|tag| tag.key == tag_key))
    }

    pub fn virtual_transaction(&self, key: &str) -> Option<&Arc<VirtualTransaction>> {
        match self.transactions.get(key) {
            Some(Transaction::Virtual(tx)) => Some(tx),
            _ => None,
        }
    }

    pub fn iap_transaction(&self, key: &str) -> Option<&Arc<IapTransaction>> {
        match self.transactions.get(key) {
            Some(Transaction::Iap(tx)) => Some(tx),
            _ => None,
        }
    }

    pub fn iap_transaction_by_product(&self, product_id: &str) -> Option<&Arc<IapTransaction>> {
        self.transactions.values().find_map(|tx| match tx {
            Transaction::Iap(iap) if iap.product_id == product_id => Some(iap),
            _ => None,
        })
    }

    /// Every platform product the catalog sells, with its product type.
    pub fn iap_products(&self) -> Vec<(String, ProductType)> {
        self.transactions
            .values()
            .filter_map(|tx| match tx {
                Transaction::Iap(iap) => Some((iap.product_id.clone(), iap.product_type)),
                Transaction::Virtual(_) => None,
            })
            .collect()
    }

    pub fn store(&self, key: &str) -> Option<&StoreDefinition> {
        self.stores.get(key)
    }

    pub fn stores(&self) -> impl Iterator<Item = &StoreDefinition> {
        self.stores.values()
    }

    pub fn parameter(&self, key: &str) -> Option<&PropertyValue> {
        self.parameters.get(key)
    }
}

/// Collects authored templates and builds a [`Catalog`].
///
/// Duplicate keys are rejected when a template is added, before any build runs.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    config: CatalogConfig,
    keys: HashSet<(&'static str, String)>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: CatalogConfig) -> Result<Self> {
        let mut builder = Self::new();
        for tag in config.tags {
            builder.add_tag(tag)?;
        }
        for currency in config.currencies {
            builder.add_currency(currency)?;
        }
        for item in config.items {
            builder.add_item(item)?;
        }
        for tx in config.transactions {
            builder.add_transaction(tx)?;
        }
        for store in config.stores {
            builder.add_store(store)?;
        }
        for parameter in config.parameters {
            builder.add_parameter(parameter)?;
        }
        Ok(builder)
    }

    fn register(&mut self, kind: &'static str, key: &str) -> Result<()> {
        if !self.keys.insert((kind, key.to_string())) {
            return Err(EconomyError::DuplicateKey {
                kind,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    pub fn add_tag(&mut self, tag: TagConfig) -> Result<&mut Self> {
        self.register("tag", &tag.key)?;
        self.config.tags.push(tag);
        Ok(self)
    }

    pub fn add_currency(&mut self, currency: CurrencyConfig) -> Result<&mut Self> {
        self.register("currency", &currency.key)?;
        self.config.currencies.push(currency);
        Ok(self)
    }

    pub fn add_item(&mut self, item: ItemDefinitionConfig) -> Result<&mut Self> {
        self.register("item", &item.key)?;
        self.config.items.push(item);
        Ok(self)
    }

    pub fn add_transaction(&mut self, tx: TransactionConfig) -> Result<&mut Self> {
        self.register("transaction", tx.key())?;
        self.config.transactions.push(tx);
        Ok(self)
    }

    pub fn add_store(&mut self, store: StoreConfig) -> Result<&mut Self> {
        self.register("store", &store.key)?;
        self.config.stores.push(store);
        Ok(self)
    }

    pub fn add_parameter(&mut self, parameter: ParameterConfig) -> Result<&mut Self> {
        self.register("parameter", &parameter.key)?;
        self.config.parameters.push(parameter);
        Ok(self)
    }

    /// Compiles every template, then links them.
    pub fn build(self) -> Result<Catalog> {
        self.compile()?;
        let catalog = link(self.config)?;
        debug!(
            currencies = catalog.currencies.len(),
            items = catalog.items.len(),
            transactions = catalog.transactions.len(),
            "catalog built"
        );
        Ok(catalog)
    }

    fn compile(&self) -> Result<()> {
        let config = &self.config;
        config.tags.iter().try_for_each(TagConfig::compile)?;
        config.currencies.iter().try_for_each(CurrencyConfig::compile)?;
        config.items.iter().try_for_each(ItemDefinitionConfig::compile)?;
        config
            .transactions
            .iter()
            .try_for_each(TransactionConfig::compile)?;
        config.stores.iter().try_for_each(StoreConfig::compile)?;
        config.parameters.iter().try_for_each(ParameterConfig::compile)
    }
}

fn unresolved(owner: &str, kind: &'static str, key: &str) -> EconomyError {
    EconomyError::UnresolvedReference {
        owner: owner.to_string(),
        kind,
        key: key.to_string(),
    }
}

fn link_tags(
    tags: &BTreeMap<String, Arc<Tag>>,
    owner: &str,
    keys: &[String],
) -> Result<Vec<Arc<Tag>>> {
    keys.iter()
        .map(|key| {
            tags.get(key)
                .cloned()
                .ok_or_else(|| unresolved(owner, "tag", key))
        })
        .collect()
}

fn link_exchange(
    currencies: &BTreeMap<String, Arc<Currency>>,
    items: &BTreeMap<String, Arc<InventoryItemDefinition>>,
    owner: &str,
    exchange: &ExchangeConfig,
) -> Result<ExchangeDefinition> {
    let currencies = exchange
        .currencies
        .iter()
        .map(|line| {
            let currency = currencies
                .get(&line.key)
                .cloned()
                .ok_or_else(|| unresolved(owner, "currency", &line.key))?;
            Ok(CurrencyExchange {
                currency,
                amount: line.amount,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let items = exchange
        .items
        .iter()
        .map(|line| {
            let item = items
                .get(&line.key)
                .cloned()
                .ok_or_else(|| unresolved(owner, "item", &line.key))?;
            Ok(ItemExchange {
                item,
                amount: line.amount as usize,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ExchangeDefinition { currencies, items })
}

fn display_name(name: Option<String>, key: &str) -> String {
    name.unwrap_or_else(|| key.to_string())
}

fn link(config: CatalogConfig) -> Result<Catalog> {
    let tags: BTreeMap<_, _> = config
        .tags
        .into_iter()
        .map(|tag| (tag.key.clone(), Arc::new(Tag { key: tag.key })))
        .collect();

    let currencies: BTreeMap<_, _> = config
        .currencies
        .into_iter()
        .map(|c| {
            let currency = Currency {
                display_name: display_name(c.display_name, &c.key),
                key: c.key.clone(),
                currency_type: c.currency_type,
                maximum_balance: c.maximum_balance,
            };
            (c.key, Arc::new(currency))
        })
        .collect();

    let mut items = BTreeMap::new();
    for item in config.items {
        let definition = InventoryItemDefinition {
            tags: link_tags(&tags, &item.key, &item.tags)?,
            display_name: display_name(item.display_name, &item.key),
            key: item.key.clone(),
            default_properties: item.properties.into_iter().collect(),
        };
        items.insert(item.key, Arc::new(definition));
    }

    let mut transactions = BTreeMap::new();
    for tx in config.transactions {
        let linked = match tx {
            TransactionConfig::Virtual(tx) => Transaction::Virtual(Arc::new(VirtualTransaction {
                tags: link_tags(&tags, &tx.key, &tx.tags)?,
                costs: link_exchange(&currencies, &items, &tx.key, &tx.costs)?,
                rewards: link_exchange(&currencies, &items, &tx.key, &tx.rewards)?,
                display_name: display_name(tx.display_name, &tx.key),
                key: tx.key,
            })),
            TransactionConfig::Iap(tx) => Transaction::Iap(Arc::new(IapTransaction {
                tags: link_tags(&tags, &tx.key, &tx.tags)?,
                rewards: link_exchange(&currencies, &items, &tx.key, &tx.rewards)?,
                display_name: display_name(tx.display_name, &tx.key),
                product_id: tx.product_id,
                product_type: tx.product_type,
                key: tx.key,
            })),
        };
        transactions.insert(linked.key().to_string(), linked);
    }

    let mut products = HashSet::new();
    for tx in transactions.values() {
        if let Transaction::Iap(iap) = tx
            && !products.insert(iap.product_id.as_str())
        {
            return Err(EconomyError::DuplicateKey {
                kind: "product",
                key: iap.product_id.clone(),
            });
        }
    }

    let mut stores = BTreeMap::new();
    for store in config.stores {
        let shelf = store
            .transactions
            .iter()
            .map(|key| {
                transactions
                    .get(key)
                    .cloned()
                    .ok_or_else(|| unresolved(&store.key, "transaction", key))
            })
            .collect::<Result<Vec<_>>>()?;
        stores.insert(
            store.key.clone(),
            StoreDefinition {
                display_name: display_name(store.display_name, &store.key),
                key: store.key,
                transactions: shelf,
            },
        );
    }

    let parameters = config
        .parameters
        .into_iter()
        .map(|p| (p.key, p.value))
        .collect();

    Ok(Catalog {
        tags,
        currencies,
        items,
        transactions,
        stores,
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::config::{ExchangeLineConfig, IapTransactionConfig, VirtualTransactionConfig};
    use super::*;

    fn sample_config() -> CatalogConfig {
        serde_json::from_str(
            r#"{
                "tags": [{"key": "weapon"}],
                "currencies": [
                    {"key": "coin", "maximum_balance": 0},
                    {"key": "gem", "type": "hard", "maximum_balance": 500}
                ],
                "items": [
                    {"key": "sword", "tags": ["weapon"], "properties": {"durability": 100}}
                ],
                "transactions": [
                    {"kind": "virtual", "key": "buy_sword", "tags": ["weapon"],
                     "costs": {"currencies": [{"key": "coin", "amount": 25}]},
                     "rewards": {"items": [{"key": "sword", "amount": 1}]}},
                    {"kind": "iap", "key": "gem_pack", "product_id": "com.game.gems",
                     "rewards": {"currencies": [{"key": "gem", "amount": 100}]}}
                ],
                "stores": [{"key": "armory", "transactions": ["buy_sword", "gem_pack"]}],
                "parameters": [{"key": "difficulty", "value": 2}]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_build_links_references() {
        let catalog = Catalog::from_config(sample_config()).unwrap();

        let buy = catalog.virtual_transaction("buy_sword").unwrap();
        assert!(Arc::ptr_eq(
            &buy.costs.currencies[0].currency,
            catalog.currency("coin").unwrap()
        ));
        assert!(Arc::ptr_eq(
            &buy.rewards.items[0].item,
            catalog.item_definition("sword").unwrap()
        ));

        let armory = catalog.store("armory").unwrap();
        assert_eq!(armory.transactions.len(), 2);
        assert!(armory.transactions[0].is_same_instance(catalog.transaction("buy_sword").unwrap()));

        assert_eq!(
            catalog.iap_transaction_by_product("com.game.gems").unwrap().key,
            "gem_pack"
        );
        assert_eq!(catalog.parameter("difficulty"), Some(&PropertyValue::Int(2)));
        assert_eq!(catalog.transactions_with_tag("weapon").count(), 1);
    }

    #[test]
    fn test_duplicate_key_is_rejected_before_build() {
        let mut builder = CatalogBuilder::new();
        builder
            .add_tag(TagConfig {
                key: "weapon".to_string(),
            })
            .unwrap();

        let err = builder
            .add_tag(TagConfig {
                key: "weapon".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, EconomyError::DuplicateKey { kind: "tag", .. }));
    }

    #[test]
    fn test_unresolved_currency_names_missing_key() {
        let mut builder = CatalogBuilder::new();
        builder
            .add_transaction(TransactionConfig::Virtual(VirtualTransactionConfig {
                key: "buy".to_string(),
                display_name: None,
                tags: Vec::new(),
                costs: ExchangeConfig {
                    currencies: vec![ExchangeLineConfig {
                        key: "ruby".to_string(),
                        amount: 3,
                    }],
                    items: Vec::new(),
                },
                rewards: ExchangeConfig::default(),
            }))
            .unwrap();

        let err = builder.build().unwrap_err();
        match err {
            EconomyError::UnresolvedReference { owner, kind, key } => {
                assert_eq!(owner, "buy");
                assert_eq!(kind, "currency");
                assert_eq!(key, "ruby");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_compile_failure_names_offending_key() {
        let mut builder = CatalogBuilder::new();
        builder
            .add_currency(CurrencyConfig {
                key: "coin".to_string(),
                display_name: None,
                currency_type: Default::default(),
                maximum_balance: -5,
            })
            .unwrap();

        let err = builder.build().unwrap_err();
        assert!(matches!(err, EconomyError::InvalidDefinition { key, .. } if key == "coin"));
    }

    #[test]
    fn test_two_iap_transactions_cannot_share_a_product() {
        let mut builder = CatalogBuilder::new();
        for key in ["a", "b"] {
            builder
                .add_transaction(TransactionConfig::Iap(IapTransactionConfig {
                    key: key.to_string(),
                    display_name: None,
                    tags: Vec::new(),
                    product_id: "com.game.same".to_string(),
                    product_type: ProductType::Consumable,
                    rewards: ExchangeConfig::default(),
                }))
                .unwrap();
        }

        assert!(matches!(
            builder.build(),
            Err(EconomyError::DuplicateKey { kind: "product", .. })
        ));
    }

    #[test]
    fn test_store_with_unknown_transaction_fails() {
        let mut config = sample_config();
        config.stores[0].transactions.push("missing".to_string());

        assert!(matches!(
            Catalog::from_config(config),
            Err(EconomyError::UnresolvedReference { kind: "transaction", .. })
        ));
    }
}
