//! Authored catalog templates.
//!
//! These are the shapes read from the catalog document. Each template can `compile`
//! itself in isolation; cross references are only resolved by the linker.

use crate::domain::currency::CurrencyType;
use crate::domain::item::PropertyValue;
use crate::domain::transaction::ProductType;
use crate::error::{EconomyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct CatalogConfig {
    #[serde(default)]
    pub tags: Vec<TagConfig>,
    #[serde(default)]
    pub currencies: Vec<CurrencyConfig>,
    #[serde(default)]
    pub items: Vec<ItemDefinitionConfig>,
    #[serde(default)]
    pub transactions: Vec<TransactionConfig>,
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct TagConfig {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct CurrencyConfig {
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub currency_type: CurrencyType,
    #[serde(default)]
    pub maximum_balance: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ItemDefinitionConfig {
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

/// A `(key, amount)` line referring to a currency or an item definition.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct ExchangeLineConfig {
    pub key: String,
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub currencies: Vec<ExchangeLineConfig>,
    #[serde(default)]
    pub items: Vec<ExchangeLineConfig>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct VirtualTransactionConfig {
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub costs: ExchangeConfig,
    #[serde(default)]
    pub rewards: ExchangeConfig,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct IapTransactionConfig {
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub product_id: String,
    #[serde(default)]
    pub product_type: ProductType,
    #[serde(default)]
    pub rewards: ExchangeConfig,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransactionConfig {
    Virtual(VirtualTransactionConfig),
    Iap(IapTransactionConfig),
}

impl TransactionConfig {
    pub fn key(&self) -> &str {
        match self {
            Self::Virtual(tx) => &tx.key,
            Self::Iap(tx) => &tx.key,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct StoreConfig {
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub transactions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ParameterConfig {
    pub key: String,
    pub value: PropertyValue,
}

fn invalid(key: &str, reason: impl Into<String>) -> EconomyError {
    EconomyError::InvalidDefinition {
        key: key.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(invalid(key, "key must not be empty"));
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || *c == '.'))
    {
        return Err(invalid(key, format!("key contains invalid character '{c}'")));
    }
    Ok(())
}

impl ExchangeConfig {
    fn compile(&self, owner: &str) -> Result<()> {
        for line in self.currencies.iter().chain(&self.items) {
            if line.amount <= 0 {
                return Err(invalid(
                    owner,
                    format!("amount for '{}' must be positive, got {}", line.key, line.amount),
                ));
            }
        }
        Ok(())
    }
}

impl TagConfig {
    pub fn compile(&self) -> Result<()> {
        validate_key(&self.key)
    }
}

impl CurrencyConfig {
    pub fn compile(&self) -> Result<()> {
        validate_key(&self.key)?;
        if self.maximum_balance < 0 {
            return Err(invalid(&self.key, "maximum_balance must not be negative"));
        }
        Ok(())
    }
}

impl ItemDefinitionConfig {
    pub fn compile(&self) -> Result<()> {
        validate_key(&self.key)?;
        if let Some(name) = self.properties.keys().find(|name| name.is_empty()) {
            return Err(invalid(&self.key, format!("property name '{name}' is empty")));
        }
        Ok(())
    }
}

impl TransactionConfig {
    pub fn compile(&self) -> Result<()> {
        match self {
            Self::Virtual(tx) => {
                validate_key(&tx.key)?;
                tx.costs.compile(&tx.key)?;
                tx.rewards.compile(&tx.key)
            }
            Self::Iap(tx) => {
                validate_key(&tx.key)?;
                if tx.product_id.trim().is_empty() {
                    return Err(invalid(&tx.key, "product_id must not be empty"));
                }
                tx.rewards.compile(&tx.key)
            }
        }
    }
}

impl StoreConfig {
    pub fn compile(&self) -> Result<()> {
        validate_key(&self.key)
    }
}

impl ParameterConfig {
    pub fn compile(&self) -> Result<()> {
        validate_key(&self.key)
    }
}
