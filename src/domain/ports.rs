use super::purchase::{AppStore, PlatformEventSender, PlatformPurchase, ProductDefinition};
use super::transaction::{CurrencyAmount, ItemGrant, TransactionExchangeData};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persisted wallet and inventory state handed to the economy at startup.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct DataSnapshot {
    #[serde(default)]
    pub balances: Vec<CurrencyAmount>,
    #[serde(default)]
    pub items: Vec<ItemGrant>,
}

/// Authoritative persistence for the economy.
///
/// The single-item and balance calls mirror local changes and their results are only
/// success or failure. The transaction calls are authoritative and return the deltas
/// the economy must apply locally.
#[async_trait]
pub trait DataLayer: Send + Sync {
    async fn get_data(&self) -> Result<DataSnapshot>;

    async fn create_item(&self, definition_key: &str, id: &str) -> Result<()>;
    async fn delete_item(&self, id: &str) -> Result<()>;

    async fn set_balance(&self, currency_key: &str, balance: i64) -> Result<()>;
    async fn add_balance(&self, currency_key: &str, amount: i64) -> Result<()>;
    async fn remove_balance(&self, currency_key: &str, amount: i64) -> Result<()>;

    async fn make_virtual_transaction(
        &self,
        transaction_key: &str,
        cost_item_ids: &[String],
    ) -> Result<TransactionExchangeData>;

    async fn redeem_apple_iap(
        &self,
        transaction_key: &str,
        receipt: &str,
    ) -> Result<TransactionExchangeData>;

    async fn redeem_google_iap(
        &self,
        transaction_key: &str,
        purchase_data: &str,
        signature: &str,
    ) -> Result<TransactionExchangeData>;
}

/// Real-money purchasing SDK of the running platform.
///
/// Purchase outcomes are reported asynchronously through the sender given to
/// `initialize`, including purchases the player did not just start.
#[async_trait]
pub trait PurchasingPlatform: Send + Sync {
    fn store(&self) -> AppStore;

    async fn initialize(
        &self,
        products: &[ProductDefinition],
        events: PlatformEventSender,
    ) -> Result<()>;

    fn initiate_purchase(&self, product_id: &str) -> Result<()>;

    /// Marks the purchase as fulfilled so the platform stops reporting it.
    fn confirm_pending_purchase(&self, purchase: &PlatformPurchase);

    /// Asks the platform to re-report owned purchases.
    fn restore_purchases(&self) -> Result<()>;
}

/// Local receipt signature check performed before redemption.
pub trait ReceiptValidator: Send + Sync {
    fn validate(&self, purchase: &PlatformPurchase) -> Result<()>;
}

pub type DataLayerBox = Arc<dyn DataLayer>;
pub type PurchasingPlatformBox = Arc<dyn PurchasingPlatform>;
pub type ReceiptValidatorBox = Arc<dyn ReceiptValidator>;
