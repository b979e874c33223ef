#![allow(dead_code)]

use async_trait::async_trait;
use econ_runtime::application::economy::Economy;
use econ_runtime::config::EconomyConfig;
use econ_runtime::domain::catalog::Catalog;
use econ_runtime::domain::events::{EconomyEvent, EventBus};
use econ_runtime::domain::ports::{DataLayer, DataSnapshot};
use econ_runtime::domain::transaction::TransactionExchangeData;
use econ_runtime::error::{EconomyError, Result};
use econ_runtime::infrastructure::in_memory::InMemoryDataLayer;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const FIXTURE: &str = "tests/fixtures/economy.json";

pub fn config() -> EconomyConfig {
    EconomyConfig::from_path(FIXTURE).expect("fixture catalog should parse")
}

pub fn catalog() -> Arc<Catalog> {
    Arc::new(Catalog::from_config(config().catalog).expect("fixture catalog should link"))
}

/// Data layer that counts virtual transaction calls and can hold them until released.
///
/// Virtual transactions can also be answered with canned deltas or made to panic.
pub struct GatedDataLayer {
    pub inner: InMemoryDataLayer,
    pub virtual_calls: AtomicUsize,
    gate: Option<Semaphore>,
    answer: Mutex<Option<TransactionExchangeData>>,
    crash: AtomicBool,
}

impl GatedDataLayer {
    pub fn open(inner: InMemoryDataLayer) -> Self {
        Self {
            inner,
            virtual_calls: AtomicUsize::new(0),
            gate: None,
            answer: Mutex::new(None),
            crash: AtomicBool::new(false),
        }
    }

    /// Virtual transactions block until [`release`](Self::release) is called.
    pub fn closed(inner: InMemoryDataLayer) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::open(inner)
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn answer_with(&self, data: TransactionExchangeData) {
        *self.answer.lock() = Some(data);
    }

    pub fn crash_on_virtual(&self) {
        self.crash.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.virtual_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataLayer for GatedDataLayer {
    async fn get_data(&self) -> Result<DataSnapshot> {
        self.inner.get_data().await
    }

    async fn create_item(&self, definition_key: &str, id: &str) -> Result<()> {
        self.inner.create_item(definition_key, id).await
    }

    async fn delete_item(&self, id: &str) -> Result<()> {
        self.inner.delete_item(id).await
    }

    async fn set_balance(&self, currency_key: &str, balance: i64) -> Result<()> {
        self.inner.set_balance(currency_key, balance).await
    }

    async fn add_balance(&self, currency_key: &str, amount: i64) -> Result<()> {
        self.inner.add_balance(currency_key, amount).await
    }

    async fn remove_balance(&self, currency_key: &str, amount: i64) -> Result<()> {
        self.inner.remove_balance(currency_key, amount).await
    }

    async fn make_virtual_transaction(
        &self,
        transaction_key: &str,
        cost_item_ids: &[String],
    ) -> Result<TransactionExchangeData> {
        self.virtual_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| EconomyError::DataLayer("gate closed".to_string()))?
                .forget();
        }
        if self.crash.load(Ordering::SeqCst) {
            panic!("data layer crashed");
        }
        if let Some(data) = self.answer.lock().clone() {
            return Ok(data);
        }
        self.inner
            .make_virtual_transaction(transaction_key, cost_item_ids)
            .await
    }

    async fn redeem_apple_iap(
        &self,
        transaction_key: &str,
        receipt: &str,
    ) -> Result<TransactionExchangeData> {
        self.inner.redeem_apple_iap(transaction_key, receipt).await
    }

    async fn redeem_google_iap(
        &self,
        transaction_key: &str,
        purchase_data: &str,
        signature: &str,
    ) -> Result<TransactionExchangeData> {
        self.inner
            .redeem_google_iap(transaction_key, purchase_data, signature)
            .await
    }
}

/// Collects every event published on a bus.
pub fn record_events(bus: &EventBus) -> Arc<Mutex<Vec<EconomyEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    bus.subscribe(move |event| sink.lock().push(event.clone()));
    events
}

pub async fn economy_with(data_layer: Arc<dyn DataLayer>) -> Economy {
    Economy::builder(catalog(), data_layer)
        .settings(config().settings)
        .build()
        .await
        .expect("economy should build")
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
