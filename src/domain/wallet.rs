use super::catalog::Catalog;
use super::events::{EconomyEvent, EventBus};
use crate::error::{EconomyError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// In-memory balance table keyed by currency.
///
/// The `*_internal` operations only touch memory and publish
/// [`EconomyEvent::BalanceChanged`]; synchronizing with the data layer is the caller's job.
/// Bound violations return `Ok(false)`, programmer errors return `Err`.
#[derive(Debug)]
pub struct WalletLedger {
    catalog: Arc<Catalog>,
    balances: BTreeMap<String, i64>,
    events: EventBus,
}

impl WalletLedger {
    pub fn new(catalog: Arc<Catalog>, events: EventBus) -> Self {
        let balances = catalog.currencies().map(|c| (c.key.clone(), 0)).collect();
        Self {
            catalog,
            balances,
            events,
        }
    }

    fn check_currency(&self, key: &str) -> Result<()> {
        if self.catalog.currency(key).is_none() {
            return Err(EconomyError::UnknownCurrency(key.to_string()));
        }
        Ok(())
    }

    fn check_amount(amount: i64) -> Result<()> {
        if amount < 0 {
            return Err(EconomyError::InvalidArgument(format!(
                "amount must not be negative, got {amount}"
            )));
        }
        Ok(())
    }

    pub fn get_balance(&self, key: &str) -> Result<i64> {
        self.check_currency(key)?;
        Ok(self.balances.get(key).copied().unwrap_or(0))
    }

    /// Snapshot of every balance, ordered by currency key.
    pub fn balances(&self) -> Vec<(String, i64)> {
        self.balances
            .iter()
            .map(|(key, balance)| (key.clone(), *balance))
            .collect()
    }

    /// Returns true when `balance` fits the currency's bounds.
    pub fn can_hold(&self, key: &str, balance: i64) -> Result<bool> {
        let currency = self
            .catalog
            .currency(key)
            .ok_or_else(|| EconomyError::UnknownCurrency(key.to_string()))?;
        Ok(currency.accepts(balance))
    }

    fn store(&mut self, key: &str, new: i64) {
        let old = self.balances.insert(key.to_string(), new).unwrap_or(0);
        if old != new {
            self.events.emit(&EconomyEvent::BalanceChanged {
                currency: key.to_string(),
                old,
                new,
            });
        }
    }

    pub fn set_balance_internal(&mut self, key: &str, amount: i64) -> Result<bool> {
        self.check_currency(key)?;
        Self::check_amount(amount)?;
        if !self.can_hold(key, amount)? {
            return Ok(false);
        }
        self.store(key, amount);
        Ok(true)
    }

    pub fn add_balance_internal(&mut self, key: &str, amount: i64) -> Result<bool> {
        let current = self.get_balance(key)?;
        Self::check_amount(amount)?;
        if amount == 0 {
            return Ok(true);
        }
        let Some(new) = current.checked_add(amount) else {
            return Ok(false);
        };
        if !self.can_hold(key, new)? {
            return Ok(false);
        }
        self.store(key, new);
        Ok(true)
    }

    pub fn remove_balance_internal(&mut self, key: &str, amount: i64) -> Result<bool> {
        let current = self.get_balance(key)?;
        Self::check_amount(amount)?;
        if amount == 0 {
            return Ok(true);
        }
        if amount > current {
            return Ok(false);
        }
        self.store(key, current - amount);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::config::{CatalogConfig, CurrencyConfig};
    use parking_lot::Mutex;

    fn ledger(maximum_balance: i64) -> (WalletLedger, Arc<Mutex<Vec<(i64, i64)>>>) {
        let catalog = Catalog::from_config(CatalogConfig {
            currencies: vec![CurrencyConfig {
                key: "coin".to_string(),
                display_name: None,
                currency_type: Default::default(),
                maximum_balance,
            }],
            ..Default::default()
        })
        .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let events = EventBus::new();
        let sink = seen.clone();
        events.subscribe(move |event| {
            if let EconomyEvent::BalanceChanged { old, new, .. } = event {
                sink.lock().push((*old, *new));
            }
        });
        (WalletLedger::new(Arc::new(catalog), events), seen)
    }

    #[test]
    fn test_remove_fires_one_event() {
        let (mut wallet, seen) = ledger(0);
        wallet.set_balance_internal("coin", 50).unwrap();
        seen.lock().clear();

        assert!(wallet.remove_balance_internal("coin", 10).unwrap());
        assert_eq!(wallet.get_balance("coin").unwrap(), 40);
        assert_eq!(*seen.lock(), vec![(50, 40)]);
    }

    #[test]
    fn test_add_over_cap_fails_without_event() {
        let (mut wallet, seen) = ledger(100);
        wallet.set_balance_internal("coin", 40).unwrap();
        seen.lock().clear();

        assert!(!wallet.add_balance_internal("coin", 1_000_000).unwrap());
        assert_eq!(wallet.get_balance("coin").unwrap(), 40);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_remove_more_than_balance_fails() {
        let (mut wallet, seen) = ledger(0);
        wallet.set_balance_internal("coin", 5).unwrap();
        seen.lock().clear();

        let balance = wallet.get_balance("coin").unwrap();
        assert!(!wallet.remove_balance_internal("coin", balance + 1).unwrap());
        assert_eq!(wallet.get_balance("coin").unwrap(), 5);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_zero_amounts_are_silent_noops() {
        let (mut wallet, seen) = ledger(0);
        assert!(wallet.add_balance_internal("coin", 0).unwrap());
        assert!(wallet.remove_balance_internal("coin", 0).unwrap());
        assert!(wallet.set_balance_internal("coin", 0).unwrap());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_negative_amounts_and_unknown_currency_are_errors() {
        let (mut wallet, _) = ledger(0);
        assert!(matches!(
            wallet.add_balance_internal("coin", -1),
            Err(EconomyError::InvalidArgument(_))
        ));
        assert!(matches!(
            wallet.remove_balance_internal("coin", -1),
            Err(EconomyError::InvalidArgument(_))
        ));
        assert!(matches!(
            wallet.set_balance_internal("coin", -1),
            Err(EconomyError::InvalidArgument(_))
        ));
        assert!(matches!(
            wallet.get_balance("gem"),
            Err(EconomyError::UnknownCurrency(_))
        ));
    }

    #[test]
    fn test_set_over_cap_fails() {
        let (mut wallet, _) = ledger(10);
        assert!(!wallet.set_balance_internal("coin", 11).unwrap());
        assert!(wallet.set_balance_internal("coin", 10).unwrap());
    }
}
