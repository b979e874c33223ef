use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyType {
    #[default]
    Soft,
    Hard,
}

/// A linked currency definition.
///
/// Built once by the catalog and shared behind an `Arc`; never mutated afterwards.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Currency {
    pub key: String,
    pub display_name: String,
    pub currency_type: CurrencyType,
    /// Upper bound for a balance of this currency. Zero means unlimited.
    pub maximum_balance: i64,
}

impl Currency {
    pub fn is_capped(&self) -> bool {
        self.maximum_balance > 0
    }

    /// Returns true when `balance` is inside the `[0, maximum_balance]` range.
    pub fn accepts(&self, balance: i64) -> bool {
        balance >= 0 && (!self.is_capped() || balance <= self.maximum_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn currency(maximum_balance: i64) -> Currency {
        Currency {
            key: "coin".to_string(),
            display_name: "Coin".to_string(),
            currency_type: CurrencyType::Soft,
            maximum_balance,
        }
    }

    #[test]
    fn test_uncapped_currency_accepts_any_positive_balance() {
        let coin = currency(0);
        assert!(!coin.is_capped());
        assert!(coin.accepts(i64::MAX));
        assert!(!coin.accepts(-1));
    }

    #[test]
    fn test_capped_currency_bounds() {
        let coin = currency(100);
        assert!(coin.accepts(0));
        assert!(coin.accepts(100));
        assert!(!coin.accepts(101));
    }
}
