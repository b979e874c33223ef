use super::transaction::ProductType;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Platform store backing real-money purchases.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum AppStore {
    Apple,
    Google,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct ProductDefinition {
    pub product_id: String,
    pub product_type: ProductType,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "store", rename_all = "lowercase")]
pub enum PurchaseReceipt {
    Apple {
        receipt: String,
    },
    Google {
        purchase_data: String,
        signature: String,
    },
}

/// A successful purchase reported by the platform, not yet confirmed.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct PlatformPurchase {
    pub product_id: String,
    /// Platform-side transaction id; used to drop duplicate notifications.
    pub transaction_id: String,
    pub receipt: PurchaseReceipt,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseFailureReason {
    PurchasingUnavailable,
    ExistingPurchasePending,
    ProductUnavailable,
    SignatureInvalid,
    UserCancelled,
    PaymentDeclined,
    DuplicateTransaction,
    Unknown,
}

impl fmt::Display for PurchaseFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PurchasingUnavailable => "purchasing unavailable",
            Self::ExistingPurchasePending => "existing purchase pending",
            Self::ProductUnavailable => "product unavailable",
            Self::SignatureInvalid => "signature invalid",
            Self::UserCancelled => "user cancelled",
            Self::PaymentDeclined => "payment declined",
            Self::DuplicateTransaction => "duplicate transaction",
            Self::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct PurchaseFailure {
    pub product_id: String,
    pub reason: PurchaseFailureReason,
    #[serde(default)]
    pub message: String,
    /// Store specific error code, when the platform exposes one.
    #[serde(default)]
    pub store_error_code: Option<String>,
}

impl PurchaseFailure {
    /// Human-readable message including the store error code when known.
    pub fn composite_message(&self) -> String {
        match (&self.store_error_code, self.message.is_empty()) {
            (Some(code), true) => format!("store error code {code}"),
            (Some(code), false) => format!("{} (store error code {code})", self.message),
            (None, true) => self.reason.to_string(),
            (None, false) => self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    PurchaseSucceeded(PlatformPurchase),
    PurchaseFailed(PurchaseFailure),
}

/// Channel the platform uses to report purchase outcomes.
pub type PlatformEventSender = mpsc::UnboundedSender<PlatformEvent>;
pub type PlatformEventReceiver = mpsc::UnboundedReceiver<PlatformEvent>;
