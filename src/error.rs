use std::fmt;
use thiserror::Error;

/// A single cost the player could not cover during local validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CostViolation {
    InsufficientCurrency {
        currency: String,
        required: i64,
        available: i64,
    },
    InsufficientItems {
        definition: String,
        required: usize,
        available: usize,
    },
    SurplusItems {
        definition: String,
        required: usize,
        provided: usize,
    },
    UnknownItem(String),
    DuplicateItem(String),
    UnexpectedItem(String),
}

impl fmt::Display for CostViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientCurrency {
                currency,
                required,
                available,
            } => write!(
                f,
                "not enough '{currency}': need {required}, have {available}"
            ),
            Self::InsufficientItems {
                definition,
                required,
                available,
            } => write!(
                f,
                "not enough '{definition}' items: need {required}, have {available}"
            ),
            Self::SurplusItems {
                definition,
                required,
                provided,
            } => write!(
                f,
                "too many '{definition}' items: need {required}, got {provided}"
            ),
            Self::UnknownItem(id) => write!(f, "item '{id}' is not in the inventory"),
            Self::DuplicateItem(id) => write!(f, "item '{id}' was listed more than once"),
            Self::UnexpectedItem(id) => write!(f, "item '{id}' is not part of the cost"),
        }
    }
}

fn join_violations(violations: &[CostViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone)]
pub enum EconomyError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Economy is not initialized: {0}")]
    NotInitialized(&'static str),
    #[error("Object has been disposed: {0}")]
    Disposed(String),

    #[error("Duplicate {kind} key '{key}'")]
    DuplicateKey { kind: &'static str, key: String },
    #[error("Invalid definition '{key}': {reason}")]
    InvalidDefinition { key: String, reason: String },
    #[error("'{owner}' references unknown {kind} '{key}'")]
    UnresolvedReference {
        owner: String,
        kind: &'static str,
        key: String,
    },

    #[error("Unknown currency '{0}'")]
    UnknownCurrency(String),
    #[error("Unknown item definition '{0}'")]
    UnknownItemDefinition(String),
    #[error("Unknown transaction '{0}'")]
    UnknownTransaction(String),
    #[error("An item with id '{0}' already exists")]
    DuplicateItemId(String),

    #[error("Transaction '{0}' is already being processed")]
    AlreadyProcessing(String),
    #[error("Cannot begin '{requested}': transaction '{active}' is still in progress")]
    AnotherTransactionInProgress { requested: String, active: String },
    #[error("Cannot begin '{requested}': another purchase ('{active}') is in progress")]
    AnotherPurchaseInProgress { requested: String, active: String },
    #[error("Transaction '{transaction}' cannot be afforded: {}", join_violations(.violations))]
    CostViolations {
        transaction: String,
        violations: Vec<CostViolation>,
    },

    #[error("Data layer error: {0}")]
    DataLayer(String),
    #[error("Data layer result for '{transaction}' does not match local state: {reason}")]
    DataLayerMismatch { transaction: String, reason: String },
    #[error("Purchase of '{product_id}' failed ({reason}): {message}")]
    Purchase {
        product_id: String,
        reason: String,
        message: String,
    },
    #[error("Receipt validation failed for '{product_id}': {message}")]
    ReceiptValidation { product_id: String, message: String },
    #[error("Request was abandoned before it completed")]
    Abandoned,

    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("CSV error: {0}")]
    Csv(String),
}

impl From<std::io::Error> for EconomyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EconomyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<csv::Error> for EconomyError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EconomyError>;
