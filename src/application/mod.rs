//! Application layer orchestrating the domain model.
//!
//! [`economy::Economy`] is the entry point: it owns the wallet and inventory, mirrors
//! public mutations to the data layer and delegates transactions to the
//! [`transactions::TransactionManager`], which in turn drives the
//! [`purchasing::PurchasingAdapter`] for real-money purchases.

pub mod economy;
pub mod purchasing;
pub mod transactions;
