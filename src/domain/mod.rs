//! Domain model: catalog definitions, the wallet ledger, the inventory registry and the
//! contracts of the external systems the economy talks to.

pub mod catalog;
pub mod currency;
pub mod deferred;
pub mod events;
pub mod inventory;
pub mod item;
pub mod ports;
pub mod purchase;
pub mod transaction;
pub mod wallet;
