pub mod fake_store;
pub mod in_memory;
pub mod owned_products;
