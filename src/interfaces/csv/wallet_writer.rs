use crate::domain::item::InventoryItem;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct Row<'a> {
    kind: &'a str,
    key: &'a str,
    value: String,
}

/// Writes the final player state as `kind,key,value` CSV rows.
///
/// Balances come first as `balance,<currency>,<amount>`, then items as
/// `item,<definition>,<id>` and owned products as `owned,<product id>,`.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_balances(&mut self, balances: &[(String, i64)]) -> Result<()> {
        for (currency, amount) in balances {
            self.writer.serialize(Row {
                kind: "balance",
                key: currency,
                value: amount.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn write_items(&mut self, items: &[Arc<InventoryItem>]) -> Result<()> {
        for item in items {
            let definition = item.definition()?;
            self.writer.serialize(Row {
                kind: "item",
                key: &definition.key,
                value: item.id()?.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn write_owned_products(&mut self, products: &[String]) -> Result<()> {
        for product in products {
            self.writer.serialize(Row {
                kind: "owned",
                key: product,
                value: String::new(),
            })?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
