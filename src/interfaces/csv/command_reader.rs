use crate::error::{EconomyError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    /// Adds `amount` to the currency `key`.
    Add,
    Remove,
    Set,
    /// Creates an item of definition `key`, with `id` when given.
    Grant,
    /// Removes the item whose id is `key`.
    Discard,
    /// Runs the transaction `key`; `id` may list cost item ids separated by `;`.
    Buy,
    /// Has the store report a purchase of product `key` nobody started.
    Background,
}

/// One row of a command script.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Command {
    #[serde(rename = "op")]
    pub command_type: CommandType,
    pub key: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub id: Option<String>,
}

impl Command {
    pub fn amount(&self) -> Result<i64> {
        self.amount.ok_or_else(|| {
            EconomyError::InvalidArgument(format!("'{}' requires an amount", self.key))
        })
    }

    /// Explicit cost item ids of a `buy` row, if any were listed.
    pub fn cost_item_ids(&self) -> Option<Vec<String>> {
        let ids: Vec<String> = self
            .id
            .as_deref()?
            .split(';')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        (!ids.is_empty()).then_some(ids)
    }
}

/// Reads economy commands from a CSV source with an `op, key, amount, id` header.
///
/// Whitespace is trimmed and trailing columns may be omitted.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes the rows; a malformed row yields an error and reading continues.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EconomyError::from))
    }
}
