use crate::error::{EconomyError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A linked tag. Item definitions and transactions can be looked up by tag.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct Tag {
    pub key: String,
}

/// A value stored in an item property or a catalog parameter.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Immutable template for inventory items.
#[derive(Debug, PartialEq, Clone)]
pub struct InventoryItemDefinition {
    pub key: String,
    pub display_name: String,
    pub tags: Vec<Arc<Tag>>,
    pub default_properties: HashMap<String, PropertyValue>,
}

impl InventoryItemDefinition {
    pub fn has_tag(&self, tag_key: &str) -> bool {
        self.tags.iter().any(|tag| tag.key == tag_key)
    }
}

/// Session-local lookup handle of a live item.
///
/// Handles are never reused within a process, unlike ids which come from the data layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemHandle(pub u64);

/// A live item instance owned by the player.
///
/// The registry discards the item when it is removed. A discarded item may still be
/// referenced by callers, but every accessor then fails with [`EconomyError::Disposed`].
#[derive(Debug)]
pub struct InventoryItem {
    id: String,
    definition: Arc<InventoryItemDefinition>,
    handle: ItemHandle,
    properties: Mutex<HashMap<String, PropertyValue>>,
    discarded: AtomicBool,
}

impl InventoryItem {
    pub(crate) fn new(
        id: String,
        definition: Arc<InventoryItemDefinition>,
        handle: ItemHandle,
    ) -> Self {
        let properties = definition.default_properties.clone();
        Self {
            id,
            definition,
            handle,
            properties: Mutex::new(properties),
            discarded: AtomicBool::new(false),
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_discarded() {
            Err(EconomyError::Disposed(format!("item '{}'", self.id)))
        } else {
            Ok(())
        }
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }

    pub fn id(&self) -> Result<&str> {
        self.ensure_alive()?;
        Ok(&self.id)
    }

    pub fn definition(&self) -> Result<&Arc<InventoryItemDefinition>> {
        self.ensure_alive()?;
        Ok(&self.definition)
    }

    pub fn handle(&self) -> Result<ItemHandle> {
        self.ensure_alive()?;
        Ok(self.handle)
    }

    pub fn property(&self, name: &str) -> Result<Option<PropertyValue>> {
        self.ensure_alive()?;
        Ok(self.properties.lock().get(name).cloned())
    }

    /// Overwrites a property declared by the definition.
    pub fn set_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        self.ensure_alive()?;
        let mut properties = self.properties.lock();
        match properties.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EconomyError::InvalidArgument(format!(
                "item definition '{}' has no property '{name}'",
                self.definition.key
            ))),
        }
    }

    // Registry bookkeeping reads these after the item is discarded.
    pub(crate) fn raw_id(&self) -> &str {
        &self.id
    }

    pub(crate) fn raw_definition_key(&self) -> &str {
        &self.definition.key
    }

    pub(crate) fn discard(&self) {
        self.discarded.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sword() -> Arc<InventoryItemDefinition> {
        Arc::new(InventoryItemDefinition {
            key: "sword".to_string(),
            display_name: "Sword".to_string(),
            tags: vec![Arc::new(Tag {
                key: "weapon".to_string(),
            })],
            default_properties: HashMap::from([(
                "durability".to_string(),
                PropertyValue::Int(100),
            )]),
        })
    }

    #[test]
    fn test_item_starts_with_default_properties() {
        let item = InventoryItem::new("a".to_string(), sword(), ItemHandle(1));
        assert_eq!(
            item.property("durability").unwrap(),
            Some(PropertyValue::Int(100))
        );
        assert!(item.definition().unwrap().has_tag("weapon"));
    }

    #[test]
    fn test_set_unknown_property_is_rejected() {
        let item = InventoryItem::new("a".to_string(), sword(), ItemHandle(1));
        assert!(matches!(
            item.set_property("color", PropertyValue::Text("red".to_string())),
            Err(EconomyError::InvalidArgument(_))
        ));

        item.set_property("durability", PropertyValue::Int(5)).unwrap();
        assert_eq!(
            item.property("durability").unwrap(),
            Some(PropertyValue::Int(5))
        );
    }

    #[test]
    fn test_discarded_item_accessors_fail() {
        let item = InventoryItem::new("a".to_string(), sword(), ItemHandle(1));
        item.discard();

        assert!(matches!(item.id(), Err(EconomyError::Disposed(_))));
        assert!(matches!(item.handle(), Err(EconomyError::Disposed(_))));
        assert!(matches!(item.definition(), Err(EconomyError::Disposed(_))));
        assert!(matches!(
            item.property("durability"),
            Err(EconomyError::Disposed(_))
        ));
    }
}
