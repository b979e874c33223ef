use super::catalog::Catalog;
use super::events::{EconomyEvent, EventBus};
use super::item::{InventoryItem, ItemHandle};
use crate::error::{EconomyError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

// Shared by every registry so a handle is never handed out twice in a process.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> ItemHandle {
    ItemHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

/// Registry of live item instances.
///
/// Items are kept ordered by handle, which is creation order, so lookups that return
/// several items are deterministic.
#[derive(Debug)]
pub struct InventoryRegistry {
    catalog: Arc<Catalog>,
    items: BTreeMap<ItemHandle, Arc<InventoryItem>>,
    ids: HashMap<String, ItemHandle>,
    events: EventBus,
}

impl InventoryRegistry {
    pub fn new(catalog: Arc<Catalog>, events: EventBus) -> Self {
        Self {
            catalog,
            items: BTreeMap::new(),
            ids: HashMap::new(),
            events,
        }
    }

    /// Creates an item of `definition_key`, generating an id when none is given.
    ///
    /// `ItemAdded` is published once the item can be found by id and handle.
    pub fn create_item_internal(
        &mut self,
        definition_key: &str,
        id: Option<String>,
    ) -> Result<Arc<InventoryItem>> {
        let definition = self
            .catalog
            .item_definition(definition_key)
            .cloned()
            .ok_or_else(|| EconomyError::UnknownItemDefinition(definition_key.to_string()))?;

        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if id.is_empty() {
            return Err(EconomyError::InvalidArgument(
                "item id must not be empty".to_string(),
            ));
        }
        if self.ids.contains_key(&id) {
            return Err(EconomyError::DuplicateItemId(id));
        }

        let handle = next_handle();
        let item = Arc::new(InventoryItem::new(id.clone(), definition, handle));
        self.ids.insert(id, handle);
        self.items.insert(handle, item.clone());

        self.events.emit(&EconomyEvent::ItemAdded(item.clone()));
        Ok(item)
    }

    /// Removes the item with `id`. Returns false if no live item has that id.
    ///
    /// `ItemRemoved` is published before the item is discarded, so listeners can still
    /// read it.
    pub fn remove_item_internal(&mut self, id: &str) -> bool {
        let Some(handle) = self.ids.remove(id) else {
            return false;
        };
        let Some(item) = self.items.remove(&handle) else {
            return false;
        };

        self.events.emit(&EconomyEvent::ItemRemoved(item.clone()));
        item.discard();
        true
    }

    fn remove_snapshot(&mut self, scratch: &[Arc<InventoryItem>]) -> usize {
        let mut removed = 0;
        for item in scratch {
            if self.remove_item_internal(item.raw_id()) {
                removed += 1;
            }
        }
        removed
    }

    /// Removes every item of `definition_key`, snapshotting the targets into `scratch` first.
    ///
    /// On return `scratch` holds the removed (now discarded) items.
    pub fn remove_items_by_definition_internal(
        &mut self,
        definition_key: &str,
        scratch: &mut Vec<Arc<InventoryItem>>,
    ) -> Result<usize> {
        if self.catalog.item_definition(definition_key).is_none() {
            return Err(EconomyError::UnknownItemDefinition(
                definition_key.to_string(),
            ));
        }
        scratch.clear();
        scratch.extend(
            self.items
                .values()
                .filter(|item| item.raw_definition_key() == definition_key)
                .cloned(),
        );
        Ok(self.remove_snapshot(scratch))
    }

    pub fn remove_all_items_internal(&mut self, scratch: &mut Vec<Arc<InventoryItem>>) -> usize {
        scratch.clear();
        scratch.extend(self.items.values().cloned());
        self.remove_snapshot(scratch)
    }

    pub fn find_item(&self, id: &str) -> Option<Arc<InventoryItem>> {
        self.ids
            .get(id)
            .and_then(|handle| self.items.get(handle))
            .cloned()
    }

    pub fn find_item_by_handle(&self, handle: ItemHandle) -> Option<Arc<InventoryItem>> {
        self.items.get(&handle).cloned()
    }

    pub fn find_items_by_definition(&self, definition_key: &str) -> Vec<Arc<InventoryItem>> {
        self.items
            .values()
            .filter(|item| item.raw_definition_key() == definition_key)
            .cloned()
            .collect()
    }

    pub fn find_items_by_tag(&self, tag_key: &str) -> Vec<Arc<InventoryItem>> {
        self.items
            .values()
            .filter(|item| {
                self.catalog
                    .item_definition(item.raw_definition_key())
                    .is_some_and(|definition| definition.has_tag(tag_key))
            })
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    pub fn items(&self) -> Vec<Arc<InventoryItem>> {
        self.items.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn count_by_definition(&self, definition_key: &str) -> usize {
        self.items
            .values()
            .filter(|item| item.raw_definition_key() == definition_key)
            .count()
    }
}
