//! Player inventories.
//!
//! An inventory holds whole items (not stacks) up to a fixed capacity. Items
//! keep their entity id while carried so drop and use requests can name them.

use relaysync_core::EntityId;
use relaysync_net::ItemState;

/// Default number of items a player can carry.
pub const DEFAULT_INVENTORY_CAPACITY: usize = 8;

/// Fixed-capacity item container.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    items: Vec<ItemState>,
    capacity: usize,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INVENTORY_CAPACITY)
    }
}

impl Inventory {
    /// Inventory with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inventory holding at most `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Add an item. When full the item is handed back unchanged.
    pub fn insert(&mut self, item: ItemState) -> Result<(), ItemState> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push(item);
        Ok(())
    }

    /// Remove the item with `item_id`.
    pub fn take(&mut self, item_id: EntityId) -> Option<ItemState> {
        let index = self.items.iter().position(|item| item.id == item_id)?;
        Some(self.items.remove(index))
    }

    /// Look up a carried item.
    pub fn get(&self, item_id: EntityId) -> Option<&ItemState> {
        self.items.iter().find(|item| item.id == item_id)
    }

    /// Whether `item_id` is carried.
    pub fn contains(&self, item_id: EntityId) -> bool {
        self.get(item_id).is_some()
    }

    /// Remove and return every item, oldest first.
    pub fn drain(&mut self) -> Vec<ItemState> {
        std::mem::take(&mut self.items)
    }

    /// Carried items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ItemState> {
        self.items.iter()
    }

    /// Number of carried items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is carried.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether another item would be refused.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Maximum number of items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use relaysync_net::ItemAttributes;

    fn coin(id: u32) -> ItemState {
        ItemState {
            id: EntityId(id),
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            mass: 1.0,
            awake: false,
            attributes: ItemAttributes::Coin { value: 1 },
        }
    }

    #[test]
    fn test_insert_until_full() {
        let mut inventory = Inventory::with_capacity(2);
        assert!(inventory.insert(coin(1)).is_ok());
        assert!(inventory.insert(coin(2)).is_ok());
        assert!(inventory.is_full());

        let refused = inventory.insert(coin(3)).unwrap_err();
        assert_eq!(refused.id, EntityId(3));
        assert_eq!(inventory.len(), 2);
    }

    #[test]
    fn test_take_removes_by_id() {
        let mut inventory = Inventory::new();
        inventory.insert(coin(1)).unwrap();
        inventory.insert(coin(2)).unwrap();

        assert_eq!(inventory.take(EntityId(1)).map(|i| i.id), Some(EntityId(1)));
        assert!(inventory.take(EntityId(1)).is_none());
        assert!(inventory.contains(EntityId(2)));
        assert_eq!(inventory.capacity(), DEFAULT_INVENTORY_CAPACITY);
    }

    #[test]
    fn test_drain_empties() {
        let mut inventory = Inventory::new();
        inventory.insert(coin(5)).unwrap();
        let drained = inventory.drain();
        assert_eq!(drained.len(), 1);
        assert!(inventory.is_empty());
    }
}
