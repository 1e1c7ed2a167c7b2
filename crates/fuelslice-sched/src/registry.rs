//! Fixed-capacity partition registry.
//!
//! Partitions live in a slot array indexed by [`PartitionId`]. A slot is
//! either empty or holds a fully instantiated [`Partition`]; a partially
//! built partition never enters the registry.

use tracing::{debug, info};

use fuelslice_common::{PartitionError, PartitionId};
use fuelslice_core::ExecutionEngine;

use crate::partition::Partition;

/// Slot array of partitions with ids in `[0, capacity)`.
pub struct PartitionRegistry<E: ExecutionEngine> {
    slots: Box<[Option<Partition<E>>]>,
}

impl<E: ExecutionEngine> PartitionRegistry<E> {
    /// Create a registry with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns `true` if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Reject ids outside `[0, capacity)`.
    pub fn check_id(&self, id: PartitionId) -> Result<(), PartitionError> {
        if id < self.slots.len() {
            Ok(())
        } else {
            Err(PartitionError::InvalidId {
                partition_id: id,
                max: self.slots.len(),
            })
        }
    }

    /// Check that `id` is valid and its slot is empty.
    pub fn ensure_vacant(&self, id: PartitionId) -> Result<(), PartitionError> {
        self.check_id(id)?;
        if self.slots[id].is_some() {
            return Err(PartitionError::SlotOccupied { partition_id: id });
        }
        Ok(())
    }

    /// Store a loaded partition in its slot.
    ///
    /// # Errors
    ///
    /// `InvalidId` or `SlotOccupied`. The rejected partition is released.
    pub fn register(&mut self, partition: Partition<E>) -> Result<(), PartitionError> {
        let id = partition.id();
        self.ensure_vacant(id)?;
        self.slots[id] = Some(partition);
        debug!(partition_id = id, "Partition registered");
        Ok(())
    }

    /// Partition in slot `id`.
    pub fn lookup(&self, id: PartitionId) -> Result<&Partition<E>, PartitionError> {
        self.check_id(id)?;
        self.slots[id]
            .as_ref()
            .ok_or(PartitionError::NotLoaded { partition_id: id })
    }

    /// Mutable partition in slot `id`.
    pub fn lookup_mut(&mut self, id: PartitionId) -> Result<&mut Partition<E>, PartitionError> {
        self.check_id(id)?;
        self.slots[id]
            .as_mut()
            .ok_or(PartitionError::NotLoaded { partition_id: id })
    }

    /// Occupied partitions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Partition<E>> {
        self.slots.iter().flatten()
    }

    /// Ids of occupied slots in ascending order.
    pub fn occupied_ids(&self) -> Vec<PartitionId> {
        self.iter().map(Partition::id).collect()
    }

    /// Release every partition in id order. Returns how many were released.
    pub fn teardown_all(&mut self) -> usize {
        let mut released = 0;
        for slot in self.slots.iter_mut() {
            if let Some(partition) = slot.take() {
                partition.release();
                released += 1;
            }
        }
        info!(released, "Registry torn down");
        released
    }
}

impl<E: ExecutionEngine> std::fmt::Debug for PartitionRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionRegistry")
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::EntryPoint;
    use fuelslice_core::SimEngine;

    fn partition(engine: &SimEngine, id: PartitionId) -> Partition<SimEngine> {
        Partition::load(engine, id, b"sim work=10", EntryPoint::default()).unwrap()
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry: PartitionRegistry<SimEngine> = PartitionRegistry::new(4);

        assert_eq!(registry.capacity(), 4);
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
        assert!(registry.occupied_ids().is_empty());
    }

    #[test]
    fn test_register_and_lookup() {
        let engine = SimEngine::new();
        let mut registry = PartitionRegistry::new(4);

        registry.register(partition(&engine, 2)).unwrap();
        registry.register(partition(&engine, 0)).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.occupied_ids(), vec![0, 2]);
        assert_eq!(registry.lookup(2).unwrap().id(), 2);
        assert!(matches!(
            registry.lookup(1),
            Err(PartitionError::NotLoaded { partition_id: 1 })
        ));
    }

    #[test]
    fn test_out_of_range_ids_rejected() {
        let engine = SimEngine::new();
        let mut registry = PartitionRegistry::new(2);

        assert!(matches!(
            registry.register(partition(&engine, 2)),
            Err(PartitionError::InvalidId {
                partition_id: 2,
                max: 2
            })
        ));
        assert!(matches!(
            registry.lookup(7),
            Err(PartitionError::InvalidId { partition_id: 7, .. })
        ));
        assert!(registry.lookup_mut(2).is_err());
    }

    #[test]
    fn test_occupied_slot_rejected() {
        let engine = SimEngine::new();
        let mut registry = PartitionRegistry::new(2);

        registry.register(partition(&engine, 1)).unwrap();
        assert!(matches!(
            registry.ensure_vacant(1),
            Err(PartitionError::SlotOccupied { partition_id: 1 })
        ));
        assert!(matches!(
            registry.register(partition(&engine, 1)),
            Err(PartitionError::SlotOccupied { partition_id: 1 })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_teardown_releases_each_partition_once() {
        let engine = SimEngine::new();
        let mut registry = PartitionRegistry::new(3);
        registry.register(partition(&engine, 0)).unwrap();
        registry.register(partition(&engine, 2)).unwrap();

        assert_eq!(registry.teardown_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.teardown_all(), 0);
    }
}
