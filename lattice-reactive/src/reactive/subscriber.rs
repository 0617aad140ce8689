//! Subscriber storage for the reactive system.
//!
//! Every producer (signal or memo) keeps the set of tasks that read it. Most
//! producers have zero or one reader, a few have a handful, and a rare hot
//! producer fans out to hundreds. [`TieredSet`] picks its representation from
//! the current size so each case pays only for what it uses:
//!
//! | tier     | size    | storage                                         |
//! |----------|---------|-------------------------------------------------|
//! | `Empty`  | 0       | nothing                                         |
//! | `Single` | 1       | inline, no allocation                           |
//! | `Small`  | 2..=32  | boxed slot array plus a `u32` occupancy bitmask |
//! | `Large`  | > 32    | `IndexMap` keyed by subscriber id               |
//!
//! Growth always moves one tier up. Removal falls back from `Small` to
//! `Single` or `Empty`. A `Large` set stays large until its last entry is
//! removed, at which point it becomes `Empty` again.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

/// Capacity of the `Small` tier. Matches the width of its occupancy mask.
pub const SMALL_SET_CAPACITY: usize = u32::BITS as usize;

/// Unique identifier for a subscriber.
///
/// Each task (effect or memo-internal) gets a unique ID when created. This ID
/// is used to deduplicate subscriptions and pending flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter so IDs stay unique across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Which representation a subscriber set currently uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriberTier {
    /// No subscribers.
    Empty,
    /// Exactly one subscriber stored inline.
    Single,
    /// Two to [`SMALL_SET_CAPACITY`] subscribers in a fixed slot array.
    Small,
    /// More than [`SMALL_SET_CAPACITY`] subscribers in a hash map.
    Large,
}

/// Fixed-capacity slot array with a bitmask of occupied slots.
pub(crate) struct SlotArray<V> {
    slots: [Option<(SubscriberId, V)>; SMALL_SET_CAPACITY],
    occupied: u32,
}

impl<V> SlotArray<V> {
    fn boxed() -> Box<Self> {
        Box::new(Self {
            slots: std::array::from_fn(|_| None),
            occupied: 0,
        })
    }

    fn len(&self) -> usize {
        self.occupied.count_ones() as usize
    }

    fn is_full(&self) -> bool {
        self.occupied == u32::MAX
    }

    fn position(&self, id: SubscriberId) -> Option<usize> {
        Bits(self.occupied).find(|&slot| {
            matches!(&self.slots[slot], Some((slot_id, _)) if *slot_id == id)
        })
    }

    /// Store an entry in the lowest free slot. The caller checks `is_full`.
    fn push(&mut self, id: SubscriberId, value: V) {
        let slot = (!self.occupied).trailing_zeros() as usize;
        debug_assert!(slot < SMALL_SET_CAPACITY, "push into a full slot array");
        self.slots[slot] = Some((id, value));
        self.occupied |= 1 << slot;
    }

    fn take(&mut self, slot: usize) -> Option<(SubscriberId, V)> {
        self.occupied &= !(1 << slot);
        self.slots[slot].take()
    }

    fn drain(&mut self) -> impl Iterator<Item = (SubscriberId, V)> + '_ {
        let occupied = mem::take(&mut self.occupied);
        Bits(occupied).filter_map(move |slot| self.slots[slot].take())
    }
}

/// Iterates the indices of set bits, lowest first.
#[derive(Clone, Copy)]
pub(crate) struct Bits(u32);

impl Iterator for Bits {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(bit)
    }
}

/// A set of subscribers keyed by [`SubscriberId`], stored in one of four tiers.
pub(crate) enum TieredSet<V> {
    Empty,
    Single(SubscriberId, V),
    Small(Box<SlotArray<V>>),
    Large(IndexMap<SubscriberId, V>),
}

impl<V> TieredSet<V> {
    pub(crate) fn new() -> Self {
        Self::Empty
    }

    pub(crate) fn tier(&self) -> SubscriberTier {
        match self {
            Self::Empty => SubscriberTier::Empty,
            Self::Single(..) => SubscriberTier::Single,
            Self::Small(_) => SubscriberTier::Small,
            Self::Large(_) => SubscriberTier::Large,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Single(..) => 1,
            Self::Small(slots) => slots.len(),
            Self::Large(entries) => entries.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub(crate) fn contains(&self, id: SubscriberId) -> bool {
        match self {
            Self::Empty => false,
            Self::Single(existing, _) => *existing == id,
            Self::Small(slots) => slots.position(id).is_some(),
            Self::Large(entries) => entries.contains_key(&id),
        }
    }

    /// Add a subscriber. Returns `false` if `id` was already present.
    pub(crate) fn insert(&mut self, id: SubscriberId, value: V) -> bool {
        match self {
            Self::Empty => {
                *self = Self::Single(id, value);
                true
            }
            Self::Single(existing, _) if *existing == id => false,
            Self::Single(..) => {
                if let Self::Single(existing, existing_value) = mem::replace(self, Self::Empty) {
                    let mut slots = SlotArray::boxed();
                    slots.push(existing, existing_value);
                    slots.push(id, value);
                    *self = Self::Small(slots);
                }
                true
            }
            Self::Small(slots) if slots.position(id).is_some() => false,
            Self::Small(slots) if !slots.is_full() => {
                slots.push(id, value);
                true
            }
            Self::Small(slots) => {
                let mut entries = IndexMap::with_capacity(SMALL_SET_CAPACITY * 2);
                entries.extend(slots.drain());
                entries.insert(id, value);
                *self = Self::Large(entries);
                true
            }
            Self::Large(entries) => {
                if entries.contains_key(&id) {
                    return false;
                }
                entries.insert(id, value);
                true
            }
        }
    }

    /// Remove a subscriber, returning its value if it was present.
    pub(crate) fn remove(&mut self, id: SubscriberId) -> Option<V> {
        match self {
            Self::Empty => None,
            Self::Single(existing, _) if *existing != id => None,
            Self::Single(..) => match mem::replace(self, Self::Empty) {
                Self::Single(_, value) => Some(value),
                _ => None,
            },
            Self::Small(slots) => {
                let slot = slots.position(id)?;
                let (_, value) = slots.take(slot)?;
                match slots.len() {
                    0 => *self = Self::Empty,
                    1 => {
                        let last = slots.drain().next();
                        if let Some((last_id, last_value)) = last {
                            *self = Self::Single(last_id, last_value);
                        }
                    }
                    _ => {}
                }
                Some(value)
            }
            Self::Large(entries) => {
                let value = entries.swap_remove(&id)?;
                if entries.is_empty() {
                    *self = Self::Empty;
                }
                Some(value)
            }
        }
    }

    /// Iterate `(id, value)` pairs. The `Small` tier walks its bitmask.
    pub(crate) fn iter(&self) -> Iter<'_, V> {
        match self {
            Self::Empty => Iter::Empty,
            Self::Single(id, value) => Iter::Single(Some((*id, value))),
            Self::Small(slots) => Iter::Small {
                slots,
                bits: Bits(slots.occupied),
            },
            Self::Large(entries) => Iter::Large(entries.iter()),
        }
    }
}

/// Iterator over a [`TieredSet`].
pub(crate) enum Iter<'a, V> {
    Empty,
    Single(Option<(SubscriberId, &'a V)>),
    Small { slots: &'a SlotArray<V>, bits: Bits },
    Large(indexmap::map::Iter<'a, SubscriberId, V>),
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (SubscriberId, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Iter::Empty => None,
            Iter::Single(entry) => entry.take(),
            Iter::Small { slots, bits } => {
                let slots: &'a SlotArray<V> = *slots;
                bits.find_map(|slot| slots.slots[slot].as_ref().map(|(id, value)| (*id, value)))
            }
            Iter::Large(entries) => entries.next().map(|(id, value)| (*id, value)),
        }
    }
}
