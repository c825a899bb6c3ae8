//! Open-addressed integer hashmap used to cache pipeline instances by
//! render-pass hash.
//!
//! Keys are pre-hashed by the caller (FNV-1a). The value `0` is reserved
//! as the empty-slot sentinel, so callers must never hash to `0` for a
//! live key -- FNV-1a never produces `0` from non-empty input, and the
//! render-pass hash is always computed over a non-empty attachment list.

/// A 64-bit pre-hashed key. Never construct one with value `0`.
pub type HashKey = u64;

struct Slot<V> {
    key: HashKey,
    value: Option<V>,
}

/// Open-addressed, power-of-two-capacity map keyed by pre-hashed `u64`s.
///
/// Linear probing with wrap-around; grows (doubling capacity, rehashing)
/// when an insert would otherwise scan the whole table without finding a
/// free slot. No delete operation -- the core never needs one.
pub struct HashMap<V> {
    slots: Vec<Slot<V>>,
    len: usize,
}

impl<V> HashMap<V> {
    /// Create a map with at least `capacity` slots (rounded up to a
    /// power of two).
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.max(1).next_power_of_two();
        let mut slots = Vec::with_capacity(cap);
        slots.resize_with(cap, || Slot { key: 0, value: None });
        Self { slots, len: 0 }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn find_slot(slots: &[Slot<V>], key: HashKey) -> usize {
        debug_assert_ne!(key, 0, "hashmap key must not be the empty sentinel 0");
        let mask = slots.len() - 1;
        let mut index = (key as usize) & mask;
        loop {
            match &slots[index] {
                Slot { key: k, .. } if *k == key || *k == 0 => return index,
                _ => index = (index + 1) & mask,
            }
        }
    }

    /// Look up a value by key.
    pub fn get(&self, key: HashKey) -> Option<&V> {
        debug_assert_ne!(key, 0);
        let mask = self.mask();
        let mut index = (key as usize) & mask;
        for _ in 0..self.slots.len() {
            match &self.slots[index] {
                Slot { key: k, value: Some(v) } if *k == key => return Some(v),
                Slot { key: 0, value: None } => return None,
                _ => index = (index + 1) & mask,
            }
        }
        None
    }

    /// Look up a mutable value by key.
    pub fn get_mut(&mut self, key: HashKey) -> Option<&mut V> {
        debug_assert_ne!(key, 0);
        let mask = self.mask();
        let mut index = (key as usize) & mask;
        for _ in 0..self.slots.len() {
            match self.slots[index] {
                Slot { key: k, .. } if k == key => return self.slots[index].value.as_mut(),
                Slot { key: 0, value: None } => return None,
                _ => index = (index + 1) & mask,
            }
        }
        None
    }

    /// Insert or overwrite the value for `key`. Grows the table first if
    /// the load factor would otherwise force a full-table scan.
    pub fn insert(&mut self, key: HashKey, value: V) {
        debug_assert_ne!(key, 0, "hashmap key must not be the empty sentinel 0");
        if (self.len + 1) * 2 > self.slots.len() {
            self.grow();
        }
        let index = Self::find_slot(&self.slots, key);
        if self.slots[index].key == 0 {
            self.len += 1;
        }
        self.slots[index] = Slot { key, value: Some(value) };
    }

    /// Fetch the entry for `key`, inserting it via `default` if absent.
    pub fn get_or_insert_with(&mut self, key: HashKey, default: impl FnOnce() -> V) -> &mut V {
        if self.get(key).is_none() {
            let v = default();
            self.insert(key, v);
        }
        self.get_mut(key).expect("just inserted")
    }

    /// Iterate over the live values, in slot order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.slots.iter().filter_map(|s| s.value.as_ref())
    }

    fn grow(&mut self) {
        let new_cap = (self.slots.len() * 2).max(2);
        let mut new_slots = Vec::with_capacity(new_cap);
        new_slots.resize_with(new_cap, || Slot { key: 0, value: None });
        let old = std::mem::replace(&mut self.slots, new_slots);
        for slot in old {
            if let Slot { key, value: Some(v) } = slot {
                let index = Self::find_slot(&self.slots, key);
                self.slots[index] = Slot { key, value: Some(v) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut map: HashMap<u32> = HashMap::with_capacity(4);
        map.insert(1, 100);
        map.insert(2, 200);
        assert_eq!(map.get(1), Some(&100));
        assert_eq!(map.get(2), Some(&200));
        assert_eq!(map.get(3), None);
    }

    #[test]
    fn grows_on_saturation() {
        let mut map: HashMap<u32> = HashMap::with_capacity(2);
        for i in 1..=16u64 {
            map.insert(i, i as u32 * 10);
        }
        assert_eq!(map.len(), 16);
        for i in 1..=16u64 {
            assert_eq!(map.get(i), Some(&(i as u32 * 10)));
        }
    }

    #[test]
    fn overwrite_existing_key() {
        let mut map: HashMap<u32> = HashMap::with_capacity(4);
        map.insert(7, 1);
        map.insert(7, 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(7), Some(&2));
    }
}
