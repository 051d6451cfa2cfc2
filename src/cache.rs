use std::cell::Cell;

/// [Szudzik pairing function][szudzik-pairing].
///
/// ```text
/// (a, b) -> if (a<b) then (b^2 + a) else (a^2 + a + b)
/// ```
///
/// [szudzik-pairing]: http://szudzik.com/ElegantPairing.pdf
pub fn pairing2(a: u64, b: u64) -> u64 {
    if a < b {
        b.wrapping_mul(b).wrapping_add(a)
    } else {
        a.wrapping_mul(a).wrapping_add(a).wrapping_add(b)
    }
}

/// Pairing function for three `u64` values.
pub fn pairing3(a: u64, b: u64, c: u64) -> u64 {
    pairing2(pairing2(a, b), c)
}

/// Key of an operation cache.
pub trait CacheKey {
    /// Hash used both for slot selection and for entry identity.
    fn key_hash(&self) -> u64;
}

impl CacheKey for (u64, u64) {
    fn key_hash(&self) -> u64 {
        pairing2(self.0, self.1)
    }
}

impl CacheKey for (u64, u64, u64) {
    fn key_hash(&self) -> u64 {
        pairing3(self.0, self.1, self.2)
    }
}

struct Entry<K, V> {
    key: K,
    value: V,
}

/// Direct-mapped computed table.
///
/// Each key lands in exactly one slot; a newer result simply evicts an older
/// one. Slots keep the whole key, so colliding hashes never produce a hit.
pub struct OpCache<K, V> {
    data: Vec<Option<Entry<K, V>>>,
    bitmask: u64,
    hits: Cell<usize>,
    misses: Cell<usize>,
}

impl<K, V> OpCache<K, V> {
    /// Create a new cache with `2^bits` slots.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Bits should be in the range 0..=31");

        let size = 1usize << bits;
        Self {
            data: std::iter::repeat_with(|| None).take(size).collect(),
            bitmask: (size - 1) as u64,
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.get()
    }
    pub fn misses(&self) -> usize {
        self.misses.get()
    }

    pub fn clear(&mut self) {
        self.data.fill_with(|| None);
    }

    fn index(&self, key: u64) -> usize {
        (key & self.bitmask) as usize
    }
}

impl<K: CacheKey + Eq + Clone, V> OpCache<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        match &self.data[self.index(key.key_hash())] {
            Some(entry) if entry.key == *key => {
                self.hits.set(self.hits.get() + 1);
                Some(&entry.value)
            }
            _ => {
                self.misses.set(self.misses.get() + 1);
                None
            }
        }
    }

    pub fn insert(&mut self, key: &K, value: V) {
        let index = self.index(key.key_hash());
        self.data[index] = Some(Entry {
            key: key.clone(),
            value,
        });
    }
}
