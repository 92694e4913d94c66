use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::push::BytecodeBuilder;

/// Memoises scalar push modules by exact input value.
///
/// Numbers are keyed by their bit pattern, so `0.0` and `-0.0` are separate
/// entries and NaN payloads are cacheable. Entries live until [`clear`](Self::clear).
#[derive(Debug, Default)]
pub struct BytecodeCache {
    builder: BytecodeBuilder,
    booleans: FxHashMap<bool, Vec<u8>>,
    numbers: FxHashMap<u64, Vec<u8>>,
    strings: FxHashMap<Vec<u8>, Vec<u8>>,
    integers: FxHashMap<i64, Vec<u8>>,
}

impl BytecodeCache {
    pub fn new(builder: BytecodeBuilder) -> Self {
        Self {
            builder,
            ..Self::default()
        }
    }

    pub fn builder(&self) -> &BytecodeBuilder {
        &self.builder
    }

    pub fn get_boolean(&mut self, value: bool) -> &[u8] {
        match self.booleans.entry(value) {
            Entry::Occupied(hit) => hit.into_mut(),
            Entry::Vacant(slot) => {
                debug!(value, "bytecode cache miss (boolean)");
                slot.insert(self.builder.push_boolean(value))
            }
        }
    }

    pub fn get_number(&mut self, value: f64) -> &[u8] {
        match self.numbers.entry(value.to_bits()) {
            Entry::Occupied(hit) => hit.into_mut(),
            Entry::Vacant(slot) => {
                debug!(value, "bytecode cache miss (number)");
                slot.insert(self.builder.push_number(value))
            }
        }
    }

    pub fn get_string(&mut self, value: &[u8]) -> &[u8] {
        // Lookup first so hits do not allocate a key.
        if !self.strings.contains_key(value) {
            debug!(len = value.len(), "bytecode cache miss (string)");
            let bytes = self.builder.push_string(value);
            self.strings.insert(value.to_vec(), bytes);
        }
        self.strings.get(value).map(Vec::as_slice).unwrap_or_default()
    }

    /// Integers share the number encoding but keep their own key space.
    pub fn get_integer(&mut self, value: i64) -> &[u8] {
        match self.integers.entry(value) {
            Entry::Occupied(hit) => hit.into_mut(),
            Entry::Vacant(slot) => {
                debug!(value, "bytecode cache miss (integer)");
                slot.insert(self.builder.push_integer(value))
            }
        }
    }

    /// Total entries across all four kinds.
    pub fn len(&self) -> usize {
        self.booleans.len() + self.numbers.len() + self.strings.len() + self.integers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.booleans.clear();
        self.numbers.clear();
        self.strings.clear();
        self.integers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{create_push_boolean, create_push_number, create_push_string, decode_module};
    use crate::config::EncoderOptions;

    #[test]
    fn repeated_lookups_return_identical_buffers() {
        let mut cache = BytecodeCache::default();
        let first = cache.get_number(1.25).to_vec();
        let second = cache.get_number(1.25).to_vec();
        assert_eq!(first, second);
        assert_eq!(first, create_push_number(1.25));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn different_numbers_differ_in_constant_payload() {
        let mut cache = BytecodeCache::default();
        let one = decode_module(cache.get_number(1.0)).expect("decode");
        let two = decode_module(cache.get_number(2.0)).expect("decode");
        assert_ne!(one.constants, two.constants);
        assert_eq!(one.protos, two.protos);
    }

    #[test]
    fn signed_zero_and_nan_are_distinct_keys() {
        let mut cache = BytecodeCache::default();
        cache.get_number(0.0);
        cache.get_number(-0.0);
        cache.get_number(f64::NAN);
        cache.get_number(f64::NAN);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn integers_widen_to_numbers_in_their_own_map() {
        let mut cache = BytecodeCache::default();
        let from_int = cache.get_integer(5).to_vec();
        let from_num = cache.get_number(5.0).to_vec();
        assert_eq!(from_int, from_num);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn strings_and_booleans_match_direct_builders() {
        let mut cache = BytecodeCache::default();
        assert_eq!(cache.get_string(b"hello"), create_push_string("hello").as_slice());
        assert_eq!(cache.get_string(b"hello"), create_push_string("hello").as_slice());
        assert_eq!(cache.get_boolean(false), create_push_boolean(false).as_slice());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_empties_every_kind() {
        let mut cache = BytecodeCache::default();
        cache.get_boolean(true);
        cache.get_number(3.0);
        cache.get_string(b"x");
        cache.get_integer(-1);
        assert_eq!(cache.len(), 4);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_uses_its_builder_options() {
        let options = EncoderOptions {
            flags: 7,
            ..EncoderOptions::default()
        };
        let mut cache = BytecodeCache::new(BytecodeBuilder::new(options));
        assert_eq!(cache.get_boolean(true)[1], 7);
    }
}
