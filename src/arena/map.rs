//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022 Evan Cox <evanacox00@gmail.com>. All rights reserved.      //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::arena::ArenaKey;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// This is meant to act as a primary mapping of `K -> V`, where `K` is some key
/// type and `V` is the value being stored. Other mappings that use the same
/// key as an existing [`ArenaMap`] should use [`SecondaryMap`](super::SecondaryMap) instead.
///
/// This is effectively a typed wrapper around `Vec<T>`, the main advantage is
/// that it does not implicitly convert into array types (i.e. it actually acts like
/// a map instead of a sequence) and it only allows indexing with the correct type.
///
/// This allows type safety to be significantly increased, with unique key types for
/// different types of collections. Key size can also be customized on a per-map basis,
/// e.g. when a map is known to be small a smaller index type can be used.
///
/// ```
/// # use beryl::arena_key;
/// # use beryl::arena::ArenaMap;
/// arena_key! {
///     struct Name;
/// }
///
/// let mut blocks = ArenaMap::new();
/// let bb: Name = blocks.insert("Hello!");
///
/// assert_eq!(blocks[bb], "Hello!");
/// ```
#[derive(Clone)]
pub struct ArenaMap<K: ArenaKey, V> {
    slots: Vec<V>,
    _unused: PhantomData<fn() -> K>,
}

impl<K: ArenaKey, V> ArenaMap<K, V> {
    /// Creates a new, empty arena. This creates the underlying [`Vec`] with [`Vec::default`].
    #[inline]
    pub fn new() -> Self {
        Self {
            slots: Vec::default(),
            _unused: PhantomData,
        }
    }

    /// Creates an empty arena with an initial capacity. This creates the underlying
    /// [`Vec`] with [`Vec::with_capacity`].
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            _unused: PhantomData,
        }
    }

    /// Checks if the arena contains a given key, i.e. whether a given key
    /// has been returned from [`Self::insert`] at some point.
    #[inline]
    pub fn contains(&self, key: K) -> bool {
        key.key_index() < self.slots.len()
    }

    /// Accesses the arena and gets the value associated with a given key.
    /// If the key doesn't exist (i.e. if [`Self::contains`] would have
    /// returned `false`), `None` is returned.
    #[inline]
    pub fn get(&self, key: K) -> Option<&V> {
        self.slots.get(key.key_index())
    }

    /// Mutable access to the value associated with a given key, if it exists.
    #[inline]
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.slots.get_mut(key.key_index())
    }

    /// Adds an item into the arena, and returns a key that can be used to
    /// access that data later.
    ///
    /// ```
    /// # use beryl::arena_key;
    /// # use beryl::arena::ArenaMap;
    /// # arena_key! { struct Key; }
    /// let mut map = ArenaMap::default();
    /// let k: Key = map.insert("Hello!");
    /// assert_eq!(map[k], "Hello!");
    /// ```
    #[inline]
    pub fn insert(&mut self, value: V) -> K {
        self.slots.push(value);

        K::key_new(self.slots.len() - 1)
    }

    /// Gets the key that *will be* returned by [`Self::insert`] when it's
    /// called next. This key is not valid until that [`Self::insert`] call occurs.
    #[inline]
    pub fn next_key(&self) -> K {
        K::key_new(self.slots.len())
    }

    /// Gets the number of elements that have been pushed into the arena.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Checks if the arena has had any elements pushed into it.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns an iterator over every key in the arena, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        (0..self.slots.len()).map(K::key_new)
    }

    /// Returns an iterator over `(key, &value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, v)| (K::key_new(i), v))
    }

    /// Returns an iterator over `(key, &mut value)` pairs in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut V)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (K::key_new(i), v))
    }
}

impl<K: ArenaKey, V> Index<K> for ArenaMap<K, V> {
    type Output = V;

    #[inline]
    fn index(&self, key: K) -> &Self::Output {
        &self.slots[key.key_index()]
    }
}

impl<K: ArenaKey, V> IndexMut<K> for ArenaMap<K, V> {
    #[inline]
    fn index_mut(&mut self, key: K) -> &mut Self::Output {
        &mut self.slots[key.key_index()]
    }
}

impl<K: ArenaKey, V> Default for ArenaMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ArenaKey, V: Debug> Debug for ArenaMap<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::ArenaMap;
    use crate::arena_key;

    arena_key! { struct Key; }

    #[test]
    fn insert_then_index() {
        let mut map = ArenaMap::default();
        let k1: Key = map.insert("a");
        let k2 = map.insert("b");

        assert_eq!(map[k1], "a");
        assert_eq!(map[k2], "b");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn next_key_becomes_valid_after_insert() {
        let mut map = ArenaMap::default();
        let k1: Key = map.next_key();

        assert!(!map.contains(k1));

        let k2 = map.insert(0);

        assert!(map.contains(k1));
        assert_eq!(k1, k2);
    }

    #[test]
    fn keys_iterate_in_insertion_order() {
        let mut map = ArenaMap::default();
        let k1: Key = map.insert(10);
        let k2 = map.insert(20);

        let keys: Vec<Key> = map.keys().collect();

        assert_eq!(keys, vec![k1, k2]);
    }
}
