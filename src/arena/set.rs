//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::arena::ArenaKey;
use smallbitvec::SmallBitVec;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// Intended to be a dense representation for a set of keys from a primary map.
///
/// This is theoretically equivalent to a [`SecondaryMap<K, ()>`](crate::arena::SecondaryMap)
/// but is a bit leaner under-the-hood, being implemented as just a bitvector with no
/// additional slot storage.
///
/// ```
/// # use beryl::dense_arena_key;
/// # use beryl::arena::*;
/// dense_arena_key! { struct Key; }
/// let mut map = ArenaMap::default();
/// let k1: Key = map.insert(15);
/// let k2 = map.insert(20);
///
/// let mut evens = SecondarySet::new();
/// evens.insert(k2);
///
/// assert_eq!(evens.contains(k1), false);
/// assert_eq!(evens.contains(k2), true);
/// ```
#[derive(Clone)]
pub struct SecondarySet<K: ArenaKey> {
    bits: SmallBitVec,
    cardinality: usize,
    _unused: PhantomData<fn() -> K>,
}

impl<K: ArenaKey> SecondarySet<K> {
    /// Creates an empty set with `0` as the capacity.
    pub fn new() -> Self {
        Self {
            bits: SmallBitVec::default(),
            cardinality: 0,
            _unused: PhantomData,
        }
    }

    /// Inserts a key into the set. Returns `true` if the key was
    /// not previously in the set.
    pub fn insert(&mut self, key: K) -> bool {
        let index = key.key_index();

        while self.bits.len() <= index {
            self.bits.push(false);
        }

        let was_set = self.bits[index];

        if !was_set {
            self.bits.set(index, true);
            self.cardinality += 1;
        }

        !was_set
    }

    /// Removes a key from the set. Returns `true` if the key was in the set.
    pub fn remove(&mut self, key: K) -> bool {
        let index = key.key_index();

        if index < self.bits.len() && self.bits[index] {
            self.bits.set(index, false);
            self.cardinality -= 1;

            return true;
        }

        false
    }

    /// Checks whether a key is in the set.
    #[inline]
    pub fn contains(&self, key: K) -> bool {
        let index = key.key_index();

        index < self.bits.len() && self.bits[index]
    }

    /// The number of keys currently in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.cardinality
    }

    /// Checks whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cardinality == 0
    }
}

impl<K: ArenaKey> Default for SecondarySet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ArenaKey> Debug for SecondarySet<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();

        for (i, bit) in self.bits.iter().enumerate() {
            if bit {
                set.entry(&K::key_new(i));
            }
        }

        set.finish()
    }
}
