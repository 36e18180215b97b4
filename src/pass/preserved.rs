//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use smallvec::{smallvec, SmallVec};
use std::any::{Any, TypeId};

struct All;

/// Models the set of analyses that a given transformation pass preserves.
///
/// Absence is the default: an analysis that the transform does not explicitly
/// opt into surviving is considered invalidated. This is not a contract that
/// is checked, it is expected that the transform knows what analyses it can
/// preserve. If it reports incorrectly, this can lead to mis-compilations or
/// panics inside the compiler.
#[derive(Clone, Debug)]
pub struct PreservedAnalyses {
    // sorted so we can binary_search for `contains`
    preserved: SmallVec<[TypeId; 2]>,
}

impl PreservedAnalyses {
    /// Returns a [`PreservedAnalyses`] that marks every analysis as preserved.
    pub fn all() -> Self {
        Self {
            preserved: smallvec![TypeId::of::<All>()],
        }
    }

    /// Returns a [`PreservedAnalyses`] that marks every analysis as invalidated.
    pub fn none() -> Self {
        Self {
            preserved: smallvec![],
        }
    }

    /// Checks if *all* analyses are preserved by a given transformation. If this
    /// is true, the transformation effectively reports to have not changed
    /// *anything* in the IR.
    ///
    /// This cannot be obtained in any way except [`Self::all`].
    pub fn preserves_all(&self) -> bool {
        self.preserved.len() == 1 && self.preserved[0] == TypeId::of::<All>()
    }

    /// Reports that an analysis is preserved by the current transformation.
    pub fn preserve<T: Any>(&mut self) {
        // the universal set already contains T
        if self.preserves_all() {
            return;
        }

        self.insert(TypeId::of::<T>())
    }

    /// Gets the intersection of two sets of preserved analyses, returning
    /// the analyses that are preserved both by `self` and by `other`.
    pub fn intersect(self, other: PreservedAnalyses) -> PreservedAnalyses {
        if self.preserves_all() {
            return other;
        }

        let mut new = PreservedAnalyses::none();
        let intersection = self.preserved.into_iter().filter(|id| other.is_preserved(*id));

        for id in intersection {
            new.insert(id)
        }

        new
    }

    /// Checks if an analysis is preserved. If all are preserved
    /// or an analysis with an equivalent [`TypeId`] has been preserved
    /// with [`Self::preserve`], this returns `true`.
    pub fn is_preserved(&self, id: TypeId) -> bool {
        self.preserves_all() || self.contains(id)
    }

    fn contains(&self, id: TypeId) -> bool {
        self.preserved.binary_search(&id).is_ok()
    }

    fn insert(&mut self, id: TypeId) {
        if let Err(pos) = self.preserved.binary_search(&id) {
            self.preserved.insert(pos, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;

    #[test]
    fn all_preserves_everything() {
        let set = PreservedAnalyses::all();

        assert!(set.preserves_all());
        assert!(set.is_preserved(TypeId::of::<A>()));
        assert!(set.is_preserved(TypeId::of::<B>()));
    }

    #[test]
    fn none_preserves_nothing() {
        let set = PreservedAnalyses::none();

        assert!(!set.preserves_all());
        assert!(!set.is_preserved(TypeId::of::<A>()));
    }

    #[test]
    fn preserve_opts_individual_analyses_in() {
        let mut set = PreservedAnalyses::none();

        set.preserve::<A>();

        assert!(set.is_preserved(TypeId::of::<A>()));
        assert!(!set.is_preserved(TypeId::of::<B>()));
    }

    #[test]
    fn preserve_on_all_stays_all() {
        let mut set = PreservedAnalyses::all();

        set.preserve::<A>();

        assert!(set.preserves_all());
    }

    #[test]
    fn intersect_keeps_common_analyses() {
        let mut lhs = PreservedAnalyses::none();
        let mut rhs = PreservedAnalyses::none();

        lhs.preserve::<A>();
        lhs.preserve::<B>();
        rhs.preserve::<B>();

        let both = lhs.intersect(rhs);

        assert!(!both.is_preserved(TypeId::of::<A>()));
        assert!(both.is_preserved(TypeId::of::<B>()));
    }

    #[test]
    fn intersect_with_all_is_identity() {
        let mut rhs = PreservedAnalyses::none();

        rhs.preserve::<A>();

        let out = PreservedAnalyses::all().intersect(rhs);

        assert!(out.is_preserved(TypeId::of::<A>()));
        assert!(!out.is_preserved(TypeId::of::<B>()));
    }
}
