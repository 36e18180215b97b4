//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::arena::ArenaMap;
use crate::dense_arena_key;
use crate::ir::{CallSite, Func};
use std::mem;

dense_arena_key! {
    /// Identifies a [`Loop`] inside one [`Function`]. Only meaningful when
    /// paired with the function that allocated it.
    pub struct LoopKey;
}

/// A single natural loop inside a function.
///
/// Like every other unit the schedulers run over, the engine only cares about
/// the loop's identity. The contents here are the bare minimum that gives
/// loop passes something to observe and mutate.
#[derive(Debug)]
pub struct Loop {
    parent: Func,
    id: LoopKey,
    depth: u32,
    body_size: usize,
}

impl Loop {
    /// The function that owns this loop.
    pub fn parent(&self) -> Func {
        self.parent
    }

    /// The key identifying this loop within [`Self::parent`].
    pub fn id(&self) -> LoopKey {
        self.id
    }

    /// The nesting depth of the loop, `1` being an outermost loop.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// An abstract measure of how large the loop body is.
    pub fn body_size(&self) -> usize {
        self.body_size
    }

    /// Updates the abstract body size, e.g. after a loop transform
    /// grew or shrank the body.
    pub fn set_body_size(&mut self, size: usize) {
        self.body_size = size;
    }
}

/// A single function, the smallest unit the interprocedural layers schedule.
///
/// The body is deliberately skeletal: a name, an abstract instruction count,
/// the list of call sites the function contains (owned by the module), and
/// the function's loops. Passes mutate the size and the loops directly; call
/// sites are created and removed through [`Module`](crate::ir::Module) or the
/// call-graph updater so that the call graph can observe every change.
#[derive(Debug)]
pub struct Function {
    func: Func,
    name: String,
    size: usize,
    calls: Vec<CallSite>,
    loops: ArenaMap<LoopKey, Option<Loop>>,
    dead_loops: Vec<LoopKey>,
}

impl Function {
    pub(in crate::ir) fn new(name: String, func: Func, size: usize) -> Self {
        Self {
            func,
            name,
            size,
            calls: Vec::default(),
            loops: ArenaMap::default(),
            dead_loops: Vec::default(),
        }
    }

    /// Gets the stable handle referring to this function.
    pub fn func(&self) -> Func {
        self.func
    }

    /// The name of the function.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// An abstract measure of how many instructions the body holds.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Updates the abstract body size.
    pub fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    /// Returns the call sites inside this function, in order of appearance.
    pub fn call_sites(&self) -> impl Iterator<Item = CallSite> + '_ {
        self.calls.iter().copied()
    }

    pub(in crate::ir) fn record_call(&mut self, site: CallSite) {
        self.calls.push(site);
    }

    pub(in crate::ir) fn forget_call(&mut self, site: CallSite) {
        self.calls.retain(|s| *s != site);
    }

    /// Adds a loop to the function and returns its key.
    pub fn add_loop(&mut self, depth: u32, body_size: usize) -> LoopKey {
        let id = self.loops.next_key();
        let parent = self.func;

        self.loops.insert(Some(Loop {
            parent,
            id,
            depth,
            body_size,
        }))
    }

    /// Removes a loop from the function, e.g. after a transform dissolved it.
    ///
    /// The destruction is recorded so the loop adaptor can purge the loop's
    /// cached analyses before its identity becomes unreachable.
    pub fn remove_loop(&mut self, key: LoopKey) {
        if let Some(slot) = self.loops.get_mut(key) {
            if slot.take().is_some() {
                self.dead_loops.push(key);
            }
        }
    }

    /// Checks whether `key` refers to a loop that still exists.
    pub fn has_loop(&self, key: LoopKey) -> bool {
        self.loops.get(key).map_or(false, Option::is_some)
    }

    /// Returns the keys of every live loop in the function.
    pub fn loops(&self) -> impl Iterator<Item = LoopKey> + '_ {
        self.loops
            .iter()
            .filter_map(|(k, slot)| slot.as_ref().map(|_| k))
    }

    /// Resolves a [`LoopKey`] into the loop object.
    pub fn loop_ref(&self, key: LoopKey) -> &Loop {
        self.loops
            .get(key)
            .and_then(Option::as_ref)
            .expect("loop was removed")
    }

    /// Resolves a [`LoopKey`] into the loop object, mutably.
    pub fn loop_mut(&mut self, key: LoopKey) -> &mut Loop {
        self.loops
            .get_mut(key)
            .and_then(Option::as_mut)
            .expect("loop was removed")
    }

    /// Drains the list of loops removed since the last call. The caller is
    /// expected to purge cached analyses for each of these synchronously.
    pub fn take_dead_loops(&mut self) -> Vec<LoopKey> {
        mem::take(&mut self.dead_loops)
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::Module;

    #[test]
    fn loops_have_stable_identity() {
        let mut module = Module::new("m");
        let f = module.add_function("f", 10);

        let func = module.function_mut(f);
        let l1 = func.add_loop(1, 4);
        let l2 = func.add_loop(2, 2);

        assert_ne!(l1, l2);
        assert_eq!(func.loop_ref(l1).depth(), 1);
        assert_eq!(func.loop_ref(l2).body_size(), 2);
        assert_eq!(func.loops().count(), 2);
    }

    #[test]
    fn removed_loops_are_recorded() {
        let mut module = Module::new("m");
        let f = module.add_function("f", 10);

        let func = module.function_mut(f);
        let l1 = func.add_loop(1, 4);

        func.remove_loop(l1);

        assert!(!func.has_loop(l1));
        assert_eq!(func.take_dead_loops(), vec![l1]);
        assert!(func.take_dead_loops().is_empty());
    }
}
