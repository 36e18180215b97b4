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
use crate::ir::Function;
use crate::utility::SaHashMap;

dense_arena_key! {
    /// Identifies a [`Function`] within its [`Module`] for its entire lifetime.
    pub struct Func;

    /// Identifies a single direct call instruction within a [`Module`].
    ///
    /// Call-graph edges are tagged with this key, so rewriting or deleting one
    /// call site removes exactly one edge.
    pub struct CallSite;
}

/// Used to identify different [`Module`] instances efficiently.
///
/// Every [`Module`] has some data allocated on the heap that is guaranteed
/// to not move around, the address of this data can be used to distinguish
/// between modules.
///
/// Note that this is not a way of telling if modules are *equivalent*,
/// this is a way of identifying the *same module*.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ModuleIdentity(usize);

/// A single direct call, `caller` containing the call site and `callee`
/// being the function it calls.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Call {
    caller: Func,
    callee: Func,
}

impl Call {
    /// The function containing the call site.
    pub fn caller(self) -> Func {
        self.caller
    }

    /// The function being called.
    pub fn callee(self) -> Func {
        self.callee
    }
}

/// Contains the functions and call sites that the schedulers run over.
///
/// This is the unit-provider side of the engine: it owns the units, hands out
/// stable handles for them, and records the call sites that the call graph
/// mirrors as edges. Functions and call sites can be removed again; their
/// handles are never reused, and resolving a removed handle panics.
#[derive(Debug)]
pub struct Module {
    identity: Box<u8>,
    name: String,
    functions: ArenaMap<Func, Option<Function>>,
    names: SaHashMap<String, Func>,
    calls: ArenaMap<CallSite, Option<Call>>,
}

impl Module {
    /// Creates a new, empty module with a given name.
    pub fn new(name: &str) -> Self {
        Self {
            identity: Box::new(0),
            name: name.to_owned(),
            functions: ArenaMap::default(),
            names: SaHashMap::default(),
            calls: ArenaMap::default(),
        }
    }

    /// Gets a [`ModuleIdentity`] that refers to the object.
    pub fn identity(&self) -> ModuleIdentity {
        ModuleIdentity(self.identity.as_ref() as *const _ as usize)
    }

    /// The name of the module.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a new function with a given name and abstract body size.
    pub fn add_function(&mut self, name: &str, size: usize) -> Func {
        debug_assert!(self.find_function_by_name(name).is_none());

        let func = self.functions.next_key();
        let new = Function::new(name.to_owned(), func, size);

        self.names.insert(name.to_owned(), func);

        self.functions.insert(Some(new))
    }

    /// Removes a function from the module.
    ///
    /// The function must not have any remaining callers besides itself; the
    /// caller is responsible for rewriting or deleting inbound call sites
    /// first. All of the function's own call sites are removed with it.
    pub fn remove_function(&mut self, func: Func) {
        let inbound = self.calls.iter().any(|(_, slot)| {
            slot.map_or(false, |call| call.callee() == func && call.caller() != func)
        });

        assert!(!inbound, "cannot remove a function that still has callers");

        let sites: Vec<CallSite> = self
            .calls
            .iter()
            .filter_map(|(site, slot)| {
                slot.and_then(|call| (call.caller() == func || call.callee() == func).then(|| site))
            })
            .collect();

        for site in sites {
            self.remove_call(site);
        }

        let removed = self.functions[func].take();
        let removed = removed.expect("function was removed");

        self.names.remove(removed.name());
    }

    /// Checks whether `func` refers to a function that still exists.
    pub fn contains_function(&self, func: Func) -> bool {
        self.functions.get(func).map_or(false, Option::is_some)
    }

    /// Resolves a [`Func`] into a real function object.
    pub fn function(&self, func: Func) -> &Function {
        self.functions
            .get(func)
            .and_then(Option::as_ref)
            .expect("function was removed")
    }

    /// Resolves a [`Func`] into a real function object.
    pub fn function_mut(&mut self, func: Func) -> &mut Function {
        self.functions
            .get_mut(func)
            .and_then(Option::as_mut)
            .expect("function was removed")
    }

    /// Finds a [`Func`] with a given name. If the function has not been added to
    /// the module (or has been removed), `None` is returned.
    pub fn find_function_by_name(&self, func: &str) -> Option<Func> {
        self.names.get(func).copied()
    }

    /// Returns an iterator over all of the live functions in the module.
    pub fn functions(&self) -> impl Iterator<Item = Func> + '_ {
        self.functions
            .iter()
            .filter_map(|(k, slot)| slot.as_ref().map(|_| k))
    }

    /// Records a new direct call from `caller` to `callee` and returns the
    /// identity of the new call site.
    ///
    /// During a call-graph run this must go through the updater instead, so
    /// the graph observes the new edge.
    pub fn add_call(&mut self, caller: Func, callee: Func) -> CallSite {
        assert!(self.contains_function(caller), "function was removed");
        assert!(self.contains_function(callee), "function was removed");

        let site = self.calls.insert(Some(Call { caller, callee }));

        self.function_mut(caller).record_call(site);

        site
    }

    /// Deletes a call site, e.g. because a transform rewrote or removed the
    /// call instruction.
    ///
    /// During a call-graph run this must go through the updater instead, so
    /// the graph removes the matching edge.
    pub fn remove_call(&mut self, site: CallSite) {
        let call = self.calls[site].take();
        let call = call.expect("call site was removed");

        if self.contains_function(call.caller()) {
            self.function_mut(call.caller()).forget_call(site);
        }
    }

    /// Resolves a [`CallSite`] into the call it models.
    pub fn call(&self, site: CallSite) -> Call {
        self.calls
            .get(site)
            .and_then(|slot| *slot)
            .expect("call site was removed")
    }

    /// Checks whether `site` refers to a call that still exists.
    pub fn has_call(&self, site: CallSite) -> bool {
        self.calls.get(site).map_or(false, Option::is_some)
    }

    /// Returns `(site, callee)` for every live call site inside `func`.
    pub fn calls_of(&self, func: Func) -> impl Iterator<Item = (CallSite, Func)> + '_ {
        self.function(func)
            .call_sites()
            .map(|site| (site, self.call(site).callee()))
    }

    pub(crate) fn take_function(&mut self, func: Func) -> Function {
        self.functions[func].take().expect("function was removed")
    }

    pub(crate) fn put_function(&mut self, func: Func, body: Function) {
        debug_assert!(self.functions[func].is_none());

        self.functions[func] = Some(body);
    }
}
