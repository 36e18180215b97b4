//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::arena::{ArenaMap, SecondaryMap};
use crate::dense_arena_key;
use crate::graph::{Scc, SccUnit};
use crate::ir::{Func, Function, Loop, LoopKey, Module, ModuleIdentity};
use crate::pass::PreservedAnalyses;
use crate::utility::{SaHashMap, SpinMutex};
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::hash::Hash;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{fmt, mem};

#[doc(hidden)]
#[macro_export(local_inner_macros)]
macro_rules! __analysis_deps_count {
    () => (0usize);
    ( $x:tt $($xs:tt)* ) => (1usize + __analysis_deps_count!($($xs)*));
}

#[doc(hidden)]
pub struct _InitGuard {
    init: SpinMutex,
    is_finished: AtomicBool,
}

impl _InitGuard {
    pub const fn __new() -> Self {
        Self {
            init: SpinMutex::new(),
            is_finished: AtomicBool::new(false),
        }
    }

    // this could be bundled into `__acquire` but we want the ability
    // to run code before the actual acquiring happens
    #[inline(always)]
    pub fn __need_try_acquire(&self) -> bool {
        !self.is_finished.load(Ordering::Acquire)
    }

    // returns whether or not we need to perform the initialization and call `__release`
    #[inline(never)]
    pub fn __acquire(&self) -> bool {
        // one thread will acquire the lock and do the initialization, the rest
        // will wait until the lock is unlocked and will grab it one after the other
        self.init.lock();

        // we can't be sure if we actually got the lock first, lets check and see
        // if someone else finished the initialization once we own the lock
        let finished = self.is_finished.load(Ordering::Acquire);

        // if they did finish it, unlock
        if finished {
            self.init.unlock();
        }

        !finished
    }

    // unlocks the lock and marks the object as initialized
    #[inline(never)]
    pub fn __release(&self) {
        self.is_finished.store(true, Ordering::Release);
        self.init.unlock();
    }
}

/// Allows an analysis to declare the other analyses it usually pulls through
/// the manager while computing.
///
/// The list is a *hint*: the manager uses it to pre-size its dependency
/// tracking tables, while the authoritative dependency record is built from
/// the actual `get` calls the analysis makes at runtime.
///
/// # Internal Implementation
/// Unfortunately, Rust has still not stabilized `const` for [`TypeId::of`] as of January
/// 2023, see <https://github.com/rust-lang/rust/issues/77125>. This requires trickery to get
/// lazy initialization that isn't slow.
///
/// Internally, this works similarly to how function-scoped `static` initialization
/// works in C++ (under the Itanium C++ ABI), arrays are lazily computed on the first
/// call with the help of a guard (flag and a spinlock).
///
/// This accomplishes the end goal of ensuring that the array is only initialized once
/// even if multiple threads all call it at the same time when it's not initialized.
///
/// ```
/// # use beryl::pass::*;
/// # use beryl::ir::*;
/// # use beryl::analysis::*;
/// # use beryl::analysis_deps;
/// # use std::any::TypeId;
/// pub struct MyAnalysis;
///
/// impl FunctionAnalysisPass for MyAnalysis {
///     type Result = i32;
///
///     fn dependency_hints(&self) -> &'static [TypeId] {
///         analysis_deps!(FunctionSizeAnalysis)
///     }
///
///     fn run(&mut self, _: &Function, _: &FunctionAnalysisManager) -> Self::Result {
///         42
///     }
/// }
/// ```
#[macro_export(local_inner_macros)]
macro_rules! analysis_deps {
    ($($t:ty),*) => {
        {
            use $crate::pass::_InitGuard;
            use std::any::TypeId;
            use std::mem::MaybeUninit;

            static mut DEPS: MaybeUninit<[TypeId; __analysis_deps_count!($($t)*)]> = MaybeUninit::uninit();
            static GUARD: _InitGuard = _InitGuard::__new();

            // check if anyone has already initialized this. almost always true
            if GUARD.__need_try_acquire() {
                let array = [
                    $(
                        TypeId::of::<$t>(),
                    )*];

                // multiple threads may try to do this at the same time, so __acquire
                // will wait if this happens and then check that it's initialized
                if GUARD.__acquire() {
                    unsafe {
                        DEPS = MaybeUninit::new(array);

                        GUARD.__release();
                    }
                }
            }

            // if we get here we know that we're initialized
            unsafe { DEPS.assume_init_ref() }
        }
    }
}

dense_arena_key! {
    struct Analysis;
}

trait UnitAnalysisPass<U>: Any {
    type Traits: StorageTraits<Unit = U>;
    type Result: Any;

    fn dependency_hints(&self) -> &'static [TypeId];

    fn invalidate(&mut self, unit: &U, preserved: &PreservedAnalyses);

    fn run(&mut self, unit: &U, am: &AnalysisManager<Self::Traits>) -> Self::Result;
}

struct ErasedAnalysis<T> {
    inner: T,
}

impl<T, U> UnitAnalysisPass<U> for ErasedAnalysis<T>
where
    T: UnitAnalysisPass<U>,
{
    type Traits = T::Traits;
    type Result = Rc<dyn Any>;

    fn dependency_hints(&self) -> &'static [TypeId] {
        self.inner.dependency_hints()
    }

    fn invalidate(&mut self, unit: &U, preserved: &PreservedAnalyses) {
        self.inner.invalidate(unit, preserved);
    }

    fn run(
        &mut self,
        unit: &<Self::Traits as StorageTraits>::Unit,
        am: &AnalysisManager<Self::Traits>,
    ) -> Self::Result {
        Rc::new(self.inner.run(unit, am))
    }
}

type BoxedAnalysis<Traits> = Box<
    dyn UnitAnalysisPass<<Traits as StorageTraits>::Unit, Traits = Traits, Result = Rc<dyn Any>>,
>;

trait StorageTraits: 'static {
    type Key: Hash + Eq + Copy;
    type Unit;

    fn key_from(unit: &Self::Unit) -> Self::Key;
}

struct ModuleStorageTraits;

impl StorageTraits for ModuleStorageTraits {
    type Key = ModuleIdentity;
    type Unit = Module;

    fn key_from(unit: &Self::Unit) -> Self::Key {
        unit.identity()
    }
}

struct SccStorageTraits;

impl StorageTraits for SccStorageTraits {
    type Key = Scc;
    type Unit = SccUnit;

    fn key_from(unit: &Self::Unit) -> Self::Key {
        unit.id()
    }
}

struct FunctionStorageTraits;

impl StorageTraits for FunctionStorageTraits {
    type Key = Func;
    type Unit = Function;

    fn key_from(unit: &Self::Unit) -> Self::Key {
        unit.func()
    }
}

struct LoopStorageTraits;

impl StorageTraits for LoopStorageTraits {
    type Key = (Func, LoopKey);
    type Unit = Loop;

    fn key_from(unit: &Self::Unit) -> Self::Key {
        (unit.parent(), unit.id())
    }
}

type CacheKey<Traits> = (<Traits as StorageTraits>::Key, Analysis);

fn downcast_result<R: Any>(result: Rc<dyn Any>) -> Rc<R> {
    match result.downcast::<R>() {
        Ok(inner) => inner,
        Err(_) => panic!("analysis result was stored with a different type"),
    }
}

struct AnalysisManager<Traits: StorageTraits> {
    analyses: ArenaMap<Analysis, RefCell<BoxedAnalysis<Traits>>>,
    analysis_to_id: SecondaryMap<Analysis, TypeId>,
    id_to_analysis: SaHashMap<TypeId, Analysis>,
    results: RefCell<SaHashMap<CacheKey<Traits>, Rc<dyn Any>>>,
    // reverse dependency edges: for a given entry, the entries whose
    // computation pulled it through `get`
    dependents: RefCell<SaHashMap<CacheKey<Traits>, SmallVec<[CacheKey<Traits>; 4]>>>,
    in_flight: RefCell<Vec<CacheKey<Traits>>>,
}

impl<Traits: StorageTraits> AnalysisManager<Traits> {
    /// Creates an empty manager with no analyses registered.
    fn new() -> Self {
        Self {
            analyses: ArenaMap::default(),
            analysis_to_id: SecondaryMap::default(),
            id_to_analysis: SaHashMap::default(),
            results: RefCell::new(SaHashMap::default()),
            dependents: RefCell::new(SaHashMap::default()),
            in_flight: RefCell::new(Vec::default()),
        }
    }

    /// Registers an analysis with the manager. The analysis is not run until
    /// it is later requested through [`Self::get`].
    fn register<T: UnitAnalysisPass<Traits::Unit, Traits = Traits>>(&mut self, pass: T) {
        let id = TypeId::of::<T>();

        // initially, every analysis is invalid. there's a possibility none of them
        // will even be ran, so there's no point to running them eagerly.
        //
        // "invalid" means it's not in `self.results`.
        let boxed: BoxedAnalysis<Traits> = Box::new(ErasedAnalysis { inner: pass });
        let slot = self.analyses.insert(RefCell::new(boxed));

        // map id -> slot and slot -> id
        self.id_to_analysis.insert(id, slot);
        self.analysis_to_id.insert(slot, id);
    }

    fn has_analysis(&self, id: TypeId) -> bool {
        self.id_to_analysis.contains_key(&id)
    }

    /// Lazily gets the result of an analysis. If the analysis has been invalidated,
    /// the result is re-computed, cached, and then returned.
    ///
    /// Any `get` performed while another analysis is computing is recorded as a
    /// dependency of that analysis, so invalidating this entry later drags the
    /// dependent entry down with it.
    fn get<T: UnitAnalysisPass<Traits::Unit, Traits = Traits>>(
        &self,
        unit: &Traits::Unit,
    ) -> Rc<T::Result> {
        let id = TypeId::of::<T>();
        let slot = self
            .id_to_analysis
            .get(&id)
            .copied()
            .expect("trying to get analysis that hasn't been registered");

        let key = (Traits::key_from(unit), slot);

        // whoever is computing right now depends on this entry, whether or
        // not it happens to be cached at the moment
        self.record_dependency(key);

        // if we've already computed the value and it's valid, just return
        // that instead of recomputing. otherwise, recompute, cache, and return it.
        if let Some(cached) = self.results.borrow().get(&key) {
            return downcast_result(Rc::clone(cached));
        }

        {
            let mut in_flight = self.in_flight.borrow_mut();

            assert!(
                !in_flight.iter().any(|(_, s)| *s == slot),
                "cyclic analysis request, an analysis may not recursively request its own kind"
            );

            in_flight.push(key);
        }

        self.reserve_hinted_dependencies(key.0, slot);

        let result = {
            let mut pass = self.analyses[slot].borrow_mut();

            pass.run(unit, self)
        };

        self.in_flight.borrow_mut().pop();
        self.results.borrow_mut().insert(key, Rc::clone(&result));

        downcast_result(result)
    }

    fn record_dependency(&self, key: CacheKey<Traits>) {
        let in_flight = self.in_flight.borrow();

        if let Some(parent) = in_flight.last().copied() {
            if parent != key {
                let mut dependents = self.dependents.borrow_mut();
                let users = dependents.entry(key).or_default();

                if !users.contains(&parent) {
                    users.push(parent);
                }
            }
        }
    }

    // the statically declared hints only pre-size the tracking tables, the
    // real record comes from `record_dependency`
    fn reserve_hinted_dependencies(&self, unit: Traits::Key, slot: Analysis) {
        let pass = self.analyses[slot].borrow();
        let hints = pass.dependency_hints();

        if hints.is_empty() {
            return;
        }

        let mut dependents = self.dependents.borrow_mut();

        for hint in hints {
            if let Some(dep) = self.id_to_analysis.get(hint) {
                dependents.entry((unit, *dep)).or_default();
            }
        }
    }

    /// Invalidates all the analyses for one unit that were not explicitly
    /// preserved by `preserved`, along with every cached entry (for any unit)
    /// whose recorded dependencies included one of the dropped entries.
    ///
    /// This does not trigger any analyses to be re-run, it merely drops the
    /// cached results, which will cause a re-run if they are later requested
    /// through [`Self::get`].
    fn invalidate(&self, unit: &Traits::Unit, preserved: &PreservedAnalyses) {
        if preserved.preserves_all() {
            return;
        }

        let ukey = Traits::key_from(unit);
        let mut seeds = Vec::new();

        for (slot, cell) in self.analyses.iter() {
            if !preserved.is_preserved(self.analysis_to_id[slot]) {
                // proxies use this to push the invalidation down to the
                // finer-grained manager they wrap
                cell.borrow_mut().invalidate(unit, preserved);

                seeds.push((ukey, slot));
            }
        }

        self.purge(seeds);
    }

    /// Invalidates non-preserved analyses for *every* unit this manager has
    /// entries for. Used when a coarser-grained unit was transformed and the
    /// per-unit information needed for precision isn't available.
    fn invalidate_all(&self, preserved: &PreservedAnalyses) {
        if preserved.preserves_all() {
            return;
        }

        let seeds: Vec<CacheKey<Traits>> = self
            .results
            .borrow()
            .keys()
            .filter(|key| !preserved.is_preserved(self.analysis_to_id[key.1]))
            .copied()
            .collect();

        self.purge(seeds);
    }

    /// Purges every entry for a unit that is being destroyed, plus all
    /// transitive dependents. The unit's handle must not be queried again.
    fn clear(&self, unit: &Traits::Unit) {
        let none = PreservedAnalyses::none();

        for (_, cell) in self.analyses.iter() {
            cell.borrow_mut().invalidate(unit, &none);
        }

        let ukey = Traits::key_from(unit);

        self.clear_where(|key| key == ukey);
    }

    fn clear_where(&self, pred: impl Fn(Traits::Key) -> bool) {
        let seeds: Vec<CacheKey<Traits>> = self
            .results
            .borrow()
            .keys()
            .filter(|key| pred(key.0))
            .copied()
            .collect();

        self.purge(seeds);
    }

    fn purge(&self, seeds: Vec<CacheKey<Traits>>) {
        let mut results = self.results.borrow_mut();
        let mut dependents = self.dependents.borrow_mut();
        let mut queue = VecDeque::from(seeds);

        while let Some(key) = queue.pop_front() {
            results.remove(&key);

            // anything that was computed from `key` is no longer valid either.
            // stale edges to entries that were already dropped just re-remove
            // nothing and terminate.
            if let Some(users) = dependents.remove(&key) {
                queue.extend(users);
            }
        }
    }
}

impl<Traits: StorageTraits> Debug for AnalysisManager<Traits> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_set();

        for (key, _) in self.analyses.iter() {
            m.entry(&key);
        }

        m.finish()
    }
}

/// An analysis pass that runs over an entire module.
pub trait ModuleAnalysisPass: Any {
    /// The result type of a given analysis.
    type Result: Any;

    /// Declares the analyses this one usually pulls through the manager.
    ///
    /// Only used to pre-size dependency tracking, the authoritative record is
    /// built from the actual `get` calls made while computing.
    fn dependency_hints(&self) -> &'static [TypeId] {
        &[]
    }

    /// Tells the analysis that it has been invalidated. It also
    /// sends preservation information along, some analyses need this.
    ///
    /// This is mostly here for [`FunctionAnalysisManagerModuleProxy`] to allow the
    /// module manager to tell the function manager to invalidate its entries.
    fn invalidate(&mut self, module: &Module, preserved: &PreservedAnalyses) {
        let _ = module;
        let _ = preserved;
    }

    /// Performs the analysis and returns a computed result. This should not be an impure
    /// operation, running the analysis twice on the same input should produce the same result.
    fn run(&mut self, module: &Module, am: &ModuleAnalysisManager) -> Self::Result;
}

/// An analysis pass that runs over one SCC of the call graph.
pub trait SccAnalysisPass: Any {
    /// The result type of a given analysis.
    type Result: Any;

    /// Declares the analyses this one usually pulls through the manager.
    fn dependency_hints(&self) -> &'static [TypeId] {
        &[]
    }

    /// Tells the analysis that it has been invalidated.
    fn invalidate(&mut self, scc: &SccUnit, preserved: &PreservedAnalyses) {
        let _ = scc;
        let _ = preserved;
    }

    /// Performs the analysis and returns a computed result.
    fn run(&mut self, scc: &SccUnit, am: &SccAnalysisManager) -> Self::Result;
}

/// An analysis that runs over an entire function.
pub trait FunctionAnalysisPass: Any {
    /// The result type of a given analysis.
    type Result: Any;

    /// Declares the analyses this one usually pulls through the manager.
    ///
    /// Only used to pre-size dependency tracking, the authoritative record is
    /// built from the actual `get` calls made while computing.
    fn dependency_hints(&self) -> &'static [TypeId] {
        &[]
    }

    /// Tells the analysis that it has been invalidated. It also
    /// sends preservation information along, some analyses need this.
    ///
    /// This is mostly here for [`LoopAnalysisManagerFunctionProxy`] to allow the
    /// function manager to tell the loop manager to invalidate its entries.
    fn invalidate(&mut self, func: &Function, preserved: &PreservedAnalyses) {
        let _ = func;
        let _ = preserved;
    }

    /// Performs the analysis and returns a computed result. This should not be an impure
    /// operation, running the analysis twice on the same input should produce the same result.
    fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> Self::Result;
}

/// An analysis that runs over a single loop.
pub trait LoopAnalysisPass: Any {
    /// The result type of a given analysis.
    type Result: Any;

    /// Declares the analyses this one usually pulls through the manager.
    fn dependency_hints(&self) -> &'static [TypeId] {
        &[]
    }

    /// Tells the analysis that it has been invalidated.
    fn invalidate(&mut self, lp: &Loop, preserved: &PreservedAnalyses) {
        let _ = lp;
        let _ = preserved;
    }

    /// Performs the analysis and returns a computed result.
    fn run(&mut self, lp: &Loop, am: &LoopAnalysisManager) -> Self::Result;
}

impl<T> UnitAnalysisPass<Module> for T
where
    T: ModuleAnalysisPass,
{
    type Traits = ModuleStorageTraits;
    type Result = T::Result;

    #[inline]
    fn dependency_hints(&self) -> &'static [TypeId] {
        <T as ModuleAnalysisPass>::dependency_hints(self)
    }

    #[inline]
    fn invalidate(&mut self, unit: &Module, preserved: &PreservedAnalyses) {
        <T as ModuleAnalysisPass>::invalidate(self, unit, preserved)
    }

    #[inline]
    fn run(&mut self, unit: &Module, am: &AnalysisManager<Self::Traits>) -> Self::Result {
        // this is safe, `ModuleAnalysisManager` is a layout-compatible wrapper. we can treat
        // one of these as-if it was a `ModuleAnalysisManager` for the sake of running the pass
        <T as ModuleAnalysisPass>::run(self, unit, unsafe { mem::transmute(am) })
    }
}

impl<T> UnitAnalysisPass<SccUnit> for T
where
    T: SccAnalysisPass,
{
    type Traits = SccStorageTraits;
    type Result = T::Result;

    #[inline]
    fn dependency_hints(&self) -> &'static [TypeId] {
        <T as SccAnalysisPass>::dependency_hints(self)
    }

    #[inline]
    fn invalidate(&mut self, unit: &SccUnit, preserved: &PreservedAnalyses) {
        <T as SccAnalysisPass>::invalidate(self, unit, preserved)
    }

    #[inline]
    fn run(&mut self, unit: &SccUnit, am: &AnalysisManager<Self::Traits>) -> Self::Result {
        // this is safe, `SccAnalysisManager` is a layout-compatible wrapper. we can treat
        // one of these as-if it was a `SccAnalysisManager` for the sake of running the pass
        <T as SccAnalysisPass>::run(self, unit, unsafe { mem::transmute(am) })
    }
}

impl<T> UnitAnalysisPass<Function> for T
where
    T: FunctionAnalysisPass,
{
    type Traits = FunctionStorageTraits;
    type Result = T::Result;

    #[inline]
    fn dependency_hints(&self) -> &'static [TypeId] {
        <T as FunctionAnalysisPass>::dependency_hints(self)
    }

    #[inline]
    fn invalidate(&mut self, unit: &Function, preserved: &PreservedAnalyses) {
        <T as FunctionAnalysisPass>::invalidate(self, unit, preserved)
    }

    #[inline]
    fn run(&mut self, unit: &Function, am: &AnalysisManager<Self::Traits>) -> Self::Result {
        // this is safe, `FunctionAnalysisManager` is a layout-compatible wrapper. we can treat
        // one of these as-if it was a `FunctionAnalysisManager` for the sake of running the pass
        <T as FunctionAnalysisPass>::run(self, unit, unsafe { mem::transmute(am) })
    }
}

impl<T> UnitAnalysisPass<Loop> for T
where
    T: LoopAnalysisPass,
{
    type Traits = LoopStorageTraits;
    type Result = T::Result;

    #[inline]
    fn dependency_hints(&self) -> &'static [TypeId] {
        <T as LoopAnalysisPass>::dependency_hints(self)
    }

    #[inline]
    fn invalidate(&mut self, unit: &Loop, preserved: &PreservedAnalyses) {
        <T as LoopAnalysisPass>::invalidate(self, unit, preserved)
    }

    #[inline]
    fn run(&mut self, unit: &Loop, am: &AnalysisManager<Self::Traits>) -> Self::Result {
        // this is safe, `LoopAnalysisManager` is a layout-compatible wrapper. we can treat
        // one of these as-if it was a `LoopAnalysisManager` for the sake of running the pass
        <T as LoopAnalysisPass>::run(self, unit, unsafe { mem::transmute(am) })
    }
}

/// A lazy analysis manager for a single function.
///
/// Analysis passes are registered through [`Self::add_analysis`], and then can be later
/// requested through [`Self::get`]. These are lazily recomputed as they are invalidated
/// and requested through different passes.
///
/// When a pass wants the result of an analysis, it uses [`Self::get`] which will either
/// return the computed result, or if the analysis is "invalid" it will compute the result,
/// cache it, and then return it. Repeated `get`s with no intervening invalidation return
/// the identical result object.
///
/// When a unit's pass sequence completes, the intersection of the preserved-analysis sets
/// it produced ([`PreservedAnalyses`]) is passed to [`Self::invalidate`] exactly once,
/// which drops everything that wasn't preserved (and everything computed from it).
#[derive(Debug)]
#[repr(transparent)]
pub struct FunctionAnalysisManager(AnalysisManager<FunctionStorageTraits>);

impl FunctionAnalysisManager {
    /// Creates a new [`FunctionAnalysisManager`].
    ///
    /// This manager has no analyses registered, they need to be added with
    /// [`Self::add_analysis`] before they can be used by transform passes.
    #[inline]
    pub fn new() -> Self {
        Self(AnalysisManager::new())
    }

    /// Registers a function analysis. The analysis is not run, but the
    /// state for it to be used later is set up inside the manager.
    ///
    /// You cannot use `T` in any of the other methods in this type without
    /// having called this one with the same `T` first, or else you'll get a panic.
    pub fn add_analysis<T: FunctionAnalysisPass>(&mut self, pass: T) {
        self.0.register(pass)
    }

    /// Checks whether an analysis type has been registered.
    pub fn has_analysis<T: FunctionAnalysisPass>(&self) -> bool {
        self.0.has_analysis(TypeId::of::<T>())
    }

    /// Lazily gets the result of an analysis. If the analysis has been invalidated,
    /// the result is re-computed, cached, and then returned.
    pub fn get<T: FunctionAnalysisPass>(&self, func: &Function) -> Rc<T::Result> {
        self.0.get::<T>(func)
    }

    /// Invalidates a set of analyses for a given function.
    ///
    /// Any analysis not explicitly marked to be preserved in `preserved` is
    /// considered to be invalidated, along with anything recorded as having
    /// depended on it.
    #[inline]
    pub fn invalidate(&self, func: &Function, preserved: &PreservedAnalyses) {
        self.0.invalidate(func, preserved)
    }

    /// Purges every cached entry for a function that is about to be destroyed,
    /// plus all transitive dependents, synchronously. The function's handle
    /// must never be queried again afterwards.
    pub fn clear(&self, func: &Function) {
        self.0.clear(func)
    }

    /// Shorthand for getting the loop manager out of its function-level proxy.
    pub fn loop_manager(&self, func: &Function) -> Rc<LoopAnalysisManager> {
        Rc::clone(&*self.get::<LoopAnalysisManagerFunctionProxy>(func))
    }
}

impl Default for FunctionAnalysisManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A lazy analysis manager for a whole module.
///
/// Works exactly like [`FunctionAnalysisManager`], except entries are keyed by
/// the module's identity, and the proxies that bridge down to the SCC and
/// function managers are registered here.
#[derive(Debug)]
#[repr(transparent)]
pub struct ModuleAnalysisManager(AnalysisManager<ModuleStorageTraits>);

impl ModuleAnalysisManager {
    /// Creates a new [`ModuleAnalysisManager`] with no analyses registered.
    #[inline]
    pub fn new() -> Self {
        Self(AnalysisManager::new())
    }

    /// Registers a module analysis. The analysis is not run, but the
    /// state for it to be used later is set up inside the manager.
    ///
    /// You cannot use `T` in any of the other methods in this type without
    /// having called this one with the same `T` first, or else you'll get a panic.
    #[inline]
    pub fn add_analysis<T: ModuleAnalysisPass>(&mut self, pass: T) {
        self.0.register(pass)
    }

    /// Checks whether an analysis type has been registered.
    pub fn has_analysis<T: ModuleAnalysisPass>(&self) -> bool {
        self.0.has_analysis(TypeId::of::<T>())
    }

    /// Lazily gets the result of an analysis. If the analysis has been invalidated,
    /// the result is re-computed, cached, and then returned.
    #[inline]
    pub fn get<T: ModuleAnalysisPass>(&self, module: &Module) -> Rc<T::Result> {
        self.0.get::<T>(module)
    }

    /// Invalidates a set of analyses for a given module.
    ///
    /// Any analysis not explicitly marked to be preserved in `preserved` is
    /// considered to be invalidated. Proxies registered here push the
    /// invalidation down to the units of the finer granularity.
    #[inline]
    pub fn invalidate(&self, module: &Module, preserved: &PreservedAnalyses) {
        self.0.invalidate(module, preserved)
    }

    /// Shorthand for getting the function manager out of its module-level proxy.
    pub fn function_manager(&self, module: &Module) -> Rc<FunctionAnalysisManager> {
        Rc::clone(&*self.get::<FunctionAnalysisManagerModuleProxy>(module))
    }

    /// Shorthand for getting the SCC manager out of its module-level proxy.
    pub fn scc_manager(&self, module: &Module) -> Rc<SccAnalysisManager> {
        Rc::clone(&*self.get::<SccAnalysisManagerModuleProxy>(module))
    }
}

impl Default for ModuleAnalysisManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A lazy analysis manager for call-graph SCCs.
///
/// Entries are keyed by SCC identity. SCC identities are retired whenever the
/// call graph splits or merges components, at which point the CGSCC layer
/// purges the retired keys with [`Self::clear_scc`].
#[derive(Debug)]
#[repr(transparent)]
pub struct SccAnalysisManager(AnalysisManager<SccStorageTraits>);

impl SccAnalysisManager {
    /// Creates a new [`SccAnalysisManager`] with no analyses registered.
    #[inline]
    pub fn new() -> Self {
        Self(AnalysisManager::new())
    }

    /// Registers an SCC analysis with the manager.
    pub fn add_analysis<T: SccAnalysisPass>(&mut self, pass: T) {
        self.0.register(pass)
    }

    /// Checks whether an analysis type has been registered.
    pub fn has_analysis<T: SccAnalysisPass>(&self) -> bool {
        self.0.has_analysis(TypeId::of::<T>())
    }

    /// Lazily gets the result of an analysis for one SCC.
    pub fn get<T: SccAnalysisPass>(&self, scc: &SccUnit) -> Rc<T::Result> {
        self.0.get::<T>(scc)
    }

    /// Invalidates a set of analyses for a given SCC.
    #[inline]
    pub fn invalidate(&self, scc: &SccUnit, preserved: &PreservedAnalyses) {
        self.0.invalidate(scc, preserved)
    }

    /// Invalidates non-preserved analyses for every SCC at once. Used when the
    /// module was transformed by something that doesn't know which SCCs it
    /// touched.
    pub fn invalidate_all(&self, preserved: &PreservedAnalyses) {
        self.0.invalidate_all(preserved)
    }

    /// Purges every cached entry for an SCC whose identity has been retired,
    /// plus all transitive dependents.
    pub fn clear_scc(&self, scc: Scc) {
        self.0.clear_where(|key| key == scc)
    }
}

impl Default for SccAnalysisManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A lazy analysis manager for loops, keyed by `(function, loop)` pairs.
#[derive(Debug)]
#[repr(transparent)]
pub struct LoopAnalysisManager(AnalysisManager<LoopStorageTraits>);

impl LoopAnalysisManager {
    /// Creates a new [`LoopAnalysisManager`] with no analyses registered.
    #[inline]
    pub fn new() -> Self {
        Self(AnalysisManager::new())
    }

    /// Registers a loop analysis with the manager.
    pub fn add_analysis<T: LoopAnalysisPass>(&mut self, pass: T) {
        self.0.register(pass)
    }

    /// Checks whether an analysis type has been registered.
    pub fn has_analysis<T: LoopAnalysisPass>(&self) -> bool {
        self.0.has_analysis(TypeId::of::<T>())
    }

    /// Lazily gets the result of an analysis for one loop.
    pub fn get<T: LoopAnalysisPass>(&self, lp: &Loop) -> Rc<T::Result> {
        self.0.get::<T>(lp)
    }

    /// Invalidates a set of analyses for a given loop.
    #[inline]
    pub fn invalidate(&self, lp: &Loop, preserved: &PreservedAnalyses) {
        self.0.invalidate(lp, preserved)
    }

    /// Purges every cached entry for a loop that was destroyed.
    pub fn clear_loop(&self, func: Func, lp: LoopKey) {
        self.0.clear_where(|key| key == (func, lp))
    }

    /// Purges every cached entry belonging to any loop of a function that is
    /// being destroyed.
    pub fn clear_function(&self, func: Func) {
        self.0.clear_where(|key| key.0 == func)
    }
}

impl Default for LoopAnalysisManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrapper type that maps the function analysis manager into an
/// "analysis" that can be requested by module analyses and adaptors.
///
/// Invalidating this proxy walks every function in the module and invalidates
/// its entries with the same preserved set, which is how a module-level
/// invalidation reaches its descendant units. Adaptors that have already
/// performed precise per-function invalidation mark the proxy preserved.
pub struct FunctionAnalysisManagerModuleProxy {
    inner: Rc<FunctionAnalysisManager>,
}

impl FunctionAnalysisManagerModuleProxy {
    /// Wraps the FAM into a module analysis.
    pub fn wrap(inner: FunctionAnalysisManager) -> Self {
        Self {
            inner: Rc::new(inner),
        }
    }
}

impl ModuleAnalysisPass for FunctionAnalysisManagerModuleProxy {
    type Result = Rc<FunctionAnalysisManager>;

    fn invalidate(&mut self, module: &Module, preserved: &PreservedAnalyses) {
        for func in module.functions() {
            self.inner.invalidate(module.function(func), preserved);
        }
    }

    fn run(&mut self, _: &Module, _: &ModuleAnalysisManager) -> Self::Result {
        Rc::clone(&self.inner)
    }
}

/// Wrapper type that maps the SCC analysis manager into an "analysis"
/// requestable from the module manager.
///
/// Module-level invalidation can't know which SCCs a transform touched, so
/// invalidating the proxy conservatively invalidates every SCC's entries.
pub struct SccAnalysisManagerModuleProxy {
    inner: Rc<SccAnalysisManager>,
}

impl SccAnalysisManagerModuleProxy {
    /// Wraps the SCC manager into a module analysis.
    pub fn wrap(inner: SccAnalysisManager) -> Self {
        Self {
            inner: Rc::new(inner),
        }
    }
}

impl ModuleAnalysisPass for SccAnalysisManagerModuleProxy {
    type Result = Rc<SccAnalysisManager>;

    fn invalidate(&mut self, _: &Module, preserved: &PreservedAnalyses) {
        self.inner.invalidate_all(preserved);
    }

    fn run(&mut self, _: &Module, _: &ModuleAnalysisManager) -> Self::Result {
        Rc::clone(&self.inner)
    }
}

/// Wrapper type that maps the loop analysis manager into an "analysis"
/// requestable from the function manager, mirroring what
/// [`FunctionAnalysisManagerModuleProxy`] does one level up.
pub struct LoopAnalysisManagerFunctionProxy {
    inner: Rc<LoopAnalysisManager>,
}

impl LoopAnalysisManagerFunctionProxy {
    /// Wraps the loop manager into a function analysis.
    pub fn wrap(inner: LoopAnalysisManager) -> Self {
        Self {
            inner: Rc::new(inner),
        }
    }
}

impl FunctionAnalysisPass for LoopAnalysisManagerFunctionProxy {
    type Result = Rc<LoopAnalysisManager>;

    fn invalidate(&mut self, func: &Function, preserved: &PreservedAnalyses) {
        for key in func.loops() {
            self.inner.invalidate(func.loop_ref(key), preserved);
        }
    }

    fn run(&mut self, _: &Function, _: &FunctionAnalysisManager) -> Self::Result {
        Rc::clone(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingSize {
        runs: Rc<Cell<usize>>,
    }

    impl FunctionAnalysisPass for CountingSize {
        type Result = usize;

        fn run(&mut self, func: &Function, _: &FunctionAnalysisManager) -> Self::Result {
            self.runs.set(self.runs.get() + 1);

            func.size()
        }
    }

    struct DoubledSize {
        runs: Rc<Cell<usize>>,
    }

    impl FunctionAnalysisPass for DoubledSize {
        type Result = usize;

        fn dependency_hints(&self) -> &'static [TypeId] {
            analysis_deps!(CountingSize)
        }

        fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> Self::Result {
            self.runs.set(self.runs.get() + 1);

            *am.get::<CountingSize>(func) * 2
        }
    }

    fn fixture() -> (Module, Func, Rc<Cell<usize>>, Rc<Cell<usize>>, FunctionAnalysisManager) {
        let mut module = Module::new("m");
        let f = module.add_function("f", 21);

        let size_runs = Rc::new(Cell::new(0));
        let doubled_runs = Rc::new(Cell::new(0));

        let mut fam = FunctionAnalysisManager::new();
        fam.add_analysis(CountingSize {
            runs: Rc::clone(&size_runs),
        });
        fam.add_analysis(DoubledSize {
            runs: Rc::clone(&doubled_runs),
        });

        (module, f, size_runs, doubled_runs, fam)
    }

    #[test]
    fn get_caches_and_returns_the_identical_object() {
        let (module, f, size_runs, _, fam) = fixture();

        let first = fam.get::<CountingSize>(module.function(f));
        let second = fam.get::<CountingSize>(module.function(f));

        assert_eq!(*first, 21);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(size_runs.get(), 1);
    }

    #[test]
    fn invalidation_respects_the_preserved_set() {
        let (module, f, size_runs, doubled_runs, fam) = fixture();

        let size_before = fam.get::<CountingSize>(module.function(f));
        let _ = fam.get::<DoubledSize>(module.function(f));

        // keep the raw size, drop the derived one
        let mut preserved = PreservedAnalyses::none();
        preserved.preserve::<CountingSize>();

        fam.invalidate(module.function(f), &preserved);

        let size_after = fam.get::<CountingSize>(module.function(f));
        let _ = fam.get::<DoubledSize>(module.function(f));

        assert!(Rc::ptr_eq(&size_before, &size_after));
        assert_eq!(size_runs.get(), 1);
        assert_eq!(doubled_runs.get(), 2);
    }

    #[test]
    fn invalidating_a_dependency_drops_the_dependent() {
        let (module, f, size_runs, doubled_runs, fam) = fixture();

        let doubled = fam.get::<DoubledSize>(module.function(f));

        assert_eq!(*doubled, 42);
        assert_eq!(size_runs.get(), 1);

        // the transform claims it preserved the derived analysis, but it was
        // computed from the raw size, so it has to go anyway
        let mut preserved = PreservedAnalyses::none();
        preserved.preserve::<DoubledSize>();

        fam.invalidate(module.function(f), &preserved);

        let _ = fam.get::<DoubledSize>(module.function(f));

        assert_eq!(doubled_runs.get(), 2);
        assert_eq!(size_runs.get(), 2);
    }

    #[test]
    fn preserving_everything_invalidates_nothing() {
        let (module, f, size_runs, doubled_runs, fam) = fixture();

        let _ = fam.get::<DoubledSize>(module.function(f));

        fam.invalidate(module.function(f), &PreservedAnalyses::all());

        let _ = fam.get::<DoubledSize>(module.function(f));

        assert_eq!(size_runs.get(), 1);
        assert_eq!(doubled_runs.get(), 1);
    }

    #[test]
    fn invalidation_is_per_unit() {
        let (mut module, f, size_runs, _, fam) = fixture();
        let g = module.add_function("g", 4);

        let _ = fam.get::<CountingSize>(module.function(f));
        let _ = fam.get::<CountingSize>(module.function(g));

        fam.invalidate(module.function(f), &PreservedAnalyses::none());

        // g's entry is untouched, only f recomputes
        let _ = fam.get::<CountingSize>(module.function(g));
        let _ = fam.get::<CountingSize>(module.function(f));

        assert_eq!(size_runs.get(), 3);
    }

    #[test]
    fn clear_purges_the_unit_and_its_dependents() {
        let (module, f, size_runs, doubled_runs, fam) = fixture();

        let _ = fam.get::<DoubledSize>(module.function(f));

        fam.clear(module.function(f));

        let _ = fam.get::<DoubledSize>(module.function(f));

        assert_eq!(size_runs.get(), 2);
        assert_eq!(doubled_runs.get(), 2);
    }

    #[test]
    #[should_panic(expected = "trying to get analysis that hasn't been registered")]
    fn unregistered_analysis_panics() {
        std::panic::set_hook(Box::new(|_| {}));

        let mut module = Module::new("m");
        let f = module.add_function("f", 1);
        let fam = FunctionAnalysisManager::new();

        let _ = fam.get::<CountingSize>(module.function(f));
    }

    struct CycleA;
    struct CycleB;

    impl FunctionAnalysisPass for CycleA {
        type Result = usize;

        fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> Self::Result {
            *am.get::<CycleB>(func)
        }
    }

    impl FunctionAnalysisPass for CycleB {
        type Result = usize;

        fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> Self::Result {
            *am.get::<CycleA>(func)
        }
    }

    #[test]
    #[should_panic(expected = "cyclic analysis request")]
    fn cyclic_dependencies_panic() {
        std::panic::set_hook(Box::new(|_| {}));

        let mut module = Module::new("m");
        let f = module.add_function("f", 1);

        let mut fam = FunctionAnalysisManager::new();
        fam.add_analysis(CycleA);
        fam.add_analysis(CycleB);

        let _ = fam.get::<CycleA>(module.function(f));
    }
}
