//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::analysis::CallGraphAnalysis;
use crate::graph::{CallGraph, Scc, SccUnit, SccUpdate};
use crate::ir::{CallSite, Func, Function, Module};
use crate::pass::{
    drain_dead_loops, FunctionAnalysisManager, FunctionAnalysisManagerModuleProxy,
    FunctionAnalysisPass, FunctionTransformPass, LoopAnalysisManagerFunctionProxy,
    ModuleAnalysisManager, ModuleTransformPass, PreservedAnalyses, SccAnalysisManager,
    SccAnalysisManagerModuleProxy, TransformResult,
};
use crate::utility::SaHashSet;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::debug;

/// The mutation channel between SCC passes and the call graph.
///
/// All call-site and function creation/removal during a CGSCC run has to go
/// through this: each operation performs the module edit and the matching
/// graph edit together, so the graph is never out of sync with the IR it
/// mirrors. (Mutating the module directly instead is detected after the pass
/// and aborts the run, see [`SccToModulePassAdapter`].)
///
/// The updater also gives passes their read path to function-level analyses,
/// including functions *outside* the current component, e.g. inspecting a
/// callee's size while deciding whether to inline it. Those are plain
/// cache reads keyed by function identity; they grant no ownership of the
/// other function's entries.
pub struct CallGraphUpdater<'a> {
    module: &'a mut Module,
    graph: &'a mut CallGraph,
    fam: Rc<FunctionAnalysisManager>,
    log: &'a mut Vec<SccUpdate>,
}

impl<'a> CallGraphUpdater<'a> {
    /// Read access to the whole module.
    pub fn module(&self) -> &Module {
        self.module
    }

    /// Mutable access to the module, for edits to function *bodies*.
    ///
    /// Call sites and function lifetimes must go through the updater's own
    /// methods instead; editing those here desynchronizes the graph and
    /// kills the run.
    pub fn module_mut(&mut self) -> &mut Module {
        self.module
    }

    /// Resolves a function handle.
    pub fn function(&self, func: Func) -> &Function {
        self.module.function(func)
    }

    /// Resolves a function handle mutably, for body edits.
    pub fn function_mut(&mut self, func: Func) -> &mut Function {
        self.module.function_mut(func)
    }

    /// Read access to the call graph being maintained.
    pub fn graph(&self) -> &CallGraph {
        self.graph
    }

    /// The function-level analysis manager backing this run.
    pub fn function_manager(&self) -> Rc<FunctionAnalysisManager> {
        Rc::clone(&self.fam)
    }

    /// Reads a function-level analysis for any function in the module,
    /// inside or outside the current component.
    pub fn function_analysis<A: FunctionAnalysisPass>(&self, func: Func) -> Rc<A::Result> {
        self.fam.get::<A>(self.module.function(func))
    }

    /// Creates a new function and its singleton component.
    pub fn add_function(&mut self, name: &str, size: usize) -> Func {
        let func = self.module.add_function(name, size);

        self.log.push(self.graph.add_node(func));

        func
    }

    /// Removes a function that has no remaining callers, purging all of its
    /// cached analyses (and their dependents) synchronously before the
    /// handle goes dead.
    pub fn remove_function(&mut self, func: Func) {
        {
            let function = self.module.function(func);

            self.fam.clear(function);

            if self.fam.has_analysis::<LoopAnalysisManagerFunctionProxy>() {
                self.fam.loop_manager(function).clear_function(func);
            }
        }

        let update = self.graph.remove_node(func);

        self.module.remove_function(func);
        self.log.push(update);
    }

    /// Records a new direct call and its graph edge. Returns the identity of
    /// the new call site.
    pub fn add_call(&mut self, caller: Func, callee: Func) -> CallSite {
        let site = self.module.add_call(caller, callee);

        if let Some(update) = self.graph.add_edge(site, caller, callee) {
            self.log.push(update);
        }

        site
    }

    /// Deletes a call site and its graph edge.
    pub fn remove_call(&mut self, site: CallSite) {
        let update = self.graph.remove_edge(site);

        self.module.remove_call(site);

        if let Some(update) = update {
            self.log.push(update);
        }
    }
}

/// Defines a transformation over one strongly-connected component.
///
/// The pass receives a membership snapshot of the component, the updater for
/// IR and graph mutation plus cross-component analysis reads, and the
/// SCC-level analysis manager.
pub trait SccTransformPass {
    /// A human-readable name for the pass, used in diagnostics.
    fn name(&self) -> &'static str {
        "<unnamed scc pass>"
    }

    /// Performs the transformation over a given component.
    fn run(
        &mut self,
        scc: &SccUnit,
        cx: &mut CallGraphUpdater<'_>,
        am: &SccAnalysisManager,
    ) -> TransformResult;
}

impl<F> SccTransformPass for F
where
    F: FnMut(&SccUnit, &mut CallGraphUpdater<'_>, &SccAnalysisManager) -> TransformResult,
{
    fn run(
        &mut self,
        scc: &SccUnit,
        cx: &mut CallGraphUpdater<'_>,
        am: &SccAnalysisManager,
    ) -> TransformResult {
        self(scc, cx, am)
    }
}

/// An ordered sequence of SCC passes.
///
/// Unlike the other pass managers this is not itself a pass: the sequencing
/// over components lives in [`SccToModulePassAdapter`], which has to be able
/// to interrupt the sequence when the component it is processing is retired
/// mid-flight.
#[derive(Default)]
pub struct SccPassManager {
    passes: Vec<Box<dyn SccTransformPass>>,
}

impl SccPassManager {
    /// Creates a new, empty, SCC pass manager.
    pub fn new() -> Self {
        Self {
            passes: Vec::default(),
        }
    }

    /// Adds a transformation pass to the pass manager. This pass's order is defined
    /// relative to other calls to [`Self::add_pass`].
    pub fn add_pass<T: SccTransformPass + 'static>(&mut self, pass: T) {
        self.passes.push(Box::new(pass));
    }
}

/// Adapts a function transform pass into an SCC pass that runs it over every
/// member function of the component.
pub struct FunctionToSccPassAdapter {
    pass: Box<dyn FunctionTransformPass + 'static>,
}

impl FunctionToSccPassAdapter {
    /// Adapts a given pass into a [`FunctionToSccPassAdapter`] that can then
    /// be used as an SCC pass.
    pub fn adapt<T: FunctionTransformPass + 'static>(pass: T) -> Self {
        Self {
            pass: Box::new(pass),
        }
    }
}

impl SccTransformPass for FunctionToSccPassAdapter {
    fn name(&self) -> &'static str {
        "function-to-scc-adapter"
    }

    fn run(
        &mut self,
        scc: &SccUnit,
        cx: &mut CallGraphUpdater<'_>,
        _: &SccAnalysisManager,
    ) -> TransformResult {
        let fam = cx.function_manager();
        let mut preserved = PreservedAnalyses::all();

        for &func in scc.functions() {
            let other = self.pass.run(cx.function_mut(func), &fam)?;

            fam.invalidate(cx.function(func), &other);

            preserved = preserved.intersect(other);
        }

        Ok(preserved)
    }
}

/// Drives a sequence of SCC passes over the call graph, bottom-up, as a
/// module pass.
///
/// The run is a work queue seeded with the full postorder (callees'
/// components before callers'). Each popped component gets the entire pass
/// sequence; after every pass the adaptor looks at what the updater did to
/// the graph:
///
/// - if the current component was split, its remaining passes are abandoned
///   and the pieces are queued (bottom-up) where it was, so each piece runs
///   the full pipeline exactly once;
/// - if a merge absorbed the current component or an already-processed one,
///   the merged component is queued at the front and processed to completion
///   exactly once before anything behind it; when several merges land in one
///   pass, the most recently created component runs first;
/// - retired components still sitting in the queue are skipped lazily.
///
/// After each pass the graph is also verified against the module's actual
/// call sites; a mismatch means a pass bypassed the updater, and the run
/// aborts with [`PassError::GraphDesync`](crate::pass::PassError).
pub struct SccToModulePassAdapter {
    pipeline: SccPassManager,
}

impl SccToModulePassAdapter {
    /// Adapts a single SCC pass into a module pass.
    pub fn adapt<T: SccTransformPass + 'static>(pass: T) -> Self {
        let mut pipeline = SccPassManager::new();

        pipeline.add_pass(pass);

        Self { pipeline }
    }

    /// Adapts a whole SCC pipeline into a module pass.
    pub fn adapt_pipeline(pipeline: SccPassManager) -> Self {
        Self { pipeline }
    }
}

impl ModuleTransformPass for SccToModulePassAdapter {
    fn name(&self) -> &'static str {
        "scc-to-module-adapter"
    }

    fn run(&mut self, module: &mut Module, am: &ModuleAnalysisManager) -> TransformResult {
        let graph_rc = Rc::clone(&*am.get::<CallGraphAnalysis>(module));
        let sam = am.scc_manager(module);
        let fam = am.function_manager(module);

        let mut queue: VecDeque<Scc> = graph_rc.borrow().postorder().into();
        let mut processed: SaHashSet<Scc> = SaHashSet::default();
        let mut preserved_total = PreservedAnalyses::all();
        let mut log: Vec<SccUpdate> = Vec::new();

        while let Some(scc) = queue.pop_front() {
            if processed.contains(&scc) || !graph_rc.borrow().is_live(scc) {
                continue;
            }

            let members: Vec<Func> = graph_rc.borrow().members(scc).to_vec();
            let mut preserved = PreservedAnalyses::all();
            let mut retired = false;

            for pass in self.pipeline.passes.iter_mut() {
                let unit = graph_rc.borrow().unit(scc);

                debug!(pass = pass.name(), "running scc pass");

                let result = {
                    let mut graph = graph_rc.borrow_mut();
                    let mut updater = CallGraphUpdater {
                        module: &mut *module,
                        graph: &mut graph,
                        fam: Rc::clone(&fam),
                        log: &mut log,
                    };

                    pass.run(&unit, &mut updater, &sam)
                };

                let other = result?;

                graph_rc.borrow().verify(module)?;

                preserved = preserved.intersect(other);

                for update in log.drain(..) {
                    match update {
                        SccUpdate::Split { of, into } => {
                            sam.clear_scc(of);
                            processed.remove(&of);

                            if of == scc {
                                retired = true;
                            }

                            // pieces arrive bottom-up; reversing the pushes
                            // leaves the bottom-most piece at the front
                            for piece in into.iter().rev() {
                                queue.push_front(*piece);
                            }
                        }
                        SccUpdate::Merged { into, absorbed } => {
                            for old in absorbed {
                                sam.clear_scc(old);
                                processed.remove(&old);

                                if old == scc {
                                    retired = true;
                                }
                            }

                            queue.push_front(into);
                        }
                        SccUpdate::NodeAdded { scc: added, .. } => {
                            // a brand new function has no callees, so it is
                            // safe to process ahead of everything pending
                            queue.push_front(added);
                        }
                        SccUpdate::NodeRemoved { scc: removed, .. } => {
                            sam.clear_scc(removed);
                            processed.remove(&removed);

                            if removed == scc {
                                retired = true;
                            }
                        }
                    }
                }

                if retired {
                    break;
                }
            }

            // invalidation runs once per component, right after its pass
            // sequence. a retired component's own entries were purged
            // wholesale already, but the member functions it was snapshotted
            // with may have been mutated and still need theirs.
            if !retired {
                sam.invalidate(&graph_rc.borrow().unit(scc), &preserved);
                processed.insert(scc);
            }

            for func in members {
                if module.contains_function(func) {
                    fam.invalidate(module.function(func), &preserved);
                    drain_dead_loops(module, func, &fam);
                }
            }

            preserved_total = preserved_total.intersect(preserved);
        }

        // the graph was maintained incrementally, and the finer-grained
        // invalidation already happened per unit above
        preserved_total.preserve::<CallGraphAnalysis>();
        preserved_total.preserve::<SccAnalysisManagerModuleProxy>();
        preserved_total.preserve::<FunctionAnalysisManagerModuleProxy>();

        Ok(preserved_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FunctionSizeAnalysis;
    use crate::pass::{ModulePassManager, PassError, SccAnalysisPass};
    use std::cell::RefCell;

    fn manager_with_defaults() -> ModuleAnalysisManager {
        let mut fam = FunctionAnalysisManager::new();
        fam.add_analysis(FunctionSizeAnalysis);

        let mut mam = ModuleAnalysisManager::new();
        mam.add_analysis(FunctionAnalysisManagerModuleProxy::wrap(fam));
        mam.add_analysis(SccAnalysisManagerModuleProxy::wrap(SccAnalysisManager::new()));
        mam.add_analysis(CallGraphAnalysis);

        mam
    }

    fn sorted_names(module: &Module, unit: &SccUnit) -> Vec<String> {
        let mut names: Vec<String> = unit
            .functions()
            .iter()
            .map(|f| module.function(*f).name().to_owned())
            .collect();

        names.sort();
        names
    }

    struct RecordingSccPass {
        log: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl SccTransformPass for RecordingSccPass {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn run(
            &mut self,
            scc: &SccUnit,
            cx: &mut CallGraphUpdater<'_>,
            _: &SccAnalysisManager,
        ) -> TransformResult {
            self.log.borrow_mut().push(sorted_names(cx.module(), scc));

            Ok(PreservedAnalyses::all())
        }
    }

    #[test]
    fn components_are_processed_bottom_up() {
        // a -> b -> c: three singletons, processed c, b, a
        let mut module = Module::new("m");
        let a = module.add_function("a", 10);
        let b = module.add_function("b", 20);
        let c = module.add_function("c", 30);

        module.add_call(a, b);
        module.add_call(b, c);

        let log = Rc::new(RefCell::new(Vec::new()));
        let mam = manager_with_defaults();

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(SccToModulePassAdapter::adapt(RecordingSccPass {
            log: Rc::clone(&log),
        }));

        mpm.run(&mut module, &mam).unwrap();

        assert_eq!(*log.borrow(), vec![vec!["c"], vec!["b"], vec!["a"]]);
    }

    struct CalleeSizeReader {
        log: Rc<RefCell<Vec<(String, Vec<usize>)>>>,
    }

    impl SccTransformPass for CalleeSizeReader {
        fn name(&self) -> &'static str {
            "callee-size-reader"
        }

        fn run(
            &mut self,
            scc: &SccUnit,
            cx: &mut CallGraphUpdater<'_>,
            _: &SccAnalysisManager,
        ) -> TransformResult {
            for &func in scc.functions() {
                // warm the cache for our own function, then read callees'
                let _ = cx.function_analysis::<FunctionSizeAnalysis>(func);

                let mut sizes: Vec<usize> = cx
                    .graph()
                    .callees(func)
                    .map(|(_, callee)| *cx.function_analysis::<FunctionSizeAnalysis>(callee))
                    .collect();

                sizes.sort();

                let name = cx.function(func).name().to_owned();

                self.log.borrow_mut().push((name, sizes));
            }

            Ok(PreservedAnalyses::all())
        }
    }

    #[test]
    fn callee_analyses_are_readable_across_components() {
        let mut module = Module::new("m");
        let a = module.add_function("a", 10);
        let b = module.add_function("b", 20);
        let c = module.add_function("c", 30);

        module.add_call(a, b);
        module.add_call(b, c);

        let log = Rc::new(RefCell::new(Vec::new()));
        let mam = manager_with_defaults();

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(SccToModulePassAdapter::adapt(CalleeSizeReader {
            log: Rc::clone(&log),
        }));

        mpm.run(&mut module, &mam).unwrap();

        // bottom-up, each caller sees its callee's already-cached size
        assert_eq!(
            *log.borrow(),
            vec![
                ("c".to_owned(), vec![]),
                ("b".to_owned(), vec![30]),
                ("a".to_owned(), vec![20]),
            ]
        );

        // reading across components never re-decomposed anything: the three
        // nodes visited by the initial build are all there ever were
        let graph = Rc::clone(&*mam.get::<CallGraphAnalysis>(&module));

        assert_eq!(graph.borrow().decomposition_visits(), 3);
    }

    struct MergeOnProcess {
        caller: Func,
        callee: Func,
        done: bool,
        log: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl SccTransformPass for MergeOnProcess {
        fn name(&self) -> &'static str {
            "merge-on-process"
        }

        fn run(
            &mut self,
            scc: &SccUnit,
            cx: &mut CallGraphUpdater<'_>,
            _: &SccAnalysisManager,
        ) -> TransformResult {
            self.log.borrow_mut().push(sorted_names(cx.module(), scc));

            if !self.done && scc.functions().contains(&self.caller) {
                self.done = true;
                cx.add_call(self.caller, self.callee);
            }

            Ok(PreservedAnalyses::all())
        }
    }

    #[test]
    fn a_merge_reprocesses_the_merged_component_once() {
        // f <-> g, h -> f; processing {f, g} adds g -> h, closing the cycle
        // f -> g -> h -> f, so everything merges
        let mut module = Module::new("m");
        let f = module.add_function("f", 1);
        let g = module.add_function("g", 2);
        let h = module.add_function("h", 3);

        module.add_call(f, g);
        module.add_call(g, f);
        module.add_call(h, f);

        let log = Rc::new(RefCell::new(Vec::new()));
        let mam = manager_with_defaults();

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(SccToModulePassAdapter::adapt(MergeOnProcess {
            caller: g,
            callee: h,
            done: false,
            log: Rc::clone(&log),
        }));

        mpm.run(&mut module, &mam).unwrap();

        // the old {f, g} shape ran once, the merged shape ran exactly once
        // more, and {h} never ran in isolation
        assert_eq!(
            *log.borrow(),
            vec![vec!["f", "g"], vec!["f", "g", "h"]]
        );
    }

    struct SplitOnProcess {
        site: CallSite,
        done: bool,
        log: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl SccTransformPass for SplitOnProcess {
        fn name(&self) -> &'static str {
            "split-on-process"
        }

        fn run(
            &mut self,
            scc: &SccUnit,
            cx: &mut CallGraphUpdater<'_>,
            _: &SccAnalysisManager,
        ) -> TransformResult {
            self.log.borrow_mut().push(sorted_names(cx.module(), scc));

            if !self.done && scc.functions().len() == 3 {
                self.done = true;
                cx.remove_call(self.site);
            }

            Ok(PreservedAnalyses::all())
        }
    }

    #[test]
    fn a_split_requeues_the_pieces_bottom_up() {
        // f -> g -> h -> f; the pass removes h -> f while processing the cycle
        let mut module = Module::new("m");
        let f = module.add_function("f", 1);
        let g = module.add_function("g", 2);
        let h = module.add_function("h", 3);

        module.add_call(f, g);
        module.add_call(g, h);
        let closing = module.add_call(h, f);

        let log = Rc::new(RefCell::new(Vec::new()));
        let mam = manager_with_defaults();

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(SccToModulePassAdapter::adapt(SplitOnProcess {
            site: closing,
            done: false,
            log: Rc::clone(&log),
        }));

        mpm.run(&mut module, &mam).unwrap();

        // each piece gets the full pipeline, callee-most first
        assert_eq!(
            *log.borrow(),
            vec![
                vec!["f", "g", "h"],
                vec!["h"],
                vec!["g"],
                vec!["f"],
            ]
        );
    }

    struct BypassingPass;

    impl SccTransformPass for BypassingPass {
        fn name(&self) -> &'static str {
            "bypassing"
        }

        fn run(
            &mut self,
            scc: &SccUnit,
            cx: &mut CallGraphUpdater<'_>,
            _: &SccAnalysisManager,
        ) -> TransformResult {
            // edits a call site without telling the graph
            let func = scc.functions()[0];

            cx.module_mut().add_call(func, func);

            Ok(PreservedAnalyses::all())
        }
    }

    #[test]
    fn bypassing_the_updater_is_a_fatal_error() {
        let mut module = Module::new("m");
        module.add_function("f", 1);

        let mam = manager_with_defaults();

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(SccToModulePassAdapter::adapt(BypassingPass));

        let err = mpm.run(&mut module, &mam).unwrap_err();

        assert!(matches!(err, PassError::GraphDesync(_)));
    }

    struct MemberCount;

    impl SccAnalysisPass for MemberCount {
        type Result = usize;

        fn run(&mut self, scc: &SccUnit, _: &SccAnalysisManager) -> Self::Result {
            scc.functions().len()
        }
    }

    struct CountReader {
        log: Rc<RefCell<Vec<usize>>>,
    }

    impl SccTransformPass for CountReader {
        fn name(&self) -> &'static str {
            "count-reader"
        }

        fn run(
            &mut self,
            scc: &SccUnit,
            _: &mut CallGraphUpdater<'_>,
            am: &SccAnalysisManager,
        ) -> TransformResult {
            self.log.borrow_mut().push(*am.get::<MemberCount>(scc));

            Ok(PreservedAnalyses::all())
        }
    }

    #[test]
    fn scc_level_analyses_are_cached_per_component() {
        let mut module = Module::new("m");
        let f = module.add_function("f", 1);
        let g = module.add_function("g", 2);

        module.add_call(f, g);
        module.add_call(g, f);
        module.add_function("solo", 3);

        let mut sam = SccAnalysisManager::new();
        sam.add_analysis(MemberCount);

        let mut fam = FunctionAnalysisManager::new();
        fam.add_analysis(FunctionSizeAnalysis);

        let mut mam = ModuleAnalysisManager::new();
        mam.add_analysis(FunctionAnalysisManagerModuleProxy::wrap(fam));
        mam.add_analysis(SccAnalysisManagerModuleProxy::wrap(sam));
        mam.add_analysis(CallGraphAnalysis);

        let log = Rc::new(RefCell::new(Vec::new()));

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(SccToModulePassAdapter::adapt(CountReader {
            log: Rc::clone(&log),
        }));

        mpm.run(&mut module, &mam).unwrap();

        let mut counts = log.borrow().clone();
        counts.sort();

        assert_eq!(counts, vec![1, 2]);
    }
}
