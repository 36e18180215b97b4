//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::{Func, Function, LoopKey, Module};
use crate::pass::*;
use tracing::debug;

/// Manages running a set of passes over IR.
///
/// An important note is that this is actually a module pass itself, it's a pass
/// that simply runs other passes. Running it means running every pass in order
/// over the module and intersecting the preserved sets; the module-level
/// invalidation with that intersection happens once, in whatever drives the
/// manager (see [`run_passes`](crate::run_passes)).
#[derive(Default)]
pub struct ModulePassManager {
    passes: Vec<Box<dyn ModuleTransformPass>>,
}

impl ModulePassManager {
    /// Creates a new, empty, module pass manager.
    pub fn new() -> Self {
        Self {
            passes: Vec::default(),
        }
    }

    /// Adds a transformation pass to the pass manager. This pass's order is defined
    /// relative to other calls to [`Self::add_pass`].
    pub fn add_pass<T: ModuleTransformPass + 'static>(&mut self, pass: T) {
        self.passes.push(Box::new(pass));
    }
}

impl ModuleTransformPass for ModulePassManager {
    fn name(&self) -> &'static str {
        "module-pass-manager"
    }

    fn run(&mut self, module: &mut Module, am: &ModuleAnalysisManager) -> TransformResult {
        let mut preserved = PreservedAnalyses::all();

        for pass in self.passes.iter_mut() {
            debug!(pass = pass.name(), "running module pass");

            let other = pass.run(module, am)?;

            preserved = preserved.intersect(other)
        }

        Ok(preserved)
    }
}

/// Manages running a set of passes over individual functions in the IR.
///
/// An important note is that this is actually a function pass itself, it's a pass
/// that simply runs other passes. The adaptor driving it runs the entire
/// sequence over one function before moving to the next, which is what keeps
/// the per-function analysis caches hot.
#[derive(Default)]
pub struct FunctionPassManager {
    passes: Vec<Box<dyn FunctionTransformPass>>,
}

impl FunctionPassManager {
    /// Creates a new, empty, function pass manager.
    pub fn new() -> Self {
        Self {
            passes: Vec::default(),
        }
    }

    /// Adds a transformation pass to the pass manager. This pass's order is defined
    /// relative to other calls to [`Self::add_pass`].
    pub fn add_pass<T: FunctionTransformPass + 'static>(&mut self, pass: T) {
        self.passes.push(Box::new(pass));
    }
}

impl FunctionTransformPass for FunctionPassManager {
    fn name(&self) -> &'static str {
        "function-pass-manager"
    }

    fn run(&mut self, func: &mut Function, am: &FunctionAnalysisManager) -> TransformResult {
        let mut preserved = PreservedAnalyses::all();

        for pass in self.passes.iter_mut() {
            debug!(pass = pass.name(), func = func.name(), "running function pass");

            let other = pass.run(func, am)?;

            preserved = preserved.intersect(other)
        }

        Ok(preserved)
    }
}

/// Manages running a set of passes over individual loops of one function.
#[derive(Default)]
pub struct LoopPassManager {
    passes: Vec<Box<dyn LoopTransformPass>>,
}

impl LoopPassManager {
    /// Creates a new, empty, loop pass manager.
    pub fn new() -> Self {
        Self {
            passes: Vec::default(),
        }
    }

    /// Adds a transformation pass to the pass manager. This pass's order is defined
    /// relative to other calls to [`Self::add_pass`].
    pub fn add_pass<T: LoopTransformPass + 'static>(&mut self, pass: T) {
        self.passes.push(Box::new(pass));
    }
}

impl LoopTransformPass for LoopPassManager {
    fn name(&self) -> &'static str {
        "loop-pass-manager"
    }

    fn run(&mut self, lp: &mut crate::ir::Loop, am: &LoopAnalysisManager) -> TransformResult {
        let mut preserved = PreservedAnalyses::all();

        for pass in self.passes.iter_mut() {
            debug!(pass = pass.name(), "running loop pass");

            let other = pass.run(lp, am)?;

            preserved = preserved.intersect(other)
        }

        Ok(preserved)
    }
}

/// Adapts a function transform pass to a module pass that runs the given
/// function pass over every function in the module.
///
/// This is mostly used when building the final pass pipeline. Every function
/// gets the full inner sequence before the next function starts, and each
/// function's invalidation runs exactly once, right after its sequence.
///
/// Because the adaptor has already invalidated at function granularity, it
/// marks the function-manager proxy preserved in the set it hands upward;
/// module-level analyses whose validity crossed the function boundary are
/// still invalidated by the projected intersection.
pub struct FunctionToModulePassAdapter {
    pass: Box<dyn FunctionTransformPass + 'static>,
}

impl FunctionToModulePassAdapter {
    /// Adapts a given pass into a [`FunctionToModulePassAdapter`] that can then
    /// be used as a module pass.
    pub fn adapt<T: FunctionTransformPass + 'static>(pass: T) -> Self {
        Self {
            pass: Box::new(pass),
        }
    }
}

impl ModuleTransformPass for FunctionToModulePassAdapter {
    fn name(&self) -> &'static str {
        "function-to-module-adapter"
    }

    fn run(&mut self, module: &mut Module, am: &ModuleAnalysisManager) -> TransformResult {
        let fam = am.function_manager(module);
        let funcs: Vec<Func> = module.functions().collect();
        let mut preserved = PreservedAnalyses::all();

        for func in funcs {
            let other = self.pass.run(module.function_mut(func), &fam)?;

            fam.invalidate(module.function(func), &other);
            drain_dead_loops(module, func, &fam);

            preserved = preserved.intersect(other);
        }

        preserved.preserve::<FunctionAnalysisManagerModuleProxy>();

        Ok(preserved)
    }
}

/// Adapts a loop transform pass to a function pass that runs it over every
/// loop of the function, innermost registration order.
///
/// Works just like [`FunctionToModulePassAdapter`] one level down: the whole
/// inner sequence runs per loop, each loop is invalidated once after its
/// sequence, and the loop-manager proxy is marked preserved in the result.
pub struct LoopToFunctionPassAdapter {
    pass: Box<dyn LoopTransformPass + 'static>,
}

impl LoopToFunctionPassAdapter {
    /// Adapts a given pass into a [`LoopToFunctionPassAdapter`] that can then
    /// be used as a function pass.
    pub fn adapt<T: LoopTransformPass + 'static>(pass: T) -> Self {
        Self {
            pass: Box::new(pass),
        }
    }
}

impl FunctionTransformPass for LoopToFunctionPassAdapter {
    fn name(&self) -> &'static str {
        "loop-to-function-adapter"
    }

    fn run(&mut self, func: &mut Function, am: &FunctionAnalysisManager) -> TransformResult {
        let lam = am.loop_manager(func);
        let loops: Vec<LoopKey> = func.loops().collect();
        let mut preserved = PreservedAnalyses::all();

        for key in loops {
            // an earlier iteration may have dissolved this loop
            if !func.has_loop(key) {
                continue;
            }

            let other = self.pass.run(func.loop_mut(key), &lam)?;

            lam.invalidate(func.loop_ref(key), &other);

            preserved = preserved.intersect(other);
        }

        for dead in func.take_dead_loops() {
            lam.clear_loop(func.func(), dead);
        }

        preserved.preserve::<LoopAnalysisManagerFunctionProxy>();

        Ok(preserved)
    }
}

pub(crate) fn drain_dead_loops(module: &mut Module, func: Func, fam: &FunctionAnalysisManager) {
    let dead = module.function_mut(func).take_dead_loops();

    if dead.is_empty() || !fam.has_analysis::<LoopAnalysisManagerFunctionProxy>() {
        return;
    }

    let lam = fam.loop_manager(module.function(func));

    for key in dead {
        lam.clear_loop(func, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FunctionSizeAnalysis;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct RecordingPass {
        tag: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl FunctionTransformPass for RecordingPass {
        fn name(&self) -> &'static str {
            self.tag
        }

        fn run(&mut self, func: &mut Function, _: &FunctionAnalysisManager) -> TransformResult {
            self.log.borrow_mut().push(format!("{}({})", self.tag, func.name()));

            Ok(PreservedAnalyses::all())
        }
    }

    fn two_function_module() -> Module {
        let mut module = Module::new("m");
        module.add_function("f1", 10);
        module.add_function("f2", 20);

        module
    }

    #[test]
    fn all_passes_run_on_one_function_before_the_next() {
        let mut module = two_function_module();
        let log = Rc::new(RefCell::new(Vec::new()));

        let mut pipeline = FunctionPassManager::new();
        pipeline.add_pass(RecordingPass {
            tag: "p1",
            log: Rc::clone(&log),
        });
        pipeline.add_pass(RecordingPass {
            tag: "p2",
            log: Rc::clone(&log),
        });

        let mut mam = ModuleAnalysisManager::new();
        mam.add_analysis(FunctionAnalysisManagerModuleProxy::wrap(
            FunctionAnalysisManager::new(),
        ));

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(FunctionToModulePassAdapter::adapt(pipeline));

        let preserved = mpm.run(&mut module, &mam).unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["p1(f1)", "p2(f1)", "p1(f2)", "p2(f2)"]
        );
        assert!(preserved.is_preserved(std::any::TypeId::of::<FunctionSizeAnalysis>()));
    }

    #[test]
    fn a_fatal_pass_stops_later_passes_and_units() {
        let mut module = two_function_module();
        let log = Rc::new(RefCell::new(Vec::new()));

        struct FailOnFirst;

        impl FunctionTransformPass for FailOnFirst {
            fn name(&self) -> &'static str {
                "fail-on-first"
            }

            fn run(&mut self, func: &mut Function, _: &FunctionAnalysisManager) -> TransformResult {
                Err(PassError::MalformedIr {
                    unit: func.name().to_owned(),
                    reason: "broken".to_owned(),
                })
            }
        }

        let mut pipeline = FunctionPassManager::new();
        pipeline.add_pass(RecordingPass {
            tag: "before",
            log: Rc::clone(&log),
        });
        pipeline.add_pass(FailOnFirst);
        pipeline.add_pass(RecordingPass {
            tag: "after",
            log: Rc::clone(&log),
        });

        let mut mam = ModuleAnalysisManager::new();
        mam.add_analysis(FunctionAnalysisManagerModuleProxy::wrap(
            FunctionAnalysisManager::new(),
        ));

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(FunctionToModulePassAdapter::adapt(pipeline));

        let err = mpm.run(&mut module, &mam).unwrap_err();

        assert!(matches!(err, PassError::MalformedIr { .. }));
        // the first pass ran on f1 only; nothing ran after the failure
        assert_eq!(*log.borrow(), vec!["before(f1)"]);
    }

    #[test]
    fn function_invalidation_runs_once_per_function() {
        let mut module = two_function_module();
        let f1 = module.find_function_by_name("f1").unwrap();

        let mut fam = FunctionAnalysisManager::new();
        fam.add_analysis(FunctionSizeAnalysis);

        let mut mam = ModuleAnalysisManager::new();
        mam.add_analysis(FunctionAnalysisManagerModuleProxy::wrap(fam));

        let fam = mam.function_manager(&module);
        let before = fam.get::<FunctionSizeAnalysis>(module.function(f1));

        // a pass that mutates f1 and preserves nothing
        let mutate = |func: &mut Function, _: &FunctionAnalysisManager| -> TransformResult {
            if func.name() == "f1" {
                func.set_size(1);
            }

            Ok(PreservedAnalyses::none())
        };

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(FunctionToModulePassAdapter::adapt(mutate));

        mpm.run(&mut module, &mam).unwrap();

        let after = fam.get::<FunctionSizeAnalysis>(module.function(f1));

        assert!(!Rc::ptr_eq(&before, &after));
        assert_eq!(*after, 1);
    }

    #[test]
    fn loop_adapter_runs_pipeline_per_loop() {
        let mut module = Module::new("m");
        let f = module.add_function("f", 10);

        {
            let func = module.function_mut(f);
            func.add_loop(1, 8);
            func.add_loop(2, 4);
        }

        let shrink = |lp: &mut crate::ir::Loop, _: &LoopAnalysisManager| -> TransformResult {
            lp.set_body_size(lp.body_size() / 2);

            Ok(PreservedAnalyses::none())
        };

        let mut loops = LoopPassManager::new();
        loops.add_pass(shrink);

        let mut fam = FunctionAnalysisManager::new();
        fam.add_analysis(LoopAnalysisManagerFunctionProxy::wrap(
            LoopAnalysisManager::new(),
        ));

        let mut mam = ModuleAnalysisManager::new();
        mam.add_analysis(FunctionAnalysisManagerModuleProxy::wrap(fam));

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(FunctionToModulePassAdapter::adapt(
            LoopToFunctionPassAdapter::adapt(loops),
        ));

        mpm.run(&mut module, &mam).unwrap();

        let func = module.function(f);
        let sizes: Vec<usize> = func.loops().map(|k| func.loop_ref(k).body_size()).collect();

        assert_eq!(sizes, vec![4, 2]);
    }
}
