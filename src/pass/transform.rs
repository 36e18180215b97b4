//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022 Evan Cox <evanacox00@gmail.com>. All rights reserved.      //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::{Function, Loop, Module};
use crate::pass::{
    FunctionAnalysisManager, LoopAnalysisManager, ModuleAnalysisManager, PassError,
    PreservedAnalyses,
};

/// What every transform pass produces: the set of analyses it preserved, or
/// a fatal error that aborts the whole run.
pub type TransformResult = Result<PreservedAnalyses, PassError>;

/// Models a pass that possibly performs a transformation over an entire module.
///
/// While the pass may not actually modify the IR, it has the ability to, and needs to
/// declare what it changed (if anything) through [`PreservedAnalyses`]. A fatal
/// failure (malformed IR, a broken invariant) is signaled by returning `Err`
/// instead, which stops the surrounding managers immediately.
pub trait ModuleTransformPass {
    /// A human-readable name for the pass, used in diagnostics.
    fn name(&self) -> &'static str {
        "<unnamed module pass>"
    }

    /// Performs the transformation over a given module.
    ///
    /// This function is expected to act as-if it was pure, i.e. calling the same
    /// pass multiple times on the same IR should produce equivalent IR each time
    /// and should return the same preserved analyses each time.
    fn run(&mut self, module: &mut Module, am: &ModuleAnalysisManager) -> TransformResult;
}

/// Defines a transformation over a single function.
///
/// While the pass may not actually modify the IR, it has the ability to, and needs to
/// declare what it changed (if anything) through [`PreservedAnalyses`].
///
/// Function passes never touch call sites; anything that changes the shape of
/// the call graph has to happen at the SCC or module level where the graph
/// can observe it.
pub trait FunctionTransformPass {
    /// A human-readable name for the pass, used in diagnostics.
    fn name(&self) -> &'static str {
        "<unnamed function pass>"
    }

    /// Performs the transformation over a given function.
    ///
    /// This function is expected to act as-if it was pure, i.e. calling the same
    /// pass multiple times on the same IR should produce equivalent IR each time
    /// and should return the same preserved analyses each time.
    fn run(&mut self, func: &mut Function, am: &FunctionAnalysisManager) -> TransformResult;
}

/// Defines a transformation over a single loop.
pub trait LoopTransformPass {
    /// A human-readable name for the pass, used in diagnostics.
    fn name(&self) -> &'static str {
        "<unnamed loop pass>"
    }

    /// Performs the transformation over a given loop.
    fn run(&mut self, lp: &mut Loop, am: &LoopAnalysisManager) -> TransformResult;
}

// one-off passes are often most convenient as plain closures, so closures
// with the right shape are passes
impl<F> ModuleTransformPass for F
where
    F: FnMut(&mut Module, &ModuleAnalysisManager) -> TransformResult,
{
    fn run(&mut self, module: &mut Module, am: &ModuleAnalysisManager) -> TransformResult {
        self(module, am)
    }
}

impl<F> FunctionTransformPass for F
where
    F: FnMut(&mut Function, &FunctionAnalysisManager) -> TransformResult,
{
    fn run(&mut self, func: &mut Function, am: &FunctionAnalysisManager) -> TransformResult {
        self(func, am)
    }
}

impl<F> LoopTransformPass for F
where
    F: FnMut(&mut Loop, &LoopAnalysisManager) -> TransformResult,
{
    fn run(&mut self, lp: &mut Loop, am: &LoopAnalysisManager) -> TransformResult {
        self(lp, am)
    }
}
