//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::analysis_deps;
use crate::graph::SccUnit;
use crate::ir::Function;
use crate::pass::{
    FunctionAnalysisManager, FunctionAnalysisPass, SccAnalysisManager, SccAnalysisPass,
};
use std::any::TypeId;

/// The abstract size of a function body, in instructions.
///
/// Interprocedural passes read this for functions outside the component they
/// are processing, e.g. to weigh a callee before inlining it.
pub struct FunctionSizeAnalysis;

impl FunctionAnalysisPass for FunctionSizeAnalysis {
    type Result = usize;

    fn run(&mut self, func: &Function, _: &FunctionAnalysisManager) -> Self::Result {
        func.size()
    }
}

/// A cost summary for calling into a function.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InlineCost {
    /// The callee's body size.
    pub body: usize,
    /// How many call sites the callee itself contains.
    pub call_sites: usize,
}

/// Computes an [`InlineCost`] for a function.
///
/// Pulls [`FunctionSizeAnalysis`] through the manager, so invalidating the
/// size for a function drags the cached cost down with it.
pub struct InlineCostAnalysis;

impl FunctionAnalysisPass for InlineCostAnalysis {
    type Result = InlineCost;

    fn dependency_hints(&self) -> &'static [TypeId] {
        analysis_deps!(FunctionSizeAnalysis)
    }

    fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> Self::Result {
        InlineCost {
            body: *am.get::<FunctionSizeAnalysis>(func),
            call_sites: func.call_sites().count(),
        }
    }
}

/// The number of functions in a component.
///
/// Mostly useful as a quick "is this worth bothering with" signal for
/// interprocedural passes; a large component means mutual recursion.
pub struct SccSizeAnalysis;

impl SccAnalysisPass for SccSizeAnalysis {
    type Result = usize;

    fn run(&mut self, scc: &SccUnit, _: &SccAnalysisManager) -> Self::Result {
        scc.functions().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Module;
    use crate::pass::PreservedAnalyses;

    #[test]
    fn inline_cost_follows_its_inputs() {
        let mut module = Module::new("m");
        let f = module.add_function("f", 8);
        let g = module.add_function("g", 2);

        module.add_call(f, g);

        let mut fam = FunctionAnalysisManager::new();
        fam.add_analysis(FunctionSizeAnalysis);
        fam.add_analysis(InlineCostAnalysis);

        let cost = fam.get::<InlineCostAnalysis>(module.function(f));

        assert_eq!(*cost, InlineCost { body: 8, call_sites: 1 });

        module.function_mut(f).set_size(4);

        // invalidating the size takes the cost with it, even though the
        // preserved set named the cost explicitly
        let mut preserved = PreservedAnalyses::none();
        preserved.preserve::<InlineCostAnalysis>();

        fam.invalidate(module.function(f), &preserved);

        let cost = fam.get::<InlineCostAnalysis>(module.function(f));

        assert_eq!(*cost, InlineCost { body: 4, call_sites: 1 });
    }
}
