//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::graph::CallGraph;
use crate::ir::Module;
use crate::pass::{ModuleAnalysisManager, ModuleAnalysisPass};
use std::cell::RefCell;
use std::rc::Rc;

/// Builds (and then hands out) the persistent [`CallGraph`] for a module.
///
/// The graph is constructed the first time it is requested and lives in the
/// module-level cache from then on. The CGSCC layer mutates it in place
/// through the shared handle and marks this analysis preserved, so the one
/// graph survives for the remainder of compilation; it is only rebuilt if a
/// transformation that changed calls *without* maintaining it invalidates
/// this analysis.
pub struct CallGraphAnalysis;

impl ModuleAnalysisPass for CallGraphAnalysis {
    type Result = Rc<RefCell<CallGraph>>;

    fn run(&mut self, module: &Module, _: &ModuleAnalysisManager) -> Self::Result {
        Rc::new(RefCell::new(CallGraph::build(module)))
    }
}
