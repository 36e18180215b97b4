//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

#![allow(dead_code)]
#![deny(
    unreachable_pub,
    missing_docs,
    missing_abi,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links
)]
#![allow(unused_variables)]

//! # Beryl
//!
//! A pass scheduling and analysis caching engine for a compiler middle-end:
//! hierarchical pass managers (module / call-graph SCC / function / loop)
//! connected by adaptors, lazy per-unit analysis caches with dependency
//! tracking and precise invalidation, and a persistent call graph that is
//! maintained incrementally while bottom-up interprocedural passes mutate it.

pub mod analysis;
pub mod arena;
pub mod graph;
pub mod ir;
pub mod pass;
pub mod utility;

use crate::analysis::{
    CallGraphAnalysis, FunctionSizeAnalysis, InlineCostAnalysis, SccSizeAnalysis,
};
use crate::pass::{
    FunctionAnalysisManager, FunctionAnalysisManagerModuleProxy, LoopAnalysisManager,
    LoopAnalysisManagerFunctionProxy, ModuleAnalysisManager, ModulePassManager,
    ModuleTransformPass, PassError, SccAnalysisManager, SccAnalysisManagerModuleProxy,
};

/// Builds a [`ModuleAnalysisManager`] with the stock analyses and all of the
/// cross-granularity proxies registered.
///
/// Additional analyses can be registered on top before the first pipeline
/// runs; registration after results exist is not supported.
pub fn default_analysis_manager() -> ModuleAnalysisManager {
    let mut fam = FunctionAnalysisManager::new();
    fam.add_analysis(FunctionSizeAnalysis);
    fam.add_analysis(InlineCostAnalysis);
    fam.add_analysis(LoopAnalysisManagerFunctionProxy::wrap(LoopAnalysisManager::new()));

    let mut sam = SccAnalysisManager::new();
    sam.add_analysis(SccSizeAnalysis);

    let mut mam = ModuleAnalysisManager::new();
    mam.add_analysis(FunctionAnalysisManagerModuleProxy::wrap(fam));
    mam.add_analysis(SccAnalysisManagerModuleProxy::wrap(sam));
    mam.add_analysis(CallGraphAnalysis);

    mam
}

/// A helper function that handles "run this module pipeline to completion"
/// in a way that multiple tools can share.
///
/// The module is the outermost unit, so this is where its once-per-unit
/// invalidation lives: the whole pipeline runs, the preserved sets are
/// intersected, and the module-level caches are invalidated with the result
/// exactly once at the end. A fatal error from any pass aborts immediately
/// and is returned unchanged.
///
/// ```
/// # use beryl::*;
/// # use beryl::ir::*;
/// # use beryl::pass::*;
/// let mut module = Module::new("demo");
/// module.add_function("f", 16);
///
/// let mam = default_analysis_manager();
/// let mut mpm = ModulePassManager::new();
///
/// run_passes(&mut module, &mut mpm, &mam).unwrap();
/// ```
pub fn run_passes(
    module: &mut ir::Module,
    passes: &mut ModulePassManager,
    am: &ModuleAnalysisManager,
) -> Result<(), PassError> {
    let preserved = passes.run(module, am)?;

    am.invalidate(module, &preserved);

    Ok(())
}
