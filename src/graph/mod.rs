//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! The persistent call graph and the interprocedural (CGSCC) scheduling
//! layer built on top of it.
//!
//! The [`CallGraph`] mirrors a module's call sites as edges and keeps the
//! strongly-connected-component partition of those edges current across
//! in-place edits: removals re-decompose only the affected component,
//! additions merge components only when a new cycle actually formed. Every
//! structural change is reported as an [`SccUpdate`].
//!
//! [`SccToModulePassAdapter`] consumes those updates to drive SCC passes
//! bottom-up (callees' components before callers') while the passes are
//! mutating the very graph being walked, revisiting exactly the components
//! whose shape changed. Passes mutate calls through [`CallGraphUpdater`] so
//! the graph observes every edit.

mod callgraph;
mod cgscc;

pub use callgraph::{CallGraph, Scc, SccUnit, SccUpdate};
pub use cgscc::{
    CallGraphUpdater, FunctionToSccPassAdapter, SccPassManager, SccToModulePassAdapter,
    SccTransformPass,
};
