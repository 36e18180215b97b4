//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! The stock analyses that ship with the engine.
//!
//! Each of these implements one of the analysis-pass traits from
//! [`crate::pass`] and is registered with the matching manager before any
//! pipelines run (see [`default_analysis_manager`](crate::default_analysis_manager)).
//! Nothing here computes eagerly; an analysis runs the first time a pass
//! requests it and then lives in the cache until invalidated.

mod callgraph;
mod size;

pub use callgraph::CallGraphAnalysis;
pub use size::{FunctionSizeAnalysis, InlineCost, InlineCostAnalysis, SccSizeAnalysis};
