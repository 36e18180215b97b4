//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use thiserror::Error;

/// A fatal failure raised by a pass or detected by the engine mid-run.
///
/// Any of these aborts the entire run: the surrounding pass managers stop
/// scheduling further passes and units, and the error propagates unchanged
/// to whoever drove the top-level pipeline. There are no retry or
/// partial-failure semantics, and prior IR mutations are not rolled back.
///
/// Violations of the engine's own contracts (querying an analysis that was
/// never registered, resolving a destroyed unit handle) are bugs in the
/// calling pass rather than user-recoverable conditions, and panic instead.
#[derive(Debug, Error)]
pub enum PassError {
    /// A pass found IR that violates a structural invariant it relies on.
    #[error("malformed ir in `{unit}`: {reason}")]
    MalformedIr {
        /// Name of the unit the pass was running over.
        unit: String,
        /// What the pass found.
        reason: String,
    },

    /// The call graph no longer matches the call sites actually present in
    /// the module, meaning a pass mutated calls without notifying the graph.
    /// The bottom-up ordering guarantee is void at this point, so the run
    /// cannot continue.
    #[error("call graph is out of sync with the module: {0}")]
    GraphDesync(String),

    /// A pass failed for a reason of its own.
    #[error("pass `{pass}` failed: {reason}")]
    Fatal {
        /// Name of the failing pass.
        pass: &'static str,
        /// The pass's own description of the failure.
        reason: String,
    },
}
