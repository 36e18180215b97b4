//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::{Func, Module};
use crate::pass::manager::drain_dead_loops;
use crate::pass::{
    FunctionAnalysisManager, FunctionAnalysisManagerModuleProxy, FunctionPassManager,
    FunctionTransformPass, ModuleAnalysisManager, ModuleTransformPass, PassError,
    PreservedAnalyses, TransformResult,
};
use std::sync::mpsc;
use std::sync::Arc;
use threadpool::ThreadPool;

/// Runs a function pipeline over every function of the module on a pool of
/// worker threads.
///
/// Functions are independent execution items: each worker takes ownership of
/// one function body, builds its *own* pipeline and its own
/// [`FunctionAnalysisManager`] from the factories this adaptor was created
/// with, runs the full sequence, performs the function's invalidation, and
/// hands the body back. No analysis state is shared between workers, so no
/// key is ever computed twice concurrently and no locking is needed.
///
/// Within one function the ordering guarantee is the same as the serial
/// adaptor: the whole sequence runs on that function, then its invalidation
/// runs once. Call-graph shape cannot change here at all, function passes
/// have no mutation channel for call sites.
///
/// The worker-local caches are discarded at the end of the run; the shared
/// function-level manager is invalidated per function with that function's
/// preserved set, so nothing stale survives in it.
pub struct ParallelFunctionToModulePassAdapter {
    jobs: Option<usize>,
    pipeline: Arc<dyn Fn() -> FunctionPassManager + Send + Sync>,
    analyses: Arc<dyn Fn() -> FunctionAnalysisManager + Send + Sync>,
}

impl ParallelFunctionToModulePassAdapter {
    /// Adapts a pipeline into a parallel module pass.
    ///
    /// `pipeline` builds one fresh copy of the function pipeline per worker
    /// job; `analyses` likewise builds the worker-local analysis manager,
    /// registering whatever analyses the pipeline's passes request.
    pub fn adapt<P, A>(pipeline: P, analyses: A) -> Self
    where
        P: Fn() -> FunctionPassManager + Send + Sync + 'static,
        A: Fn() -> FunctionAnalysisManager + Send + Sync + 'static,
    {
        Self {
            jobs: None,
            pipeline: Arc::new(pipeline),
            analyses: Arc::new(analyses),
        }
    }

    /// Pins the worker count instead of using one thread per core.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);

        self
    }
}

impl ModuleTransformPass for ParallelFunctionToModulePassAdapter {
    fn name(&self) -> &'static str {
        "parallel-function-to-module-adapter"
    }

    fn run(&mut self, module: &mut Module, am: &ModuleAnalysisManager) -> TransformResult {
        let pool = match self.jobs {
            Some(n) => ThreadPool::new(n),
            None => ThreadPool::default(),
        };

        let funcs: Vec<Func> = module.functions().collect();
        let (tx, rx) = mpsc::channel();

        for func in funcs.iter().copied() {
            let body = module.take_function(func);
            let tx = tx.clone();
            let pipeline = Arc::clone(&self.pipeline);
            let analyses = Arc::clone(&self.analyses);

            pool.execute(move || {
                let mut pm = pipeline();
                let fam = analyses();
                let mut body = body;

                let result = pm.run(&mut body, &fam);

                if let Ok(preserved) = &result {
                    fam.invalidate(&body, preserved);
                }

                let _ = tx.send((func, body, result));
            });
        }

        // the workers hold the remaining senders; the receive loop ends when
        // the last one finishes
        drop(tx);

        let shared = am.function_manager(module);
        let mut preserved = PreservedAnalyses::all();
        let mut failure: Option<PassError> = None;
        let mut received = 0usize;

        for (func, body, result) in rx.iter() {
            module.put_function(func, body);

            received += 1;

            match result {
                Ok(other) => {
                    shared.invalidate(module.function(func), &other);
                    drain_dead_loops(module, func, &shared);

                    preserved = preserved.intersect(other);
                }
                Err(err) => {
                    // first failure wins; the rest of the bodies still have
                    // to come home before we can report it
                    failure.get_or_insert(err);
                }
            }
        }

        pool.join();

        assert_eq!(
            received,
            funcs.len(),
            "a worker thread panicked mid-pipeline"
        );

        if let Some(err) = failure {
            return Err(err);
        }

        preserved.preserve::<FunctionAnalysisManagerModuleProxy>();

        Ok(preserved)
    }
}
