//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022 Evan Cox <evanacox00@gmail.com>. All rights reserved.      //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use std::sync::atomic::{AtomicBool, Ordering};

/// A TTAS (test and test-and-set) spin-lock.
///
/// The mutex has the correct acquire/release semantics on lock/unlock, and will try
/// to inform the CPU when inside the spin-loop with [`core::hint::spin_loop`].
///
/// This is intended for uses where the time spent holding the lock is miniscule, e.x.
/// for the one-time initialization of dependency-hint tables (in which case the lock
/// is only held to perform a single store). **This is not a general purpose mutex.**
#[repr(transparent)]
pub struct SpinMutex {
    flag: AtomicBool,
}

impl SpinMutex {
    /// Creates a new unlocked [`SpinMutex`].
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Locks the mutex, potentially waiting if it's already locked. This follows
    /// the semantics of `Ordering::Acquire`.
    pub fn lock(&self) {
        // our goal here is to prevent refreshing caches on potentially contended locks
        // when multiple threads are going for it. therefore, we need to reduce writes to
        // a bare minimum.
        loop {
            // check first, if the lock isn't taken we get to it with 1 less load and if it
            // isn't, we aren't in any hurry to get into the test loop anyway
            if !self.flag.swap(true, Ordering::Acquire) {
                break;
            }

            // inner loop, reduces number of writes and therefore reduces
            // the need to refresh caches for every core 24/7
            while self.flag.load(Ordering::Relaxed) {
                // hint to the CPU what we're doing, may help or may not. almost
                // certainly doesn't hurt though
                core::hint::spin_loop();
            }
        }
    }

    /// Unlocks the mutex. This follows the semantics of `Ordering::Release`.
    pub fn unlock(&self) {
        self.flag.store(false, Ordering::Release);
    }
}
