// Copyright 2024 tison <wander4096@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::task::Waker;

use slab::Slab;

/// A set of wakers parked on a not-yet-resolved outcome.
///
/// Resolution is a broadcast: every registered waker is woken at once, so
/// unlike a wait queue the set keeps no order among its waiters.
#[derive(Debug)]
pub(crate) struct WaitSet {
    wakers: Slab<Waker>,
}

impl WaitSet {
    pub(crate) const fn new() -> Self {
        Self { wakers: Slab::new() }
    }

    /// Registers a waiter, or refreshes its waker when polled again.
    ///
    /// # Panic
    ///
    /// Panics if `idx` is `Some` but no longer names a live slot.
    pub(crate) fn register(&mut self, idx: &mut Option<usize>, waker: &Waker) {
        match *idx {
            Some(key) => {
                let slot = &mut self.wakers[key];
                if !slot.will_wake(waker) {
                    *slot = waker.clone();
                }
            }
            None => *idx = Some(self.wakers.insert(waker.clone())),
        }
    }

    /// Removes a previously registered waiter without waking it.
    ///
    /// The slot may already be gone if the outcome was assigned first; that
    /// is not an error.
    pub(crate) fn deregister(&mut self, idx: usize) {
        let _ = self.wakers.try_remove(idx);
    }

    /// Takes every registered waker out of the set.
    pub(crate) fn take_all(&mut self) -> Vec<Waker> {
        self.wakers.drain().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.wakers.len()
    }
}
