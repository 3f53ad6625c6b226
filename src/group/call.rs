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

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Condvar;
use std::sync::PoisonError;
use std::task::Context;
use std::task::Poll;

use crate::group::Error;
use crate::internal::Mutex;
use crate::internal::WaitSet;

/// One in-flight execution, shared by every caller attached to it.
///
/// The outcome cell is write-once: [`Call::resolve`] assigns it at most once
/// and the winner wakes every attached waiter. Normal completion and forced
/// eviction race through that single assignment, so exactly one of them is
/// ever observed.
#[derive(Debug)]
pub(super) struct Call<V, E> {
    state: Mutex<CallState<V, E>>,
    /// Wakes threads parked in [`Call::wait_blocking`]; async waiters are
    /// woken through the wakers registered in `state`.
    unblock: Condvar,
}

#[derive(Debug)]
struct CallState<V, E> {
    outcome: Option<Result<V, Error<E>>>,
    waiters: WaitSet,
}

impl<V, E> Call<V, E> {
    pub(super) const fn new() -> Self {
        Self {
            state: Mutex::new(CallState {
                outcome: None,
                waiters: WaitSet::new(),
            }),
            unblock: Condvar::new(),
        }
    }

    /// Assigns the outcome if it is still unassigned, waking every waiter.
    ///
    /// Returns `false` if another resolution got there first; the cell is
    /// left untouched in that case.
    pub(super) fn resolve(&self, outcome: Result<V, Error<E>>) -> bool {
        let wakers = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            state.waiters.take_all()
        };

        self.unblock.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Resolves the call with a cancellation outcome.
    ///
    /// Returns whether the cancellation won the race against normal
    /// completion.
    pub(super) fn cancel(&self) -> bool {
        self.resolve(Err(Error::Cancelled))
    }

    #[cfg(test)]
    pub(super) fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl<V: Clone, E: Clone> Call<V, E> {
    /// Returns the outcome if it has already been assigned.
    pub(super) fn try_outcome(&self) -> Option<Result<V, Error<E>>> {
        self.state.lock().outcome.clone()
    }

    /// Blocks the calling thread until the outcome is assigned.
    ///
    /// Returns immediately when the call is already resolved, so attaching
    /// in the window between resolution and registry removal is fine.
    pub(super) fn wait_blocking(&self) -> Result<V, Error<E>> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            state = self
                .unblock
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns a future that yields the outcome once it is assigned.
    pub(super) fn wait(&self) -> Wait<'_, V, E> {
        Wait {
            idx: None,
            call: self,
        }
    }
}

/// A future attached to a call's outcome.
pub(super) struct Wait<'a, V, E> {
    idx: Option<usize>,
    call: &'a Call<V, E>,
}

impl<V, E> fmt::Debug for Wait<'_, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait").finish_non_exhaustive()
    }
}

impl<V: Clone, E: Clone> Future for Wait<'_, V, E> {
    type Output = Result<V, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Self { idx, call } = self.get_mut();

        let mut state = call.state.lock();
        match &state.outcome {
            Some(outcome) => {
                // resolution already drained any registered waker
                *idx = None;
                Poll::Ready(outcome.clone())
            }
            None => {
                state.waiters.register(idx, cx.waker());
                Poll::Pending
            }
        }
    }
}

impl<V, E> Drop for Wait<'_, V, E> {
    fn drop(&mut self) {
        if let Some(idx) = self.idx {
            self.call.state.lock().waiters.deregister(idx);
        }
    }
}
