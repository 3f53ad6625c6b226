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

//! Keyed suppression of duplicate in-flight calls.
//!
//! A [`Group`] maps keys to in-progress operations. A caller either starts a
//! new flight for its key and runs the operation itself, or attaches to the
//! flight already in progress and receives that execution's outcome. Entries
//! live only while a flight is in progress; once it resolves the key is free
//! for a brand-new execution.
//!
//! # Examples
//!
//! ```
//! use singleflight::group::Group;
//!
//! let group = Group::new();
//!
//! // Each resolved flight makes room for a fresh one.
//! let first = group.execute("counter", || Ok::<_, String>(1)).unwrap();
//! let second = group.execute("counter", || Ok::<_, String>(2)).unwrap();
//! assert_eq!((first, second), (1, 2));
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use crate::internal::Mutex;

mod call;
use call::Call;


/// The error observed by every caller attached to a failed flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error<E> {
    /// The in-flight call was evicted via [`Group::forget`] before its
    /// outcome was assigned.
    Cancelled,
    /// The operation run for this flight failed. Every attached caller
    /// observes the same error value.
    Operation(E),
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Cancelled => f.write_str("operation cancelled"),
            Error::Operation(e) => write!(f, "operation failed: {e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for Error<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Cancelled => None,
            Error::Operation(e) => Some(e),
        }
    }
}

/// A keyed registry of in-flight operations with duplicate suppression.
///
/// Concurrent calls with the same key coalesce into one execution: the caller
/// that wins the insert race (the leader) runs the operation, and every other
/// caller attaches to the same flight and receives the identical outcome. The
/// registry entry is removed on every exit path, so after a flight resolves a
/// subsequent call starts from scratch.
///
/// Keys group calls that should share an execution; values and errors are
/// delivered to any number of attached callers, hence the `Clone` bounds on
/// the executing methods.
///
/// A call made *inside* an operation for a different key proceeds
/// independently. A call that keys on the flight it is currently running
/// inside attaches to itself and blocks forever; avoiding that is the
/// caller's responsibility.
///
/// See the [module level documentation](self) for more.
pub struct Group<K, V, E> {
    calls: Mutex<HashMap<K, Arc<Call<V, E>>>>,
}

impl<K, V, E> fmt::Debug for Group<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl<K, V, E> Default for Group<K, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> Group<K, V, E> {
    /// Creates an empty group with no flights in progress.
    ///
    /// # Examples
    ///
    /// ```
    /// use singleflight::group::Group;
    ///
    /// let group: Group<String, u64, String> = Group::new();
    /// assert_eq!(group.pending_count(), 0);
    /// ```
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of keys currently in flight.
    ///
    /// This is a best-effort snapshot under concurrent mutation, not a
    /// linearizable view of the whole group.
    pub fn pending_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl<K, V, E> Group<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    /// Runs `op` at most once per flight for `key`, blocking the calling
    /// thread until the flight resolves.
    ///
    /// If no flight for `key` is in progress, this caller starts one and
    /// runs `op` on its own thread. Otherwise it attaches to the existing
    /// flight, `op` is dropped unused, and the thread blocks until the
    /// flight's outcome is assigned.
    ///
    /// # Errors
    ///
    /// * [`Error::Operation`] carries the failure of the operation that ran
    ///   for this flight, whether or not it was this caller's.
    /// * [`Error::Cancelled`] reports that [`Group::forget`] evicted the
    ///   flight before it resolved. The leader observes this too: eviction
    ///   does not interrupt the running operation, but its result is
    ///   discarded.
    ///
    /// If `op` panics, the panic propagates to the leader, attached waiters
    /// observe [`Error::Cancelled`], and the registry entry is removed.
    ///
    /// # Examples
    ///
    /// ```
    /// use singleflight::group::Group;
    ///
    /// let group = Group::new();
    /// let value = group.execute("answer", || Ok::<_, String>(42)).unwrap();
    /// assert_eq!(value, 42);
    /// ```
    pub fn execute<F>(&self, key: K, op: F) -> Result<V, Error<E>>
    where
        F: FnOnce() -> Result<V, E>,
    {
        match self.join_or_start(key) {
            Flight::Attached(call) => call.wait_blocking(),
            Flight::Leader(cleanup) => {
                let outcome = op();
                cleanup.finish(outcome)
            }
        }
    }

    /// Runs `op` at most once per flight for `key`, without blocking the
    /// calling thread.
    ///
    /// The returned future is the handle to the flight's outcome: awaiting
    /// it either drives `op` to completion (for the caller that started the
    /// flight) or waits for the in-progress execution to resolve. All
    /// callers observe the same outcome, as with [`Group::execute`].
    ///
    /// Dropping the leader's future mid-flight abandons the execution: the
    /// flight is cancelled so attached waiters observe
    /// [`Error::Cancelled`] rather than waiting forever, and the entry is
    /// removed.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() {
    /// use singleflight::group::Group;
    ///
    /// let group = Group::new();
    /// let value = group
    ///     .execute_async("answer", async { Ok::<_, String>(42) })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(value, 42);
    /// # }
    /// ```
    pub async fn execute_async<Fut>(&self, key: K, op: Fut) -> Result<V, Error<E>>
    where
        Fut: Future<Output = Result<V, E>>,
    {
        match self.join_or_start(key) {
            Flight::Attached(call) => call.wait().await,
            Flight::Leader(cleanup) => {
                let outcome = op.await;
                cleanup.finish(outcome)
            }
        }
    }

    /// Forcibly removes the key's in-flight record, if present.
    ///
    /// If a record existed and its outcome was not yet assigned, the flight
    /// resolves to [`Error::Cancelled`], every attached caller is unblocked
    /// with that error, and `true` is returned. Otherwise nothing happens
    /// and `false` is returned.
    ///
    /// Racing `forget` against normal resolution (or against other `forget`
    /// calls) is safe: whichever reaches the outcome assignment first wins,
    /// and the others have no effect. The running operation itself is not
    /// interrupted; only what its waiters observe changes.
    ///
    /// # Examples
    ///
    /// ```
    /// use singleflight::group::Group;
    ///
    /// let group: Group<&str, u32, String> = Group::new();
    /// assert!(!group.forget(&"nothing-in-flight"));
    /// ```
    pub fn forget(&self, key: &K) -> bool {
        let call = self.calls.lock().remove(key);
        match call {
            Some(call) => call.cancel(),
            None => false,
        }
    }

    /// Probes for an existing flight under one map lock acquisition, so two
    /// racing callers can never both believe they started the flight. The
    /// lock is released before any operation runs.
    fn join_or_start(&self, key: K) -> Flight<'_, K, V, E> {
        let mut calls = self.calls.lock();
        match calls.entry(key) {
            Entry::Occupied(entry) => Flight::Attached(entry.get().clone()),
            Entry::Vacant(entry) => {
                let key = entry.key().clone();
                let call = Arc::new(Call::new());
                entry.insert(call.clone());
                Flight::Leader(Cleanup {
                    group: self,
                    key,
                    call,
                })
            }
        }
    }
}

enum Flight<'a, K: Eq + Hash, V, E> {
    /// This caller joined a flight already in progress.
    Attached(Arc<Call<V, E>>),
    /// This caller won the insert race and must run the operation.
    Leader(Cleanup<'a, K, V, E>),
}

/// Guaranteed-removal guard held by the leader while its operation runs.
///
/// Dropped without a prior resolution (operation panic, or the leader's
/// future dropped mid-flight), it cancels the call so attached waiters are
/// not stranded, then removes the registry entry. Removal only happens when
/// the map still holds *this* call: a successor flight started after a
/// `forget` must not be evicted by a stale cleanup.
struct Cleanup<'a, K: Eq + Hash, V, E> {
    group: &'a Group<K, V, E>,
    key: K,
    call: Arc<Call<V, E>>,
}

impl<K: Eq + Hash, V, E> Cleanup<'_, K, V, E> {
    /// Resolves the flight with the operation's outcome, removes the entry,
    /// and reports what the flight actually settled on, which is
    /// [`Error::Cancelled`] when a concurrent [`Group::forget`] won the
    /// race.
    fn finish(self, outcome: Result<V, E>) -> Result<V, Error<E>>
    where
        V: Clone,
        E: Clone,
    {
        self.call.resolve(outcome.map_err(Error::Operation));
        let call = self.call.clone();
        drop(self);

        match call.try_outcome() {
            Some(outcome) => outcome,
            None => unreachable!("[BUG] flight settled without an outcome"),
        }
    }
}

impl<K: Eq + Hash, V, E> Drop for Cleanup<'_, K, V, E> {
    fn drop(&mut self) {
        // no-op when the flight already resolved normally
        self.call.cancel();

        let mut calls = self.group.calls.lock();
        let still_ours = calls
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.call));
        if still_ours {
            calls.remove(&self.key);
        }
    }
}
