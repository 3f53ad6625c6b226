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

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

//! # Singleflight - Duplicate-Call Suppression
//!
//! `singleflight` provides a keyed registry of in-flight operations: given a key and an
//! expensive operation, at most one execution of that operation runs at a time per key,
//! and every concurrent caller presenting the same key observes the single execution's
//! outcome, success value or failure alike.
//!
//! Once a flight resolves, its registry entry is removed and the key is free again: the
//! next call starts a brand-new execution. There is no value caching beyond the lifetime
//! of the flight.
//!
//! ## Features
//!
//! * [`Group`]: the keyed registry, offering a blocking [`execute`] and a non-blocking
//!   [`execute_async`] form that share the same per-key coalescing semantics
//! * [`Group::forget`]: forced eviction of a key's in-flight record, cancelling every
//!   attached waiter
//! * [`Group::pending_count`]: a best-effort snapshot of the number of keys in flight
//!
//! ## Runtime Agnostic
//!
//! The asynchronous form is implemented with hand-rolled futures and plain wakers, so it
//! works with any async runtime like Tokio, async-std, or others. The blocking form
//! suspends the calling thread and needs no runtime at all.
//!
//! ## Thread Safety
//!
//! [`Group`] implements `Send` and `Sync` whenever its key, value, and error types do,
//! making it safe to share across thread boundaries, typically behind an `Arc` or in a
//! `static`.
//!
//! ## Examples
//!
//! ```
//! use singleflight::group::Group;
//!
//! let group = Group::new();
//! let value = group
//!     .execute("greeting", || Ok::<_, String>("hello"))
//!     .unwrap();
//! assert_eq!(value, "hello");
//! assert_eq!(group.pending_count(), 0);
//! ```
//!
//! [`Group`]: group::Group
//! [`execute`]: group::Group::execute
//! [`execute_async`]: group::Group::execute_async
//! [`Group::forget`]: group::Group::forget
//! [`Group::pending_count`]: group::Group::pending_count

pub(crate) mod internal;

pub mod group;

#[cfg(test)]
fn test_runtime() -> &'static tokio::runtime::Runtime {
    use std::sync::OnceLock;

    use tokio::runtime::Runtime;
    static RT: OnceLock<Runtime> = OnceLock::new();
    RT.get_or_init(|| Runtime::new().unwrap())
}

#[cfg(test)]
mod tests {
    use crate::group::Error;
    use crate::group::Group;

    #[test]
    fn assert_send_and_sync() {
        fn do_assert_send_and_sync<T: Send + Sync>() {}
        do_assert_send_and_sync::<Group<String, u32, String>>();
        do_assert_send_and_sync::<Error<String>>();
    }
}
