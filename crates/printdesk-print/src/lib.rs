// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printdesk Print: durable job store, payload blobs, execution backends
// (mock and IPP), and the job runner that drives every job from `pending` to
// a terminal state.  This crate bridges between the core domain types defined
// in `printdesk-core` and the actual printing infrastructure.

pub mod blob;
pub mod executor;
pub mod ipp_client;
pub mod ipp_executor;
pub mod mock;
pub mod retry;
pub mod runner;
pub mod service;
pub mod store;

#[cfg(test)]
mod test_printer;

pub use blob::BlobStore;
pub use executor::{Executor, Outcome, build_executor};
pub use ipp_client::IppClient;
pub use ipp_executor::IppExecutor;
pub use mock::MockExecutor;
pub use retry::RetryPolicy;
pub use runner::{JobRunner, RunnerOptions, RunnerStats, StatsSnapshot};
pub use service::PrintService;
pub use store::{JobStore, Transition};
