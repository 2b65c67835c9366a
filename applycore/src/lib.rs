//! `applycore` - apply execution engine for an infrastructure orchestrator
//!
//! Given a previously computed execution graph and the prior state snapshot it
//! was planned against, this crate runs every operation in the graph against
//! external provider plugins, with as much concurrency as the graph's
//! dependency edges allow, and produces a new state snapshot together with
//! every diagnostic collected along the way.
//!
//! The main pieces, leaves first:
//!
//! - [`state::SyncState`]: concurrency-safe store of decoded resource instance
//!   objects, built eagerly from the prior state.
//! - [`apply::ExecOperations`]: the operation dispatcher, one method per kind
//!   of execution graph operation, driving all provider calls and state
//!   mutation.
//! - [`tracker`]: observability over every outstanding promise-driven wait.
//! - [`execgraph`]: graph construction, wire format, compilation and
//!   concurrent execution.
//! - [`apply`]: the orchestrator wiring all of the above together.
//!
//! # Example
//!
//! ```rust,ignore
//! use applycore::apply::{apply, Plan};
//! use applycore::cancel::CancelSignal;
//! use applycore::config::ApplyConfig;
//!
//! let plan = Plan::new(prior_state, graph_bytes);
//! let outcome = apply(&plan, plugins, oracle, ApplyConfig::default(), CancelSignal::never()).await;
//! if outcome.diagnostics.has_errors() {
//!     eprintln!("{}", outcome.diagnostics);
//! }
//! persist(&outcome.state);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod addrs;
pub mod apply;
pub mod cancel;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod exec;
pub mod execgraph;
pub mod objchange;
pub mod oracle;
pub mod promise;
pub mod providers;
pub mod schema;
pub mod state;
pub mod tracker;
pub mod value;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use apply::{apply, prepare, ApplyOutcome, Plan, PreparedApply};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use errors::ApplyError;
