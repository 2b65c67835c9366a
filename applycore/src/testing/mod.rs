//! Testing utilities for the `applycore` apply engine.
//!
//! Applies only make sense against providers and a configuration evaluator,
//! so this module supplies in-memory versions of both:
//!
//! - [`mocks`]: [`MockProvider`], scriptable per call and recording every
//!   call, and [`MockPlugins`], a plugin library around it
//! - [`oracle`]: [`StaticOracle`], answering from fixed tables
//! - [`fixtures`]: addresses, schemas, objects and states for one test
//!   provider
//! - [`generators`]: property test generators
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use applycore::testing::prelude::*;
//!
//! let provider = Arc::new(MockProvider::new());
//! let oracle = StaticOracle::new()
//!     .with_provider_config(fixtures::provider_instance(), Value::Null)
//!     .with_desired(fixtures::desired(&fixtures::managed_addr("web"), "web"));
//! let outcome = apply(&plan, Arc::new(fixtures::plugins(provider)), Arc::new(oracle), config, cancel).await;
//! ```

pub mod fixtures;
pub mod generators;
pub mod mocks;
pub mod oracle;

pub use mocks::{MockPlugins, MockProvider};
pub use oracle::StaticOracle;

/// Prelude module for convenient imports.
///
/// Import everything needed for testing with:
/// ```rust,ignore
/// use applycore::testing::prelude::*;
/// ```
pub mod prelude {
    pub use super::fixtures;
    pub use super::generators::*;
    pub use super::mocks::{MockPlugins, MockProvider};
    pub use super::oracle::StaticOracle;
    pub use crate::addrs::{DeposedKey, ResourceInstanceAddr, ResourceMode};
    pub use crate::apply::{apply, prepare, ApplyOutcome, Plan};
    pub use crate::cancel::CancelSignal;
    pub use crate::config::ApplyConfig;
    pub use crate::diagnostics::{DiagnosticKind, Diagnostics};
    pub use crate::execgraph::{AnyResultRef, Builder, ResultRef};
    pub use crate::state::{ObjectStatus, State};
    pub use crate::value::Value;
    pub use std::sync::Arc;
}
