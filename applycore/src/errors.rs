//! Error types for applycore.
//!
//! Each fallible subsystem gets its own error enum so that callers can tell
//! apart the failures they can act on. The error design follows these
//! principles:
//!
//! - **Rich error information**: every variant carries the address, element
//!   index or attribute path needed to find the problem.
//! - **Type safety**: different error types for different subsystems.
//! - **Composable**: errors convert into [`Diagnostic`](crate::diagnostics::Diagnostic)
//!   values once they cross into graph execution, where failures accumulate
//!   instead of stopping the run.
//!
//! # Error Categories
//!
//! - **`AddrParseError`**: malformed resource or provider addresses
//! - **`ValueError`**: values that do not conform to a schema, or cannot be persisted
//! - **`ObjectChangeError`**: a provider result that disagrees with what was planned
//! - **`GraphDecodeError`** / **`GraphEncodeError`**: execution graph wire format failures
//! - **`StateError`**: state snapshot and stored object failures
//! - **`ProviderError`**: plugin library failures (unknown provider, missing schema)
//! - **`PromiseError`**: a promise whose resolver went away without resolving it
//! - **`BuildError`**: misuse of the graph or dispatcher builders
//! - **`ApplyError`**: the fatal-to-apply class that aborts before any provider call

use crate::addrs::{ProviderAddr, ResourceInstanceAddr, ResourceMode};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::promise::RequestId;
use thiserror::Error;

/// Errors produced while parsing textual addresses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrParseError {
    /// The input ended before the address was complete.
    #[error("address {input:?} ends early: expected {expected}")]
    UnexpectedEnd {
        /// The full input being parsed
        input: String,
        /// What the parser was looking for
        expected: &'static str,
    },

    /// The parser found a character it could not use at this position.
    #[error("unexpected {found:?} at offset {offset} in address {input:?}: expected {expected}")]
    Unexpected {
        /// The full input being parsed
        input: String,
        /// Byte offset of the offending character
        offset: usize,
        /// The offending character
        found: char,
        /// What the parser was looking for
        expected: &'static str,
    },

    /// A name segment is not a valid identifier.
    #[error("invalid name {0:?}: names start with a letter or underscore and contain only letters, digits, underscores and dashes")]
    InvalidName(String),

    /// An instance key could not be parsed.
    #[error("invalid instance key in address {input:?}: {reason}")]
    InvalidKey {
        /// The full input being parsed
        input: String,
        /// Why the key was rejected
        reason: String,
    },

    /// A provider source address does not have three segments.
    #[error("invalid provider source address {0:?}: expected hostname/namespace/type")]
    InvalidProvider(String),

    /// A deposed key is not eight hexadecimal digits.
    #[error("invalid deposed key {0:?}: expected eight hexadecimal digits")]
    InvalidDeposedKey(String),
}

/// Errors produced when a value does not fit the type a schema expects.
///
/// Paths are rendered relative to the object root, for example
/// `.tags["env"]` or `.ports[2]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// The value has the wrong type.
    #[error("{path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Attribute path of the offending value
        path: String,
        /// The expected type
        expected: String,
        /// The kind of value that was found
        found: &'static str,
    },

    /// An object carries an attribute the schema does not declare.
    #[error("{path}: unsupported attribute {name:?}")]
    UnexpectedAttribute {
        /// Path of the containing object
        path: String,
        /// The undeclared attribute
        name: String,
    },

    /// A value is still unknown where a known value is required.
    #[error("{path}: value is not yet known")]
    Unknown {
        /// Attribute path of the unknown value
        path: String,
    },
}

/// A single disagreement between a planned value and the value a provider
/// actually produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {message}")]
pub struct ObjectChangeError {
    /// Attribute path of the disagreement
    pub path: String,
    /// Human-readable description
    pub message: String,
}

/// Errors produced while decoding a serialized execution graph.
///
/// Any of these is fatal to the whole apply: a graph that cannot be decoded
/// cannot be partially executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphDecodeError {
    /// The bytes are not a valid graph envelope.
    #[error("malformed execution graph: {0}")]
    Malformed(String),

    /// The envelope uses a format version this engine does not understand.
    #[error("unsupported execution graph format version {found} (this engine supports version {supported})")]
    UnsupportedVersion {
        /// The version found in the envelope
        found: u32,
        /// The only version supported
        supported: u32,
    },

    /// An operand refers to an element at or after the referring element.
    #[error("element {element} refers to element {target}, which does not precede it")]
    ForwardReference {
        /// Index of the referring element
        element: usize,
        /// Index of the referenced element
        target: u64,
    },

    /// An operand refers to an element that produces no result.
    #[error("element {element} refers to element {target}, which does not produce a result")]
    NotAResult {
        /// Index of the referring element
        element: usize,
        /// Index of the referenced element
        target: u64,
    },

    /// An operation has the wrong number of operands.
    #[error("element {element}: {opcode} takes {expected} operands, but {found} were given")]
    WrongOperandCount {
        /// Index of the operation element
        element: usize,
        /// The operation's opcode name
        opcode: &'static str,
        /// Number of operands the opcode takes
        expected: usize,
        /// Number of operands found
        found: usize,
    },

    /// An operand refers to a result of the wrong kind.
    #[error("element {element}: operand {position} of {opcode} must be {expected}, but refers to {found}")]
    WrongOperandKind {
        /// Index of the operation element
        element: usize,
        /// The operation's opcode name
        opcode: &'static str,
        /// Zero-based operand position
        position: usize,
        /// Description of the expected operand
        expected: String,
        /// Description of what was found
        found: String,
    },

    /// An address element could not be parsed.
    #[error("element {element}: {source}")]
    InvalidAddress {
        /// Index of the address element
        element: usize,
        /// The parse failure
        source: AddrParseError,
    },

    /// A resource instance result entry is unusable.
    #[error("element {element}: final state for {addr} must refer to an operation producing a resource instance object")]
    DanglingResult {
        /// Index of the result element
        element: usize,
        /// The resource instance whose result was registered
        addr: String,
    },

    /// The same resource instance has more than one final state result.
    #[error("element {element}: duplicate final state result for {addr}")]
    DuplicateResult {
        /// Index of the second result element
        element: usize,
        /// The resource instance registered twice
        addr: ResourceInstanceAddr,
    },
}

/// Errors produced while serializing an execution graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphEncodeError {
    /// The serializer failed.
    #[error("failed to encode execution graph: {0}")]
    Encode(String),
}

/// Errors concerning state snapshots and the objects stored in them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The snapshot uses a format this engine does not understand.
    #[error("unsupported state format version {found} (this engine supports version {supported})")]
    UnsupportedFormatVersion {
        /// Version found in the snapshot
        found: u32,
        /// The only version supported
        supported: u32,
    },

    /// A stored object was written with a different schema version.
    #[error("{object} was stored with schema version {found}, but the current schema is version {expected}")]
    SchemaVersionMismatch {
        /// Label of the object (address plus optional deposed key)
        object: String,
        /// Version recorded with the object
        found: u64,
        /// Version of the current schema
        expected: u64,
    },

    /// A stored or new object value does not conform to its schema.
    #[error("{object} does not conform to its resource type schema: {source}")]
    InvalidValue {
        /// Label of the object (address plus optional deposed key)
        object: String,
        /// The conformance failure
        source: ValueError,
    },

    /// The schema needed to decode an object is unavailable.
    #[error("{object} cannot be decoded: {source}")]
    NoSchema {
        /// Label of the object (address plus optional deposed key)
        object: String,
        /// Why the schema is unavailable
        source: ProviderError,
    },

    /// The snapshot JSON is malformed.
    #[error("invalid state snapshot: {0}")]
    Json(String),
}

/// Errors raised by the provider plugin library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// No plugin is installed for the provider.
    #[error("provider {0} is not available")]
    UnknownProvider(ProviderAddr),

    /// The provider does not declare the requested resource type.
    #[error("provider {provider} does not support {mode} resource type {type_name:?}")]
    UnknownResourceType {
        /// The provider asked
        provider: ProviderAddr,
        /// The resource mode
        mode: ResourceMode,
        /// The resource type name
        type_name: String,
    },

    /// The plugin could not be started or configured.
    #[error("failed to start provider {provider}: {message}")]
    StartFailed {
        /// The provider being started
        provider: ProviderAddr,
        /// Reason reported by the plugin library
        message: String,
    },
}

/// Errors from the promise mechanism that links execution graph operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PromiseError {
    /// The resolver was dropped without producing a result, usually because
    /// the task responsible for it panicked.
    #[error("request {0} was left unresolved")]
    Unresolved(RequestId),
}

/// Errors from misusing the graph builder or the dispatcher builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A final state result was registered twice for one resource instance.
    #[error("duplicate registration for {0} final state result")]
    DuplicateFinalState(ResourceInstanceAddr),

    /// A final state result was requested before it was registered.
    #[error("requested final state result for {0}, which has not yet been registered")]
    MissingFinalState(ResourceInstanceAddr),

    /// A close blocker handle did not come from this builder.
    #[error("close blocker {0} does not belong to this builder")]
    UnknownCloseBlocker(usize),

    /// A required component was never supplied.
    #[error("cannot build the operation dispatcher without {0}")]
    MissingComponent(&'static str),

    /// The dispatcher slot already holds a dispatcher.
    #[error("the execution graph's dispatcher has already been installed")]
    DispatcherAlreadyInstalled,
}

/// Failures that abort an apply before any provider is called.
///
/// Everything else that can go wrong during an apply is reported as a
/// [`Diagnostic`] alongside a best-effort state snapshot instead.
#[derive(Debug, Clone, Error)]
pub enum ApplyError {
    /// The serialized execution graph could not be decoded.
    #[error("invalid execution graph: {0}")]
    InvalidGraph(#[from] GraphDecodeError),

    /// The execution graph decoded but failed validation during compilation.
    #[error("execution graph failed validation with {} problem(s)", .0.len())]
    Compile(Diagnostics),

    /// The prior state snapshot is unusable as a whole.
    #[error("invalid prior state: {0}")]
    InvalidPriorState(#[from] StateError),
}

impl From<ApplyError> for Diagnostics {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::Compile(diags) => diags,
            ApplyError::InvalidGraph(e) => Self::from(Diagnostic::error(
                DiagnosticKind::InvalidGraph,
                "Invalid execution graph",
                format!("The execution graph for this plan could not be decoded: {e}."),
            )),
            ApplyError::InvalidPriorState(e) => Self::from(Diagnostic::error(
                DiagnosticKind::InvalidState,
                "Invalid prior state",
                format!("The prior state saved with this plan could not be used: {e}."),
            )),
        }
    }
}
