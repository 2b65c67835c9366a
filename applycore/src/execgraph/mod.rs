//! Execution graphs.
//!
//! An execution graph is a flat table of operations whose operands refer to
//! constants, addresses, other operations' results, or *waiters* (groups of
//! results that only impose ordering). The planning phase builds one with
//! [`Builder`] and serializes it with [`Graph::marshal`]; the apply phase
//! decodes it with [`Graph::unmarshal`], compiles it against an operation
//! dispatcher with [`Graph::compile`] and runs it with
//! [`CompiledGraph::execute`].
//!
//! Operand references always point at elements created earlier, so a graph
//! is acyclic by construction.

mod builder;
mod compiled;
mod compiler;
mod debug;
mod marshal;

pub use builder::{Builder, CloseBlockerKey};
pub use compiled::{CompiledGraph, ResourceValues};

use crate::addrs::{DeposedKey, ProviderInstanceAddr, ResourceInstanceAddr};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Marker type for references to waiters.
#[derive(Debug)]
pub enum Waiter {}

/// A reference to anything in a graph that produces a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnyResultRef {
    /// No value. Accepted only by operands that are allowed to be absent.
    Nil,
    /// A constant value
    Value(usize),
    /// A resource instance address
    ResourceInstAddr(usize),
    /// A provider instance address
    ProviderInstAddr(usize),
    /// A deposed key
    DeposedKey(usize),
    /// The result of an operation
    Operation(usize),
    /// A waiter: completes when everything it names has completed
    Waiter(usize),
}

/// A typed reference into a graph. `T` names what the referenced element
/// produces.
pub struct ResultRef<T> {
    raw: AnyResultRef,
    kind: PhantomData<fn() -> T>,
}

impl<T> ResultRef<T> {
    /// The nil reference.
    pub const fn nil() -> Self {
        Self::new(AnyResultRef::Nil)
    }

    const fn new(raw: AnyResultRef) -> Self {
        Self { raw, kind: PhantomData }
    }

    /// The untyped reference.
    pub const fn raw(self) -> AnyResultRef {
        self.raw
    }
}

impl<T> Clone for ResultRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ResultRef<T> {}

impl<T> PartialEq for ResultRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for ResultRef<T> {}

impl<T> fmt::Debug for ResultRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultRef({:?})", self.raw)
    }
}

impl<T> From<ResultRef<T>> for AnyResultRef {
    fn from(r: ResultRef<T>) -> Self {
        r.raw
    }
}

/// What an operation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    /// Nothing; only completion matters
    Unit,
    /// A validated provider instance configuration
    ProviderConfig,
    /// An open provider client
    ProviderClient,
    /// A desired resource instance
    Desired,
    /// A resource instance object
    Object,
    /// A final plan
    FinalPlan,
    /// An open ephemeral resource
    OpenEphemeral,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unit => "no result",
            Self::ProviderConfig => "a provider instance configuration",
            Self::ProviderClient => "a provider client",
            Self::Desired => "a desired resource instance",
            Self::Object => "a resource instance object",
            Self::FinalPlan => "a final plan",
            Self::OpenEphemeral => "an open ephemeral resource",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperandKind {
    Value,
    ResourceInstAddr,
    ProviderInstAddr,
    DeposedKey,
    Waiter,
    Result(ResultKind),
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => f.write_str("a constant value"),
            Self::ResourceInstAddr => f.write_str("a resource instance address"),
            Self::ProviderInstAddr => f.write_str("a provider instance address"),
            Self::DeposedKey => f.write_str("a deposed key"),
            Self::Waiter => f.write_str("a waiter"),
            Self::Result(kind) => write!(f, "{kind}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OperandSpec {
    pub(crate) kind: OperandKind,
    pub(crate) nilable: bool,
}

const fn req(kind: OperandKind) -> OperandSpec {
    OperandSpec { kind, nilable: false }
}

const fn opt(kind: OperandKind) -> OperandSpec {
    OperandSpec { kind, nilable: true }
}

const fn res(kind: ResultKind) -> OperandKind {
    OperandKind::Result(kind)
}

// Operand signatures, in operand order.
const PROVIDER_INSTANCE_CONFIG: &[OperandSpec] = &[req(OperandKind::ProviderInstAddr), req(OperandKind::Waiter)];
const PROVIDER_INSTANCE_OPEN: &[OperandSpec] = &[req(res(ResultKind::ProviderConfig))];
const PROVIDER_INSTANCE_CLOSE: &[OperandSpec] = &[req(res(ResultKind::ProviderClient)), req(OperandKind::Waiter)];
const RESOURCE_INSTANCE_DESIRED: &[OperandSpec] = &[req(OperandKind::ResourceInstAddr), req(OperandKind::Waiter)];
const RESOURCE_INSTANCE_PRIOR: &[OperandSpec] = &[req(OperandKind::ResourceInstAddr)];
const MANAGED_FINAL_PLAN: &[OperandSpec] = &[
    opt(res(ResultKind::Desired)),
    opt(res(ResultKind::Object)),
    req(OperandKind::Value),
    req(res(ResultKind::ProviderClient)),
];
const MANAGED_APPLY: &[OperandSpec] = &[
    req(res(ResultKind::FinalPlan)),
    opt(res(ResultKind::Object)),
    req(res(ResultKind::ProviderClient)),
];
const MANAGED_DEPOSE: &[OperandSpec] = &[opt(res(ResultKind::Object))];
const MANAGED_ALREADY_DEPOSED: &[OperandSpec] = &[req(OperandKind::ResourceInstAddr), req(OperandKind::DeposedKey)];
const MANAGED_CHANGE_ADDR: &[OperandSpec] = &[opt(res(ResultKind::Object)), req(OperandKind::ResourceInstAddr)];
const DATA_READ: &[OperandSpec] = &[
    req(res(ResultKind::Desired)),
    req(OperandKind::Value),
    req(res(ResultKind::ProviderClient)),
];
const EPHEMERAL_OPEN: &[OperandSpec] = &[req(res(ResultKind::Desired)), req(res(ResultKind::ProviderClient))];
const EPHEMERAL_STATE: &[OperandSpec] = &[req(res(ResultKind::OpenEphemeral))];
const EPHEMERAL_CLOSE: &[OperandSpec] = &[
    req(res(ResultKind::Object)),
    req(res(ResultKind::ProviderClient)),
    req(OperandKind::Waiter),
];

/// The kinds of operation an execution graph can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    /// Resolves and validates a provider instance's configuration.
    ProviderInstanceConfig,
    /// Starts a configured provider instance.
    ProviderInstanceOpen,
    /// Shuts a provider instance down.
    ProviderInstanceClose,
    /// Asks the evaluator for a resource instance's desired configuration.
    ResourceInstanceDesired,
    /// Reads a resource instance's current object from prior state.
    ResourceInstancePrior,
    /// Re-derives the plan for a managed object.
    ManagedFinalPlan,
    /// Applies a final plan.
    ManagedApply,
    /// Deposes a current object.
    ManagedDepose,
    /// Reads a deposed object from prior state.
    ManagedAlreadyDeposed,
    /// Moves a current object to a new address.
    ManagedChangeAddr,
    /// Reads a data source.
    DataRead,
    /// Opens an ephemeral resource.
    EphemeralOpen,
    /// Exposes an open ephemeral resource as an object.
    EphemeralState,
    /// Closes an ephemeral resource.
    EphemeralClose,
}

impl OpCode {
    /// The operation's name, as used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ProviderInstanceConfig => "ProviderInstanceConfig",
            Self::ProviderInstanceOpen => "ProviderInstanceOpen",
            Self::ProviderInstanceClose => "ProviderInstanceClose",
            Self::ResourceInstanceDesired => "ResourceInstanceDesired",
            Self::ResourceInstancePrior => "ResourceInstancePrior",
            Self::ManagedFinalPlan => "ManagedFinalPlan",
            Self::ManagedApply => "ManagedApply",
            Self::ManagedDepose => "ManagedDepose",
            Self::ManagedAlreadyDeposed => "ManagedAlreadyDeposed",
            Self::ManagedChangeAddr => "ManagedChangeAddr",
            Self::DataRead => "DataRead",
            Self::EphemeralOpen => "EphemeralOpen",
            Self::EphemeralState => "EphemeralState",
            Self::EphemeralClose => "EphemeralClose",
        }
    }

    pub(crate) const fn operands(self) -> &'static [OperandSpec] {
        match self {
            Self::ProviderInstanceConfig => PROVIDER_INSTANCE_CONFIG,
            Self::ProviderInstanceOpen => PROVIDER_INSTANCE_OPEN,
            Self::ProviderInstanceClose => PROVIDER_INSTANCE_CLOSE,
            Self::ResourceInstanceDesired => RESOURCE_INSTANCE_DESIRED,
            Self::ResourceInstancePrior => RESOURCE_INSTANCE_PRIOR,
            Self::ManagedFinalPlan => MANAGED_FINAL_PLAN,
            Self::ManagedApply => MANAGED_APPLY,
            Self::ManagedDepose => MANAGED_DEPOSE,
            Self::ManagedAlreadyDeposed => MANAGED_ALREADY_DEPOSED,
            Self::ManagedChangeAddr => MANAGED_CHANGE_ADDR,
            Self::DataRead => DATA_READ,
            Self::EphemeralOpen => EPHEMERAL_OPEN,
            Self::EphemeralState => EPHEMERAL_STATE,
            Self::EphemeralClose => EPHEMERAL_CLOSE,
        }
    }

    /// What the operation produces.
    pub const fn result_kind(self) -> ResultKind {
        match self {
            Self::ProviderInstanceConfig => ResultKind::ProviderConfig,
            Self::ProviderInstanceOpen => ResultKind::ProviderClient,
            Self::ProviderInstanceClose | Self::EphemeralClose => ResultKind::Unit,
            Self::ResourceInstanceDesired => ResultKind::Desired,
            Self::ManagedFinalPlan => ResultKind::FinalPlan,
            Self::EphemeralOpen => ResultKind::OpenEphemeral,
            Self::ResourceInstancePrior
            | Self::ManagedApply
            | Self::ManagedDepose
            | Self::ManagedAlreadyDeposed
            | Self::ManagedChangeAddr
            | Self::DataRead
            | Self::EphemeralState => ResultKind::Object,
        }
    }

    /// Close operations release what earlier operations acquired, so they
    /// still run after cancellation and after their waiters failed.
    pub const fn is_close(self) -> bool {
        matches!(self, Self::ProviderInstanceClose | Self::EphemeralClose)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OperationDesc {
    pub(crate) opcode: OpCode,
    pub(crate) operands: Vec<AnyResultRef>,
}

/// Why an operation's operands are unacceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OperandProblem {
    Count { expected: usize, found: usize },
    Kind { position: usize, expected: String, found: String },
}

/// An execution graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    constant_vals: Vec<Value>,
    resource_inst_addrs: Vec<ResourceInstanceAddr>,
    provider_inst_addrs: Vec<ProviderInstanceAddr>,
    deposed_keys: Vec<DeposedKey>,
    ops: Vec<OperationDesc>,
    waiters: Vec<Vec<AnyResultRef>>,
    resource_instance_results: BTreeMap<ResourceInstanceAddr, AnyResultRef>,
}

impl Graph {
    /// Number of operations.
    pub fn operation_count(&self) -> usize {
        self.ops.len()
    }

    /// The opcode of operation `idx`.
    pub fn opcode(&self, idx: usize) -> Option<OpCode> {
        self.ops.get(idx).map(|op| op.opcode)
    }

    /// Resource instances whose final state this graph produces.
    pub fn resource_instances(&self) -> impl Iterator<Item = &ResourceInstanceAddr> {
        self.resource_instance_results.keys()
    }

    /// Describes what `r` refers to, or `None` if it is out of range.
    fn describe_ref(&self, r: AnyResultRef) -> Option<(Option<OperandKind>, String)> {
        let in_range = |idx: usize, len: usize| (idx < len).then_some(());
        Some(match r {
            AnyResultRef::Nil => (None, "nil".to_string()),
            AnyResultRef::Value(idx) => {
                in_range(idx, self.constant_vals.len())?;
                (Some(OperandKind::Value), OperandKind::Value.to_string())
            }
            AnyResultRef::ResourceInstAddr(idx) => {
                in_range(idx, self.resource_inst_addrs.len())?;
                (Some(OperandKind::ResourceInstAddr), OperandKind::ResourceInstAddr.to_string())
            }
            AnyResultRef::ProviderInstAddr(idx) => {
                in_range(idx, self.provider_inst_addrs.len())?;
                (Some(OperandKind::ProviderInstAddr), OperandKind::ProviderInstAddr.to_string())
            }
            AnyResultRef::DeposedKey(idx) => {
                in_range(idx, self.deposed_keys.len())?;
                (Some(OperandKind::DeposedKey), OperandKind::DeposedKey.to_string())
            }
            AnyResultRef::Waiter(idx) => {
                in_range(idx, self.waiters.len())?;
                (Some(OperandKind::Waiter), OperandKind::Waiter.to_string())
            }
            AnyResultRef::Operation(idx) => {
                let opcode = self.ops.get(idx)?.opcode;
                let kind = OperandKind::Result(opcode.result_kind());
                (Some(kind), format!("{opcode} producing {kind}"))
            }
        })
    }

    /// Checks one operand against what its opcode expects.
    pub(crate) fn check_operand(&self, opcode: OpCode, position: usize, r: AnyResultRef) -> Result<(), OperandProblem> {
        let Some(spec) = opcode.operands().get(position) else {
            return Err(OperandProblem::Count {
                expected: opcode.operands().len(),
                found: position + 1,
            });
        };
        let expected = || {
            if spec.nilable {
                format!("{} or nil", spec.kind)
            } else {
                spec.kind.to_string()
            }
        };
        let Some((kind, found)) = self.describe_ref(r) else {
            return Err(OperandProblem::Kind {
                position,
                expected: expected(),
                found: format!("a missing element {r:?}"),
            });
        };
        let acceptable = match kind {
            None => spec.nilable,
            Some(kind) => kind == spec.kind,
        };
        if acceptable {
            Ok(())
        } else {
            Err(OperandProblem::Kind {
                position,
                expected: expected(),
                found,
            })
        }
    }

    /// Checks every operand of an operation.
    pub(crate) fn check_operation(&self, op: &OperationDesc) -> Result<(), OperandProblem> {
        let expected = op.opcode.operands().len();
        if op.operands.len() != expected {
            return Err(OperandProblem::Count {
                expected,
                found: op.operands.len(),
            });
        }
        op.operands
            .iter()
            .enumerate()
            .try_for_each(|(position, r)| self.check_operand(op.opcode, position, *r))
    }

    /// The operations a waiter ultimately waits for, following nested
    /// waiters. Constants and addresses are always available and so are
    /// omitted.
    pub(crate) fn waiter_operations(&self, idx: usize) -> Vec<usize> {
        let mut ops = Vec::new();
        let mut stack = vec![idx];
        let mut seen = std::collections::BTreeSet::new();
        while let Some(waiter) = stack.pop() {
            if !seen.insert(waiter) {
                continue;
            }
            for r in self.waiters.get(waiter).into_iter().flatten() {
                match r {
                    AnyResultRef::Operation(op) => ops.push(*op),
                    AnyResultRef::Waiter(nested) => stack.push(*nested),
                    _ => {}
                }
            }
        }
        ops.sort_unstable();
        ops.dedup();
        ops
    }
}
