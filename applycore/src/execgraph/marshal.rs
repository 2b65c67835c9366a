//! The execution graph wire format.
//!
//! A serialized graph is a MessagePack envelope holding a format version and
//! a flat list of elements in dependency order: every operand is the index
//! of an element earlier in the list. Decoding can therefore check each
//! reference as soon as it is read.

use super::{AnyResultRef, Graph, OpCode, OperandProblem, OperationDesc, ResultKind};
use crate::addrs::ResourceInstanceAddr;
use crate::errors::{GraphDecodeError, GraphEncodeError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The only wire format version this engine reads and writes.
pub const GRAPH_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct Envelope {
    format_version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireGraph {
    format_version: u32,
    elements: Vec<WireElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum WireElement {
    Constant(Value),
    ResourceInstAddr(String),
    ProviderInstAddr(String),
    DeposedKey(String),
    Waiter(Vec<u64>),
    Operation {
        opcode: OpCode,
        operands: Vec<Option<u64>>,
    },
    ResourceInstanceResult {
        addr: String,
        result: Option<u64>,
    },
}

struct Encoder<'g> {
    graph: &'g Graph,
    elements: Vec<WireElement>,
    emitted: HashMap<AnyResultRef, u64>,
}

impl Encoder<'_> {
    fn emit(&mut self, r: AnyResultRef) -> Option<u64> {
        if r == AnyResultRef::Nil {
            return None;
        }
        if let Some(idx) = self.emitted.get(&r) {
            return Some(*idx);
        }
        let graph = self.graph;
        let element = match r {
            AnyResultRef::Nil => return None,
            AnyResultRef::Value(idx) => WireElement::Constant(graph.constant_vals[idx].clone()),
            AnyResultRef::ResourceInstAddr(idx) => WireElement::ResourceInstAddr(graph.resource_inst_addrs[idx].to_string()),
            AnyResultRef::ProviderInstAddr(idx) => WireElement::ProviderInstAddr(graph.provider_inst_addrs[idx].to_string()),
            AnyResultRef::DeposedKey(idx) => WireElement::DeposedKey(graph.deposed_keys[idx].to_string()),
            AnyResultRef::Waiter(idx) => {
                WireElement::Waiter(graph.waiters[idx].iter().filter_map(|dep| self.emit(*dep)).collect())
            }
            AnyResultRef::Operation(idx) => {
                let op = &graph.ops[idx];
                WireElement::Operation {
                    opcode: op.opcode,
                    operands: op.operands.iter().map(|operand| self.emit(*operand)).collect(),
                }
            }
        };
        self.elements.push(element);
        let idx = (self.elements.len() - 1) as u64;
        self.emitted.insert(r, idx);
        Some(idx)
    }
}

impl Graph {
    /// Serializes the graph.
    pub fn marshal(&self) -> Result<Vec<u8>, GraphEncodeError> {
        let mut encoder = Encoder {
            graph: self,
            elements: Vec::new(),
            emitted: HashMap::new(),
        };
        // Operations only ever refer to elements created before them, so
        // walking them in order keeps the recursion shallow.
        let immediates = (0..self.constant_vals.len())
            .map(AnyResultRef::Value)
            .chain((0..self.resource_inst_addrs.len()).map(AnyResultRef::ResourceInstAddr))
            .chain((0..self.provider_inst_addrs.len()).map(AnyResultRef::ProviderInstAddr))
            .chain((0..self.deposed_keys.len()).map(AnyResultRef::DeposedKey));
        let rest = (0..self.ops.len())
            .map(AnyResultRef::Operation)
            .chain((0..self.waiters.len()).map(AnyResultRef::Waiter));
        for r in immediates.chain(rest) {
            encoder.emit(r);
        }
        for (addr, r) in &self.resource_instance_results {
            let result = encoder.emit(*r);
            encoder.elements.push(WireElement::ResourceInstanceResult {
                addr: addr.to_string(),
                result,
            });
        }
        rmp_serde::to_vec_named(&WireGraph {
            format_version: GRAPH_FORMAT_VERSION,
            elements: encoder.elements,
        })
        .map_err(|e| GraphEncodeError::Encode(e.to_string()))
    }

    /// Decodes a serialized graph, validating every reference.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, GraphDecodeError> {
        let envelope: Envelope =
            rmp_serde::from_slice(bytes).map_err(|e| GraphDecodeError::Malformed(e.to_string()))?;
        if envelope.format_version != GRAPH_FORMAT_VERSION {
            return Err(GraphDecodeError::UnsupportedVersion {
                found: envelope.format_version,
                supported: GRAPH_FORMAT_VERSION,
            });
        }
        let wire: WireGraph = rmp_serde::from_slice(bytes).map_err(|e| GraphDecodeError::Malformed(e.to_string()))?;

        let mut graph = Self::default();
        // The reference each element decoded to; `None` for elements that
        // produce no result.
        let mut refs: Vec<Option<AnyResultRef>> = Vec::with_capacity(wire.elements.len());
        for (element, item) in wire.elements.into_iter().enumerate() {
            let r = decode_element(&mut graph, &refs, element, item)?;
            refs.push(r);
        }
        Ok(graph)
    }
}

fn lookup(refs: &[Option<AnyResultRef>], element: usize, target: u64) -> Result<AnyResultRef, GraphDecodeError> {
    let idx = usize::try_from(target)
        .ok()
        .filter(|idx| *idx < element)
        .ok_or(GraphDecodeError::ForwardReference { element, target })?;
    refs[idx].ok_or(GraphDecodeError::NotAResult { element, target })
}

fn decode_element(
    graph: &mut Graph,
    refs: &[Option<AnyResultRef>],
    element: usize,
    item: WireElement,
) -> Result<Option<AnyResultRef>, GraphDecodeError> {
    let invalid_addr = |source| GraphDecodeError::InvalidAddress { element, source };
    Ok(Some(match item {
        WireElement::Constant(value) => {
            graph.constant_vals.push(value);
            AnyResultRef::Value(graph.constant_vals.len() - 1)
        }
        WireElement::ResourceInstAddr(text) => {
            graph.resource_inst_addrs.push(text.parse().map_err(invalid_addr)?);
            AnyResultRef::ResourceInstAddr(graph.resource_inst_addrs.len() - 1)
        }
        WireElement::ProviderInstAddr(text) => {
            graph.provider_inst_addrs.push(text.parse().map_err(invalid_addr)?);
            AnyResultRef::ProviderInstAddr(graph.provider_inst_addrs.len() - 1)
        }
        WireElement::DeposedKey(text) => {
            graph.deposed_keys.push(text.parse().map_err(invalid_addr)?);
            AnyResultRef::DeposedKey(graph.deposed_keys.len() - 1)
        }
        WireElement::Waiter(targets) => {
            let deps = targets
                .into_iter()
                .map(|target| lookup(refs, element, target))
                .collect::<Result<Vec<_>, _>>()?;
            graph.waiters.push(deps);
            AnyResultRef::Waiter(graph.waiters.len() - 1)
        }
        WireElement::Operation { opcode, operands } => {
            let operands = operands
                .into_iter()
                .map(|target| target.map_or(Ok(AnyResultRef::Nil), |t| lookup(refs, element, t)))
                .collect::<Result<Vec<_>, _>>()?;
            let op = OperationDesc { opcode, operands };
            graph.check_operation(&op).map_err(|problem| match problem {
                OperandProblem::Count { expected, found } => GraphDecodeError::WrongOperandCount {
                    element,
                    opcode: opcode.name(),
                    expected,
                    found,
                },
                OperandProblem::Kind {
                    position,
                    expected,
                    found,
                } => GraphDecodeError::WrongOperandKind {
                    element,
                    opcode: opcode.name(),
                    position,
                    expected,
                    found,
                },
            })?;
            graph.ops.push(op);
            AnyResultRef::Operation(graph.ops.len() - 1)
        }
        WireElement::ResourceInstanceResult { addr, result } => {
            let addr: ResourceInstanceAddr = addr.parse().map_err(invalid_addr)?;
            let result = result.map(|target| lookup(refs, element, target)).transpose()?;
            let produces_object = matches!(
                result,
                Some(AnyResultRef::Operation(idx)) if graph.ops[idx].opcode.result_kind() == ResultKind::Object
            );
            if !produces_object {
                return Err(GraphDecodeError::DanglingResult {
                    element,
                    addr: addr.to_string(),
                });
            }
            if graph.resource_instance_results.contains_key(&addr) {
                return Err(GraphDecodeError::DuplicateResult { element, addr });
            }
            if let Some(result) = result {
                graph.resource_instance_results.insert(addr, result);
            }
            return Ok(None);
        }
    }))
}
