//! Compilation of execution graphs against an operation dispatcher.

use super::{AnyResultRef, CompiledGraph, Graph, OperandProblem, ResultKind};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::exec::DispatcherSlot;
use std::sync::Arc;
use tracing::debug;

impl Graph {
    /// Validates the graph's structure and prepares it for execution.
    ///
    /// Compilation never calls the dispatcher, so `dispatcher` may still be
    /// empty; it only needs to be installed before
    /// [`CompiledGraph::execute`] runs.
    pub fn compile(self, dispatcher: DispatcherSlot) -> Result<CompiledGraph, Diagnostics> {
        let mut diags = Diagnostics::new();

        for (idx, op) in self.ops.iter().enumerate() {
            if let Err(problem) = self.check_operation(op) {
                let detail = match problem {
                    OperandProblem::Count { expected, found } => {
                        format!("{} takes {expected} operands, but {found} were given.", op.opcode)
                    }
                    OperandProblem::Kind {
                        position,
                        expected,
                        found,
                    } => format!("Operand {position} must be {expected}, but refers to {found}."),
                };
                diags.push(invalid(format!("r[{idx}] = {}: {detail}", self.operation_debug_summary(idx))));
                continue;
            }
            // An operation depending on itself or a later one would wait
            // forever.
            for dep in self.operation_dependencies(idx) {
                if dep >= idx {
                    diags.push(invalid(format!(
                        "r[{idx}] = {} depends on r[{dep}] = {}, which does not precede it.",
                        self.operation_debug_summary(idx),
                        self.operation_debug_summary(dep),
                    )));
                }
            }
        }

        for (addr, r) in &self.resource_instance_results {
            let produces_object = matches!(
                r,
                AnyResultRef::Operation(idx)
                    if self.ops.get(*idx).is_some_and(|op| op.opcode.result_kind() == ResultKind::Object)
            );
            if !produces_object {
                diags.push(invalid(format!(
                    "The final state of {addr} must come from an operation producing a resource instance object."
                )));
            }
        }

        if diags.has_errors() {
            return Err(diags);
        }
        debug!(operations = self.ops.len(), "compiled execution graph");
        Ok(CompiledGraph::new(Arc::new(self), dispatcher))
    }

    /// Every operation that operation `idx` waits for, directly or through
    /// waiters.
    pub(crate) fn operation_dependencies(&self, idx: usize) -> Vec<usize> {
        let mut deps = Vec::new();
        for r in self.ops.get(idx).map(|op| op.operands.as_slice()).unwrap_or_default() {
            match r {
                AnyResultRef::Operation(dep) => deps.push(*dep),
                AnyResultRef::Waiter(waiter) => deps.extend(self.waiter_operations(*waiter)),
                _ => {}
            }
        }
        deps.sort_unstable();
        deps.dedup();
        deps
    }
}

fn invalid(detail: String) -> Diagnostic {
    Diagnostic::error(DiagnosticKind::InvalidGraph, "Invalid execution graph", detail)
}
