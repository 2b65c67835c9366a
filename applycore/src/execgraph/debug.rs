//! Human-readable renderings of execution graphs.

use super::{AnyResultRef, Graph};
use crate::value::Value;
use std::fmt::Write as _;

impl Graph {
    /// Renders the whole graph, one element per line.
    ///
    /// ```text
    /// v[0] = {ami = "ami-123"};
    ///
    /// r[0] = ProviderInstanceConfig(provider["example.com/test/test"], await());
    /// r[1] = ProviderInstanceOpen(r[0]);
    ///
    /// test_thing.a = r[4];
    /// ```
    pub fn debug_repr(&self) -> String {
        let mut out = String::new();
        for (idx, value) in self.constant_vals.iter().enumerate() {
            let _ = writeln!(out, "v[{idx}] = {value};");
        }
        if !self.constant_vals.is_empty() && !self.ops.is_empty() {
            out.push('\n');
        }
        for (idx, op) in self.ops.iter().enumerate() {
            let operands: Vec<String> = op.operands.iter().map(|r| self.render_ref(*r)).collect();
            let _ = writeln!(out, "r[{idx}] = {}({});", op.opcode, operands.join(", "));
        }
        if !self.resource_instance_results.is_empty() {
            out.push('\n');
        }
        for (addr, r) in &self.resource_instance_results {
            let _ = writeln!(out, "{addr} = {};", self.render_ref(*r));
        }
        out
    }

    fn render_ref(&self, r: AnyResultRef) -> String {
        match r {
            AnyResultRef::Nil => "nil".to_string(),
            AnyResultRef::Value(idx) => format!("v[{idx}]"),
            AnyResultRef::Operation(idx) => format!("r[{idx}]"),
            AnyResultRef::Waiter(idx) => {
                let deps: Vec<String> = self
                    .waiters
                    .get(idx)
                    .into_iter()
                    .flatten()
                    .map(|dep| self.render_ref(*dep))
                    .collect();
                format!("await({})", deps.join(", "))
            }
            other => self.render_immediate(other),
        }
    }

    fn render_immediate(&self, r: AnyResultRef) -> String {
        let missing = || format!("<missing {r:?}>");
        match r {
            AnyResultRef::ResourceInstAddr(idx) => self
                .resource_inst_addrs
                .get(idx)
                .map_or_else(missing, ToString::to_string),
            AnyResultRef::ProviderInstAddr(idx) => self
                .provider_inst_addrs
                .get(idx)
                .map_or_else(missing, ToString::to_string),
            AnyResultRef::DeposedKey(idx) => self
                .deposed_keys
                .get(idx)
                .map_or_else(missing, |key| format!("deposed({:?})", key.to_string())),
            _ => missing(),
        }
    }

    /// A one-line description of operation `idx`, naming nested operations
    /// without expanding them. Used to describe outstanding requests.
    ///
    /// ```text
    /// ManagedApply(ManagedFinalPlan(...), nil, ProviderInstanceOpen(...))
    /// ```
    pub fn operation_debug_summary(&self, idx: usize) -> String {
        let Some(op) = self.ops.get(idx) else {
            return format!("<missing operation r[{idx}]>");
        };
        let operands: Vec<String> = op.operands.iter().map(|r| self.summarize_ref(*r)).collect();
        format!("{}({})", op.opcode, operands.join(", "))
    }

    fn summarize_ref(&self, r: AnyResultRef) -> String {
        match r {
            AnyResultRef::Nil => "nil".to_string(),
            AnyResultRef::Value(idx) => match self.constant_vals.get(idx) {
                Some(Value::Unknown) => "<unknown value>".to_string(),
                Some(value) => format!("<{} value>", value.kind_name()),
                None => format!("<missing {r:?}>"),
            },
            AnyResultRef::Operation(idx) => self
                .ops
                .get(idx)
                .map_or_else(|| format!("<missing {r:?}>"), |op| format!("{}(...)", op.opcode)),
            AnyResultRef::Waiter(idx) => {
                let deps: Vec<String> = self
                    .waiters
                    .get(idx)
                    .into_iter()
                    .flatten()
                    .map(|dep| self.summarize_ref(*dep))
                    .collect();
                format!("await({})", deps.join(", "))
            }
            other => self.render_immediate(other),
        }
    }
}
