//! VM profiling and instrumentation
//!
//! Profiling is disabled by default; the dispatch loop only calls into the
//! profiler when it is enabled.

use crate::bytecode::Opcode;
use crate::program::{FunctionId, Program};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;

/// Execution counters for one or more runs
#[derive(Debug, Clone)]
pub struct Profiler {
    enabled: bool,
    total_instructions: u64,
    /// Indexed by opcode byte
    instruction_counts: [u64; 256],
    calls: HashMap<FunctionId, u64>,
    max_stack_depth: usize,
    max_frame_depth: usize,
}

/// Serializable snapshot of the profiler's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub total_instructions: u64,
    /// `(mnemonic, count)`, most frequent first
    pub instructions: Vec<(&'static str, u64)>,
    /// `(function id, calls)`, ordered by id
    pub calls: Vec<(FunctionId, u64)>,
    pub max_stack_depth: usize,
    pub max_frame_depth: usize,
}

impl Profiler {
    /// Create a new profiler (disabled)
    pub fn new() -> Self {
        Self {
            enabled: false,
            total_instructions: 0,
            instruction_counts: [0; 256],
            calls: HashMap::new(),
            max_stack_depth: 0,
            max_frame_depth: 0,
        }
    }

    /// Create a new profiler with profiling enabled
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::new()
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Reset all counters, keeping the enabled flag
    pub fn reset(&mut self) {
        *self = Self {
            enabled: self.enabled,
            ..Self::new()
        };
    }

    /// Record one executed instruction and the depths before it ran
    #[inline]
    pub fn record_instruction(&mut self, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        if !self.enabled {
            return;
        }
        self.total_instructions += 1;
        self.instruction_counts[opcode as usize] += 1;
        self.max_stack_depth = self.max_stack_depth.max(stack_depth);
        self.max_frame_depth = self.max_frame_depth.max(frame_depth);
    }

    /// Record entry into `function`
    pub fn record_call(&mut self, function: FunctionId) {
        if !self.enabled {
            return;
        }
        *self.calls.entry(function).or_insert(0) += 1;
    }

    pub fn total_instructions(&self) -> u64 {
        self.total_instructions
    }

    pub fn instruction_count(&self, opcode: Opcode) -> u64 {
        self.instruction_counts[opcode as usize]
    }

    pub fn call_count(&self, function: FunctionId) -> u64 {
        self.calls.get(&function).copied().unwrap_or(0)
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    pub fn max_frame_depth(&self) -> usize {
        self.max_frame_depth
    }

    pub fn summary(&self) -> ProfileSummary {
        let mut instructions: Vec<_> = Opcode::ALL
            .iter()
            .map(|op| (op.mnemonic(), self.instruction_count(*op)))
            .filter(|(_, count)| *count > 0)
            .collect();
        instructions.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        let mut calls: Vec<_> = self.calls.iter().map(|(id, n)| (*id, *n)).collect();
        calls.sort_unstable();

        ProfileSummary {
            total_instructions: self.total_instructions,
            instructions,
            calls,
            max_stack_depth: self.max_stack_depth,
            max_frame_depth: self.max_frame_depth,
        }
    }

    /// Human-readable report; function names are resolved when `program`
    /// is given
    pub fn report(&self, program: Option<&Program>) -> String {
        if !self.enabled {
            return "Profiling not enabled".to_string();
        }
        let summary = self.summary();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Total instructions executed: {}",
            summary.total_instructions
        );
        let _ = writeln!(
            out,
            "Max operand stack depth: {}, max frame depth: {}\n",
            summary.max_stack_depth, summary.max_frame_depth
        );

        if summary.instructions.is_empty() {
            out.push_str("No instructions recorded\n");
            return out;
        }

        out.push_str("Instruction counts by opcode:\n");
        for (mnemonic, count) in &summary.instructions {
            let percentage = (*count as f64 / summary.total_instructions as f64) * 100.0;
            let _ = writeln!(out, "  {:<14} {:>10} ({:>6.2}%)", mnemonic, count, percentage);
        }

        if !summary.calls.is_empty() {
            out.push_str("\nCalls by function:\n");
            for (id, count) in &summary.calls {
                let name = program
                    .and_then(|p| p.function(*id))
                    .map_or_else(|| format!("#{}", id), |f| f.name().to_string());
                let _ = writeln!(out, "  {:<14} {:>10}", name, count);
            }
        }
        out
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}
