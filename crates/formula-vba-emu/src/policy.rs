use std::time::Duration;

use serde::Deserialize;

/// Knobs for one emulation run.
///
/// Every limit here is configuration rather than a hard-coded constant: deadline and call depth
/// depend on the host the analysis runs on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EmulationPolicy {
    /// Maximum nesting of procedure calls before the run is aborted.
    pub max_call_depth: usize,
    /// Wall-clock budget for the whole run.
    pub max_execution_time: Duration,
    /// Hand loops to the loop compiler before interpreting them.
    pub jit_enabled: bool,
    /// Iterations a compiled loop may run before it is treated as an infinite loop.
    pub jit_max_iterations: u64,
    /// Faults a compiled loop may absorb before it is treated as an infinite loop.
    pub max_loop_errors: u64,
    /// Iterations an interpreted loop may run before it is abandoned.
    pub max_loop_iterations: u64,
    /// VBScript input: accept non-ASCII string literals in compiled loops.
    pub permissive_literals: bool,
    pub strip_null_bytes_in_actions: bool,
}

impl Default for EmulationPolicy {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
            max_execution_time: Duration::from_secs(120),
            jit_enabled: true,
            jit_max_iterations: 10_000_000,
            max_loop_errors: 1_000,
            max_loop_iterations: 10_000_000,
            permissive_literals: false,
            strip_null_bytes_in_actions: false,
        }
    }
}
