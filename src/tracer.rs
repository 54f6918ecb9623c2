use serde::Serialize;

use crate::common::{Hex, word::Word};

/// One executed instruction, captured before it ran. `gas_cost` is filled in
/// afterwards as the difference in remaining gas, so for the CALL family it
/// includes the gas handed to the callee.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub pc: usize,
    pub opcode: u8,
    #[serde(rename = "opName")]
    pub name: String,
    pub gas: u64,
    pub gas_cost: u64,
    pub depth: usize,
    pub refund: i64,
    pub stack: Vec<Word>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<Hex>,
    /// `(key, value)` read by SLOAD or written by SSTORE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<(Word, Word)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[allow(unused_variables)] // default impl ignores all arguments
pub trait EventTracer: Default {
    /// Steps are only assembled when this returns `true`.
    fn is_enabled(&self) -> bool {
        false
    }
    fn with_memory(&self) -> bool {
        false
    }
    fn add(&mut self, step: Step) {}
    fn get(&self) -> &[Step] {
        &[]
    }
    fn take(&mut self) -> Vec<Step> {
        vec![]
    }
}

#[derive(Default)]
pub struct NoopTracer;

impl EventTracer for NoopTracer {}

/// Collects every step in execution order.
#[derive(Default)]
pub struct StepTracer {
    steps: Vec<Step>,
    memory: bool,
}

impl StepTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also snapshot memory on every step.
    pub fn with_memory() -> Self {
        Self {
            steps: Vec::new(),
            memory: true,
        }
    }
}

impl EventTracer for StepTracer {
    fn is_enabled(&self) -> bool {
        true
    }

    fn with_memory(&self) -> bool {
        self.memory
    }

    fn add(&mut self, step: Step) {
        self.steps.push(step);
    }

    fn get(&self) -> &[Step] {
        &self.steps
    }

    fn take(&mut self) -> Vec<Step> {
        std::mem::take(&mut self.steps)
    }
}
