// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The reversible instruction executor: a state machine over the frozen
//! instruction graph with forward and backward stepping, a call stack over
//! user-defined gate calls, a classical variable store, breakpoints, and a
//! measurement log that makes measurements exactly reversible.

use crate::parsing::{
    Assertion, AssertionKind, EqualityCheck, ExpectedState, Instruction, Program,
    preprocessing::{is_measurement, parse_classic_controlled, parse_parameters},
    utils::split_register,
};
use crate::simulation::Error;
use num_complex::Complex64;
use rand::{SeedableRng, rngs::StdRng};
use rustc_hash::{FxHashMap, FxHashSet};
use statevector_simulator::{
    DensityMatrix, EPSILON, MeasurementHandle, StateVector, gates,
};
use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The observable state of the execution state machine.
///
/// `Loaded` (a debugger without a program) lives in the facade; an engine
/// instance always has a program.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionState {
    Ready,
    Running,
    Paused,
    AssertionFailed,
    BreakpointHit,
    Finished,
}

/// A typed classical value.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassicalValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ClassicalValue {
    fn type_name(&self) -> &'static str {
        match self {
            ClassicalValue::Bool(_) => "bool",
            ClassicalValue::Int(_) => "int",
            ClassicalValue::Float(_) => "float",
        }
    }
}

/// One call-stack frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// The call instruction to return past.
    pub return_instruction: usize,
    /// Formal parameter name → actual argument at this call site.
    pub substitution: FxHashMap<String, String>,
}

/// One measurement (or reset) taken during forward execution.
#[derive(Clone, Debug)]
struct MeasurementRecord {
    qubit: usize,
    outcome: bool,
    /// The written classical bit and its overwritten value; `None` for
    /// resets.
    target: Option<(String, ClassicalValue)>,
    /// Restores the exact pre-measurement amplitudes.
    handle: MeasurementHandle,
}

/// What one completed forward step did, with enough context to undo it.
#[derive(Clone, Debug)]
enum HistoryEntry {
    /// A unitary instruction was applied.
    Gate(usize),
    /// A measurement or reset produced `records` log entries.
    Measurement { instruction: usize, records: usize },
    /// A call frame was pushed.
    Call(usize),
    /// A call frame was popped.
    Return { instruction: usize, frame: Frame },
    /// No simulation side effect (declarations, barriers, directives,
    /// passed assertions, definition headers).
    Skip(usize),
    /// A classic-controlled instruction; its body ran iff `applied`.
    ClassicControlled { instruction: usize, applied: bool },
}

impl HistoryEntry {
    fn instruction(&self) -> usize {
        match self {
            HistoryEntry::Gate(instruction)
            | HistoryEntry::Call(instruction)
            | HistoryEntry::Skip(instruction)
            | HistoryEntry::Measurement { instruction, .. }
            | HistoryEntry::Return { instruction, .. }
            | HistoryEntry::ClassicControlled { instruction, .. } => *instruction,
        }
    }
}

/// The reversible simulator state machine.
pub struct Simulation {
    program: Program,
    state: StateVector,
    /// Qualified classical bit names in declaration order.
    classical_names: Vec<String>,
    classical_values: FxHashMap<String, ClassicalValue>,
    program_counter: usize,
    call_stack: Vec<Frame>,
    history: Vec<HistoryEntry>,
    measurement_log: Vec<MeasurementRecord>,
    zero_controls: Vec<bool>,
    breakpoints: FxHashSet<usize>,
    status: ExecutionState,
    assertion_failed: bool,
    breakpoint_hit: bool,
    /// The assertion that most recently failed; the next forward step over
    /// it moves past instead of re-evaluating.
    failed_assertion: Option<usize>,
    pause_requested: Arc<AtomicBool>,
    seed: Option<u64>,
    rng: StdRng,
}

impl Simulation {
    pub fn new(program: Program, seed: Option<u64>, pause_requested: Arc<AtomicBool>) -> Self {
        let num_qubits = program.num_qubits();
        let num_instructions = program.instructions.len();
        let mut classical_names = Vec::new();
        let mut classical_values = FxHashMap::default();
        for (register, size) in &program.classical_registers {
            for index in 0..*size {
                let name = format!("{register}[{index}]");
                classical_values.insert(name.clone(), ClassicalValue::Bool(false));
                classical_names.push(name);
            }
        }
        Self {
            program,
            state: StateVector::new(num_qubits),
            classical_names,
            classical_values,
            program_counter: 0,
            call_stack: Vec::new(),
            history: Vec::new(),
            measurement_log: Vec::new(),
            zero_controls: vec![false; num_instructions],
            breakpoints: FxHashSet::default(),
            status: ExecutionState::Ready,
            assertion_failed: false,
            breakpoint_hit: false,
            failed_assertion: None,
            pause_requested,
            seed,
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
        }
    }

    /// Discards all runtime state and returns to the first instruction.
    /// Breakpoints survive; use [`Self::clear_breakpoints`] to drop them.
    pub fn reset(&mut self) {
        self.state = StateVector::new(self.program.num_qubits());
        for value in self.classical_values.values_mut() {
            *value = ClassicalValue::Bool(false);
        }
        self.program_counter = 0;
        self.call_stack.clear();
        self.history.clear();
        self.measurement_log.clear();
        self.zero_controls.fill(false);
        self.status = ExecutionState::Ready;
        self.assertion_failed = false;
        self.breakpoint_hit = false;
        self.failed_assertion = None;
        self.rng = self
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn status(&self) -> ExecutionState {
        self.status
    }

    pub fn program_counter(&self) -> usize {
        self.program_counter
    }

    pub fn num_qubits(&self) -> usize {
        self.state.num_qubits()
    }

    pub fn instruction_count(&self) -> usize {
        self.program.instructions.len()
    }

    pub fn did_assertion_fail(&self) -> bool {
        self.assertion_failed
    }

    pub fn was_breakpoint_hit(&self) -> bool {
        self.breakpoint_hit
    }

    /// The instruction of the most recent un-stepped assertion failure.
    pub fn failed_assertion(&self) -> Option<usize> {
        self.failed_assertion
    }

    pub fn is_finished(&self) -> bool {
        self.program_counter >= self.program.instructions.len()
    }

    pub fn can_step_forward(&self) -> bool {
        !self.is_finished()
    }

    pub fn can_step_backward(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn zero_control_flags(&self) -> &[bool] {
        &self.zero_controls
    }

    // --- Stepping ---------------------------------------------------------

    pub fn step_forward(&mut self) -> Result<(), Error> {
        self.begin_forward()?;
        self.execute_next()
    }

    pub fn step_backward(&mut self) -> Result<(), Error> {
        self.begin_backward()?;
        self.undo_previous()
    }

    /// Steps until the call stack returns to its current depth.
    pub fn step_over_forward(&mut self) -> Result<(), Error> {
        self.begin_forward()?;
        let depth = self.call_stack.len();
        self.execute_next()?;
        while self.call_stack.len() > depth && self.may_continue_forward() {
            self.execute_next()?;
        }
        Ok(())
    }

    pub fn step_over_backward(&mut self) -> Result<(), Error> {
        self.begin_backward()?;
        let depth = self.call_stack.len();
        self.undo_previous()?;
        while self.call_stack.len() > depth && self.may_continue_backward() {
            self.undo_previous()?;
        }
        Ok(())
    }

    /// Steps until the call stack depth decreases by one. At the top level
    /// this runs to the end of the program.
    pub fn step_out_forward(&mut self) -> Result<(), Error> {
        self.begin_forward()?;
        let depth = self.call_stack.len();
        self.execute_next()?;
        while self.may_continue_forward() && (depth == 0 || self.call_stack.len() >= depth) {
            self.execute_next()?;
        }
        Ok(())
    }

    /// The backward dual of [`Self::step_out_forward`]; at the top level it
    /// rewinds to the start of the program.
    pub fn step_out_backward(&mut self) -> Result<(), Error> {
        self.begin_backward()?;
        let depth = self.call_stack.len();
        self.undo_previous()?;
        while self.may_continue_backward() && (depth == 0 || self.call_stack.len() >= depth) {
            self.undo_previous()?;
        }
        Ok(())
    }

    /// Runs until the program finishes, an assertion fails, a breakpoint
    /// hits, or a pause is requested.
    pub fn run(&mut self) -> Result<(), Error> {
        self.begin_forward()?;
        self.status = ExecutionState::Running;
        while self.may_continue_forward() {
            if self.pause_requested.swap(false, Ordering::SeqCst) {
                self.status = ExecutionState::Paused;
                return Ok(());
            }
            self.execute_next()?;
        }
        Ok(())
    }

    /// Rewinds until the start of the program, a breakpoint, or a pause.
    pub fn run_backward(&mut self) -> Result<(), Error> {
        self.begin_backward()?;
        self.status = ExecutionState::Running;
        while self.may_continue_backward() {
            if self.pause_requested.swap(false, Ordering::SeqCst) {
                self.status = ExecutionState::Paused;
                return Ok(());
            }
            self.undo_previous()?;
        }
        Ok(())
    }

    /// Runs to the end, counting assertion failures instead of stopping on
    /// them. Breakpoints and pause requests still interrupt.
    pub fn run_all(&mut self) -> Result<usize, Error> {
        self.begin_forward()?;
        self.status = ExecutionState::Running;
        let mut failures = 0;
        while !self.is_finished() && !self.breakpoint_hit {
            if self.pause_requested.swap(false, Ordering::SeqCst) {
                self.status = ExecutionState::Paused;
                return Ok(failures);
            }
            self.execute_next()?;
            if self.assertion_failed {
                failures += 1;
                self.assertion_failed = false;
            }
        }
        Ok(failures)
    }

    /// The handle used to request a pause from another thread.
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        self.pause_requested.clone()
    }

    fn begin_forward(&mut self) -> Result<(), Error> {
        if !self.can_step_forward() {
            return Err(Error::InvalidOperation);
        }
        self.clear_transient_flags();
        Ok(())
    }

    fn begin_backward(&mut self) -> Result<(), Error> {
        if !self.can_step_backward() {
            return Err(Error::InvalidOperation);
        }
        self.clear_transient_flags();
        self.failed_assertion = None;
        Ok(())
    }

    fn clear_transient_flags(&mut self) {
        self.assertion_failed = false;
        self.breakpoint_hit = false;
    }

    fn may_continue_forward(&self) -> bool {
        !self.is_finished() && !self.assertion_failed && !self.breakpoint_hit
    }

    fn may_continue_backward(&self) -> bool {
        self.can_step_backward() && !self.breakpoint_hit
    }

    /// Executes the instruction at the program counter and advances.
    fn execute_next(&mut self) -> Result<(), Error> {
        let pc = self.program_counter;
        let instruction = self.program.instructions[pc].clone();

        if instruction.is_function_definition {
            // Definitions execute nothing; control continues past the body.
            self.history.push(HistoryEntry::Skip(pc));
            self.program_counter = instruction.successor_index;
        } else if instruction.is_return() || instruction.successor_index == 0 {
            let frame = self.call_stack.pop().ok_or(Error::InvalidOperation)?;
            self.program_counter = frame.return_instruction + 1;
            self.history.push(HistoryEntry::Return {
                instruction: pc,
                frame,
            });
        } else if instruction.is_function_call {
            self.call_stack.push(Frame {
                return_instruction: pc,
                substitution: instruction.call_substitution.clone(),
            });
            self.history.push(HistoryEntry::Call(pc));
            self.program_counter = instruction.successor_index;
        } else if let Some(assertion) = &instruction.assertion {
            if self.failed_assertion == Some(pc) {
                // The failure was already reported; move past it.
                self.failed_assertion = None;
                self.history.push(HistoryEntry::Skip(pc));
                self.program_counter = instruction.successor_index;
            } else if self.evaluate_assertion(assertion)? {
                self.history.push(HistoryEntry::Skip(pc));
                self.program_counter = instruction.successor_index;
            } else {
                self.assertion_failed = true;
                self.failed_assertion = Some(pc);
                self.status = ExecutionState::AssertionFailed;
                return Ok(());
            }
        } else {
            self.apply_instruction(pc, &instruction)?;
            self.program_counter = instruction.successor_index;
        }

        self.finish_transition();
        Ok(())
    }

    fn finish_transition(&mut self) {
        if self.program_counter < self.program.instructions.len()
            && self.breakpoints.contains(&self.program_counter)
        {
            self.breakpoint_hit = true;
            self.status = ExecutionState::BreakpointHit;
        } else if self.is_finished() {
            self.status = ExecutionState::Finished;
        } else {
            self.status = ExecutionState::Ready;
        }
    }

    /// Undoes the most recent history entry and moves the program counter
    /// back to it.
    fn undo_previous(&mut self) -> Result<(), Error> {
        let entry = self
            .history
            .pop()
            .expect("history should be non-empty when stepping backward");
        let pc = entry.instruction();
        match entry {
            HistoryEntry::Skip(_) => {}
            HistoryEntry::Gate(instruction) => {
                let code = self.program.instructions[instruction].code.clone();
                self.apply_unitary_code(instruction, &code, true)?;
            }
            HistoryEntry::Measurement { records, .. } => {
                for _ in 0..records {
                    let record = self
                        .measurement_log
                        .pop()
                        .expect("measurement log should hold each recorded measurement");
                    self.state.restore(&record.handle);
                    if let Some((name, previous)) = record.target {
                        self.classical_values.insert(name, previous);
                    }
                }
            }
            HistoryEntry::Call(_) => {
                self.call_stack
                    .pop()
                    .expect("undoing a call should pop its frame");
            }
            HistoryEntry::Return { frame, .. } => {
                self.call_stack.push(frame);
            }
            HistoryEntry::ClassicControlled {
                instruction,
                applied,
            } => {
                if applied {
                    let gate =
                        parse_classic_controlled(&self.program.instructions[instruction].code);
                    for operation in gate.operations.iter().rev() {
                        if is_measurement(operation) {
                            let count = self.resolve_quantum_targets(operation)?.len();
                            for _ in 0..count {
                                let record = self
                                    .measurement_log
                                    .pop()
                                    .expect("measurement log should hold body measurements");
                                self.state.restore(&record.handle);
                                if let Some((name, previous)) = record.target {
                                    self.classical_values.insert(name, previous);
                                }
                            }
                        } else {
                            self.apply_unitary_code(instruction, operation, true)?;
                        }
                    }
                }
            }
        }
        self.program_counter = pc;
        if self.breakpoints.contains(&pc) {
            self.breakpoint_hit = true;
            self.status = ExecutionState::BreakpointHit;
        } else {
            self.status = ExecutionState::Ready;
        }
        Ok(())
    }

    // --- Instruction side effects -----------------------------------------

    fn apply_instruction(&mut self, pc: usize, instruction: &Instruction) -> Result<(), Error> {
        if instruction.is_variable_declaration()
            || instruction.is_barrier()
            || instruction.is_directive()
        {
            self.history.push(HistoryEntry::Skip(pc));
        } else if instruction.is_measurement() {
            let records = self.apply_measurement(&instruction.code)?;
            self.history.push(HistoryEntry::Measurement {
                instruction: pc,
                records,
            });
        } else if instruction.is_reset() {
            let records = self.apply_reset(&instruction.code)?;
            self.history.push(HistoryEntry::Measurement {
                instruction: pc,
                records,
            });
        } else if instruction.is_classic_controlled() {
            let gate = parse_classic_controlled(&instruction.code);
            let applied = self.evaluate_condition(&gate.condition)?;
            self.zero_controls[pc] = false;
            if applied {
                for operation in &gate.operations {
                    if is_measurement(operation) {
                        self.apply_measurement(operation)?;
                    } else {
                        self.apply_unitary_code(pc, operation, false)?;
                    }
                }
            }
            self.history
                .push(HistoryEntry::ClassicControlled {
                    instruction: pc,
                    applied,
                });
        } else {
            self.zero_controls[pc] = false;
            self.apply_unitary_code(pc, &instruction.code, false)?;
            self.history.push(HistoryEntry::Gate(pc));
        }
        Ok(())
    }

    /// Applies (or inverts) one unitary gate statement, expanding
    /// whole-register targets by broadcasting.
    fn apply_unitary_code(&mut self, pc: usize, code: &str, inverse: bool) -> Result<(), Error> {
        let (name, parameters) = parse_gate_head(code)?;
        let gate = gates::resolve(&name, &parameters)
            .ok_or_else(|| Error::Lookup(format!("unknown gate {name}")))?;
        let applications = self.broadcast_targets(code)?;
        let order: Box<dyn Iterator<Item = &Vec<usize>> + '_> = if inverse {
            Box::new(applications.iter().rev())
        } else {
            Box::new(applications.iter())
        };
        for qubits in order {
            if qubits.len() != gate.num_controls + matrix_qubits(gate.matrix.dim()) {
                return Err(Error::Lookup(format!(
                    "gate {name} applied to {} qubits",
                    qubits.len()
                )));
            }
            let (controls, targets) = qubits.split_at(gate.num_controls);
            if has_duplicates(qubits) {
                return Err(Error::Lookup(format!(
                    "gate {name} applied to a repeated qubit"
                )));
            }
            if inverse {
                self.state
                    .apply_controlled_inverse(&gate.matrix, controls, targets);
            } else {
                if gate.num_controls > 0
                    && controls
                        .iter()
                        .all(|control| self.state.prob_one(*control) <= EPSILON)
                {
                    self.zero_controls[pc] = true;
                }
                self.state.apply_controlled(&gate.matrix, controls, targets);
            }
        }
        if !self.state.is_normalized() {
            return Err(Error::Normalization);
        }
        Ok(())
    }

    /// The live substitution frames, outermost first.
    fn substitution_frames(&self) -> Vec<&FxHashMap<String, String>> {
        self.call_stack
            .iter()
            .map(|frame| &frame.substitution)
            .collect()
    }

    /// Resolves the target list of a gate statement into one qubit tuple
    /// per application, broadcasting bare multi-qubit registers.
    fn broadcast_targets(&self, code: &str) -> Result<Vec<Vec<usize>>, Error> {
        resolve_applications(&self.program, &self.substitution_frames(), code)
    }

    fn resolve_target(&self, target: &str) -> Result<ResolvedTarget, Error> {
        resolve_target_name(&self.program, &self.substitution_frames(), target)
    }

    /// Resolves the quantum side of a measurement into global indices.
    fn resolve_quantum_targets(&self, code: &str) -> Result<Vec<usize>, Error> {
        resolve_qubits(&self.program, &self.substitution_frames(), code)
    }

    /// Resolves one expression that must name exactly one qubit.
    pub(crate) fn resolve_single_qubit(&self, target: &str) -> Result<usize, Error> {
        match self.resolve_target(target)? {
            ResolvedTarget::Qubit(index) => Ok(index),
            ResolvedTarget::Register { .. } => Err(Error::Lookup(format!(
                "{target} does not resolve to a single qubit"
            ))),
        }
    }

    fn apply_measurement(&mut self, code: &str) -> Result<usize, Error> {
        let (quantum_side, classical_side) = code
            .split_once("->")
            .ok_or_else(|| Error::Lookup(format!("malformed measurement {code}")))?;
        let qubits = self.resolve_quantum_targets(quantum_side)?;
        let bits = self.resolve_classical_targets(classical_side)?;
        if qubits.len() != bits.len() {
            return Err(Error::Lookup(
                "measurement register sizes do not match".to_string(),
            ));
        }
        let records = qubits.len();
        for (qubit, bit) in qubits.into_iter().zip(bits) {
            let (outcome, handle) = self.state.measure(qubit, &mut self.rng);
            let previous = self
                .classical_values
                .insert(bit.clone(), ClassicalValue::Bool(outcome))
                .expect("classical bits should be declared");
            self.measurement_log.push(MeasurementRecord {
                qubit,
                outcome,
                target: Some((bit, previous)),
                handle,
            });
        }
        Ok(records)
    }

    fn apply_reset(&mut self, code: &str) -> Result<usize, Error> {
        let qubits = self.resolve_quantum_targets(code)?;
        let count = qubits.len();
        for qubit in qubits {
            let (outcome, handle) = self.state.measure(qubit, &mut self.rng);
            if outcome {
                let x = gates::resolve("x", &[]).expect("x gate should resolve");
                self.state.apply_unitary(&x.matrix, &[qubit]);
            }
            self.measurement_log.push(MeasurementRecord {
                qubit,
                outcome,
                target: None,
                handle,
            });
        }
        Ok(count)
    }

    fn resolve_classical_targets(&self, text: &str) -> Result<Vec<String>, Error> {
        let cleaned: String = text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ';')
            .collect();
        let (register, index) = split_register(&cleaned)
            .ok_or_else(|| Error::Lookup(format!("malformed classical target {cleaned}")))?;
        match index {
            Some(_) => {
                if self.classical_values.contains_key(&cleaned) {
                    Ok(vec![cleaned])
                } else {
                    Err(Error::Lookup(format!("unknown classical bit {cleaned}")))
                }
            }
            None => {
                let size = self
                    .program
                    .classical_registers
                    .iter()
                    .find(|(name, _)| name == register)
                    .map(|(_, size)| *size)
                    .ok_or_else(|| {
                        Error::Lookup(format!("unknown classical register {register}"))
                    })?;
                Ok((0..size).map(|k| format!("{register}[{k}]")).collect())
            }
        }
    }

    /// Evaluates an `if(...)` condition of the form `name == n` or
    /// `name[k] == n` against the classical store.
    fn evaluate_condition(&self, condition: &str) -> Result<bool, Error> {
        let (left, right) = condition
            .split_once("==")
            .ok_or_else(|| Error::Lookup(format!("unsupported condition {condition}")))?;
        let left = left.trim();
        let expected: i64 = right
            .trim()
            .parse()
            .map_err(|_| Error::Lookup(format!("unsupported condition {condition}")))?;
        let actual = self.classical_integer_value(left)?;
        Ok(actual == expected)
    }

    /// The integer value of a classical bit or of a whole register read in
    /// little-endian bit order.
    fn classical_integer_value(&self, name: &str) -> Result<i64, Error> {
        if let Some(value) = self.classical_values.get(name) {
            return Ok(match value {
                ClassicalValue::Bool(bit) => i64::from(*bit),
                ClassicalValue::Int(value) => *value,
                #[allow(clippy::cast_possible_truncation)]
                ClassicalValue::Float(value) => *value as i64,
            });
        }
        let size = self
            .program
            .classical_registers
            .iter()
            .find(|(register, _)| register == name)
            .map(|(_, size)| *size)
            .ok_or_else(|| Error::Lookup(format!("unknown classical variable {name}")))?;
        let mut value = 0i64;
        for k in 0..size {
            if let Some(ClassicalValue::Bool(true)) =
                self.classical_values.get(&format!("{name}[{k}]"))
            {
                value |= 1 << k;
            }
        }
        Ok(value)
    }

    // --- Assertion evaluation ---------------------------------------------

    fn evaluate_assertion(&self, assertion: &Assertion) -> Result<bool, Error> {
        let qubits: Vec<usize> = assertion
            .targets
            .iter()
            .map(|target| match self.resolve_target(target)? {
                ResolvedTarget::Qubit(index) => Ok(index),
                ResolvedTarget::Register { .. } => Err(Error::Lookup(format!(
                    "assertion target {target} does not resolve to a single qubit"
                ))),
            })
            .collect::<Result<_, _>>()?;
        match &assertion.kind {
            AssertionKind::Superposition => Ok(self.check_superposition(&qubits)),
            AssertionKind::Entanglement => Ok(self.check_entanglement(&qubits)),
            AssertionKind::Equality(check) => Ok(self.check_equality(&qubits, check)?),
            AssertionKind::Inequality(check) => Ok(!self.check_equality(&qubits, check)?),
        }
    }

    /// The targets are superposed when more than one computational basis
    /// state carries probability.
    fn check_superposition(&self, qubits: &[usize]) -> bool {
        let rho = self.state.partial_trace(qubits);
        let populated = (0..rho.dim())
            .filter(|index| rho.probability(*index) > EPSILON)
            .count();
        populated >= 2
    }

    /// The targets are entangled when no non-trivial bipartition factors
    /// the reduced state into a product.
    fn check_entanglement(&self, qubits: &[usize]) -> bool {
        let full = self.state.partial_trace(qubits);
        let count = qubits.len();
        // Masks with bit 0 set enumerate each unordered bipartition once.
        for mask in (1..(1usize << count) - 1).filter(|mask| mask & 1 == 1) {
            let (subset, rest): (Vec<usize>, Vec<usize>) =
                (0..count).partition(|position| mask & (1 << position) != 0);
            let rho_subset = self
                .state
                .partial_trace(&subset.iter().map(|p| qubits[*p]).collect::<Vec<_>>());
            let rho_rest = self
                .state
                .partial_trace(&rest.iter().map(|p| qubits[*p]).collect::<Vec<_>>());
            if bipartition_factors(&full, &rho_subset, &rho_rest, &subset, &rest) {
                return false;
            }
        }
        true
    }

    fn check_equality(&self, qubits: &[usize], check: &EqualityCheck) -> Result<bool, Error> {
        let rho = self.state.partial_trace(qubits);
        let dim = 1usize << qubits.len();
        let expected = match &check.expected {
            ExpectedState::BitString(bits) => {
                let mut index = 0;
                for (position, bit) in bits.bytes().enumerate() {
                    if bit == b'1' {
                        index |= 1 << position;
                    }
                }
                let mut amplitudes = vec![Complex64::new(0.0, 0.0); dim];
                amplitudes[index] = Complex64::new(1.0, 0.0);
                amplitudes
            }
            ExpectedState::Amplitudes(amplitudes) => {
                let norm = amplitudes
                    .iter()
                    .map(|a| a.norm_sqr())
                    .sum::<f64>()
                    .sqrt();
                if norm <= EPSILON {
                    return Err(Error::Lookup(
                        "assertion body has zero norm".to_string(),
                    ));
                }
                amplitudes.iter().map(|a| a / norm).collect()
            }
        };
        // Comparing density matrices makes the check insensitive to an
        // unobservable global phase in the body.
        let expected = DensityMatrix::from_pure(&expected);
        Ok(rho.approx_eq(&expected, check.tolerance))
    }

    // --- Direct state mutation --------------------------------------------

    pub fn change_classical_variable_value(
        &mut self,
        name: &str,
        value: ClassicalValue,
    ) -> Result<(), Error> {
        if let Some(current) = self.classical_values.get_mut(name) {
            if current.type_name() != value.type_name() {
                return Err(Error::Lookup(format!(
                    "variable {name} has type {}, not {}",
                    current.type_name(),
                    value.type_name()
                )));
            }
            *current = value;
            return Ok(());
        }
        if self
            .program
            .classical_registers
            .iter()
            .any(|(register, _)| register == name)
        {
            return Err(Error::Lookup(format!(
                "register {name} must be written one index at a time"
            )));
        }
        Err(Error::Lookup(format!("unknown classical variable {name}")))
    }

    pub fn change_amplitude_value(&mut self, bits: &str, value: Complex64) -> Result<(), Error> {
        let index = self.bitstring_index(bits)?;
        self.state
            .set_amplitude_rescaled(index, value)
            .map_err(|error| match error {
                statevector_simulator::Error::Normalization => Error::Normalization,
                statevector_simulator::Error::IndexOutOfRange { .. } => {
                    Error::Lookup(format!("basis state {bits} is out of range"))
                }
            })
    }

    // --- State access -----------------------------------------------------

    pub fn amplitude_by_index(&self, index: usize) -> Result<Complex64, Error> {
        self.state
            .amplitude(index)
            .map_err(|_| Error::Lookup(format!("basis index {index} is out of range")))
    }

    pub fn amplitude_by_bitstring(&self, bits: &str) -> Result<Complex64, Error> {
        let index = self.bitstring_index(bits)?;
        self.amplitude_by_index(index)
    }

    pub fn state_vector_full(&self) -> Vec<Complex64> {
        self.state.amplitudes().to_vec()
    }

    /// The projected sub-state over `qubits`. Repetition is rejected;
    /// reordering is allowed.
    pub fn state_vector_sub(&self, qubits: &[usize]) -> Result<Vec<Complex64>, Error> {
        if has_duplicates(qubits) {
            return Err(Error::Lookup(
                "sub-state qubit lists must not repeat qubits".to_string(),
            ));
        }
        for qubit in qubits {
            if *qubit >= self.num_qubits() {
                return Err(Error::Lookup(format!("unknown qubit index {qubit}")));
            }
        }
        Ok(self.state.sub_state(qubits))
    }

    pub fn classical_value(&self, name: &str) -> Result<&ClassicalValue, Error> {
        self.classical_values
            .get(name)
            .ok_or_else(|| Error::Lookup(format!("unknown classical variable {name}")))
    }

    pub fn num_classical_variables(&self) -> usize {
        self.classical_names.len()
    }

    pub fn classical_variable_name(&self, index: usize) -> Result<&str, Error> {
        self.classical_names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| Error::Lookup(format!("no classical variable {index}")))
    }

    pub fn quantum_register_name(&self, index: usize) -> Result<&str, Error> {
        self.program
            .quantum_registers
            .get(index)
            .map(|(name, _)| name.as_str())
            .ok_or_else(|| Error::Lookup(format!("no quantum register {index}")))
    }

    fn bitstring_index(&self, bits: &str) -> Result<usize, Error> {
        if bits.len() != self.num_qubits() || !bits.bytes().all(|b| b == b'0' || b == b'1') {
            return Err(Error::Lookup(format!(
                "bit string {bits} does not address {} qubits",
                self.num_qubits()
            )));
        }
        let mut index = 0;
        for (position, bit) in bits.bytes().enumerate() {
            if bit == b'1' {
                index |= 1 << position;
            }
        }
        Ok(index)
    }

    /// The `(qubit, outcome)` pairs of the measurement log, oldest first.
    pub fn measurement_log(&self) -> Vec<(usize, bool)> {
        self.measurement_log
            .iter()
            .map(|record| (record.qubit, record.outcome))
            .collect()
    }

    // --- Breakpoints ------------------------------------------------------

    /// Registers a breakpoint at the instruction whose original span
    /// contains `position`. Exact ties favor the instruction with the
    /// smaller `original_start`.
    pub fn set_breakpoint(&mut self, position: usize) -> Result<usize, Error> {
        let instruction = self
            .program
            .instructions
            .iter()
            .filter(|instruction| {
                instruction.original_start <= position && position <= instruction.original_end
            })
            .min_by_key(|instruction| instruction.original_start)
            .ok_or_else(|| {
                Error::Lookup(format!("no instruction spans source offset {position}"))
            })?;
        let index = instruction.line_number;
        self.breakpoints.insert(index);
        Ok(index)
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    // --- Stack introspection ----------------------------------------------

    pub fn stack_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Return instructions of the innermost `max_depth` frames,
    /// innermost-first.
    pub fn stack_trace(&self, max_depth: usize) -> Vec<usize> {
        self.call_stack
            .iter()
            .rev()
            .take(max_depth)
            .map(|frame| frame.return_instruction)
            .collect()
    }

    pub fn call_stack(&self) -> &[Frame] {
        &self.call_stack
    }
}

pub(crate) enum ResolvedTarget {
    Qubit(usize),
    Register { offset: usize, size: usize },
}

/// Resolves one target expression through a chain of call substitutions,
/// outermost first.
pub(crate) fn resolve_target_name(
    program: &Program,
    substitutions: &[&FxHashMap<String, String>],
    target: &str,
) -> Result<ResolvedTarget, Error> {
    let mut name = target.to_string();
    for substitution in substitutions.iter().rev() {
        if let Some(actual) = substitution.get(&name) {
            name.clone_from(actual);
        }
    }
    let (register, index) = split_register(&name)
        .ok_or_else(|| Error::Lookup(format!("malformed qubit reference {name}")))?;
    match index {
        Some(index) => program
            .qubit_index(register, index)
            .map(ResolvedTarget::Qubit)
            .ok_or_else(|| Error::Lookup(format!("unknown qubit {name}"))),
        None => {
            let mut offset = 0;
            for (declared, size) in &program.quantum_registers {
                if declared == register {
                    return Ok(if *size == 1 {
                        ResolvedTarget::Qubit(offset)
                    } else {
                        ResolvedTarget::Register {
                            offset,
                            size: *size,
                        }
                    });
                }
                offset += size;
            }
            Err(Error::Lookup(format!("unknown register {register}")))
        }
    }
}

/// Resolves the target list of a gate statement into one qubit tuple per
/// application, broadcasting bare multi-qubit registers.
pub(crate) fn resolve_applications(
    program: &Program,
    substitutions: &[&FxHashMap<String, String>],
    code: &str,
) -> Result<Vec<Vec<usize>>, Error> {
    let targets = parse_parameters(code);
    let resolved: Vec<ResolvedTarget> = targets
        .iter()
        .map(|target| resolve_target_name(program, substitutions, target))
        .collect::<Result<_, _>>()?;
    let broadcast = resolved
        .iter()
        .filter_map(|target| match target {
            ResolvedTarget::Register { size, .. } => Some(*size),
            ResolvedTarget::Qubit(_) => None,
        })
        .collect::<FxHashSet<usize>>();
    if broadcast.len() > 1 {
        return Err(Error::Lookup(
            "broadcast registers must have equal sizes".to_string(),
        ));
    }
    let repetitions = broadcast.into_iter().next().unwrap_or(1);
    (0..repetitions)
        .map(|step| {
            resolved
                .iter()
                .map(|target| match target {
                    ResolvedTarget::Qubit(index) => Ok(*index),
                    ResolvedTarget::Register { offset, .. } => Ok(offset + step),
                })
                .collect()
        })
        .collect()
}

/// Resolves every qubit referenced by a statement into global indices,
/// expanding whole registers.
pub(crate) fn resolve_qubits(
    program: &Program,
    substitutions: &[&FxHashMap<String, String>],
    code: &str,
) -> Result<Vec<usize>, Error> {
    let mut qubits = Vec::new();
    for target in parse_parameters(code) {
        match resolve_target_name(program, substitutions, &target)? {
            ResolvedTarget::Qubit(index) => qubits.push(index),
            ResolvedTarget::Register { offset, size } => {
                qubits.extend(offset..offset + size);
            }
        }
    }
    Ok(qubits)
}

fn has_duplicates(qubits: &[usize]) -> bool {
    let mut seen = FxHashSet::default();
    qubits.iter().any(|qubit| !seen.insert(*qubit))
}

fn matrix_qubits(dim: usize) -> usize {
    dim.trailing_zeros() as usize
}

/// Whether the joint reduced state factors into the product of the two
/// partial traces, under the subset orderings used to build them.
fn bipartition_factors(
    full: &DensityMatrix,
    rho_subset: &DensityMatrix,
    rho_rest: &DensityMatrix,
    subset: &[usize],
    rest: &[usize],
) -> bool {
    let extract = |index: usize, positions: &[usize]| -> usize {
        positions
            .iter()
            .enumerate()
            .fold(0, |acc, (local, position)| {
                acc | usize::from(index & (1 << position) != 0) << local
            })
    };
    for row in 0..full.dim() {
        for column in 0..full.dim() {
            let product = rho_subset.get(extract(row, subset), extract(column, subset))
                * rho_rest.get(extract(row, rest), extract(column, rest));
            if !statevector_simulator::approx_eq(full.get(row, column), product, EPSILON) {
                return false;
            }
        }
    }
    true
}

/// Splits a gate statement head into its name and parsed parameters.
fn parse_gate_head(code: &str) -> Result<(String, Vec<f64>), Error> {
    let trimmed = code.trim_start();
    let name_end = trimmed
        .find(|c: char| c == '(' || c.is_whitespace())
        .unwrap_or(trimmed.len());
    let name = trimmed[..name_end].trim_end_matches(';').to_string();
    if name.is_empty() {
        return Err(Error::Lookup(format!("malformed gate statement {code}")));
    }
    let rest = &trimmed[name_end..];
    if !rest.trim_start().starts_with('(') {
        return Ok((name, Vec::new()));
    }
    let open = rest.find('(').expect("parameter list should open");
    let close = rest
        .rfind(')')
        .ok_or_else(|| Error::Lookup(format!("unterminated parameter list in {code}")))?;
    let parameters = rest[open + 1..close]
        .split(',')
        .map(parse_angle)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| Error::Lookup(format!("invalid gate parameter in {code}")))?;
    Ok((name, parameters))
}

/// Parses an angle expression: a float literal or a `pi` fraction such as
/// `pi`, `-pi/2`, or `3*pi/4`.
fn parse_angle(text: &str) -> Option<f64> {
    fn factor(text: &str) -> Option<f64> {
        let text = text.trim();
        if text == "pi" {
            Some(PI)
        } else {
            text.parse().ok()
        }
    }

    let text = text.trim();
    let (sign, rest) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest.trim_start()),
        None => (1.0, text),
    };
    let (numerator_text, denominator) = match rest.split_once('/') {
        Some((numerator, denominator)) => (numerator, factor(denominator)?),
        None => (rest, 1.0),
    };
    let numerator = match numerator_text.split_once('*') {
        Some((left, right)) => factor(left)? * factor(right)?,
        None => factor(numerator_text)?,
    };
    Some(sign * numerator / denominator)
}
