// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The public operation table exposed to host callers: lifecycle,
//! stepping, predicates, program-model queries, state access and
//! mutation, breakpoints, diagnostics, and compilation.
//!
//! The engine is single-threaded cooperative. Every operation except
//! [`Debugger::pause_simulation`] (and a cloned [`PauseHandle`]) must be
//! externally serialized; the run loops check one atomic flag between
//! instructions and never leave an instruction half-applied.

use crate::error::Error;
use crate::parsing::preprocess;
use crate::simulation::{
    self, ClassicalValue, CompilationSettings, Diagnostics, ExecutionState, Simulation, compile,
};
use num_complex::Complex64;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The outcome of [`Debugger::load_code_with_result`], for hosts that
/// prefer a flat record over a structured error.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadResult {
    pub ok: bool,
    pub error_line: usize,
    pub error_column: usize,
    pub detail: String,
}

/// A cloneable handle that requests a pause from another thread.
#[derive(Clone, Debug)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    pub fn request_pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A reversible debugger session.
///
/// Without a loaded program the session is in the `Loaded` state and every
/// stepping or query operation reports
/// [`simulation::Error::InvalidOperation`]. Dropping the debugger releases
/// all state; there is no persisted state.
pub struct Debugger {
    simulation: Option<Simulation>,
    pause_requested: Arc<AtomicBool>,
    seed: Option<u64>,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Debugger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            simulation: None,
            pause_requested: Arc::new(AtomicBool::new(false)),
            seed: None,
        }
    }

    /// A debugger whose measurement outcomes are deterministic.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::new()
        }
    }

    // --- Lifecycle --------------------------------------------------------

    /// Parses and loads a program, replacing any previous session state.
    /// On failure the debugger returns to the unloaded state.
    pub fn load_code(&mut self, source: &str) -> Result<(), Error> {
        match preprocess(source) {
            Ok(program) => {
                self.simulation = Some(Simulation::new(
                    program,
                    self.seed,
                    self.pause_requested.clone(),
                ));
                Ok(())
            }
            Err(error) => {
                self.simulation = None;
                Err(error.into())
            }
        }
    }

    /// Like [`Self::load_code`], reporting the outcome as a flat record.
    pub fn load_code_with_result(&mut self, source: &str) -> LoadResult {
        match self.load_code(source) {
            Ok(()) => LoadResult {
                ok: true,
                ..LoadResult::default()
            },
            Err(Error(crate::error::ErrorKind::Parsing(parse))) => LoadResult {
                ok: false,
                error_line: parse.line,
                error_column: parse.column,
                detail: parse.detail,
            },
            Err(error) => LoadResult {
                ok: false,
                detail: error.to_string(),
                ..LoadResult::default()
            },
        }
    }

    /// Discards all runtime state and returns to the first instruction.
    pub fn reset_simulation(&mut self) -> Result<(), Error> {
        self.simulation_mut()?.reset();
        Ok(())
    }

    // --- Stepping ---------------------------------------------------------

    pub fn step_forward(&mut self) -> Result<(), Error> {
        Ok(self.simulation_mut()?.step_forward()?)
    }

    pub fn step_over_forward(&mut self) -> Result<(), Error> {
        Ok(self.simulation_mut()?.step_over_forward()?)
    }

    pub fn step_out_forward(&mut self) -> Result<(), Error> {
        Ok(self.simulation_mut()?.step_out_forward()?)
    }

    pub fn step_backward(&mut self) -> Result<(), Error> {
        Ok(self.simulation_mut()?.step_backward()?)
    }

    pub fn step_over_backward(&mut self) -> Result<(), Error> {
        Ok(self.simulation_mut()?.step_over_backward()?)
    }

    pub fn step_out_backward(&mut self) -> Result<(), Error> {
        Ok(self.simulation_mut()?.step_out_backward()?)
    }

    pub fn run_simulation(&mut self) -> Result<(), Error> {
        Ok(self.simulation_mut()?.run()?)
    }

    pub fn run_simulation_backward(&mut self) -> Result<(), Error> {
        Ok(self.simulation_mut()?.run_backward()?)
    }

    /// Runs to the end, returning the number of assertion failures.
    pub fn run_all(&mut self) -> Result<usize, Error> {
        Ok(self.simulation_mut()?.run_all()?)
    }

    /// Requests a pause; the running loop honors it at the next
    /// instruction boundary.
    pub fn pause_simulation(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// A handle other threads may use to request a pause.
    #[must_use]
    pub fn pause_handle(&self) -> PauseHandle {
        PauseHandle(self.pause_requested.clone())
    }

    // --- Predicates -------------------------------------------------------

    pub fn can_step_forward(&self) -> bool {
        self.simulation
            .as_ref()
            .is_some_and(Simulation::can_step_forward)
    }

    pub fn can_step_backward(&self) -> bool {
        self.simulation
            .as_ref()
            .is_some_and(Simulation::can_step_backward)
    }

    pub fn is_finished(&self) -> bool {
        self.simulation.as_ref().is_some_and(Simulation::is_finished)
    }

    pub fn did_assertion_fail(&self) -> bool {
        self.simulation
            .as_ref()
            .is_some_and(Simulation::did_assertion_fail)
    }

    pub fn was_breakpoint_hit(&self) -> bool {
        self.simulation
            .as_ref()
            .is_some_and(Simulation::was_breakpoint_hit)
    }

    pub fn execution_state(&self) -> Option<ExecutionState> {
        self.simulation.as_ref().map(Simulation::status)
    }

    // --- Program model queries --------------------------------------------

    pub fn get_current_instruction(&self) -> Result<usize, Error> {
        Ok(self.simulation_ref()?.program_counter())
    }

    pub fn get_instruction_count(&self) -> Result<usize, Error> {
        Ok(self.simulation_ref()?.instruction_count())
    }

    /// The original character span of an instruction.
    pub fn get_instruction_position(&self, instruction: usize) -> Result<(usize, usize), Error> {
        let simulation = self.simulation_ref()?;
        simulation
            .program()
            .instructions
            .get(instruction)
            .map(|instruction| (instruction.original_start, instruction.original_end))
            .ok_or_else(|| {
                simulation::Error::Lookup(format!("no instruction {instruction}")).into()
            })
    }

    pub fn get_num_qubits(&self) -> Result<usize, Error> {
        Ok(self.simulation_ref()?.num_qubits())
    }

    pub fn get_stack_depth(&self) -> Result<usize, Error> {
        Ok(self.simulation_ref()?.stack_depth())
    }

    pub fn get_stack_trace(&self, max_depth: usize) -> Result<Vec<usize>, Error> {
        Ok(self.simulation_ref()?.stack_trace(max_depth))
    }

    // --- State access -----------------------------------------------------

    pub fn get_amplitude_index(&self, index: usize) -> Result<Complex64, Error> {
        Ok(self.simulation_ref()?.amplitude_by_index(index)?)
    }

    pub fn get_amplitude_bitstring(&self, bits: &str) -> Result<Complex64, Error> {
        Ok(self.simulation_ref()?.amplitude_by_bitstring(bits)?)
    }

    pub fn get_state_vector_full(&self) -> Result<Vec<Complex64>, Error> {
        Ok(self.simulation_ref()?.state_vector_full())
    }

    /// The projected sub-state over `qubits`; repetition is rejected,
    /// reordering is allowed.
    pub fn get_state_vector_sub(&self, qubits: &[usize]) -> Result<Vec<Complex64>, Error> {
        Ok(self.simulation_ref()?.state_vector_sub(qubits)?)
    }

    pub fn get_classical_variable(&self, name: &str) -> Result<ClassicalValue, Error> {
        Ok(self.simulation_ref()?.classical_value(name)?.clone())
    }

    pub fn get_num_classical_variables(&self) -> Result<usize, Error> {
        Ok(self.simulation_ref()?.num_classical_variables())
    }

    pub fn get_classical_variable_name(&self, index: usize) -> Result<String, Error> {
        Ok(self
            .simulation_ref()?
            .classical_variable_name(index)?
            .to_string())
    }

    pub fn get_quantum_variable_name(&self, index: usize) -> Result<String, Error> {
        Ok(self
            .simulation_ref()?
            .quantum_register_name(index)?
            .to_string())
    }

    // --- Mutation ---------------------------------------------------------

    pub fn change_classical_variable_value(
        &mut self,
        name: &str,
        value: ClassicalValue,
    ) -> Result<(), Error> {
        Ok(self
            .simulation_mut()?
            .change_classical_variable_value(name, value)?)
    }

    pub fn change_amplitude_value(&mut self, bits: &str, value: Complex64) -> Result<(), Error> {
        Ok(self.simulation_mut()?.change_amplitude_value(bits, value)?)
    }

    // --- Breakpoints ------------------------------------------------------

    /// Registers a breakpoint at the instruction spanning the given source
    /// offset and returns that instruction's index.
    pub fn set_breakpoint(&mut self, position: usize) -> Result<usize, Error> {
        Ok(self.simulation_mut()?.set_breakpoint(position)?)
    }

    pub fn clear_breakpoints(&mut self) -> Result<(), Error> {
        self.simulation_mut()?.clear_breakpoints();
        Ok(())
    }

    // --- Diagnostics and compilation --------------------------------------

    /// The diagnostics sub-object, borrowing the session read-only.
    pub fn diagnostics(&self) -> Result<Diagnostics<'_>, Error> {
        Ok(Diagnostics::new(self.simulation_ref()?))
    }

    /// Emits assertion-free source text for the loaded program.
    pub fn compile(&self, settings: &CompilationSettings) -> Result<String, Error> {
        Ok(compile(self.simulation_ref()?.program(), settings))
    }

    fn simulation_ref(&self) -> Result<&Simulation, Error> {
        self.simulation
            .as_ref()
            .ok_or_else(|| simulation::Error::InvalidOperation.into())
    }

    fn simulation_mut(&mut self) -> Result<&mut Simulation, Error> {
        self.simulation
            .as_mut()
            .ok_or_else(|| simulation::Error::InvalidOperation.into())
    }
}

#[cfg(test)]
mod tests;
