// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The reversible execution engine, its diagnostics, and the
//! assertion-removing compilation pass.

pub mod compilation;
pub mod diagnostics;
pub mod engine;

pub use compilation::{CompilationSettings, compile};
pub use diagnostics::{Diagnostics, ErrorCause, ErrorCauseKind};
pub use engine::{ClassicalValue, ExecutionState, Frame, Simulation};

use miette::Diagnostic;
use thiserror::Error;

/// A runtime error. All variants are local: the state vector and the
/// classical store are only changed after validation succeeds.
#[derive(Clone, Debug, Diagnostic, Error, PartialEq)]
pub enum Error {
    /// A stepping method was called in a state where it cannot apply.
    /// The state machine is unchanged.
    #[error("operation is not valid in the current execution state")]
    #[diagnostic(code("qasm_debugger::invalid_operation"))]
    InvalidOperation,
    /// An amplitude mutation could not preserve the state norm.
    #[error("amplitude change cannot preserve the state norm")]
    #[diagnostic(code("qasm_debugger::normalization"))]
    Normalization,
    /// An unknown variable, qubit, gate, or instruction was referenced.
    #[error("lookup failed: {0}")]
    #[diagnostic(code("qasm_debugger::lookup"))]
    Lookup(String),
}
