// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A reversible debugger for OpenQASM 2.0 programs extended with quantum
//! state assertions (`assert-ent`, `assert-sup`, `assert-eq`, `assert-ineq`).
//!
//! Programs are preprocessed into a flat instruction graph with call
//! substitutions and data-dependency edges, then executed instruction by
//! instruction on a state-vector backend. The engine supports stepping
//! forward and backward (including across measurements), breakpoints,
//! step-over/step-out across user-defined gate calls, and live inspection
//! and mutation of classical and quantum state. When an assertion fails,
//! the diagnostics engine enumerates plausible root causes and suggests
//! where to move or add assertions.

pub mod error;
pub mod interface;
pub mod parsing;
pub mod simulation;

pub use error::{Error, ErrorKind};
pub use interface::{Debugger, LoadResult, PauseHandle};
pub use simulation::CompilationSettings;
