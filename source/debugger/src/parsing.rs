// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Preprocessing of assertion-extended OpenQASM 2.0 source into a flat
//! instruction graph, plus the assertion sub-grammar.

pub mod assertions;
mod error;
pub mod preprocessing;
pub(crate) mod utils;

pub use assertions::{Assertion, AssertionKind, EqualityCheck, ExpectedState};
pub use error::Error;
pub use preprocessing::{Block, FunctionDefinition, Instruction, Program, preprocess};
