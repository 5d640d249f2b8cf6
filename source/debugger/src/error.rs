// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Clone, Debug, Diagnostic, Error, PartialEq)]
#[diagnostic(transparent)]
#[error(transparent)]
pub struct Error(pub ErrorKind);

impl Error {
    #[must_use]
    pub fn is_parse_error(&self) -> bool {
        matches!(self.0, ErrorKind::Parsing(..))
    }
}

/// The kind of error raised by the debugger.
///
/// Parsing errors are fatal for a `load_code` call and carry a source
/// location. Simulation errors are local: they leave the state vector and
/// the classical store untouched.
#[derive(Clone, Debug, Diagnostic, Error, PartialEq)]
#[error(transparent)]
pub enum ErrorKind {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parsing(#[from] crate::parsing::Error),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Simulation(#[from] crate::simulation::Error),
}

impl From<crate::parsing::Error> for Error {
    fn from(error: crate::parsing::Error) -> Self {
        Self(ErrorKind::Parsing(error))
    }
}

impl From<crate::simulation::Error> for Error {
    fn from(error: crate::simulation::Error) -> Self {
        Self(ErrorKind::Simulation(error))
    }
}
