// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use miette::Diagnostic;
use thiserror::Error;

/// A structured parsing error with a 1-based source location.
///
/// The display form is `"<input>:L:C: detail"`, which front ends can feed
/// to editors directly.
#[derive(Clone, Debug, Diagnostic, Error, PartialEq)]
#[error("<input>:{line}:{column}: {detail}")]
#[diagnostic(code("qasm_debugger::parse"))]
pub struct Error {
    pub line: usize,
    pub column: usize,
    pub detail: String,
    #[label("{detail}")]
    pub span: miette::SourceSpan,
}

impl Error {
    /// Builds an error pointing at the given character offset of `code`.
    ///
    /// When `target` occurs on the offset's line the column points at it;
    /// otherwise at the offset itself.
    #[must_use]
    pub fn at_offset(code: &str, offset: usize, detail: String, target: Option<&str>) -> Self {
        let offset = offset.min(code.len());
        let line_start = code[..offset].rfind('\n').map_or(0, |position| position + 1);
        let line = code[..line_start].matches('\n').count() + 1;
        let line_end = code[line_start..]
            .find('\n')
            .map_or(code.len(), |position| line_start + position);
        let line_text = &code[line_start..line_end];

        let column_offset = target
            .and_then(|target| line_text.find(target))
            .unwrap_or(offset - line_start);
        let length = target.map_or(1, str::len).max(1);

        Self {
            line,
            column: column_offset + 1,
            detail,
            span: (line_start + column_offset, length).into(),
        }
    }
}
