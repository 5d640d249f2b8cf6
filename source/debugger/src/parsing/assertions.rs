// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The assertion sub-grammar:
//!
//! ```text
//! Assertion := "assert-" Kind Targets [ "{" Body "}" ]
//! Kind      := "ent" | "sup" | "eq" | "ineq"
//! Targets   := Term { "," Term }
//! Term      := Identifier [ "[" Digits "]" ]
//! ```
//!
//! The body of an equality assertion is either a bit-string or a
//! comma-separated list of complex amplitudes, optionally followed by
//! `";" Tolerance`.

use crate::parsing::utils::{is_digits, remove_whitespace};
use num_complex::Complex64;
use rustc_hash::{FxHashMap, FxHashSet};

/// Default absolute tolerance for equality assertions.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// The expected state carried by an equality assertion body.
#[derive(Clone, Debug, PartialEq)]
pub enum ExpectedState {
    /// A computational basis state given as a bit-string, one character
    /// per target qubit.
    BitString(String),
    /// A literal state vector of length `2^|targets|`.
    Amplitudes(Vec<Complex64>),
}

/// The comparison payload shared by `assert-eq` and `assert-ineq`.
#[derive(Clone, Debug, PartialEq)]
pub struct EqualityCheck {
    pub expected: ExpectedState,
    pub tolerance: f64,
}

/// The kind of property an assertion claims.
#[derive(Clone, Debug, PartialEq)]
pub enum AssertionKind {
    /// Every non-trivial bipartition of the targets is correlated.
    Entanglement,
    /// The targets are not in a single computational basis state.
    Superposition,
    /// The sub-state over the targets equals the expected state.
    Equality(EqualityCheck),
    /// The sub-state over the targets differs from the expected state.
    Inequality(EqualityCheck),
}

/// A parsed assertion attached to one instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Assertion {
    pub kind: AssertionKind,
    pub targets: Vec<String>,
}

impl Assertion {
    /// Replaces whole-register targets by their per-index expansion.
    ///
    /// Registers shadowed by an enclosing gate definition's formal
    /// parameters are left untouched.
    pub fn unfold_register_targets(
        &mut self,
        defined_registers: &FxHashMap<String, usize>,
        shadowed_registers: &[String],
    ) {
        let mut unfolded = Vec::with_capacity(self.targets.len());
        let mut changed = false;
        for target in &self.targets {
            if !shadowed_registers.contains(target) {
                if let Some(size) = defined_registers.get(target) {
                    unfolded.extend((0..*size).map(|index| format!("{target}[{index}]")));
                    changed = true;
                    continue;
                }
            }
            unfolded.push(target.clone());
        }
        if changed {
            self.targets = unfolded;
        }
    }

    /// Validates target counts, duplicates, and the body against the kind.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = FxHashSet::default();
        for target in &self.targets {
            if !seen.insert(target) {
                return Err(format!("Duplicate assertion target {target}."));
            }
        }
        match &self.kind {
            AssertionKind::Entanglement => {
                if self.targets.len() < 2 {
                    return Err("Entanglement assertions require at least two targets.".to_string());
                }
            }
            AssertionKind::Superposition => {
                if self.targets.is_empty() {
                    return Err("Superposition assertions require at least one target.".to_string());
                }
            }
            AssertionKind::Equality(check) | AssertionKind::Inequality(check) => {
                if self.targets.is_empty() {
                    return Err("Equality assertions require at least one target.".to_string());
                }
                if !(check.tolerance > 0.0 && check.tolerance.is_finite()) {
                    return Err("Assertion tolerance must be positive.".to_string());
                }
                match &check.expected {
                    ExpectedState::BitString(bits) => {
                        if bits.len() != self.targets.len() {
                            return Err(format!(
                                "Expected a bit for each of the {} assertion targets.",
                                self.targets.len()
                            ));
                        }
                    }
                    ExpectedState::Amplitudes(amplitudes) => {
                        if amplitudes.len() != 1 << self.targets.len() {
                            return Err(format!(
                                "Expected {} amplitudes for {} assertion targets.",
                                1usize << self.targets.len(),
                                self.targets.len()
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Whether a source fragment is an assertion statement.
#[must_use]
pub fn is_assertion(line: &str) -> bool {
    line.trim_start().starts_with("assert-")
}

/// Parses one assertion statement.
///
/// `code` is the fragment with any body block already removed; `body` is
/// the extracted block content for equality assertions. Errors carry only
/// the detail text; the preprocessor attaches the source location.
pub fn parse_assertion(code: &str, body: Option<&str>) -> Result<Assertion, String> {
    let trimmed = code.trim();
    let rest = trimmed
        .strip_prefix("assert-")
        .ok_or_else(|| format!("Invalid assertion {trimmed}."))?;
    let (kind_token, target_text) = rest.split_at(rest.find(char::is_whitespace).unwrap_or(rest.len()));

    let targets: Vec<String> = target_text
        .trim()
        .trim_end_matches(';')
        .split(',')
        .map(remove_whitespace)
        .filter(|target| !target.is_empty())
        .collect();
    if targets.is_empty() {
        return Err(format!("Assertion {trimmed} names no targets."));
    }

    let kind = match kind_token {
        "ent" => AssertionKind::Entanglement,
        "sup" => AssertionKind::Superposition,
        "eq" | "ineq" => {
            let body = body
                .filter(|body| !body.trim().is_empty())
                .ok_or_else(|| format!("Assertion assert-{kind_token} requires a body."))?;
            let check = parse_equality_body(body)?;
            if kind_token == "eq" {
                AssertionKind::Equality(check)
            } else {
                AssertionKind::Inequality(check)
            }
        }
        other => return Err(format!("Unknown assertion kind assert-{other}.")),
    };

    Ok(Assertion { kind, targets })
}

fn parse_equality_body(body: &str) -> Result<EqualityCheck, String> {
    let (content, tolerance) = match body.split_once(';') {
        Some((content, tolerance_text)) => {
            let tolerance = tolerance_text
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("Invalid assertion tolerance {}.", tolerance_text.trim()))?;
            (content, tolerance)
        }
        None => (body, DEFAULT_TOLERANCE),
    };
    let content = remove_whitespace(content);
    if content.is_empty() {
        return Err("Empty assertion body.".to_string());
    }

    let expected = if is_digits(&content) && content.bytes().all(|b| b == b'0' || b == b'1') {
        ExpectedState::BitString(content)
    } else {
        let amplitudes = content
            .split(',')
            .map(|literal| {
                parse_complex(literal)
                    .ok_or_else(|| format!("Invalid amplitude literal {literal}."))
            })
            .collect::<Result<Vec<_>, _>>()?;
        ExpectedState::Amplitudes(amplitudes)
    };

    Ok(EqualityCheck {
        expected,
        tolerance,
    })
}

/// Parses a complex literal: `a`, `bi`, `a+bi`, or `a-bi`.
#[must_use]
pub fn parse_complex(text: &str) -> Option<Complex64> {
    if let Some(body) = text.strip_suffix('i') {
        match body {
            "" | "+" => return Some(Complex64::new(0.0, 1.0)),
            "-" => return Some(Complex64::new(0.0, -1.0)),
            _ => {}
        }
        // Split a combined literal at the sign that separates real and
        // imaginary parts, skipping a leading sign and exponent signs.
        let split = body
            .char_indices()
            .rev()
            .find(|(position, c)| {
                (*c == '+' || *c == '-')
                    && *position > 0
                    && !matches!(body.as_bytes()[position - 1], b'e' | b'E')
            })
            .map(|(position, _)| position);
        if let Some(position) = split {
            let real = body[..position].parse::<f64>().ok()?;
            let imaginary = match &body[position..] {
                "+" => 1.0,
                "-" => -1.0,
                signed => signed.parse::<f64>().ok()?,
            };
            Some(Complex64::new(real, imaginary))
        } else {
            Some(Complex64::new(0.0, body.parse::<f64>().ok()?))
        }
    } else {
        Some(Complex64::new(text.parse::<f64>().ok()?, 0.0))
    }
}

#[cfg(test)]
mod tests;
