// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Emits assertion-free source text from a preprocessed program,
//! optionally cut at a chosen slice index.

use crate::parsing::{Instruction, Program, utils::targets_overlap};

/// Settings for the assertion-removing compile pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompilationSettings {
    /// 0 preserves the one-statement-per-line layout; higher levels may
    /// drop barriers and coalesce consecutive single-qubit gates on
    /// disjoint qubits, preserving observable semantics.
    pub opt: u8,
    /// When set, only the prefix strictly before the `(slice_index + 1)`-th
    /// assertion is emitted, and that assertion is dropped with the rest.
    pub slice_index: Option<usize>,
}

/// Walks the instruction array in program order and emits source text with
/// every assertion omitted.
#[must_use]
pub fn compile(program: &Program, settings: &CompilationSettings) -> String {
    let mut out = String::new();
    // Coalescing buffer of single-qubit statements awaiting one line.
    let mut pending: Vec<&Instruction> = Vec::new();
    let mut assertions_seen = 0;

    for instruction in &program.instructions {
        if instruction.in_function_definition {
            continue;
        }
        if instruction.assertion.is_some() {
            if settings.slice_index == Some(assertions_seen) {
                break;
            }
            assertions_seen += 1;
            continue;
        }
        if settings.opt >= 1 && instruction.is_barrier() {
            continue;
        }
        if instruction.is_function_definition {
            flush(&mut out, &mut pending);
            emit_definition(&mut out, program, instruction);
            continue;
        }
        if settings.opt >= 1 && is_coalescable(instruction) {
            if pending
                .iter()
                .any(|previous| targets_overlap(&previous.targets, &instruction.targets))
            {
                flush(&mut out, &mut pending);
            }
            pending.push(instruction);
            continue;
        }
        flush(&mut out, &mut pending);
        out.push_str(&instruction.code);
        out.push('\n');
    }
    flush(&mut out, &mut pending);
    out
}

/// A plain single-qubit gate statement that may share a line with its
/// neighbors.
fn is_coalescable(instruction: &Instruction) -> bool {
    instruction.targets.len() == 1
        && !instruction.is_function_call
        && !instruction.is_measurement()
        && !instruction.is_reset()
        && !instruction.is_classic_controlled()
        && !instruction.is_variable_declaration()
        && !instruction.is_directive()
}

fn flush(out: &mut String, pending: &mut Vec<&Instruction>) {
    if pending.is_empty() {
        return;
    }
    let line: Vec<&str> = pending
        .iter()
        .map(|instruction| instruction.code.as_str())
        .collect();
    out.push_str(&line.join(" "));
    out.push('\n');
    pending.clear();
}

/// Re-emits a gate definition with an assertion-free body.
fn emit_definition(out: &mut String, program: &Program, definition: &Instruction) {
    out.push_str(definition.code.trim());
    out.push_str(" { ");
    for &child in &definition.child_instructions {
        let body_instruction = &program.instructions[child];
        if body_instruction.assertion.is_some() || body_instruction.is_return() {
            continue;
        }
        out.push_str(&body_instruction.code);
        out.push(' ');
    }
    out.push_str("}\n");
}

#[cfg(test)]
mod tests;
