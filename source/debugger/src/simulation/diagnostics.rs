// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Static and dynamic analyses run when an assertion fails: dependency
//! slicing, interaction tracking, zero-control detection, error-cause
//! enumeration, and assertion placement suggestions.
//!
//! All methods are side-effect free on the program model; the dynamic ones
//! read the simulator's current fields.

use crate::parsing::{
    AssertionKind, Instruction, Program,
    preprocessing::{parse_classic_controlled, parse_function_definition},
    utils::{split_register, targets_overlap, variables_equal},
};
use crate::simulation::{Error, Simulation, engine};
use rustc_hash::{FxHashMap, FxHashSet};
use statevector_simulator::gates;

/// Why a failed assertion plausibly failed.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ErrorCauseKind {
    /// No specific rule matched.
    Unknown,
    /// Two qubits claimed entangled never interact on any path.
    MissingInteraction,
    /// A controlled gate in the dependency slice always had all controls
    /// in `|0⟩`, so it never acted.
    ControlAlwaysZero,
}

/// One enumerated error cause, anchored at an instruction.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct ErrorCause {
    pub instruction: usize,
    pub kind: ErrorCauseKind,
}

/// Read-only diagnostics over a simulation.
pub struct Diagnostics<'a> {
    simulation: &'a Simulation,
}

impl<'a> Diagnostics<'a> {
    #[must_use]
    pub fn new(simulation: &'a Simulation) -> Self {
        Self { simulation }
    }

    fn program(&self) -> &Program {
        self.simulation.program()
    }

    pub fn num_qubits(&self) -> usize {
        self.simulation.num_qubits()
    }

    pub fn instruction_count(&self) -> usize {
        self.simulation.instruction_count()
    }

    /// The transitive data-dependency slice of an instruction, including
    /// the instruction itself.
    ///
    /// With `include_callers`, reaching an instruction inside a gate body
    /// also pulls in every call site of that definition and continues from
    /// the callers' own dependencies. Register declarations and gate
    /// definition headers are never included.
    pub fn data_dependencies(
        &self,
        instruction: usize,
        include_callers: bool,
    ) -> Result<Vec<usize>, Error> {
        let instructions = &self.program().instructions;
        if instruction >= instructions.len() {
            return Err(Error::Lookup(format!("no instruction {instruction}")));
        }
        let mut visited = FxHashSet::default();
        let mut queue = vec![instruction];
        while let Some(current) = queue.pop() {
            if !visited.insert(current) {
                continue;
            }
            for (dependency, _) in &instructions[current].data_dependencies {
                queue.push(*dependency);
            }
            if include_callers && instructions[current].in_function_definition {
                if let Some(definition) = enclosing_definition(instructions, current) {
                    let name = parse_function_definition(&definition.code).name;
                    for call in instructions.iter().filter(|candidate| {
                        candidate.is_function_call
                            && candidate.called_function.as_deref() == Some(name.as_str())
                    }) {
                        queue.push(call.line_number);
                    }
                }
            }
        }
        let mut result: Vec<usize> = visited
            .into_iter()
            .filter(|index| {
                let candidate = &instructions[*index];
                !candidate.is_variable_declaration() && !candidate.is_function_definition
            })
            .collect();
        result.sort_unstable();
        Ok(result)
    }

    /// The set of qubits that interact with `qubit` through multi-qubit
    /// gates in the instruction range `[0, before_instruction)`, including
    /// `qubit` itself. Calls are descended with their substitutions.
    pub fn interactions(
        &self,
        before_instruction: usize,
        qubit: usize,
    ) -> Result<Vec<usize>, Error> {
        let program = self.program();
        if qubit >= program.num_qubits() {
            return Err(Error::Lookup(format!("unknown qubit index {qubit}")));
        }
        if before_instruction > program.instructions.len() {
            return Err(Error::Lookup(format!(
                "no instruction {before_instruction}"
            )));
        }
        let mut interacting = FxHashSet::default();
        interacting.insert(qubit);
        let mut frames: Vec<&FxHashMap<String, String>> = Vec::new();
        for instruction in &program.instructions[..before_instruction] {
            if instruction.in_function_definition || instruction.is_function_definition {
                continue;
            }
            collect_interactions(program, instruction, &mut frames, &mut interacting);
        }
        let mut result: Vec<usize> = interacting.into_iter().collect();
        result.sort_unstable();
        Ok(result)
    }

    /// Instructions whose controls were all `|0⟩` when they executed.
    pub fn zero_control_instructions(&self) -> Vec<usize> {
        self.simulation
            .zero_control_flags()
            .iter()
            .enumerate()
            .filter_map(|(index, flag)| flag.then_some(index))
            .collect()
    }

    /// Enumerates plausible root causes for the current assertion failure.
    /// Empty when no failure is pending.
    pub fn potential_error_causes(&self) -> Vec<ErrorCause> {
        let Some(failed) = self.simulation.failed_assertion() else {
            return Vec::new();
        };
        let instructions = &self.program().instructions;
        let Some(assertion) = instructions[failed].assertion.as_ref() else {
            return Vec::new();
        };

        let mut causes: Vec<ErrorCause> = Vec::new();
        let push = |cause: ErrorCause, causes: &mut Vec<ErrorCause>| {
            if !causes.contains(&cause) {
                causes.push(cause);
            }
        };

        let slice = self
            .data_dependencies(failed, true)
            .unwrap_or_default();
        let zero_controls = self.simulation.zero_control_flags();
        for &dependency in &slice {
            if dependency == failed || !zero_controls[dependency] {
                continue;
            }
            if is_controlled_gate(&instructions[dependency]) {
                push(
                    ErrorCause {
                        instruction: dependency,
                        kind: ErrorCauseKind::ControlAlwaysZero,
                    },
                    &mut causes,
                );
            }
        }

        if assertion.kind == AssertionKind::Entanglement {
            let qubits: Vec<usize> = assertion
                .targets
                .iter()
                .filter_map(|target| self.simulation.resolve_single_qubit(target).ok())
                .collect();
            let interaction_sets: Vec<FxHashSet<usize>> = qubits
                .iter()
                .map(|qubit| {
                    self.interactions(failed, *qubit)
                        .unwrap_or_default()
                        .into_iter()
                        .collect()
                })
                .collect();
            'pairs: for left in 0..interaction_sets.len() {
                for right in left + 1..interaction_sets.len() {
                    if interaction_sets[left].is_disjoint(&interaction_sets[right]) {
                        push(
                            ErrorCause {
                                instruction: failed,
                                kind: ErrorCauseKind::MissingInteraction,
                            },
                            &mut causes,
                        );
                        break 'pairs;
                    }
                }
            }
        }

        if causes.is_empty() {
            causes.push(ErrorCause {
                instruction: failed,
                kind: ErrorCauseKind::Unknown,
            });
        }
        causes.sort_unstable();
        causes
    }

    /// For each assertion, the earliest index it can move to without
    /// crossing an instruction that touches its targets. Moving an
    /// assertion earlier narrows the window diagnostics have to search.
    pub fn suggest_assertion_movements(&self) -> Vec<(usize, usize)> {
        let instructions = &self.program().instructions;
        let mut suggestions = Vec::new();
        for instruction in instructions {
            if instruction.assertion.is_none() {
                continue;
            }
            let line = instruction.line_number;
            let scope = scope_members(instructions, line);
            let mut candidate = line;
            for index in (0..line).rev() {
                let previous = &instructions[index];
                if !scope.contains(&index) {
                    break;
                }
                if blocks_assertion_movement(previous, &instruction.targets) {
                    break;
                }
                candidate = index;
            }
            if candidate < line {
                suggestions.push((line, candidate));
            }
        }
        suggestions
    }

    /// Proposes `assert-ent` assertions at join points, where a multi-qubit
    /// gate first combines qubits from previously isolated groups.
    pub fn suggest_new_assertions(&self) -> Vec<(usize, String)> {
        let program = self.program();
        let mut groups: Vec<usize> = (0..program.num_qubits()).collect();
        let mut suggestions = Vec::new();
        let mut frames: Vec<&FxHashMap<String, String>> = Vec::new();
        for instruction in &program.instructions {
            if instruction.in_function_definition || instruction.is_function_definition {
                continue;
            }
            collect_join_points(
                program,
                instruction,
                instruction.line_number,
                &mut frames,
                &mut groups,
                &mut suggestions,
            );
        }
        suggestions
    }
}

/// The gate-definition instruction whose body contains `index`.
fn enclosing_definition(instructions: &[Instruction], index: usize) -> Option<&Instruction> {
    instructions.iter().find(|candidate| {
        candidate.is_function_definition && candidate.child_instructions.contains(&index)
    })
}

/// The body instructions of the definition a call jumps into.
fn callee_children<'a>(
    instructions: &'a [Instruction],
    call: &Instruction,
) -> Option<&'a [usize]> {
    instructions
        .iter()
        .find(|candidate| {
            candidate.is_function_definition
                && candidate.child_instructions.first() == Some(&call.successor_index)
        })
        .map(|definition| definition.child_instructions.as_slice())
}

fn is_controlled_gate(instruction: &Instruction) -> bool {
    let name = instruction
        .code
        .trim_start()
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    gates::num_controls(name).is_some_and(|controls| controls > 0)
}

/// The qubit tuples a statement applies a gate to, one per broadcast
/// application; empty for unresolvable or non-gate statements.
fn application_tuples(
    program: &Program,
    code: &str,
    frames: &[&FxHashMap<String, String>],
) -> Vec<Vec<usize>> {
    engine::resolve_applications(program, frames, code).unwrap_or_default()
}

fn collect_interactions<'a>(
    program: &'a Program,
    instruction: &'a Instruction,
    frames: &mut Vec<&'a FxHashMap<String, String>>,
    interacting: &mut FxHashSet<usize>,
) {
    if instruction.assertion.is_some()
        || instruction.is_variable_declaration()
        || instruction.is_barrier()
        || instruction.is_directive()
        || instruction.is_return()
        || instruction.is_measurement()
        || instruction.is_reset()
    {
        return;
    }
    if instruction.is_function_call {
        if let Some(children) = callee_children(&program.instructions, instruction) {
            frames.push(&instruction.call_substitution);
            for &child in children {
                let child = &program.instructions[child];
                collect_interactions(program, child, frames, interacting);
            }
            frames.pop();
        }
        return;
    }
    let operations: Vec<String> = if instruction.is_classic_controlled() {
        parse_classic_controlled(&instruction.code).operations
    } else {
        vec![instruction.code.clone()]
    };
    for operation in &operations {
        for tuple in application_tuples(program, operation, frames) {
            if tuple.len() >= 2 && tuple.iter().any(|qubit| interacting.contains(qubit)) {
                interacting.extend(tuple.iter().copied());
            }
        }
    }
}

fn collect_join_points<'a>(
    program: &'a Program,
    instruction: &'a Instruction,
    emit_at: usize,
    frames: &mut Vec<&'a FxHashMap<String, String>>,
    groups: &mut Vec<usize>,
    suggestions: &mut Vec<(usize, String)>,
) {
    if instruction.assertion.is_some()
        || instruction.is_variable_declaration()
        || instruction.is_barrier()
        || instruction.is_directive()
        || instruction.is_return()
        || instruction.is_measurement()
        || instruction.is_reset()
    {
        return;
    }
    if instruction.is_function_call {
        if let Some(children) = callee_children(&program.instructions, instruction) {
            frames.push(&instruction.call_substitution);
            for &child in children {
                let child = &program.instructions[child];
                // Suggestions land after the call site, at the top level.
                collect_join_points(program, child, emit_at, frames, groups, suggestions);
            }
            frames.pop();
        }
        return;
    }
    let operations: Vec<String> = if instruction.is_classic_controlled() {
        parse_classic_controlled(&instruction.code).operations
    } else {
        vec![instruction.code.clone()]
    };
    for operation in &operations {
        for tuple in application_tuples(program, operation, frames) {
            if tuple.len() < 2 {
                continue;
            }
            let merged: FxHashSet<usize> =
                tuple.iter().map(|qubit| groups[*qubit]).collect();
            if merged.len() >= 2 {
                let mut by_size: Vec<(usize, usize)> = merged
                    .iter()
                    .map(|group| {
                        (
                            groups.iter().filter(|g| *g == group).count(),
                            *group,
                        )
                    })
                    .collect();
                by_size.sort_unstable_by(|a, b| b.cmp(a));
                let pick = |group: usize| {
                    tuple
                        .iter()
                        .copied()
                        .find(|qubit| groups[*qubit] == group)
                        .expect("merged groups should be represented in the tuple")
                };
                let mut pair = [pick(by_size[0].1), pick(by_size[1].1)];
                pair.sort_unstable();
                let name = |qubit: usize| {
                    program
                        .qubit_name(qubit)
                        .expect("tuple qubits should be declared")
                };
                let suggestion = (
                    emit_at + 1,
                    format!("assert-ent {}, {}", name(pair[0]), name(pair[1])),
                );
                if !suggestions.contains(&suggestion) {
                    suggestions.push(suggestion);
                }
            }
            let new_group = groups[tuple[0]];
            for qubit in 0..groups.len() {
                if merged.contains(&groups[qubit]) {
                    groups[qubit] = new_group;
                }
            }
        }
    }
}

/// The indices an assertion may move across within its scope.
fn scope_members(instructions: &[Instruction], line: usize) -> FxHashSet<usize> {
    if instructions[line].in_function_definition {
        enclosing_definition(instructions, line)
            .map(|definition| definition.child_instructions.iter().copied().collect())
            .unwrap_or_default()
    } else {
        instructions
            .iter()
            .filter(|candidate| {
                !candidate.in_function_definition && !candidate.is_function_definition
            })
            .map(|candidate| candidate.line_number)
            .collect()
    }
}

/// Whether `previous` pins an assertion with the given targets in place:
/// it touches one of the targets, or declares one of their registers.
fn blocks_assertion_movement(previous: &Instruction, targets: &[String]) -> bool {
    if previous.is_variable_declaration() {
        let declared = previous
            .targets
            .first()
            .and_then(|target| split_register(target))
            .map(|(name, _)| name.to_string())
            .unwrap_or_default();
        return targets
            .iter()
            .any(|target| variables_equal(target, &declared));
    }
    targets_overlap(&previous.targets, targets)
}
