// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Turns assertion-extended OpenQASM 2.0 source into a flat array of
//! [`Instruction`]s with call substitutions, lexical scoping, and
//! data-dependency edges.
//!
//! The pipeline is a single pass per scope: hoist `// ASSERT:` comments,
//! strip the remaining comments (offsets preserved), replace top-level
//! braced blocks by `$__blockN$;` placeholders, discover gate names, then
//! emit one instruction per `;`-separated fragment. Gate-definition bodies
//! are preprocessed recursively with the definition's formal parameters
//! shadowing register names.

use crate::parsing::assertions::{self, Assertion};
use crate::parsing::error::Error;
use crate::parsing::utils::{
    is_digits, remove_whitespace, split_at_any, split_register, variables_equal,
};
use rustc_hash::FxHashMap;

/// Code of the synthetic instruction closing every gate-definition body.
pub const RETURN_CODE: &str = "RETURN";

/// A braced body captured during block extraction.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub code: String,
}

/// A user-defined gate signature.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub parameters: Vec<String>,
}

/// One `;`-terminated fragment of the source, the atomic step of
/// execution.
#[derive(Clone, Debug)]
pub struct Instruction {
    /// Index of this instruction in the instruction array.
    pub line_number: usize,
    /// Normalized source text (comments stripped, block body elided).
    pub code: String,
    /// Parsed assertion, for assertion instructions.
    pub assertion: Option<Assertion>,
    /// Referenced qubit expressions, in order.
    pub targets: Vec<String>,
    /// Character offset of the first non-blank character in the raw source.
    pub original_start: usize,
    /// Character offset of the fragment end in the raw source.
    pub original_end: usize,
    /// Index to transition to on a forward step; 0 means "return from the
    /// current call".
    pub successor_index: usize,
    pub is_function_call: bool,
    pub called_function: Option<String>,
    pub in_function_definition: bool,
    pub is_function_definition: bool,
    /// Captured braced body (gate definitions and assertion bodies).
    pub block: Option<Block>,
    /// Indices of body instructions (gate definitions only).
    pub child_instructions: Vec<usize>,
    /// `(defining_instruction, target_position)` pairs giving the most
    /// recent prior write to each target used here.
    pub data_dependencies: Vec<(usize, usize)>,
    /// Formal parameter name → actual argument, for call instructions.
    pub call_substitution: FxHashMap<String, String>,
}

impl Instruction {
    pub fn is_return(&self) -> bool {
        self.code == RETURN_CODE
    }

    pub fn is_measurement(&self) -> bool {
        is_measurement(&self.code)
    }

    pub fn is_classic_controlled(&self) -> bool {
        is_classic_controlled(&self.code)
    }

    pub fn is_variable_declaration(&self) -> bool {
        is_variable_declaration(&self.code)
    }

    pub fn is_barrier(&self) -> bool {
        is_barrier(&self.code)
    }

    pub fn is_reset(&self) -> bool {
        is_reset(&self.code)
    }

    /// Directive lines that execute as no-ops.
    pub fn is_directive(&self) -> bool {
        let trimmed = self.code.trim_start();
        trimmed.starts_with("OPENQASM") || trimmed.starts_with("include")
    }
}

/// The frozen program model produced by [`preprocess`].
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    /// Source with comments replaced by blanks; offsets match the input.
    pub processed_code: String,
    /// Quantum registers in declaration order, fixing qubit indices.
    pub quantum_registers: Vec<(String, usize)>,
    /// Classical registers in declaration order.
    pub classical_registers: Vec<(String, usize)>,
    pub functions: FxHashMap<String, FunctionDefinition>,
}

impl Program {
    /// The total number of qubits across all quantum registers.
    #[must_use]
    pub fn num_qubits(&self) -> usize {
        self.quantum_registers.iter().map(|(_, size)| size).sum()
    }

    /// The global index of `name[index]`, following declaration order.
    #[must_use]
    pub fn qubit_index(&self, name: &str, index: usize) -> Option<usize> {
        let mut offset = 0;
        for (register, size) in &self.quantum_registers {
            if register == name {
                return (index < *size).then_some(offset + index);
            }
            offset += size;
        }
        None
    }

    /// The `name[index]` form of a global qubit index.
    #[must_use]
    pub fn qubit_name(&self, mut qubit: usize) -> Option<String> {
        for (register, size) in &self.quantum_registers {
            if qubit < *size {
                return Some(format!("{register}[{qubit}]"));
            }
            qubit -= size;
        }
        None
    }
}

pub fn is_function_definition(line: &str) -> bool {
    line.trim_start().starts_with("gate ")
}

pub fn is_reset(line: &str) -> bool {
    line.trim_start().starts_with("reset ")
}

pub fn is_barrier(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("barrier ") || trimmed.starts_with("barrier;")
}

pub fn is_classic_controlled(line: &str) -> bool {
    line.trim_start().starts_with("if") && line.contains('(') && line.contains(')')
}

pub fn is_measurement(line: &str) -> bool {
    line.contains("->")
}

pub fn is_variable_declaration(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("creg ") || trimmed.starts_with("qreg ")
}

/// A classic-controlled gate split into its condition and body operations.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassicControlledGate {
    pub condition: String,
    pub operations: Vec<String>,
}

/// Splits `if(cond) { op; op; }` into the condition text and operations.
#[must_use]
pub fn parse_classic_controlled(code: &str) -> ClassicControlledGate {
    let open = code.find('(').map_or(0, |p| p + 1);
    let mut depth = 1usize;
    let mut close = code.len();
    for (position, c) in code[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = open + position;
                    break;
                }
            }
            _ => {}
        }
    }
    let condition = code[open..close].trim().to_string();
    let rest: String = code[close.min(code.len())..]
        .chars()
        .skip(1)
        .filter(|c| *c != '{' && *c != '}')
        .collect();
    let operations = rest
        .split(';')
        .map(str::trim)
        .filter(|op| !op.is_empty())
        .map(|op| format!("{op};"))
        .collect();
    ClassicControlledGate {
        condition,
        operations,
    }
}

/// Parses a gate definition signature into name and formal parameters.
#[must_use]
pub fn parse_function_definition(signature: &str) -> FunctionDefinition {
    let cleaned = signature.replace(['\n', '\t'], " ");
    let mut parts = cleaned.split(' ').filter(|part| !part.is_empty());
    let name = parts
        .find(|part| *part != "gate")
        .unwrap_or_default()
        .to_string();
    let parameter_parts: String = parts.collect();
    let parameters = remove_whitespace(&parameter_parts)
        .split(',')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    FunctionDefinition { name, parameters }
}

/// Extracts the referenced variable expressions from one fragment.
///
/// For measurements only the quantum side is taken; for classic-controlled
/// gates the targets of every body operation are combined.
#[must_use]
pub fn parse_parameters(instruction: &str) -> Vec<String> {
    if is_function_definition(instruction) {
        return parse_function_definition(instruction).parameters;
    }
    if is_measurement(instruction) {
        let quantum_side = instruction.split('-').next().unwrap_or_default();
        return parse_parameters(quantum_side);
    }
    if is_classic_controlled(instruction) {
        let classic = parse_classic_controlled(instruction);
        return classic
            .operations
            .iter()
            .flat_map(|op| parse_parameters(op))
            .collect();
    }

    let cleaned = instruction.replace([';', '\n', '\t'], " ");
    let parts: Vec<&str> = cleaned.split(' ').collect();
    let mut index = 0;
    let mut open_brackets = 0i64;
    for part in &parts {
        index += 1;
        open_brackets += part.matches('(').count() as i64;
        open_brackets -= part.matches(')').count() as i64;
        if !part.is_empty() && open_brackets == 0 {
            break;
        }
    }
    let parameter_parts: String = parts[index.min(parts.len())..].concat();
    remove_whitespace(&parameter_parts)
        .split(',')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Preprocesses a full program.
pub fn preprocess(source: &str) -> Result<Program, Error> {
    let hoisted = hoist_assertion_comments(source);
    let processed_code = remove_comments(&hoisted);
    let mut context = Context {
        source,
        defined_registers: FxHashMap::default(),
        quantum_registers: Vec::new(),
        classical_registers: Vec::new(),
        functions: FxHashMap::default(),
        function_first_line: FxHashMap::default(),
    };
    let instructions = preprocess_scope(&mut context, &hoisted, 0, 0, &[], &[])?;
    Ok(Program {
        instructions,
        processed_code,
        quantum_registers: context.quantum_registers,
        classical_registers: context.classical_registers,
        functions: context.functions,
    })
}

struct Context<'a> {
    /// The raw top-level source, used for error locations and spans.
    source: &'a str,
    defined_registers: FxHashMap<String, usize>,
    quantum_registers: Vec<(String, usize)>,
    classical_registers: Vec<(String, usize)>,
    functions: FxHashMap<String, FunctionDefinition>,
    function_first_line: FxHashMap<String, usize>,
}

/// Replaces `// ASSERT:` markers with blanks so the assertion text on the
/// rest of the line becomes a live statement. Offsets are preserved.
fn hoist_assertion_comments(code: &str) -> String {
    code.replace("// ASSERT:", "          ")
}

/// Replaces `//` comments with blanks of the same length.
fn remove_comments(code: &str) -> String {
    let mut result = code.as_bytes().to_vec();
    let mut position = 0;
    while let Some(found) = code[position..].find("//") {
        let start = position + found;
        let end = code[start..]
            .find('\n')
            .map_or(code.len(), |p| start + p);
        result[start..end].fill(b' ');
        position = end;
    }
    String::from_utf8(result).expect("blanking comments should preserve utf-8")
}

/// Replaces each top-level `{...}` by a `$__blockN$;` placeholder and
/// collects the bodies.
fn sweep_blocks(code: &str, blocks: &mut Vec<String>) -> String {
    let mut result = String::with_capacity(code.len());
    let mut depth = 0usize;
    let mut start = 0;
    for (position, c) in code.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = position;
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        result.push_str(&format!("$__block{}$;", blocks.len()));
                        blocks.push(code[start + 1..position].to_string());
                    }
                }
            }
            _ => {
                if depth == 0 {
                    result.push(c);
                }
            }
        }
    }
    result
}

/// Collects the names of all gate definitions in a scope.
fn sweep_function_names(code: &str) -> Vec<String> {
    split_at_any(code, &[';', '}'])
        .into_iter()
        .filter(|fragment| is_function_definition(fragment))
        .map(|fragment| parse_function_definition(fragment).name)
        .collect()
}

fn invalid_target_error(
    source: &str,
    instruction_start: usize,
    target: &str,
    context: &str,
) -> Error {
    Error::at_offset(
        source,
        instruction_start,
        format!("Invalid target qubit {target}{context}."),
        Some(target),
    )
}

/// Validates target references against declared registers and indices.
///
/// Targets naming a formal parameter of the enclosing gate definition are
/// opaque here; their validation is deferred to the call site. In
/// assertion context bare names must resolve, since register targets were
/// already unfolded.
fn validate_targets(
    context: &Context,
    instruction_start: usize,
    targets: &[String],
    shadowed_registers: &[String],
    detail_context: &str,
    is_assertion_context: bool,
) -> Result<(), Error> {
    for target in targets {
        if target.is_empty() {
            return Err(Error::at_offset(
                context.source,
                instruction_start,
                format!("Empty target{detail_context}."),
                None,
            ));
        }
        let Some((name, index)) = split_register(target) else {
            return Err(invalid_target_error(
                context.source,
                instruction_start,
                target,
                detail_context,
            ));
        };
        if shadowed_registers.iter().any(|s| s == name) {
            continue;
        }
        match index {
            None => {
                if is_assertion_context && !context.defined_registers.contains_key(name) {
                    return Err(invalid_target_error(
                        context.source,
                        instruction_start,
                        target,
                        detail_context,
                    ));
                }
            }
            Some(index) => {
                let known = context
                    .defined_registers
                    .get(name)
                    .is_some_and(|size| index < *size);
                if !known {
                    return Err(invalid_target_error(
                        context.source,
                        instruction_start,
                        target,
                        detail_context,
                    ));
                }
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_lines)]
fn preprocess_scope(
    context: &mut Context,
    code: &str,
    start_index: usize,
    code_offset: usize,
    inherited_functions: &[String],
    shadowed_registers: &[String],
) -> Result<Vec<Instruction>, Error> {
    let processed = remove_comments(code);
    let mut blocks = Vec::new();
    let blocks_removed = sweep_blocks(&processed, &mut blocks);
    let mut function_names = sweep_function_names(&processed);
    function_names.extend(inherited_functions.iter().cloned());

    let mut instructions: Vec<Instruction> = Vec::new();
    // Indices of instructions emitted directly in this scope (not merged
    // from gate bodies); the dependency and linking passes walk these.
    let mut scope_indices: Vec<usize> = Vec::new();

    let mut position = 0;
    let mut next_index = start_index;
    // Maps positions in the block-elided text back to the raw source.
    let mut blocks_offset = code_offset as i64;

    while let Some(found) = blocks_removed[position..].find(';') {
        let end = position + found;
        let mut line = blocks_removed[position..=end].to_string();

        let leading = blocks_removed[position..end]
            .find(|c: char| !matches!(c, ' ' | '\t' | '\r' | '\n'))
            .map_or(position, |p| position + p);
        let true_start = usize::try_from(leading as i64 + blocks_offset)
            .expect("source offsets should be non-negative");

        let mut block: Option<Block> = None;
        if let Some(block_position) = line.find("$__block") {
            let close = line[block_position + 1..]
                .find('$')
                .map(|p| block_position + 1 + p)
                .expect("block placeholder should be closed");
            let number: usize = line[block_position + 8..close]
                .parse()
                .expect("block placeholder should carry its index");
            let content = blocks[number].clone();
            // The raw code is longer than the placeholder by the body plus
            // its two braces.
            blocks_offset += content.len() as i64 + 2 - (close + 2 - block_position) as i64;
            line.replace_range(block_position..=close + 1, "");
            block = Some(Block { code: content });
        }
        let true_end = usize::try_from(end as i64 + blocks_offset)
            .expect("source offsets should be non-negative");

        if block.is_some() && is_classic_controlled(&line) {
            let body = block.take().expect("block was checked above");
            line = format!("{} {{ {} }}", line.trim_end(), body.code.trim());
        }

        if line.trim().is_empty() && block.is_none() {
            position = end + 1;
            continue;
        }

        let targets = parse_parameters(&line);

        if is_variable_declaration(&line) {
            let trimmed = line.trim();
            let declaration =
                remove_whitespace(&trimmed.replace("creg", "").replace("qreg", "").replace(';', ""));
            let parts = split_at_any(&declaration, &['[', ']']);
            let name = parts.first().copied().unwrap_or_default();
            let size_text = parts.get(1).copied().unwrap_or_default();
            if name.is_empty() || !is_digits(size_text) {
                return Err(Error::at_offset(
                    context.source,
                    true_start,
                    format!("Invalid register declaration {trimmed}."),
                    None,
                ));
            }
            let size: usize = size_text.parse().map_err(|_| {
                Error::at_offset(
                    context.source,
                    true_start,
                    format!("Invalid register declaration {trimmed}."),
                    None,
                )
            })?;
            context
                .defined_registers
                .insert(name.to_string(), size);
            if trimmed.starts_with("qreg") {
                context.quantum_registers.push((name.to_string(), size));
            } else {
                context.classical_registers.push((name.to_string(), size));
            }
        }

        if is_function_definition(&line) {
            let Some(body) = block else {
                return Err(Error::at_offset(
                    context.source,
                    true_start,
                    "Gate definitions require a body block.".to_string(),
                    None,
                ));
            };
            let function = parse_function_definition(&line);
            context
                .functions
                .insert(function.name.clone(), function.clone());

            let definition_index = next_index;
            next_index += 1;
            // The body's offset in the raw source is just past the opening
            // brace; positions inside the body text are 1:1 with it.
            let relative_start = true_start.saturating_sub(code_offset);
            let body_offset = code_offset
                + processed[relative_start..]
                    .find('{')
                    .map_or(relative_start, |p| relative_start + p)
                + 1;
            let mut body_instructions = preprocess_scope(
                context,
                &body.code,
                next_index,
                body_offset,
                &function_names,
                &function.parameters,
            )?;
            if body_instructions.is_empty() {
                return Err(Error::at_offset(
                    context.source,
                    true_start,
                    "Gate definitions require a non-empty body.".to_string(),
                    None,
                ));
            }
            for instruction in &mut body_instructions {
                instruction.in_function_definition = true;
            }
            context
                .function_first_line
                .insert(function.name.clone(), body_instructions[0].line_number);
            next_index += body_instructions.len();

            let return_index = next_index;
            instructions.push(Instruction {
                line_number: definition_index,
                code: line.trim().to_string(),
                assertion: None,
                targets: function.parameters.clone(),
                original_start: true_start,
                original_end: true_end,
                successor_index: return_index + 1,
                is_function_call: false,
                called_function: None,
                in_function_definition: false,
                is_function_definition: true,
                block: Some(body),
                child_instructions: body_instructions
                    .iter()
                    .map(|instruction| instruction.line_number)
                    .collect(),
                data_dependencies: Vec::new(),
                call_substitution: FxHashMap::default(),
            });
            let last_body_end = body_instructions
                .last()
                .map_or(true_end, |instruction| instruction.original_end);
            instructions.extend(body_instructions);

            let closing_relative = last_body_end.saturating_sub(code_offset);
            let closing_brace = code_offset
                + processed[closing_relative.min(processed.len())..]
                    .find('}')
                    .map_or(closing_relative, |p| closing_relative + p);
            instructions.push(Instruction {
                line_number: return_index,
                code: RETURN_CODE.to_string(),
                assertion: None,
                targets: function.parameters,
                original_start: closing_brace,
                original_end: closing_brace,
                successor_index: 0,
                is_function_call: false,
                called_function: None,
                in_function_definition: true,
                is_function_definition: false,
                block: None,
                child_instructions: Vec::new(),
                data_dependencies: Vec::new(),
                call_substitution: FxHashMap::default(),
            });
            next_index += 1;
            position = end + 1;
            continue;
        }

        let first_token = line.split_whitespace().next().unwrap_or_default();
        let called_function = function_names
            .iter()
            .find(|name| *name == first_token)
            .cloned();

        let instruction_index = next_index;
        if assertions::is_assertion(&line) {
            let mut assertion =
                assertions::parse_assertion(&line, block.as_ref().map(|b| b.code.as_str()))
                    .map_err(|detail| {
                        Error::at_offset(context.source, true_start, detail, None)
                    })?;
            assertion
                .unfold_register_targets(&context.defined_registers, shadowed_registers);
            assertion
                .validate()
                .map_err(|detail| Error::at_offset(context.source, true_start, detail, None))?;
            validate_targets(
                context,
                true_start,
                &assertion.targets,
                shadowed_registers,
                " in assertion",
                true,
            )?;
            instructions.push(Instruction {
                line_number: instruction_index,
                code: line.trim().to_string(),
                targets: assertion.targets.clone(),
                assertion: Some(assertion),
                original_start: true_start,
                original_end: true_end,
                successor_index: instruction_index + 1,
                is_function_call: false,
                called_function: None,
                in_function_definition: false,
                is_function_definition: false,
                block,
                child_instructions: Vec::new(),
                data_dependencies: Vec::new(),
                call_substitution: FxHashMap::default(),
            });
        } else {
            if !is_variable_declaration(&line) {
                validate_targets(
                    context,
                    true_start,
                    &targets,
                    shadowed_registers,
                    "",
                    false,
                )?;
            }
            instructions.push(Instruction {
                line_number: instruction_index,
                code: line.trim().to_string(),
                assertion: None,
                targets,
                original_start: true_start,
                original_end: true_end,
                successor_index: instruction_index + 1,
                is_function_call: called_function.is_some(),
                called_function,
                in_function_definition: false,
                is_function_definition: false,
                block,
                child_instructions: Vec::new(),
                data_dependencies: Vec::new(),
                call_substitution: FxHashMap::default(),
            });
        }
        scope_indices.push(instructions.len() - 1);
        next_index += 1;
        position = end + 1;
    }

    resolve_data_dependencies(&mut instructions, &scope_indices);
    link_function_calls(context, &mut instructions, &scope_indices)?;

    Ok(instructions)
}

/// For every instruction in this scope, records the most recent prior
/// write to each of its targets.
fn resolve_data_dependencies(instructions: &mut [Instruction], scope_indices: &[usize]) {
    for (order, &slot) in scope_indices.iter().enumerate() {
        let mut wanted = instructions[slot].targets.clone();
        let mut found = Vec::new();
        for &previous_slot in scope_indices[..order].iter().rev() {
            if wanted.is_empty() {
                break;
            }
            let previous = &instructions[previous_slot];
            // Assertions read their targets but never write them.
            if previous.assertion.is_some() {
                continue;
            }
            for (target_position, target) in previous.targets.iter().enumerate() {
                if let Some(match_position) =
                    wanted.iter().position(|w| variables_equal(w, target))
                {
                    wanted.remove(match_position);
                    found.push((previous.line_number, target_position));
                }
            }
        }
        instructions[slot].data_dependencies = found;
    }
}

/// Points every call instruction at its callee's first body instruction,
/// checks arity, and materializes the parameter substitution.
fn link_function_calls(
    context: &Context,
    instructions: &mut [Instruction],
    scope_indices: &[usize],
) -> Result<(), Error> {
    for &slot in scope_indices {
        if !instructions[slot].is_function_call {
            continue;
        }
        let instruction = &instructions[slot];
        let name = instruction
            .called_function
            .clone()
            .expect("call instructions should carry the callee name");
        let Some(&first_line) = context.function_first_line.get(&name) else {
            return Err(Error::at_offset(
                context.source,
                instruction.original_start,
                format!("Call to undefined custom gate {name}."),
                Some(&name),
            ));
        };
        let function = &context.functions[&name];
        let arguments = instruction.targets.clone();
        if function.parameters.len() != arguments.len() {
            return Err(Error::at_offset(
                context.source,
                instruction.original_start,
                "Custom gate call uses incorrect number of arguments.".to_string(),
                None,
            ));
        }
        let instruction = &mut instructions[slot];
        instruction.successor_index = first_line;
        instruction.call_substitution = function
            .parameters
            .iter()
            .cloned()
            .zip(arguments)
            .collect();
    }
    Ok(())
}

#[cfg(test)]
mod tests;
