use super::{Program, parse_classic_controlled, parse_parameters, preprocess};
use expect_test::{Expect, expect};
use indoc::indoc;
use std::fmt::Write;

fn format_program(program: &Program) -> String {
    let mut out = String::new();
    for instruction in &program.instructions {
        write!(
            out,
            "{}: `{}` succ={}",
            instruction.line_number,
            instruction.code.replace('\n', " "),
            instruction.successor_index
        )
        .expect("writing to string should succeed");
        if !instruction.targets.is_empty() {
            write!(out, " targets=[{}]", instruction.targets.join(", "))
                .expect("writing to string should succeed");
        }
        if !instruction.data_dependencies.is_empty() {
            let deps: Vec<String> = instruction
                .data_dependencies
                .iter()
                .map(|(line, position)| format!("{line}.{position}"))
                .collect();
            write!(out, " deps=[{}]", deps.join(", "))
                .expect("writing to string should succeed");
        }
        if !instruction.child_instructions.is_empty() {
            let children: Vec<String> = instruction
                .child_instructions
                .iter()
                .map(ToString::to_string)
                .collect();
            write!(out, " children=[{}]", children.join(", "))
                .expect("writing to string should succeed");
        }
        if instruction.is_function_call {
            let mut substitutions: Vec<String> = instruction
                .call_substitution
                .iter()
                .map(|(parameter, argument)| format!("{parameter}->{argument}"))
                .collect();
            substitutions.sort();
            write!(
                out,
                " call({}) subst={{{}}}",
                instruction.called_function.as_deref().unwrap_or_default(),
                substitutions.join(", ")
            )
            .expect("writing to string should succeed");
        }
        if instruction.is_function_definition {
            out.push_str(" def");
        }
        if instruction.in_function_definition {
            out.push_str(" body");
        }
        if instruction.assertion.is_some() {
            out.push_str(" assertion");
        }
        out.push('\n');
    }
    out
}

fn check(source: &str, expect: &Expect) {
    match preprocess(source) {
        Ok(program) => expect.assert_eq(&format_program(&program)),
        Err(error) => expect.assert_eq(&format!("error: {error}")),
    }
}

#[test]
fn bell_program() {
    check(
        indoc! {r#"
            OPENQASM 2.0;
            include "qelib1.inc";
            qreg q[2];
            h q[0];
            cx q[0],q[1];
        "#},
        &expect![[r#"
            0: `OPENQASM 2.0;` succ=1 targets=[2.0]
            1: `include "qelib1.inc";` succ=2 targets=["qelib1.inc"]
            2: `qreg q[2];` succ=3 targets=[q[2]]
            3: `h q[0];` succ=4 targets=[q[0]]
            4: `cx q[0],q[1];` succ=5 targets=[q[0], q[1]] deps=[3.0]
        "#]],
    );
}

#[test]
fn whole_register_gate_matches_indexed_dependency() {
    check(
        "qreg q[2]; x q; h q[1]; cx q[0],q[1];",
        &expect![[r#"
            0: `qreg q[2];` succ=1 targets=[q[2]]
            1: `x q;` succ=2 targets=[q]
            2: `h q[1];` succ=3 targets=[q[1]] deps=[1.0]
            3: `cx q[0],q[1];` succ=4 targets=[q[0], q[1]] deps=[2.0, 1.0]
        "#]],
    );
}

#[test]
fn gate_definition_and_call() {
    check(
        indoc! {"
            gate bell a,b { h a; cx a,b; }
            qreg q[2];
            bell q[0],q[1];
        "},
        &expect![[r#"
            0: `gate bell a,b` succ=4 targets=[a, b] children=[1, 2] def
            1: `h a;` succ=2 targets=[a] body
            2: `cx a,b;` succ=3 targets=[a, b] deps=[1.0] body
            3: `RETURN` succ=0 targets=[a, b] body
            4: `qreg q[2];` succ=5 targets=[q[2]]
            5: `bell q[0],q[1];` succ=1 targets=[q[0], q[1]] call(bell) subst={a->q[0], b->q[1]}
        "#]],
    );
}

#[test]
fn assertion_register_targets_unfold() {
    check(
        "qreg q[2]; h q[0]; assert-sup q;",
        &expect![[r#"
            0: `qreg q[2];` succ=1 targets=[q[2]]
            1: `h q[0];` succ=2 targets=[q[0]]
            2: `assert-sup q;` succ=3 targets=[q[0], q[1]] deps=[1.0] assertion
        "#]],
    );
}

#[test]
fn assertion_comment_form_is_hoisted() {
    check(
        indoc! {"
            qreg q[1];
            h q[0];
            // ASSERT: assert-sup q[0];
        "},
        &expect![[r#"
            0: `qreg q[1];` succ=1 targets=[q[1]]
            1: `h q[0];` succ=2 targets=[q[0]]
            2: `assert-sup q[0];` succ=3 targets=[q[0]] deps=[1.0] assertion
        "#]],
    );
}

#[test]
fn plain_comments_are_stripped() {
    check(
        indoc! {"
            qreg q[1]; // one qubit
            // a full-line comment with a ; in it
            h q[0];
        "},
        &expect![[r#"
            0: `qreg q[1];` succ=1 targets=[q[1]]
            1: `h q[0];` succ=2 targets=[q[0]]
        "#]],
    );
}

#[test]
fn classic_controlled_block_is_inlined() {
    check(
        "qreg q[1]; creg c[1]; measure q[0] -> c[0]; if(c==1) { x q[0]; }",
        &expect![[r#"
            0: `qreg q[1];` succ=1 targets=[q[1]]
            1: `creg c[1];` succ=2 targets=[c[1]]
            2: `measure q[0] -> c[0];` succ=3 targets=[q[0]]
            3: `if(c==1) { x q[0]; }` succ=4 targets=[q[0]] deps=[2.0]
        "#]],
    );
}

#[test]
fn measurement_takes_only_quantum_targets() {
    assert_eq!(
        parse_parameters("measure q[0] -> c[0];"),
        vec!["q[0]".to_string()]
    );
}

#[test]
fn classic_controlled_parsing() {
    let gate = parse_classic_controlled("if(c==1) { x q[0]; h q[1]; }");
    assert_eq!(gate.condition, "c==1");
    assert_eq!(
        gate.operations,
        vec!["x q[0];".to_string(), "h q[1];".to_string()]
    );
}

#[test]
fn invalid_register_declaration() {
    check(
        "qreg q[];",
        &expect!["error: <input>:1:1: Invalid register declaration qreg q[];."],
    );
}

#[test]
fn target_index_out_of_range() {
    check(
        "qreg q[2];\ncx q[0],q[5];",
        &expect!["error: <input>:2:9: Invalid target qubit q[5]."],
    );
}

#[test]
fn assertion_target_out_of_range() {
    check(
        "qreg q[2];\nassert-sup q[3];",
        &expect!["error: <input>:2:12: Invalid target qubit q[3] in assertion."],
    );
}

#[test]
fn call_arity_mismatch() {
    check(
        "gate bell a,b { h a; cx a,b; } qreg q[2]; bell q[0];",
        &expect!["error: <input>:1:43: Custom gate call uses incorrect number of arguments."],
    );
}

#[test]
fn call_to_undefined_gate_with_matching_name_sweep() {
    // The name sweep only sees definitions, so a stray identifier is a
    // plain (unknown) gate, not a call; it parses but has no callee.
    check(
        "qreg q[1]; bogus q[0];",
        &expect![[r#"
            0: `qreg q[1];` succ=1 targets=[q[1]]
            1: `bogus q[0];` succ=2 targets=[q[0]]
        "#]],
    );
}

#[test]
fn spans_cover_original_offsets() {
    let program = preprocess("qreg q[2]; h q[0]; cx q[0],q[1];").expect("program should parse");
    let spans: Vec<(usize, usize)> = program
        .instructions
        .iter()
        .map(|instruction| (instruction.original_start, instruction.original_end))
        .collect();
    assert_eq!(spans, vec![(0, 9), (11, 17), (19, 31)]);
}

#[test]
fn definition_spans_cover_the_braced_body() {
    let source = "gate bell a,b { h a; cx a,b; }\nqreg q[2];\nbell q[0],q[1];";
    let program = preprocess(source).expect("program should parse");
    let definition = &program.instructions[0];
    assert_eq!(definition.original_start, 0);
    assert_eq!(&source[definition.original_end..=definition.original_end], "}");
    let body_h = &program.instructions[1];
    assert_eq!(&source[body_h.original_start..=body_h.original_start], "h");
    let ret = &program.instructions[3];
    assert_eq!(&source[ret.original_start..=ret.original_start], "}");
    let call = &program.instructions[5];
    assert_eq!(&source[call.original_start..call.original_end], "bell q[0],q[1]");
}

#[test]
fn register_tables_preserve_declaration_order() {
    let program =
        preprocess("qreg a[1]; creg c[2]; qreg b[3];").expect("program should parse");
    assert_eq!(
        program.quantum_registers,
        vec![("a".to_string(), 1), ("b".to_string(), 3)]
    );
    assert_eq!(program.classical_registers, vec![("c".to_string(), 2)]);
    assert_eq!(program.num_qubits(), 4);
    assert_eq!(program.qubit_index("b", 2), Some(3));
    assert_eq!(program.qubit_index("b", 3), None);
    assert_eq!(program.qubit_name(0), Some("a[0]".to_string()));
    assert_eq!(program.qubit_name(3), Some("b[2]".to_string()));
}
