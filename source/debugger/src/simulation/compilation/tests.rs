use super::{CompilationSettings, compile};
use crate::parsing::preprocess;
use crate::simulation::Simulation;
use expect_test::{Expect, expect};
use statevector_simulator::{EPSILON, approx_eq};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn check(source: &str, settings: &CompilationSettings, expect: &Expect) {
    let program = preprocess(source).expect("program should parse");
    expect.assert_eq(&compile(&program, settings));
}

#[test]
fn assertions_are_removed() {
    check(
        "qreg q[2]; h q[0]; cx q[0],q[1]; assert-ent q[0], q[1];",
        &CompilationSettings::default(),
        &expect![[r#"
            qreg q[2];
            h q[0];
            cx q[0],q[1];
        "#]],
    );
}

#[test]
fn slice_index_cuts_at_the_selected_assertion() {
    let source = "qreg q[1]; h q[0]; assert-sup q[0]; x q[0]; assert-sup q[0];";
    check(
        source,
        &CompilationSettings {
            opt: 0,
            slice_index: Some(0),
        },
        &expect![[r#"
            qreg q[1];
            h q[0];
        "#]],
    );
    check(
        source,
        &CompilationSettings {
            opt: 0,
            slice_index: Some(1),
        },
        &expect![[r#"
            qreg q[1];
            h q[0];
            x q[0];
        "#]],
    );
}

#[test]
fn definitions_are_reemitted_without_assertions() {
    check(
        "gate prep a { h a; assert-sup a; } qreg q[1]; prep q[0];",
        &CompilationSettings::default(),
        &expect![[r#"
            gate prep a { h a; }
            qreg q[1];
            prep q[0];
        "#]],
    );
}

#[test]
fn opt_level_one_drops_barriers_and_coalesces_disjoint_singles() {
    check(
        "qreg q[2]; h q[0]; x q[1]; barrier q; h q[0];",
        &CompilationSettings {
            opt: 1,
            slice_index: None,
        },
        &expect![[r#"
            qreg q[2];
            h q[0]; x q[1];
            h q[0];
        "#]],
    );
}

#[test]
fn compiled_output_is_semantically_equivalent() {
    let source = "qreg q[2]; h q[0]; cx q[0],q[1]; assert-sup q[0], q[1]; s q[1];";
    let program = preprocess(source).expect("program should parse");
    let compiled = compile(&program, &CompilationSettings::default());
    let recompiled = preprocess(&compiled).expect("compiled output should parse");

    let pause = Arc::new(AtomicBool::new(false));
    let mut original = Simulation::new(program, Some(3), pause.clone());
    let mut roundtrip = Simulation::new(recompiled, Some(3), pause);
    original.run().expect("run should succeed");
    roundtrip.run().expect("run should succeed");
    assert!(original.is_finished());
    assert!(roundtrip.is_finished());
    for (a, b) in original
        .state_vector_full()
        .iter()
        .zip(&roundtrip.state_vector_full())
    {
        assert!(approx_eq(*a, *b, EPSILON));
    }
}
