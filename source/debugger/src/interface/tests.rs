use super::{CompilationSettings, Debugger, LoadResult};
use crate::error::ErrorKind;
use crate::simulation;
use num_complex::Complex64;
use statevector_simulator::{EPSILON, approx_eq};
use std::f64::consts::FRAC_1_SQRT_2;

fn loaded(source: &str) -> Debugger {
    let mut debugger = Debugger::with_seed(11);
    debugger.load_code(source).expect("program should load");
    debugger
}

#[test]
fn operations_require_a_loaded_program() {
    let mut debugger = Debugger::new();
    assert!(!debugger.can_step_forward());
    assert!(!debugger.can_step_backward());
    assert!(!debugger.is_finished());
    assert!(debugger.execution_state().is_none());
    let error = debugger.step_forward().expect_err("step should fail");
    assert_eq!(
        error.0,
        ErrorKind::Simulation(simulation::Error::InvalidOperation)
    );
    assert!(debugger.get_num_qubits().is_err());
    assert!(debugger.compile(&CompilationSettings::default()).is_err());
}

#[test]
fn load_and_run_bell_program() {
    let mut debugger = loaded(
        "OPENQASM 2.0; include \"qelib1.inc\"; \
         qreg q[2]; h q[0]; cx q[0],q[1]; assert-sup q[0], q[1];",
    );
    assert_eq!(debugger.get_instruction_count().expect("count"), 6);
    assert_eq!(debugger.get_num_qubits().expect("qubits"), 2);
    debugger.run_simulation().expect("run should succeed");
    assert!(debugger.is_finished());
    assert!(!debugger.did_assertion_fail());
    let half = Complex64::new(FRAC_1_SQRT_2, 0.0);
    assert!(approx_eq(
        debugger.get_amplitude_bitstring("00").expect("amplitude"),
        half,
        EPSILON
    ));
    assert!(approx_eq(
        debugger.get_amplitude_bitstring("11").expect("amplitude"),
        half,
        EPSILON
    ));
}

#[test]
fn load_code_with_result_reports_location() {
    let mut debugger = Debugger::new();
    let result = debugger.load_code_with_result("qreg q[2];\ncx q[0],q[5];");
    assert_eq!(
        result,
        LoadResult {
            ok: false,
            error_line: 2,
            error_column: 9,
            detail: "Invalid target qubit q[5].".to_string(),
        }
    );
    // A failed load leaves the session unloaded.
    assert!(debugger.get_num_qubits().is_err());

    let result = debugger.load_code_with_result("qreg q[1]; h q[0];");
    assert!(result.ok);
    assert_eq!(debugger.get_num_qubits().expect("qubits"), 1);
}

#[test]
fn parse_error_display_format() {
    let mut debugger = Debugger::new();
    let error = debugger
        .load_code("qreg q[2];\ncx q[0],q[5];")
        .expect_err("load should fail");
    assert_eq!(
        error.to_string(),
        "<input>:2:9: Invalid target qubit q[5]."
    );
}

#[test]
fn reset_simulation_rewinds_session() {
    let mut debugger = loaded("qreg q[1]; x q[0];");
    debugger.run_simulation().expect("run should succeed");
    assert!(debugger.is_finished());
    debugger.reset_simulation().expect("reset should succeed");
    assert_eq!(debugger.get_current_instruction().expect("pc"), 0);
    assert!(approx_eq(
        debugger.get_amplitude_bitstring("0").expect("amplitude"),
        Complex64::new(1.0, 0.0),
        EPSILON
    ));
}

#[test]
fn pause_handle_pauses_run() {
    let mut debugger = loaded("qreg q[1]; x q[0]; x q[0];");
    let handle = debugger.pause_handle();
    handle.request_pause();
    debugger.run_simulation().expect("run should succeed");
    assert_eq!(
        debugger.execution_state(),
        Some(simulation::ExecutionState::Paused)
    );
    debugger.run_simulation().expect("run should succeed");
    assert!(debugger.is_finished());
}

#[test]
fn breakpoints_resolve_source_offsets() {
    let source = "qreg q[2]; h q[0]; cx q[0],q[1];";
    let mut debugger = loaded(source);
    let index = debugger
        .set_breakpoint(source.find("cx").expect("cx should be present"))
        .expect("breakpoint should resolve");
    assert_eq!(index, 2);
    assert_eq!(
        debugger.get_instruction_position(2).expect("span"),
        (19, 31)
    );
    debugger.run_simulation().expect("run should succeed");
    assert!(debugger.was_breakpoint_hit());
    assert_eq!(debugger.get_current_instruction().expect("pc"), 2);
    debugger.clear_breakpoints().expect("clear should succeed");
    debugger.run_simulation().expect("run should succeed");
    assert!(debugger.is_finished());
}

#[test]
fn diagnostics_sub_object_reports_causes() {
    let mut debugger = loaded("qreg q[2]; h q[0]; assert-ent q[0], q[1];");
    debugger.run_simulation().expect("run should succeed");
    assert!(debugger.did_assertion_fail());
    let diagnostics = debugger.diagnostics().expect("diagnostics should resolve");
    let causes = diagnostics.potential_error_causes();
    assert_eq!(causes.len(), 1);
    assert_eq!(
        causes[0].kind,
        simulation::ErrorCauseKind::MissingInteraction
    );
}

#[test]
fn compile_through_the_facade() {
    let debugger = loaded("qreg q[1]; h q[0]; assert-sup q[0];");
    let compiled = debugger
        .compile(&CompilationSettings::default())
        .expect("compile should succeed");
    assert_eq!(compiled, "qreg q[1];\nh q[0];\n");
}

#[test]
fn run_all_reports_failure_count() {
    let mut debugger = loaded("qreg q[2]; assert-sup q[0]; h q[0]; assert-ent q[0], q[1];");
    assert_eq!(debugger.run_all().expect("run should succeed"), 2);
    assert!(debugger.is_finished());
}

#[test]
fn stack_queries_reflect_live_state() {
    let mut debugger = loaded("gate bell a,b { h a; cx a,b; } qreg q[2]; bell q[0],q[1];");
    debugger.step_forward().expect("step");
    debugger.step_forward().expect("step");
    debugger.step_forward().expect("step");
    assert_eq!(debugger.get_stack_depth().expect("depth"), 1);
    assert_eq!(debugger.get_stack_trace(4).expect("trace"), vec![5]);
}

#[test]
fn classical_variable_queries() {
    let mut debugger = loaded("qreg q[1]; creg c[2]; x q[0]; measure q[0] -> c[0];");
    debugger.run_simulation().expect("run should succeed");
    assert_eq!(debugger.get_num_classical_variables().expect("count"), 2);
    assert_eq!(
        debugger.get_classical_variable_name(0).expect("name"),
        "c[0]"
    );
    assert_eq!(
        debugger.get_classical_variable("c[0]").expect("value"),
        simulation::ClassicalValue::Bool(true)
    );
    assert_eq!(
        debugger.get_quantum_variable_name(0).expect("name"),
        "q"
    );
}
