use super::{DensityMatrix, EPSILON, Error, StateVector, approx_eq, gates, trace_distance};
use num_complex::Complex64;
use rand::{SeedableRng, rngs::StdRng};
use std::f64::consts::FRAC_1_SQRT_2;

fn resolve(name: &str) -> gates::ResolvedGate {
    gates::resolve(name, &[]).expect("gate should resolve")
}

fn assert_amplitude(state: &StateVector, index: usize, expected: Complex64) {
    let actual = state.amplitude(index).expect("index should be valid");
    assert!(
        approx_eq(actual, expected, EPSILON),
        "amplitude {index}: expected {expected}, got {actual}"
    );
}

#[test]
fn initial_state_is_all_zeros() {
    let state = StateVector::new(3);
    assert_amplitude(&state, 0, Complex64::new(1.0, 0.0));
    for index in 1..8 {
        assert_amplitude(&state, index, Complex64::new(0.0, 0.0));
    }
    assert!(state.is_normalized());
}

#[test]
fn hadamard_creates_equal_superposition() {
    let mut state = StateVector::new(1);
    state.apply_unitary(&resolve("h").matrix, &[0]);
    assert_amplitude(&state, 0, Complex64::new(FRAC_1_SQRT_2, 0.0));
    assert_amplitude(&state, 1, Complex64::new(FRAC_1_SQRT_2, 0.0));
}

#[test]
fn bell_state_amplitudes() {
    let mut state = StateVector::new(2);
    state.apply_unitary(&resolve("h").matrix, &[0]);
    state.apply_controlled(&resolve("cx").matrix, &[0], &[1]);
    assert_amplitude(&state, 0b00, Complex64::new(FRAC_1_SQRT_2, 0.0));
    assert_amplitude(&state, 0b01, Complex64::new(0.0, 0.0));
    assert_amplitude(&state, 0b10, Complex64::new(0.0, 0.0));
    assert_amplitude(&state, 0b11, Complex64::new(FRAC_1_SQRT_2, 0.0));
    assert!(state.is_normalized());
}

#[test]
fn controlled_gate_with_zero_control_is_identity() {
    let mut state = StateVector::new(2);
    state.apply_controlled(&resolve("cx").matrix, &[0], &[1]);
    assert_amplitude(&state, 0, Complex64::new(1.0, 0.0));
}

#[test]
fn inverse_undoes_gate_sequence() {
    let mut state = StateVector::new(2);
    let h = resolve("h").matrix;
    let s = resolve("s").matrix;
    state.apply_unitary(&h, &[0]);
    state.apply_unitary(&s, &[0]);
    state.apply_controlled(&resolve("cx").matrix, &[0], &[1]);
    state.apply_controlled_inverse(&resolve("cx").matrix, &[0], &[1]);
    state.apply_inverse(&s, &[0]);
    state.apply_inverse(&h, &[0]);
    assert_amplitude(&state, 0, Complex64::new(1.0, 0.0));
    for index in 1..4 {
        assert_amplitude(&state, index, Complex64::new(0.0, 0.0));
    }
}

#[test]
fn measurement_collapses_and_restores() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut state = StateVector::new(1);
    state.apply_unitary(&resolve("h").matrix, &[0]);
    let before = state.amplitudes().to_vec();
    let (outcome, handle) = state.measure(0, &mut rng);
    let collapsed = usize::from(outcome);
    assert_amplitude(&state, collapsed, Complex64::new(1.0, 0.0));
    assert_amplitude(&state, 1 - collapsed, Complex64::new(0.0, 0.0));
    state.restore(&handle);
    for (index, expected) in before.iter().enumerate() {
        assert_amplitude(&state, index, *expected);
    }
}

#[test]
fn prob_one_of_plus_state_is_half() {
    let mut state = StateVector::new(2);
    state.apply_unitary(&resolve("h").matrix, &[0]);
    assert!((state.prob_one(0) - 0.5).abs() <= EPSILON);
    assert!(state.prob_one(1).abs() <= EPSILON);
}

#[test]
fn partial_trace_of_bell_state_is_maximally_mixed() {
    let mut state = StateVector::new(2);
    state.apply_unitary(&resolve("h").matrix, &[0]);
    state.apply_controlled(&resolve("cx").matrix, &[0], &[1]);
    let rho = state.partial_trace(&[0]);
    assert!((rho.probability(0) - 0.5).abs() <= EPSILON);
    assert!((rho.probability(1) - 0.5).abs() <= EPSILON);
    assert!(rho.get(0, 1).norm() <= EPSILON);
}

#[test]
fn partial_trace_of_product_state_factors() {
    let mut state = StateVector::new(2);
    state.apply_unitary(&resolve("h").matrix, &[0]);
    state.apply_unitary(&resolve("x").matrix, &[1]);
    let joint = state.partial_trace(&[0, 1]);
    let left = state.partial_trace(&[0]);
    let right = state.partial_trace(&[1]);
    assert!(joint.approx_eq(&left.tensor(&right), EPSILON));
}

#[test]
fn sub_state_of_product_state_is_exact() {
    let mut state = StateVector::new(2);
    state.apply_unitary(&resolve("h").matrix, &[1]);
    let sub = state.sub_state(&[1]);
    let expected = [
        Complex64::new(FRAC_1_SQRT_2, 0.0),
        Complex64::new(FRAC_1_SQRT_2, 0.0),
    ];
    assert!(trace_distance(&sub, &expected) <= EPSILON);
}

#[test]
fn density_matrix_from_pure_state() {
    let plus = [
        Complex64::new(FRAC_1_SQRT_2, 0.0),
        Complex64::new(FRAC_1_SQRT_2, 0.0),
    ];
    let rho = DensityMatrix::from_pure(&plus);
    assert!((rho.probability(0) - 0.5).abs() <= EPSILON);
    assert!((rho.get(0, 1).re - 0.5).abs() <= EPSILON);
}

#[test]
fn set_amplitude_rescales_remaining() {
    let mut state = StateVector::new(1);
    state.apply_unitary(&resolve("h").matrix, &[0]);
    state
        .set_amplitude_rescaled(0, Complex64::new(0.6, 0.0))
        .expect("rescale should succeed");
    assert!(state.is_normalized());
    assert_amplitude(&state, 0, Complex64::new(0.6, 0.0));
    assert_amplitude(&state, 1, Complex64::new(0.8, 0.0));
}

#[test]
fn set_amplitude_with_unit_magnitude_zeroes_rest() {
    let mut state = StateVector::new(1);
    state.apply_unitary(&resolve("h").matrix, &[0]);
    state
        .set_amplitude_rescaled(1, Complex64::new(1.0, 0.0))
        .expect("rescale should succeed");
    assert_amplitude(&state, 0, Complex64::new(0.0, 0.0));
    assert_amplitude(&state, 1, Complex64::new(1.0, 0.0));
}

#[test]
fn set_amplitude_above_unit_magnitude_fails() {
    let mut state = StateVector::new(1);
    let result = state.set_amplitude_rescaled(0, Complex64::new(1.5, 0.0));
    assert_eq!(result, Err(Error::Normalization));
}

#[test]
fn set_amplitude_without_remaining_probability_fails() {
    let mut state = StateVector::new(1);
    // All probability sits on |0⟩, so nothing can absorb the deficit.
    let result = state.set_amplitude_rescaled(0, Complex64::new(0.5, 0.0));
    assert_eq!(result, Err(Error::Normalization));
}

#[test]
fn trace_distance_of_orthogonal_states_is_one() {
    let zero = [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)];
    let one = [Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0)];
    assert!((trace_distance(&zero, &one) - 1.0).abs() <= EPSILON);
    assert!(trace_distance(&zero, &zero) <= EPSILON);
}

#[test]
fn rotation_gates_resolve_and_invert() {
    let rx = gates::resolve("rx", &[0.3]).expect("rx should resolve");
    let mut state = StateVector::new(1);
    state.apply_unitary(&rx.matrix, &[0]);
    state.apply_inverse(&rx.matrix, &[0]);
    assert_amplitude(&state, 0, Complex64::new(1.0, 0.0));
}

#[test]
fn unknown_gate_does_not_resolve() {
    assert!(gates::resolve("bogus", &[]).is_none());
    assert!(gates::resolve("h", &[0.5]).is_none());
    assert_eq!(gates::num_controls("ccx"), Some(2));
    assert_eq!(gates::num_controls("cx"), Some(1));
    assert_eq!(gates::num_controls("h"), Some(0));
    assert_eq!(gates::num_controls("bogus"), None);
}
