use super::{
    Assertion, AssertionKind, DEFAULT_TOLERANCE, ExpectedState, parse_assertion, parse_complex,
};
use num_complex::Complex64;
use rustc_hash::FxHashMap;

fn parse(code: &str, body: Option<&str>) -> Result<Assertion, String> {
    parse_assertion(code, body)
}

#[test]
fn entanglement_assertion() {
    let assertion = parse("assert-ent q[0], q[1];", None).expect("assertion should parse");
    assert_eq!(assertion.kind, AssertionKind::Entanglement);
    assert_eq!(assertion.targets, vec!["q[0]".to_string(), "q[1]".to_string()]);
    assertion.validate().expect("assertion should validate");
}

#[test]
fn superposition_assertion() {
    let assertion = parse("assert-sup q[0];", None).expect("assertion should parse");
    assert_eq!(assertion.kind, AssertionKind::Superposition);
    assertion.validate().expect("assertion should validate");
}

#[test]
fn equality_assertion_with_bitstring() {
    let assertion = parse("assert-eq q[0], q[1]", Some(" 11 ")).expect("assertion should parse");
    let AssertionKind::Equality(check) = &assertion.kind else {
        panic!("expected an equality assertion");
    };
    assert_eq!(check.expected, ExpectedState::BitString("11".to_string()));
    assert!((check.tolerance - DEFAULT_TOLERANCE).abs() < f64::EPSILON);
    assertion.validate().expect("assertion should validate");
}

#[test]
fn equality_assertion_with_amplitudes_and_tolerance() {
    let assertion = parse("assert-eq q[0]", Some(" 0.707, 0.707; 1e-3 "))
        .expect("assertion should parse");
    let AssertionKind::Equality(check) = &assertion.kind else {
        panic!("expected an equality assertion");
    };
    let ExpectedState::Amplitudes(amplitudes) = &check.expected else {
        panic!("expected an amplitude vector");
    };
    assert_eq!(amplitudes.len(), 2);
    assert!((check.tolerance - 1e-3).abs() < f64::EPSILON);
    assertion.validate().expect("assertion should validate");
}

#[test]
fn inequality_assertion() {
    let assertion = parse("assert-ineq q[0]", Some("0")).expect("assertion should parse");
    assert!(matches!(assertion.kind, AssertionKind::Inequality(_)));
    assertion.validate().expect("assertion should validate");
}

#[test]
fn unknown_kind_is_rejected() {
    let error = parse("assert-foo q[0];", None).expect_err("assertion should not parse");
    assert_eq!(error, "Unknown assertion kind assert-foo.");
}

#[test]
fn equality_requires_a_body() {
    let error = parse("assert-eq q[0];", None).expect_err("assertion should not parse");
    assert_eq!(error, "Assertion assert-eq requires a body.");
}

#[test]
fn entanglement_requires_two_targets() {
    let assertion = parse("assert-ent q[0];", None).expect("assertion should parse");
    assert_eq!(
        assertion.validate(),
        Err("Entanglement assertions require at least two targets.".to_string())
    );
}

#[test]
fn duplicate_targets_are_rejected() {
    let assertion = parse("assert-ent q[0], q[0];", None).expect("assertion should parse");
    assert_eq!(
        assertion.validate(),
        Err("Duplicate assertion target q[0].".to_string())
    );
}

#[test]
fn bitstring_length_must_match_targets() {
    let assertion = parse("assert-eq q[0]", Some("11")).expect("assertion should parse");
    assert_eq!(
        assertion.validate(),
        Err("Expected a bit for each of the 1 assertion targets.".to_string())
    );
}

#[test]
fn amplitude_count_must_match_targets() {
    let assertion =
        parse("assert-eq q[0], q[1]", Some("0.5, 0.5")).expect("assertion should parse");
    assert_eq!(
        assertion.validate(),
        Err("Expected 4 amplitudes for 2 assertion targets.".to_string())
    );
}

#[test]
fn non_positive_tolerance_is_rejected() {
    let assertion = parse("assert-eq q[0]", Some("1, 0; 0.0")).expect("assertion should parse");
    assert_eq!(
        assertion.validate(),
        Err("Assertion tolerance must be positive.".to_string())
    );
}

#[test]
fn register_unfolding_respects_shadowing() {
    let mut registers = FxHashMap::default();
    registers.insert("q".to_string(), 2);
    registers.insert("a".to_string(), 3);

    let mut assertion = parse("assert-ent q, a;", None).expect("assertion should parse");
    assertion.unfold_register_targets(&registers, &["a".to_string()]);
    assert_eq!(
        assertion.targets,
        vec!["q[0]".to_string(), "q[1]".to_string(), "a".to_string()]
    );
}

#[test]
fn complex_literals() {
    let cases = [
        ("1", Complex64::new(1.0, 0.0)),
        ("-0.5", Complex64::new(-0.5, 0.0)),
        ("i", Complex64::new(0.0, 1.0)),
        ("-i", Complex64::new(0.0, -1.0)),
        ("0.5i", Complex64::new(0.0, 0.5)),
        ("0.5+0.5i", Complex64::new(0.5, 0.5)),
        ("0.5-0.5i", Complex64::new(0.5, -0.5)),
        ("-0.5-0.5i", Complex64::new(-0.5, -0.5)),
        ("1e-3i", Complex64::new(0.0, 1e-3)),
    ];
    for (text, expected) in cases {
        let parsed = parse_complex(text).unwrap_or_else(|| panic!("{text} should parse"));
        assert!(
            (parsed - expected).norm() < 1e-12,
            "{text}: expected {expected}, got {parsed}"
        );
    }
    assert_eq!(parse_complex("bogus"), None);
    assert_eq!(parse_complex(""), None);
}
