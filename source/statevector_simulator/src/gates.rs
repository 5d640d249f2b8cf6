// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::Matrix;
use num_complex::Complex64;
use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4};
use std::sync::LazyLock;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);
const I: Complex64 = Complex64::new(0.0, 1.0);

static ID: LazyLock<Matrix> = LazyLock::new(|| Matrix::new(2, vec![ONE, ZERO, ZERO, ONE]));

static X: LazyLock<Matrix> = LazyLock::new(|| Matrix::new(2, vec![ZERO, ONE, ONE, ZERO]));

static Y: LazyLock<Matrix> = LazyLock::new(|| Matrix::new(2, vec![ZERO, -I, I, ZERO]));

static Z: LazyLock<Matrix> = LazyLock::new(|| Matrix::new(2, vec![ONE, ZERO, ZERO, -ONE]));

static H: LazyLock<Matrix> = LazyLock::new(|| {
    let f = Complex64::new(FRAC_1_SQRT_2, 0.0);
    Matrix::new(2, vec![f, f, f, -f])
});

static S: LazyLock<Matrix> = LazyLock::new(|| Matrix::new(2, vec![ONE, ZERO, ZERO, I]));

static S_ADJ: LazyLock<Matrix> = LazyLock::new(|| Matrix::new(2, vec![ONE, ZERO, ZERO, -I]));

static T: LazyLock<Matrix> =
    LazyLock::new(|| Matrix::new(2, vec![ONE, ZERO, ZERO, (I * FRAC_PI_4).exp()]));

static T_ADJ: LazyLock<Matrix> =
    LazyLock::new(|| Matrix::new(2, vec![ONE, ZERO, ZERO, (-I * FRAC_PI_4).exp()]));

static SX: LazyLock<Matrix> = LazyLock::new(|| {
    let p = (ONE + I) / 2.0;
    let m = (ONE - I) / 2.0;
    Matrix::new(2, vec![p, m, m, p])
});

static SX_ADJ: LazyLock<Matrix> = LazyLock::new(|| {
    let p = (ONE + I) / 2.0;
    let m = (ONE - I) / 2.0;
    Matrix::new(2, vec![m, p, p, m])
});

static SWAP: LazyLock<Matrix> = LazyLock::new(|| {
    Matrix::new(
        4,
        vec![
            ONE, ZERO, ZERO, ZERO, //
            ZERO, ZERO, ONE, ZERO, //
            ZERO, ONE, ZERO, ZERO, //
            ZERO, ZERO, ZERO, ONE,
        ],
    )
});

fn rx(angle: f64) -> Matrix {
    let sin = Complex64::new((angle / 2.0).sin(), 0.0);
    let cos = Complex64::new((angle / 2.0).cos(), 0.0);
    Matrix::new(2, vec![cos, -I * sin, -I * sin, cos])
}

fn ry(angle: f64) -> Matrix {
    let sin = Complex64::new((angle / 2.0).sin(), 0.0);
    let cos = Complex64::new((angle / 2.0).cos(), 0.0);
    Matrix::new(2, vec![cos, -sin, sin, cos])
}

fn rz(angle: f64) -> Matrix {
    let a = (-I * angle / 2.0).exp();
    let b = (I * angle / 2.0).exp();
    Matrix::new(2, vec![a, ZERO, ZERO, b])
}

fn phase(angle: f64) -> Matrix {
    Matrix::new(2, vec![ONE, ZERO, ZERO, (I * angle).exp()])
}

fn u2(phi: f64, lambda: f64) -> Matrix {
    let f = Complex64::new(FRAC_1_SQRT_2, 0.0);
    Matrix::new(
        2,
        vec![
            f,
            -f * (I * lambda).exp(),
            f * (I * phi).exp(),
            f * (I * (phi + lambda)).exp(),
        ],
    )
}

fn u3(theta: f64, phi: f64, lambda: f64) -> Matrix {
    let cos = Complex64::new((theta / 2.0).cos(), 0.0);
    let sin = Complex64::new((theta / 2.0).sin(), 0.0);
    Matrix::new(
        2,
        vec![
            cos,
            -sin * (I * lambda).exp(),
            sin * (I * phi).exp(),
            cos * (I * (phi + lambda)).exp(),
        ],
    )
}

/// A named gate resolved to its base unitary and control count.
///
/// For controlled gates the matrix covers only the non-control targets;
/// the controls condition its application.
#[derive(Clone, Debug)]
pub struct ResolvedGate {
    pub matrix: Matrix,
    pub num_controls: usize,
}

/// Resolves an OpenQASM gate name and its parameter list to a unitary.
///
/// Returns `None` for unknown names or a parameter count that does not
/// match the gate.
#[must_use]
pub fn resolve(name: &str, params: &[f64]) -> Option<ResolvedGate> {
    let fixed = |matrix: &Matrix, num_controls: usize| {
        if params.is_empty() {
            Some(ResolvedGate {
                matrix: matrix.clone(),
                num_controls,
            })
        } else {
            None
        }
    };
    let rotation = |f: fn(f64) -> Matrix, num_controls: usize| {
        if params.len() == 1 {
            Some(ResolvedGate {
                matrix: f(params[0]),
                num_controls,
            })
        } else {
            None
        }
    };
    match name {
        "id" => fixed(&ID, 0),
        "x" => fixed(&X, 0),
        "y" => fixed(&Y, 0),
        "z" => fixed(&Z, 0),
        "h" => fixed(&H, 0),
        "s" => fixed(&S, 0),
        "sdg" => fixed(&S_ADJ, 0),
        "t" => fixed(&T, 0),
        "tdg" => fixed(&T_ADJ, 0),
        "sx" => fixed(&SX, 0),
        "sxdg" => fixed(&SX_ADJ, 0),
        "swap" => fixed(&SWAP, 0),
        "cx" => fixed(&X, 1),
        "cy" => fixed(&Y, 1),
        "cz" => fixed(&Z, 1),
        "ch" => fixed(&H, 1),
        "ccx" => fixed(&X, 2),
        "cswap" => fixed(&SWAP, 1),
        "rx" => rotation(rx, 0),
        "ry" => rotation(ry, 0),
        "rz" => rotation(rz, 0),
        "p" | "u1" => rotation(phase, 0),
        "crx" => rotation(rx, 1),
        "cry" => rotation(ry, 1),
        "crz" => rotation(rz, 1),
        "cp" | "cu1" => rotation(phase, 1),
        "u2" => {
            if params.len() == 2 {
                Some(ResolvedGate {
                    matrix: u2(params[0], params[1]),
                    num_controls: 0,
                })
            } else {
                None
            }
        }
        "u3" | "u" => {
            if params.len() == 3 {
                Some(ResolvedGate {
                    matrix: u3(params[0], params[1], params[2]),
                    num_controls: 0,
                })
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Returns true if `name` names a gate in the supported set.
#[must_use]
pub fn is_known(name: &str) -> bool {
    matches!(
        name,
        "id" | "x"
            | "y"
            | "z"
            | "h"
            | "s"
            | "sdg"
            | "t"
            | "tdg"
            | "sx"
            | "sxdg"
            | "swap"
            | "cx"
            | "cy"
            | "cz"
            | "ch"
            | "ccx"
            | "cswap"
            | "rx"
            | "ry"
            | "rz"
            | "p"
            | "u1"
            | "u2"
            | "u3"
            | "u"
            | "crx"
            | "cry"
            | "crz"
            | "cp"
            | "cu1"
    )
}

/// The number of control qubits a named gate expects, if it is known.
#[must_use]
pub fn num_controls(name: &str) -> Option<usize> {
    match name {
        "cx" | "cy" | "cz" | "ch" | "crx" | "cry" | "crz" | "cp" | "cu1" | "cswap" => Some(1),
        "ccx" => Some(2),
        other if is_known(other) => Some(0),
        _ => None,
    }
}
