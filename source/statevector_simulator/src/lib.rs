//! This crate implements the dense state-vector simulation backend for the
//! QASM debugger, along with the amplitude arithmetic the debugger needs:
//! partial traces, sub-state projection, trace distance, and normalization
//! checks.

pub mod gates;

#[cfg(test)]
mod test;

use num_complex::Complex64;
use rand::Rng;
use thiserror::Error;

pub use gates::{ResolvedGate, resolve};

/// Absolute tolerance for amplitude comparisons.
pub const EPSILON: f64 = 1e-6;

/// Allowed drift of the total probability away from 1.
pub const NORM_EPSILON: f64 = 1e-6;

/// An error raised when an operation cannot keep the state normalized.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// The requested amplitude change cannot preserve the state norm.
    #[error("amplitude change cannot preserve the state norm")]
    Normalization,
    /// A basis index or qubit index was out of range.
    #[error("index {index} out of range for {num_qubits} qubits")]
    IndexOutOfRange { index: usize, num_qubits: usize },
}

/// Compares two complex amplitudes under an absolute tolerance.
#[must_use]
pub fn approx_eq(a: Complex64, b: Complex64, tolerance: f64) -> bool {
    (a - b).norm() <= tolerance
}

/// A square complex matrix with power-of-two dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    dim: usize,
    elements: Vec<Complex64>,
}

impl Matrix {
    /// Creates a matrix from row-major elements.
    #[must_use]
    pub fn new(dim: usize, elements: Vec<Complex64>) -> Self {
        assert_eq!(dim * dim, elements.len(), "matrix must be square");
        Self { dim, elements }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn get(&self, row: usize, column: usize) -> Complex64 {
        self.elements[row * self.dim + column]
    }

    /// The conjugate transpose. For a unitary this is its inverse.
    #[must_use]
    pub fn dagger(&self) -> Self {
        let mut elements = vec![Complex64::new(0.0, 0.0); self.elements.len()];
        for row in 0..self.dim {
            for column in 0..self.dim {
                elements[column * self.dim + row] = self.get(row, column).conj();
            }
        }
        Self {
            dim: self.dim,
            elements,
        }
    }
}

/// A reduced density matrix over a subset of qubits.
#[derive(Clone, Debug)]
pub struct DensityMatrix {
    dim: usize,
    elements: Vec<Complex64>,
}

impl DensityMatrix {
    fn zero(dim: usize) -> Self {
        Self {
            dim,
            elements: vec![Complex64::new(0.0, 0.0); dim * dim],
        }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn get(&self, row: usize, column: usize) -> Complex64 {
        self.elements[row * self.dim + column]
    }

    /// The probability of the computational basis state `index`.
    #[must_use]
    pub fn probability(&self, index: usize) -> f64 {
        self.get(index, index).re
    }

    /// Element-wise comparison under an absolute tolerance.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.dim == other.dim
            && self
                .elements
                .iter()
                .zip(&other.elements)
                .all(|(a, b)| approx_eq(*a, *b, tolerance))
    }

    /// The tensor product `self ⊗ other`.
    ///
    /// `self` covers the lower qubit positions of the result.
    #[must_use]
    pub fn tensor(&self, other: &Self) -> Self {
        let dim = self.dim * other.dim;
        let mut result = Self::zero(dim);
        for row_hi in 0..other.dim {
            for col_hi in 0..other.dim {
                for row_lo in 0..self.dim {
                    for col_lo in 0..self.dim {
                        let row = row_hi * self.dim + row_lo;
                        let column = col_hi * self.dim + col_lo;
                        result.elements[row * dim + column] =
                            other.get(row_hi, col_hi) * self.get(row_lo, col_lo);
                    }
                }
            }
        }
        result
    }

    /// The density matrix `|v⟩⟨v|` of a pure state.
    #[must_use]
    pub fn from_pure(amplitudes: &[Complex64]) -> Self {
        let dim = amplitudes.len();
        let mut result = Self::zero(dim);
        for row in 0..dim {
            for column in 0..dim {
                result.elements[row * dim + column] = amplitudes[row] * amplitudes[column].conj();
            }
        }
        result
    }
}

/// An opaque handle that restores the state as it was before a measurement.
///
/// Handles hold a full copy of the pre-measurement amplitudes, so memory
/// use stays proportional to the number of live measurement records.
#[derive(Clone, Debug)]
pub struct MeasurementHandle {
    amplitudes: Vec<Complex64>,
}

/// A dense state vector over `num_qubits` qubits.
///
/// Qubit `k` corresponds to bit `k` of the basis index.
#[derive(Clone, Debug)]
pub struct StateVector {
    num_qubits: usize,
    amplitudes: Vec<Complex64>,
}

impl StateVector {
    /// Creates the all-zeros state `|0…0⟩`.
    #[must_use]
    pub fn new(num_qubits: usize) -> Self {
        let mut amplitudes = vec![Complex64::new(0.0, 0.0); 1 << num_qubits];
        amplitudes[0] = Complex64::new(1.0, 0.0);
        Self {
            num_qubits,
            amplitudes,
        }
    }

    #[must_use]
    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    #[must_use]
    pub fn amplitudes(&self) -> &[Complex64] {
        &self.amplitudes
    }

    /// The amplitude of the given basis index.
    pub fn amplitude(&self, index: usize) -> Result<Complex64, Error> {
        self.amplitudes.get(index).copied().ok_or(Error::IndexOutOfRange {
            index,
            num_qubits: self.num_qubits,
        })
    }

    /// The total probability `Σ|amplitude|²`.
    #[must_use]
    pub fn norm_squared(&self) -> f64 {
        self.amplitudes.iter().map(Complex64::norm_sqr).sum()
    }

    /// Whether the total probability is within [`NORM_EPSILON`] of 1.
    #[must_use]
    pub fn is_normalized(&self) -> bool {
        (self.norm_squared() - 1.0).abs() <= NORM_EPSILON
    }

    /// The probability of measuring `qubit` as `|1⟩`.
    #[must_use]
    pub fn prob_one(&self, qubit: usize) -> f64 {
        let mask = 1usize << qubit;
        self.amplitudes
            .iter()
            .enumerate()
            .filter(|(index, _)| index & mask != 0)
            .map(|(_, amplitude)| amplitude.norm_sqr())
            .sum()
    }

    /// Applies a unitary to the given target qubits.
    ///
    /// Bit `j` of the matrix's basis index corresponds to `targets[j]`.
    pub fn apply_unitary(&mut self, matrix: &Matrix, targets: &[usize]) {
        self.apply_controlled(matrix, &[], targets);
    }

    /// Applies the inverse of a unitary to the given target qubits.
    pub fn apply_inverse(&mut self, matrix: &Matrix, targets: &[usize]) {
        self.apply_controlled(&matrix.dagger(), &[], targets);
    }

    /// Applies a unitary to `targets`, conditioned on every qubit in
    /// `controls` being `|1⟩`.
    pub fn apply_controlled(&mut self, matrix: &Matrix, controls: &[usize], targets: &[usize]) {
        assert_eq!(
            matrix.dim(),
            1 << targets.len(),
            "matrix dimension must match target count"
        );
        let control_mask: usize = controls.iter().map(|q| 1usize << q).sum();
        let target_mask: usize = targets.iter().map(|q| 1usize << q).sum();
        let mut scratch = vec![Complex64::new(0.0, 0.0); matrix.dim()];
        for base in 0..self.amplitudes.len() {
            // Visit each target-subspace block once, at its all-zeros member,
            // and only when every control bit is set.
            if base & target_mask != 0 || base & control_mask != control_mask {
                continue;
            }
            for (local, value) in scratch.iter_mut().enumerate() {
                *value = self.amplitudes[base | spread(local, targets)];
            }
            for (local_out, _) in scratch.iter().enumerate() {
                let mut sum = Complex64::new(0.0, 0.0);
                for (local_in, value) in scratch.iter().enumerate() {
                    sum += matrix.get(local_out, local_in) * value;
                }
                self.amplitudes[base | spread(local_out, targets)] = sum;
            }
        }
    }

    /// Applies the inverse of a controlled unitary.
    pub fn apply_controlled_inverse(
        &mut self,
        matrix: &Matrix,
        controls: &[usize],
        targets: &[usize],
    ) {
        self.apply_controlled(&matrix.dagger(), controls, targets);
    }

    /// Measures `qubit` in the computational basis.
    ///
    /// Collapses and renormalizes the state, returning the observed bit and
    /// a handle that restores the exact pre-measurement amplitudes.
    pub fn measure<R: Rng>(&mut self, qubit: usize, rng: &mut R) -> (bool, MeasurementHandle) {
        let handle = MeasurementHandle {
            amplitudes: self.amplitudes.clone(),
        };
        let p_one = self.prob_one(qubit);
        let outcome = rng.gen_range(0.0..1.0) < p_one;
        self.collapse(qubit, outcome);
        (outcome, handle)
    }

    /// Projects `qubit` onto `outcome` and renormalizes.
    pub fn collapse(&mut self, qubit: usize, outcome: bool) {
        let mask = 1usize << qubit;
        let mut kept = 0.0;
        for (index, amplitude) in self.amplitudes.iter_mut().enumerate() {
            if (index & mask != 0) != outcome {
                *amplitude = Complex64::new(0.0, 0.0);
            } else {
                kept += amplitude.norm_sqr();
            }
        }
        if kept > 0.0 {
            let scale = 1.0 / kept.sqrt();
            for amplitude in &mut self.amplitudes {
                *amplitude *= scale;
            }
        }
    }

    /// Restores the amplitudes recorded in a measurement handle.
    pub fn restore(&mut self, handle: &MeasurementHandle) {
        self.amplitudes.clone_from(&handle.amplitudes);
    }

    /// The reduced density matrix over `keep`, tracing out the complement.
    ///
    /// Bit `j` of the result's basis index corresponds to `keep[j]`.
    #[must_use]
    pub fn partial_trace(&self, keep: &[usize]) -> DensityMatrix {
        let complement: Vec<usize> = (0..self.num_qubits)
            .filter(|q| !keep.contains(q))
            .collect();
        let dim = 1 << keep.len();
        let mut result = DensityMatrix::zero(dim);
        for env in 0..(1usize << complement.len()) {
            let base = spread(env, &complement);
            for row in 0..dim {
                let row_amplitude = self.amplitudes[base | spread(row, keep)];
                for column in 0..dim {
                    let column_amplitude = self.amplitudes[base | spread(column, keep)];
                    result.elements[row * dim + column] +=
                        row_amplitude * column_amplitude.conj();
                }
            }
        }
        result
    }

    /// Projects the state onto `keep`, returning the closest pure sub-state.
    ///
    /// Exact when the kept qubits are unentangled with the rest; otherwise
    /// the column of the reduced density matrix through its most probable
    /// basis state.
    #[must_use]
    pub fn sub_state(&self, keep: &[usize]) -> Vec<Complex64> {
        let rho = self.partial_trace(keep);
        let reference = (0..rho.dim())
            .max_by(|a, b| {
                rho.probability(*a)
                    .partial_cmp(&rho.probability(*b))
                    .expect("probabilities should be comparable")
            })
            .expect("density matrix should be non-empty");
        let reference_probability = rho.probability(reference);
        if reference_probability <= 0.0 {
            return vec![Complex64::new(0.0, 0.0); rho.dim()];
        }
        let scale = 1.0 / reference_probability.sqrt();
        let mut amplitudes: Vec<Complex64> = (0..rho.dim())
            .map(|row| rho.get(row, reference) * scale)
            .collect();
        let norm = amplitudes
            .iter()
            .map(|a| a.norm_sqr())
            .sum::<f64>()
            .sqrt();
        if norm > 0.0 {
            for amplitude in &mut amplitudes {
                *amplitude /= norm;
            }
        }
        amplitudes
    }

    /// Overwrites one amplitude and uniformly rescales the rest so the
    /// total probability returns to 1.
    ///
    /// Fails with [`Error::Normalization`] if the supplied amplitude has
    /// magnitude greater than 1, or if the remaining amplitudes carry no
    /// probability to rescale.
    pub fn set_amplitude_rescaled(&mut self, index: usize, value: Complex64) -> Result<(), Error> {
        if index >= self.amplitudes.len() {
            return Err(Error::IndexOutOfRange {
                index,
                num_qubits: self.num_qubits,
            });
        }
        let new_probability = value.norm_sqr();
        if new_probability > 1.0 + NORM_EPSILON {
            return Err(Error::Normalization);
        }
        let remaining_target = (1.0 - new_probability).max(0.0);
        let remaining_current = self.norm_squared() - self.amplitudes[index].norm_sqr();
        if remaining_current <= NORM_EPSILON && remaining_target > NORM_EPSILON {
            return Err(Error::Normalization);
        }
        let scale = if remaining_current <= NORM_EPSILON {
            0.0
        } else {
            (remaining_target / remaining_current).sqrt()
        };
        for (other, amplitude) in self.amplitudes.iter_mut().enumerate() {
            if other != index {
                *amplitude *= scale;
            }
        }
        self.amplitudes[index] = value;
        Ok(())
    }
}

/// The trace distance between two pure states,
/// `√(1 − |⟨ψ|φ⟩|²)`.
#[must_use]
pub fn trace_distance(a: &[Complex64], b: &[Complex64]) -> f64 {
    let overlap: Complex64 = a.iter().zip(b).map(|(x, y)| x.conj() * y).sum();
    (1.0 - overlap.norm_sqr()).max(0.0).sqrt()
}

/// Scatters the bits of `local` into the global bit positions `qubits`.
fn spread(local: usize, qubits: &[usize]) -> usize {
    let mut result = 0;
    for (position, qubit) in qubits.iter().enumerate() {
        if local & (1 << position) != 0 {
            result |= 1 << qubit;
        }
    }
    result
}
