//! Deterministic numeric workloads for the CPU worker.
//!
//! Each kernel produces a reproducible result for a fixed seed, so any
//! deviation between iterations signals hardware-level miscomputation rather
//! than algorithmic nondeterminism. Everything is seeded explicitly and the
//! expected value is computed once, at construction, through the exact code
//! path used for later comparisons.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kernel strategy, resolved once at worker spawn into a concrete [`Kernel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum KernelKind {
    /// Repeated multiplication of two fixed seeded matrices, checksummed.
    #[default]
    Matrix,
    /// Trigonometric scalar recurrence with finiteness/bound checks.
    Recurrence,
    /// Lucas-Lehmer-style modular squaring with range checks.
    Modular,
}

/// A detected kernel-level anomaly.
#[derive(Debug, Error)]
pub enum Instability {
    #[error("matrix checksum deviated: expected {expected}, got {got}")]
    ChecksumMismatch { expected: i64, got: i64 },
    #[error("recurrence accumulator left the healthy range: {value}")]
    AccumulatorDiverged { value: f64 },
    #[error("modular residue escaped [0, 2^61-1): {residue}")]
    ResidueOutOfRange { residue: u64 },
}

/// A running kernel instance. One bounded burst of work per [`Kernel::step`],
/// short enough that the CPU worker's stop-check latency stays well under a
/// second.
pub enum Kernel {
    Matrix(MatrixKernel),
    Recurrence(RecurrenceKernel),
    Modular(ModularKernel),
}

impl Kernel {
    /// Build a kernel of the requested kind, seeded by worker identity.
    pub fn resolve(kind: KernelKind, seed: u64, matrix_size: usize) -> Self {
        match kind {
            KernelKind::Matrix => Kernel::Matrix(MatrixKernel::new(seed, matrix_size)),
            KernelKind::Recurrence => Kernel::Recurrence(RecurrenceKernel::new(seed)),
            KernelKind::Modular => Kernel::Modular(ModularKernel::new(seed)),
        }
    }

    pub fn step(&mut self) -> Result<(), Instability> {
        match self {
            Kernel::Matrix(k) => k.step(),
            Kernel::Recurrence(k) => k.step(),
            Kernel::Modular(k) => k.step(),
        }
    }
}

/// Matrix strategy: two fixed pseudo-random square matrices, multiplied over
/// and over. The checksum (entry sum coerced to `i64`) of every product must
/// match the one computed on the very first multiplication -- same inputs must
/// produce the same output on healthy hardware.
pub struct MatrixKernel {
    n: usize,
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    expected: i64,
}

impl MatrixKernel {
    pub fn new(seed: u64, n: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let a: Vec<f64> = (0..n * n).map(|_| rng.gen::<f64>()).collect();
        let b: Vec<f64> = (0..n * n).map(|_| rng.gen::<f64>()).collect();
        let mut kernel = Self {
            n,
            a,
            b,
            c: vec![0.0; n * n],
            expected: 0,
        };
        kernel.expected = kernel.multiply_checksum();
        kernel
    }

    /// Expected checksum, fixed at construction.
    pub fn expected_checksum(&self) -> i64 {
        self.expected
    }

    /// Replace the expected checksum. Exists so tests can exercise the
    /// comparison path with a deliberately perturbed value.
    pub fn set_expected_checksum(&mut self, expected: i64) {
        self.expected = expected;
    }

    fn multiply_checksum(&mut self) -> i64 {
        let n = self.n;
        for x in &mut self.c {
            *x = 0.0;
        }
        // i-k-j order so the inner loop walks rows contiguously
        for i in 0..n {
            for k in 0..n {
                let aik = self.a[i * n + k];
                for j in 0..n {
                    self.c[i * n + j] += aik * self.b[k * n + j];
                }
            }
        }
        let sum: f64 = self.c.iter().sum();
        sum as i64
    }

    pub fn step(&mut self) -> Result<(), Instability> {
        let got = self.multiply_checksum();
        if got != self.expected {
            return Err(Instability::ChecksumMismatch {
                expected: self.expected,
                got,
            });
        }
        Ok(())
    }
}

const SIN_TABLE_LEN: usize = 1024;
const RECURRENCE_BURST: usize = 200_000;
const ACCUMULATOR_BOUND: f64 = 1e12;

/// Recurrence strategy: `acc = acc * sin_table[i] + cos(acc + i)`, checked for
/// NaN/infinity and unbounded growth. Exercises the FPU's transcendental path
/// the matrix kernel barely touches.
pub struct RecurrenceKernel {
    table: Vec<f64>,
    acc: f64,
    i: u64,
}

impl RecurrenceKernel {
    pub fn new(seed: u64) -> Self {
        let table = (0..SIN_TABLE_LEN)
            .map(|i| ((seed as f64) + i as f64 * 0.001).sin())
            .collect();
        Self {
            table,
            acc: seed as f64 * 1e-3 + 0.5,
            i: 0,
        }
    }

    pub fn step(&mut self) -> Result<(), Instability> {
        for _ in 0..RECURRENCE_BURST {
            let t = self.table[(self.i as usize) % SIN_TABLE_LEN];
            self.acc = self.acc * t + (self.acc + self.i as f64).cos();
            self.i += 1;
        }
        // keep the accumulator observable so the loop cannot be elided
        let acc = std::hint::black_box(self.acc);
        if !acc.is_finite() || acc.abs() > ACCUMULATOR_BOUND {
            return Err(Instability::AccumulatorDiverged { value: acc });
        }
        Ok(())
    }
}

const MERSENNE_EXP: u32 = 61;
const MERSENNE: u64 = (1 << MERSENNE_EXP) - 1;
const MODULAR_BURST: usize = 2_000_000;

/// Modular strategy: `s = (s*s - 2) mod (2^61 - 1)` squaring over `u128`
/// intermediates. The residue must stay inside `[0, 2^61-1)` forever; an
/// escape means the multiplier or reduction misfired.
pub struct ModularKernel {
    s: u64,
}

impl ModularKernel {
    pub fn new(seed: u64) -> Self {
        // start away from the 0/1/2 fixed points
        Self {
            s: (seed % (MERSENNE - 4)) + 4,
        }
    }

    pub fn step(&mut self) -> Result<(), Instability> {
        let m = MERSENNE as u128;
        for _ in 0..MODULAR_BURST {
            let sq = (self.s as u128 * self.s as u128) % m;
            self.s = ((sq + m - 2) % m) as u64;
        }
        let s = std::hint::black_box(self.s);
        if s >= MERSENNE {
            return Err(Instability::ResidueOutOfRange { residue: s });
        }
        Ok(())
    }
}
