//! Finite-difference vibrational analysis driver.
//!
//! Perturbs each Cartesian degree of freedom of a structure, evaluates
//! central finite-difference second derivatives of the energy through the
//! attached calculator (6N force evaluations for N free atoms), and
//! diagonalizes the mass-weighted Hessian into a vibrational spectrum plus
//! per-mode displacement vectors.
//!
//! All displacement evaluations run inside a single scratch session, so the
//! staging/copy-back/compression policy is paid once per analysis rather
//! than once per displacement. Evaluations are strictly sequential; each one
//! mutates the same structure/calculator pair.
//!
//! Frequencies are reported in cm^-1. A negative eigenvalue of the
//! mass-weighted Hessian becomes a purely imaginary frequency, preserving
//! the eigendecomposition's ascending-eigenvalue ordering.

use crate::runner::{Result, RunConfig, RunError, ScratchSession};
use crate::structure::Structure;
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

/// Unit bridges for the frequency conversion.
const EV_TO_JOULE: f64 = 1.602176634e-19;
const AMU_TO_KG: f64 = 1.66053906660e-27;
const SPEED_OF_LIGHT_CM: f64 = 2.99792458e10;

/// sqrt(eV / (amu Angstrom^2)) expressed as a wavenumber in cm^-1.
fn wavenumber_factor() -> f64 {
    (EV_TO_JOULE / (AMU_TO_KG * 1e-20)).sqrt() / (2.0 * std::f64::consts::PI * SPEED_OF_LIGHT_CM)
}

/// Configuration for a finite-difference vibrational analysis.
#[derive(Debug, Clone)]
pub struct VibConfig {
    /// Cartesian displacement per degree of freedom in Angstrom
    pub delta: f64,
}

impl Default for VibConfig {
    fn default() -> Self {
        Self { delta: 0.01 }
    }
}

/// Result of a vibrational analysis.
#[derive(Debug, Clone)]
pub struct Vibrations {
    /// The analyzed structure, positions restored to the input geometry,
    /// with its calculator reattached
    pub structure: Structure,
    /// Vibrational spectrum in cm^-1, ascending-eigenvalue order; imaginary
    /// modes have zero real part and a positive imaginary part
    pub frequencies: Vec<Complex64>,
    /// Cartesian displacement vector for each mode, same order as
    /// `frequencies`
    pub modes: Vec<DVector<f64>>,
}

impl Vibrations {
    /// Number of modes (3N).
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    /// True if the analysis produced no modes.
    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Count of imaginary modes in the spectrum.
    pub fn n_imaginary(&self) -> usize {
        self.frequencies.iter().filter(|f| f.im != 0.0).count()
    }
}

/// Run a finite-difference vibrational analysis through the attached
/// calculator.
///
/// Engine failures during any displacement evaluation propagate immediately;
/// the scratch directory is still released per the cleanup policy.
pub fn run_vib(mut structure: Structure, vib: &VibConfig, run: &RunConfig) -> Result<Vibrations> {
    let Some(mut calc) = structure.calc.take() else {
        return Err(RunError::NoCalculator);
    };
    let masses = structure.masses()?;

    let run_dir = run.resolve_run_dir()?;
    let session = ScratchSession::create(&run_dir, run)?;
    let ctx = session.context();

    let dof = structure.positions.len();
    info!(
        "vibrational analysis of {} sites: {} displacement evaluations",
        structure.len(),
        2 * dof
    );

    let mut hessian = DMatrix::zeros(dof, dof);
    for i in 0..dof {
        structure.positions[i] += vib.delta;
        calc.run(&structure, &ctx)?;
        let f_plus = calc
            .results()
            .forces_vector()
            .ok_or(RunError::MissingForces)?;

        structure.positions[i] -= 2.0 * vib.delta;
        calc.run(&structure, &ctx)?;
        let f_minus = calc
            .results()
            .forces_vector()
            .ok_or(RunError::MissingForces)?;

        structure.positions[i] += vib.delta;

        // H = d2E/dx2 = -dF/dx, one column per displaced coordinate
        let column = (f_minus - f_plus) / (2.0 * vib.delta);
        hessian.set_column(i, &column);
        debug!("hessian column {i} done");
    }

    session.finalize()?;

    // Numerical asymmetry from finite differences is averaged away before
    // diagonalization.
    let hessian = (&hessian + hessian.transpose()) / 2.0;

    let inv_sqrt_mass: Vec<f64> = masses
        .iter()
        .flat_map(|m| std::iter::repeat(1.0 / m.sqrt()).take(3))
        .collect();
    let mut weighted = hessian;
    for i in 0..dof {
        for j in 0..dof {
            weighted[(i, j)] *= inv_sqrt_mass[i] * inv_sqrt_mass[j];
        }
    }

    let eigen = weighted.symmetric_eigen();
    let mut order: Vec<usize> = (0..dof).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

    let factor = wavenumber_factor();
    let mut frequencies = Vec::with_capacity(dof);
    let mut modes = Vec::with_capacity(dof);
    for &k in &order {
        let lambda = eigen.eigenvalues[k];
        frequencies.push(if lambda >= 0.0 {
            Complex64::new(factor * lambda.sqrt(), 0.0)
        } else {
            Complex64::new(0.0, factor * (-lambda).sqrt())
        });

        // Back to Cartesian displacements, renormalized
        let mut mode = DVector::zeros(dof);
        for i in 0..dof {
            mode[i] = eigen.eigenvectors[(i, k)] * inv_sqrt_mass[i];
        }
        let norm = mode.norm();
        if norm > 0.0 {
            mode /= norm;
        }
        modes.push(mode);
    }

    structure.calc = Some(calc);
    Ok(Vibrations {
        structure,
        frequencies,
        modes,
    })
}
