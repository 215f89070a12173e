//! Ideal-gas thermochemistry from a vibrational spectrum.
//!
//! Consumes a structure and its vibrational frequency spectrum and produces
//! rigid-rotor-harmonic-oscillator thermodynamic quantities (zero-point
//! energy, enthalpy, entropy, Gibbs free energy) shaped into a
//! database-ready summary record.
//!
//! # Frequency handling
//!
//! Input frequencies are complex. Each one is first normalized to a signed
//! real: a nonzero imaginary component stores the frequency as the negative
//! of its magnitude (imaginary modes encode as negative reals); a zero
//! imaginary component keeps the real part as-is. This is a normalization
//! rule, not a re-sort: input ordering is preserved.
//!
//! The "true" vibrational modes are the trailing 3N-5 (linear) or 3N-6
//! (nonlinear) entries of the normalized sequence; the leading entries are
//! the near-zero rigid-body modes a stationary-point Hessian always
//! produces. `n_imag` counts negative true frequencies. An `n_imag` above
//! one flags a structure away from a true stationary point; the record still
//! computes so callers can quality-filter on the count. Imaginary modes are
//! excluded from the partition-function sums.

use crate::schemas::{atoms_to_metadata, sanitize_map, Summary};
use crate::structure::{Structure, UnknownElement};
use crate::symmetry::{classify_geometry, point_group, principal_moments, symmetry_number, GeometryClass};
use log::warn;
use num_complex::Complex64;
use serde_json::{json, Value};
use thiserror::Error;

/// Boltzmann constant in eV/K
const KB: f64 = 8.617333262e-5;
/// h*c in eV*cm: converts a wavenumber in cm^-1 to an energy in eV
const PLANCK_C: f64 = 1.239841984e-4;
/// Boltzmann constant in J/K
const KB_SI: f64 = 1.380649e-23;
/// Planck constant in J*s
const PLANCK_SI: f64 = 6.62607015e-34;
/// Atomic mass unit in kg
const AMU_SI: f64 = 1.66053906660e-27;

/// Error type for thermochemistry post-processing.
#[derive(Error, Debug)]
pub enum ThermoError {
    /// A site's element has no tabulated mass
    #[error(transparent)]
    UnknownElement(#[from] UnknownElement),
    /// Temperature must be positive for partition functions
    #[error("non-positive temperature: {0} K")]
    NonPositiveTemperature(f64),
}

/// Type alias for thermochemistry results
pub type Result<T> = std::result::Result<T, ThermoError>;

/// Conditions and reference values for the ideal-gas treatment.
#[derive(Debug, Clone)]
pub struct ThermoConfig {
    /// Temperature in K
    pub temperature: f64,
    /// Pressure in bar
    pub pressure: f64,
    /// Reference potential energy in eV; 0.0 yields the bare thermochemical
    /// correction
    pub energy: f64,
    /// Rotational symmetry number override; `None` derives it from the
    /// detected point group
    pub sigma: Option<u32>,
    /// Electronic spin multiplicity (2S+1)
    pub spin_multiplicity: u32,
    /// Job label stored under `name`
    pub name: String,
}

impl Default for ThermoConfig {
    fn default() -> Self {
        Self {
            temperature: 298.15,
            pressure: 1.0,
            energy: 0.0,
            sigma: None,
            spin_multiplicity: 1,
            name: "thermo".to_string(),
        }
    }
}

/// Normalize a complex spectrum to the signed-real convention.
pub fn signed_frequencies(frequencies: &[Complex64]) -> Vec<f64> {
    frequencies
        .iter()
        .map(|f| if f.im != 0.0 { -f.norm() } else { f.re })
        .collect()
}

/// Compute ideal-gas RRHO thermochemistry and shape the summary record.
///
/// The returned record carries the structure-derived fields plus a `results`
/// block with the normalized `frequencies`, the filtered `true_frequencies`,
/// `n_imag`, the `geometry` class, the `pointgroup` label, and the
/// enthalpy/entropy/Gibbs-energy fields, all at the configured temperature
/// and pressure.
pub fn ideal_gas_thermo(
    structure: &Structure,
    frequencies: &[Complex64],
    config: &ThermoConfig,
) -> Result<Summary> {
    if config.temperature <= 0.0 {
        return Err(ThermoError::NonPositiveTemperature(config.temperature));
    }

    let geometry = classify_geometry(structure)?;
    let pointgroup = point_group(structure)?;
    let sigma = config.sigma.unwrap_or_else(|| symmetry_number(&pointgroup));

    let signed = signed_frequencies(frequencies);
    let n_vib = (3 * structure.len()).saturating_sub(geometry.rigid_body_modes());
    let true_frequencies: Vec<f64> = signed[signed.len().saturating_sub(n_vib)..].to_vec();
    let n_imag = true_frequencies.iter().filter(|&&f| f < 0.0).count();
    if n_imag > 1 {
        warn!("{n_imag} imaginary modes: structure is not at a stationary point");
    }

    let vib_energies: Vec<f64> = true_frequencies
        .iter()
        .filter(|&&f| f > 0.0)
        .map(|f| PLANCK_C * f)
        .collect();

    let t = config.temperature;
    let kt = KB * t;
    let zpe: f64 = vib_energies.iter().map(|e| 0.5 * e).sum();

    // Internal energy terms
    let e_trans = 1.5 * kt;
    let e_rot = match geometry {
        GeometryClass::Monatomic => 0.0,
        GeometryClass::Linear => kt,
        GeometryClass::Nonlinear => 1.5 * kt,
    };
    let e_vib: f64 = vib_energies
        .iter()
        .map(|e| e / ((e / kt).exp() - 1.0))
        .sum();
    let enthalpy = config.energy + zpe + e_trans + e_rot + e_vib + kt;

    // Entropy terms
    let pressure_pa = config.pressure * 1.0e5;
    let mass_kg = structure.total_mass()? * AMU_SI;
    let q_trans = (2.0 * std::f64::consts::PI * mass_kg * KB_SI * t / (PLANCK_SI * PLANCK_SI))
        .powf(1.5)
        * KB_SI
        * t
        / pressure_pa;
    let s_trans = KB * (q_trans.ln() + 2.5);

    let s_rot = match geometry {
        GeometryClass::Monatomic => 0.0,
        GeometryClass::Linear => {
            let moments = principal_moments(structure)?;
            let inertia = moments[2] * AMU_SI * 1.0e-20;
            let q_rot = 8.0 * std::f64::consts::PI.powi(2) * inertia * KB_SI * t
                / (f64::from(sigma) * PLANCK_SI * PLANCK_SI);
            KB * (q_rot.ln() + 1.0)
        }
        GeometryClass::Nonlinear => {
            let moments = principal_moments(structure)?;
            let product: f64 = moments
                .iter()
                .map(|m| m * AMU_SI * 1.0e-20)
                .product();
            let q_rot = (std::f64::consts::PI * product).sqrt() / f64::from(sigma)
                * (8.0 * std::f64::consts::PI.powi(2) * KB_SI * t / (PLANCK_SI * PLANCK_SI))
                    .powf(1.5);
            KB * (q_rot.ln() + 1.5)
        }
    };

    let s_vib: f64 = vib_energies
        .iter()
        .map(|e| {
            let x = e / kt;
            // x/(e^x - 1) - ln(1 - e^-x)
            KB * (x / (x.exp() - 1.0) - (-(-x).exp()).ln_1p())
        })
        .sum();
    let s_elec = KB * f64::from(config.spin_multiplicity).ln();
    let entropy = s_trans + s_rot + s_vib + s_elec;

    let gibbs_energy = enthalpy - t * entropy;

    let mut results = serde_json::Map::new();
    results.insert("energy".into(), json!(config.energy));
    results.insert("frequencies".into(), json!(signed));
    results.insert("true_frequencies".into(), json!(true_frequencies));
    results.insert("n_imag".into(), json!(n_imag));
    results.insert("geometry".into(), json!(geometry.as_str()));
    results.insert("pointgroup".into(), json!(pointgroup));
    results.insert("symmetry_number".into(), json!(sigma));
    results.insert("spin_multiplicity".into(), json!(config.spin_multiplicity));
    results.insert("temperature".into(), json!(t));
    results.insert("pressure".into(), json!(config.pressure));
    results.insert("zpe".into(), json!(zpe));
    results.insert("enthalpy".into(), json!(enthalpy));
    results.insert("entropy".into(), json!(entropy));
    results.insert("gibbs_energy".into(), json!(gibbs_energy));

    let mut record = atoms_to_metadata(structure);
    record.insert("results".into(), Value::Object(results));
    record.insert("name".into(), json!(config.name));
    Ok(sanitize_map(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn methane() -> Structure {
        let d = 0.629118;
        Structure::from_sites(&[
            ("C", [0.0, 0.0, 0.0]),
            ("H", [d, d, d]),
            ("H", [d, -d, -d]),
            ("H", [-d, d, -d]),
            ("H", [-d, -d, d]),
        ])
    }

    fn dummy_spectrum() -> Vec<Complex64> {
        let mut freqs = vec![Complex64::new(0.0, 0.0); 5];
        freqs.push(Complex64::new(0.0, 10.0));
        freqs.push(Complex64::new(0.0, 200.0));
        for f in [500.0, 1000.0, 1500.0, 2000.0, 2500.0, 3000.0, 3500.0, 4000.0] {
            freqs.push(Complex64::new(f, 0.0));
        }
        freqs
    }

    #[test]
    fn test_sign_convention_and_filtering() {
        let record = ideal_gas_thermo(&methane(), &dummy_spectrum(), &ThermoConfig::default())
            .unwrap();
        let results = record["results"].as_object().unwrap();

        let frequencies: Vec<f64> = results["frequencies"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        assert_eq!(
            frequencies,
            vec![
                0.0, 0.0, 0.0, 0.0, 0.0, -10.0, -200.0, 500.0, 1000.0, 1500.0, 2000.0, 2500.0,
                3000.0, 3500.0, 4000.0
            ]
        );

        let true_frequencies: Vec<f64> = results["true_frequencies"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        assert_eq!(
            true_frequencies,
            vec![-200.0, 500.0, 1000.0, 1500.0, 2000.0, 2500.0, 3000.0, 3500.0, 4000.0]
        );

        assert_eq!(results["n_imag"], json!(1));
        assert_eq!(results["geometry"], json!("nonlinear"));
        assert_eq!(results["pointgroup"], json!("Td"));
    }

    #[test]
    fn test_negative_real_in_rigid_body_block_is_dropped() {
        // A -10 real input behaves the same as a 10j input: it sits in the
        // rigid-body block and never reaches the true frequencies.
        let mut freqs = vec![Complex64::new(0.0, 0.0); 5];
        freqs.push(Complex64::new(-10.0, 0.0));
        freqs.push(Complex64::new(0.0, 200.0));
        for f in [500.0, 1000.0, 1500.0, 2000.0, 2500.0, 3000.0, 3500.0, 4000.0] {
            freqs.push(Complex64::new(f, 0.0));
        }
        let record = ideal_gas_thermo(&methane(), &freqs, &ThermoConfig::default()).unwrap();
        let results = record["results"].as_object().unwrap();
        assert_eq!(results["n_imag"], json!(1));
        assert_eq!(
            results["true_frequencies"].as_array().unwrap().len(),
            9
        );
    }

    #[test]
    fn test_monatomic_sackur_tetrode() {
        let argon = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0])]);
        let record = ideal_gas_thermo(&argon, &[], &ThermoConfig::default()).unwrap();
        let results = record["results"].as_object().unwrap();

        assert_eq!(results["geometry"], json!("monatomic"));
        assert_eq!(results["n_imag"], json!(0));
        assert!(results["true_frequencies"].as_array().unwrap().is_empty());

        // Standard molar entropy of Ar at 298.15 K, 1 bar: 154.85 J/(mol K)
        let entropy = results["entropy"].as_f64().unwrap();
        assert!((entropy - 154.85 / 96485.332).abs() < 5e-6, "S = {entropy}");

        // H = E + 3/2 kT + kT for a monatomic ideal gas
        let enthalpy = results["enthalpy"].as_f64().unwrap();
        assert!((enthalpy - 2.5 * KB * 298.15).abs() < 1e-12);
    }

    #[test]
    fn test_linear_molecule_mode_count() {
        let co2 = Structure::from_sites(&[
            ("C", [0.0, 0.0, 0.0]),
            ("O", [0.0, 0.0, 1.16]),
            ("O", [0.0, 0.0, -1.16]),
        ]);
        // 3N = 9 modes, 5 rigid-body, 4 vibrational
        let freqs: Vec<Complex64> = [0.0, 0.0, 0.0, 0.0, 0.0, 667.0, 667.0, 1333.0, 2349.0]
            .iter()
            .map(|&f| Complex64::new(f, 0.0))
            .collect();
        let record = ideal_gas_thermo(&co2, &freqs, &ThermoConfig::default()).unwrap();
        let results = record["results"].as_object().unwrap();
        assert_eq!(results["geometry"], json!("linear"));
        assert_eq!(results["pointgroup"], json!("D*h"));
        assert_eq!(results["symmetry_number"], json!(2));
        assert_eq!(results["true_frequencies"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_gibbs_is_enthalpy_minus_ts() {
        let record = ideal_gas_thermo(&methane(), &dummy_spectrum(), &ThermoConfig::default())
            .unwrap();
        let results = record["results"].as_object().unwrap();
        let h = results["enthalpy"].as_f64().unwrap();
        let s = results["entropy"].as_f64().unwrap();
        let g = results["gibbs_energy"].as_f64().unwrap();
        assert!((g - (h - 298.15 * s)).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_non_positive_temperature() {
        let config = ThermoConfig {
            temperature: 0.0,
            ..ThermoConfig::default()
        };
        assert!(ideal_gas_thermo(&methane(), &[], &config).is_err());
    }
}
