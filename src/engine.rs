//! Calculation engine interfaces.
//!
//! This module provides a unified interface for running computations with
//! different engines. It abstracts away the differences between external
//! programs (ORCA, xTB) and in-process potentials, and provides a consistent
//! API for:
//!
//! - Writing input files into the working directory
//! - Executing the engine as a blocking external process
//! - Parsing output files into a native [`Results`] mapping
//!
//! # Interface design
//!
//! The [`Engine`] trait defines the contract every engine implements. An
//! engine receives the explicit [`RunContext`] of the calculation — it never
//! inspects or changes the process working directory. External engines run
//! with `Command::current_dir(work_dir)` so that all intermediate files land
//! in the scratch sandbox.
//!
//! # Error handling
//!
//! All operations return an [`EngineError`]:
//! - `Io`: file system errors (missing files, permission issues)
//! - `Calculation`: engine process execution failures (non-zero exit)
//! - `Parse`: output parsing errors (malformed or unexpected output)
//!
//! Failures propagate to the caller unmodified; there are no retries at this
//! layer.

use crate::calculator::{Parameters, Results};
use crate::runner::RunContext;
use crate::structure::{Structure, HARTREE_PER_BOHR_TO_EV_PER_ANGSTROM, HARTREE_TO_EV};
use crate::io;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// File system or I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// External engine execution failed
    #[error("calculation failed: {0}")]
    Calculation(String),
    /// Failed to parse engine output
    #[error("parse error: {0}")]
    Parse(String),
}

/// Type alias for engine operation results
pub type Result<T> = std::result::Result<T, EngineError>;

/// Contract implemented by every calculation engine.
///
/// `execute` is a single blocking computation: given a structure and the
/// execution context, it produces the engine's native results mapping. The
/// engine's exit status determines success; this layer adds no retries and
/// no timeouts.
pub trait Engine {
    /// Short engine identifier (e.g. "orca", "xtb", "lj").
    fn name(&self) -> &'static str;

    /// Flattened input parameters for the summary record's parameter block.
    fn parameters(&self) -> Parameters;

    /// Run one computation for `structure` inside `ctx.work_dir`.
    ///
    /// `label` prefixes every file the engine writes, so several jobs can
    /// share a directory without clobbering each other.
    fn execute(&self, label: &str, structure: &Structure, ctx: &RunContext) -> Result<Results>;
}

/// In-process Lennard-Jones pair potential.
///
/// An analytic stand-in engine: energies and forces are computed directly
/// from the truncated, energy-shifted 12-6 potential without touching the
/// filesystem. Used to exercise the execution primitive and the drivers in
/// tests, and as the reference implementation of the [`Engine`] contract.
#[derive(Debug, Clone)]
pub struct LennardJones {
    /// Well depth in eV
    pub epsilon: f64,
    /// Zero-crossing distance in Angstrom
    pub sigma: f64,
    /// Cutoff radius in Angstrom
    pub rc: f64,
}

impl Default for LennardJones {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            sigma: 1.0,
            rc: 3.0,
        }
    }
}

impl LennardJones {
    /// Create a potential with an explicit cutoff of `3 * sigma`.
    pub fn new(epsilon: f64, sigma: f64) -> Self {
        Self {
            epsilon,
            sigma,
            rc: 3.0 * sigma,
        }
    }
}

impl Engine for LennardJones {
    fn name(&self) -> &'static str {
        "lj"
    }

    fn parameters(&self) -> Parameters {
        BTreeMap::from([
            ("epsilon".to_string(), json!(self.epsilon)),
            ("sigma".to_string(), json!(self.sigma)),
            ("rc".to_string(), json!(self.rc)),
        ])
    }

    fn execute(&self, _label: &str, structure: &Structure, _ctx: &RunContext) -> Result<Results> {
        let n = structure.len();
        let mut energy = 0.0;
        let mut forces = vec![0.0; 3 * n];

        // Energy shift keeps E continuous at the cutoff.
        let sr6_rc = (self.sigma / self.rc).powi(6);
        let e_shift = 4.0 * self.epsilon * (sr6_rc * sr6_rc - sr6_rc);

        for i in 0..n {
            let pi = structure.position(i);
            for j in (i + 1)..n {
                let pj = structure.position(j);
                let d = [pj[0] - pi[0], pj[1] - pi[1], pj[2] - pi[2]];
                let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
                if r2 > self.rc * self.rc {
                    continue;
                }
                let sr6 = (self.sigma * self.sigma / r2).powi(3);
                energy += 4.0 * self.epsilon * (sr6 * sr6 - sr6) - e_shift;
                // dE/dr * 1/r, applied along the pair vector
                let de = 24.0 * self.epsilon * (sr6 - 2.0 * sr6 * sr6) / r2;
                for k in 0..3 {
                    forces[3 * i + k] += de * d[k];
                    forces[3 * j + k] -= de * d[k];
                }
            }
        }

        Ok(Results {
            energy: Some(energy),
            forces: Some(forces),
            ..Results::default()
        })
    }
}

lazy_static! {
    // Robust floating-point regex: handles 1.23, -0.032, 1.2e-4, .123, etc.
    static ref FLOAT_RE: String = r"[-+]?(?:\d+\.\d*|\.\d+|\d+)(?:[eEdD][-+]?\d+)?".to_string();

    // ORCA: "FINAL SINGLE POINT ENERGY      -76.323456789012"
    static ref ORCA_ENERGY_RE: Regex = Regex::new(&format!(
        r"FINAL SINGLE POINT ENERGY\s+({0})",
        *FLOAT_RE
    )).unwrap();

    // xTB: "| TOTAL ENERGY               -5.070544024433 Eh   |"
    static ref XTB_ENERGY_RE: Regex = Regex::new(&format!(
        r"TOTAL ENERGY\s+({0})\s+Eh",
        *FLOAT_RE
    )).unwrap();

    // Bare float line, three per row in gradient blocks
    static ref TRIPLE_RE: Regex = Regex::new(&format!(
        r"^\s*({0})\s+({0})\s+({0})\s*$",
        *FLOAT_RE
    )).unwrap();
}

fn parse_float(s: &str) -> Result<f64> {
    // Fortran-style D exponents show up in Turbomole-format gradient files.
    s.replace(['D', 'd'], "E")
        .parse()
        .map_err(|_| EngineError::Parse(format!("invalid float: {s}")))
}

/// ORCA external engine.
///
/// Writes `<label>.inp`, launches the `orca` executable with the scratch
/// working directory as its current directory, and reads the energy and
/// Cartesian gradient back from the `.engrad` file the ENGRAD keyword
/// produces. The main `.out` log is kept for the summarization layer.
#[derive(Debug, Clone)]
pub struct Orca {
    /// ORCA executable (e.g. "orca", "/path/to/orca")
    pub command: String,
    /// Simple input line keywords (method, basis set, ENGRAD)
    pub keywords: String,
    /// Total charge
    pub charge: i32,
    /// Spin multiplicity
    pub mult: u32,
    /// Number of parallel processes
    pub nprocs: usize,
}

impl Default for Orca {
    fn default() -> Self {
        Self {
            command: "orca".to_string(),
            keywords: "B3LYP def2-SVP ENGRAD".to_string(),
            charge: 0,
            mult: 1,
            nprocs: 1,
        }
    }
}

impl Orca {
    fn write_input(&self, label: &str, structure: &Structure, dir: &Path) -> Result<()> {
        let mut content = format!("! {}\n", self.keywords);
        if self.nprocs > 1 {
            content.push_str(&format!("%pal nprocs {} end\n", self.nprocs));
        }
        content.push_str(&format!("* xyz {} {}\n", self.charge, self.mult));
        for i in 0..structure.len() {
            let p = structure.position(i);
            content.push_str(&format!(
                "{}  {:.8}  {:.8}  {:.8}\n",
                structure.symbols[i], p[0], p[1], p[2]
            ));
        }
        content.push_str("*\n");
        fs::write(dir.join(format!("{label}.inp")), content)?;
        Ok(())
    }

    /// Parse an ORCA `.engrad` file: atom count, energy, then the flat
    /// gradient, each after a `#`-delimited comment block.
    fn read_engrad(path: &Path) -> Result<(f64, Vec<f64>)> {
        let content = fs::read_to_string(path)?;
        let values: Vec<f64> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .take_while(|l| TRIPLE_RE.is_match(l) || l.split_whitespace().count() == 1)
            .flat_map(|l| l.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .map(|t| parse_float(&t))
            .collect::<Result<_>>()?;
        if values.len() < 2 {
            return Err(EngineError::Parse(format!(
                "engrad file too short: {}",
                path.display()
            )));
        }
        let natoms = values[0] as usize;
        let energy = values[1];
        let gradient: Vec<f64> = values[2..].to_vec();
        if gradient.len() != 3 * natoms {
            return Err(EngineError::Parse(format!(
                "expected {} gradient components, got {}",
                3 * natoms,
                gradient.len()
            )));
        }
        Ok((energy, gradient))
    }
}

impl Engine for Orca {
    fn name(&self) -> &'static str {
        "orca"
    }

    fn parameters(&self) -> Parameters {
        BTreeMap::from([
            ("keywords".to_string(), json!(self.keywords)),
            ("charge".to_string(), json!(self.charge)),
            ("mult".to_string(), json!(self.mult)),
            ("nprocs".to_string(), json!(self.nprocs)),
        ])
    }

    fn execute(&self, label: &str, structure: &Structure, ctx: &RunContext) -> Result<Results> {
        self.write_input(label, structure, &ctx.work_dir)?;

        let out_path = ctx.work_dir.join(format!("{label}.out"));
        let out_file = fs::File::create(&out_path)?;
        debug!("launching {} in {}", self.command, ctx.work_dir.display());
        let status = Command::new(&self.command)
            .arg(format!("{label}.inp"))
            .current_dir(&ctx.work_dir)
            .stdout(Stdio::from(out_file))
            .status()?;
        if !status.success() {
            return Err(EngineError::Calculation(format!(
                "orca exited with {status}"
            )));
        }

        let (energy_ha, gradient) = Self::read_engrad(&ctx.work_dir.join(format!("{label}.engrad")))?;
        let forces: Vec<f64> = gradient
            .iter()
            .map(|g| -g * HARTREE_PER_BOHR_TO_EV_PER_ANGSTROM)
            .collect();

        Ok(Results {
            energy: Some(energy_ha * HARTREE_TO_EV),
            forces: Some(forces),
            ..Results::default()
        })
    }
}

/// xTB external engine (tblite-style semi-empirical methods).
///
/// Writes `<label>.xyz`, launches `xtb` with `--grad`, and parses the total
/// energy from the log plus the Cartesian gradient from the Turbomole-format
/// `gradient` file.
#[derive(Debug, Clone)]
pub struct Xtb {
    /// xTB executable
    pub command: String,
    /// Hamiltonian method (GFN0-xTB, GFN1-xTB, GFN2-xTB)
    pub method: String,
    /// Total charge
    pub charge: i32,
    /// Number of unpaired electrons
    pub uhf: u32,
}

impl Default for Xtb {
    fn default() -> Self {
        Self {
            command: "xtb".to_string(),
            method: "GFN2-xTB".to_string(),
            charge: 0,
            uhf: 0,
        }
    }
}

impl Xtb {
    fn gfn_level(&self) -> &str {
        match self.method.as_str() {
            "GFN0-xTB" => "0",
            "GFN1-xTB" => "1",
            _ => "2",
        }
    }

    /// Parse a Turbomole-format `gradient` file: rows of three floats after
    /// the `$grad` cycle header, following the coordinate rows.
    fn read_gradient(path: &Path, natoms: usize) -> Result<Vec<f64>> {
        let content = fs::read_to_string(path)?;
        let mut rows: Vec<[f64; 3]> = Vec::new();
        for line in content.lines() {
            if let Some(caps) = TRIPLE_RE.captures(line) {
                rows.push([
                    parse_float(&caps[1])?,
                    parse_float(&caps[2])?,
                    parse_float(&caps[3])?,
                ]);
            }
        }
        // Coordinate rows precede gradient rows; the gradient is the last N.
        if rows.len() < natoms {
            return Err(EngineError::Parse(format!(
                "gradient file has {} rows, need {natoms}",
                rows.len()
            )));
        }
        Ok(rows[rows.len() - natoms..]
            .iter()
            .flat_map(|r| r.iter().copied())
            .collect())
    }
}

impl Engine for Xtb {
    fn name(&self) -> &'static str {
        "xtb"
    }

    fn parameters(&self) -> Parameters {
        BTreeMap::from([
            ("method".to_string(), json!(self.method)),
            ("charge".to_string(), json!(self.charge)),
            ("uhf".to_string(), json!(self.uhf)),
        ])
    }

    fn execute(&self, label: &str, structure: &Structure, ctx: &RunContext) -> Result<Results> {
        let xyz = ctx.work_dir.join(format!("{label}.xyz"));
        io::write_xyz(&structure.symbols, &structure.positions, &xyz)?;

        let out_path = ctx.work_dir.join(format!("{label}.out"));
        let out_file = fs::File::create(&out_path)?;
        debug!("launching {} in {}", self.command, ctx.work_dir.display());
        let status = Command::new(&self.command)
            .arg(format!("{label}.xyz"))
            .arg("--gfn")
            .arg(self.gfn_level())
            .arg("--grad")
            .arg("--chrg")
            .arg(self.charge.to_string())
            .arg("--uhf")
            .arg(self.uhf.to_string())
            .current_dir(&ctx.work_dir)
            .stdout(Stdio::from(out_file))
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(EngineError::Calculation(format!("xtb exited with {status}")));
        }

        let log = fs::read_to_string(&out_path)?;
        let energy_ha = XTB_ENERGY_RE
            .captures(&log)
            .map(|c| parse_float(&c[1]))
            .transpose()?
            .ok_or_else(|| EngineError::Parse("no TOTAL ENERGY in xtb log".to_string()))?;

        let gradient = Self::read_gradient(&ctx.work_dir.join("gradient"), structure.len())?;
        let forces: Vec<f64> = gradient
            .iter()
            .map(|g| -g * HARTREE_PER_BOHR_TO_EV_PER_ANGSTROM)
            .collect();

        Ok(Results {
            energy: Some(energy_ha * HARTREE_TO_EV),
            forces: Some(forces),
            ..Results::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunContext;
    use std::path::PathBuf;

    fn dummy_ctx() -> RunContext {
        RunContext {
            run_dir: PathBuf::from("."),
            work_dir: PathBuf::from("."),
        }
    }

    #[test]
    fn test_lj_dimer_at_minimum() {
        // The 12-6 minimum sits at r = 2^(1/6) sigma with E = -epsilon
        // (up to the cutoff shift).
        let r_min = 2.0_f64.powf(1.0 / 6.0);
        let dimer = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0]), ("Ar", [0.0, 0.0, r_min])]);
        let lj = LennardJones::default();
        let results = lj.execute("test", &dimer, &dummy_ctx()).unwrap();

        let forces = results.forces.unwrap();
        for f in &forces {
            assert!(f.abs() < 1e-10, "nonzero force at the minimum: {f}");
        }
        let sr6_rc = (1.0_f64 / 3.0).powi(6);
        let e_shift = 4.0 * (sr6_rc * sr6_rc - sr6_rc);
        assert!((results.energy.unwrap() - (-1.0 - e_shift)).abs() < 1e-10);
    }

    #[test]
    fn test_lj_forces_match_numerical_gradient() {
        let dimer = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0]), ("Ar", [0.0, 0.1, 1.3])]);
        let lj = LennardJones::default();
        let results = lj.execute("test", &dimer, &dummy_ctx()).unwrap();
        let forces = results.forces.unwrap();

        let h = 1e-6;
        for dof in 0..6 {
            let mut plus = dimer.clone();
            plus.positions[dof] += h;
            let mut minus = dimer.clone();
            minus.positions[dof] -= h;
            let ep = lj.execute("test", &plus, &dummy_ctx()).unwrap().energy.unwrap();
            let em = lj.execute("test", &minus, &dummy_ctx()).unwrap().energy.unwrap();
            let numeric = -(ep - em) / (2.0 * h);
            assert!(
                (forces[dof] - numeric).abs() < 1e-5,
                "dof {dof}: analytic {} vs numeric {numeric}",
                forces[dof]
            );
        }
    }

    #[test]
    fn test_parse_float_fortran_exponent() {
        assert!((parse_float("-0.123D-02").unwrap() - (-0.00123)).abs() < 1e-12);
        assert!((parse_float("1.5e3").unwrap() - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_read_engrad() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.engrad");
        fs::write(
            &path,
            "#\n# Number of atoms\n#\n2\n#\n# Current total energy in Eh\n#\n-1.123456\n#\n# The gradient in Eh/bohr\n#\n0.001\n-0.002\n0.003\n-0.001\n0.002\n-0.003\n",
        )
        .unwrap();
        let (energy, gradient) = Orca::read_engrad(&path).unwrap();
        assert!((energy - (-1.123456)).abs() < 1e-12);
        assert_eq!(gradient.len(), 6);
        assert!((gradient[5] - (-0.003)).abs() < 1e-12);
    }
}
