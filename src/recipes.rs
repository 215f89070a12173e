//! Job recipes: the `make(...)` surface an external workflow engine calls.
//!
//! Each job consumes a [`Structure`] with an attached calculator, drives the
//! matching core component, and returns the database-ready summary record
//! labeled with the job's `name`. Orchestration concerns (scheduling,
//! retries, persistence of the returned record) belong to the caller.

use crate::optimize::{run_opt, OptConfig};
use crate::runner::{run_calc, RunConfig, RunError};
use crate::schemas::{summarize_run, SchemaError, Summary, SummarizeOptions};
use crate::structure::Structure;
use crate::thermo::{ideal_gas_thermo, ThermoConfig, ThermoError};
use crate::vibrations::{run_vib, VibConfig};
use serde_json::json;
use thiserror::Error;

/// Error type for job recipes.
#[derive(Error, Debug)]
pub enum JobError {
    /// Execution primitive or driver failure
    #[error(transparent)]
    Run(#[from] RunError),
    /// Result normalization failure
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Thermochemistry post-processing failure
    #[error(transparent)]
    Thermo(#[from] ThermoError),
}

/// Type alias for job results
pub type Result<T> = std::result::Result<T, JobError>;

/// Single-point calculation job.
#[derive(Debug, Clone)]
pub struct StaticJob {
    /// Name stored in the summary record
    pub name: String,
    /// Working-directory policy
    pub run: RunConfig,
}

impl Default for StaticJob {
    fn default() -> Self {
        Self {
            name: "static".to_string(),
            run: RunConfig::default(),
        }
    }
}

impl StaticJob {
    /// Make the run: execute once and summarize.
    pub fn make(&self, structure: Structure) -> Result<Summary> {
        let structure = run_calc(structure, &self.run)?;
        let opts = SummarizeOptions {
            name: Some(self.name.clone()),
            ..SummarizeOptions::default()
        };
        Ok(summarize_run(structure, &opts)?)
    }
}

/// Geometry relaxation job.
#[derive(Debug, Clone)]
pub struct RelaxJob {
    /// Name stored in the summary record
    pub name: String,
    /// Optimization parameters
    pub opt: OptConfig,
    /// Working-directory policy
    pub run: RunConfig,
}

impl Default for RelaxJob {
    fn default() -> Self {
        Self {
            name: "relax".to_string(),
            opt: OptConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl RelaxJob {
    /// Make the run: relax to the force threshold and summarize the
    /// terminal frame.
    ///
    /// A non-converged trajectory is summarized all the same; the record's
    /// `converged` field carries the distinction for quality filtering.
    pub fn make(&self, structure: Structure) -> Result<Summary> {
        let trajectory = run_opt(structure, &self.opt, &self.run)?;
        let converged = trajectory.is_converged(self.opt.fmax);
        let nsteps = trajectory.len().saturating_sub(1);
        let Some(terminal) = trajectory.into_final_structure() else {
            return Err(JobError::Run(RunError::EmptyResults));
        };

        let opts = SummarizeOptions {
            name: Some(self.name.clone()),
            additional_fields: Summary::from_iter([
                ("converged".to_string(), json!(converged)),
                ("nsteps".to_string(), json!(nsteps)),
            ]),
            ..SummarizeOptions::default()
        };
        Ok(summarize_run(terminal, &opts)?)
    }
}

/// Vibrational analysis plus ideal-gas thermochemistry job.
#[derive(Debug, Clone)]
pub struct FreqJob {
    /// Name stored in the summary record
    pub name: String,
    /// Finite-difference parameters
    pub vib: VibConfig,
    /// Thermochemistry conditions
    pub thermo: ThermoConfig,
    /// Working-directory policy
    pub run: RunConfig,
}

impl Default for FreqJob {
    fn default() -> Self {
        Self {
            name: "freq".to_string(),
            vib: VibConfig::default(),
            thermo: ThermoConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl FreqJob {
    /// Make the run: displace, diagonalize, and post-process into the
    /// thermochemistry record.
    pub fn make(&self, structure: Structure) -> Result<Summary> {
        let vibrations = run_vib(structure, &self.vib, &self.run)?;
        let config = ThermoConfig {
            name: self.name.clone(),
            ..self.thermo.clone()
        };
        Ok(ideal_gas_thermo(
            &vibrations.structure,
            &vibrations.frequencies,
            &config,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::Calc;
    use crate::engine::LennardJones;
    use std::path::PathBuf;

    fn dimer(r: f64) -> Structure {
        let mut s = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0]), ("Ar", [0.0, 0.0, r])]);
        s.calc = Some(Calc::new("ar2", LennardJones::default()));
        s
    }

    fn run_config(dir: &tempfile::TempDir) -> RunConfig {
        RunConfig {
            run_dir: Some(PathBuf::from(dir.path())),
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_static_job_record() {
        let dir = tempfile::tempdir().unwrap();
        let job = StaticJob {
            name: "lj-static".to_string(),
            run: run_config(&dir),
        };
        let record = job.make(dimer(1.2)).unwrap();
        assert_eq!(record["name"], json!("lj-static"));
        assert!(record["results"]["energy"].is_f64());
    }

    #[test]
    fn test_relax_job_reports_convergence() {
        let dir = tempfile::tempdir().unwrap();
        let job = RelaxJob {
            name: "lj-relax".to_string(),
            run: run_config(&dir),
            ..RelaxJob::default()
        };
        let record = job.make(dimer(1.3)).unwrap();
        assert_eq!(record["converged"], json!(true));
        assert!(record["nsteps"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_freq_job_record() {
        let dir = tempfile::tempdir().unwrap();
        let job = FreqJob {
            name: "lj-freq".to_string(),
            run: run_config(&dir),
            ..FreqJob::default()
        };
        let record = job.make(dimer(1.122462048309373)).unwrap();
        assert_eq!(record["name"], json!("lj-freq"));
        let results = record["results"].as_object().unwrap();
        assert_eq!(results["geometry"], json!("linear"));
        assert_eq!(results["frequencies"].as_array().unwrap().len(), 6);
        assert_eq!(results["n_imag"], json!(0));
    }
}
