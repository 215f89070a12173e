//! Scratch-isolated execution of a single calculation.
//!
//! This module provides the execution primitive every driver builds on:
//! run one engine computation inside an isolated scratch working directory,
//! stage prerequisite files in, copy results back to the permanent run
//! directory, and optionally compress large outputs.
//!
//! # Execution context
//!
//! The permanent run directory and the working directory are carried in an
//! explicit [`RunContext`] value threaded through every call. Nothing in this
//! crate changes the process working directory; external engines are launched
//! with their own current directory instead, so concurrent invocations with
//! separate run directories cannot interfere through ambient state.
//!
//! # Cleanup guarantees
//!
//! A [`ScratchSession`] owns the scratch working directory as a scoped
//! resource. When `clean_dir` is requested the directory is removed on every
//! exit path, including engine failure; when it is not, the directory is kept
//! on disk for forensic inspection. A failed invocation never performs the
//! result copy-back, so the permanent run directory is left exactly as it
//! was.

use crate::engine::EngineError;
use crate::io;
use crate::structure::{Structure, UnknownElement};
use log::{debug, info};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};
use thiserror::Error;

/// Error type for the execution primitive and the drivers built on it.
#[derive(Error, Debug)]
pub enum RunError {
    /// Structure has no attached calculator (configuration error; raised
    /// before any filesystem mutation)
    #[error("structure has no attached calculator")]
    NoCalculator,
    /// Engine reported success but its results mapping is empty
    #[error("calculation produced no results")]
    EmptyResults,
    /// Engine results carry no forces, but the driver needs them
    #[error("calculation produced no forces")]
    MissingForces,
    /// A site's element has no tabulated mass
    #[error(transparent)]
    UnknownElement(#[from] UnknownElement),
    /// File staging or copy-back failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Engine execution or output parsing failed
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Type alias for execution results
pub type Result<T> = std::result::Result<T, RunError>;

/// Working-directory policy for one invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Permanent run directory. `None` means the process current directory
    /// at invocation time.
    pub run_dir: Option<PathBuf>,
    /// Root under which a uniquely-named scratch working directory is
    /// created. `None` executes directly in the run directory.
    pub scratch_dir: Option<PathBuf>,
    /// Gzip-compress files on copy-back; the uncompressed namesake in the
    /// run directory is removed so the artifact exists only compressed.
    pub gzip: bool,
    /// Files to stage from the run directory into the scratch directory.
    /// A gzipped namesake (`name.gz`) is staged decompressed.
    pub copy_files: BTreeSet<String>,
    /// Remove the scratch working directory when the session ends.
    pub clean_dir: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_dir: None,
            scratch_dir: None,
            gzip: false,
            copy_files: BTreeSet::new(),
            clean_dir: true,
        }
    }
}

impl RunConfig {
    /// Resolve the permanent run directory for this invocation.
    pub fn resolve_run_dir(&self) -> std::io::Result<PathBuf> {
        match &self.run_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir(),
        }
    }
}

/// Explicit execution context handed to engines: where the permanent files
/// live and where this calculation is allowed to write.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Permanent run directory
    pub run_dir: PathBuf,
    /// Active working directory for this calculation
    pub work_dir: PathBuf,
}

/// Scoped scratch working directory for one or more engine invocations.
///
/// Created once per logical calculation (a single point, or a whole
/// optimization trajectory), staged on creation, copied back on
/// [`finalize`](ScratchSession::finalize).
pub struct ScratchSession {
    run_dir: PathBuf,
    scratch: Option<Scratch>,
    gzip: bool,
}

enum Scratch {
    /// Removed on drop, whether or not the run succeeded
    Cleaned(TempDir),
    /// Kept on disk for forensics
    Kept(PathBuf),
}

impl Scratch {
    fn path(&self) -> &Path {
        match self {
            Scratch::Cleaned(dir) => dir.path(),
            Scratch::Kept(path) => path,
        }
    }
}

impl ScratchSession {
    /// Create the session: make a collision-safe scratch subdirectory (if
    /// configured) and stage the requested files into it.
    pub fn create(run_dir: &Path, config: &RunConfig) -> Result<Self> {
        let scratch = match &config.scratch_dir {
            Some(root) => {
                fs::create_dir_all(root)?;
                let temp = Builder::new().prefix("qcflow-").tempdir_in(root)?;
                stage_files(run_dir, temp.path(), &config.copy_files)?;
                info!("scratch directory: {}", temp.path().display());
                if config.clean_dir {
                    Some(Scratch::Cleaned(temp))
                } else {
                    Some(Scratch::Kept(temp.keep()))
                }
            }
            None => None,
        };
        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            scratch,
            gzip: config.gzip,
        })
    }

    /// The execution context engines receive.
    pub fn context(&self) -> RunContext {
        RunContext {
            run_dir: self.run_dir.clone(),
            work_dir: self
                .scratch
                .as_ref()
                .map(|s| s.path().to_path_buf())
                .unwrap_or_else(|| self.run_dir.clone()),
        }
    }

    /// Copy everything in the working directory back to the run directory,
    /// overwriting namesakes, then release the scratch directory according
    /// to the cleanup policy.
    pub fn finalize(self) -> Result<()> {
        if let Some(scratch) = &self.scratch {
            copy_back(scratch.path(), &self.run_dir, self.gzip)?;
            if let Scratch::Kept(path) = scratch {
                info!("scratch directory kept: {}", path.display());
            }
        }
        Ok(())
    }
}

/// Stage `copy_files` from the run directory into the scratch directory,
/// decompressing gzipped namesakes on the way in.
fn stage_files(run_dir: &Path, work_dir: &Path, copy_files: &BTreeSet<String>) -> Result<()> {
    for name in copy_files {
        let src = run_dir.join(name);
        let dest = work_dir.join(name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if src.exists() {
            fs::copy(&src, &dest)?;
            debug!("staged {name}");
        } else {
            let gz = run_dir.join(format!("{name}.gz"));
            if gz.exists() {
                io::gunzip_file(&gz, &dest)?;
                debug!("staged {name} (decompressed)");
            }
        }
    }
    Ok(())
}

/// Copy the scratch directory's contents into the run directory. With `gzip`
/// every file is stored compressed as `name.gz` and an uncompressed namesake
/// in the run directory is removed; files already compressed are copied
/// as-is.
fn copy_back(work_dir: &Path, run_dir: &Path, gzip: bool) -> Result<()> {
    for entry in fs::read_dir(work_dir)? {
        let entry = entry?;
        let src = entry.path();
        let name = entry.file_name();
        if entry.file_type()?.is_dir() {
            let dest = run_dir.join(&name);
            fs::create_dir_all(&dest)?;
            copy_back(&src, &dest, gzip)?;
        } else if gzip && !name.to_string_lossy().ends_with(".gz") {
            let dest = run_dir.join(format!("{}.gz", name.to_string_lossy()));
            io::gzip_file(&src, &dest)?;
            let plain = run_dir.join(&name);
            if plain.exists() {
                fs::remove_file(&plain)?;
            }
            debug!("copied back {} (compressed)", name.to_string_lossy());
        } else {
            fs::copy(&src, run_dir.join(&name))?;
            debug!("copied back {}", name.to_string_lossy());
        }
    }
    Ok(())
}

/// Run one calculation in a scratch directory and copy the results back.
///
/// This is a wrapper around the attached calculator's compute trigger. The
/// structure is consumed and returned with `calc.results` populated; on any
/// failure the permanent run directory is left untouched by this invocation
/// (no partial copy-back).
///
/// # Errors
///
/// - [`RunError::NoCalculator`] if no calculator is attached — checked
///   before any filesystem mutation
/// - engine failures and staging/copy I/O failures, surfaced unmodified
/// - [`RunError::EmptyResults`] if the engine reported success with an
///   empty results mapping
pub fn run_calc(mut structure: Structure, config: &RunConfig) -> Result<Structure> {
    let Some(mut calc) = structure.calc.take() else {
        return Err(RunError::NoCalculator);
    };

    let run_dir = config.resolve_run_dir()?;
    let session = ScratchSession::create(&run_dir, config)?;
    let ctx = session.context();

    info!(
        "running {} ({}) in {}",
        calc.label(),
        calc.engine_name(),
        ctx.work_dir.display()
    );
    let run_result = calc.run(&structure, &ctx);
    let has_results = calc.has_results();
    structure.calc = Some(calc);
    run_result?;

    session.finalize()?;

    if !has_results {
        return Err(RunError::EmptyResults);
    }
    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::Calc;
    use crate::engine::LennardJones;

    fn dimer() -> Structure {
        let mut s =
            Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0]), ("Ar", [0.0, 0.0, 1.2])]);
        s.calc = Some(Calc::new("dimer", LennardJones::default()));
        s
    }

    #[test]
    fn test_run_calc_populates_results() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            run_dir: Some(dir.path().to_path_buf()),
            ..RunConfig::default()
        };
        let out = run_calc(dimer(), &config).unwrap();
        assert!(out.calc.unwrap().has_results());
    }

    #[test]
    fn test_run_calc_without_calculator_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let config = RunConfig {
            run_dir: Some(dir.path().to_path_buf()),
            scratch_dir: Some(scratch.clone()),
            ..RunConfig::default()
        };
        let bare = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0])]);
        let err = run_calc(bare, &config).unwrap_err();
        assert!(matches!(err, RunError::NoCalculator));
        // Fail-fast means the scratch root was never created.
        assert!(!scratch.exists());
    }

    #[test]
    fn test_scratch_session_stages_and_copies_back() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run");
        let scratch_root = dir.path().join("scratch");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join("seed.txt"), "seed").unwrap();

        let config = RunConfig {
            run_dir: Some(run_dir.clone()),
            scratch_dir: Some(scratch_root),
            copy_files: BTreeSet::from(["seed.txt".to_string()]),
            ..RunConfig::default()
        };
        let session = ScratchSession::create(&run_dir, &config).unwrap();
        let ctx = session.context();
        assert_ne!(ctx.work_dir, ctx.run_dir);
        assert!(ctx.work_dir.join("seed.txt").exists());

        fs::write(ctx.work_dir.join("result.log"), "output").unwrap();
        session.finalize().unwrap();
        assert_eq!(fs::read_to_string(run_dir.join("result.log")).unwrap(), "output");
    }

    #[test]
    fn test_copy_back_gzip_leaves_only_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run");
        let work_dir = dir.path().join("work");
        fs::create_dir_all(&run_dir).unwrap();
        fs::create_dir_all(&work_dir).unwrap();
        fs::write(run_dir.join("f.txt"), "data").unwrap();
        fs::write(work_dir.join("f.txt"), "data").unwrap();

        copy_back(&work_dir, &run_dir, true).unwrap();
        assert!(!run_dir.join("f.txt").exists());
        assert!(run_dir.join("f.txt.gz").exists());
    }

    #[test]
    fn test_gzipped_prerequisite_staged_decompressed() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run");
        let work_dir = dir.path().join("work");
        fs::create_dir_all(&run_dir).unwrap();
        fs::create_dir_all(&work_dir).unwrap();
        fs::write(run_dir.join("wave.dat"), "chk").unwrap();
        io::gzip_file(&run_dir.join("wave.dat"), &run_dir.join("wave.dat.gz")).unwrap();
        fs::remove_file(run_dir.join("wave.dat")).unwrap();

        stage_files(
            &run_dir,
            &work_dir,
            &BTreeSet::from(["wave.dat".to_string()]),
        )
        .unwrap();
        assert_eq!(fs::read_to_string(work_dir.join("wave.dat")).unwrap(), "chk");
    }
}
