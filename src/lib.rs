#![deny(missing_docs)]

//! qcflow - Workflow layer for computational chemistry engines
//!
//! qcflow configures external ab-initio and semi-empirical calculation
//! engines (ORCA, xTB) as well as in-process potentials, launches them as
//! blocking external processes inside isolated scratch directories, and
//! normalizes their heterogeneous outputs into uniform, database-ready
//! records.
//!
//! # Overview
//!
//! The crate is organized around four cooperating pieces:
//!
//! 1. **Execution primitive** ([`runner`]): runs one calculation in a
//!    collision-safe scratch working directory, stages prerequisite files
//!    in, copies results back to the permanent run directory, and optionally
//!    gzip-compresses verbose engine logs to bound storage growth.
//! 2. **Iterative drivers** ([`optimize`], [`vibrations`]): geometry
//!    optimization to a force threshold (FIRE or BFGS steps) and
//!    finite-difference vibrational analysis, both sharing one scratch
//!    session across their many engine evaluations.
//! 3. **Thermochemistry post-processor** ([`thermo`], [`symmetry`]):
//!    ideal-gas rigid-rotor-harmonic-oscillator quantities from a
//!    vibrational spectrum, with imaginary-frequency bookkeeping, geometry
//!    classification, and Schoenflies point-group detection.
//! 4. **Result normalization** ([`schemas`], [`output`]): flat, JSON-safe
//!    summary records with a stable key set (`results`, `parameters`,
//!    `name`, structure-derived fields), sourced either from the
//!    calculator's native results or from a re-parse of the engine's raw
//!    output file.
//!
//! Data flows one direction: the caller supplies a [`Structure`] with an
//! attached [`Calc`] → the execution primitive populates results → drivers
//! repeat to convergence → the normalizer converts the final state into a
//! persisted record. Every stage consumes the structure by value and
//! returns an owned value.
//!
//! # Execution model
//!
//! Single-threaded, synchronous, blocking: each calculation step blocks the
//! caller until the external engine process exits. Concurrency belongs to
//! an external workflow engine running independent jobs with separate run
//! directories; nothing in this crate reads or mutates ambient process
//! state (no working-directory changes, no implicit global settings).
//! Failures propagate unmodified; the only guaranteed action on the error
//! path is scratch-directory cleanup.
//!
//! # Quick start
//!
//! ```no_run
//! use qcflow::calculator::Calc;
//! use qcflow::engine::Orca;
//! use qcflow::recipes::StaticJob;
//! use qcflow::structure::Structure;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut water = Structure::from_sites(&[
//!         ("O", [0.0, 0.0, 0.119262]),
//!         ("H", [0.0, 0.763239, -0.477047]),
//!         ("H", [0.0, -0.763239, -0.477047]),
//!     ]);
//!     water.calc = Some(Calc::new("water-sp", Orca::default()));
//!
//!     let record = StaticJob::default().make(water)?;
//!     println!("energy: {}", record["results"]["energy"]);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`structure`] - Atomic structure value type and element data
//! - [`calculator`] - Calculator binding and native results mapping
//! - [`engine`] - Engine trait plus ORCA / xTB / Lennard-Jones engines
//! - [`runner`] - Scratch-isolated execution primitive
//! - [`optimize`] - Geometry optimization driver
//! - [`vibrations`] - Finite-difference vibrational analysis driver
//! - [`thermo`] - Ideal-gas thermochemistry post-processor
//! - [`symmetry`] - Geometry classes and point-group detection
//! - [`schemas`] - Summary-record normalization
//! - [`output`] - Universal engine-output parser
//! - [`settings`] - INI-format user settings
//! - [`recipes`] - Job makers for external workflow engines
//! - [`io`] - XYZ and gzip file helpers

pub mod calculator;
pub mod engine;
pub mod io;
pub mod optimize;
pub mod output;
pub mod recipes;
pub mod runner;
pub mod schemas;
pub mod settings;
pub mod structure;
pub mod symmetry;
pub mod thermo;
pub mod vibrations;

pub use calculator::Calc;
pub use structure::Structure;
