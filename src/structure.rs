//! Atomic structure representation for calculation workflows.
//!
//! This module provides the fundamental data type threaded through every
//! stage of a calculation: [`Structure`], a collection of atomic sites with
//! element symbols, Cartesian positions, initial magnetic moments and
//! charges, plus an optional attached [`Calc`](crate::calculator::Calc).
//!
//! Coordinates are stored as a single flat vector in the order
//! [x1, y1, z1, x2, y2, z2, ...] for direct use with nalgebra in the
//! optimization and vibrational drivers.
//!
//! # Units
//!
//! - Positions: Angstrom
//! - Energies: eV
//! - Forces: eV/Angstrom
//!
//! # Ownership convention
//!
//! Pipeline stages (execution, optimization, summarization) consume a
//! `Structure` by value and return an owned value; no stage holds a
//! reference after handing the structure to the next stage.

use crate::calculator::Calc;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Unit conversion constant: Bohr to Angstrom
pub const BOHR_TO_ANGSTROM: f64 = 0.529177210903;
/// Unit conversion constant: Hartree to eV
pub const HARTREE_TO_EV: f64 = 27.211386245988;
/// Unit conversion constant: Hartree/Bohr to eV/Angstrom
pub const HARTREE_PER_BOHR_TO_EV_PER_ANGSTROM: f64 = HARTREE_TO_EV / BOHR_TO_ANGSTROM;

/// Error raised when an element symbol has no tabulated atomic mass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown element symbol: {0}")]
pub struct UnknownElement(pub String);

/// Bookkeeping attached to a structure across calculation cycles.
///
/// The unique id distinguishes a post-calculation structure from its
/// pre-calculation counterpart in storage; superseded ids are retained in
/// `old_ids` so lineage can be reconstructed from a results database.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructureInfo {
    /// Unique content-derived identifier, assigned by [`Structure::prep_next_run`]
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Identifiers this structure carried before previous calculations
    #[serde(rename = "_old_ids", skip_serializing_if = "Vec::is_empty", default)]
    pub old_ids: Vec<String>,
}

/// A collection of atomic sites with an optional attached calculator.
///
/// `Structure` is the value every workflow stage operates on. The execution
/// primitive populates the attached calculator's results, the drivers
/// re-evaluate it per step, and the normalizer reads it into a summary
/// record (optionally resetting its calculation state via
/// [`prep_next_run`](Structure::prep_next_run)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Structure {
    /// Chemical element symbols for each site in order
    pub symbols: Vec<String>,
    /// Flattened Cartesian positions [x1, y1, z1, ...] in Angstrom
    pub positions: DVector<f64>,
    /// Initial (input) magnetic moment per site
    pub initial_magmoms: Vec<f64>,
    /// Initial (input) charge per site
    pub initial_charges: Vec<f64>,
    /// Identifier bookkeeping
    #[serde(default)]
    pub info: StructureInfo,
    /// Attached calculator, if any
    #[serde(skip)]
    pub calc: Option<Calc>,
}

impl Structure {
    /// Create a new `Structure` from element symbols and flat coordinates.
    ///
    /// Initial magnetic moments and charges are zeroed.
    ///
    /// # Panics
    ///
    /// Panics if `positions.len() != symbols.len() * 3`.
    pub fn new(symbols: Vec<String>, positions: Vec<f64>) -> Self {
        let n = symbols.len();
        assert_eq!(positions.len(), n * 3);
        Self {
            symbols,
            positions: DVector::from_vec(positions),
            initial_magmoms: vec![0.0; n],
            initial_charges: vec![0.0; n],
            info: StructureInfo::default(),
            calc: None,
        }
    }

    /// Convenience constructor from `&str` symbols and per-atom coordinates.
    pub fn from_sites(sites: &[(&str, [f64; 3])]) -> Self {
        let symbols = sites.iter().map(|(s, _)| s.to_string()).collect();
        let positions = sites.iter().flat_map(|(_, p)| p.iter().copied()).collect();
        Self::new(symbols, positions)
    }

    /// Number of atomic sites.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True if the structure has no sites.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Cartesian position of one site.
    pub fn position(&self, site: usize) -> [f64; 3] {
        let i = site * 3;
        [self.positions[i], self.positions[i + 1], self.positions[i + 2]]
    }

    /// Overwrite the Cartesian position of one site.
    pub fn set_position(&mut self, site: usize, pos: [f64; 3]) {
        let i = site * 3;
        self.positions[i] = pos[0];
        self.positions[i + 1] = pos[1];
        self.positions[i + 2] = pos[2];
    }

    /// Atomic masses in amu, in site order.
    pub fn masses(&self) -> Result<Vec<f64>, UnknownElement> {
        self.symbols
            .iter()
            .map(|s| atomic_mass(s).ok_or_else(|| UnknownElement(s.clone())))
            .collect()
    }

    /// Total mass in amu.
    pub fn total_mass(&self) -> Result<f64, UnknownElement> {
        Ok(self.masses()?.iter().sum())
    }

    /// Mass-weighted center of mass in Angstrom.
    pub fn center_of_mass(&self) -> Result<[f64; 3], UnknownElement> {
        let masses = self.masses()?;
        let total: f64 = masses.iter().sum();
        let mut com = [0.0; 3];
        for (i, m) in masses.iter().enumerate() {
            let p = self.position(i);
            for k in 0..3 {
                com[k] += m * p[k];
            }
        }
        for c in &mut com {
            *c /= total;
        }
        Ok(com)
    }

    /// Element counts keyed by symbol.
    pub fn composition(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for s in &self.symbols {
            *counts.entry(s.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Hill-convention chemical formula (C first, then H, then alphabetical).
    pub fn formula(&self) -> String {
        let counts = self.composition();
        let mut formula = String::new();
        let mut push = |symbol: &str, count: usize| {
            formula.push_str(symbol);
            if count > 1 {
                formula.push_str(&count.to_string());
            }
        };
        if let Some(&c) = counts.get("C") {
            push("C", c);
            if let Some(&h) = counts.get("H") {
                push("H", h);
            }
            for (s, &c) in &counts {
                if s != "C" && s != "H" {
                    push(s, c);
                }
            }
        } else {
            for (s, &c) in &counts {
                push(s, c);
            }
        }
        formula
    }

    /// Content-derived identifier over sites, positions, magmoms and charges.
    ///
    /// The info block and any attached calculator are excluded so that the
    /// id reflects only the physical state of the structure.
    pub fn structure_id(&self) -> String {
        let mut hasher = DefaultHasher::new();
        for s in &self.symbols {
            s.hash(&mut hasher);
        }
        for x in self.positions.iter() {
            x.to_bits().hash(&mut hasher);
        }
        for m in &self.initial_magmoms {
            m.to_bits().hash(&mut hasher);
        }
        for q in &self.initial_charges {
            q.to_bits().hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }

    /// Prepare the structure for its next calculation.
    ///
    /// Detaches the calculator, migrates any computed magnetic moments into
    /// the initial-magnetic-moment slot (a follow-up calculation seeded from
    /// this state then inherits the spin polarization; if the calculator ran
    /// but produced no magnetic moments the initial moments are zeroed,
    /// since a spin-unpolarized calculation was carried out), and assigns a
    /// fresh unique id, retiring the previous one into `old_ids`.
    ///
    /// The magmom migration happens before the calculator is discarded, and
    /// callers must invoke this at most once per calculation, before
    /// structure-derived summary fields are computed.
    pub fn prep_next_run(mut self) -> Self {
        if let Some(calc) = self.calc.take() {
            if calc.has_results() {
                match calc.results().magmoms.clone() {
                    Some(magmoms) => self.initial_magmoms = magmoms,
                    None => self.initial_magmoms = vec![0.0; self.len()],
                }
            }
        }
        if let Some(old) = self.info.id.take() {
            self.info.old_ids.push(old);
        }
        self.info.id = Some(self.structure_id());
        self
    }
}

/// Standard atomic mass in amu for an element symbol.
///
/// Covers H through Rn; returns `None` for anything heavier or unrecognized.
pub fn atomic_mass(symbol: &str) -> Option<f64> {
    let mass = match symbol {
        "H" => 1.008,
        "He" => 4.002602,
        "Li" => 6.94,
        "Be" => 9.0121831,
        "B" => 10.81,
        "C" => 12.011,
        "N" => 14.007,
        "O" => 15.999,
        "F" => 18.998403163,
        "Ne" => 20.1797,
        "Na" => 22.98976928,
        "Mg" => 24.305,
        "Al" => 26.9815385,
        "Si" => 28.085,
        "P" => 30.973761998,
        "S" => 32.06,
        "Cl" => 35.45,
        "Ar" => 39.948,
        "K" => 39.0983,
        "Ca" => 40.078,
        "Sc" => 44.955908,
        "Ti" => 47.867,
        "V" => 50.9415,
        "Cr" => 51.9961,
        "Mn" => 54.938044,
        "Fe" => 55.845,
        "Co" => 58.933194,
        "Ni" => 58.6934,
        "Cu" => 63.546,
        "Zn" => 65.38,
        "Ga" => 69.723,
        "Ge" => 72.63,
        "As" => 74.921595,
        "Se" => 78.971,
        "Br" => 79.904,
        "Kr" => 83.798,
        "Rb" => 85.4678,
        "Sr" => 87.62,
        "Y" => 88.90584,
        "Zr" => 91.224,
        "Nb" => 92.90637,
        "Mo" => 95.95,
        "Tc" => 98.0,
        "Ru" => 101.07,
        "Rh" => 102.9055,
        "Pd" => 106.42,
        "Ag" => 107.8682,
        "Cd" => 112.414,
        "In" => 114.818,
        "Sn" => 118.71,
        "Sb" => 121.76,
        "Te" => 127.6,
        "I" => 126.90447,
        "Xe" => 131.293,
        "Cs" => 132.90545196,
        "Ba" => 137.327,
        "La" => 138.90547,
        "Ce" => 140.116,
        "Pr" => 140.90766,
        "Nd" => 144.242,
        "Pm" => 145.0,
        "Sm" => 150.36,
        "Eu" => 151.964,
        "Gd" => 157.25,
        "Tb" => 158.92535,
        "Dy" => 162.5,
        "Ho" => 164.93033,
        "Er" => 167.259,
        "Tm" => 168.93422,
        "Yb" => 173.045,
        "Lu" => 174.9668,
        "Hf" => 178.49,
        "Ta" => 180.94788,
        "W" => 183.84,
        "Re" => 186.207,
        "Os" => 190.23,
        "Ir" => 192.217,
        "Pt" => 195.084,
        "Au" => 196.966569,
        "Hg" => 200.592,
        "Tl" => 204.38,
        "Pb" => 207.2,
        "Bi" => 208.9804,
        "Po" => 209.0,
        "At" => 210.0,
        "Rn" => 222.0,
        _ => return None,
    };
    Some(mass)
}
