//! Universal engine-output parsing.
//!
//! A format-sniffing parser over the raw output logs of the supported
//! external engines. Given a path (optionally gzip-compressed), it detects
//! which package produced the file and extracts a uniform set of parsed
//! attributes plus package metadata for the summarization layer.
//!
//! The parsed attributes use engine-agnostic names and eV-based units:
//! `energy`, `homo_lumo_gap`, `dipole_moment`, `charges`. Metadata records
//! the detected `package`, its `version` when printed, and whether the run
//! terminated normally under `success`.

use crate::io;
use crate::structure::HARTREE_TO_EV;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for output parsing.
#[derive(Error, Debug)]
pub enum OutputError {
    /// Could not read the output file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// File does not look like any supported engine's output
    #[error("unrecognized output format: {0}")]
    Unrecognized(PathBuf),
    /// Recognized format, but a required quantity is missing or malformed
    #[error("parse error: {0}")]
    Parse(String),
}

/// Type alias for parsing results
pub type Result<T> = std::result::Result<T, OutputError>;

/// Attributes and metadata extracted from one engine output file.
#[derive(Debug, Clone)]
pub struct ParsedOutput {
    /// Engine-agnostic parsed quantities
    pub attributes: Map<String, Value>,
    /// Package name, version, and termination status
    pub metadata: Map<String, Value>,
}

lazy_static! {
    static ref FLOAT_RE: String = r"[-+]?(?:\d+\.\d*|\.\d+|\d+)(?:[eE][-+]?\d+)?".to_string();

    static ref ORCA_FINAL_ENERGY_RE: Regex =
        Regex::new(&format!(r"FINAL SINGLE POINT ENERGY\s+({0})", *FLOAT_RE)).unwrap();
    static ref ORCA_VERSION_RE: Regex =
        Regex::new(r"Program Version\s+(\S+)").unwrap();
    static ref ORCA_DIPOLE_RE: Regex =
        Regex::new(&format!(r"Magnitude \(Debye\)\s*:\s*({0})", *FLOAT_RE)).unwrap();
    // Mulliken block rows: "   0 O :   -0.123456"
    static ref ORCA_CHARGE_RE: Regex =
        Regex::new(&format!(r"^\s*\d+\s+[A-Za-z]+\s*:\s*({0})\s*$", *FLOAT_RE)).unwrap();

    static ref XTB_ENERGY_RE: Regex =
        Regex::new(&format!(r"TOTAL ENERGY\s+({0})\s+Eh", *FLOAT_RE)).unwrap();
    static ref XTB_GAP_RE: Regex =
        Regex::new(&format!(r"HOMO-LUMO GAP\s+({0})\s+eV", *FLOAT_RE)).unwrap();
    static ref XTB_VERSION_RE: Regex =
        Regex::new(r"xtb version\s+(\S+)").unwrap();
}

/// Parse an engine output file into attributes and metadata.
///
/// Gzipped files (`*.gz`) are decompressed transparently. The parser sniffs
/// the producing package from the log banner; an unknown banner is an
/// [`OutputError::Unrecognized`] naming the offending path.
pub fn parse_output(path: &Path) -> Result<ParsedOutput> {
    let content = read_maybe_gzipped(path)?;
    if content.contains("O   R   C   A") {
        parse_orca(&content)
    } else if content.contains("x T B") || content.contains("xtb version") {
        parse_xtb(&content)
    } else {
        Err(OutputError::Unrecognized(path.to_path_buf()))
    }
}

fn read_maybe_gzipped(path: &Path) -> Result<String> {
    if path.extension().is_some_and(|e| e == "gz") {
        let temp = tempfile::NamedTempFile::new()?;
        io::gunzip_file(path, temp.path())?;
        Ok(fs::read_to_string(temp.path())?)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn capture_f64(re: &Regex, content: &str) -> Option<f64> {
    // The last occurrence wins: iterative engines print the quantity once
    // per cycle.
    re.captures_iter(content)
        .last()
        .and_then(|c| c[1].parse().ok())
}

fn parse_orca(content: &str) -> Result<ParsedOutput> {
    let energy_ha = capture_f64(&ORCA_FINAL_ENERGY_RE, content)
        .ok_or_else(|| OutputError::Parse("no FINAL SINGLE POINT ENERGY in ORCA log".into()))?;

    let mut attributes = Map::new();
    attributes.insert("energy".into(), json!(energy_ha * HARTREE_TO_EV));
    if let Some(dipole) = capture_f64(&ORCA_DIPOLE_RE, content) {
        attributes.insert("dipole_moment".into(), json!(dipole));
    }
    if let Some(charges) = parse_orca_charges(content) {
        attributes.insert("charges".into(), json!(charges));
    }

    let mut metadata = Map::new();
    metadata.insert("package".into(), json!("ORCA"));
    if let Some(caps) = ORCA_VERSION_RE.captures(content) {
        metadata.insert("version".into(), json!(caps[1].to_string()));
    }
    metadata.insert(
        "success".into(),
        json!(content.contains("ORCA TERMINATED NORMALLY")),
    );

    Ok(ParsedOutput {
        attributes,
        metadata,
    })
}

fn parse_orca_charges(content: &str) -> Option<Vec<f64>> {
    let start = content.find("MULLIKEN ATOMIC CHARGES")?;
    let mut charges = Vec::new();
    for line in content[start..].lines().skip(2) {
        if let Some(caps) = ORCA_CHARGE_RE.captures(line) {
            charges.push(caps[1].parse().ok()?);
        } else {
            break;
        }
    }
    (!charges.is_empty()).then_some(charges)
}

fn parse_xtb(content: &str) -> Result<ParsedOutput> {
    let energy_ha = capture_f64(&XTB_ENERGY_RE, content)
        .ok_or_else(|| OutputError::Parse("no TOTAL ENERGY in xtb log".into()))?;

    let mut attributes = Map::new();
    attributes.insert("energy".into(), json!(energy_ha * HARTREE_TO_EV));
    if let Some(gap) = capture_f64(&XTB_GAP_RE, content) {
        attributes.insert("homo_lumo_gap".into(), json!(gap));
    }

    let mut metadata = Map::new();
    metadata.insert("package".into(), json!("xtb"));
    if let Some(caps) = XTB_VERSION_RE.captures(content) {
        metadata.insert("version".into(), json!(caps[1].to_string()));
    }
    metadata.insert(
        "success".into(),
        json!(content.contains("normal termination of xtb")),
    );

    Ok(ParsedOutput {
        attributes,
        metadata,
    })
}
