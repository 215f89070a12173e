//! Result normalization into database-ready summary records.
//!
//! Converts a structure and its attached calculation results into a flat,
//! JSON-safe mapping with a stable key set: `results` (engine-native),
//! `parameters` (flattened calculator configuration), `name`, plus
//! structure-derived fields. Two source paths share the contract:
//!
//! - [`summarize_run`] reads the calculator's own native results mapping;
//! - [`summarize_output`] additionally re-parses the engine's raw output
//!   file with the universal parser in [`crate::output`], merging the parsed
//!   attributes and metadata into the record.
//!
//! Both paths validate the same preconditions in the same order: a
//! calculator must be attached, and its results must be non-empty. By
//! default the structure is then prepared for its next run (calculator
//! detached, final magnetic moments migrated to initial, fresh unique id)
//! before the structure-derived fields are computed, so the stored structure
//! block reflects the post-calculation state a follow-up job would start
//! from.

use crate::output::{self, OutputError};
use crate::structure::Structure;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A database-ready summary record.
pub type Summary = Map<String, Value>;

/// Error type for result normalization.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Structure has no attached calculator
    #[error("structure has no attached calculator")]
    NoCalculator,
    /// Attached calculator has an empty results mapping
    #[error("attached calculator has no results")]
    EmptyResults,
    /// Referenced engine output file does not exist
    #[error("output file not found: {0}")]
    OutputNotFound(PathBuf),
    /// Universal parser could not interpret the output file
    #[error("could not parse {path}: {source}")]
    Parse {
        /// Offending output file
        path: PathBuf,
        /// Parser failure
        #[source]
        source: OutputError,
    },
}

/// Type alias for normalization results
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Options shared by both summarization paths.
#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    /// Job label stored under `name`; defaults to the calculator label
    pub name: Option<String>,
    /// Prepare the structure for its next run before tabulating
    /// structure-derived fields
    pub prep_next_run: bool,
    /// Extra fields merged into the record last, overriding namesakes
    pub additional_fields: Summary,
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        Self {
            name: None,
            prep_next_run: true,
            additional_fields: Summary::new(),
        }
    }
}

/// Tabulated properties of the structure itself.
///
/// These are the structure-derived fields every summary record carries:
/// site count, Hill formula, per-element composition, the full site data
/// under `atoms`, and the id bookkeeping under `atoms_info`.
pub fn atoms_to_metadata(structure: &Structure) -> Summary {
    let mut atoms = Summary::new();
    atoms.insert("symbols".into(), json!(structure.symbols));
    let positions: Vec<Value> = (0..structure.len())
        .map(|i| json!(structure.position(i)))
        .collect();
    atoms.insert("positions".into(), Value::Array(positions));
    atoms.insert("initial_magmoms".into(), json!(structure.initial_magmoms));
    atoms.insert("initial_charges".into(), json!(structure.initial_charges));

    let mut metadata = Summary::new();
    metadata.insert("nsites".into(), json!(structure.len()));
    metadata.insert("formula".into(), json!(structure.formula()));
    metadata.insert("composition".into(), json!(structure.composition()));
    metadata.insert("atoms".into(), Value::Object(atoms));
    metadata.insert(
        "atoms_info".into(),
        serde_json::to_value(&structure.info).unwrap_or(Value::Null),
    );
    metadata
}

/// Recursively sanitize a value so every leaf is portable JSON.
///
/// Mappings are rebuilt with string keys, sequences element-wise; numbers
/// that cannot be represented (non-finite floats arrive as `Null` from the
/// serde_json layer) stay `Null`. Anything already JSON-native passes
/// through unchanged.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Sanitize every value of a record.
pub fn sanitize_map(map: Summary) -> Summary {
    map.into_iter().map(|(k, v)| (k, sanitize(v))).collect()
}

fn validate_calc(structure: &Structure) -> Result<()> {
    let Some(calc) = structure.calc.as_ref() else {
        return Err(SchemaError::NoCalculator);
    };
    if !calc.has_results() {
        return Err(SchemaError::EmptyResults);
    }
    Ok(())
}

fn assemble(
    mut structure: Structure,
    opts: &SummarizeOptions,
    extra_blocks: Vec<(&str, Value)>,
) -> Result<Summary> {
    // Capture calculator-derived blocks before prep_next_run detaches it.
    let Some(calc) = structure.calc.as_ref() else {
        return Err(SchemaError::NoCalculator);
    };
    let results = calc.results().to_json();
    let parameters: Summary = calc
        .parameters()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let name = opts
        .name
        .clone()
        .unwrap_or_else(|| calc.label().to_string());

    if opts.prep_next_run {
        structure = structure.prep_next_run();
    }

    let mut record = atoms_to_metadata(&structure);
    record.insert("parameters".into(), Value::Object(parameters));
    record.insert("results".into(), Value::Object(results));
    for (key, value) in extra_blocks {
        record.insert(key.to_string(), value);
    }
    record.insert("name".into(), json!(name));
    for (k, v) in &opts.additional_fields {
        record.insert(k.clone(), v.clone());
    }
    Ok(sanitize_map(record))
}

/// Tabulate a finished calculation from the calculator's native results.
///
/// # Errors
///
/// [`SchemaError::NoCalculator`] then [`SchemaError::EmptyResults`], checked
/// in that order before anything else happens.
pub fn summarize_run(structure: Structure, opts: &SummarizeOptions) -> Result<Summary> {
    validate_calc(&structure)?;
    assemble(structure, opts, Vec::new())
}

/// Tabulate a finished calculation, re-parsing the engine's raw output file
/// with the universal parser.
///
/// The parsed attributes land under `attributes`, the parser's package
/// metadata under `metadata`; the calculator's native results are still
/// stored under `results`.
///
/// # Errors
///
/// In order: [`SchemaError::NoCalculator`], [`SchemaError::EmptyResults`],
/// [`SchemaError::OutputNotFound`] if neither the file nor a gzipped
/// namesake exists, [`SchemaError::Parse`] if the parser cannot interpret
/// the file.
pub fn summarize_output(
    structure: Structure,
    output_file: &Path,
    opts: &SummarizeOptions,
) -> Result<Summary> {
    validate_calc(&structure)?;

    let resolved = if output_file.exists() {
        output_file.to_path_buf()
    } else {
        let gz = PathBuf::from(format!("{}.gz", output_file.display()));
        if gz.exists() {
            gz
        } else {
            return Err(SchemaError::OutputNotFound(output_file.to_path_buf()));
        }
    };

    let parsed = output::parse_output(&resolved).map_err(|source| SchemaError::Parse {
        path: resolved.clone(),
        source,
    })?;

    assemble(
        structure,
        opts,
        vec![
            ("metadata", Value::Object(parsed.metadata)),
            ("attributes", Value::Object(parsed.attributes)),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::Calc;
    use crate::engine::LennardJones;
    use crate::runner::RunContext;

    fn evaluated_dimer() -> Structure {
        let mut s = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0]), ("Ar", [0.0, 0.0, 1.2])]);
        let mut calc = Calc::new("lj-dimer", LennardJones::default());
        let ctx = RunContext {
            run_dir: std::path::PathBuf::from("."),
            work_dir: std::path::PathBuf::from("."),
        };
        calc.run(&s, &ctx).unwrap();
        s.calc = Some(calc);
        s
    }

    #[test]
    fn test_summarize_run_key_set() {
        let record = summarize_run(evaluated_dimer(), &SummarizeOptions::default()).unwrap();
        for key in [
            "results",
            "parameters",
            "name",
            "nsites",
            "formula",
            "composition",
            "atoms",
            "atoms_info",
        ] {
            assert!(record.contains_key(key), "missing key {key}");
        }
        assert_eq!(record["name"], json!("lj-dimer"));
        assert_eq!(record["nsites"], json!(2));
        assert_eq!(record["formula"], json!("Ar2"));
        assert!(record["results"]["energy"].is_f64());
        assert_eq!(record["parameters"]["sigma"], json!(1.0));
    }

    #[test]
    fn test_summarize_run_assigns_id() {
        let record = summarize_run(evaluated_dimer(), &SummarizeOptions::default()).unwrap();
        assert!(record["atoms_info"]["_id"].is_string());
    }

    #[test]
    fn test_summarize_run_without_prep_keeps_info() {
        let opts = SummarizeOptions {
            prep_next_run: false,
            ..SummarizeOptions::default()
        };
        let record = summarize_run(evaluated_dimer(), &opts).unwrap();
        assert!(record["atoms_info"].get("_id").is_none());
    }

    #[test]
    fn test_summarize_run_precondition_order() {
        let bare = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0])]);
        assert!(matches!(
            summarize_run(bare, &SummarizeOptions::default()),
            Err(SchemaError::NoCalculator)
        ));

        let mut unrun = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0])]);
        unrun.calc = Some(Calc::new("unrun", LennardJones::default()));
        assert!(matches!(
            summarize_run(unrun, &SummarizeOptions::default()),
            Err(SchemaError::EmptyResults)
        ));
    }

    #[test]
    fn test_summarize_output_missing_file() {
        let err = summarize_output(
            evaluated_dimer(),
            Path::new("definitely_missing.out"),
            &SummarizeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::OutputNotFound(_)));
    }

    #[test]
    fn test_additional_fields_override() {
        let opts = SummarizeOptions {
            additional_fields: Summary::from_iter([("tag".to_string(), json!("slab"))]),
            ..SummarizeOptions::default()
        };
        let record = summarize_run(evaluated_dimer(), &opts).unwrap();
        assert_eq!(record["tag"], json!("slab"));
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let record = summarize_run(evaluated_dimer(), &SummarizeOptions::default()).unwrap();
        let text = serde_json::to_string(&record).unwrap();
        let reloaded: Summary = serde_json::from_str(&text).unwrap();
        assert_eq!(Value::Object(record), Value::Object(reloaded));
    }
}
