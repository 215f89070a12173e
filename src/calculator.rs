//! Calculator abstraction binding a structure to a calculation engine.
//!
//! A [`Calc`] is a configured binding to one computational engine: it holds
//! the flattened input parameters, the engine itself, and — after execution —
//! the engine's native results mapping. Every engine returns a differently
//! shaped native mapping, so downstream code (the normalizer in particular)
//! depends only on the capability set exposed here: [`Calc::has_results`],
//! [`Calc::results`], and [`Calc::run`], never on a concrete engine type.

use crate::engine::{Engine, Result as EngineResult};
use crate::runner::RunContext;
use crate::structure::Structure;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Flattened calculator configuration, keyed by parameter name.
///
/// Values are JSON-native so the parameter block of a summary record can be
/// stored as-is.
pub type Parameters = BTreeMap<String, Value>;

/// Native results mapping populated by an engine run.
///
/// The fields every driver needs (energy, forces, magnetic moments, dipole)
/// are typed; anything else an engine reports lands in `extra` keyed by the
/// engine's own naming.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Results {
    /// Potential energy in eV
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
    /// Flattened forces [fx1, fy1, fz1, ...] in eV/Angstrom
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forces: Option<Vec<f64>>,
    /// Converged magnetic moment per site
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magmoms: Option<Vec<f64>>,
    /// Dipole moment vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dipole: Option<[f64; 3]>,
    /// Engine-specific additional results
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl Results {
    /// True if no result of any kind has been recorded.
    pub fn is_empty(&self) -> bool {
        self.energy.is_none()
            && self.forces.is_none()
            && self.magmoms.is_none()
            && self.dipole.is_none()
            && self.extra.is_empty()
    }

    /// Forces as an nalgebra vector, for the drivers.
    pub fn forces_vector(&self) -> Option<DVector<f64>> {
        self.forces.as_ref().map(|f| DVector::from_vec(f.clone()))
    }

    /// Flatten into a single JSON mapping with the typed fields inlined.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(e) = self.energy {
            map.insert("energy".into(), json!(e));
        }
        if let Some(f) = &self.forces {
            let rows: Vec<Value> = f.chunks(3).map(|c| json!([c[0], c[1], c[2]])).collect();
            map.insert("forces".into(), Value::Array(rows));
        }
        if let Some(m) = &self.magmoms {
            map.insert("magmoms".into(), json!(m));
        }
        if let Some(d) = self.dipole {
            map.insert("dipole".into(), json!(d));
        }
        for (k, v) in &self.extra {
            map.insert(k.clone(), v.clone());
        }
        map
    }
}

/// A configured binding to a computational engine.
///
/// Cloning a `Calc` is cheap: engines are stateless configurations shared
/// behind an `Arc`, and only the results mapping is deep-copied. This is what
/// lets trajectory snapshots carry their own results without re-running
/// anything.
#[derive(Clone)]
pub struct Calc {
    label: String,
    parameters: Parameters,
    engine: Arc<dyn Engine + Send + Sync>,
    results: Results,
}

impl fmt::Debug for Calc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calc")
            .field("label", &self.label)
            .field("engine", &self.engine.name())
            .field("has_results", &self.has_results())
            .finish()
    }
}

impl Calc {
    /// Create a calculator binding with the engine's flattened parameters.
    pub fn new(label: impl Into<String>, engine: impl Engine + Send + Sync + 'static) -> Self {
        let parameters = engine.parameters();
        Self {
            label: label.into(),
            parameters,
            engine: Arc::new(engine),
            results: Results::default(),
        }
    }

    /// Job label used for input/output file naming and record names.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Name of the bound engine.
    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Flattened input parameters.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// True once a run has populated a non-empty results mapping.
    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }

    /// Native results mapping from the last run.
    pub fn results(&self) -> &Results {
        &self.results
    }

    /// Discard any results from a previous run.
    pub fn clear_results(&mut self) {
        self.results = Results::default();
    }

    /// Execute the engine's computation for `structure` in `ctx`.
    ///
    /// Blocks until the engine finishes. Engine failures propagate as-is and
    /// leave the previous results untouched.
    pub fn run(&mut self, structure: &Structure, ctx: &RunContext) -> EngineResult<()> {
        let results = self.engine.execute(self.label(), structure, ctx)?;
        self.results = results;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_empty_then_populated() {
        let mut r = Results::default();
        assert!(r.is_empty());
        r.energy = Some(-1.5);
        assert!(!r.is_empty());
    }

    #[test]
    fn test_results_to_json_inlines_fields() {
        let r = Results {
            energy: Some(-2.0),
            forces: Some(vec![0.0, 0.0, 0.1, 0.0, 0.0, -0.1]),
            magmoms: None,
            dipole: None,
            extra: BTreeMap::from([("gap".to_string(), json!(4.2))]),
        };
        let map = r.to_json();
        assert_eq!(map["energy"], json!(-2.0));
        assert_eq!(map["gap"], json!(4.2));
        assert_eq!(map["forces"].as_array().unwrap().len(), 2);
    }
}
