//! Patches - named sets of parameter values recalled from a button
//!
//! A patch is applied through the normal commit path, so every value that
//! actually changes reaches the outboard unit and the LEDs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SurfaceError};
use crate::parameter::{Domain, ParamValue};
use crate::rack::ModuleRack;

/// A value as written in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchValue {
    Bool(bool),
    Number(f64),
    /// Enumeration state name
    State(String),
}

impl PatchValue {
    /// Interpret the value for `domain`
    ///
    /// Numbers are ratios for ratio domains and absolute values otherwise.
    pub fn resolve(&self, domain: &Domain) -> Option<ParamValue> {
        match (self, domain) {
            (PatchValue::Bool(b), _) => Some(ParamValue::Bool(*b)),
            (PatchValue::Number(n), Domain::Ratio) => Some(ParamValue::Ratio(*n)),
            (PatchValue::Number(n), Domain::Enumeration(_)) => Some(ParamValue::Choice(n.max(0.0) as usize)),
            (PatchValue::Number(n), _) => Some(ParamValue::Int(n.round() as i32)),
            (PatchValue::State(name), _) => domain.state_index(name).map(ParamValue::Choice),
        }
    }
}

/// `module.name` -> value
pub type Patch = BTreeMap<String, PatchValue>;

/// Apply `patch` to the rack; returns how many parameters changed
///
/// Unknown parameters and unknown state names are skipped with a warning so
/// that one stale entry does not block the rest of the patch.
pub fn apply(rack: &ModuleRack, name: &str, patch: &Patch) -> usize {
    let mut changed = 0;
    for (path, value) in patch {
        let Some(parameter) = rack.lookup(path) else {
            warn!("⚠️  Patch '{}': unknown parameter '{}'", name, path);
            continue;
        };
        match value.resolve(parameter.domain()) {
            Some(v) => {
                if parameter.set_value(v) {
                    changed += 1;
                }
            }
            None => warn!("⚠️  Patch '{}': {:?} does not fit {}", name, value, path),
        }
    }
    info!("🎛️  Patch '{}' recalled ({} changes)", name, changed);
    changed
}

/// Check every entry against the rack without applying anything
pub fn check(rack: &ModuleRack, name: &str, patch: &Patch) -> Result<()> {
    for (path, value) in patch {
        let parameter = rack.lookup(path).ok_or_else(|| {
            SurfaceError::ProgrammingError(format!("patch '{}' sets unknown parameter '{}'", name, path))
        })?;
        if value.resolve(parameter.domain()).is_none() {
            return Err(SurfaceError::ProgrammingError(format!(
                "patch '{}' sets {} to {:?}, which is not one of its states",
                name, path, value
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voices::standard_rack;

    fn patch(entries: &[(&str, PatchValue)]) -> Patch {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_apply_mixed_values() {
        let rack = standard_rack().unwrap();
        let bass = patch(&[
            ("vco3340.Shape", PatchValue::State("sawtooth".into())),
            ("vco3340.Sync", PatchValue::Bool(true)),
            ("vco3340.Octave", PatchValue::Number(0.0)),
            ("vcf.Cutoff", PatchValue::Number(0.25)),
        ]);

        assert_eq!(apply(&rack, "bass", &bass), 4);
        assert_eq!(rack.lookup("vco3340.Shape").unwrap().formatted(), "Sawtooth");
        assert_eq!(rack.lookup("vco3340.Octave").unwrap().value(), ParamValue::Int(0));
        assert_eq!(rack.lookup("vcf.Cutoff").unwrap().value(), ParamValue::Ratio(0.25));

        // second recall changes nothing
        assert_eq!(apply(&rack, "bass", &bass), 0);
    }

    #[test]
    fn test_bad_entries_skipped_but_rejected_by_check() {
        let rack = standard_rack().unwrap();
        let stale = patch(&[
            ("vcf.Nope", PatchValue::Number(1.0)),
            ("vcf.Order", PatchValue::State("8th".into())),
            ("vca.Attack", PatchValue::Number(0.5)),
        ]);

        assert_eq!(apply(&rack, "stale", &stale), 1);
        assert!(check(&rack, "stale", &stale).is_err());
    }

    #[test]
    fn test_yaml_shapes() {
        let parsed: Patch = serde_yaml::from_str("vco3340.Sync: true\nvcf.Cutoff: 0.5\nvcf.Order: 4th\n").unwrap();
        assert_eq!(parsed["vco3340.Sync"], PatchValue::Bool(true));
        assert_eq!(parsed["vcf.Cutoff"], PatchValue::Number(0.5));
        assert_eq!(parsed["vcf.Order"], PatchValue::State("4th".into()));
    }
}
