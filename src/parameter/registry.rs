//! Per-module parameter registry
//!
//! Declaration order is kept so dumps and LED refreshes iterate the same way
//! every run.

use std::collections::HashMap;
use std::sync::Arc;

use super::domain::{Domain, ParamValue};
use super::Parameter;
use crate::error::{Result, SurfaceError};

/// Declaration of one parameter, consumed by [`ParameterRegistry::declare`]
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: String,
    pub domain: Domain,
    pub cc: Option<u8>,
    pub default: Option<ParamValue>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, domain: Domain) -> Self {
        Self {
            name: name.into(),
            domain,
            cc: None,
            default: None,
        }
    }

    pub fn ratio(name: impl Into<String>) -> Self {
        Self::new(name, Domain::Ratio)
    }

    pub fn int(name: impl Into<String>, lo: i32, hi: i32) -> Self {
        Self::new(name, Domain::Int { lo, hi })
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, Domain::Boolean)
    }

    pub fn enumeration<I, S>(name: impl Into<String>, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, Domain::enumeration(states))
    }

    /// Make the parameter MIDI-addressable on this Control-Change number
    pub fn cc(mut self, cc: u8) -> Self {
        self.cc = Some(cc);
        self
    }

    pub fn default_value(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Parameters of one logical module (e.g. one VCO), keyed by name
#[derive(Debug)]
pub struct ParameterRegistry {
    module: String,
    parameters: Vec<Arc<Parameter>>,
    by_name: HashMap<String, usize>,
    by_cc: HashMap<u8, usize>,
}

impl ParameterRegistry {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            parameters: Vec::new(),
            by_name: HashMap::new(),
            by_cc: HashMap::new(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Declare a parameter
    ///
    /// Duplicate names or CC numbers within the module are `ProgrammingError`s.
    pub fn declare(&mut self, spec: ParameterSpec) -> Result<Arc<Parameter>> {
        if self.by_name.contains_key(&spec.name) {
            return Err(SurfaceError::ProgrammingError(format!(
                "parameter '{}.{}' declared twice",
                self.module, spec.name
            )));
        }
        if let Some(cc) = spec.cc {
            if let Some(&existing) = self.by_cc.get(&cc) {
                return Err(SurfaceError::ProgrammingError(format!(
                    "CC {} claimed by both '{}' and '{}' in module '{}'",
                    cc,
                    self.parameters[existing].name(),
                    spec.name,
                    self.module
                )));
            }
        }

        let parameter = Arc::new(Parameter::new(self.module.clone(), spec)?);
        let index = self.parameters.len();
        self.by_name.insert(parameter.name().to_string(), index);
        if let Some(cc) = parameter.cc() {
            self.by_cc.insert(cc, index);
        }
        self.parameters.push(parameter.clone());
        Ok(parameter)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Parameter>> {
        self.by_name.get(name).map(|&i| &self.parameters[i])
    }

    /// Case-insensitive lookup, used by the console and configuration
    pub fn find(&self, name: &str) -> Option<&Arc<Parameter>> {
        self.get(name).or_else(|| {
            self.parameters
                .iter()
                .find(|p| p.name().eq_ignore_ascii_case(name))
        })
    }

    pub fn by_cc(&self, cc: u8) -> Option<&Arc<Parameter>> {
        self.by_cc.get(&cc).map(|&i| &self.parameters[i])
    }

    /// Parameters in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Parameter>> {
        self.parameters.iter()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// `(name, formatted value)` pairs in declaration order
    pub fn dump(&self) -> Vec<(String, String)> {
        self.parameters
            .iter()
            .map(|p| (p.name().to_string(), p.formatted()))
            .collect()
    }
}
