//! ModuleRack - every voice section's registry in one place
//!
//! Built once at start and shared read-only afterwards, so lookups take no
//! lock. CC numbers must be unique across the whole rack because the MIDI
//! router resolves an incoming CC without knowing the module.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SurfaceError};
use crate::parameter::{Parameter, ParameterRegistry};

/// All parameter registries of the instrument
#[derive(Debug, Default)]
pub struct ModuleRack {
    registries: Vec<ParameterRegistry>,
    by_cc: HashMap<u8, Arc<Parameter>>,
}

impl ModuleRack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module's registry
    ///
    /// Fails with `ProgrammingError` on a duplicate module name or a CC
    /// number already claimed by another module.
    pub fn add(&mut self, registry: ParameterRegistry) -> Result<()> {
        if self.module(registry.module()).is_some() {
            return Err(SurfaceError::ProgrammingError(format!(
                "module '{}' added twice",
                registry.module()
            )));
        }
        for parameter in registry.iter() {
            if let Some(cc) = parameter.cc() {
                if let Some(existing) = self.by_cc.get(&cc) {
                    return Err(SurfaceError::ProgrammingError(format!(
                        "CC {} claimed by both '{}' and '{}'",
                        cc,
                        existing.qualified_name(),
                        parameter.qualified_name()
                    )));
                }
            }
        }

        for parameter in registry.iter() {
            if let Some(cc) = parameter.cc() {
                self.by_cc.insert(cc, parameter.clone());
            }
        }
        self.registries.push(registry);
        Ok(())
    }

    pub fn module(&self, name: &str) -> Option<&ParameterRegistry> {
        self.registries
            .iter()
            .find(|r| r.module().eq_ignore_ascii_case(name))
    }

    pub fn modules(&self) -> impl Iterator<Item = &ParameterRegistry> {
        self.registries.iter()
    }

    /// The parameter claiming a CC number, if any
    pub fn find_by_cc(&self, cc: u8) -> Option<&Arc<Parameter>> {
        self.by_cc.get(&cc)
    }

    /// Resolve `module.name` (case-insensitive)
    pub fn lookup(&self, path: &str) -> Option<&Arc<Parameter>> {
        let (module, name) = path.split_once('.')?;
        self.module(module)?.find(name)
    }

    /// Every parameter, module by module, in declaration order
    pub fn parameters(&self) -> impl Iterator<Item = &Arc<Parameter>> {
        self.registries.iter().flat_map(|r| r.iter())
    }

    pub fn len(&self) -> usize {
        self.registries.iter().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `module.name = value` lines in a stable order
    pub fn dump(&self) -> Vec<String> {
        self.registries
            .iter()
            .flat_map(|r| {
                r.dump()
                    .into_iter()
                    .map(move |(name, value)| format!("{}.{} = {}", r.module(), name, value))
            })
            .collect()
    }
}
