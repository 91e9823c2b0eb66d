//! ControlInputAdapter - panel buttons and rotary encoders
//!
//! Encoders have no absolute position, so they only ever step their
//! parameter. Buttons fire an application action by default, or toggle a
//! parameter when bound that way.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SurfaceError};
use crate::parameter::{Direction, Parameter};
use crate::rack::ModuleRack;

/// Edge-triggered event from the panel scanner (or the console)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Pressed(String),
    Released(String),
    /// Signed detent count, positive is clockwise
    Rotated { control: String, detents: i32 },
}

impl ControlEvent {
    pub fn control(&self) -> &str {
        match self {
            ControlEvent::Pressed(id) | ControlEvent::Released(id) => id,
            ControlEvent::Rotated { control, .. } => control,
        }
    }
}

/// What a physical control does, as written in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlBinding {
    /// Button fires an action; defaults to the control's own name
    Fire {
        #[serde(default)]
        action: Option<String>,
    },
    /// Button toggles a boolean or cycles an enumeration (`module.name`)
    Toggle { parameter: String },
    /// Encoder steps a parameter (`module.name`)
    Step { parameter: String },
}

/// Receiver of fired actions (patch recall and the like)
pub trait ActionHandler: Send + Sync {
    fn fire(&self, action: &str);
}

impl<F> ActionHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn fire(&self, action: &str) {
        self(action)
    }
}

enum Resolved {
    Fire(String),
    Toggle(Arc<Parameter>),
    Step(Arc<Parameter>),
}

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    Fired(String),
    /// Parameter written; `changed` is false when it was already at a bound
    Stepped { parameter: String, changed: bool },
    Ignored,
}

pub struct ControlInputAdapter {
    bindings: HashMap<String, Resolved>,
    actions: Arc<dyn ActionHandler>,
}

impl ControlInputAdapter {
    /// Resolve every binding against the rack
    ///
    /// Unknown parameters and toggles on non-cyclic parameters are
    /// `ProgrammingError`s.
    pub fn new(
        rack: &ModuleRack,
        bindings: &HashMap<String, ControlBinding>,
        actions: Arc<dyn ActionHandler>,
    ) -> Result<Self> {
        let lookup = |control: &str, path: &str| {
            rack.lookup(path).cloned().ok_or_else(|| {
                SurfaceError::ProgrammingError(format!(
                    "control '{}' is bound to unknown parameter '{}'",
                    control, path
                ))
            })
        };

        let mut resolved = HashMap::new();
        for (control, binding) in bindings {
            let entry = match binding {
                ControlBinding::Fire { action } => {
                    Resolved::Fire(action.clone().unwrap_or_else(|| control.clone()))
                }
                ControlBinding::Toggle { parameter } => {
                    let parameter = lookup(control, parameter)?;
                    if !parameter.domain().is_cyclic() {
                        return Err(SurfaceError::ProgrammingError(format!(
                            "control '{}' toggles '{}', which is not a switch or selector",
                            control,
                            parameter.qualified_name()
                        )));
                    }
                    Resolved::Toggle(parameter)
                }
                ControlBinding::Step { parameter } => Resolved::Step(lookup(control, parameter)?),
            };
            resolved.insert(control.clone(), entry);
        }

        Ok(Self {
            bindings: resolved,
            actions,
        })
    }

    pub fn is_bound(&self, control: &str) -> bool {
        self.bindings.contains_key(control)
    }

    /// Bound control names, sorted
    pub fn controls(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn handle(&self, event: &ControlEvent) -> ControlOutcome {
        let Some(binding) = self.bindings.get(event.control()) else {
            debug!("Unbound control '{}', ignoring {:?}", event.control(), event);
            return ControlOutcome::Ignored;
        };

        match (binding, event) {
            (Resolved::Fire(action), ControlEvent::Pressed(_)) => {
                debug!("🔘 {} fires '{}'", event.control(), action);
                self.actions.fire(action);
                ControlOutcome::Fired(action.clone())
            }
            (Resolved::Toggle(parameter), ControlEvent::Pressed(_)) => {
                let changed = parameter.increment();
                ControlOutcome::Stepped {
                    parameter: parameter.qualified_name(),
                    changed,
                }
            }
            (Resolved::Step(parameter), ControlEvent::Rotated { detents, .. }) => {
                let direction = if *detents >= 0 {
                    Direction::Up
                } else {
                    Direction::Down
                };
                let domain = parameter.domain();
                let mut steps = detents.unsigned_abs() as usize;
                if domain.is_cyclic() {
                    // whole turns around the states land where they started
                    steps %= domain.state_count().max(1);
                }
                let mut changed = false;
                for _ in 0..steps {
                    if parameter.step(direction) {
                        changed = true;
                    } else if !domain.is_cyclic() {
                        // pinned at a bound
                        break;
                    }
                }
                ControlOutcome::Stepped {
                    parameter: parameter.qualified_name(),
                    changed,
                }
            }
            _ => ControlOutcome::Ignored,
        }
    }

    /// Drain `events` on a dedicated thread until every sender is gone
    pub fn spawn_scan_loop(self: Arc<Self>, events: Receiver<ControlEvent>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("control-scan".to_string())
            .spawn(move || {
                info!("Control scan loop started ({} bindings)", self.bindings.len());
                for event in events.iter() {
                    self.handle(&event);
                }
                info!("Control scan loop stopped");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{ParamValue, ParameterRegistry, ParameterSpec};
    use parking_lot::Mutex;

    fn rack() -> ModuleRack {
        let mut reg = ParameterRegistry::new("vco3340");
        reg.declare(ParameterSpec::enumeration("Shape", ["Square", "Triangle", "Pulse", "Sawtooth"]))
            .unwrap();
        reg.declare(ParameterSpec::boolean("Sync")).unwrap();
        reg.declare(ParameterSpec::ratio("Duty")).unwrap();
        let mut rack = ModuleRack::new();
        rack.add(reg).unwrap();
        rack
    }

    fn bindings(entries: &[(&str, ControlBinding)]) -> HashMap<String, ControlBinding> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn recorder() -> (Arc<dyn ActionHandler>, Arc<Mutex<Vec<String>>>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let handler: Arc<dyn ActionHandler> = Arc::new(move |action: &str| sink.lock().push(action.to_string()));
        (handler, fired)
    }

    #[test]
    fn test_encoder_steps_and_wraps() {
        let rack = rack();
        let (handler, _) = recorder();
        let adapter = ControlInputAdapter::new(
            &rack,
            &bindings(&[("enc1", ControlBinding::Step { parameter: "vco3340.Shape".into() })]),
            handler,
        )
        .unwrap();

        adapter.handle(&ControlEvent::Rotated { control: "enc1".into(), detents: -1 });
        assert_eq!(rack.lookup("vco3340.Shape").unwrap().formatted(), "Sawtooth");
        adapter.handle(&ControlEvent::Rotated { control: "enc1".into(), detents: 2 });
        assert_eq!(rack.lookup("vco3340.Shape").unwrap().formatted(), "Triangle");
    }

    #[test]
    fn test_encoder_on_ratio_clamps() {
        let rack = rack();
        let (handler, _) = recorder();
        let adapter = ControlInputAdapter::new(
            &rack,
            &bindings(&[("enc2", ControlBinding::Step { parameter: "vco3340.Duty".into() })]),
            handler,
        )
        .unwrap();

        let outcome = adapter.handle(&ControlEvent::Rotated { control: "enc2".into(), detents: -5 });
        assert_eq!(
            outcome,
            ControlOutcome::Stepped { parameter: "vco3340.Duty".into(), changed: false }
        );
        adapter.handle(&ControlEvent::Rotated { control: "enc2".into(), detents: 127 });
        assert_eq!(rack.lookup("vco3340.Duty").unwrap().value(), ParamValue::Ratio(1.0));
    }

    #[test]
    fn test_extreme_detent_counts_finish_quickly() {
        let rack = rack();
        let (handler, _) = recorder();
        let adapter = ControlInputAdapter::new(
            &rack,
            &bindings(&[
                ("duty", ControlBinding::Step { parameter: "vco3340.Duty".into() }),
                ("shape", ControlBinding::Step { parameter: "vco3340.Shape".into() }),
            ]),
            handler,
        )
        .unwrap();

        let started = std::time::Instant::now();
        adapter.handle(&ControlEvent::Rotated { control: "duty".into(), detents: i32::MIN });
        adapter.handle(&ControlEvent::Rotated { control: "duty".into(), detents: i32::MAX });
        // i32::MIN is 2^31, a multiple of the four shapes
        adapter.handle(&ControlEvent::Rotated { control: "shape".into(), detents: i32::MIN });
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        assert_eq!(rack.lookup("vco3340.Duty").unwrap().value(), ParamValue::Ratio(1.0));
        assert_eq!(rack.lookup("vco3340.Shape").unwrap().formatted(), "Square");

        adapter.handle(&ControlEvent::Rotated { control: "shape".into(), detents: 4 * 1000 + 3 });
        assert_eq!(rack.lookup("vco3340.Shape").unwrap().formatted(), "Sawtooth");
    }

    #[test]
    fn test_button_fires_by_default_and_toggles_when_bound() {
        let rack = rack();
        let (handler, fired) = recorder();
        let adapter = ControlInputAdapter::new(
            &rack,
            &bindings(&[
                ("patch1", ControlBinding::Fire { action: None }),
                ("sync", ControlBinding::Toggle { parameter: "vco3340.Sync".into() }),
            ]),
            handler,
        )
        .unwrap();

        assert_eq!(adapter.handle(&ControlEvent::Pressed("patch1".into())), ControlOutcome::Fired("patch1".into()));
        assert_eq!(adapter.handle(&ControlEvent::Released("patch1".into())), ControlOutcome::Ignored);
        adapter.handle(&ControlEvent::Pressed("sync".into()));

        assert_eq!(*fired.lock(), vec!["patch1".to_string()]);
        assert_eq!(rack.lookup("vco3340.Sync").unwrap().value(), ParamValue::Bool(true));
    }

    #[test]
    fn test_unbound_control_ignored() {
        let rack = rack();
        let (handler, fired) = recorder();
        let adapter = ControlInputAdapter::new(&rack, &HashMap::new(), handler).unwrap();
        assert_eq!(adapter.handle(&ControlEvent::Pressed("nothing".into())), ControlOutcome::Ignored);
        assert!(fired.lock().is_empty());
    }

    #[test]
    fn test_bad_bindings_rejected() {
        let rack = rack();
        let (handler, _) = recorder();
        let unknown = bindings(&[("enc", ControlBinding::Step { parameter: "vcf.Cutoff".into() })]);
        assert!(ControlInputAdapter::new(&rack, &unknown, handler.clone()).is_err());

        let toggle_ratio = bindings(&[("b", ControlBinding::Toggle { parameter: "vco3340.Duty".into() })]);
        assert!(matches!(
            ControlInputAdapter::new(&rack, &toggle_ratio, handler),
            Err(SurfaceError::ProgrammingError(_))
        ));
    }

    #[test]
    fn test_scan_loop_drains_channel() {
        let rack = rack();
        let (handler, fired) = recorder();
        let adapter = Arc::new(
            ControlInputAdapter::new(
                &rack,
                &bindings(&[("patch2", ControlBinding::Fire { action: Some("recall:bass".into()) })]),
                handler,
            )
            .unwrap(),
        );

        let (tx, rx) = crossbeam::channel::unbounded();
        let handle = adapter.spawn_scan_loop(rx).unwrap();
        tx.send(ControlEvent::Pressed("patch2".into())).unwrap();
        tx.send(ControlEvent::Pressed("patch2".into())).unwrap();
        drop(tx);
        handle.join().unwrap();

        assert_eq!(*fired.lock(), vec!["recall:bass".to_string(), "recall:bass".to_string()]);
    }
}
