//! Parameters - bounded, observable values
//!
//! Every controllable aspect of the instrument is a [`Parameter`]. Writes from
//! MIDI, panel controls and the touch screen all end up in
//! [`Parameter::set_value`], which is the only way the stored value changes.
//!
//! # Propagation
//!
//! There is no global bus: each parameter carries its own ordered observer
//! list and is its own propagation point. A commit runs as one critical
//! section on a per-parameter lock:
//!
//! ```text
//! lock ─ convert/clamp ─ compare ─ store ─ notify listeners in order ─ unlock
//! ```
//!
//! Listeners run synchronously on the writer's thread while the lock is held,
//! so two concurrent writers are strictly serialized and no listener ever sees
//! an `old` value that was not the committed value at that instant. Writes to
//! different parameters never contend.
//!
//! A listener that writes back into the parameter it is being notified about
//! is a wiring bug; the nested commit panics instead of recursing.

mod domain;
mod registry;

pub use domain::{Direction, Domain, ParamValue};
pub use registry::{ParameterRegistry, ParameterSpec};

use parking_lot::{ReentrantMutex, RwLock};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SurfaceError};

/// One committed change, handed to every listener
#[derive(Debug)]
pub struct ParameterChange<'a> {
    /// The parameter that changed (identity, domain, CC number)
    pub parameter: &'a Parameter,
    pub old: ParamValue,
    pub new: ParamValue,
}

/// Observer of committed parameter changes
///
/// Plain closures taking `&ParameterChange` implement this too.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, change: &ParameterChange<'_>);
}

impl<F> ChangeListener for F
where
    F: Fn(&ParameterChange<'_>) + Send + Sync,
{
    fn on_change(&self, change: &ParameterChange<'_>) {
        self(change)
    }
}

struct CommitState {
    value: ParamValue,
    in_commit: bool,
}

/// Clears the in-flight flag when a commit ends, including by unwinding
struct InFlight<'a> {
    state: &'a RefCell<CommitState>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.borrow_mut().in_commit = false;
    }
}

/// A named, bounded, observable value
pub struct Parameter {
    module: String,
    name: String,
    cc: Option<u8>,
    domain: Domain,
    default: ParamValue,
    state: ReentrantMutex<RefCell<CommitState>>,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl Parameter {
    /// Create a parameter owned by `module`
    ///
    /// Fails with `ProgrammingError` for an invalid domain or a CC number
    /// above 127.
    pub fn new(module: impl Into<String>, spec: ParameterSpec) -> Result<Self> {
        spec.domain.validate()?;
        if let Some(cc) = spec.cc {
            if cc > 127 {
                return Err(SurfaceError::ProgrammingError(format!(
                    "parameter '{}' has CC number {} (must be 0-127)",
                    spec.name, cc
                )));
            }
        }

        let default = spec
            .default
            .map(|v| spec.domain.normalize(v))
            .unwrap_or_else(|| spec.domain.min_value());

        Ok(Self {
            module: module.into(),
            name: spec.name,
            cc: spec.cc,
            domain: spec.domain,
            default,
            state: ReentrantMutex::new(RefCell::new(CommitState {
                value: default,
                in_commit: false,
            })),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// `module.name`, unique across a rack
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    /// MIDI Control-Change number, when MIDI-addressable
    pub fn cc(&self) -> Option<u8> {
        self.cc
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn default_value(&self) -> ParamValue {
        self.default
    }

    /// Current value
    pub fn value(&self) -> ParamValue {
        self.state.lock().borrow().value
    }

    /// Current value as a 7-bit CC value
    pub fn midi_value(&self) -> u8 {
        self.domain.to_midi(self.value())
    }

    /// Current value rendered for display
    pub fn formatted(&self) -> String {
        self.domain.format(self.value())
    }

    /// Convert, clamp or wrap, and commit.
    ///
    /// Listeners are notified once, in registration order, only when the
    /// stored value actually changes. Returns whether it changed.
    ///
    /// # Panics
    ///
    /// Panics when called from inside one of this parameter's own
    /// notifications (a re-entrant commit).
    pub fn set_value(&self, raw: impl Into<ParamValue>) -> bool {
        let target = self.domain.normalize(raw.into());
        self.commit(|_| target)
    }

    /// Commit a 7-bit Control-Change value
    pub fn set_from_midi(&self, value: u8) -> bool {
        let target = self.domain.from_midi(value);
        self.commit(|_| target)
    }

    /// One domain unit in `direction` (encoder detent)
    pub fn step(&self, direction: Direction) -> bool {
        self.commit(|current| self.domain.step(current, direction))
    }

    pub fn increment(&self) -> bool {
        self.step(Direction::Up)
    }

    pub fn decrement(&self) -> bool {
        self.step(Direction::Down)
    }

    /// Back to the declared default
    pub fn reset(&self) -> bool {
        let target = self.default;
        self.commit(|_| target)
    }

    /// Append a listener; duplicates are kept and fire once per registration
    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Convenience for closure listeners
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ParameterChange<'_>) + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    // The target is computed under the lock so read-modify-write steps
    // (encoder detents) see the latest committed value.
    fn commit<F>(&self, target: F) -> bool
    where
        F: FnOnce(ParamValue) -> ParamValue,
    {
        let guard = self.state.lock();
        let (old, new) = {
            let mut state = guard.borrow_mut();
            if state.in_commit {
                drop(state);
                panic!(
                    "{}",
                    SurfaceError::ProgrammingError(format!(
                        "re-entrant commit to '{}' from inside its own notification",
                        self.qualified_name()
                    ))
                );
            }
            let old = state.value;
            let new = target(old);
            if new == old {
                return false;
            }
            state.value = new;
            state.in_commit = true;
            (old, new)
        };
        let _in_flight = InFlight { state: &*guard };

        // Snapshot so listeners may register further listeners.
        let listeners = self.listeners.read().clone();
        let change = ParameterChange {
            parameter: self,
            old,
            new,
        };
        for listener in listeners.iter() {
            listener.on_change(&change);
        }
        true
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.qualified_name())
            .field("cc", &self.cc)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.qualified_name(), self.formatted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::thread;

    fn duty() -> Parameter {
        Parameter::new("vco3340", ParameterSpec::ratio("Duty").cc(7)).unwrap()
    }

    fn recorder(param: &Parameter) -> Arc<Mutex<Vec<(ParamValue, ParamValue)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        param.subscribe(move |c: &ParameterChange<'_>| sink.lock().push((c.old, c.new)));
        seen
    }

    #[test]
    fn test_set_then_get_clamps() {
        let p = duty();
        p.set_value(3.5);
        assert_eq!(p.value(), ParamValue::Ratio(1.0));
        p.set_value(-1.0);
        assert_eq!(p.value(), ParamValue::Ratio(0.0));
    }

    #[test]
    fn test_same_value_twice_notifies_once() {
        let p = duty();
        let seen = recorder(&p);

        assert!(p.set_value(0.25));
        assert!(!p.set_value(0.25));

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0], (ParamValue::Ratio(0.0), ParamValue::Ratio(0.25)));
    }

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let p = duty();
        let order = Arc::new(Mutex::new(Vec::new()));
        for seq in 0..3 {
            let order = order.clone();
            p.subscribe(move |_c: &ParameterChange<'_>| order.lock().push(seq));
        }

        p.set_value(0.5);
        p.set_value(0.75);

        assert_eq!(*order.lock(), vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_duplicate_listener_fires_twice() {
        let p = duty();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let listener: Arc<dyn ChangeListener> =
            Arc::new(move |_c: &ParameterChange<'_>| *counter.lock() += 1);
        p.add_listener(listener.clone());
        p.add_listener(listener);

        p.set_value(0.1);

        assert_eq!(*count.lock(), 2);
        assert_eq!(p.listener_count(), 2);
    }

    #[test]
    fn test_enum_increment_wraps_to_start() {
        let p = Parameter::new(
            "vco3340",
            ParameterSpec::enumeration("Shape", ["Square", "Triangle", "Pulse", "Sawtooth"]),
        )
        .unwrap();
        let start = p.value();
        for _ in 0..4 {
            p.increment();
        }
        assert_eq!(p.value(), start);
        p.decrement();
        assert_eq!(p.formatted(), "Sawtooth");
    }

    #[test]
    fn test_listener_may_read_value_during_notification() {
        let p = Arc::new(duty());
        let observed = Arc::new(Mutex::new(None));
        let sink = observed.clone();
        let inner = p.clone();
        p.subscribe(move |_c: &ParameterChange<'_>| *sink.lock() = Some(inner.value()));

        p.set_value(0.4);

        assert_eq!(*observed.lock(), Some(ParamValue::Ratio(0.4)));
    }

    #[test]
    #[should_panic(expected = "re-entrant commit")]
    fn test_reentrant_commit_panics() {
        let p = Arc::new(duty());
        let inner = p.clone();
        p.subscribe(move |c: &ParameterChange<'_>| {
            // echo back a different value
            if let ParamValue::Ratio(r) = c.new {
                inner.set_value(r / 2.0);
            }
        });
        p.set_value(0.8);
    }

    #[test]
    fn test_commit_usable_after_listener_panic() {
        let p = Arc::new(duty());
        let inner = p.clone();
        p.subscribe(move |c: &ParameterChange<'_>| {
            if c.new == ParamValue::Ratio(1.0) {
                inner.set_value(0.0);
            }
        });

        let pp = p.clone();
        let result = thread::spawn(move || pp.set_value(1.0)).join();
        assert!(result.is_err());

        assert!(p.set_value(0.3));
        assert_eq!(p.value(), ParamValue::Ratio(0.3));
    }

    #[test]
    fn test_rejects_cc_out_of_range() {
        let err = Parameter::new("x", ParameterSpec::ratio("Y").cc(200)).unwrap_err();
        assert!(matches!(err, SurfaceError::ProgrammingError(_)));
    }

    #[test]
    fn test_rejects_enumeration_wider_than_midi() {
        let states: Vec<String> = (0..200).map(|i| format!("Wave{}", i)).collect();
        let err = Parameter::new("x", ParameterSpec::enumeration("Table", states).cc(40)).unwrap_err();
        assert!(matches!(err, SurfaceError::ProgrammingError(_)));
    }

    #[test]
    fn test_concurrent_writes_are_serialized() {
        const WRITERS: i32 = 16;
        let p = Arc::new(
            Parameter::new("test", ParameterSpec::int("Level", 0, 1000)).unwrap(),
        );

        // Each notification must see as `old` exactly what the previous one
        // committed as `new`.
        let chain = Arc::new(Mutex::new(Vec::<(ParamValue, ParamValue)>::new()));
        let sink = chain.clone();
        p.subscribe(move |c: &ParameterChange<'_>| sink.lock().push((c.old, c.new)));

        let handles: Vec<_> = (1..=WRITERS)
            .map(|i| {
                let p = p.clone();
                thread::spawn(move || {
                    p.set_value(i);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let chain = chain.lock();
        assert_eq!(chain.len(), WRITERS as usize);
        assert_eq!(chain[0].0, ParamValue::Int(0));
        for pair in chain.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        let last = chain.last().unwrap().1;
        assert_eq!(p.value(), last);

        let distinct: HashSet<i32> = chain.iter().filter_map(|(_, n)| n.as_int()).collect();
        assert_eq!(distinct.len(), WRITERS as usize);
    }
}
