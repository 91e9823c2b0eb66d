//! Value domains for parameters
//!
//! A domain decides how raw input is brought into range: ratio and integer
//! domains clamp, boolean and enumeration domains wrap. The same rule applies
//! whether the write comes from MIDI, an encoder detent or the touch screen.

use std::fmt;

use crate::error::{Result, SurfaceError};

/// A parameter value in one of the four domain representations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    /// Continuous ratio, 0.0 - 1.0
    Ratio(f64),
    /// Discrete integer
    Int(i32),
    /// On/off
    Bool(bool),
    /// Index into an enumeration's states
    Choice(usize),
}

impl ParamValue {
    pub fn as_ratio(&self) -> Option<f64> {
        match *self {
            ParamValue::Ratio(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match *self {
            ParamValue::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            ParamValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_choice(&self) -> Option<usize> {
        match *self {
            ParamValue::Choice(c) => Some(c),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Ratio(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParamValue::Ratio(r) => write!(f, "{:.3}", r),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Choice(c) => write!(f, "#{}", c),
        }
    }
}

/// Largest enumeration a 7-bit Control-Change value can address
pub const MAX_STATES: usize = 128;

/// Direction of a single encoder detent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// The fixed value domain of a parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    /// 0.0 - 1.0, clamps
    Ratio,
    /// `[lo, hi]` inclusive, clamps
    Int { lo: i32, hi: i32 },
    /// on/off, wraps
    Boolean,
    /// Closed set of named states, wraps
    Enumeration(Vec<String>),
}

impl Domain {
    /// Build an enumeration domain from state names
    pub fn enumeration<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Domain::Enumeration(states.into_iter().map(Into::into).collect())
    }

    /// Reject domains that cannot hold a value
    pub fn validate(&self) -> Result<()> {
        match self {
            Domain::Int { lo, hi } if lo > hi => Err(SurfaceError::ProgrammingError(format!(
                "integer domain has lo {} > hi {}",
                lo, hi
            ))),
            Domain::Enumeration(states) if states.is_empty() => Err(
                SurfaceError::ProgrammingError("enumeration domain has no states".to_string()),
            ),
            Domain::Enumeration(states) if states.len() > MAX_STATES => {
                Err(SurfaceError::ProgrammingError(format!(
                    "enumeration domain has {} states, a Control-Change value addresses at most {}",
                    states.len(),
                    MAX_STATES
                )))
            }
            Domain::Enumeration(states) => {
                for (i, state) in states.iter().enumerate() {
                    if states[..i].contains(state) {
                        return Err(SurfaceError::ProgrammingError(format!(
                            "enumeration state '{}' declared twice",
                            state
                        )));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Wrap-vs-clamp is a property of the domain kind
    pub fn is_cyclic(&self) -> bool {
        matches!(self, Domain::Boolean | Domain::Enumeration(_))
    }

    /// Lowest value of the domain (used as the default)
    pub fn min_value(&self) -> ParamValue {
        match self {
            Domain::Ratio => ParamValue::Ratio(0.0),
            Domain::Int { lo, .. } => ParamValue::Int(*lo),
            Domain::Boolean => ParamValue::Bool(false),
            Domain::Enumeration(_) => ParamValue::Choice(0),
        }
    }

    /// Number of states for cyclic domains
    pub fn state_count(&self) -> usize {
        match self {
            Domain::Boolean => 2,
            Domain::Enumeration(states) => states.len(),
            _ => 0,
        }
    }

    /// Convert any raw value into this domain's canonical form, in bounds.
    ///
    /// `Ratio` input is treated as a normalized position when the domain is
    /// not a ratio (touch sliders send those). `Int`/`Choice`/`Bool` input is
    /// taken as an absolute value.
    pub fn normalize(&self, raw: ParamValue) -> ParamValue {
        match self {
            Domain::Ratio => {
                let r = match raw {
                    ParamValue::Ratio(r) => r,
                    ParamValue::Int(i) => i as f64,
                    ParamValue::Bool(b) => b as u8 as f64,
                    ParamValue::Choice(c) => c as f64,
                };
                ParamValue::Ratio(clamp_ratio(r))
            }
            Domain::Int { lo, hi } => {
                let v = match raw {
                    ParamValue::Ratio(r) => scale_ratio(clamp_ratio(r), *lo, *hi),
                    ParamValue::Int(i) => i as i64,
                    ParamValue::Bool(b) => b as i64,
                    ParamValue::Choice(c) => c.min(i32::MAX as usize) as i64,
                };
                ParamValue::Int(v.clamp(*lo as i64, *hi as i64) as i32)
            }
            Domain::Boolean => {
                let on = match raw {
                    ParamValue::Ratio(r) => clamp_ratio(r) >= 0.5,
                    ParamValue::Int(i) => i.rem_euclid(2) == 1,
                    ParamValue::Bool(b) => b,
                    ParamValue::Choice(c) => c % 2 == 1,
                };
                ParamValue::Bool(on)
            }
            Domain::Enumeration(states) => {
                let n = states.len().max(1);
                let index = match raw {
                    ParamValue::Ratio(r) => ((clamp_ratio(r) * n as f64) as usize).min(n - 1),
                    ParamValue::Int(i) => (i as i64).rem_euclid(n as i64) as usize,
                    ParamValue::Bool(b) => (b as usize) % n,
                    ParamValue::Choice(c) => c % n,
                };
                ParamValue::Choice(index)
            }
        }
    }

    /// Convert a 7-bit Control-Change value into this domain
    pub fn from_midi(&self, value: u8) -> ParamValue {
        let value = value.min(127);
        match self {
            Domain::Ratio => ParamValue::Ratio(value as f64 / 127.0),
            Domain::Int { lo, hi } => {
                if *lo >= 0 && *hi <= 127 {
                    ParamValue::Int((value as i32).clamp(*lo, *hi))
                } else {
                    ParamValue::Int(scale_ratio(value as f64 / 127.0, *lo, *hi) as i32)
                }
            }
            Domain::Boolean => ParamValue::Bool(value >= 64),
            Domain::Enumeration(_) => self.normalize(ParamValue::Choice(value as usize)),
        }
    }

    /// Convert a value of this domain into a 7-bit Control-Change value
    pub fn to_midi(&self, value: ParamValue) -> u8 {
        match (self, self.normalize(value)) {
            (Domain::Ratio, ParamValue::Ratio(r)) => (r * 127.0).round() as u8,
            (Domain::Int { lo, hi }, ParamValue::Int(i)) => {
                if *lo >= 0 && *hi <= 127 {
                    i as u8
                } else if hi == lo {
                    0
                } else {
                    let span = (*hi as i64 - *lo as i64) as f64;
                    (((i as i64 - *lo as i64) as f64 / span) * 127.0).round() as u8
                }
            }
            (Domain::Boolean, ParamValue::Bool(b)) => {
                if b {
                    127
                } else {
                    0
                }
            }
            (Domain::Enumeration(_), ParamValue::Choice(c)) => c.min(127) as u8,
            _ => 0,
        }
    }

    /// Move one domain unit from `current`
    pub fn step(&self, current: ParamValue, direction: Direction) -> ParamValue {
        let current = self.normalize(current);
        let delta: i64 = match direction {
            Direction::Up => 1,
            Direction::Down => -1,
        };
        match (self, current) {
            (Domain::Ratio, ParamValue::Ratio(r)) => {
                let detent = (r * 127.0).round() as i64 + delta;
                ParamValue::Ratio(clamp_ratio(detent as f64 / 127.0))
            }
            (Domain::Int { lo, hi }, ParamValue::Int(i)) => {
                ParamValue::Int((i as i64 + delta).clamp(*lo as i64, *hi as i64) as i32)
            }
            (Domain::Boolean, ParamValue::Bool(b)) => ParamValue::Bool(!b),
            (Domain::Enumeration(states), ParamValue::Choice(c)) => {
                let n = states.len() as i64;
                ParamValue::Choice((c as i64 + delta).rem_euclid(n) as usize)
            }
            (_, other) => other,
        }
    }

    /// Position of `value` within the domain, 0.0 - 1.0 (bar graphs use this)
    pub fn normalized(&self, value: ParamValue) -> f64 {
        match (self, self.normalize(value)) {
            (Domain::Ratio, ParamValue::Ratio(r)) => r,
            (Domain::Int { lo, hi }, ParamValue::Int(i)) => {
                if hi == lo {
                    0.0
                } else {
                    (i as i64 - *lo as i64) as f64 / (*hi as i64 - *lo as i64) as f64
                }
            }
            (Domain::Boolean, ParamValue::Bool(b)) => b as u8 as f64,
            (Domain::Enumeration(states), ParamValue::Choice(c)) => {
                if states.len() <= 1 {
                    0.0
                } else {
                    c as f64 / (states.len() - 1) as f64
                }
            }
            _ => 0.0,
        }
    }

    /// Human readable rendering of a value
    pub fn format(&self, value: ParamValue) -> String {
        match (self, self.normalize(value)) {
            (Domain::Ratio, ParamValue::Ratio(r)) => format!("{:.1}%", r * 100.0),
            (Domain::Int { .. }, ParamValue::Int(i)) => i.to_string(),
            (Domain::Boolean, ParamValue::Bool(true)) => "on".to_string(),
            (Domain::Boolean, ParamValue::Bool(false)) => "off".to_string(),
            (Domain::Enumeration(states), ParamValue::Choice(c)) => states[c].clone(),
            (_, other) => other.to_string(),
        }
    }

    /// Look up an enumeration state by name (case-insensitive)
    pub fn state_index(&self, name: &str) -> Option<usize> {
        match self {
            Domain::Enumeration(states) => states
                .iter()
                .position(|s| s.eq_ignore_ascii_case(name)),
            _ => None,
        }
    }
}

fn clamp_ratio(r: f64) -> f64 {
    if r.is_nan() {
        0.0
    } else {
        r.clamp(0.0, 1.0)
    }
}

fn scale_ratio(r: f64, lo: i32, hi: i32) -> i64 {
    lo as i64 + (r * (hi as i64 - lo as i64) as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn shapes() -> Domain {
        Domain::enumeration(["Square", "Triangle", "Pulse", "Sawtooth"])
    }

    #[test]
    fn test_ratio_clamps() {
        assert_eq!(Domain::Ratio.normalize(1.7.into()), ParamValue::Ratio(1.0));
        assert_eq!(Domain::Ratio.normalize((-0.2).into()), ParamValue::Ratio(0.0));
        assert_eq!(Domain::Ratio.normalize(f64::NAN.into()), ParamValue::Ratio(0.0));
    }

    #[test]
    fn test_int_clamps() {
        let d = Domain::Int { lo: -2, hi: 2 };
        assert_eq!(d.normalize(5.into()), ParamValue::Int(2));
        assert_eq!(d.normalize((-9).into()), ParamValue::Int(-2));
        assert_eq!(d.normalize(ParamValue::Ratio(0.5)), ParamValue::Int(0));
    }

    #[test]
    fn test_enumeration_wraps() {
        let d = shapes();
        assert_eq!(d.normalize(ParamValue::Choice(5)), ParamValue::Choice(1));
        assert_eq!(d.normalize((-1).into()), ParamValue::Choice(3));
    }

    #[test]
    fn test_boolean_wraps() {
        assert_eq!(Domain::Boolean.normalize(3.into()), ParamValue::Bool(true));
        assert_eq!(Domain::Boolean.normalize(2.into()), ParamValue::Bool(false));
    }

    #[test]
    fn test_validate_rejects_bad_domains() {
        assert!(Domain::Int { lo: 3, hi: 1 }.validate().is_err());
        assert!(Domain::Enumeration(vec![]).validate().is_err());
        assert!(Domain::enumeration(["A", "B", "A"]).validate().is_err());
        assert!(shapes().validate().is_ok());
    }

    #[test]
    fn test_validate_limits_enumerations_to_midi_range() {
        let names = |n: usize| Domain::enumeration((0..n).map(|i| format!("S{}", i)));
        assert!(names(MAX_STATES).validate().is_ok());
        assert!(matches!(
            names(MAX_STATES + 1).validate(),
            Err(SurfaceError::ProgrammingError(_))
        ));
        // every state of the largest domain survives the trip over MIDI
        let full = names(MAX_STATES);
        assert_eq!(full.from_midi(full.to_midi(ParamValue::Choice(127))), ParamValue::Choice(127));
    }

    #[test]
    fn test_midi_conversions() {
        match Domain::Ratio.from_midi(64) {
            ParamValue::Ratio(r) => assert!((r - 64.0 / 127.0).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(Domain::Ratio.to_midi(ParamValue::Ratio(1.0)), 127);
        assert_eq!(Domain::Boolean.from_midi(127), ParamValue::Bool(true));
        assert_eq!(Domain::Boolean.from_midi(10), ParamValue::Bool(false));
        assert_eq!(shapes().from_midi(2), ParamValue::Choice(2));
        assert_eq!(shapes().to_midi(ParamValue::Choice(3)), 3);

        let octave = Domain::Int { lo: -2, hi: 2 };
        assert_eq!(octave.from_midi(0), ParamValue::Int(-2));
        assert_eq!(octave.from_midi(127), ParamValue::Int(2));
        assert_eq!(octave.to_midi(ParamValue::Int(2)), 127);

        let direct = Domain::Int { lo: 0, hi: 10 };
        assert_eq!(direct.from_midi(7), ParamValue::Int(7));
        assert_eq!(direct.from_midi(90), ParamValue::Int(10));
    }

    #[test]
    fn test_step_wraps_cyclic_and_clamps_linear() {
        let d = shapes();
        assert_eq!(d.step(ParamValue::Choice(3), Direction::Up), ParamValue::Choice(0));
        assert_eq!(d.step(ParamValue::Choice(0), Direction::Down), ParamValue::Choice(3));
        assert_eq!(
            Domain::Ratio.step(ParamValue::Ratio(1.0), Direction::Up),
            ParamValue::Ratio(1.0)
        );
        assert_eq!(
            Domain::Int { lo: 0, hi: 3 }.step(ParamValue::Int(0), Direction::Down),
            ParamValue::Int(0)
        );
    }

    #[test]
    fn test_format() {
        assert_eq!(shapes().format(ParamValue::Choice(2)), "Pulse");
        assert_eq!(Domain::Boolean.format(ParamValue::Bool(true)), "on");
        assert_eq!(Domain::Ratio.format(ParamValue::Ratio(0.5)), "50.0%");
    }

    proptest! {
        #[test]
        fn prop_ratio_always_in_bounds(r in proptest::num::f64::ANY) {
            let v = Domain::Ratio.normalize(ParamValue::Ratio(r)).as_ratio().unwrap();
            prop_assert!((0.0..=1.0).contains(&v));
        }

        #[test]
        fn prop_int_always_in_bounds(lo in -1000i32..1000, span in 0i32..1000, raw in any::<i32>()) {
            let d = Domain::Int { lo, hi: lo + span };
            let v = d.normalize(ParamValue::Int(raw)).as_int().unwrap();
            prop_assert!(v >= lo && v <= lo + span);
        }

        #[test]
        fn prop_enumeration_always_member(n in 1usize..12, raw in any::<i32>()) {
            let d = Domain::enumeration((0..n).map(|i| format!("S{}", i)));
            let c = d.normalize(ParamValue::Int(raw)).as_choice().unwrap();
            prop_assert!(c < n);
        }

        #[test]
        fn prop_n_steps_return_to_start(n in 1usize..12, start in 0usize..12) {
            let d = Domain::enumeration((0..n).map(|i| format!("S{}", i)));
            let origin = d.normalize(ParamValue::Choice(start));
            let mut v = origin;
            for _ in 0..n {
                v = d.step(v, Direction::Up);
            }
            prop_assert_eq!(v, origin);
        }
    }
}
