//! LedSyncObserver - mirrors parameters onto LED matrix rows

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::led::registers::COLS;
use crate::led::{Half, LedMatrix};
use crate::parameter::{ChangeListener, Domain, ParamValue, Parameter, ParameterChange};

/// How a parameter is drawn on one row of one matrix half
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum LedDisplay {
    /// VU-style bar from column 0, `round(position * 8)` LEDs lit
    BarGraph { row: u8, half: Half },
    /// Exactly one LED at the value's index
    Selector { row: u8, half: Half },
}

impl LedDisplay {
    pub fn row(&self) -> u8 {
        match *self {
            LedDisplay::BarGraph { row, .. } | LedDisplay::Selector { row, .. } => row,
        }
    }

    pub fn half(&self) -> Half {
        match *self {
            LedDisplay::BarGraph { half, .. } | LedDisplay::Selector { half, .. } => half,
        }
    }

    /// Row bit pattern for `value` in `domain`
    pub fn pattern(&self, domain: &Domain, value: ParamValue) -> u8 {
        match self {
            LedDisplay::BarGraph { .. } => {
                let lit = (domain.normalized(value) * COLS as f64).round() as u32;
                ((1u16 << lit.min(COLS as u32)) - 1) as u8
            }
            LedDisplay::Selector { .. } => {
                let index = match domain.normalize(value) {
                    ParamValue::Bool(false) => return 0,
                    ParamValue::Bool(true) => 0,
                    ParamValue::Choice(c) => c,
                    ParamValue::Int(i) => match domain {
                        Domain::Int { lo, .. } => (i as i64 - *lo as i64) as usize,
                        _ => 0,
                    },
                    ParamValue::Ratio(r) => (r * (COLS - 1) as f64).round() as usize,
                };
                1 << index.min(COLS as usize - 1)
            }
        }
    }
}

/// Writes a parameter's row on the selected frame page on every change
pub struct LedSyncObserver {
    device: Arc<LedMatrix>,
    display: LedDisplay,
}

impl LedSyncObserver {
    pub fn new(device: Arc<LedMatrix>, display: LedDisplay) -> Self {
        Self { device, display }
    }

    /// Register on `parameter` and draw its current value
    pub fn attach(device: Arc<LedMatrix>, display: LedDisplay, parameter: &Parameter) {
        let observer = Arc::new(Self::new(device, display));
        observer.draw(parameter, parameter.value());
        parameter.add_listener(observer);
    }

    fn draw(&self, parameter: &Parameter, value: ParamValue) {
        let bits = self.display.pattern(parameter.domain(), value);
        if let Err(e) = self
            .device
            .switch_led_row(self.display.row(), self.display.half(), bits)
        {
            warn!(
                "⚠️  LED update for {} dropped: {}",
                parameter.qualified_name(),
                e
            );
        }
    }
}

impl ChangeListener for LedSyncObserver {
    fn on_change(&self, change: &ParameterChange<'_>) {
        self.draw(change.parameter, change.new);
    }
}
