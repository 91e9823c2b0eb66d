//! Standard voice sections of the instrument
//!
//! CC numbers here are what the outboard DAC board listens for. Shape and
//! Order go out as their state index and Octave as its raw value, which is
//! how the board decodes them.

use crate::error::Result;
use crate::parameter::{ParameterRegistry, ParameterSpec};
use crate::rack::ModuleRack;

pub const VCO3340: &str = "vco3340";
pub const VCO13700: &str = "vco13700";
pub const VCF: &str = "vcf";
pub const VCA: &str = "vca";

// Parameter labels shared with the presentation layer
pub const SHAPE: &str = "Shape";
pub const DUTY: &str = "Duty";
pub const SYNC: &str = "Sync";
pub const OCTAVE: &str = "Octave";
pub const DETUNE: &str = "Detune";
pub const LEVEL: &str = "Level";
pub const WAVE: &str = "Wave";
pub const CUTOFF: &str = "Cutoff";
pub const RESONANCE: &str = "Resonance";
pub const ORDER: &str = "Order";
pub const KBD_TRACKING: &str = "KbdTracking";
pub const EG_DEPTH: &str = "EgDepth";
pub const ATTACK: &str = "Attack";
pub const DECAY: &str = "Decay";
pub const SUSTAIN: &str = "Sustain";
pub const RELEASE: &str = "Release";
pub const VELOCITY: &str = "Velocity";

/// Waveforms of the 3340 VCO, in CC index order (one analog switch each)
pub const WAVE_SHAPES: [&str; 3] = ["Pulse", "Triangle", "Sawtooth"];

/// Octave selector range; the board plays `note + 12 * (octave - 1)`
pub const OCTAVE_RANGE: (i32, i32) = (0, 3);
pub const OCTAVE_DEFAULT: i32 = 1;

/// VCF slopes, in CC index order
pub const FILTER_ORDERS: [&str; 2] = ["2nd", "4th"];

fn octave() -> ParameterSpec {
    let (lo, hi) = OCTAVE_RANGE;
    ParameterSpec::int(OCTAVE, lo, hi).default_value(OCTAVE_DEFAULT)
}

pub fn vco3340() -> Result<ParameterRegistry> {
    let mut reg = ParameterRegistry::new(VCO3340);
    reg.declare(ParameterSpec::enumeration(SHAPE, WAVE_SHAPES).cc(20))?;
    reg.declare(ParameterSpec::ratio(DUTY).cc(7).default_value(0.5))?;
    reg.declare(ParameterSpec::boolean(SYNC).cc(21))?;
    reg.declare(octave().cc(22))?;
    reg.declare(ParameterSpec::ratio(DETUNE).cc(23).default_value(0.5))?;
    reg.declare(ParameterSpec::ratio(LEVEL).cc(24).default_value(0.8))?;
    Ok(reg)
}

pub fn vco13700() -> Result<ParameterRegistry> {
    let mut reg = ParameterRegistry::new(VCO13700);
    // triangle <-> square crossfade
    reg.declare(ParameterSpec::ratio(WAVE).cc(25))?;
    reg.declare(octave().cc(26))?;
    reg.declare(ParameterSpec::ratio(DETUNE).cc(27).default_value(0.5))?;
    reg.declare(ParameterSpec::ratio(LEVEL).cc(28).default_value(0.8))?;
    Ok(reg)
}

pub fn vcf() -> Result<ParameterRegistry> {
    let mut reg = ParameterRegistry::new(VCF);
    reg.declare(ParameterSpec::ratio(CUTOFF).cc(74).default_value(0.5))?;
    reg.declare(ParameterSpec::ratio(RESONANCE).cc(71))?;
    reg.declare(ParameterSpec::enumeration(ORDER, FILTER_ORDERS).cc(29))?;
    reg.declare(ParameterSpec::ratio(KBD_TRACKING).cc(30))?;
    reg.declare(ParameterSpec::ratio(EG_DEPTH).cc(31).default_value(0.5))?;
    reg.declare(ParameterSpec::ratio(ATTACK).cc(102))?;
    reg.declare(ParameterSpec::ratio(DECAY).cc(103).default_value(0.3))?;
    reg.declare(ParameterSpec::ratio(SUSTAIN).cc(104).default_value(0.7))?;
    reg.declare(ParameterSpec::ratio(RELEASE).cc(105).default_value(0.3))?;
    reg.declare(ParameterSpec::ratio(VELOCITY).cc(106))?;
    Ok(reg)
}

pub fn vca() -> Result<ParameterRegistry> {
    let mut reg = ParameterRegistry::new(VCA);
    reg.declare(ParameterSpec::ratio(ATTACK).cc(73))?;
    reg.declare(ParameterSpec::ratio(DECAY).cc(75).default_value(0.3))?;
    reg.declare(ParameterSpec::ratio(SUSTAIN).cc(76).default_value(0.7))?;
    reg.declare(ParameterSpec::ratio(RELEASE).cc(72).default_value(0.3))?;
    reg.declare(ParameterSpec::ratio(VELOCITY).cc(107))?;
    Ok(reg)
}

/// The full instrument: both VCOs, the filter and the amplifier
pub fn standard_rack() -> Result<ModuleRack> {
    let mut rack = ModuleRack::new();
    rack.add(vco3340()?)?;
    rack.add(vco13700()?)?;
    rack.add(vcf()?)?;
    rack.add(vca()?)?;
    Ok(rack)
}
