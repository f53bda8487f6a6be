use serde::{Deserialize, Serialize};
use tracing::warn;

/// How a note's pitch deviation reaches the hosted instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModulationMode {
    /// Plain 12-TET, no controller stream.
    None,
    /// 14-bit pitch bend scaled by `bend_range`.
    Pitchbend,
    /// One controller (`cc_base`) carrying `cents + 50`.
    #[default]
    GenericCc,
    /// One controller per pitch class (`cc_base + key % 12`), with slots
    /// split by pitch class inside every instance.
    KontaktPerKeyCc,
}

/// Which hosted plugin a setting applies to. Kept apart from
/// [`ModulationMode`] on purpose: one selects a plugin, the other a routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PluginTarget {
    Synth,
    PitchShifter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Number of hosted instances the voices are spread over.
    pub instances: usize,
    pub cc_base: u8,
    pub mode: ModulationMode,
    /// Semitones in each direction, only used in pitch-bend mode.
    pub bend_range: f64,
    /// Seconds the controller message is sent ahead of its note-on.
    pub cc_lead_time: f64,
    /// Flat seconds-per-beat, bypassing the tempo map when set.
    pub time_mult: Option<f64>,
    /// Plugin that receives the controller stream.
    #[serde(default = "default_target")]
    pub modulation_target: PluginTarget,
}

fn default_target() -> PluginTarget {
    PluginTarget::Synth
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            instances: 4,
            cc_base: 20,
            mode: ModulationMode::default(),
            bend_range: 2.0,
            cc_lead_time: 0.0,
            time_mult: None,
            modulation_target: default_target(),
        }
    }
}

impl ScheduleConfig {
    /// Number of slots the allocator manages.
    pub fn slot_count(&self) -> usize {
        match self.mode {
            ModulationMode::KontaktPerKeyCc => self.instances * 12,
            _ => self.instances,
        }
    }

    /// Copy with out-of-range values pulled back into range. Scheduling never
    /// fails, so bad settings are repaired and logged instead of rejected.
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        if config.instances == 0 {
            warn!("instance count 0, scheduling onto a single instance");
            config.instances = 1;
        }
        if config.mode == ModulationMode::Pitchbend
            && !(config.bend_range.is_finite() && config.bend_range > 0.0)
        {
            warn!(range = config.bend_range, "invalid pitch bend range, using 2 semitones");
            config.bend_range = 2.0;
        }
        let highest = match config.mode {
            ModulationMode::KontaktPerKeyCc => 11,
            _ => 0,
        };
        if config.cc_base as u16 + highest > 127 {
            warn!(cc_base = config.cc_base, "controller numbers exceed 127, lowering base");
            config.cc_base = (127 - highest) as u8;
        }
        if !(config.cc_lead_time.is_finite() && config.cc_lead_time >= 0.0) {
            warn!(lead = config.cc_lead_time, "invalid controller lead time, using 0");
            config.cc_lead_time = 0.0;
        }
        if let Some(mult) = config.time_mult {
            if !(mult.is_finite() && mult > 0.0) {
                warn!(mult, "invalid time multiplier, falling back to the tempo map");
                config.time_mult = None;
            }
        }
        config
    }
}
