//! Voice scheduling: from pitch-colored notes to per-instance MIDI streams.

mod config;
mod flatten;
mod scheduler;
mod slots;

pub use config::{ModulationMode, PluginTarget, ScheduleConfig};
pub use flatten::{
    MAX_RESIDUAL_CENTS, controller_value, midi_velocity, nearest_key, pitch_bend_value,
};
pub use scheduler::{ScheduleInput, ScheduleOutput, ScheduleSummary, VoiceScheduler};
