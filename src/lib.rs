//! Microtonal MIDI voice scheduling: notes tagged with pitch colors are
//! spread over several hosted instances so that every instance only ever
//! carries one pitch deviation at a time.

pub mod color;
pub mod engine;
pub mod error;
pub mod events;
pub mod export;
pub mod instances;
pub mod player;
pub mod project;
pub mod timing;
pub mod tuning;
pub mod voice;

pub use color::{ColorMapError, NEUTRAL, PitchColor, PitchColorMap};
pub use engine::{EngineCommand, EngineError, EngineHandle, EngineUpdate, spawn_engine};
pub use error::{Error, Result};
pub use events::{MessageSequence, MidiMessage, TimedMessage};
pub use export::{ExportAdapter, ExportError, TICKS_PER_QUARTER, TickClock, write_smf};
pub use instances::InstanceBank;
pub use player::{MidiPlayer, PlayerError, output_ports};
pub use project::{HostedPlugin, Project, ProjectError};
pub use tuning::Tuning;
pub use voice::{
    ModulationMode, PluginTarget, ScheduleConfig, ScheduleInput, ScheduleOutput, ScheduleSummary,
    VoiceScheduler,
};
