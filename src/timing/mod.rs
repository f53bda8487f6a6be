mod signature;
mod tempo;
mod track;

pub use signature::TimeSignatureMap;
pub use tempo::{DEFAULT_BPM, TempoCursor, TempoMap};
pub use track::{Note, TempoMarker, TimeSignatureMarker, Track, TrackElement, TrackError, TrackKind};
