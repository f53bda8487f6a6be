//! Assembling scheduled streams into standalone sequences and MIDI files.

use std::fs;
use std::path::{Path, PathBuf};

use midly::num::{u4, u7, u14, u15, u24, u28};
use midly::{Format, Header, MetaMessage, PitchBend, Smf, Timing, TrackEvent, TrackEventKind};
use thiserror::Error;
use tracing::{debug, info};

use crate::events::{MessageSequence, MidiMessage};
use crate::timing::{TempoMap, TimeSignatureMap};
use crate::voice::{ModulationMode, ScheduleConfig, ScheduleOutput};

pub const TICKS_PER_QUARTER: u16 = 960;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write MIDI file: {0}")]
    Io(#[from] std::io::Error),
    #[error("nothing to export")]
    Empty,
}

/// Seconds to file ticks, either through the tempo map or a flat rate.
#[derive(Debug, Clone, Copy)]
pub enum TickClock<'a> {
    Tempo(&'a TempoMap),
    Flat { seconds_per_beat: f64 },
}

impl TickClock<'_> {
    pub fn beats(&self, seconds: f64) -> f64 {
        match self {
            TickClock::Tempo(map) => map.beat_at_seconds(seconds),
            TickClock::Flat { seconds_per_beat } => seconds / seconds_per_beat,
        }
    }

    pub fn seconds(&self, beat: f64) -> f64 {
        match self {
            TickClock::Tempo(map) => map.seconds_at(beat),
            TickClock::Flat { seconds_per_beat } => beat * seconds_per_beat,
        }
    }

    pub fn ticks(&self, seconds: f64) -> u32 {
        let ticks = (self.beats(seconds.max(0.0)) * TICKS_PER_QUARTER as f64).round();
        ticks.clamp(0.0, 0x0FFF_FFFF as f64) as u32
    }
}

/// Merges each instance's notes and controllers with copies of the tempo
/// and time-signature events, so every sequence can stand on its own.
pub struct ExportAdapter<'a> {
    tempo: &'a TempoMap,
    signatures: &'a TimeSignatureMap,
    config: &'a ScheduleConfig,
}

impl<'a> ExportAdapter<'a> {
    pub fn new(
        tempo: &'a TempoMap,
        signatures: &'a TimeSignatureMap,
        config: &'a ScheduleConfig,
    ) -> Self {
        Self {
            tempo,
            signatures,
            config,
        }
    }

    pub fn clock(&self) -> TickClock<'a> {
        match self.config.time_mult {
            Some(seconds_per_beat) if seconds_per_beat > 0.0 => TickClock::Flat { seconds_per_beat },
            _ => TickClock::Tempo(self.tempo),
        }
    }

    pub fn assemble(&self, output: &ScheduleOutput) -> Vec<MessageSequence> {
        output
            .instances()
            .map(|(notes, controllers)| self.assemble_instance(notes, controllers))
            .collect()
    }

    fn assemble_instance(
        &self,
        notes: &MessageSequence,
        controllers: &MessageSequence,
    ) -> MessageSequence {
        let mut seq = self.meta_events();
        if self.config.mode == ModulationMode::Pitchbend {
            let mut channels: Vec<u8> = notes.iter().filter_map(|e| e.message.channel()).collect();
            channels.sort_unstable();
            channels.dedup();
            for channel in channels {
                push_bend_range(&mut seq, channel, self.config.bend_range);
            }
        }
        seq.extend_from(controllers);
        seq.extend_from(notes);
        seq.sort();
        let end = seq.end_time();
        seq.push(end, MidiMessage::EndOfTrack);
        seq.update_matched_pairs();
        seq
    }

    fn meta_events(&self) -> MessageSequence {
        let clock = self.clock();
        let mut seq = MessageSequence::new();
        match clock {
            TickClock::Flat { seconds_per_beat } => {
                seq.push(0.0, tempo_message(60.0 / seconds_per_beat));
            }
            TickClock::Tempo(map) => {
                for marker in map.markers() {
                    seq.push(map.seconds_at(marker.beat), tempo_message(marker.bpm));
                }
            }
        }
        for sig in self.signatures.markers() {
            seq.push(
                clock.seconds(sig.beat),
                MidiMessage::TimeSignature {
                    numerator: sig.numerator,
                    denominator: sig.denominator,
                },
            );
        }
        seq
    }

    /// Write `<stem>_<i>.mid` per instance into `dir`.
    pub fn export_instances(
        &self,
        output: &ScheduleOutput,
        dir: &Path,
        stem: &str,
    ) -> Result<Vec<PathBuf>, ExportError> {
        if output.instance_count() == 0 {
            return Err(ExportError::Empty);
        }
        fs::create_dir_all(dir)?;
        let clock = self.clock();
        let mut paths = Vec::with_capacity(output.instance_count());
        for (i, seq) in self.assemble(output).iter().enumerate() {
            let path = dir.join(format!("{stem}_{i}.mid"));
            write_smf(&path, std::slice::from_ref(seq), clock)?;
            debug!(path = %path.display(), events = seq.len(), "wrote instance");
            paths.push(path);
        }
        info!(files = paths.len(), dir = %dir.display(), "export finished");
        Ok(paths)
    }
}

fn tempo_message(bpm: f64) -> MidiMessage {
    MidiMessage::Tempo {
        micros_per_quarter: (60_000_000.0 / bpm).round() as u32,
    }
}

/// RPN 0 (pitch-bend sensitivity) set to `range` semitones, then RPN null.
fn push_bend_range(seq: &mut MessageSequence, channel: u8, range: f64) {
    let semitones = range.trunc().clamp(0.0, 127.0) as u8;
    let cents = ((range - range.trunc()) * 100.0).round().clamp(0.0, 99.0) as u8;
    for (controller, value) in [(101, 0), (100, 0), (6, semitones), (38, cents), (101, 127), (100, 127)] {
        seq.push(
            0.0,
            MidiMessage::Controller {
                channel,
                controller,
                value,
            },
        );
    }
}

/// Build an in-memory SMF: single-track format for one sequence, parallel
/// otherwise.
pub fn to_smf(sequences: &[MessageSequence], clock: TickClock<'_>) -> Smf<'static> {
    let format = if sequences.len() == 1 {
        Format::SingleTrack
    } else {
        Format::Parallel
    };
    let mut smf = Smf::new(Header::new(
        format,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));
    for seq in sequences {
        let mut last = 0u32;
        let mut track = Vec::with_capacity(seq.len() + 1);
        for event in seq {
            let kind = track_event_kind(&event.message);
            let ticks = clock.ticks(event.time).max(last);
            track.push(TrackEvent {
                delta: u28::new(ticks - last),
                kind,
            });
            last = ticks;
        }
        if !seq.iter().any(|e| e.message == MidiMessage::EndOfTrack) {
            track.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            });
        }
        smf.tracks.push(track);
    }
    smf
}

pub fn write_smf(
    path: &Path,
    sequences: &[MessageSequence],
    clock: TickClock<'_>,
) -> Result<(), ExportError> {
    to_smf(sequences, clock).save(path)?;
    Ok(())
}

fn track_event_kind(message: &MidiMessage) -> TrackEventKind<'static> {
    let channel_of = |c: u8| u4::new(c.saturating_sub(1) & 0x0F);
    let seven = |v: u8| u7::new(v & 0x7F);
    match *message {
        MidiMessage::NoteOn {
            channel,
            key,
            velocity,
        } => TrackEventKind::Midi {
            channel: channel_of(channel),
            message: midly::MidiMessage::NoteOn {
                key: seven(key),
                vel: seven(velocity),
            },
        },
        MidiMessage::NoteOff {
            channel,
            key,
            velocity,
        } => TrackEventKind::Midi {
            channel: channel_of(channel),
            message: midly::MidiMessage::NoteOff {
                key: seven(key),
                vel: seven(velocity),
            },
        },
        MidiMessage::Controller {
            channel,
            controller,
            value,
        } => TrackEventKind::Midi {
            channel: channel_of(channel),
            message: midly::MidiMessage::Controller {
                controller: seven(controller),
                value: seven(value),
            },
        },
        MidiMessage::PitchBend { channel, value } => TrackEventKind::Midi {
            channel: channel_of(channel),
            message: midly::MidiMessage::PitchBend {
                bend: PitchBend(u14::new(value & 0x3FFF)),
            },
        },
        MidiMessage::Tempo { micros_per_quarter } => {
            TrackEventKind::Meta(MetaMessage::Tempo(u24::new(micros_per_quarter.min(0xFF_FFFF))))
        }
        MidiMessage::TimeSignature {
            numerator,
            denominator,
        } => {
            // clocks per click, 32nds per quarter
            TrackEventKind::Meta(MetaMessage::TimeSignature(
                numerator,
                denominator.max(1).trailing_zeros() as u8,
                24,
                8,
            ))
        }
        MidiMessage::EndOfTrack => TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }
}
