//! Turning a channel's notes into a time-ordered stream of synthetic events.

use crate::color::PitchColorMap;
use crate::events::MidiMessage;
use crate::timing::{Note, TempoMap, Track};
use crate::tuning::Tuning;

use super::config::{ModulationMode, ScheduleConfig};

/// Largest deviation a note may keep after being moved to its nearest key.
pub const MAX_RESIDUAL_CENTS: f64 = 50.0;

/// Move a key by whole semitones until the remaining deviation lies in
/// (-50, 50] cents. The key is clamped to the MIDI range afterwards.
pub fn nearest_key(key: u8, cents: f64) -> (u8, f64) {
    let mut key = key as i32;
    let mut cents = if cents.is_finite() { cents } else { 0.0 };
    while cents > MAX_RESIDUAL_CENTS {
        key += 1;
        cents -= 100.0;
    }
    while cents <= -MAX_RESIDUAL_CENTS {
        key -= 1;
        cents += 100.0;
    }
    (key.clamp(0, 127) as u8, cents)
}

/// 14-bit bend for a residual deviation, `range` semitones each way.
pub fn pitch_bend_value(cents: f64, range: f64) -> u16 {
    let normalized = (cents / 100.0 + range) / (2.0 * range);
    (normalized * 16383.0).round().clamp(0.0, 16383.0) as u16
}

/// Controller value for a residual deviation, 50 meaning in tune.
pub fn controller_value(cents: f64) -> u8 {
    (cents.round() as i32 + 50).clamp(0, 127) as u8
}

pub fn midi_velocity(velocity: f64) -> u8 {
    (velocity * 127.0).round().clamp(1.0, 127.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum EventKind {
    NoteOn,
    /// Index of the matching note-on in the same arena.
    NoteOff { on: usize },
}

/// A controller or pitch-bend message that sets up a note's deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ControlMessage {
    pub time: f64,
    pub message: MidiMessage,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SyntheticEvent {
    pub time: f64,
    pub key: u8,
    pub velocity: u8,
    pub note: MidiMessage,
    /// Only present on note-ons, and only when a modulation mode is active.
    pub control: Option<ControlMessage>,
    /// The deviation value slots compare for reuse.
    pub value: u16,
    pub kind: EventKind,
}

impl SyntheticEvent {
    pub fn is_note_on(&self) -> bool {
        self.kind == EventKind::NoteOn
    }
}

/// Events of one MIDI channel. `events` is an arena that never moves;
/// `order` lists arena indices in processing order.
#[derive(Debug, Default)]
pub(crate) struct ChannelEvents {
    pub events: Vec<SyntheticEvent>,
    pub order: Vec<usize>,
}

pub(crate) struct FlattenContext<'a> {
    pub tempo: &'a TempoMap,
    pub colors: &'a PitchColorMap,
    pub tuning: &'a Tuning,
    pub config: &'a ScheduleConfig,
}

impl FlattenContext<'_> {
    /// Collect every note of `channel`, track by track, and order the
    /// resulting events by (time, note-off first, key, louder first).
    pub fn flatten_channel(&self, channel: u8, tracks: &[Track]) -> ChannelEvents {
        let mut out = ChannelEvents::default();
        for track in tracks.iter().filter(|t| t.channel() == Some(channel)) {
            let mut cursor = self.tempo.cursor();
            for note in track.note_iter() {
                let (start, seconds_per_beat) = match self.config.time_mult {
                    Some(mult) => (note.beat * mult, mult),
                    None => (cursor.seconds_at(note.beat), cursor.seconds_per_beat()),
                };
                let end = start + note.length * seconds_per_beat;
                self.push_note(&mut out.events, channel, note, start, end);
            }
        }

        out.order = (0..out.events.len()).collect();
        let events = &out.events;
        out.order.sort_by(|&a, &b| {
            let (a, b) = (&events[a], &events[b]);
            a.time
                .total_cmp(&b.time)
                .then_with(|| a.is_note_on().cmp(&b.is_note_on()))
                .then_with(|| a.key.cmp(&b.key))
                .then_with(|| b.velocity.cmp(&a.velocity))
        });
        out
    }

    fn push_note(
        &self,
        events: &mut Vec<SyntheticEvent>,
        channel: u8,
        note: &Note,
        start: f64,
        end: f64,
    ) {
        let mode = self.config.mode;
        let mut cents = self.colors.resolve(&note.color) as f64;
        if mode != ModulationMode::None {
            cents += self.tuning.offset_cents(note.key);
        }
        let (key, residual) = nearest_key(note.key, cents);
        let velocity = midi_velocity(note.velocity);
        let control_time = (start - self.config.cc_lead_time).max(0.0);

        let (value, control) = match mode {
            ModulationMode::None => (0, None),
            ModulationMode::Pitchbend => {
                let value = pitch_bend_value(residual, self.config.bend_range);
                (value, Some(MidiMessage::PitchBend { channel, value }))
            }
            ModulationMode::GenericCc | ModulationMode::KontaktPerKeyCc => {
                let controller = if mode == ModulationMode::KontaktPerKeyCc {
                    self.config.cc_base + key % 12
                } else {
                    self.config.cc_base
                };
                let value = controller_value(residual);
                (
                    value as u16,
                    Some(MidiMessage::Controller {
                        channel,
                        controller,
                        value,
                    }),
                )
            }
        };

        let on = events.len();
        events.push(SyntheticEvent {
            time: start,
            key,
            velocity,
            note: MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            },
            control: control.map(|message| ControlMessage {
                time: control_time,
                message,
            }),
            value,
            kind: EventKind::NoteOn,
        });
        events.push(SyntheticEvent {
            time: end,
            key,
            velocity: 0,
            note: MidiMessage::NoteOff {
                channel,
                key,
                velocity: 0,
            },
            control: None,
            value,
            kind: EventKind::NoteOff { on },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::PitchColor;
    use crate::timing::{TempoMarker, TrackElement};

    #[test]
    fn nearest_key_keeps_residual_within_quarter_tone() {
        for cents in -400..=400 {
            let (_, residual) = nearest_key(60, cents as f64);
            assert!(residual > -50.0 && residual <= 50.0, "{cents} -> {residual}");
        }
        assert_eq!(nearest_key(60, 50.0), (60, 50.0));
        assert_eq!(nearest_key(60, -50.0), (59, 50.0));
        assert_eq!(nearest_key(60, 51.0), (61, -49.0));
        assert_eq!(nearest_key(60, 250.0), (62, 50.0));
    }

    #[test]
    fn nearest_key_clamps_to_midi_range() {
        assert_eq!(nearest_key(127, 80.0).0, 127);
        assert_eq!(nearest_key(0, -80.0).0, 0);
    }

    #[test]
    fn pitch_bend_centre_and_extremes() {
        assert_eq!(pitch_bend_value(0.0, 2.0), 8192);
        assert_eq!(pitch_bend_value(200.0, 2.0), 16383);
        assert_eq!(pitch_bend_value(-200.0, 2.0), 0);
        assert_eq!(pitch_bend_value(-900.0, 2.0), 0);
    }

    #[test]
    fn controller_value_centres_on_fifty() {
        assert_eq!(controller_value(0.0), 50);
        assert_eq!(controller_value(50.0), 100);
        assert_eq!(controller_value(-49.0), 1);
    }

    #[test]
    fn velocity_never_reaches_zero() {
        assert_eq!(midi_velocity(0.0), 1);
        assert_eq!(midi_velocity(1.0), 127);
        assert_eq!(midi_velocity(0.5), 64);
    }

    fn track(channel: u8, notes: &[(u8, f64, f64, f64, &str)]) -> Track {
        let mut track = Track::notes("t", channel).unwrap();
        for &(key, beat, length, velocity, color) in notes {
            track
                .insert(TrackElement::Note(Note::new(key, beat, length, velocity, color)))
                .unwrap();
        }
        track
    }

    fn flatten(
        tracks: &[Track],
        tempo: &TempoMap,
        colors: &PitchColorMap,
        config: &ScheduleConfig,
    ) -> ChannelEvents {
        let tuning = Tuning::default();
        let ctx = FlattenContext {
            tempo,
            colors,
            tuning: &tuning,
            config,
        };
        ctx.flatten_channel(1, tracks)
    }

    #[test]
    fn tie_break_orders_key_then_velocity() {
        let tracks = vec![track(
            1,
            &[(64, 0.0, 1.0, 0.5, "0"), (60, 0.0, 1.0, 0.2, "0"), (60, 0.0, 1.0, 0.9, "0")],
        )];
        let out = flatten(
            &tracks,
            &TempoMap::default(),
            &PitchColorMap::new(),
            &ScheduleConfig::default(),
        );
        let ons: Vec<(u8, u8)> = out
            .order
            .iter()
            .map(|&i| &out.events[i])
            .filter(|e| e.is_note_on())
            .map(|e| (e.key, e.velocity))
            .collect();
        assert_eq!(ons, vec![(60, 114), (60, 25), (64, 64)]);
    }

    #[test]
    fn other_channels_are_ignored() {
        let tracks = vec![track(2, &[(60, 0.0, 1.0, 0.5, "0")])];
        let out = flatten(
            &tracks,
            &TempoMap::default(),
            &PitchColorMap::new(),
            &ScheduleConfig::default(),
        );
        assert!(out.events.is_empty());
    }

    #[test]
    fn note_off_uses_tempo_at_note_start() {
        let tracks = vec![track(1, &[(60, 8.0, 2.0, 0.5, "0")])];
        let tempo = TempoMap::new(vec![
            TempoMarker { beat: 0.0, bpm: 120.0 },
            TempoMarker { beat: 4.0, bpm: 60.0 },
        ]);
        let out = flatten(&tracks, &tempo, &PitchColorMap::new(), &ScheduleConfig::default());
        assert!((out.events[0].time - 6.0).abs() < 1e-9);
        assert!((out.events[1].time - 8.0).abs() < 1e-9);
        assert_eq!(out.events[1].kind, EventKind::NoteOff { on: 0 });
    }

    #[test]
    fn time_mult_bypasses_tempo_map() {
        let tracks = vec![track(1, &[(60, 8.0, 2.0, 0.5, "0")])];
        let config = ScheduleConfig {
            time_mult: Some(0.25),
            ..ScheduleConfig::default()
        };
        let tempo = TempoMap::constant(30.0);
        let out = flatten(&tracks, &tempo, &PitchColorMap::new(), &config);
        assert!((out.events[0].time - 2.0).abs() < 1e-9);
        assert!((out.events[1].time - 2.5).abs() < 1e-9);
    }

    #[test]
    fn controller_is_pre_rolled_but_not_before_zero() {
        let tracks = vec![track(1, &[(60, 0.0, 1.0, 0.5, "0"), (62, 2.0, 1.0, 0.5, "0")])];
        let config = ScheduleConfig {
            cc_lead_time: 0.1,
            ..ScheduleConfig::default()
        };
        let out = flatten(&tracks, &TempoMap::default(), &PitchColorMap::new(), &config);
        let controls: Vec<f64> = out
            .events
            .iter()
            .filter_map(|e| e.control.map(|c| c.time))
            .collect();
        assert_eq!(controls.len(), 2);
        assert_eq!(controls[0], 0.0);
        assert!((controls[1] - 0.9).abs() < 1e-9);
    }

    #[test]
    fn kontakt_controller_follows_pitch_class() {
        let mut colors = PitchColorMap::new();
        colors.insert(PitchColor::new(1, "sharp", 120)).unwrap();
        let tracks = vec![track(1, &[(60, 0.0, 1.0, 0.5, "sharp")])];
        let config = ScheduleConfig {
            mode: ModulationMode::KontaktPerKeyCc,
            cc_base: 20,
            ..ScheduleConfig::default()
        };
        let out = flatten(&tracks, &TempoMap::default(), &colors, &config);
        let on = &out.events[0];
        assert_eq!(on.key, 61);
        assert_eq!(
            on.control.unwrap().message,
            MidiMessage::Controller {
                channel: 1,
                controller: 21,
                value: 70
            }
        );
    }

    #[test]
    fn no_modulation_ignores_tuning_and_emits_no_control() {
        let tracks = vec![track(1, &[(60, 0.0, 1.0, 0.5, "0")])];
        let config = ScheduleConfig {
            mode: ModulationMode::None,
            ..ScheduleConfig::default()
        };
        let mut tuning = Tuning::default();
        tuning.pitch_class_cents[0] = 80.0;
        let tempo = TempoMap::default();
        let colors = PitchColorMap::new();
        let ctx = FlattenContext {
            tempo: &tempo,
            colors: &colors,
            tuning: &tuning,
            config: &config,
        };
        let out = ctx.flatten_channel(1, &tracks);
        assert_eq!(out.events[0].key, 60);
        assert!(out.events[0].control.is_none());
    }
}
