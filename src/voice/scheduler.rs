use tracing::{debug, info};

use crate::color::PitchColorMap;
use crate::events::{MessageSequence, MidiMessage};
use crate::timing::{TempoMap, Track};
use crate::tuning::Tuning;

use super::config::{ModulationMode, ScheduleConfig};
use super::flatten::{ChannelEvents, EventKind, FlattenContext};
use super::slots::SlotTable;

/// Everything a scheduling pass reads. Borrowed for the duration of the call.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleInput<'a> {
    pub tracks: &'a [Track],
    pub tempo: &'a TempoMap,
    pub colors: &'a PitchColorMap,
    pub tuning: &'a Tuning,
}

/// Per-instance note and controller sequences, indexed by instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleOutput {
    pub notes: Vec<MessageSequence>,
    pub controllers: Vec<MessageSequence>,
    steals: usize,
}

impl ScheduleOutput {
    fn with_instances(instances: usize) -> Self {
        Self {
            notes: vec![MessageSequence::new(); instances],
            controllers: vec![MessageSequence::new(); instances],
            steals: 0,
        }
    }

    pub fn instance_count(&self) -> usize {
        self.notes.len()
    }

    pub fn instances(&self) -> impl Iterator<Item = (&MessageSequence, &MessageSequence)> {
        self.notes.iter().zip(self.controllers.iter())
    }

    /// Notes cut short to free a slot for another note.
    pub fn steal_count(&self) -> usize {
        self.steals
    }

    pub fn summary(&self) -> ScheduleSummary {
        ScheduleSummary {
            notes_per_instance: self.notes.iter().map(|s| s.note_on_count()).collect(),
            controllers_per_instance: self.controllers.iter().map(|s| s.len()).collect(),
            steals: self.steals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub notes_per_instance: Vec<usize>,
    pub controllers_per_instance: Vec<usize>,
    pub steals: usize,
}

/// Spreads notes over hosted instances so that notes sounding together on
/// one instance always share the same pitch deviation.
///
/// Stateless between calls: every [`VoiceScheduler::schedule`] builds its
/// own slot table and use order.
#[derive(Debug, Clone)]
pub struct VoiceScheduler {
    config: ScheduleConfig,
}

impl VoiceScheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            config: config.sanitized(),
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn schedule(&self, input: ScheduleInput<'_>) -> ScheduleOutput {
        let config = &self.config;
        let mut output = ScheduleOutput::with_instances(config.instances);
        let mut slots = match config.mode {
            ModulationMode::KontaktPerKeyCc => SlotTable::per_pitch_class(config.instances),
            _ => SlotTable::per_instance(config.instances),
        };
        let ctx = FlattenContext {
            tempo: input.tempo,
            colors: input.colors,
            tuning: input.tuning,
            config,
        };

        for channel in 1..=16u8 {
            let events = ctx.flatten_channel(channel, input.tracks);
            if events.events.is_empty() {
                continue;
            }
            debug!(channel, events = events.events.len(), "assigning channel");
            slots.silence();
            assign_channel(channel, &events, &mut slots, &mut output);
        }

        for seq in output.notes.iter_mut().chain(output.controllers.iter_mut()) {
            seq.sort();
            seq.update_matched_pairs();
        }

        info!(
            instances = config.instances,
            slots = slots.len(),
            steals = output.steals,
            "scheduling finished"
        );
        output
    }
}

/// Greedy slot assignment for one channel's events, in processing order.
/// Remembered values are looked up on `channel` only, since controller and
/// bend messages do not carry over to other channels.
fn assign_channel(
    channel: u8,
    events: &ChannelEvents,
    slots: &mut SlotTable,
    output: &mut ScheduleOutput,
) {
    let order = &events.order;
    let events = &events.events;
    let mut assigned: Vec<Option<usize>> = vec![None; events.len()];
    // Note-ons that sent their own controller message.
    let mut controlled = vec![false; events.len()];

    for &idx in order {
        let event = &events[idx];
        match event.kind {
            EventKind::NoteOff { on } => {
                // Stolen notes were already cut and lost their slot.
                if let Some(slot) = assigned[on] {
                    output.notes[slots.instance(slot)].push(event.time, event.note);
                    slots.release(slot, on);
                }
            }
            EventKind::NoteOn => {
                let slot = if let Some(slot) = slots.find_by_value(event.key, channel, event.value)
                {
                    slot
                } else {
                    let slot = match slots.least_recent_idle(event.key) {
                        Some(slot) => slot,
                        None => {
                            // Every eligible slot is busy with another deviation.
                            let Some(slot) = slots.least_recent(event.key) else {
                                continue;
                            };
                            let instance = slots.instance(slot);
                            for stolen in slots.take_sounding(slot) {
                                let victim = &events[stolen];
                                debug!(
                                    instance,
                                    key = victim.key,
                                    at = event.time,
                                    "voice stolen"
                                );
                                // A note stolen at its own onset never sounds,
                                // and neither does its controller.
                                let retracted = victim.time >= event.time
                                    && output.notes[instance].retract(victim.time, victim.note);
                                if retracted {
                                    if let Some(control) =
                                        victim.control.filter(|_| controlled[stolen])
                                    {
                                        output.controllers[instance]
                                            .retract(control.time, control.message);
                                    }
                                } else {
                                    output.notes[instance].push(
                                        event.time,
                                        MidiMessage::NoteOff {
                                            channel: victim.note.channel().unwrap_or(1),
                                            key: victim.key,
                                            velocity: 0,
                                        },
                                    );
                                }
                                assigned[stolen] = None;
                                output.steals += 1;
                            }
                            slot
                        }
                    };
                    if let Some(control) = event.control {
                        output.controllers[slots.instance(slot)].push(control.time, control.message);
                        controlled[idx] = true;
                    }
                    slots.set_value(slot, channel, event.value);
                    slot
                };
                output.notes[slots.instance(slot)].push(event.time, event.note);
                slots.occupy(slot, idx);
                assigned[idx] = Some(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::PitchColor;
    use crate::timing::{Note, TrackElement};

    fn track(channel: u8, notes: &[(u8, f64, f64, &str)]) -> Track {
        let mut track = Track::notes("t", channel).unwrap();
        for &(key, beat, length, color) in notes {
            track
                .insert(TrackElement::Note(Note::new(key, beat, length, 0.8, color)))
                .unwrap();
        }
        track
    }

    fn colors() -> PitchColorMap {
        let mut map = PitchColorMap::new();
        map.insert(PitchColor::new(1, "up50", 50)).unwrap();
        map.insert(PitchColor::new(2, "up25", 25)).unwrap();
        map.insert(PitchColor::new(3, "down25", -25)).unwrap();
        map
    }

    fn run(config: ScheduleConfig, tracks: &[Track]) -> ScheduleOutput {
        let tempo = TempoMap::default();
        let colors = colors();
        let tuning = Tuning::default();
        VoiceScheduler::new(config).schedule(ScheduleInput {
            tracks,
            tempo: &tempo,
            colors: &colors,
            tuning: &tuning,
        })
    }

    fn cc(instances: usize) -> ScheduleConfig {
        ScheduleConfig {
            instances,
            mode: ModulationMode::GenericCc,
            ..ScheduleConfig::default()
        }
    }

    fn controller_values(seq: &MessageSequence) -> Vec<u8> {
        seq.iter()
            .filter_map(|e| match e.message {
                MidiMessage::Controller { value, .. } => Some(value),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_input_gives_empty_sequences() {
        let out = run(cc(3), &[]);
        assert_eq!(out.instance_count(), 3);
        assert!(out.notes.iter().all(|s| s.is_empty()));
        assert!(out.controllers.iter().all(|s| s.is_empty()));
    }

    #[test]
    fn same_deviation_reuses_slot_without_controller() {
        let tracks = vec![track(1, &[(60, 0.0, 1.0, "up25"), (64, 2.0, 1.0, "up25")])];
        let out = run(cc(2), &tracks);
        assert_eq!(out.notes[0].note_on_count(), 2);
        assert_eq!(controller_values(&out.controllers[0]), vec![75]);
        assert!(out.notes[1].is_empty());
    }

    #[test]
    fn chord_with_one_deviation_shares_an_instance() {
        let tracks = vec![track(1, &[(60, 0.0, 1.0, "0"), (64, 0.0, 1.0, "0"), (67, 0.0, 1.0, "0")])];
        let out = run(cc(3), &tracks);
        assert_eq!(out.notes[0].note_on_count(), 3);
        assert_eq!(out.steal_count(), 0);
    }

    #[test]
    fn single_instance_sends_every_new_deviation() {
        let tracks = vec![track(
            1,
            &[(60, 0.0, 1.0, "up25"), (60, 2.0, 1.0, "down25"), (60, 4.0, 1.0, "up50")],
        )];
        let out = run(cc(1), &tracks);
        assert_eq!(controller_values(&out.controllers[0]), vec![75, 25, 100]);
        assert_eq!(out.steal_count(), 0);
    }

    #[test]
    fn overlapping_deviations_split_across_instances() {
        let tracks = vec![track(1, &[(60, 0.0, 1.0, "0"), (60, 0.5, 1.0, "up50")])];
        let out = run(cc(2), &tracks);
        assert_eq!(controller_values(&out.controllers[0]), vec![50]);
        assert_eq!(controller_values(&out.controllers[1]), vec![100]);
        assert_eq!(out.notes[0].note_on_count(), 1);
        assert_eq!(out.notes[1].note_on_count(), 1);
    }

    #[test]
    fn idle_claim_prefers_least_recently_used() {
        // Three deviations in turn on two instances: the third goes back to
        // the instance used longest ago.
        let tracks = vec![track(
            1,
            &[(60, 0.0, 1.0, "up25"), (62, 1.0, 1.0, "down25"), (64, 2.0, 1.0, "up50")],
        )];
        let out = run(cc(2), &tracks);
        assert_eq!(controller_values(&out.controllers[0]), vec![75, 100]);
        assert_eq!(controller_values(&out.controllers[1]), vec![25]);
    }

    #[test]
    fn overflow_steals_least_recent_voice() {
        let tracks = vec![track(1, &[(60, 0.0, 4.0, "up25"), (64, 1.0, 4.0, "down25")])];
        let out = run(cc(1), &tracks);
        assert_eq!(out.steal_count(), 1);

        let seq = &out.notes[0];
        let messages: Vec<(f64, MidiMessage)> = seq.iter().map(|e| (e.time, e.message)).collect();
        // 60 is cut when 64 starts; its own later note-off is dropped.
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[1].1, MidiMessage::NoteOff { key: 60, .. }));
        assert_eq!(messages[1].0, messages[2].0);
        assert!(matches!(messages[2].1, MidiMessage::NoteOn { key: 64, .. }));
        assert!(matches!(messages[3].1, MidiMessage::NoteOff { key: 64, .. }));
        assert!(seq.get(0).unwrap().matched.is_some());
        assert!(seq.get(2).unwrap().matched.is_some());
    }

    #[test]
    fn same_instant_steal_drops_the_victim() {
        let tracks = vec![track(1, &[(60, 0.0, 1.0, "up25"), (64, 0.0, 1.0, "down25")])];
        let out = run(cc(1), &tracks);
        assert_eq!(out.steal_count(), 1);
        let keys: Vec<Option<u8>> = out.notes[0].iter().map(|e| e.message.key()).collect();
        assert_eq!(keys, vec![Some(64), Some(64)]);
        assert!(out.notes[0].get(0).unwrap().matched.is_some());
        assert_eq!(controller_values(&out.controllers[0]), vec![25]);
    }

    #[test]
    fn later_steal_keeps_the_victims_controller() {
        let tracks = vec![track(1, &[(60, 0.0, 1.0, "up25"), (64, 0.5, 1.0, "down25")])];
        let out = run(cc(1), &tracks);
        assert_eq!(out.steal_count(), 1);
        assert_eq!(controller_values(&out.controllers[0]), vec![75, 25]);
    }

    #[test]
    fn kontakt_pitch_classes_do_not_collide() {
        let tracks = vec![track(1, &[(60, 0.0, 1.0, "up25"), (62, 0.0, 1.0, "down25")])];
        let config = ScheduleConfig {
            instances: 1,
            mode: ModulationMode::KontaktPerKeyCc,
            cc_base: 20,
            ..ScheduleConfig::default()
        };
        let out = run(config, &tracks);
        assert_eq!(out.steal_count(), 0);
        assert_eq!(out.notes[0].note_on_count(), 2);
        let controllers: Vec<u8> = out.controllers[0]
            .iter()
            .filter_map(|e| match e.message {
                MidiMessage::Controller { controller, .. } => Some(controller),
                _ => None,
            })
            .collect();
        assert_eq!(controllers, vec![20, 22]);
    }

    #[test]
    fn kontakt_same_class_different_deviation_steals() {
        let tracks = vec![track(1, &[(60, 0.0, 2.0, "up25"), (72, 0.5, 2.0, "down25")])];
        let config = ScheduleConfig {
            instances: 1,
            mode: ModulationMode::KontaktPerKeyCc,
            ..ScheduleConfig::default()
        };
        let out = run(config, &tracks);
        assert_eq!(out.steal_count(), 1);
    }

    #[test]
    fn pitchbend_mode_emits_bends() {
        let tracks = vec![track(1, &[(60, 0.0, 1.0, "up50")])];
        let config = ScheduleConfig {
            instances: 1,
            mode: ModulationMode::Pitchbend,
            bend_range: 2.0,
            ..ScheduleConfig::default()
        };
        let out = run(config, &tracks);
        let bend = out.controllers[0].get(0).unwrap().message;
        assert_eq!(
            bend,
            MidiMessage::PitchBend {
                channel: 1,
                value: 10239
            }
        );
    }

    #[test]
    fn no_modulation_stacks_everything_on_first_instance() {
        let tracks = vec![track(1, &[(60, 0.0, 1.0, "up50"), (64, 0.0, 1.0, "down25")])];
        let config = ScheduleConfig {
            instances: 2,
            mode: ModulationMode::None,
            ..ScheduleConfig::default()
        };
        let out = run(config, &tracks);
        assert_eq!(out.notes[0].note_on_count(), 2);
        assert!(out.controllers.iter().all(|s| s.is_empty()));
    }

    #[test]
    fn channels_keep_their_own_channel_numbers() {
        let tracks = vec![
            track(1, &[(60, 0.0, 1.0, "0")]),
            track(3, &[(62, 0.0, 1.0, "0")]),
        ];
        let out = run(cc(2), &tracks);
        let channels = |seq: &MessageSequence| -> Vec<u8> {
            seq.iter().filter_map(|e| e.message.channel()).collect()
        };
        assert_eq!(channels(&out.notes[0]), vec![1, 1]);
        assert_eq!(channels(&out.controllers[0]), vec![1]);
        assert_eq!(channels(&out.notes[1]), vec![3, 3]);
        assert_eq!(channels(&out.controllers[1]), vec![3]);
    }

    #[test]
    fn remembered_value_does_not_cross_channels() {
        let tracks = vec![
            track(1, &[(60, 0.0, 1.0, "up25")]),
            track(2, &[(64, 2.0, 1.0, "up25")]),
        ];
        let out = run(cc(1), &tracks);
        let controllers: Vec<(u8, u8)> = out.controllers[0]
            .iter()
            .filter_map(|e| match e.message {
                MidiMessage::Controller { channel, value, .. } => Some((channel, value)),
                _ => None,
            })
            .collect();
        assert_eq!(controllers, vec![(1, 75), (2, 75)]);
    }

    #[test]
    fn scheduling_is_deterministic() {
        let tracks = vec![track(
            1,
            &[(60, 0.0, 3.0, "up25"), (62, 0.5, 1.0, "down25"), (64, 1.0, 2.0, "up50"), (65, 1.0, 1.0, "0")],
        )];
        assert_eq!(run(cc(2), &tracks), run(cc(2), &tracks));
    }
}
