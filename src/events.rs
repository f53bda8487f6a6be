use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// MIDI channels are 1-based here, as shown to users. Conversion to the
/// 0-based wire nibble happens in [`MidiMessage::to_bytes`] and on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiMessage {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    Controller { channel: u8, controller: u8, value: u8 },
    /// 14-bit bend, 8192 = centre.
    PitchBend { channel: u8, value: u16 },
    Tempo { micros_per_quarter: u32 },
    TimeSignature { numerator: u8, denominator: u8 },
    EndOfTrack,
}

impl MidiMessage {
    pub fn is_note_on(&self) -> bool {
        matches!(self, MidiMessage::NoteOn { .. })
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self, MidiMessage::NoteOff { .. })
    }

    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            MidiMessage::Tempo { .. } | MidiMessage::TimeSignature { .. } | MidiMessage::EndOfTrack
        )
    }

    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::Controller { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Same message moved to another channel. Meta messages are returned unchanged.
    pub fn with_channel(self, new_channel: u8) -> Self {
        match self {
            MidiMessage::NoteOn { key, velocity, .. } => MidiMessage::NoteOn {
                channel: new_channel,
                key,
                velocity,
            },
            MidiMessage::NoteOff { key, velocity, .. } => MidiMessage::NoteOff {
                channel: new_channel,
                key,
                velocity,
            },
            MidiMessage::Controller {
                controller, value, ..
            } => MidiMessage::Controller {
                channel: new_channel,
                controller,
                value,
            },
            MidiMessage::PitchBend { value, .. } => MidiMessage::PitchBend {
                channel: new_channel,
                value,
            },
            other => other,
        }
    }

    pub fn key(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Raw wire bytes for channel messages; `None` for meta events, which
    /// only exist in files.
    pub fn to_bytes(&self) -> Option<[u8; 3]> {
        let nibble = |channel: u8| channel.saturating_sub(1) & 0x0F;
        match *self {
            MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            } => Some([0x90 | nibble(channel), key & 0x7F, velocity & 0x7F]),
            MidiMessage::NoteOff {
                channel,
                key,
                velocity,
            } => Some([0x80 | nibble(channel), key & 0x7F, velocity & 0x7F]),
            MidiMessage::Controller {
                channel,
                controller,
                value,
            } => Some([0xB0 | nibble(channel), controller & 0x7F, value & 0x7F]),
            MidiMessage::PitchBend { channel, value } => Some([
                0xE0 | nibble(channel),
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ]),
            _ => None,
        }
    }
}

/// A message stamped with a real time in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedMessage {
    pub time: f64,
    pub message: MidiMessage,
    /// For note-ons: index of the matching note-off in the same sequence.
    pub matched: Option<usize>,
}

impl TimedMessage {
    pub fn new(time: f64, message: MidiMessage) -> Self {
        Self {
            time,
            message,
            matched: None,
        }
    }
}

/// A flat list of timed messages, the unit handed to export and playback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSequence {
    events: Vec<TimedMessage>,
}

impl MessageSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time: f64, message: MidiMessage) {
        self.events.push(TimedMessage::new(time, message));
    }

    /// Remove the most recently pushed event equal to `(time, message)`.
    pub fn retract(&mut self, time: f64, message: MidiMessage) -> bool {
        match self
            .events
            .iter()
            .rposition(|e| e.time == time && e.message == message)
        {
            Some(i) => {
                self.events.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn extend_from(&mut self, other: &MessageSequence) {
        self.events.extend(other.events.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimedMessage> {
        self.events.iter()
    }

    pub fn get(&self, index: usize) -> Option<&TimedMessage> {
        self.events.get(index)
    }

    pub fn end_time(&self) -> f64 {
        self.events.iter().map(|e| e.time).fold(0.0, f64::max)
    }

    pub fn note_on_count(&self) -> usize {
        self.events.iter().filter(|e| e.message.is_note_on()).count()
    }

    /// Stable sort by time. At equal times, meta events come first and
    /// note-offs precede everything else, so a release never lands after a
    /// retrigger of the same key.
    pub fn sort(&mut self) {
        fn rank(message: &MidiMessage) -> u8 {
            match message {
                m if m.is_meta() && !matches!(m, MidiMessage::EndOfTrack) => 0,
                MidiMessage::NoteOff { .. } => 1,
                MidiMessage::EndOfTrack => 3,
                _ => 2,
            }
        }
        self.events.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then_with(|| rank(&a.message).cmp(&rank(&b.message)))
        });
    }

    /// Pair note-ons with later note-offs on the same channel and key, oldest
    /// note-on first. Unpaired note-ons keep `matched == None`.
    pub fn update_matched_pairs(&mut self) {
        let mut open: HashMap<(u8, u8), VecDeque<usize>> = HashMap::new();
        for e in &mut self.events {
            e.matched = None;
        }
        for i in 0..self.events.len() {
            match self.events[i].message {
                MidiMessage::NoteOn { channel, key, .. } => {
                    open.entry((channel, key)).or_default().push_back(i);
                }
                MidiMessage::NoteOff { channel, key, .. } => {
                    if let Some(on) = open.get_mut(&(channel, key)).and_then(|q| q.pop_front()) {
                        self.events[on].matched = Some(i);
                    }
                }
                _ => {}
            }
        }
    }
}

impl<'a> IntoIterator for &'a MessageSequence {
    type Item = &'a TimedMessage;
    type IntoIter = std::slice::Iter<'a, TimedMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on(key: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: 1,
            key,
            velocity: 100,
        }
    }

    fn off(key: u8) -> MidiMessage {
        MidiMessage::NoteOff {
            channel: 1,
            key,
            velocity: 0,
        }
    }

    #[test]
    fn note_off_sorts_before_retrigger_at_same_time() {
        let mut seq = MessageSequence::new();
        seq.push(0.0, on(60));
        seq.push(1.0, on(60));
        seq.push(1.0, off(60));
        seq.push(2.0, off(60));
        seq.sort();

        let kinds: Vec<bool> = seq.iter().map(|e| e.message.is_note_on()).collect();
        assert_eq!(kinds, vec![true, false, true, false]);
    }

    #[test]
    fn matched_pairs_follow_key_and_order() {
        let mut seq = MessageSequence::new();
        seq.push(0.0, on(60));
        seq.push(0.5, on(64));
        seq.push(1.0, off(60));
        seq.push(1.5, off(64));
        seq.update_matched_pairs();

        assert_eq!(seq.get(0).unwrap().matched, Some(2));
        assert_eq!(seq.get(1).unwrap().matched, Some(3));
        assert_eq!(seq.get(2).unwrap().matched, None);
    }

    #[test]
    fn retract_removes_latest_match_only() {
        let mut seq = MessageSequence::new();
        seq.push(0.0, on(60));
        seq.push(0.0, on(60));
        seq.push(0.0, on(62));
        assert!(seq.retract(0.0, on(60)));
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.get(1).unwrap().message, on(62));
        assert!(!seq.retract(1.0, on(60)));
    }

    #[test]
    fn stacked_notes_on_one_key_pair_oldest_first() {
        let mut seq = MessageSequence::new();
        seq.push(0.0, off(60));
        seq.push(0.0, on(60));
        seq.push(0.5, on(60));
        seq.push(0.5, on(62));
        seq.push(1.0, off(60));
        seq.push(1.5, off(60));
        seq.update_matched_pairs();

        assert_eq!(seq.get(0).unwrap().matched, None);
        assert_eq!(seq.get(1).unwrap().matched, Some(4));
        assert_eq!(seq.get(2).unwrap().matched, Some(5));
        assert_eq!(seq.get(3).unwrap().matched, None);
    }

    #[test]
    fn unmatched_note_on_stays_unpaired() {
        let mut seq = MessageSequence::new();
        seq.push(0.0, on(60));
        seq.push(1.0, off(61));
        seq.update_matched_pairs();
        assert_eq!(seq.get(0).unwrap().matched, None);
    }

    #[test]
    fn wire_bytes_use_zero_based_channel() {
        let bend = MidiMessage::PitchBend {
            channel: 3,
            value: 8192,
        };
        assert_eq!(bend.to_bytes(), Some([0xE2, 0x00, 0x40]));
        assert_eq!(on(60).to_bytes(), Some([0x90, 60, 100]));
        assert_eq!(MidiMessage::EndOfTrack.to_bytes(), None);
    }

    #[test]
    fn with_channel_rewrites_channel_messages_only() {
        let moved = on(60).with_channel(5);
        assert_eq!(moved.channel(), Some(5));
        assert_eq!(MidiMessage::EndOfTrack.with_channel(5), MidiMessage::EndOfTrack);
    }
}
