use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A note as edited by the user: a 12-TET key plus a symbolic pitch color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub key: u8,
    pub beat: f64,
    pub length: f64,
    /// 0.0 -> 1.0
    pub velocity: f64,
    /// Name of a pitch color; unknown names play without deviation.
    pub color: String,
}

impl Note {
    pub fn new(key: u8, beat: f64, length: f64, velocity: f64, color: impl Into<String>) -> Self {
        Self {
            key,
            beat,
            length,
            velocity,
            color: color.into(),
        }
    }

    pub fn end_beat(&self) -> f64 {
        self.beat + self.length
    }
}

/// Tempo takes effect at `beat` and holds until the next marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoMarker {
    pub beat: f64,
    pub bpm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignatureMarker {
    pub beat: f64,
    pub numerator: u8,
    pub denominator: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackElement {
    Note(Note),
    Tempo(TempoMarker),
    TimeSignature(TimeSignatureMarker),
}

impl TrackElement {
    pub fn beat(&self) -> f64 {
        match self {
            TrackElement::Note(n) => n.beat,
            TrackElement::Tempo(t) => t.beat,
            TrackElement::TimeSignature(s) => s.beat,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            TrackElement::Note(_) => "note",
            TrackElement::Tempo(_) => "tempo marker",
            TrackElement::TimeSignature(_) => "time signature marker",
        }
    }

    fn validate(&self) -> Result<(), TrackError> {
        match self {
            TrackElement::Note(n) => {
                if n.key > 127 {
                    return Err(TrackError::InvalidElement("key must be within 0-127"));
                }
                if !n.beat.is_finite() || n.beat < 0.0 {
                    return Err(TrackError::InvalidElement("note beat must be >= 0"));
                }
                if !n.length.is_finite() || n.length <= 0.0 {
                    return Err(TrackError::InvalidElement("note length must be > 0"));
                }
                if !(0.0..=1.0).contains(&n.velocity) {
                    return Err(TrackError::InvalidElement("velocity must be within 0-1"));
                }
            }
            TrackElement::Tempo(t) => {
                if !t.beat.is_finite() || t.beat < 0.0 {
                    return Err(TrackError::InvalidElement("tempo beat must be >= 0"));
                }
                if !t.bpm.is_finite() || t.bpm <= 0.0 {
                    return Err(TrackError::InvalidElement("bpm must be > 0"));
                }
            }
            TrackElement::TimeSignature(s) => {
                if !s.beat.is_finite() || s.beat < 0.0 {
                    return Err(TrackError::InvalidElement("signature beat must be >= 0"));
                }
                if s.numerator == 0 {
                    return Err(TrackError::InvalidElement("numerator must be >= 1"));
                }
                if !s.denominator.is_power_of_two() {
                    return Err(TrackError::InvalidElement(
                        "denominator must be a power of two",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    Notes { channel: u8 },
    Tempo,
    TimeSignature,
}

impl TrackKind {
    fn accepts(&self, element: &TrackElement) -> bool {
        matches!(
            (self, element),
            (TrackKind::Notes { .. }, TrackElement::Note(_))
                | (TrackKind::Tempo, TrackElement::Tempo(_))
                | (TrackKind::TimeSignature, TrackElement::TimeSignature(_))
        )
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TrackError {
    #[error("a {found} does not belong on a {expected:?} track")]
    KindMismatch {
        expected: TrackKind,
        found: &'static str,
    },
    #[error("element index {index} out of range (track has {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid element: {0}")]
    InvalidElement(&'static str),
    #[error("MIDI channel {0} outside 1-16")]
    InvalidChannel(u8),
}

/// A named, beat-sorted list of elements of a single kind.
///
/// The element list is only mutated through [`Track::insert`],
/// [`Track::remove`] and [`Track::change`], which keep it sorted by beat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    kind: TrackKind,
    elements: Vec<TrackElement>,
}

impl Track {
    pub fn notes(name: impl Into<String>, channel: u8) -> Result<Self, TrackError> {
        check_channel(channel)?;
        Ok(Self {
            name: name.into(),
            kind: TrackKind::Notes { channel },
            elements: Vec::new(),
        })
    }

    pub fn tempo() -> Self {
        Self {
            name: "Tempo".into(),
            kind: TrackKind::Tempo,
            elements: Vec::new(),
        }
    }

    pub fn time_signature() -> Self {
        Self {
            name: "Time Signature".into(),
            kind: TrackKind::TimeSignature,
            elements: Vec::new(),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// MIDI channel of a note track; `None` for marker tracks.
    pub fn channel(&self) -> Option<u8> {
        match self.kind {
            TrackKind::Notes { channel } => Some(channel),
            _ => None,
        }
    }

    pub fn set_channel(&mut self, channel: u8) -> Result<(), TrackError> {
        check_channel(channel)?;
        match &mut self.kind {
            TrackKind::Notes { channel: c } => {
                *c = channel;
                Ok(())
            }
            other => Err(TrackError::KindMismatch {
                expected: *other,
                found: "channel",
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[TrackElement] {
        &self.elements
    }

    pub fn note_iter(&self) -> impl Iterator<Item = &Note> {
        self.elements.iter().filter_map(|e| match e {
            TrackElement::Note(n) => Some(n),
            _ => None,
        })
    }

    pub fn tempo_iter(&self) -> impl Iterator<Item = &TempoMarker> {
        self.elements.iter().filter_map(|e| match e {
            TrackElement::Tempo(t) => Some(t),
            _ => None,
        })
    }

    pub fn time_signature_iter(&self) -> impl Iterator<Item = &TimeSignatureMarker> {
        self.elements.iter().filter_map(|e| match e {
            TrackElement::TimeSignature(s) => Some(s),
            _ => None,
        })
    }

    /// Insert keeping beat order; equal beats go after existing elements.
    /// Returns the index the element landed at.
    pub fn insert(&mut self, element: TrackElement) -> Result<usize, TrackError> {
        self.check(&element)?;
        let beat = element.beat();
        let index = self.elements.partition_point(|e| e.beat() <= beat);
        self.elements.insert(index, element);
        Ok(index)
    }

    pub fn remove(&mut self, index: usize) -> Result<TrackElement, TrackError> {
        if index >= self.elements.len() {
            return Err(TrackError::IndexOutOfRange {
                index,
                len: self.elements.len(),
            });
        }
        Ok(self.elements.remove(index))
    }

    /// Replace the element at `index` and move it to its sorted position.
    /// On error the track is left untouched.
    pub fn change(&mut self, index: usize, element: TrackElement) -> Result<usize, TrackError> {
        if index >= self.elements.len() {
            return Err(TrackError::IndexOutOfRange {
                index,
                len: self.elements.len(),
            });
        }
        self.check(&element)?;
        self.elements.remove(index);
        self.insert(element)
    }

    /// Re-establish the track invariants after deserialization, which
    /// bypasses `insert`.
    pub fn revalidate(&mut self) -> Result<(), TrackError> {
        if let Some(channel) = self.channel() {
            check_channel(channel)?;
        }
        for element in &self.elements {
            self.check(element)?;
        }
        self.elements.sort_by(|a, b| a.beat().total_cmp(&b.beat()));
        Ok(())
    }

    fn check(&self, element: &TrackElement) -> Result<(), TrackError> {
        if !self.kind.accepts(element) {
            return Err(TrackError::KindMismatch {
                expected: self.kind,
                found: element.kind_name(),
            });
        }
        element.validate()
    }
}

fn check_channel(channel: u8) -> Result<(), TrackError> {
    if (1..=16).contains(&channel) {
        Ok(())
    } else {
        Err(TrackError::InvalidChannel(channel))
    }
}
