use super::track::{TempoMarker, Track};

pub const DEFAULT_BPM: f64 = 120.0;

/// Piecewise-constant tempo: each marker's BPM holds until the next marker.
/// Before the first marker the first marker's BPM applies; an empty map
/// plays at [`DEFAULT_BPM`].
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    markers: Vec<TempoMarker>,
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::constant(DEFAULT_BPM)
    }
}

impl TempoMap {
    /// Build from arbitrary markers. Markers are sorted by beat; invalid BPM
    /// values are skipped. A marker at beat 0 is synthesized when missing.
    pub fn new(markers: impl IntoIterator<Item = TempoMarker>) -> Self {
        let mut markers: Vec<TempoMarker> = markers
            .into_iter()
            .filter(|m| m.bpm.is_finite() && m.bpm > 0.0 && m.beat.is_finite())
            .collect();
        markers.sort_by(|a, b| a.beat.total_cmp(&b.beat));

        match markers.first().copied() {
            None => return Self::constant(DEFAULT_BPM),
            Some(first) if first.beat > 0.0 => markers.insert(
                0,
                TempoMarker {
                    beat: 0.0,
                    bpm: first.bpm,
                },
            ),
            Some(_) => {}
        }
        Self { markers }
    }

    pub fn constant(bpm: f64) -> Self {
        Self {
            markers: vec![TempoMarker { beat: 0.0, bpm }],
        }
    }

    pub fn from_track(track: &Track) -> Self {
        Self::new(track.tempo_iter().copied())
    }

    pub fn markers(&self) -> &[TempoMarker] {
        &self.markers
    }

    fn segment_index(&self, beat: f64) -> usize {
        self.markers
            .partition_point(|m| m.beat <= beat)
            .saturating_sub(1)
    }

    pub fn bpm_at(&self, beat: f64) -> f64 {
        self.markers[self.segment_index(beat)].bpm
    }

    /// Real time of `beat`, integrating over every tempo segment before it.
    pub fn seconds_at(&self, beat: f64) -> f64 {
        let mut cursor = self.cursor();
        cursor.seconds_at(beat)
    }

    /// Inverse of [`TempoMap::seconds_at`].
    pub fn beat_at_seconds(&self, seconds: f64) -> f64 {
        let mut elapsed = 0.0;
        for (i, marker) in self.markers.iter().enumerate() {
            let seconds_per_beat = 60.0 / marker.bpm;
            if let Some(next) = self.markers.get(i + 1) {
                let span = seconds_per_beat * (next.beat - marker.beat);
                if elapsed + span > seconds {
                    return marker.beat + (seconds - elapsed) / seconds_per_beat;
                }
                elapsed += span;
            } else {
                return marker.beat + (seconds - elapsed) / seconds_per_beat;
            }
        }
        seconds * DEFAULT_BPM / 60.0
    }

    pub fn cursor(&self) -> TempoCursor<'_> {
        TempoCursor {
            map: self,
            index: 0,
            elapsed: 0.0,
        }
    }
}

/// Incremental beat -> seconds conversion for callers walking notes in beat
/// order. Accumulates whole segments as they are passed, so a walk over N
/// notes and M markers costs O(N + M). Asking for an earlier beat than the
/// previous call rewinds to the start.
#[derive(Debug, Clone)]
pub struct TempoCursor<'a> {
    map: &'a TempoMap,
    index: usize,
    /// Seconds from beat 0 to `markers[index].beat`.
    elapsed: f64,
}

impl TempoCursor<'_> {
    pub fn seconds_at(&mut self, beat: f64) -> f64 {
        let markers = &self.map.markers;
        if beat < markers[self.index].beat {
            self.index = 0;
            self.elapsed = 0.0;
        }
        while let Some(next) = markers.get(self.index + 1) {
            if next.beat > beat {
                break;
            }
            let current = markers[self.index];
            self.elapsed += (60.0 / current.bpm) * (next.beat - current.beat);
            self.index += 1;
        }
        let current = markers[self.index];
        self.elapsed + (60.0 / current.bpm) * (beat - current.beat)
    }

    /// Seconds per beat of the segment the cursor currently sits in.
    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.map.markers[self.index].bpm
    }
}
