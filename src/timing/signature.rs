use super::track::{TimeSignatureMarker, Track};

/// Time signatures, only used to show bar/beat positions.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSignatureMap {
    markers: Vec<TimeSignatureMarker>,
}

impl Default for TimeSignatureMap {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl TimeSignatureMap {
    pub fn new(markers: impl IntoIterator<Item = TimeSignatureMarker>) -> Self {
        let mut markers: Vec<TimeSignatureMarker> = markers.into_iter().collect();
        markers.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        if markers.first().is_none_or(|m| m.beat > 0.0) {
            markers.insert(
                0,
                TimeSignatureMarker {
                    beat: 0.0,
                    numerator: 4,
                    denominator: 4,
                },
            );
        }
        Self { markers }
    }

    pub fn from_track(track: &Track) -> Self {
        Self::new(track.time_signature_iter().copied())
    }

    pub fn markers(&self) -> &[TimeSignatureMarker] {
        &self.markers
    }

    /// 0-based (bar, beat within bar) of a beat position. A signature change
    /// in the middle of a bar starts a new bar.
    pub fn bar_position(&self, beat: f64) -> (u32, f64) {
        let mut bar = 0u32;
        for (i, marker) in self.markers.iter().enumerate() {
            let bar_len = quarters_per_bar(marker);
            let segment_end = self.markers.get(i + 1).map(|m| m.beat);
            match segment_end {
                Some(end) if beat >= end => {
                    bar += ((end - marker.beat) / bar_len).ceil() as u32;
                }
                _ => {
                    let into = beat - marker.beat;
                    let bars = (into / bar_len).floor();
                    return (bar + bars as u32, into - bars * bar_len);
                }
            }
        }
        (bar, 0.0)
    }
}

fn quarters_per_bar(marker: &TimeSignatureMarker) -> f64 {
    marker.numerator as f64 * 4.0 / marker.denominator as f64
}
