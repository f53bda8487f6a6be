use serde::{Deserialize, Serialize};

pub const CONCERT_A: f64 = 440.0;

/// Global detuning applied on top of pitch colors: a cents offset per pitch
/// class plus a reference pitch for A4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuning {
    pub pitch_class_cents: [f64; 12],
    pub reference_hz: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            pitch_class_cents: [0.0; 12],
            reference_hz: CONCERT_A,
        }
    }
}

impl Tuning {
    /// Cents between the reference pitch and concert A.
    pub fn reference_cents(&self) -> f64 {
        if self.reference_hz > 0.0 && self.reference_hz.is_finite() {
            1200.0 * (self.reference_hz / CONCERT_A).log2()
        } else {
            0.0
        }
    }

    pub fn offset_cents(&self, key: u8) -> f64 {
        self.pitch_class_cents[(key % 12) as usize] + self.reference_cents()
    }
}
