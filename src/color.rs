//! Pitch colors: named microtonal deviations the user paints notes with.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Name of the zero-deviation color. It always exists and cannot be removed.
pub const NEUTRAL: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchColor {
    pub id: u32,
    pub name: String,
    pub cents: i32,
    /// RGB shown in the editor.
    pub display: [u8; 3],
    /// Pitch classes (key mod 12) this color is offered for by default.
    #[serde(default)]
    pub key_classes: BTreeSet<u8>,
}

impl PitchColor {
    pub fn new(id: u32, name: impl Into<String>, cents: i32) -> Self {
        Self {
            id,
            name: name.into(),
            cents,
            display: [128, 128, 128],
            key_classes: BTreeSet::new(),
        }
    }

    pub fn with_key_classes(mut self, classes: impl IntoIterator<Item = u8>) -> Self {
        self.key_classes = classes.into_iter().map(|c| c % 12).collect();
        self
    }

    pub fn with_display(mut self, rgb: [u8; 3]) -> Self {
        self.display = rgb;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColorMapError {
    #[error("a pitch color named '{0}' already exists")]
    DuplicateName(String),
    #[error("no pitch color named '{0}'")]
    NotFound(String),
    #[error("the neutral pitch color '0' cannot be removed, renamed or detuned")]
    ReservedName,
}

/// Entries sorted by (cents, name) with a name index enforcing uniqueness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PitchColor>", into = "Vec<PitchColor>")]
pub struct PitchColorMap {
    entries: Vec<PitchColor>,
    names: HashSet<String>,
}

impl Default for PitchColorMap {
    fn default() -> Self {
        let neutral = PitchColor::new(0, NEUTRAL, 0).with_key_classes(0..12);
        Self {
            names: HashSet::from([neutral.name.clone()]),
            entries: vec![neutral],
        }
    }
}

impl PitchColorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PitchColor> {
        self.entries.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<&PitchColor> {
        if !self.names.contains(name) {
            return None;
        }
        self.entries.iter().find(|c| c.name == name)
    }

    /// Cents deviation of a color. Unknown names resolve to 0.
    pub fn resolve(&self, name: &str) -> i32 {
        match self.get(name) {
            Some(color) => color.cents,
            None => {
                trace!(color = name, "unknown pitch color, using no deviation");
                0
            }
        }
    }

    /// First color offered for `key`'s pitch class, falling back to neutral.
    pub fn default_for_key(&self, key: u8) -> &PitchColor {
        let class = key % 12;
        self.entries
            .iter()
            .filter(|c| c.name != NEUTRAL)
            .find(|c| c.key_classes.contains(&class))
            .or_else(|| self.get(NEUTRAL))
            .unwrap_or(&self.entries[0])
    }

    pub fn next_id(&self) -> u32 {
        self.entries.iter().map(|c| c.id + 1).max().unwrap_or(0)
    }

    pub fn insert(&mut self, color: PitchColor) -> Result<(), ColorMapError> {
        if self.names.contains(&color.name) {
            return Err(ColorMapError::DuplicateName(color.name));
        }
        self.names.insert(color.name.clone());
        self.entries.push(color);
        self.sort();
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<PitchColor, ColorMapError> {
        if name == NEUTRAL {
            return Err(ColorMapError::ReservedName);
        }
        let index = self
            .entries
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| ColorMapError::NotFound(name.to_string()))?;
        self.names.remove(name);
        Ok(self.entries.remove(index))
    }

    /// Replace the color called `name`. Renaming onto an existing name fails
    /// and leaves the map untouched.
    pub fn change(&mut self, name: &str, updated: PitchColor) -> Result<(), ColorMapError> {
        let index = self
            .entries
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| ColorMapError::NotFound(name.to_string()))?;
        if name == NEUTRAL && (updated.name != NEUTRAL || updated.cents != 0) {
            return Err(ColorMapError::ReservedName);
        }
        if updated.name != name && self.names.contains(&updated.name) {
            return Err(ColorMapError::DuplicateName(updated.name));
        }
        self.names.remove(name);
        self.names.insert(updated.name.clone());
        self.entries[index] = updated;
        self.sort();
        Ok(())
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| a.cents.cmp(&b.cents).then_with(|| a.name.cmp(&b.name)));
    }
}

impl TryFrom<Vec<PitchColor>> for PitchColorMap {
    type Error = ColorMapError;

    fn try_from(colors: Vec<PitchColor>) -> Result<Self, Self::Error> {
        let mut map = PitchColorMap::new();
        for color in colors {
            if color.name == NEUTRAL {
                map.change(NEUTRAL, color)?;
            } else {
                map.insert(color)?;
            }
        }
        Ok(map)
    }
}

impl From<PitchColorMap> for Vec<PitchColor> {
    fn from(map: PitchColorMap) -> Self {
        map.entries
    }
}
