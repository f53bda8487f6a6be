use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::color::PitchColorMap;
use crate::export::ExportAdapter;
use crate::timing::{TempoMap, TimeSignatureMap, Track, TrackError, TrackKind};
use crate::tuning::Tuning;
use crate::voice::{PluginTarget, ScheduleConfig, ScheduleInput, ScheduleOutput, VoiceScheduler};

pub const PROJECT_FILE: &str = "project.ron";

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse project: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("could not serialize project: {0}")]
    Serialize(#[from] ron::Error),
    #[error("track '{track}': {source}")]
    Track {
        track: String,
        #[source]
        source: TrackError,
    },
    #[error("track '{0}' is not a note track")]
    NotANoteTrack(String),
}

/// A plugin hosted once per instance, e.g. the synth or a pitch shifter
/// placed after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedPlugin {
    pub target: PluginTarget,
    pub identifier: String,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub version: String,
    pub tempo: Track,
    pub time_signatures: Track,
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub colors: PitchColorMap,
    #[serde(default)]
    pub tuning: Tuning,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub plugins: Vec<HostedPlugin>,
}

impl Default for Project {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            tempo: Track::tempo(),
            time_signatures: Track::time_signature(),
            tracks: Vec::new(),
            colors: PitchColorMap::default(),
            tuning: Tuning::default(),
            schedule: ScheduleConfig::default(),
            plugins: Vec::new(),
        }
    }

    pub fn file_path(project_path: &Path) -> PathBuf {
        project_path.join(PROJECT_FILE)
    }

    pub fn save(&self, project_path: &Path) -> Result<(), ProjectError> {
        fs::create_dir_all(project_path)?;

        let ron_path = Self::file_path(project_path);
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(&ron_path, ron_string)?;
        debug!(path = %ron_path.display(), "project saved");

        Ok(())
    }

    pub fn load(project_path: &Path) -> Result<Self, ProjectError> {
        let ron_path = Self::file_path(project_path);
        let ron_string = fs::read_to_string(&ron_path)?;
        let mut project: Project = ron::from_str(&ron_string)?;
        project.revalidate()?;
        debug!(path = %ron_path.display(), tracks = project.tracks.len(), "project loaded");

        Ok(project)
    }

    /// Check every track after deserialization and restore beat order.
    pub fn revalidate(&mut self) -> Result<(), ProjectError> {
        let check = |track: &mut Track| {
            track.revalidate().map_err(|source| ProjectError::Track {
                track: track.name.clone(),
                source,
            })
        };
        if self.tempo.kind() != TrackKind::Tempo {
            return Err(ProjectError::Track {
                track: self.tempo.name.clone(),
                source: TrackError::KindMismatch {
                    expected: TrackKind::Tempo,
                    found: "non-tempo track",
                },
            });
        }
        if self.time_signatures.kind() != TrackKind::TimeSignature {
            return Err(ProjectError::Track {
                track: self.time_signatures.name.clone(),
                source: TrackError::KindMismatch {
                    expected: TrackKind::TimeSignature,
                    found: "non-signature track",
                },
            });
        }
        check(&mut self.tempo)?;
        check(&mut self.time_signatures)?;
        for track in &mut self.tracks {
            if track.channel().is_none() {
                return Err(ProjectError::NotANoteTrack(track.name.clone()));
            }
            check(track)?;
        }
        Ok(())
    }

    pub fn tempo_map(&self) -> TempoMap {
        TempoMap::from_track(&self.tempo)
    }

    pub fn signature_map(&self) -> TimeSignatureMap {
        TimeSignatureMap::from_track(&self.time_signatures)
    }

    pub fn plugin(&self, target: PluginTarget) -> Option<&HostedPlugin> {
        self.plugins.iter().find(|p| p.target == target)
    }

    pub fn schedule(&self) -> ScheduleOutput {
        let tempo = self.tempo_map();
        VoiceScheduler::new(self.schedule.clone()).schedule(ScheduleInput {
            tracks: &self.tracks,
            tempo: &tempo,
            colors: &self.colors,
            tuning: &self.tuning,
        })
    }

    /// Schedule and write one MIDI file per instance.
    pub fn export(&self, dir: &Path, stem: &str) -> Result<Vec<PathBuf>, crate::Error> {
        let output = self.schedule();
        let tempo = self.tempo_map();
        let signatures = self.signature_map();
        let config = self.schedule.sanitized();
        let paths = ExportAdapter::new(&tempo, &signatures, &config).export_instances(
            &output,
            dir,
            stem,
        )?;
        Ok(paths)
    }
}
