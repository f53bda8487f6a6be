//! Real-time playback of assembled instance sequences through a MIDI port.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::{Duration, Instant};

use midir::{MidiOutput, MidiOutputConnection};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::EngineError;
use crate::events::{MessageSequence, MidiMessage};
use crate::instances::InstanceBank;

const CLIENT_NAME: &str = "colortone";
const ALL_NOTES_OFF: u8 = 123;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("MIDI output unavailable: {0}")]
    Init(String),
    #[error("no MIDI output port matching '{0}'")]
    PortNotFound(String),
    #[error("could not connect to '{port}': {message}")]
    Connect { port: String, message: String },
    #[error("MIDI send failed: {0}")]
    Send(String),
    #[error(transparent)]
    Bank(#[from] EngineError),
}

/// Every instance's channel messages merged into one timeline. Each
/// (instance, source channel) lane gets its own output channel, so a
/// controller on one lane never retunes a note sounding on another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playback {
    events: Vec<(f64, [u8; 3])>,
    routing: BTreeMap<(usize, u8), u8>,
}

impl Playback {
    pub fn events(&self) -> &[(f64, [u8; 3])] {
        &self.events
    }

    /// Output channel of a lane, if the lane sends anything.
    pub fn output_channel(&self, instance: usize, channel: u8) -> Option<u8> {
        self.routing.get(&(instance, channel)).copied()
    }

    /// 1-based channels the playback sends on.
    pub fn channels(&self) -> impl Iterator<Item = u8> + '_ {
        self.routing.values().copied().collect::<BTreeSet<u8>>().into_iter()
    }

    pub fn duration(&self) -> f64 {
        self.events.last().map_or(0.0, |(t, _)| *t)
    }
}

/// Number lanes in (instance, channel) order onto channels 1-16. More than
/// sixteen lanes wrap around and share channels.
fn route(sequences: &[MessageSequence]) -> BTreeMap<(usize, u8), u8> {
    let lanes: BTreeSet<(usize, u8)> = sequences
        .iter()
        .enumerate()
        .flat_map(|(i, seq)| {
            seq.iter()
                .filter_map(move |e| e.message.channel().map(|c| (i, c)))
        })
        .collect();
    if lanes.len() > 16 {
        warn!(lanes = lanes.len(), "more lanes than MIDI channels, some will share");
    }
    lanes
        .into_iter()
        .enumerate()
        .map(|(n, lane)| (lane, (n % 16) as u8 + 1))
        .collect()
}

fn render_instance(
    instance: usize,
    sequence: &MessageSequence,
    routing: &BTreeMap<(usize, u8), u8>,
) -> Vec<(f64, [u8; 3])> {
    sequence
        .iter()
        .filter_map(|e| {
            let channel = routing.get(&(instance, e.message.channel()?))?;
            e.message
                .with_channel(*channel)
                .to_bytes()
                .map(|bytes| (e.time, bytes))
        })
        .collect()
}

/// Render every instance, reporting each one to `bank`.
pub fn prepare(bank: &InstanceBank, sequences: &[MessageSequence]) -> Result<Playback, PlayerError> {
    bank.begin_load(sequences.len())?;
    let routing = route(sequences);
    let mut events = Vec::new();
    for (i, seq) in sequences.iter().enumerate() {
        events.extend(render_instance(i, seq, &routing));
        if let Err(e) = bank.instance_loaded() {
            bank.fail();
            return Err(e.into());
        }
    }
    events.sort_by(|a, b| a.0.total_cmp(&b.0));
    debug!(lanes = routing.len(), events = events.len(), "playback prepared");
    Ok(Playback { events, routing })
}

pub fn output_ports() -> Result<Vec<String>, PlayerError> {
    let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| PlayerError::Init(e.to_string()))?;
    Ok(midi_out
        .ports()
        .iter()
        .map(|p| midi_out.port_name(p).unwrap_or_default())
        .collect())
}

pub struct MidiPlayer {
    conn: MidiOutputConnection,
    port_name: String,
    bank: InstanceBank,
}

impl MidiPlayer {
    /// Connect to the first output port whose name contains `pattern`.
    pub fn connect(pattern: &str) -> Result<Self, PlayerError> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| PlayerError::Init(e.to_string()))?;
        let ports = midi_out.ports();
        let port = ports
            .iter()
            .find(|p| midi_out.port_name(p).unwrap_or_default().contains(pattern))
            .ok_or_else(|| PlayerError::PortNotFound(pattern.to_string()))?;
        let port_name = midi_out.port_name(port).unwrap_or_default();
        let conn = midi_out
            .connect(port, "colortone-output")
            .map_err(|e| PlayerError::Connect {
                port: port_name.clone(),
                message: e.to_string(),
            })?;
        info!(port = %port_name, "connected to MIDI output");
        Ok(Self {
            conn,
            port_name,
            bank: InstanceBank::new(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Play to completion, blocking the calling thread.
    pub fn play(&mut self, sequences: &[MessageSequence]) -> Result<(), PlayerError> {
        let playback = prepare(&self.bank, sequences)?;
        info!(
            events = playback.events.len(),
            seconds = playback.duration(),
            "playback started"
        );
        let start = Instant::now();
        let result = self.send_timeline(&playback, start);
        for channel in playback.channels() {
            let off = MidiMessage::Controller {
                channel,
                controller: ALL_NOTES_OFF,
                value: 0,
            };
            if let Some(bytes) = off.to_bytes() {
                self.send(&bytes)?;
            }
        }
        debug!("playback finished");
        result
    }

    fn send_timeline(&mut self, playback: &Playback, start: Instant) -> Result<(), PlayerError> {
        for (time, bytes) in &playback.events {
            let due = start + Duration::from_secs_f64(time.max(0.0));
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
            self.send(bytes)?;
        }
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), PlayerError> {
        self.conn
            .send(bytes)
            .map_err(|e| PlayerError::Send(e.to_string()))
    }
}
