use crate::Project;
use crate::voice::ScheduleSummary;
use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("instances are already loading")]
    AlreadyLoading,
    #[error("no instance load in progress")]
    NotLoading,
    #[error("engine thread has stopped")]
    Disconnected,
}

#[derive(Debug, Clone)]
pub enum EngineCommand {
    LoadProject(PathBuf),
    ReplaceProject(Project),
    Schedule,
    Export { dir: PathBuf, stem: String },
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    ProjectLoaded { name: String },
    Scheduled { summary: ScheduleSummary },
    Exported { paths: Vec<PathBuf> },
    Error { message: String },
}

/// Channels to the engine thread plus a lock-free view of its current
/// project.
pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    project: Arc<ArcSwap<Project>>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.command_tx
            .send(command)
            .map_err(|_| EngineError::Disconnected)
    }

    pub fn project(&self) -> Arc<Project> {
        self.project.load_full()
    }

    /// Ask the thread to stop and wait for it.
    pub fn shutdown(mut self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub fn spawn_engine() -> EngineHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();
    let project = Arc::new(ArcSwap::from_pointee(Project::default()));

    let shared = Arc::clone(&project);
    let thread = std::thread::spawn(move || {
        engine_thread(command_rx, update_tx, shared);
    });

    EngineHandle {
        command_tx,
        update_rx,
        project,
        thread: Some(thread),
    }
}

fn engine_thread(
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
    project: Arc<ArcSwap<Project>>,
) {
    loop {
        match command_rx.recv() {
            Ok(EngineCommand::LoadProject(path)) => match Project::load(&path) {
                Ok(loaded) => {
                    info!(path = %path.display(), "project loaded");
                    let name = loaded.name.clone();
                    project.store(Arc::new(loaded));
                    let _ = update_tx.send(EngineUpdate::ProjectLoaded { name });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "project load failed");
                    let _ = update_tx.send(EngineUpdate::Error {
                        message: format!("Failed to load project: {}", e),
                    });
                }
            },
            Ok(EngineCommand::ReplaceProject(replacement)) => {
                debug!("replacing project snapshot");
                let name = replacement.name.clone();
                project.store(Arc::new(replacement));
                let _ = update_tx.send(EngineUpdate::ProjectLoaded { name });
            }
            Ok(EngineCommand::Schedule) => {
                let summary = project.load().schedule().summary();
                let _ = update_tx.send(EngineUpdate::Scheduled { summary });
            }
            Ok(EngineCommand::Export { dir, stem }) => {
                match project.load().export(&dir, &stem) {
                    Ok(paths) => {
                        let _ = update_tx.send(EngineUpdate::Exported { paths });
                    }
                    Err(e) => {
                        let _ = update_tx.send(EngineUpdate::Error {
                            message: format!("Failed to export: {}", e),
                        });
                    }
                }
            }
            Ok(EngineCommand::Shutdown) | Err(crossbeam::channel::RecvError) => break,
        }
    }
    debug!("engine thread stopped");
}
