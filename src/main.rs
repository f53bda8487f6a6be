use std::error::Error;
use std::path::{Path, PathBuf};

use colortone::{
    EngineCommand, EngineUpdate, ExportAdapter, MidiPlayer, Project, output_ports, spawn_engine,
};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use structopt::StructOpt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, StructOpt)]
#[structopt(name = "colortone", about = "Microtonal MIDI voice scheduler")]
struct Opt {
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Write one MIDI file per instance.
    Export {
        /// Project directory containing project.ron.
        #[structopt(parse(from_os_str))]
        project: PathBuf,
        /// Output directory, defaults to the project directory.
        #[structopt(short, long, parse(from_os_str))]
        output: Option<PathBuf>,
        /// File name stem, defaults to the project name.
        #[structopt(long)]
        stem: Option<String>,
    },
    /// Print what the scheduler makes of a project.
    Inspect {
        #[structopt(parse(from_os_str))]
        project: PathBuf,
    },
    /// Play the scheduled instances on a MIDI output port.
    Play {
        #[structopt(parse(from_os_str))]
        project: PathBuf,
        /// Substring of the output port name.
        #[structopt(short, long, default_value = "")]
        port: String,
    },
    /// List MIDI output ports.
    Ports,
    /// Re-export whenever the project file changes.
    Watch {
        #[structopt(parse(from_os_str))]
        project: PathBuf,
        #[structopt(short, long, parse(from_os_str))]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    let level = match opt.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match opt.command {
        Command::Export {
            project,
            output,
            stem,
        } => {
            let loaded = Project::load(&project)?;
            let stem = stem.unwrap_or_else(|| file_stem(&loaded.name));
            let dir = output.unwrap_or_else(|| project.clone());
            for path in loaded.export(&dir, &stem)? {
                println!("{}", path.display());
            }
        }
        Command::Inspect { project } => inspect(&Project::load(&project)?),
        Command::Play { project, port } => {
            let loaded = Project::load(&project)?;
            let output = loaded.schedule();
            let tempo = loaded.tempo_map();
            let signatures = loaded.signature_map();
            let config = loaded.schedule.sanitized();
            let sequences = ExportAdapter::new(&tempo, &signatures, &config).assemble(&output);
            let mut player = MidiPlayer::connect(&port)?;
            println!("Playing on {}", player.port_name());
            player.play(&sequences)?;
        }
        Command::Ports => {
            let ports = output_ports()?;
            if ports.is_empty() {
                println!("No MIDI outputs found.");
            }
            for (i, name) in ports.iter().enumerate() {
                println!("  {}: {}", i, name);
            }
        }
        Command::Watch { project, output } => watch(&project, output)?,
    }
    Ok(())
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if stem.is_empty() { "project".into() } else { stem }
}

fn inspect(project: &Project) {
    let signatures = project.signature_map();
    let output = project.schedule();
    let summary = output.summary();

    println!("{} (v{})", project.name, project.version);
    println!(
        "{} instances, mode {:?}",
        summary.notes_per_instance.len(),
        project.schedule.mode
    );
    for track in &project.tracks {
        let end = track.note_iter().map(|n| n.end_beat()).fold(0.0, f64::max);
        let (bar, beat) = signatures.bar_position(end);
        println!(
            "  track '{}' ch {}: {} notes, ends at bar {} beat {:.2}",
            track.name,
            track.channel().unwrap_or(0),
            track.len(),
            bar + 1,
            beat + 1.0
        );
    }
    println!("Colors:");
    for color in project.colors.iter() {
        println!("  {:>6} cents  {}", color.cents, color.name);
    }
    for (i, (notes, controllers)) in summary
        .notes_per_instance
        .iter()
        .zip(&summary.controllers_per_instance)
        .enumerate()
    {
        println!("  instance {}: {} notes, {} controller events", i, notes, controllers);
    }
    if summary.steals > 0 {
        println!("{} notes were cut short, consider more instances", summary.steals);
    }
}

fn watch(project: &Path, output: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let engine = spawn_engine();
    let dir = output.unwrap_or_else(|| project.to_path_buf());
    let stem = file_stem(&Project::load(project)?.name);

    let export = EngineCommand::Export { dir, stem };
    engine.send(EngineCommand::LoadProject(project.to_path_buf()))?;
    engine.send(export.clone())?;

    let command_tx = engine.command_tx.clone();
    let project_owned = project.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if event.kind.is_modify() {
                    info!("project changed, re-exporting");
                    let _ = command_tx.send(EngineCommand::LoadProject(project_owned.clone()));
                    let _ = command_tx.send(export.clone());
                }
            }
            Err(e) => warn!(error = %e, "watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(&Project::file_path(project), RecursiveMode::NonRecursive)?;

    println!("Watching {} - edit and save to re-export", project.display());
    println!("Press Ctrl+C to stop");

    for update in engine.update_rx.iter() {
        match update {
            EngineUpdate::ProjectLoaded { name } => info!(%name, "project loaded"),
            EngineUpdate::Exported { paths } => {
                for path in paths {
                    println!("{}", path.display());
                }
            }
            EngineUpdate::Scheduled { summary } => info!(?summary, "scheduled"),
            EngineUpdate::Error { message } => error!("{}", message),
        }
    }
    Ok(())
}
