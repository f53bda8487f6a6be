use thiserror::Error;

use crate::color::ColorMapError;
use crate::engine::EngineError;
use crate::export::ExportError;
use crate::player::PlayerError;
use crate::project::ProjectError;
use crate::timing::TrackError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error(transparent)]
    Color(#[from] ColorMapError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Player(#[from] PlayerError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, Error>;
