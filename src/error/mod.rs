use thiserror::Error;

use crate::data::{dose::DoseError, overlay::OverlayError, parser::TrajectoryError};
use crate::settings::SettingsError;
use crate::simulator::{model::ModelError, solution::SolutionError};

#[derive(Error, Debug)]
pub enum PkError {
    #[error("Error in the dosing protocol: {0}")]
    Dose(#[from] DoseError),
    #[error("Error in the model definition: {0}")]
    Model(#[from] ModelError),
    #[error("Error in the solution: {0}")]
    Solution(#[from] SolutionError),
    #[error("Error in the trajectory output: {0}")]
    Trajectory(#[from] TrajectoryError),
    #[error("Error in the overlay: {0}")]
    Overlay(#[from] OverlayError),
    #[error("Error in the settings: {0}")]
    Settings(#[from] SettingsError),
}
