//! Labelled series for overlaying several models on one time/quantity plot
//!
//! Rendering is left to the caller; this module reloads persisted
//! trajectories, rebuilds the per-compartment labels and hands back plain
//! `(time, quantity)` series.

use std::path::Path;

use thiserror::Error;

use crate::data::parser::{read_trajectory, Manifest, TrajectoryError, MANIFEST_FILE};
use crate::data::trajectory::Trajectory;
use crate::simulator::model::Route;

/// Errors raised while assembling an overlay
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Expected {expected} {what}, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Label '{0}' is used more than once")]
    DuplicateLabel(String),
    #[error("Unknown label '{0}'")]
    UnknownLabel(String),
    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),
}

/// The time course of one compartment of one model
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    pub times: Vec<f64>,
    pub quantities: Vec<f64>,
}

/// A set of labelled trajectories
#[derive(Debug, Clone)]
pub struct Overlay {
    entries: Vec<(String, Trajectory)>,
}

impl Overlay {
    /// Load trajectory files
    ///
    /// `paths`, `labels` and `routes` are matched by position and must have the same length.
    pub fn new<P, L>(paths: &[P], labels: &[L], routes: &[Route]) -> Result<Self, OverlayError>
    where
        P: AsRef<Path>,
        L: AsRef<str>,
    {
        if labels.len() != paths.len() {
            return Err(OverlayError::LengthMismatch {
                what: "labels",
                expected: paths.len(),
                found: labels.len(),
            });
        }
        if routes.len() != paths.len() {
            return Err(OverlayError::LengthMismatch {
                what: "routes",
                expected: paths.len(),
                found: routes.len(),
            });
        }

        let trajectories = paths
            .iter()
            .zip(labels.iter())
            .zip(routes.iter())
            .map(|((path, label), route)| read_trajectory(path, label.as_ref(), *route))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_trajectories(trajectories)
    }

    /// Load every trajectory listed in the manifest of an output directory
    pub fn from_manifest(dir: impl AsRef<Path>) -> Result<Self, OverlayError> {
        let dir = dir.as_ref();
        let manifest = Manifest::read(dir.join(MANIFEST_FILE))?;
        let trajectories = manifest
            .models
            .iter()
            .map(|entry| read_trajectory(dir.join(&entry.file), entry.name.as_str(), entry.route))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_trajectories(trajectories)
    }

    /// Use trajectories already in memory, labelled with their model names
    pub fn from_trajectories(trajectories: Vec<Trajectory>) -> Result<Self, OverlayError> {
        let mut entries: Vec<(String, Trajectory)> = Vec::with_capacity(trajectories.len());
        for trajectory in trajectories {
            let label = trajectory.name().to_string();
            if entries.iter().any(|(existing, _)| *existing == label) {
                return Err(OverlayError::DuplicateLabel(label));
            }
            entries.push((label, trajectory));
        }
        Ok(Overlay { entries })
    }

    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|(label, _)| label.as_str()).collect()
    }

    pub fn get(&self, label: &str) -> Option<&Trajectory> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == label)
            .map(|(_, trajectory)| trajectory)
    }

    fn require(&self, label: &str) -> Result<&Trajectory, OverlayError> {
        self.get(label)
            .ok_or_else(|| OverlayError::UnknownLabel(label.to_string()))
    }

    /// Plot labels of every compartment of `label`, e.g. `"model q_c"`
    pub fn plot_labels(&self, label: &str) -> Result<Vec<String>, OverlayError> {
        Ok(self.require(label)?.labels())
    }

    /// One series per compartment of each selected model, models in the given order
    pub fn series(&self, selected: &[&str]) -> Result<Vec<Series>, OverlayError> {
        let mut series = Vec::new();
        for label in selected {
            let trajectory = self.require(label)?;
            for (index, plot_label) in trajectory.labels().into_iter().enumerate() {
                let quantities = trajectory
                    .compartment(index)
                    .map(|column| column.to_vec())
                    .unwrap_or_default();
                series.push(Series {
                    label: plot_label,
                    times: trajectory.times().to_vec(),
                    quantities,
                });
            }
        }
        Ok(series)
    }

    /// Time axis covering every selected model
    pub fn time_span(&self, selected: &[&str]) -> Result<Option<(f64, f64)>, OverlayError> {
        let mut span: Option<(f64, f64)> = None;
        for label in selected {
            let times = self.require(label)?.times();
            if let (Some(&first), Some(&last)) = (times.first(), times.last()) {
                span = Some(match span {
                    Some((lo, hi)) => (lo.min(first), hi.max(last)),
                    None => (first, last),
                });
            }
        }
        Ok(span)
    }
}
