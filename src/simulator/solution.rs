use diffsol::{
    error::{DiffsolError, OdeSolverError},
    NalgebraLU, OdeBuilder, OdeEquations, OdeSolverMethod, OdeSolverStopReason,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    data::{parser::TrajectorySink, trajectory::Trajectory},
    simulator::{model::CompartmentModel, M, T, V},
    PkError,
};

const RTOL: f64 = 1e-6;
const ATOL: f64 = 1e-8;
const H0: f64 = 1e-3;

/// Errors raised while setting up or running a [Solution]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolutionError {
    #[error("At least one model is required")]
    NoModels,
    #[error("Invalid evaluation times: {0}")]
    InvalidTimeGrid(String),
    #[error("Dimension mismatch for model '{model}': expected {expected} initial values, found {found}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        found: usize,
    },
    #[error("Model name '{0}' is used more than once")]
    DuplicateModel(String),
    #[error("Integration of model '{model}' failed: {reason}")]
    Integration { model: String, reason: String },
}

/// Integration method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Variable order BDF
    #[default]
    Bdf,
    /// TR-BDF2 singly diagonally implicit Runge-Kutta
    TrBdf2,
    /// ESDIRK 3(4) singly diagonally implicit Runge-Kutta
    Esdirk34,
}

/// Tolerances and method handed to the integrator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub rtol: f64,
    pub atol: f64,
    pub h0: f64,
    pub method: Method,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            rtol: RTOL,
            atol: ATOL,
            h0: H0,
            method: Method::default(),
        }
    }
}

/// Integrates a set of models over a shared output grid
///
/// Models are solved one after the other, in the order they were given. The
/// first failure stops the run and is returned; trajectories of the models
/// solved before it are discarded.
#[derive(Debug, Clone)]
pub struct Solution {
    models: Vec<CompartmentModel>,
    t_eval: Vec<f64>,
    initial_state: Vec<Vec<f64>>,
    settings: SolverSettings,
}

impl Solution {
    /// Create a new solution
    ///
    /// # Arguments
    ///
    /// * `models` - The models to integrate, at least one
    /// * `t_eval` - Strictly increasing output times, at least two
    /// * `initial_state` - One state vector per model, sized to its component count
    pub fn new(
        models: Vec<CompartmentModel>,
        t_eval: Vec<f64>,
        initial_state: Vec<Vec<f64>>,
    ) -> Result<Self, SolutionError> {
        if models.is_empty() {
            return Err(SolutionError::NoModels);
        }
        for (i, model) in models.iter().enumerate() {
            if models[..i].iter().any(|m| m.name() == model.name()) {
                return Err(SolutionError::DuplicateModel(model.name().to_string()));
            }
        }
        if t_eval.len() < 2 {
            return Err(SolutionError::InvalidTimeGrid(format!(
                "at least two time points are required, got {}",
                t_eval.len()
            )));
        }
        if t_eval.iter().any(|t| !t.is_finite()) {
            return Err(SolutionError::InvalidTimeGrid(
                "time points must be finite".to_string(),
            ));
        }
        if t_eval.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SolutionError::InvalidTimeGrid(
                "time points must be strictly increasing".to_string(),
            ));
        }
        if initial_state.len() != models.len() {
            return Err(SolutionError::DimensionMismatch {
                model: "<all>".to_string(),
                expected: models.len(),
                found: initial_state.len(),
            });
        }
        for (model, y0) in models.iter().zip(initial_state.iter()) {
            if y0.len() != model.components() {
                return Err(SolutionError::DimensionMismatch {
                    model: model.name().to_string(),
                    expected: model.components(),
                    found: y0.len(),
                });
            }
        }

        Ok(Solution {
            models,
            t_eval,
            initial_state,
            settings: SolverSettings::default(),
        })
    }

    /// Replace the default integrator settings
    pub fn with_settings(mut self, settings: SolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn models(&self) -> &[CompartmentModel] {
        &self.models
    }

    pub fn t_eval(&self) -> &[f64] {
        &self.t_eval
    }

    pub fn initial_state(&self) -> &[Vec<f64>] {
        &self.initial_state
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Integrate every model and return their trajectories, in input order
    pub fn run(&self) -> Result<Vec<Trajectory>, PkError> {
        self.solve_all(None)
    }

    /// Same as [Solution::run], handing each trajectory to `sink` as soon as it is computed
    pub fn analyse<S: TrajectorySink>(&self, sink: &mut S) -> Result<Vec<Trajectory>, PkError> {
        self.solve_all(Some(sink as &mut dyn TrajectorySink))
    }

    fn solve_all(
        &self,
        mut sink: Option<&mut dyn TrajectorySink>,
    ) -> Result<Vec<Trajectory>, PkError> {
        tracing::debug!("Solver settings: {:?}", self.settings);
        let mut trajectories = Vec::with_capacity(self.models.len());
        for (model, y0) in self.models.iter().zip(self.initial_state.iter()) {
            let trajectory = match self.solve(model, y0) {
                Ok(trajectory) => trajectory,
                Err(err) => {
                    tracing::error!("Model '{}' could not be solved: {}", model.name(), err);
                    return Err(err);
                }
            };
            if let Some(sink) = sink.as_mut() {
                sink.accept(&trajectory)?;
            }
            trajectories.push(trajectory);
        }
        Ok(trajectories)
    }

    /// Integrate a single model from `y0`
    fn solve(&self, model: &CompartmentModel, y0: &[f64]) -> Result<Trajectory, PkError> {
        let t0 = self.t_eval[0];
        let tf = self.t_eval[self.t_eval.len() - 1];
        model.dose_series().covers(t0, tf)?;

        let now = std::time::Instant::now();
        let states = integrate(model, y0, &self.t_eval, &self.settings).map_err(|reason| {
            SolutionError::Integration {
                model: model.name().to_string(),
                reason,
            }
        })?;
        tracing::info!(
            "Solved '{}' ({}, {} compartments, {} time points) in {:.2?}",
            model.name(),
            model.route(),
            model.components(),
            self.t_eval.len(),
            now.elapsed()
        );

        Ok(Trajectory::new(
            model.name().to_string(),
            model.route(),
            self.t_eval.clone(),
            states,
        ))
    }
}

/// Run the integrator for one model, returning one state row per output time
///
/// The solver is stopped at every output time and at every sample of the dose
/// series inside the span, so no step is ever longer than the distance between
/// two dose samples.
fn integrate(
    model: &CompartmentModel,
    y0: &[f64],
    t_eval: &[f64],
    settings: &SolverSettings,
) -> Result<Array2<f64>, String> {
    let nstates = model.components();

    let dx = model.rhs(t_eval[0], y0);
    if let Some(i) = dx.iter().position(|d| !d.is_finite()) {
        return Err(format!(
            "non-finite derivative in compartment {} at t = {}, check for zero volumes",
            i, t_eval[0]
        ));
    }

    // The system is affine in the state, so the Jacobian-vector product is the
    // right-hand side without its dosing term.
    let rhs_parameters = model.parameters().clone();
    let jac_parameters = model.parameters().clone();
    let dose = model.shared_dose();
    let init = y0.to_vec();

    let problem = OdeBuilder::<M>::new()
        .t0(t_eval[0])
        .h0(settings.h0)
        .rtol(settings.rtol)
        .atol(vec![settings.atol; nstates])
        .rhs_implicit(
            move |x: &V, _p: &V, t: T, y: &mut V| {
                rhs_parameters.rhs_into(dose.rate_at(t), x.as_slice(), y.as_mut_slice())
            },
            move |_x: &V, _p: &V, _t: T, v: &V, y: &mut V| {
                jac_parameters.rhs_into(0.0, v.as_slice(), y.as_mut_slice())
            },
        )
        .init(move |_p: &V, _t: T| V::from_vec(init.clone()))
        .build()
        .map_err(|e| e.to_string())?;

    let stops = stop_times(t_eval, model.dose_series().times());
    let rows = match settings.method {
        Method::Bdf => {
            let mut solver = problem
                .bdf::<NalgebraLU<f64>>()
                .map_err(|e| e.to_string())?;
            march(&mut solver, &stops)?
        }
        Method::TrBdf2 => {
            let mut solver = problem
                .tr_bdf2::<NalgebraLU<f64>>()
                .map_err(|e| e.to_string())?;
            march(&mut solver, &stops)?
        }
        Method::Esdirk34 => {
            let mut solver = problem
                .esdirk34::<NalgebraLU<f64>>()
                .map_err(|e| e.to_string())?;
            march(&mut solver, &stops)?
        }
    };

    to_rows(rows, nstates, t_eval)
}

/// Merge the output times with the dose sample times strictly inside the span
///
/// Each stop is flagged `true` when it is an output time. A dose sample closer
/// than rounding to an output time is dropped in favour of the output time.
fn stop_times(t_eval: &[f64], dose_times: &[f64]) -> Vec<(f64, bool)> {
    let t0 = t_eval[0];
    let tf = t_eval[t_eval.len() - 1];

    let mut stops: Vec<(f64, bool)> = t_eval.iter().map(|&t| (t, true)).collect();
    stops.extend(
        dose_times
            .iter()
            .filter(|&&t| t > t0 && t < tf)
            .map(|&t| (t, false)),
    );
    stops.sort_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut merged: Vec<(f64, bool)> = Vec::with_capacity(stops.len());
    for (t, output) in stops {
        match merged.last_mut() {
            Some(last) if !(last.1 && output) && t - last.0 <= 1e-12 * last.0.abs().max(1.0) => {
                if output {
                    *last = (t, true);
                }
            }
            _ => merged.push((t, output)),
        }
    }
    merged
}

/// Step the solver through every stop, recording the state at output times
///
/// The first stop is the initial time.
fn march<'a, Eqn, S>(solver: &mut S, stops: &[(f64, bool)]) -> Result<Vec<Vec<f64>>, String>
where
    Eqn: OdeEquations<T = T, V = V> + 'a,
    S: OdeSolverMethod<'a, Eqn>,
{
    let mut rows = Vec::with_capacity(stops.iter().filter(|(_, output)| *output).count());
    rows.push(solver.state().y.as_slice().to_vec());

    for &(t, output) in stops.iter().skip(1) {
        match solver.set_stop_time(t) {
            Ok(_) => loop {
                match solver.step() {
                    Ok(OdeSolverStopReason::InternalTimestep) => continue,
                    Ok(OdeSolverStopReason::TstopReached) => break,
                    Ok(reason) => {
                        return Err(format!("unexpected solver return value: {:?}", reason))
                    }
                    Err(DiffsolError::OdeSolverError(OdeSolverError::StepSizeTooSmall {
                        ..
                    })) => {
                        return Err(format!(
                            "the step size went to zero before t = {}, check for parameters close to 0.0 or infinite",
                            t
                        ))
                    }
                    Err(e) => return Err(e.to_string()),
                }
            },
            Err(DiffsolError::OdeSolverError(OdeSolverError::StopTimeAtCurrentTime)) => {}
            Err(e) => return Err(e.to_string()),
        }
        if output {
            rows.push(solver.state().y.as_slice().to_vec());
        }
    }
    Ok(rows)
}

/// Collect the recorded states into one row per output time
fn to_rows(rows: Vec<Vec<f64>>, nstates: usize, t_eval: &[f64]) -> Result<Array2<f64>, String> {
    if rows.len() != t_eval.len() {
        return Err(format!(
            "expected {} output times, the solver returned {}",
            t_eval.len(),
            rows.len()
        ));
    }
    let mut states = Array2::zeros((rows.len(), nstates));
    for (time, row) in rows.iter().enumerate() {
        for (compartment, &computed) in row.iter().enumerate() {
            if !computed.is_finite() {
                return Err(format!(
                    "non-finite state in compartment {} at t = {}",
                    compartment, t_eval[time]
                ));
            }
            states[(time, compartment)] = computed;
        }
    }
    Ok(states)
}
