use ndarray::{Array2, ArrayView1, Axis};

use crate::simulator::model::Route;

/// Labels for each compartment of a model, in state vector order
///
/// The depot (subcutaneous route only) is `q_0`, the central compartment
/// `q_c`, peripherals `q_p1` to `q_pn`. Labels are prefixed with `prefix`
/// followed by a space, unless `prefix` is empty.
pub fn compartment_labels(prefix: &str, route: Route, components: usize) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(components);
    let mut remaining = components;
    if route == Route::Sc && remaining > 0 {
        names.push("q_0".to_string());
        remaining -= 1;
    }
    if remaining > 0 {
        names.push("q_c".to_string());
        names.extend((1..remaining).map(|i| format!("q_p{}", i)));
    }

    if prefix.is_empty() {
        names
    } else {
        names
            .into_iter()
            .map(|name| format!("{} {}", prefix, name))
            .collect()
    }
}

/// The time course of every compartment of one model
///
/// `states` has one row per time point and one column per compartment, in
/// state vector order (`[depot?, central, peripheral_1, ...]`).
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    name: String,
    route: Route,
    times: Vec<f64>,
    states: Array2<f64>,
}

impl Trajectory {
    /// Create a new trajectory
    ///
    /// # Panics
    ///
    /// If `states` does not have one row per time point.
    pub(crate) fn new(name: String, route: Route, times: Vec<f64>, states: Array2<f64>) -> Self {
        assert_eq!(
            times.len(),
            states.nrows(),
            "one state row is required per time point"
        );
        Trajectory {
            name,
            route,
            times,
            states,
        }
    }

    /// Name of the model this trajectory belongs to
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// All states, `len() x ncompartments`
    pub fn states(&self) -> &Array2<f64> {
        &self.states
    }

    /// Number of time points
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn ncompartments(&self) -> usize {
        self.states.ncols()
    }

    /// The time course of a single compartment
    pub fn compartment(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.ncompartments()).then(|| self.states.column(index))
    }

    /// The state vector at the `index`-th time point
    pub fn state(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.len()).then(|| self.states.row(index))
    }

    /// The state vector at the last time point
    pub fn last_state(&self) -> Option<ArrayView1<'_, f64>> {
        self.states.axis_iter(Axis(0)).last()
    }

    /// Compartment labels prefixed with the model name
    pub fn labels(&self) -> Vec<String> {
        compartment_labels(&self.name, self.route, self.ncompartments())
    }
}
