use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{dose::DoseSeries, trajectory::compartment_labels};

/// Errors raised while defining a compartment model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Insufficient components for route '{route}': at least {minimum} required, got {components}")]
    InsufficientComponents {
        route: String,
        components: usize,
        minimum: usize,
    },
    #[error("Model incorrectly defined: expected {expected} keys (name included), found {found}")]
    IncorrectlyDefined { expected: usize, found: usize },
    #[error("Model incorrectly defined: missing parameter '{name}'")]
    MissingParameter { name: String },
    #[error("Invalid route '{0}', expected 'iv' or 'sc'")]
    InvalidRoute(String),
    #[error("Negative parameter '{name}' = {value}, parameters must be non-negative")]
    NegativeParameter { name: String, value: f64 },
}

/// How the drug enters the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Intravenous, the dose enters the central compartment directly
    Iv,
    /// Subcutaneous, the dose enters a depot absorbed into the central compartment at `k_a`
    Sc,
}

impl Route {
    /// Smallest valid component count for this route
    pub fn min_components(&self) -> usize {
        match self {
            Route::Iv => 1,
            Route::Sc => 2,
        }
    }

    /// Number of peripheral compartments in a model of `components` states
    pub fn peripherals(&self, components: usize) -> usize {
        components.saturating_sub(self.min_components())
    }
}

impl FromStr for Route {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "iv" => Ok(Route::Iv),
            "sc" => Ok(Route::Sc),
            _ => Err(ModelError::InvalidRoute(s.to_string())),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Iv => write!(f, "iv"),
            Route::Sc => write!(f, "sc"),
        }
    }
}

/// Named parameters of a compartment model
///
/// Keys follow the `V_c`, `CL`, `k_a`, `V_p1`, `Q_p1`, ... convention. The name
/// counts as one key when the definition is checked against the number of
/// components.
///
/// ```
/// use pkmodel::CompartmentConfig;
///
/// let config = CompartmentConfig::new("two_compartments")
///     .with("V_c", 1.0)
///     .with("CL", 2.0)
///     .with("V_p1", 0.5)
///     .with("Q_p1", 1.0);
/// assert_eq!(config.parameters().count(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompartmentConfig {
    name: String,
    #[serde(flatten)]
    parameters: BTreeMap<String, f64>,
}

impl CompartmentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        CompartmentConfig {
            name: name.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add or replace a parameter
    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).copied()
    }

    /// Iterate over the numeric parameters, sorted by key
    pub fn parameters(&self) -> impl Iterator<Item = (&str, f64)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of keys, the name included
    fn key_count(&self) -> usize {
        self.parameters.len() + 1
    }

    fn require(&self, key: &str) -> Result<f64, ModelError> {
        self.get(key).ok_or_else(|| ModelError::MissingParameter {
            name: key.to_string(),
        })
    }
}

/// Keys a model of `components` states on `route` must define, name excluded
fn required_keys(route: Route, components: usize) -> Vec<String> {
    let mut keys = vec!["V_c".to_string(), "CL".to_string()];
    if route == Route::Sc {
        keys.push("k_a".to_string());
    }
    for i in 1..=route.peripherals(components) {
        keys.push(format!("V_p{}", i));
        keys.push(format!("Q_p{}", i));
    }
    keys
}

/// Elimination and distribution shared by both routes
#[derive(Debug, Clone, PartialEq)]
pub struct Disposition {
    cl: f64,
    volumes: Vec<f64>,
    clearances: Vec<f64>,
}

impl Disposition {
    /// Total body clearance
    pub fn cl(&self) -> f64 {
        self.cl
    }

    /// `[V_c, V_p1, ..., V_pn]`
    pub fn volumes(&self) -> &[f64] {
        &self.volumes
    }

    /// `[Q_p1, ..., Q_pn]`
    pub fn clearances(&self) -> &[f64] {
        &self.clearances
    }

    /// Derivatives of `[central, peripheral_1, ...]` given the central `input` rate
    #[inline(always)]
    fn distribute(&self, input: f64, x: &[f64], dx: &mut [f64]) {
        let central = x[0] / self.volumes[0];
        let mut transferred = 0.0;
        for (i, q) in self.clearances.iter().enumerate() {
            let flux = q * (central - x[i + 1] / self.volumes[i + 1]);
            dx[i + 1] = flux;
            transferred += flux;
        }
        dx[0] = input - central * self.cl - transferred;
    }
}

/// The parameter tuple driving the right-hand side
///
/// Only the subcutaneous variant carries an absorption rate.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameters {
    Intravenous(Disposition),
    Subcutaneous { k_a: f64, disposition: Disposition },
}

impl Parameters {
    pub fn route(&self) -> Route {
        match self {
            Parameters::Intravenous(_) => Route::Iv,
            Parameters::Subcutaneous { .. } => Route::Sc,
        }
    }

    pub fn disposition(&self) -> &Disposition {
        match self {
            Parameters::Intravenous(disposition) => disposition,
            Parameters::Subcutaneous { disposition, .. } => disposition,
        }
    }

    /// Length of the state vector
    pub fn nstates(&self) -> usize {
        let distributed = self.disposition().volumes.len();
        match self {
            Parameters::Intravenous(_) => distributed,
            Parameters::Subcutaneous { .. } => distributed + 1,
        }
    }

    /// Evaluate the derivatives of `x` into `dx` for a given dosing rate
    #[inline(always)]
    pub fn rhs_into(&self, dose: f64, x: &[f64], dx: &mut [f64]) {
        match self {
            Parameters::Intravenous(disposition) => disposition.distribute(dose, x, dx),
            Parameters::Subcutaneous { k_a, disposition } => {
                let absorbed = k_a * x[0];
                dx[0] = dose - absorbed;
                disposition.distribute(absorbed, &x[1..], &mut dx[1..]);
            }
        }
    }
}

/// A validated compartmental model bound to its dosing series
///
/// The parameter tuple is derived once, when the model is built, and the dose
/// is looked up by time, so [CompartmentModel::rhs] has no side effects.
#[derive(Debug, Clone)]
pub struct CompartmentModel {
    components: usize,
    route: Route,
    config: CompartmentConfig,
    parameters: Parameters,
    dose: Arc<DoseSeries>,
}

impl CompartmentModel {
    /// Validate a model definition
    ///
    /// # Arguments
    ///
    /// * `components` - Number of compartments, the depot included for the subcutaneous route
    /// * `config` - Model name and parameters
    /// * `route` - `"iv"` or `"sc"`
    /// * `dose` - Dosing rates entering the model
    ///
    /// Checks are run in a fixed order: component count, key count, route, sign of
    /// the parameters. The first failing check is reported.
    pub fn new(
        components: usize,
        config: CompartmentConfig,
        route: &str,
        dose: DoseSeries,
    ) -> Result<Self, ModelError> {
        let parsed = route.parse::<Route>();

        // 1. Enough components for the route
        let minimum = match parsed {
            Ok(route) => route.min_components(),
            Err(_) => 1,
        };
        if components < minimum {
            return Err(ModelError::InsufficientComponents {
                route: route.to_string(),
                components,
                minimum,
            });
        }

        // 2. Key count and key names
        if let Ok(route) = parsed {
            let required = required_keys(route, components);
            if config.key_count() != required.len() + 1 {
                return Err(ModelError::IncorrectlyDefined {
                    expected: required.len() + 1,
                    found: config.key_count(),
                });
            }
            if let Some(missing) = required.iter().find(|key| config.get(key).is_none()) {
                return Err(ModelError::MissingParameter {
                    name: missing.clone(),
                });
            }
        }

        // 3. Known route
        let route = parsed?;

        // 4. Non-negative parameters
        if let Some((name, value)) = config
            .parameters()
            .find(|(_, value)| !(value.is_finite() && *value >= 0.0))
        {
            return Err(ModelError::NegativeParameter {
                name: name.to_string(),
                value,
            });
        }

        let parameters = Self::derive(&config, route, components)?;
        tracing::debug!(
            "Model '{}' ({}, {} compartments): {:?}",
            config.name(),
            route,
            components,
            parameters
        );

        Ok(CompartmentModel {
            components,
            route,
            config,
            parameters,
            dose: Arc::new(dose),
        })
    }

    fn derive(
        config: &CompartmentConfig,
        route: Route,
        components: usize,
    ) -> Result<Parameters, ModelError> {
        let peripherals = route.peripherals(components);
        let mut volumes = Vec::with_capacity(peripherals + 1);
        let mut clearances = Vec::with_capacity(peripherals);

        volumes.push(config.require("V_c")?);
        for i in 1..=peripherals {
            volumes.push(config.require(&format!("V_p{}", i))?);
            clearances.push(config.require(&format!("Q_p{}", i))?);
        }
        let disposition = Disposition {
            cl: config.require("CL")?,
            volumes,
            clearances,
        };

        Ok(match route {
            Route::Iv => Parameters::Intravenous(disposition),
            Route::Sc => Parameters::Subcutaneous {
                k_a: config.require("k_a")?,
                disposition,
            },
        })
    }

    /// Build the parameter tuple from the configuration
    ///
    /// This has no side effects. The result is identical to [CompartmentModel::parameters],
    /// which holds the tuple derived at construction.
    pub fn derive_parameters(&self) -> Result<Parameters, ModelError> {
        Self::derive(&self.config, self.route, self.components)
    }

    /// The parameter tuple used by every right-hand side evaluation
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn route(&self) -> Route {
        self.route
    }

    /// Number of compartments, the depot included
    pub fn components(&self) -> usize {
        self.components
    }

    pub fn config(&self) -> &CompartmentConfig {
        &self.config
    }

    pub fn dose_series(&self) -> &DoseSeries {
        &self.dose
    }

    pub(crate) fn shared_dose(&self) -> Arc<DoseSeries> {
        Arc::clone(&self.dose)
    }

    /// Dosing rate at time `t`
    #[inline]
    pub fn dose(&self, t: f64) -> f64 {
        self.dose.rate_at(t)
    }

    /// Evaluate the right-hand side at `(t, state)` into `dx`
    ///
    /// `state` and `dx` must both hold [CompartmentModel::components] values.
    #[inline]
    pub fn rhs_into(&self, t: f64, state: &[f64], dx: &mut [f64]) {
        debug_assert_eq!(state.len(), self.components);
        debug_assert_eq!(dx.len(), self.components);
        self.parameters.rhs_into(self.dose(t), state, dx);
    }

    /// The right-hand side at `(t, state)`
    pub fn rhs(&self, t: f64, state: &[f64]) -> Vec<f64> {
        let mut dx = vec![0.0; state.len()];
        self.rhs_into(t, state, &mut dx);
        dx
    }

    /// Compartment labels prefixed with the model name
    pub fn labels(&self) -> Vec<String> {
        compartment_labels(self.name(), self.route, self.components)
    }
}
