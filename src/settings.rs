//! Study settings
//!
//! A study is described in a TOML file. Values can be overridden from the
//! environment with the `PKMODEL` prefix and `__` as separator, e.g.
//! `PKMODEL__PROTOCOL__QUANTITY=6`.
//!
//! ```toml
//! [protocol]
//! kind = "linear"
//! quantity = 2.0
//! t_start = 0.0
//! t_end = 1.0
//! n = 1000
//!
//! [output]
//! dir = "data"
//!
//! [[models]]
//! components = 2
//! route = "iv"
//! initial_state = [0.0, 0.0]
//!
//! [models.parameters]
//! name = "model1"
//! V_c = 2.0
//! CL = 2.0
//! V_p1 = 0.1
//! Q_p1 = 3.0
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::dose::{DoseError, DoseProtocol, DoseSeries, InstantaneousDose, Scalar};
use crate::simulator::model::{CompartmentConfig, CompartmentModel};
use crate::simulator::solution::{Solution, SolverSettings};
use crate::PkError;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Could not read settings: {0}")]
    ConfigError(#[from] config::ConfigError),
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Shape of the dosing signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoseKind {
    Steady,
    Linear,
    Instantaneous,
}

fn default_t_end() -> f64 {
    10.0
}

fn default_n() -> usize {
    1000
}

fn default_k() -> Scalar {
    Scalar::Number(1.0)
}

fn default_t1() -> Scalar {
    Scalar::Number(2.0)
}

fn default_t2() -> Scalar {
    Scalar::Number(8.0)
}

fn default_sigma() -> Scalar {
    Scalar::Number(1.0)
}

/// The dosing protocol, shared by every model of the study
///
/// Its grid is also the output grid of the solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    pub kind: DoseKind,
    pub quantity: Scalar,
    #[serde(default)]
    pub t_start: f64,
    #[serde(default = "default_t_end")]
    pub t_end: f64,
    #[serde(default = "default_n")]
    pub n: usize,
    /// Relative scale of the second pulse, instantaneous dosing only
    #[serde(default = "default_k")]
    pub k: Scalar,
    #[serde(default = "default_t1")]
    pub t1: Scalar,
    #[serde(default = "default_t2")]
    pub t2: Scalar,
    #[serde(default = "default_sigma")]
    pub sigma: Scalar,
}

impl ProtocolSettings {
    pub fn protocol(&self) -> Result<DoseProtocol, DoseError> {
        DoseProtocol::from_scalars(&self.quantity, self.t_start, self.t_end, self.n)
    }

    /// Generate the dose series described by these settings
    pub fn dose_series(&self) -> Result<DoseSeries, DoseError> {
        let protocol = self.protocol()?;
        Ok(match self.kind {
            DoseKind::Steady => protocol.steady_dose(),
            DoseKind::Linear => protocol.linear_dose(),
            DoseKind::Instantaneous => {
                let pulses =
                    InstantaneousDose::from_scalars(&self.k, &self.t1, &self.t2, &self.sigma)?;
                protocol.instantaneous_dose(&pulses)
            }
        })
    }
}

/// Name and parameter values of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSettings {
    pub name: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub components: usize,
    pub route: String,
    /// Defaults to an empty system
    #[serde(default)]
    pub initial_state: Option<Vec<f64>>,
    pub parameters: ParameterSettings,
}

impl ModelSettings {
    pub fn config(&self) -> CompartmentConfig {
        self.parameters
            .values
            .iter()
            .fold(CompartmentConfig::new(&self.parameters.name), |config, (k, v)| {
                config.with(canonical_key(k), *v)
            })
    }

    pub fn initial_state(&self) -> Vec<f64> {
        self.initial_state
            .clone()
            .unwrap_or_else(|| vec![0.0; self.components])
    }
}

/// Restore the spelling of known parameter keys
///
/// Keys may reach us lowercased, from the environment or from the settings loader.
fn canonical_key(key: &str) -> String {
    let lower = key.to_lowercase();
    let numbered = |prefix: &str, canonical: &str| {
        lower
            .strip_prefix(prefix)
            .filter(|i| !i.is_empty() && i.chars().all(|c| c.is_ascii_digit()))
            .map(|i| format!("{}{}", canonical, i))
    };
    match lower.as_str() {
        "v_c" => "V_c".to_string(),
        "cl" => "CL".to_string(),
        "k_a" => "k_a".to_string(),
        _ => numbered("v_p", "V_p")
            .or_else(|| numbered("q_p", "Q_p"))
            .unwrap_or_else(|| key.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory receiving one CSV per model, nothing is written when unset
    pub dir: Option<String>,
    pub log_level: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings {
            dir: None,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub protocol: ProtocolSettings,
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default)]
    pub output: OutputSettings,
    pub models: Vec<ModelSettings>,
}

impl Settings {
    /// Read settings from a TOML file, applying `PKMODEL__*` environment overrides
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let source = File::from(path.as_ref()).format(FileFormat::Toml);
        Self::load(Config::builder().add_source(source))
    }

    /// Parse settings from a TOML string, applying `PKMODEL__*` environment overrides
    pub fn from_toml(contents: &str) -> Result<Self, SettingsError> {
        Self::load(Config::builder().add_source(File::from_str(contents, FileFormat::Toml)))
    }

    fn load(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, SettingsError> {
        let parsed = builder
            .add_source(
                Environment::with_prefix("PKMODEL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let settings: Settings = parsed.try_deserialize()?;
        if settings.models.is_empty() {
            return Err(SettingsError::Invalid(
                "at least one [[models]] entry is required".to_string(),
            ));
        }
        Ok(settings)
    }

    /// Output times, the protocol grid
    pub fn t_eval(&self) -> Result<Vec<f64>, DoseError> {
        Ok(self.protocol.protocol()?.times().to_vec())
    }

    /// Build every model, each bound to its own copy of the dose series
    pub fn models(&self) -> Result<Vec<CompartmentModel>, PkError> {
        let series = self.protocol.dose_series()?;
        self.models
            .iter()
            .map(|model| {
                CompartmentModel::new(model.components, model.config(), &model.route, series.clone())
                    .map_err(PkError::from)
            })
            .collect()
    }

    pub fn solution(&self) -> Result<Solution, PkError> {
        let initial_state = self.models.iter().map(|m| m.initial_state()).collect();
        Ok(Solution::new(self.models()?, self.t_eval()?, initial_state)?.with_settings(self.solver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::model::Route;
    use crate::simulator::solution::Method;

    const STUDY: &str = r#"
[protocol]
kind = "instantaneous"
quantity = 6
t_end = 12.0
n = 121
t1 = 1.0
sigma = 0.5

[solver]
method = "tr_bdf2"

[[models]]
components = 2
route = "iv"
initial_state = [1.0, 0.0]

[models.parameters]
name = "model1"
V_c = 1.0
CL = 2.0
V_p1 = 1.0
Q_p1 = 1.0

[[models]]
components = 4
route = "sc"

[models.parameters]
name = "model2"
V_c = 1.0
CL = 2.0
k_a = 3.0
V_p1 = 1.0
Q_p1 = 1.0
V_p2 = 0.25
Q_p2 = 0.5
"#;

    #[test]
    fn test_parse_study() {
        let settings = Settings::from_toml(STUDY).unwrap();
        assert_eq!(settings.protocol.kind, DoseKind::Instantaneous);
        assert_eq!(settings.protocol.t_start, 0.0);
        assert_eq!(settings.protocol.k, Scalar::Number(1.0));
        assert_eq!(settings.solver.method, Method::TrBdf2);
        assert_eq!(settings.output, OutputSettings::default());
        assert_eq!(settings.t_eval().unwrap().len(), 121);

        let models = settings.models().unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name(), "model1");
        assert_eq!(models[1].route(), Route::Sc);
        assert_eq!(models[1].components(), 4);
        assert_eq!(settings.models[1].initial_state(), vec![0.0; 4]);

        let solution = settings.solution().unwrap();
        assert_eq!(solution.settings().method, Method::TrBdf2);
        assert_eq!(solution.initial_state()[0], vec![1.0, 0.0]);
    }

    #[test]
    fn test_text_quantity_is_a_type_error() {
        let study = STUDY.replace("quantity = 6", "quantity = \"hello world\"");
        let settings = Settings::from_toml(&study).unwrap();
        assert!(matches!(
            settings.protocol.dose_series(),
            Err(DoseError::TypeKind { ref field, .. }) if field == "quantity"
        ));
        assert!(matches!(
            settings.models(),
            Err(PkError::Dose(DoseError::TypeKind { .. }))
        ));
    }

    #[test]
    fn test_model_errors_propagate() {
        let study = STUDY.replace("components = 4", "components = 3");
        let settings = Settings::from_toml(&study).unwrap();
        assert!(matches!(settings.models(), Err(PkError::Model(_))));
    }

    #[test]
    fn test_parameter_keys_are_canonical() {
        assert_eq!(canonical_key("v_c"), "V_c");
        assert_eq!(canonical_key("CL"), "CL");
        assert_eq!(canonical_key("K_A"), "k_a");
        assert_eq!(canonical_key("q_p12"), "Q_p12");
        assert_eq!(canonical_key("v_p"), "v_p");
        assert_eq!(canonical_key("extra"), "extra");
    }

    #[test]
    fn test_models_are_required() {
        let study = "models = []\n[protocol]\nkind = \"steady\"\nquantity = 1.0\n";
        assert!(matches!(
            Settings::from_toml(study),
            Err(SettingsError::Invalid(_))
        ));
    }
}
