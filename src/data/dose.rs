use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error type for dose generation and dose lookups
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DoseError {
    #[error("Type mismatch for '{field}': expected a number, found {found}")]
    TypeKind { field: String, found: String },
    #[error("Invalid dosing grid: {0}")]
    InvalidGrid(String),
    #[error("Invalid pulse definition: {0}")]
    InvalidPulse(String),
    #[error("Dose series has {times} time points but {rates} rates")]
    LengthMismatch { times: usize, rates: usize },
    #[error("Exhausted dose series: t = {time} is outside the sampled span [{start}, {end}]")]
    Exhausted { time: f64, start: f64, end: f64 },
}

/// A configuration value that is expected to be numeric
///
/// Dose settings are read from user supplied files, where nothing prevents a
/// quantity from being written as text. Values are checked eagerly, when the
/// protocol is built, so a bad value never reaches sample generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Returns the numeric value, or [DoseError::TypeKind] naming `field`
    pub fn number(&self, field: &str) -> Result<f64, DoseError> {
        match self {
            Scalar::Number(value) => Ok(*value),
            Scalar::Text(text) => Err(DoseError::TypeKind {
                field: field.to_string(),
                found: format!("text \"{}\"", text),
            }),
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(value) => write!(f, "{}", value),
            Scalar::Text(text) => write!(f, "\"{}\"", text),
        }
    }
}

/// Probability density function of the normal distribution
fn normpdf(x: f64, mean: f64, std: f64) -> f64 {
    let variance = std * std;
    (1.0 / (std * (2.0 * std::f64::consts::PI).sqrt()))
        * (-((x - mean) * (x - mean)) / (2.0 * variance)).exp()
}

/// `n` evenly spaced points from `start` to `end`, both included
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n)
        .map(|i| {
            if i == n - 1 {
                end
            } else {
                start + step * i as f64
            }
        })
        .collect()
}

/// Shape of a one- or two-pulse bolus protocol
///
/// Each pulse is a normal density centred on its injection time and truncated
/// to zero outside the open window `(T - 3σ, T + 3σ)`. The first pulse carries
/// the protocol quantity, the second `k` times that quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstantaneousDose {
    k: f64,
    t1: f64,
    t2: f64,
    sigma: f64,
}

impl Default for InstantaneousDose {
    fn default() -> Self {
        InstantaneousDose {
            k: 1.0,
            t1: 2.0,
            t2: 8.0,
            sigma: 1.0,
        }
    }
}

impl InstantaneousDose {
    /// Create a new pulse definition
    ///
    /// # Arguments
    ///
    /// * `k` - Relative scale of the second pulse
    /// * `t1` - Time of the first injection
    /// * `t2` - Time of the second injection
    /// * `sigma` - Spread of both pulses, must be positive
    pub fn new(k: f64, t1: f64, t2: f64, sigma: f64) -> Result<Self, DoseError> {
        if !(k.is_finite() && t1.is_finite() && t2.is_finite()) {
            return Err(DoseError::InvalidPulse(
                "k, t1 and t2 must be finite".to_string(),
            ));
        }
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(DoseError::InvalidPulse(format!(
                "sigma must be positive, got {}",
                sigma
            )));
        }
        Ok(InstantaneousDose { k, t1, t2, sigma })
    }

    /// Same as [InstantaneousDose::new], from unchecked configuration values
    pub fn from_scalars(
        k: &Scalar,
        t1: &Scalar,
        t2: &Scalar,
        sigma: &Scalar,
    ) -> Result<Self, DoseError> {
        Self::new(
            k.number("k")?,
            t1.number("t1")?,
            t2.number("t2")?,
            sigma.number("sigma")?,
        )
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    pub fn t1(&self) -> f64 {
        self.t1
    }

    pub fn t2(&self) -> f64 {
        self.t2
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Whether `time` lies strictly inside the truncation window of the pulse at `centre`
    #[inline]
    fn in_window(&self, centre: f64, time: f64) -> bool {
        time > centre - 3.0 * self.sigma && time < centre + 3.0 * self.sigma
    }

    /// Dosing rate at `time` for a protocol of `quantity`
    ///
    /// Contributions of every pulse whose window contains `time` are summed,
    /// so overlapping pulses add up wherever they overlap.
    pub fn rate(&self, quantity: f64, time: f64) -> f64 {
        let mut rate = 0.0;
        if self.in_window(self.t1, time) {
            rate += quantity * normpdf(time, self.t1, self.sigma);
        }
        if self.in_window(self.t2, time) {
            rate += self.k * quantity * normpdf(time, self.t2, self.sigma);
        }
        rate
    }
}

/// A dosing protocol over a fixed, evenly spaced time grid
///
/// The protocol only fixes the amount and the grid; the shape of the dosing
/// signal is chosen by calling one of the generators, each of which returns a
/// [DoseSeries] aligned with [DoseProtocol::times].
#[derive(Debug, Clone, PartialEq)]
pub struct DoseProtocol {
    quantity: f64,
    t_start: f64,
    t_end: f64,
    times: Vec<f64>,
}

impl Default for DoseProtocol {
    fn default() -> Self {
        DoseProtocol {
            quantity: 43.0,
            t_start: 0.0,
            t_end: 10.0,
            times: linspace(0.0, 10.0, 1000),
        }
    }
}

impl DoseProtocol {
    /// Create a new protocol
    ///
    /// # Arguments
    ///
    /// * `quantity` - Drug quantity to inject
    /// * `t_start` - First time point of the grid
    /// * `t_end` - Last time point of the grid
    /// * `n` - Number of grid points
    pub fn new(quantity: f64, t_start: f64, t_end: f64, n: usize) -> Result<Self, DoseError> {
        if !quantity.is_finite() {
            return Err(DoseError::InvalidGrid(format!(
                "quantity must be finite, got {}",
                quantity
            )));
        }
        if n == 0 {
            return Err(DoseError::InvalidGrid(
                "the grid needs at least one point".to_string(),
            ));
        }
        if !(t_start.is_finite() && t_end.is_finite()) {
            return Err(DoseError::InvalidGrid(
                "grid bounds must be finite".to_string(),
            ));
        }
        if t_end < t_start {
            return Err(DoseError::InvalidGrid(format!(
                "t_end ({}) is before t_start ({})",
                t_end, t_start
            )));
        }
        Ok(DoseProtocol {
            quantity,
            t_start,
            t_end,
            times: linspace(t_start, t_end, n),
        })
    }

    /// Same as [DoseProtocol::new], with an unchecked quantity
    pub fn from_scalars(
        quantity: &Scalar,
        t_start: f64,
        t_end: f64,
        n: usize,
    ) -> Result<Self, DoseError> {
        Self::new(quantity.number("quantity")?, t_start, t_end, n)
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn t_start(&self) -> f64 {
        self.t_start
    }

    pub fn t_end(&self) -> f64 {
        self.t_end
    }

    /// The sampling grid shared by every generated series
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    fn generate(&self, rate: impl Fn(f64) -> f64) -> DoseSeries {
        DoseSeries {
            rates: self.times.iter().map(|&t| rate(t)).collect(),
            times: self.times.clone(),
        }
    }

    /// Constant infusion, `X(t) = quantity`
    pub fn steady_dose(&self) -> DoseSeries {
        self.generate(|_| self.quantity)
    }

    /// Ramp, `X(t) = quantity * t`
    ///
    /// A negative quantity gives a declining ramp.
    pub fn linear_dose(&self) -> DoseSeries {
        self.generate(|t| self.quantity * t)
    }

    /// One or two Gaussian bolus pulses, see [InstantaneousDose]
    pub fn instantaneous_dose(&self, pulses: &InstantaneousDose) -> DoseSeries {
        self.generate(|t| pulses.rate(self.quantity, t))
    }
}

/// Dosing rates sampled on an ordered time grid
///
/// The series is queried by time, never by position: [DoseSeries::rate_at]
/// interpolates linearly between the neighbouring samples, so the same time
/// always yields the same rate no matter how often, or in which order, an
/// integrator asks for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DoseSamples")]
pub struct DoseSeries {
    times: Vec<f64>,
    rates: Vec<f64>,
}

/// Unchecked samples, validated into a [DoseSeries] on deserialization
#[derive(Deserialize)]
struct DoseSamples {
    times: Vec<f64>,
    rates: Vec<f64>,
}

impl TryFrom<DoseSamples> for DoseSeries {
    type Error = DoseError;

    fn try_from(samples: DoseSamples) -> Result<Self, Self::Error> {
        DoseSeries::from_samples(samples.times, samples.rates)
    }
}

impl DoseSeries {
    /// Build a series from caller supplied samples
    ///
    /// `times` must be strictly increasing and as long as `rates`.
    pub fn from_samples(times: Vec<f64>, rates: Vec<f64>) -> Result<Self, DoseError> {
        if times.len() != rates.len() {
            return Err(DoseError::LengthMismatch {
                times: times.len(),
                rates: rates.len(),
            });
        }
        if times.is_empty() {
            return Err(DoseError::InvalidGrid(
                "the grid needs at least one point".to_string(),
            ));
        }
        if times.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(DoseError::InvalidGrid(
                "time points must be strictly increasing".to_string(),
            ));
        }
        Ok(DoseSeries { times, rates })
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// First and last sampled time
    pub fn span(&self) -> (f64, f64) {
        (self.times[0], self.times[self.times.len() - 1])
    }

    /// Dosing rate at `time`
    ///
    /// Exact at grid points, linear between them. Outside the sampled span the
    /// nearest end value is carried; [DoseSeries::covers] guards the
    /// integration span itself.
    #[inline]
    pub fn rate_at(&self, time: f64) -> f64 {
        let upper = self.times.partition_point(|&t| t <= time);
        if upper == 0 {
            return self.rates[0];
        }
        if upper == self.times.len() {
            return self.rates[upper - 1];
        }
        let lower = upper - 1;
        let slope =
            (self.rates[upper] - self.rates[lower]) / (self.times[upper] - self.times[lower]);
        self.rates[lower] + slope * (time - self.times[lower])
    }

    /// Check that the series has samples for the whole of `[from, to]`
    pub fn covers(&self, from: f64, to: f64) -> Result<(), DoseError> {
        let (start, end) = self.span();
        for time in [from, to] {
            if time < start || time > end {
                return Err(DoseError::Exhausted { time, start, end });
            }
        }
        Ok(())
    }
}
