//! Compartmental pharmacokinetic models driven by a dosing protocol
//!
//! A [DoseProtocol] generates the dose series, a [CompartmentModel] turns it
//! and a set of named parameters into a linear ODE system, and a [Solution]
//! integrates one or more models over a shared time grid.
//!
//! ```no_run
//! use pkmodel::prelude::*;
//!
//! let protocol = DoseProtocol::new(2.0, 0.0, 1.0, 1000)?;
//! let config = CompartmentConfig::new("model1")
//!     .with("V_c", 1.0)
//!     .with("CL", 1.0)
//!     .with("V_p1", 1.0)
//!     .with("Q_p1", 1.0);
//! let model = CompartmentModel::new(2, config, "iv", protocol.linear_dose())?;
//! let solution = Solution::new(vec![model], protocol.times().to_vec(), vec![vec![0.0, 0.0]])?;
//! let trajectories = solution.run()?;
//! # Ok::<(), pkmodel::PkError>(())
//! ```

pub mod data;
pub mod entrypoints;
pub mod error;
pub mod logger;
pub mod settings;
pub mod simulator;

pub use crate::data::*;
pub use crate::simulator::{CompartmentConfig, CompartmentModel, Method, Route, Solution};
pub use error::PkError;

pub mod prelude {
    pub mod data {
        pub use crate::data::{
            dose::{DoseError, DoseProtocol, DoseSeries, InstantaneousDose, Scalar},
            overlay::{Overlay, OverlayError, Series},
            parser::{read_trajectory, write_trajectory, CsvSink, Manifest, TrajectorySink},
            trajectory::Trajectory,
        };
    }
    pub mod simulator {
        pub use crate::simulator::{
            CompartmentConfig, CompartmentModel, Disposition, Method, ModelError, Parameters,
            Route, Solution, SolutionError, SolverSettings,
        };
    }

    pub use self::data::*;
    pub use self::simulator::*;
    pub use crate::entrypoints::simulate;
    pub use crate::logger::setup_log;
    pub use crate::settings::Settings;
    pub use crate::PkError;
}
