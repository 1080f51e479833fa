pub mod model;
pub mod solution;

pub use model::{CompartmentConfig, CompartmentModel, Disposition, ModelError, Parameters, Route};
pub use solution::{Method, Solution, SolutionError, SolverSettings};

type T = f64;
type V = nalgebra::DVector<T>;
type M = nalgebra::DMatrix<T>;
