pub mod dose;
pub mod overlay;
pub mod parser;
pub mod trajectory;
pub use dose::{DoseError, DoseProtocol, DoseSeries, InstantaneousDose, Scalar};
pub use overlay::{Overlay, OverlayError, Series};
pub use trajectory::{compartment_labels, Trajectory};
