pub mod trajectory;

pub use trajectory::{
    read_trajectory, write_trajectory, CsvSink, Manifest, ManifestEntry, TrajectoryError,
    TrajectorySink, MANIFEST_FILE,
};
