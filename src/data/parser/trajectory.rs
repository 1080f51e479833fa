use crate::data::trajectory::Trajectory;
use crate::simulator::model::Route;
use csv::{ReaderBuilder, WriterBuilder};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the run description written next to the trajectory files
pub const MANIFEST_FILE: &str = "manifest.json";

/// Errors encountered while persisting or loading trajectories
#[derive(Error, Debug)]
pub enum TrajectoryError {
    /// Error encountered when reading or writing CSV data
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    /// Error encountered when accessing the file system
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    /// Error encountered when reading or writing the manifest
    #[error("Manifest error: {0}")]
    ManifestError(#[from] serde_json::Error),
    /// The file holds no rows
    #[error("Trajectory file {0} is empty")]
    Empty(String),
    /// A row needs a time and at least one compartment
    #[error("Row {row} has {found} columns, a time and at least one compartment are required")]
    TooFewColumns { row: usize, found: usize },
    /// Rows must all have the same number of columns
    #[error("Row {row} has {found} columns, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    /// A cell could not be parsed as a number
    #[error("Invalid value '{value}' at row {row}, column {column}")]
    InvalidValue {
        row: usize,
        column: usize,
        value: String,
    },
    /// Two models would be written to the same file
    #[error("Model '{name}' maps to {file}, already written for model '{existing}'")]
    FileCollision {
        name: String,
        existing: String,
        file: String,
    },
    #[error("Shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

/// Write a trajectory as headerless CSV
///
/// Each row holds the time followed by the quantity in every compartment, in
/// state vector order. Numbers are written in their shortest exact form, so
/// [read_trajectory] gives back the same values.
pub fn write_trajectory(
    path: impl AsRef<Path>,
    trajectory: &Trajectory,
) -> Result<(), TrajectoryError> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path.as_ref())?;

    for (time, state) in trajectory.times().iter().zip(trajectory.states().rows()) {
        let mut record = Vec::with_capacity(state.len() + 1);
        record.push(time.to_string());
        record.extend(state.iter().map(|x| x.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a trajectory written by [write_trajectory]
///
/// The file does not record the model, so its `name` and `route` are supplied
/// by the caller.
pub fn read_trajectory(
    path: impl AsRef<Path>,
    name: impl Into<String>,
    route: Route,
) -> Result<Trajectory, TrajectoryError> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut times = Vec::new();
    let mut values = Vec::new();
    let mut ncols: Option<usize> = None;

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() < 2 {
            return Err(TrajectoryError::TooFewColumns {
                row,
                found: record.len(),
            });
        }
        match ncols {
            None => ncols = Some(record.len()),
            Some(expected) if expected != record.len() => {
                return Err(TrajectoryError::RaggedRow {
                    row,
                    expected,
                    found: record.len(),
                });
            }
            Some(_) => {}
        }

        for (column, field) in record.iter().enumerate() {
            let value =
                field
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| TrajectoryError::InvalidValue {
                        row,
                        column,
                        value: field.to_string(),
                    })?;
            if column == 0 {
                times.push(value);
            } else {
                values.push(value);
            }
        }
    }

    let ncols = ncols.ok_or_else(|| TrajectoryError::Empty(path.display().to_string()))?;
    let states = Array2::from_shape_vec((times.len(), ncols - 1), values)?;
    Ok(Trajectory::new(name.into(), route, times, states))
}

/// Receives trajectories as a [crate::Solution] produces them
pub trait TrajectorySink {
    fn accept(&mut self, trajectory: &Trajectory) -> Result<(), TrajectoryError>;
}

/// Collects trajectories in memory
impl TrajectorySink for Vec<Trajectory> {
    fn accept(&mut self, trajectory: &Trajectory) -> Result<(), TrajectoryError> {
        self.push(trajectory.clone());
        Ok(())
    }
}

/// One model of a run, as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub route: Route,
    pub file: String,
    pub components: usize,
}

/// Description of the trajectory files written by a [CsvSink]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub models: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, TrajectoryError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), TrajectoryError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// The entry whose trajectory is stored in `file`, if any
    pub fn by_file(&self, file: &str) -> Option<&ManifestEntry> {
        self.models.iter().find(|e| e.file == file)
    }
}

/// Writes each trajectory to `<dir>/<name>.csv` and keeps `<dir>/manifest.json` up to date
#[derive(Debug)]
pub struct CsvSink {
    dir: PathBuf,
    manifest: Manifest,
}

impl CsvSink {
    /// Create a sink writing into `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, TrajectoryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(CsvSink {
            dir,
            manifest: Manifest::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Path of the file holding the trajectory of model `name`
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(file_name(name))
    }
}

fn file_name(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    format!("{}.csv", stem)
}

impl TrajectorySink for CsvSink {
    fn accept(&mut self, trajectory: &Trajectory) -> Result<(), TrajectoryError> {
        let file = file_name(trajectory.name());
        if let Some(existing) = self.manifest.by_file(&file) {
            return Err(TrajectoryError::FileCollision {
                name: trajectory.name().to_string(),
                existing: existing.name.clone(),
                file,
            });
        }
        write_trajectory(self.dir.join(&file), trajectory)?;
        tracing::debug!(
            "Wrote '{}' to {}",
            trajectory.name(),
            self.dir.join(&file).display()
        );

        self.manifest.models.push(ManifestEntry {
            name: trajectory.name().to_string(),
            route: trajectory.route(),
            file,
            components: trajectory.ncompartments(),
        });
        self.manifest.write(self.dir.join(MANIFEST_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pkmodel-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn example() -> Trajectory {
        Trajectory::new(
            "example".to_string(),
            Route::Sc,
            vec![0.0, 0.1, 0.2],
            array![
                [1.0, 0.0, 0.0],
                [0.9048374180359595, 0.0912, 1.0e-20],
                [0.8187307530779818, 0.16523, 3.3333333333333335e-7]
            ],
        )
    }

    #[test]
    fn test_round_trip_is_exact() {
        let dir = scratch_dir("round-trip");
        let path = dir.join("example.csv");
        let trajectory = example();

        write_trajectory(&path, &trajectory).unwrap();
        let read = read_trajectory(&path, "example", Route::Sc).unwrap();

        assert_eq!(read, trajectory);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_file_layout() {
        let dir = scratch_dir("layout");
        let path = dir.join("example.csv");
        write_trajectory(&path, &example()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "0,1,0,0");
        assert!(lines.iter().all(|l| l.split(',').count() == 4));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_malformed_files() {
        let dir = scratch_dir("malformed");

        let ragged = dir.join("ragged.csv");
        std::fs::write(&ragged, "0,1,2\n1,2\n").unwrap();
        assert!(matches!(
            read_trajectory(&ragged, "r", Route::Iv),
            Err(TrajectoryError::RaggedRow { row: 1, .. })
        ));

        let text = dir.join("text.csv");
        std::fs::write(&text, "0,1\n1,abc\n").unwrap();
        assert!(matches!(
            read_trajectory(&text, "t", Route::Iv),
            Err(TrajectoryError::InvalidValue { row: 1, column: 1, .. })
        ));

        let empty = dir.join("empty.csv");
        std::fs::write(&empty, "").unwrap();
        assert!(matches!(
            read_trajectory(&empty, "e", Route::Iv),
            Err(TrajectoryError::Empty(_))
        ));

        let narrow = dir.join("narrow.csv");
        std::fs::write(&narrow, "0\n1\n").unwrap();
        assert!(matches!(
            read_trajectory(&narrow, "n", Route::Iv),
            Err(TrajectoryError::TooFewColumns { row: 0, found: 1 })
        ));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_csv_sink_writes_manifest() {
        let dir = scratch_dir("sink");
        let mut sink = CsvSink::new(dir.join("out")).unwrap();
        sink.accept(&example()).unwrap();

        let manifest = Manifest::read(dir.join("out").join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest.models.len(), 1);
        assert_eq!(
            manifest.models[0],
            ManifestEntry {
                name: "example".to_string(),
                route: Route::Sc,
                file: "example.csv".to_string(),
                components: 3,
            }
        );
        assert!(sink.path_for("example").exists());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_csv_sink_never_overwrites() {
        let dir = scratch_dir("collision");
        let mut sink = CsvSink::new(&dir).unwrap();
        let first = Trajectory::new("a/b".to_string(), Route::Iv, vec![0.0], array![[1.0]]);
        let second = Trajectory::new("a_b".to_string(), Route::Iv, vec![0.0], array![[2.0]]);
        sink.accept(&first).unwrap();

        let err = sink.accept(&second).unwrap_err();
        assert!(matches!(
            err,
            TrajectoryError::FileCollision { ref name, ref existing, ref file }
                if name == "a_b" && existing == "a/b" && file == "a_b.csv"
        ));
        assert!(matches!(
            sink.accept(&first),
            Err(TrajectoryError::FileCollision { .. })
        ));

        let manifest = Manifest::read(dir.join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest.models.len(), 1);
        let kept = read_trajectory(sink.path_for("a/b"), "a/b", Route::Iv).unwrap();
        assert_eq!(kept, first);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_file_names_stay_in_the_directory() {
        assert_eq!(file_name("iv-2 comp"), "iv-2 comp.csv");
        assert_eq!(file_name("a/b"), "a_b.csv");
    }
}
