//! Run a study from a settings file and summarise every compartment
//!
//! ```sh
//! cargo run --example study -- demos/study.toml
//! ```

use anyhow::{Context, Result};
use pkmodel::prelude::*;

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/study.toml".to_string());
    let settings =
        Settings::from_path(&path).with_context(|| format!("Failed to read settings from {}", path))?;
    setup_log(&settings.output.log_level);

    let trajectories = simulate(&settings)?;

    let overlay = match &settings.output.dir {
        Some(dir) => Overlay::from_manifest(dir)?,
        None => Overlay::from_trajectories(trajectories)?,
    };
    let labels = overlay.labels();
    if let Some((start, end)) = overlay.time_span(&labels)? {
        println!("t = {} .. {}", start, end);
    }
    for series in overlay.series(&labels)? {
        let peak = series
            .quantities
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        let last = series.quantities.last().copied().unwrap_or_default();
        println!("{:<24} peak {:>10.6}  final {:>10.6}", series.label, peak, last);
    }

    Ok(())
}
