use std::time::Instant;

use crate::data::parser::CsvSink;
use crate::data::trajectory::Trajectory;
use crate::settings::Settings;
use crate::PkError;

/// Run the study described by `settings`
///
/// Every model is built against the dosing protocol, then integrated over the
/// protocol grid. When `output.dir` is set, each trajectory is written to
/// `<dir>/<model name>.csv` as soon as it is computed, together with a
/// `manifest.json` describing the run.
///
/// Logging is not configured here, see [crate::logger::setup_log].
pub fn simulate(settings: &Settings) -> Result<Vec<Trajectory>, PkError> {
    let now = Instant::now();
    tracing::info!("Starting pkmodel");

    let solution = settings.solution()?;
    tracing::info!(
        "Simulating {} model(s) with a {:?} dose on {} time points from {} to {}",
        solution.models().len(),
        settings.protocol.kind,
        solution.t_eval().len(),
        settings.protocol.t_start,
        settings.protocol.t_end
    );

    let trajectories = match &settings.output.dir {
        Some(dir) => {
            tracing::info!("Output files will be written to {}", dir);
            let mut sink = CsvSink::new(dir)?;
            solution.analyse(&mut sink)?
        }
        None => {
            tracing::info!("Output files will not be written, set `output.dir` to enable them");
            solution.run()?
        }
    };

    tracing::info!("Simulation complete in {:.2?}", now.elapsed());
    Ok(trajectories)
}
