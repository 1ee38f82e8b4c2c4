use anyhow::{Context, Result};
use reactor_uc::{config, controller, forecast, telemetry};
use config::Config;
use controller::{write_outputs, RollingHorizonScheduler};
use forecast::ExogenousProfile;
use reactor_uc::domain::HorizonPlan;
use std::path::PathBuf;
use telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = Config::load(config_path.as_deref()).context("loading configuration")?;
    let _log_guard = init_tracing(cfg.run.log_dir.as_deref(), &cfg.run.name);

    info!(
        run = %cfg.run.name,
        backend = %cfg.solver.backend,
        units = cfg.units.len(),
        "starting reactor unit commitment"
    );

    let plan = HorizonPlan::from_config(&cfg.horizon)?;
    let profile = ExogenousProfile::from_config(&cfg.data, plan.end_period + plan.overlap)
        .context("loading exogenous profile")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        telemetry::shutdown_signal().await;
        on_signal.cancel();
    });

    let mut scheduler = RollingHorizonScheduler::from_config(&cfg, profile)
        .context("building scheduler")?
        .with_cancellation(cancel);
    let report = scheduler
        .run()
        .await
        .with_context(|| format!("run {} failed in phase {}", cfg.run.name, scheduler.phase()))?;

    let (dispatch, summary) = write_outputs(
        &cfg.run.output_dir,
        &report.run_name,
        report.completed,
        &report.aggregate,
    )
    .context("writing outputs")?;

    if report.completed {
        info!(
            dispatch = %dispatch.display(),
            summary = %summary.display(),
            windows_run = report.windows_run,
            resumed_from = ?report.resumed_from,
            "run complete"
        );
    } else {
        warn!(
            dispatch = %dispatch.display(),
            windows_run = report.windows_run,
            "run interrupted; partial outputs written, rerun to resume"
        );
    }
    Ok(())
}
