//! traverse_daq binary: log voltage against displacement over one traverse.
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use traverse_daq::{
    app::{run_traverse, Rig},
    config::Settings,
    data::{ConsoleTrace, CsvWriter, TeeSink},
    hardware::mock::{CallJournal, SimulatedSampler, SimulatedStage},
    hardware::{ActuatorSession, SamplerSession},
    AppResult,
};

type Sessions = (Box<dyn ActuatorSession>, Box<dyn SamplerSession>);

#[derive(Parser, Debug)]
#[command(name = "traverse_daq", version, about)]
struct Cli {
    /// Settings file (TOML). Defaults to config/traverse.toml when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output CSV path, overriding storage.output_path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Travel threshold in native ticks, overriding traverse.travel_threshold
    #[arg(long)]
    threshold: Option<i64>,

    /// Log filter, e.g. "debug" or "traverse_daq=trace"
    #[arg(long)]
    log_level: Option<String>,

    /// Run against the simulated stage and sampler instead of vendor hardware
    #[arg(long)]
    simulate: bool,

    /// Ticks the simulated stage travels between readings
    #[arg(long, default_value_t = 200_000, requires = "simulate")]
    sim_step: i64,
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(output) = &cli.output {
        settings.storage.output_path = output.clone();
    }
    if let Some(threshold) = cli.threshold {
        settings.traverse.travel_threshold = threshold;
    }
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn init_tracing(cli: &Cli, settings: &Settings) {
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn simulated_rig(settings: &Settings, step: i64) -> AppResult<Sessions> {
    let journal = CallJournal::new();
    let stage = SimulatedStage::new(journal.clone())
        .with_channels(settings.actuator.required_channels())
        .with_ticks_per_read(step)
        .with_stale_packets(settings.actuator.stale_readings);
    let period = settings.sampler.sample_period()?;
    let sampler = SimulatedSampler::new(journal)
        .with_scale(settings.sampler.scale.clone())
        .with_sample_period(period);
    Ok((Box::new(stage), Box::new(sampler)))
}

#[cfg(all(feature = "mcs_sdk", feature = "nidaqmx_sdk"))]
fn hardware_rig(settings: &Settings) -> AppResult<Sessions> {
    use traverse_daq::hardware::{mcs::McsSystem, nidaqmx::DaqmxTask};

    let actuator = McsSystem::open(&settings.actuator.locator, &settings.actuator.options)?;
    let sampler = DaqmxTask::from_config(&settings.sampler)?;
    Ok((Box::new(actuator), Box::new(sampler)))
}

#[cfg(not(all(feature = "mcs_sdk", feature = "nidaqmx_sdk")))]
fn hardware_rig(_settings: &Settings) -> AppResult<Sessions> {
    Err(traverse_daq::DaqError::FeatureNotEnabled("hardware".to_string()))
}

fn run(cli: &Cli, settings: &Settings) -> Result<()> {
    let csv = CsvWriter::create(&settings.storage.output_path).with_context(|| {
        format!(
            "Failed to create log at {}",
            settings.storage.output_path.display()
        )
    })?;

    let (actuator, sampler) = if cli.simulate {
        tracing::info!(step = cli.sim_step, "Using simulated rig");
        simulated_rig(settings, cli.sim_step)?
    } else {
        hardware_rig(settings).context("Failed to open hardware")?
    };
    let rig = Rig {
        actuator,
        sampler,
        sink: Box::new(TeeSink::new(csv, ConsoleTrace::stdout())),
    };

    let summary = run_traverse(rig, settings)?;
    println!(
        "Traverse complete: {} records, final displacement {}",
        summary.iterations, summary.last_record.displacement
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&cli, &settings);

    match run(&cli, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
