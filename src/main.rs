//! Radiozoa: bring up eight VL53 time-of-flight sensors on one I2C bus,
//! give each a unique address, then poll them and colour the LED ring.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod bus;
mod cli;
mod config;
mod configurator;
mod device;
mod error;
#[cfg(target_os = "linux")]
mod hardware;
mod led;
mod ranging;
mod sensors;
mod service;

use cli::Cli;
use config::AppConfig;
use configurator::ConfigureReport;
use device::DeviceTable;
use service::RadiozoaService;

fn init_logging(cli: &Cli, config: &AppConfig) {
    let filter = match cli.log_level {
        Some(level) => EnvFilter::new(level.to_filter_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(atty::is(atty::Stream::Stderr))
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[cfg(target_os = "linux")]
fn print_report(table: &DeviceTable, report: &ConfigureReport) {
    println!("Before:\n{}", report.before);
    if report.after.is_empty() {
        println!("After: no devices answered");
    } else {
        println!("After:\n{}", report.after);
    }
    match &report.outcome {
        Ok(()) if report.forced => println!("All sensors reconfigured (forced)."),
        Ok(()) if report.reprogrammed => println!("All sensors configured."),
        Ok(()) => println!("Bus already configured, nothing to do."),
        Err(e) => println!("{}", e),
    }
    for &address in report.missing() {
        if let Some(device) = table.by_address(address) {
            println!("  sensor {} missing at 0x{:02X}", device.label(), address);
        }
    }
    for index in &report.absent {
        println!("  sensor {} never answered at the factory address", index);
    }
    for failure in &report.write_failures {
        println!("  {}", failure);
    }
}

#[cfg(target_os = "linux")]
async fn run(cli: Cli, config: Arc<AppConfig>) -> Result<()> {
    let service = RadiozoaService::from_config(Arc::clone(&config))?;
    let table = Arc::clone(service.table());
    let bus = hardware::open_bus(&config.bus.device)?;

    if cli.scan {
        print!("{}", service.scan(bus));
        return Ok(());
    }

    if !cli.no_configure {
        let pins = hardware::open_shutdown_pins(&table);
        let mut configurator = service.configurator(bus, pins, hardware::Delay)?;
        if let Some(label) = &cli.reset {
            let device = table
                .by_label(label)
                .with_context(|| format!("no sensor labelled {}", label))?;
            configurator.reset(device.index)?;
        }
        let report = configurator.configure(cli.force);
        print_report(&table, &report);

        if cli.configure_only {
            return report.outcome.context("address configuration failed");
        }
    }

    let mut factory = sensors::vl53::Vl53Factory::new(bus);
    let led = led::from_kind(config.led.kind);
    service
        .run_ranging(&mut factory, led, service::wait_for_shutdown())
        .await?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn run(_cli: Cli, _config: Arc<AppConfig>) -> Result<()> {
    anyhow::bail!("radiozoa needs Linux I2C and GPIO devices")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate().map_err(anyhow::Error::msg)?;

    let mut config = AppConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.apply_cli_overrides(&cli);
    config.validate()?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&cli, &config);
    info!(
        "radiozoa {} starting on {}",
        env!("CARGO_PKG_VERSION"),
        config.bus.device
    );

    run(cli, Arc::new(config)).await
}
