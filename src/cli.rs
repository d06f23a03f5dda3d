//! Command-line interface argument parsing.
//!
//! This module defines the CLI structure and parsing logic using gumdrop,
//! supporting scan, configure-only and ranging runs.

use gumdrop::Options;
use std::path::PathBuf;
use std::str::FromStr;

/// Log level for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Show all messages including trace
    Trace,
    /// Show debug messages and above
    Debug,
    /// Show info messages and above (default)
    Info,
    /// Show warnings and errors only
    Warn,
    /// Show errors only
    Error,
}

impl LogLevel {
    /// Convert LogLevel to a tracing filter string
    pub fn to_filter_string(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Radiozoa: assign sensor addresses and drive the distance ring
#[derive(Debug, Options)]
pub struct Cli {
    /// Print help message
    #[options(help = "print help message")]
    pub help: bool,

    /// Path to configuration file
    #[options(help = "path to configuration file", default = "config.toml", meta = "PATH")]
    pub config: PathBuf,

    /// Log level (overrides config file)
    #[options(help = "log level: trace, debug, info, warn, error", meta = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Reassign addresses even if the bus already looks configured
    #[options(help = "reassign addresses even if the bus already looks configured")]
    pub force: bool,

    /// Configure addresses, print the result and exit
    #[options(no_short, help = "configure addresses, print the result and exit")]
    pub configure_only: bool,

    /// Skip address configuration and assume the bus is already set up
    #[options(no_short, help = "skip address configuration")]
    pub no_configure: bool,

    /// Power-cycle one sensor by label, then reconfigure
    #[options(
        no_short,
        help = "power-cycle one sensor (N0, NE1, ...) before configuring",
        meta = "LABEL"
    )]
    pub reset: Option<String>,

    /// Print a bus scan and exit
    #[options(help = "print a bus scan and exit")]
    pub scan: bool,

    /// Polling period in milliseconds (overrides config file)
    #[options(short = "p", help = "polling period in milliseconds, 20 to 2000", meta = "MS")]
    pub period_ms: Option<u64>,

    /// Print the effective configuration and exit
    #[options(no_short, help = "print the effective configuration as TOML and exit")]
    pub print_config: bool,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse_args_default_or_exit()
    }

    /// Reject option combinations that make no sense together
    pub fn validate(&self) -> Result<(), String> {
        if self.configure_only && self.no_configure {
            return Err("--configure-only and --no-configure are mutually exclusive".to_string());
        }
        if self.force && self.no_configure {
            return Err("--force has no effect with --no-configure".to_string());
        }
        if self.reset.is_some() && self.no_configure {
            return Err("--reset needs the configuration step".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Info.to_filter_string(), "info");
        assert_eq!(LogLevel::Debug.to_filter_string(), "debug");
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_default_values() {
        let cli = Cli::parse_args_default::<&str>(&[]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert_eq!(cli.log_level, None);
        assert!(!cli.force);
        assert!(!cli.configure_only);
        assert!(cli.period_ms.is_none());
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_forced_configure_only() {
        let cli = Cli::parse_args_default(&["--force", "--configure-only", "-l", "debug"]).unwrap();
        assert!(cli.force);
        assert!(cli.configure_only);
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn test_period_override() {
        let cli = Cli::parse_args_default(&["-p", "100"]).unwrap();
        assert_eq!(cli.period_ms, Some(100));

        let mut config = crate::config::AppConfig::default();
        config.apply_cli_overrides(&cli);
        assert_eq!(config.ranging.period_ms, 100);
    }

    #[test]
    fn test_conflicting_flags_rejected() {
        let cli = Cli::parse_args_default(&["--configure-only", "--no-configure"]).unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_reset_label() {
        let cli = Cli::parse_args_default(&["--reset", "SE3", "--configure-only"]).unwrap();
        assert_eq!(cli.reset.as_deref(), Some("SE3"));
        assert!(cli.validate().is_ok());

        let cli = Cli::parse_args_default(&["--reset", "N0", "--no-configure"]).unwrap();
        assert!(cli.validate().is_err());
    }
}
