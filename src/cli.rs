//! Command-line interface parsing for the endpoint-cache binary
//!
//! This module handles parsing of CLI arguments using clap and validates them
//! into a [`StartupConfig`] before any network activity happens.

use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::cache::{CacheConfig, ScheduleError, SchedulePolicy};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The header argument is not in `Name: value` form
    #[error("Invalid header: '{0}'. Expected 'Name: value'")]
    InvalidHeader(String),

    /// A duration flag that must be positive was zero
    #[error("--{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The schedule expression cannot be resolved
    #[error("Invalid schedule '{expr}': {source}")]
    InvalidSchedule {
        expr: String,
        #[source]
        source: ScheduleError,
    },
}

/// Endpoint cache - keep cached copies of HTTP endpoints fresh and print them
#[derive(Parser, Debug)]
#[command(name = "endpoint-cache")]
#[command(about = "Keep cached copies of HTTP endpoints fresh and print them")]
#[command(version)]
pub struct Cli {
    /// Base URL of the API, e.g. https://api.example.com
    #[arg(long, value_name = "URL")]
    pub base_url: String,

    /// Endpoint path to cache; may be given more than once
    #[arg(long = "path", value_name = "PATH", required = true)]
    pub paths: Vec<String>,

    /// Update schedule for every path
    ///
    /// Examples:
    ///   --schedule "@every 30s"    # fixed interval
    ///   --schedule "*/5 * * * *"   # cron, every five minutes
    ///   --schedule "@hourly"
    #[arg(long, default_value = "@every 30s")]
    pub schedule: String,

    /// How long fetched data is considered fresh
    #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
    pub expiration: Duration,

    /// How often to print the cached values
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    pub poll: Duration,

    /// Timeout for each HTTP request
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Extra request header in `Name: value` form; may be given more than once
    #[arg(long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Do not fetch on startup; wait for the first scheduled update
    #[arg(long)]
    pub skip_initial_fetch: bool,

    /// Exit after printing this many times
    #[arg(long, value_name = "N")]
    pub count: Option<u32>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    /// One cache registration per `--path`
    pub endpoints: Vec<CacheConfig>,
    pub poll: Duration,
    pub count: Option<u32>,
}

/// Parses a `Name: value` header argument.
///
/// # Returns
/// * `Ok((name, value))` with surrounding whitespace trimmed
/// * `Err(CliError::InvalidHeader)` if there is no colon or the name is empty
pub fn parse_header_arg(s: &str) -> Result<(String, String), CliError> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| CliError::InvalidHeader(s.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidHeader(s.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with one endpoint registration per path
    /// * `Err(CliError)` if a header, the schedule or the poll interval is invalid
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        SchedulePolicy::resolve(&cli.schedule).map_err(|source| CliError::InvalidSchedule {
            expr: cli.schedule.clone(),
            source,
        })?;

        if cli.poll.is_zero() {
            return Err(CliError::ZeroDuration("poll"));
        }

        let headers = cli
            .headers
            .iter()
            .map(|header| parse_header_arg(header))
            .collect::<Result<Vec<_>, _>>()?;

        let endpoints = cli
            .paths
            .iter()
            .map(|path| {
                let config = CacheConfig::new(path.clone(), cli.schedule.clone(), cli.expiration);
                if cli.skip_initial_fetch {
                    config.skip_initial_fetch()
                } else {
                    config
                }
            })
            .collect();

        Ok(StartupConfig {
            base_url: cli.base_url.clone(),
            timeout: cli.timeout,
            headers,
            endpoints,
            poll: cli.poll,
            count: cli.count,
        })
    }
}
