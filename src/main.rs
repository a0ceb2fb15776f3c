pub mod models {
    pub mod forecast;
    pub mod openweather;
    pub mod report;
    pub mod telemetry;
}

pub mod client;
pub mod config;
pub mod error;
pub mod utils;
pub mod services {
    pub mod accuracy;
    pub mod battery_life;
    pub mod cycle;
    pub mod forecast;
    pub mod solar;
    pub mod synthetic_weather;
    pub mod trend;
    pub mod weather;
}
pub mod store {
    pub mod append_log;
    pub mod nodes;
    pub mod report;
    pub mod telemetry;
}

use crate::client::OpenWeatherClient;
use crate::config::Config;
use crate::error::AppError;
use crate::services::cycle::ForecastCycle;
use crate::services::weather::WeatherProvider;
use chrono::Utc;
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Continuous collection loop.
    Run,
    /// A single cycle, then exit.
    Once,
}

#[derive(Debug, PartialEq)]
struct Cli {
    command: Command,
    interval: Option<Duration>,
    env_file: Option<PathBuf>,
}

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

fn run(cli: &Cli) -> Result<(), AppError> {
    // 1) Load config
    let mut cfg = Config::from_env()?;
    if let Some(interval) = cli.interval {
        cfg.polling_interval = interval;
    }
    info!(
        "Config loaded (interval={}s, monitored_nodes={}, telemetry={}, nodes={}, max_history={}, default_location={}, weather={})",
        cfg.polling_interval.as_secs(),
        if cfg.monitored_nodes.is_empty() {
            "all".to_string()
        } else {
            cfg.monitored_nodes.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(",")
        },
        cfg.telemetry_csv.display(),
        cfg.nodes_csv.display(),
        cfg.max_history_records,
        cfg.default_location
            .map(|l| format!("{:.4},{:.4}", l.latitude, l.longitude))
            .unwrap_or_else(|| "-".to_string()),
        if cfg.weather.api_key.is_some() { "openweathermap" } else { "synthetic" }
    );
    if cfg.default_location.is_some_and(|l| !l.is_valid()) {
        warn!("DEFAULT_LATITUDE/DEFAULT_LONGITUDE out of range; nodes without GPS get no solar forecast");
    }

    // 2) Weather source
    let weather = WeatherProvider::new(OpenWeatherClient::from_config(&cfg.weather));
    if !weather.is_live() {
        info!("WEATHER_API_KEY not set; forecasts use synthetic weather");
    }

    // 3) Cycle(s)
    let interval = cfg.polling_interval;
    let cycle = ForecastCycle::new(cfg, weather);
    match cli.command {
        Command::Once => {
            cycle.run_once(Utc::now())?;
        }
        Command::Run => {
            info!("Starting forecast loop: interval={}s", interval.as_secs());
            cycle.run_loop(interval);
        }
    }

    Ok(())
}

fn parse_cli<I>(args: I) -> Result<Cli, String>
where
    I: IntoIterator<Item = std::ffi::OsString>,
{
    let mut args = args.into_iter();
    let mut command: Option<Command> = None;
    let mut interval: Option<Duration> = None;
    let mut env_file: Option<PathBuf> = None;

    let parse_interval = |raw: &str| -> Result<Duration, String> {
        match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(format!("`--interval` expects a positive number of seconds, got {:?}", raw)),
        }
    };

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            Some("--interval") => {
                let value = args
                    .next()
                    .ok_or_else(|| "`--interval` requires a number of seconds".to_string())?;
                let raw = value.to_str().ok_or_else(|| "argument contains invalid UTF-8".to_string())?;
                interval = Some(parse_interval(raw)?);
            }
            Some(s) if s.starts_with("--interval=") => {
                interval = Some(parse_interval(&s["--interval=".len()..])?);
            }
            Some(cmd @ ("run" | "once")) => {
                if command.is_some() {
                    return Err(format!("unexpected extra command: {}", cmd));
                }
                command = Some(if cmd == "run" { Command::Run } else { Command::Once });
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    Ok(Cli {
        command: command.unwrap_or(Command::Run),
        interval,
        env_file,
    })
}

fn configure_env(cli: &Cli) -> Result<Option<LoadedEnvFile>, String> {
    let (path, explicit) = match &cli.env_file {
        Some(path) => {
            if !path.is_file() {
                return Err(format!("env file not found: {}", path.display()));
            }
            (path.clone(), true)
        }
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            let default_path = cwd.join(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            (default_path, false)
        }
    };

    for (key, value) in config::read_env_file(&path).map_err(|e| e.to_string())? {
        // Preserve any value that was already supplied via the process environment.
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(Some(LoadedEnvFile { path, explicit }))
}

fn main() {
    let cli = match parse_cli(std::env::args_os().skip(1)) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            eprintln!("usage: mesh-battery-forecast [run|once] [--interval SECS] [--env-file PATH]");
            std::process::exit(1);
        }
    };
    let loaded_env = match configure_env(&cli) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG and DEBUG_MODE from .env are respected.
    let default_filter =
        env_logger::Env::default().default_filter_or(if config::debug_mode_from_env() { "debug" } else { "info" });
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "mesh-battery-forecast {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(&cli) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
