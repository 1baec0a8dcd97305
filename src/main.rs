pub mod models {
    pub mod rack;
}

pub mod config;
pub mod db {
    pub mod models;
    pub mod store;
}
pub mod runtime;
pub mod schema;
pub mod transport;
pub mod utils;
pub mod services {
    pub mod evaluator;
    pub mod overrides;
    pub mod reconcile;
    pub mod startup;
    pub mod status;
}

use crate::config::{Config, HardwareConfig};
use crate::db::store::{PgRackStore, RackStore};
use crate::runtime::RuntimeContext;
use crate::services::{reconcile, startup, status};
use crate::utils::{Clock, StopSignal, SystemClock};
use diesel::PgConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{error, info, warn};
use std::ffi::OsString;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Startup resync, then the reconciliation loop.
    Run,
    /// Pulse one relay channel for a second.
    RelayTest(u8),
    /// Print rack status as JSON.
    Status,
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    env_file: Option<PathBuf>,
    command: Command,
}

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

fn open_store(cfg: &Config) -> Result<PgRackStore, String> {
    let store = PgRackStore::connect(&cfg.database_url).map_err(|e| e.to_string())?;
    info!("Connected to database");
    let mut conn = store.connection().map_err(|e| e.to_string())?;
    apply_database_migrations(&mut conn)?;
    drop(conn);
    Ok(store)
}

fn run(command: Command) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (relay_config_file={}, tick_interval={}s, relay_settle={}ms)",
        cfg.relay_config_file.display(),
        cfg.tick_interval.as_secs(),
        cfg.relay_settle.as_millis()
    );
    let hardware = HardwareConfig::load(&cfg.relay_config_file).map_err(|e| e.to_string())?;
    info!(
        "Hardware config loaded: {} rack(s) from {}",
        hardware.racks_count,
        cfg.relay_config_file.display()
    );

    match command {
        Command::Run => run_controller(&cfg, hardware),
        Command::RelayTest(channel) => relay_test(&cfg, hardware, channel),
        Command::Status => print_status(&cfg, hardware.racks_count),
    }
}

fn run_controller(cfg: &Config, hardware: HardwareConfig) -> Result<(), String> {
    // 2) Relay transport and worker
    let ctx = RuntimeContext::from_config(cfg, hardware)
        .map_err(|e| format!("Relay transport init failed: {}", e))?;

    // 3) Storage
    let mut store = open_store(cfg)?;
    store
        .ensure_racks(ctx.racks_count())
        .map_err(|e| format!("Rack bootstrap failed: {}", e))?;

    // 4) Fail-safe startup
    let clock = SystemClock;
    startup::startup_resync(&ctx, &mut store, clock.now())
        .map_err(|e| format!("Startup resync failed: {}", e))?;
    match status::rack_statuses(&mut store, ctx.racks_count(), clock.now()) {
        Ok(statuses) => {
            for s in statuses {
                info!(
                    "Rack {}: light {} ({}), water {} ({})",
                    s.rack_id,
                    describe(s.light.on, s.light.until.as_deref(), s.light.next.as_deref()),
                    s.light.mode,
                    describe(s.water.on, s.water.until.as_deref(), s.water.next.as_deref()),
                    s.water.mode
                );
            }
        }
        Err(e) => warn!("Could not read rack status: {}", e),
    }

    // 5) Reconciliation loop
    let stop = StopSignal::new();
    reconcile::run_loop(&ctx, &mut store, &clock, &stop);
    Ok(())
}

fn describe(on: bool, until: Option<&str>, next: Option<&str>) -> String {
    match (on, until, next) {
        (true, Some(t), _) => format!("on until {}", t),
        (true, None, _) => "on".to_string(),
        (false, _, Some(n)) => format!("off, next {}", n),
        (false, _, None) => "off".to_string(),
    }
}

fn relay_test(cfg: &Config, hardware: HardwareConfig, channel: u8) -> Result<(), String> {
    transport::check_channel(channel).map_err(|e| e.to_string())?;
    let ctx = RuntimeContext::from_config(cfg, hardware)
        .map_err(|e| format!("Relay transport init failed: {}", e))?;

    info!("Relay test: channel {} on", channel);
    ctx.relays.set(channel, true).map_err(|e| format!("relay {} on: {}", channel, e))?;
    thread::sleep(Duration::from_secs(1));
    info!("Relay test: channel {} off", channel);
    ctx.relays.set(channel, false).map_err(|e| format!("relay {} off: {}", channel, e))?;
    Ok(())
}

fn print_status(cfg: &Config, racks_count: u8) -> Result<(), String> {
    let mut store = open_store(cfg)?;
    let statuses = status::rack_statuses(&mut store, racks_count, SystemClock.now()).map_err(|e| e.to_string())?;
    let out = serde_json::to_string_pretty(&statuses).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}

fn parse_args<I>(args: I) -> Result<Cli, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;
    let mut command: Option<Command> = None;

    let mut set_command = |next: Command| {
        if command.replace(next).is_some() {
            Err("only one of --relay-test, --status may be given".to_string())
        } else {
            Ok(())
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
            Some("--relay-test") => {
                let channel = next_str(&mut args, "--relay-test")?
                    .parse::<u8>()
                    .map_err(|_| "`--relay-test` requires a channel number 1..=16".to_string())?;
                set_command(Command::RelayTest(channel))?;
            }
            Some("--status") => set_command(Command::Status)?,
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    Ok(Cli {
        env_file,
        command: command.unwrap_or(Command::Run),
    })
}

fn next_str(args: &mut impl Iterator<Item = OsString>, flag: &str) -> Result<String, String> {
    args.next()
        .and_then(|v| v.into_string().ok())
        .ok_or_else(|| format!("`{}` is missing an argument", flag))
}

fn load_env(env_file: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        // Values already present in the process environment win.
        dotenvy::from_path(&path).map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            dotenvy::from_path(&default_path)
                .map_err(|e| format!("failed to load {}: {}", default_path.display(), e))?;
            Ok(Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            }))
        } else {
            Ok(None)
        }
    }
}

fn main() {
    let (cli, loaded_env) = match parse_args(std::env::args_os().skip(1))
        .and_then(|cli| load_env(cli.env_file.clone()).map(|env| (cli, env)))
    {
        Ok(v) => v,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "rack-relay {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, String> {
        parse_args(args.iter().map(OsString::from))
    }

    #[test]
    fn no_arguments_runs_the_controller() {
        assert_eq!(
            parse(&[]).unwrap(),
            Cli {
                env_file: None,
                command: Command::Run
            }
        );
    }

    #[test]
    fn env_file_in_both_forms() {
        assert_eq!(parse(&["--env-file", "a.env"]).unwrap().env_file, Some(PathBuf::from("a.env")));
        assert_eq!(parse(&["--env-file=b.env"]).unwrap().env_file, Some(PathBuf::from("b.env")));
        assert!(parse(&["--env-file="]).is_err());
        assert!(parse(&["--env-file", "a", "--env-file", "b"]).is_err());
    }

    #[test]
    fn relay_test_takes_a_channel() {
        assert_eq!(parse(&["--relay-test", "5"]).unwrap().command, Command::RelayTest(5));
        assert!(parse(&["--relay-test"]).is_err());
        assert!(parse(&["--relay-test", "x"]).is_err());
    }

    #[test]
    fn commands_are_exclusive() {
        assert!(parse(&["--status", "--relay-test", "1"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }

    #[test]
    fn describes_channel_state() {
        assert_eq!(describe(true, Some("21:30"), None), "on until 21:30");
        assert_eq!(describe(false, None, Some("Mon 08:00")), "off, next Mon 08:00");
        assert_eq!(describe(false, None, None), "off");
    }
}
