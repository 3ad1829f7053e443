mod cli;
mod run;

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, FILE_GUARD};

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let cfg_text = std::fs::read_to_string(&args.config)
        .map(Some)
        .or_else(|e| {
            // A missing file falls back to defaults; anything else is fatal.
            if e.kind() == std::io::ErrorKind::NotFound {
                Ok(None)
            } else {
                Err(e)
            }
        })
        .wrap_err_with(|| format!("reading config {}", args.config.display()))?;
    let cfg = match &cfg_text {
        Some(text) => latte_config::load_toml(text)
            .wrap_err_with(|| format!("parsing config {}", args.config.display()))?,
        None => latte_config::Config::default(),
    };
    cfg.validate().wrap_err("validating config")?;

    init_tracing(&args, &cfg.logging);
    if cfg_text.is_none() {
        tracing::warn!(path = %args.config.display(), "config not found, using defaults");
    }

    let config_path = args.config.clone();
    match args.cmd {
        Commands::Run {
            sim,
            cycles,
            brew_log,
        } => run::run(&cfg, sim, cycles, brew_log),
        Commands::Check => check(&config_path, &cfg),
    }
}

fn init_tracing(args: &Cli, logging: &latte_config::Logging) {
    let level = logging.level.as_deref().unwrap_or(&args.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Some(file) = &logging.file {
        let path = std::path::Path::new(file);
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let name = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("latte.log"));
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false);
        if args.json {
            builder.json().init();
        } else {
            builder.init();
        }
    } else {
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        if args.json {
            builder.json().init();
        } else {
            builder.init();
        }
    }
}

fn check(path: &std::path::Path, cfg: &latte_config::Config) -> Result<()> {
    println!("config {} is valid", path.display());
    println!(
        "  link:     {} @ {} baud (timeout {} ms, {} retries)",
        cfg.link.port, cfg.link.baud, cfg.link.read_timeout_ms, cfg.link.retries
    );
    println!(
        "  temps:    brew {:.1} °C / hot {:.1} °C / steam {:.1} °C",
        cfg.temps.brew, cfg.temps.hot, cfg.temps.steam
    );
    println!(
        "  pid:      kp {} ki {} kd {} (dwell {} ms)",
        cfg.pid.kp, cfg.pid.ki, cfg.pid.kd, cfg.pid.dwell_ms
    );
    println!(
        "  autobrew: preinfuse {:.0} pwr for {:.1} s, soak {:.1} s, yield {:.1} g / {:.2} oz (timeout {:.0} s)",
        cfg.autobrew.preinfuse_pwr,
        cfg.autobrew.preinfuse_on_s,
        cfg.autobrew.preinfuse_off_s,
        cfg.autobrew.yield_g,
        latte_core::units::g_to_oz(cfg.autobrew.yield_g),
        cfg.autobrew.timeout_s
    );
    Ok(())
}
