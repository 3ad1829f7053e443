//! Machine assembly: wire the link, device proxies, controllers, and the
//! brew logger into a running `Machine`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use eyre::{Result, WrapErr};

use latte_config::Config;
use latte_core::autobrew::standard_routine;
use latte_core::config::{AutoBrewCfg, BoilerCfg, TempsCfg};
use latte_core::pid::Pid;
use latte_core::{BrewLogger, Machine};
use latte_link::devices::{
    AcSensor, Heater, Leds, ModeDial, PressureSensor, Pump, PumpSwitch, ScaleSensor, Solenoid,
    TempSensor,
};
use latte_link::sim::SimulatedController;
use latte_link::transport::{LinkCfg, SerialLink, Transport};
use latte_traits::Readable;

pub fn run(cfg: &Config, sim: bool, cycles: Option<u64>, brew_log: Option<PathBuf>) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            tracing::info!("shutdown requested");
            flag.store(true, Ordering::Relaxed);
        })
        .wrap_err("installing ctrl-c handler")?;
    }

    if sim {
        let link = SimulatedController::new();
        let mut machine = assemble(link, cfg, brew_log)?;
        return machine.run(&shutdown, cycles);
    }
    run_hardware(cfg, cycles, brew_log, &shutdown)
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn run_hardware(
    cfg: &Config,
    cycles: Option<u64>,
    brew_log: Option<PathBuf>,
    shutdown: &std::sync::atomic::AtomicBool,
) -> Result<()> {
    if let Some(pin) = cfg.link.reset_pin {
        latte_link::hw::reset_controller(pin).wrap_err("resetting controller")?;
    }
    let link = latte_link::hw::UartLink::open(&cfg.link.port, cfg.link.baud)
        .wrap_err_with(|| format!("opening serial port {}", cfg.link.port))?;
    let mut machine = assemble(link, cfg, brew_log)?;
    machine.run(shutdown, cycles)
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn run_hardware(
    _cfg: &Config,
    _cycles: Option<u64>,
    _brew_log: Option<PathBuf>,
    _shutdown: &std::sync::atomic::AtomicBool,
) -> Result<()> {
    eyre::bail!("built without hardware support; rerun with --sim")
}

fn assemble<L: SerialLink + Send + 'static>(
    link: L,
    cfg: &Config,
    brew_log: Option<PathBuf>,
) -> Result<Machine> {
    let link_cfg = LinkCfg {
        read_timeout_ms: cfg.link.read_timeout_ms,
        retries: cfg.link.retries,
        retry_backoff_ms: cfg.link.retry_backoff_ms,
    };
    let tp = Arc::new(Mutex::new(Transport::new(link, link_cfg)));

    // Shared sensors: the scale feeds the autobrew tare/trigger and the
    // brew log; the temperature sensor feeds the PID and the brew log.
    let temp = Arc::new(Mutex::new(TempSensor::new(Arc::clone(&tp))));
    let pressure = Arc::new(Mutex::new(PressureSensor::new(Arc::clone(&tp))));
    let scale = Arc::new(Mutex::new(ScaleSensor::new(Arc::clone(&tp))));

    let boiler_cfg = BoilerCfg::from(&cfg.pid);
    let mut boiler = Pid::new(boiler_cfg.gains)
        .with_windup_bounds(boiler_cfg.windup)
        .with_dwell_ms(boiler_cfg.dwell_ms);
    boiler.attach_sensor(Box::new(Arc::clone(&temp)));
    boiler.attach_output(Box::new(Heater::new(Arc::clone(&tp))));

    let ab_cfg = AutoBrewCfg::from(&cfg.autobrew);
    let tare_scale = Arc::clone(&scale);
    let trigger_scale = Arc::clone(&scale);
    let yield_g = ab_cfg.yield_g;
    let scheduler = standard_routine(
        &ab_cfg,
        move || {
            if let Ok(mut s) = tare_scale.lock()
                && let Err(e) = s.tare()
            {
                tracing::warn!(error = %e, "scale tare failed");
            }
        },
        move || {
            trigger_scale
                .lock()
                .ok()
                .and_then(|mut s| s.read().ok())
                .map(|g| g >= yield_g)
                .unwrap_or(false)
        },
    );

    let mut brewlog = BrewLogger::new(cfg.brewlog.sample_ms);
    brewlog.add_source("temp_c", poll_source(Arc::clone(&temp)));
    brewlog.add_source("pressure_bar", poll_source(Arc::clone(&pressure)));
    brewlog.add_source("weight_g", poll_source(Arc::clone(&scale)));
    let brewlog_dir = brew_log.unwrap_or_else(|| PathBuf::from(&cfg.brewlog.dir));

    Machine::builder()
        .with_ac_sense(AcSensor::new(Arc::clone(&tp)))
        .with_dial(ModeDial::new(Arc::clone(&tp)))
        .with_pump_switch(PumpSwitch::new(Arc::clone(&tp)))
        .with_pump(Pump::new(Arc::clone(&tp)))
        .with_solenoid(Solenoid::new(Arc::clone(&tp)))
        .with_leds(Leds::new(Arc::clone(&tp)))
        .with_boiler(boiler)
        .with_scheduler(scheduler)
        .with_temps(TempsCfg::from(&cfg.temps))
        .with_ready_tol_c(boiler_cfg.ready_tol_c)
        .with_cycle_ms(cfg.machine.cycle_ms)
        .with_brew_logger(brewlog, brewlog_dir)
        .build()
}

/// Brew log source polling a shared sensor; read failures log as NaN
/// rather than aborting the session.
fn poll_source<S>(sensor: Arc<Mutex<S>>) -> impl FnMut() -> f32 + Send + 'static
where
    S: Readable<f32> + Send + 'static,
{
    let mut shared = sensor;
    move || shared.read().unwrap_or(f32::NAN)
}
