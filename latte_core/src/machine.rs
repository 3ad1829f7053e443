//! Top-level machine state machine and run loop.
//!
//! Each cycle: gate on AC power, fold in the dial and pump switch, tick
//! the boiler PID, then arbitrate the pump and solenoid from the current
//! mode. The pump lock interlock wins over everything: a mode change with
//! the switch held forces the pump off until the switch is released, so a
//! stale switch can never start an unintended brew.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::WrapErr;
use latte_traits::clock::{Clock, MonotonicClock};
use latte_traits::{HwResult, Indicators, Readable, Writable};

use crate::autobrew::AutoBrewScheduler;
use crate::brewlog::BrewLogger;
use crate::config::TempsCfg;
use crate::error::{BuildError, Result};
use crate::fault::{is_device_fault, map_link_error};
use crate::pid::Pid;

pub const POWER_LED: u8 = 0;
pub const READY_LED: u8 = 1;
pub const BREW_LED: u8 = 2;

const PUMP_FULL: f32 = 127.0;

type BoolIn = Box<dyn Readable<bool> + Send>;
type DialIn = Box<dyn Readable<u8> + Send>;
type PumpOut = Box<dyn Writable<f32> + Send>;
type ValveOut = Box<dyn Writable<bool> + Send>;
type LedBank = Box<dyn Indicators + Send>;

/// Dial-selected operating mode while powered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineMode {
    Steam,
    Hot,
    Manual,
    Auto,
}

impl MachineMode {
    /// Low two bits of the dial byte select the mode.
    pub fn from_dial(pos: u8) -> Self {
        match pos & 0x03 {
            0 => MachineMode::Steam,
            1 => MachineMode::Hot,
            2 => MachineMode::Manual,
            _ => MachineMode::Auto,
        }
    }
}

fn setpoint_for(temps: &TempsCfg, mode: MachineMode) -> f32 {
    match mode {
        MachineMode::Steam => temps.steam,
        MachineMode::Hot => temps.hot,
        MachineMode::Manual | MachineMode::Auto => temps.brew,
    }
}

/// Map a device-boundary result into the typed error space with context.
fn dev<T>(r: HwResult<T>, what: &'static str) -> Result<T> {
    r.map_err(|e| eyre::Report::new(map_link_error(&*e)))
        .wrap_err(what)
}

pub struct Machine {
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,

    ac: BoolIn,
    dial: DialIn,
    pump_switch: BoolIn,
    pump: PumpOut,
    solenoid: ValveOut,
    leds: LedBank,

    boiler: Pid,
    scheduler: AutoBrewScheduler,

    temps: TempsCfg,
    ready_tol_c: f32,
    cycle_ms: u64,

    // None until the first dial read (and again after a power cycle), so
    // the first cycle always initializes the setpoint.
    mode: Option<MachineMode>,
    pump_switch_on: bool,
    pump_lock: bool,
    brewing: bool,

    brewlog: Option<BrewLogger>,
    brewlog_dir: PathBuf,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("mode", &self.mode)
            .field("pump_switch_on", &self.pump_switch_on)
            .field("pump_lock", &self.pump_lock)
            .field("brewing", &self.brewing)
            .finish_non_exhaustive()
    }
}

impl Machine {
    pub fn builder() -> MachineBuilder {
        MachineBuilder::default()
    }

    pub fn mode(&self) -> Option<MachineMode> {
        self.mode
    }

    pub fn pump_locked(&self) -> bool {
        self.pump_lock
    }

    fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    /// One pass of the control loop.
    pub fn cycle(&mut self) -> Result<()> {
        if !dev(self.ac.read(), "reading ac power sense")? {
            return self.powered_down_recover();
        }

        self.update_mode()?;

        self.boiler.tick()?;
        dev(self.leds.set(POWER_LED, true), "setting power led")?;
        let ready = self.boiler.at_setpoint(self.ready_tol_c);
        dev(self.leds.set(READY_LED, ready), "setting ready led")?;

        self.update_pump()
    }

    /// Fold in the panel inputs: dial edge -> setpoint (and scheduler reset
    /// when entering Auto), switch release -> scheduler reset, and the pump
    /// lock recurrence.
    fn update_mode(&mut self) -> Result<()> {
        let pos = dev(self.dial.read(), "reading mode dial")?;
        let new_mode = MachineMode::from_dial(pos);
        let mode_changed = self.mode != Some(new_mode);
        let pressed = dev(self.pump_switch.read(), "reading pump switch")?;
        let released = self.pump_switch_on && !pressed;

        self.pump_lock = pressed && (mode_changed || self.pump_lock);

        if mode_changed {
            self.mode = Some(new_mode);
            let sp = setpoint_for(&self.temps, new_mode);
            self.boiler.set_setpoint(sp);
            tracing::info!(mode = ?new_mode, setpoint_c = sp, "mode changed");
            if new_mode == MachineMode::Auto {
                self.scheduler.reset();
            }
            if self.brewing {
                self.finish_session("mode changed");
            }
        }

        if released && !self.pump_lock {
            self.scheduler.reset();
            if self.brewing {
                self.finish_session("pump switch released");
            }
        }
        self.pump_switch_on = pressed;
        Ok(())
    }

    /// Per-cycle pump/solenoid arbitration. The pump lock takes precedence
    /// over every mode.
    fn update_pump(&mut self) -> Result<()> {
        if self.pump_lock {
            dev(self.solenoid.write(false), "closing solenoid")?;
            dev(self.pump.write(0.0), "stopping pump")?;
            return Ok(());
        }

        let mode = self.mode.unwrap_or(MachineMode::Manual);
        match (mode, self.pump_switch_on) {
            (MachineMode::Manual, true) => {
                dev(self.solenoid.write(true), "opening solenoid")?;
                dev(self.pump.write(PUMP_FULL), "driving pump")?;
            }
            (MachineMode::Hot, true) => {
                dev(self.solenoid.write(false), "closing solenoid")?;
                dev(self.pump.write(PUMP_FULL), "driving pump")?;
            }
            (MachineMode::Auto, true) => {
                let t = self.scheduler.tick(self.now_ms());
                if !t.finished {
                    if !self.brewing {
                        self.brewing = true;
                        tracing::info!("auto brew started");
                        dev(self.leds.set(BREW_LED, true), "setting brew led")?;
                    }
                    dev(self.solenoid.write(true), "opening solenoid")?;
                    if t.changed {
                        let applied = dev(self.pump.write(t.value), "driving pump")?;
                        tracing::debug!(requested = t.value, applied, "autobrew pump update");
                    }
                    if let Some(log) = self.brewlog.as_mut() {
                        log.log();
                    }
                } else {
                    dev(self.pump.write(0.0), "stopping pump")?;
                    dev(self.solenoid.write(false), "closing solenoid")?;
                    if self.brewing {
                        self.finish_session("brew complete");
                    }
                }
            }
            _ => {
                dev(self.solenoid.write(false), "closing solenoid")?;
                dev(self.pump.write(0.0), "stopping pump")?;
            }
        }
        Ok(())
    }

    /// AC is gone: force the safe state and poll (with a liveness query
    /// every iteration) until it returns, then reset the controllers.
    fn powered_down_recover(&mut self) -> Result<()> {
        tracing::info!("ac power lost; machine off");
        if self.brewing {
            self.finish_session("power lost");
        }
        self.safe_state();

        loop {
            if dev(self.ac.read(), "polling ac power sense")? {
                break;
            }
            self.clock.sleep(Duration::from_millis(self.cycle_ms));
        }

        self.boiler.reset();
        self.scheduler.reset();
        self.pump_lock = true;
        self.mode = None;
        dev(self.leds.set(POWER_LED, true), "setting power led")?;
        tracing::info!("ac power restored");
        Ok(())
    }

    /// End the active brew session and write its log, best effort.
    fn finish_session(&mut self, reason: &str) {
        self.brewing = false;
        tracing::info!(reason, "auto brew session ended");
        if let Err(e) = self.leds.set(BREW_LED, false) {
            tracing::warn!(error = %e, "failed to clear brew led");
        }
        if let Some(log) = self.brewlog.as_mut() {
            if let Err(e) = log.finish(&self.brewlog_dir) {
                tracing::warn!(error = %e, "failed to write brew log");
            }
        }
    }

    /// Force every actuator off. Best effort: failures are logged, not
    /// propagated, since this runs on failure paths.
    pub fn safe_state(&mut self) {
        if let Err(e) = self.boiler.force_output(0.0) {
            tracing::warn!(error = %e, "failed to force heater off");
        }
        if let Err(e) = self.solenoid.write_forced(false) {
            tracing::warn!(error = %e, "failed to close solenoid");
        }
        if let Err(e) = self.pump.write_forced(0.0) {
            tracing::warn!(error = %e, "failed to stop pump");
        }
        if let Err(e) = self.leds.set_all(false, false, false) {
            tracing::warn!(error = %e, "failed to clear leds");
        }
    }

    /// Run the control loop until `shutdown` latches, `max_cycles` elapse,
    /// or a fatal error. Device faults are logged and ridden out; anything
    /// else forces the safe state and propagates.
    pub fn run(&mut self, shutdown: &AtomicBool, max_cycles: Option<u64>) -> Result<()> {
        let period = Duration::from_millis(self.cycle_ms);
        let mut cycles: u64 = 0;
        tracing::info!(cycle_ms = self.cycle_ms, "machine loop started");

        while !shutdown.load(Ordering::Relaxed) {
            if let Some(max) = max_cycles
                && cycles >= max
            {
                break;
            }
            match self.cycle() {
                Ok(()) => {}
                Err(e) if is_device_fault(&e) => {
                    tracing::warn!(error = %e, "device fault; retrying next cycle");
                }
                Err(e) => {
                    tracing::error!(error = %e, "fatal cycle error; forcing safe state");
                    self.safe_state();
                    return Err(e);
                }
            }
            cycles += 1;
            self.clock.sleep(period);
        }

        if self.brewing {
            self.finish_session("shutdown");
        }
        self.safe_state();
        tracing::info!(cycles, "machine loop stopped");
        Ok(())
    }
}

/// Assembles a `Machine`, failing with a typed error for each missing
/// binding.
#[derive(Default)]
pub struct MachineBuilder {
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    ac: Option<BoolIn>,
    dial: Option<DialIn>,
    pump_switch: Option<BoolIn>,
    pump: Option<PumpOut>,
    solenoid: Option<ValveOut>,
    leds: Option<LedBank>,
    boiler: Option<Pid>,
    scheduler: Option<AutoBrewScheduler>,
    temps: TempsCfg,
    ready_tol_c: f32,
    cycle_ms: u64,
    brewlog: Option<(BrewLogger, PathBuf)>,
}

impl MachineBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_ac_sense(mut self, ac: impl Readable<bool> + Send + 'static) -> Self {
        self.ac = Some(Box::new(ac));
        self
    }

    pub fn with_dial(mut self, dial: impl Readable<u8> + Send + 'static) -> Self {
        self.dial = Some(Box::new(dial));
        self
    }

    pub fn with_pump_switch(mut self, sw: impl Readable<bool> + Send + 'static) -> Self {
        self.pump_switch = Some(Box::new(sw));
        self
    }

    pub fn with_pump(mut self, pump: impl Writable<f32> + Send + 'static) -> Self {
        self.pump = Some(Box::new(pump));
        self
    }

    pub fn with_solenoid(mut self, solenoid: impl Writable<bool> + Send + 'static) -> Self {
        self.solenoid = Some(Box::new(solenoid));
        self
    }

    pub fn with_leds(mut self, leds: impl Indicators + Send + 'static) -> Self {
        self.leds = Some(Box::new(leds));
        self
    }

    pub fn with_boiler(mut self, boiler: Pid) -> Self {
        self.boiler = Some(boiler);
        self
    }

    pub fn with_scheduler(mut self, scheduler: AutoBrewScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_temps(mut self, temps: TempsCfg) -> Self {
        self.temps = temps;
        self
    }

    pub fn with_ready_tol_c(mut self, tol: f32) -> Self {
        self.ready_tol_c = tol;
        self
    }

    pub fn with_cycle_ms(mut self, cycle_ms: u64) -> Self {
        self.cycle_ms = cycle_ms;
        self
    }

    pub fn with_brew_logger(mut self, logger: BrewLogger, dir: PathBuf) -> Self {
        self.brewlog = Some((logger, dir));
        self
    }

    pub fn build(self) -> Result<Machine> {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let ac = self
            .ac
            .ok_or_else(|| eyre::Report::new(BuildError::MissingAcSense))?;
        let dial = self
            .dial
            .ok_or_else(|| eyre::Report::new(BuildError::MissingDial))?;
        let pump_switch = self
            .pump_switch
            .ok_or_else(|| eyre::Report::new(BuildError::MissingPumpSwitch))?;
        let pump = self
            .pump
            .ok_or_else(|| eyre::Report::new(BuildError::MissingPump))?;
        let solenoid = self
            .solenoid
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSolenoid))?;
        let leds = self
            .leds
            .ok_or_else(|| eyre::Report::new(BuildError::MissingIndicators))?;
        let boiler = self
            .boiler
            .ok_or_else(|| eyre::Report::new(BuildError::MissingBoiler))?;
        let scheduler = self
            .scheduler
            .ok_or_else(|| eyre::Report::new(BuildError::MissingScheduler))?;

        let ready_tol_c = if self.ready_tol_c > 0.0 {
            self.ready_tol_c
        } else {
            2.5
        };
        let cycle_ms = if self.cycle_ms > 0 { self.cycle_ms } else { 10 };
        let (brewlog, brewlog_dir) = match self.brewlog {
            Some((log, dir)) => (Some(log), dir),
            None => (None, PathBuf::from(".")),
        };

        let epoch = clock.now();
        Ok(Machine {
            clock,
            epoch,
            ac,
            dial,
            pump_switch,
            pump,
            solenoid,
            leds,
            boiler,
            scheduler,
            temps: self.temps,
            ready_tol_c,
            cycle_ms,
            mode: None,
            pump_switch_on: false,
            // Start locked so a switch left on cannot brew at power-up.
            pump_lock: true,
            brewing: false,
            brewlog,
            brewlog_dir,
        })
    }
}
