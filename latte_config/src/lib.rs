#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the espresso machine host.
//!
//! Deserialized from TOML and validated before anything touches the link.
//! All durations are milliseconds unless the key says otherwise; brew
//! stage lengths are seconds because that is how people think about
//! shots.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LinkCfg {
    /// Serial device path.
    pub port: String,
    pub baud: u32,
    /// Max blocking wait per protocol read (ms).
    pub read_timeout_ms: u64,
    /// Retries after a timed-out exchange.
    pub retries: u32,
    /// Sleep between retry attempts (ms).
    pub retry_backoff_ms: u64,
    /// GPIO pin wired to the controller's RUN line; reset is skipped when
    /// absent.
    pub reset_pin: Option<u8>,
}

impl Default for LinkCfg {
    fn default() -> Self {
        Self {
            port: "/dev/ttyS0".into(),
            baud: 115_200,
            read_timeout_ms: 50,
            retries: 3,
            retry_backoff_ms: 10,
            reset_pin: None,
        }
    }
}

/// Boiler setpoints per dial mode (°C).
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Temps {
    pub brew: f32,
    pub hot: f32,
    pub steam: f32,
}

impl Default for Temps {
    fn default() -> Self {
        Self {
            brew: 95.0,
            hot: 100.0,
            steam: 140.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Anti-windup clamp on the integral sum.
    pub windup_lo: f32,
    pub windup_hi: f32,
    /// Minimum interval between controller ticks (ms).
    pub dwell_ms: u64,
    /// |temp - setpoint| tolerance for the ready indicator (°C).
    pub ready_tol_c: f32,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 0.3,
            ki: 0.005,
            kd: 0.025,
            windup_lo: 0.0,
            windup_hi: 300.0,
            dwell_ms: 1000,
            ready_tol_c: 2.5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AutoBrewCfg {
    /// Pump power the preinfuse ramp ends at (60..=127).
    pub preinfuse_pwr: f32,
    pub preinfuse_on_s: f32,
    pub preinfuse_off_s: f32,
    /// Main ramp up to full power (s).
    pub ramp_s: f32,
    /// Stop once this much liquid is in the cup (g).
    pub yield_g: f32,
    /// Safety timeout on the triggered stage (s).
    pub timeout_s: f32,
}

impl Default for AutoBrewCfg {
    fn default() -> Self {
        Self {
            preinfuse_pwr: 80.0,
            preinfuse_on_s: 4.0,
            preinfuse_off_s: 4.0,
            ramp_s: 1.0,
            yield_g: 30.0,
            timeout_s: 60.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MachineCfg {
    /// Run-loop period (ms).
    pub cycle_ms: u64,
}

impl Default for MachineCfg {
    fn default() -> Self {
        Self { cycle_ms: 10 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrewLogCfg {
    /// Sample period for brew session rows (ms).
    pub sample_ms: u64,
    /// Directory brewlog CSVs are written to.
    pub dir: String,
}

impl Default for BrewLogCfg {
    fn default() -> Self {
        Self {
            sample_ms: 50,
            dir: ".".into(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub link: LinkCfg,
    pub temps: Temps,
    pub pid: PidCfg,
    pub autobrew: AutoBrewCfg,
    pub machine: MachineCfg,
    pub brewlog: BrewLogCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Link
        if self.link.port.is_empty() {
            eyre::bail!("link.port must not be empty");
        }
        if self.link.baud == 0 {
            eyre::bail!("link.baud must be > 0");
        }
        if self.link.read_timeout_ms == 0 {
            eyre::bail!("link.read_timeout_ms must be >= 1");
        }

        // Temps: a cold or boiling-dry setpoint is a config typo.
        for (name, t) in [
            ("temps.brew", self.temps.brew),
            ("temps.hot", self.temps.hot),
            ("temps.steam", self.temps.steam),
        ] {
            if !t.is_finite() || !(20.0..=160.0).contains(&t) {
                eyre::bail!("{name} must be in [20, 160] °C");
            }
        }

        // PID
        for (name, g) in [
            ("pid.kp", self.pid.kp),
            ("pid.ki", self.pid.ki),
            ("pid.kd", self.pid.kd),
        ] {
            if !g.is_finite() || g < 0.0 {
                eyre::bail!("{name} must be finite and >= 0");
            }
        }
        if self.pid.windup_lo >= self.pid.windup_hi {
            eyre::bail!("pid.windup_lo must be below pid.windup_hi");
        }
        if self.pid.dwell_ms == 0 {
            eyre::bail!("pid.dwell_ms must be >= 1");
        }
        if !(self.pid.ready_tol_c > 0.0) {
            eyre::bail!("pid.ready_tol_c must be > 0");
        }

        // AutoBrew
        if !(60.0..=127.0).contains(&self.autobrew.preinfuse_pwr) {
            eyre::bail!("autobrew.preinfuse_pwr must be in [60, 127]");
        }
        for (name, s) in [
            ("autobrew.preinfuse_on_s", self.autobrew.preinfuse_on_s),
            ("autobrew.preinfuse_off_s", self.autobrew.preinfuse_off_s),
            ("autobrew.ramp_s", self.autobrew.ramp_s),
        ] {
            if !s.is_finite() || s < 0.0 {
                eyre::bail!("{name} must be finite and >= 0");
            }
        }
        if !(self.autobrew.yield_g > 0.0) {
            eyre::bail!("autobrew.yield_g must be > 0");
        }
        if !(self.autobrew.timeout_s > 0.0) {
            eyre::bail!("autobrew.timeout_s must be > 0");
        }

        // Machine
        if self.machine.cycle_ms == 0 {
            eyre::bail!("machine.cycle_ms must be >= 1");
        }

        // Brewlog
        if self.brewlog.sample_ms == 0 {
            eyre::bail!("brewlog.sample_ms must be >= 1");
        }
        if self.brewlog.dir.is_empty() {
            eyre::bail!("brewlog.dir must not be empty");
        }

        Ok(())
    }
}
