//! Runtime configuration structs for the machine.
//!
//! These are the types the control loop consumes. They are separate from
//! the TOML-deserialized schema in `latte_config`; see `conversions` for
//! the bridging `From` impls.

use latte_traits::Bounds;

use crate::pid::PidGains;

/// Boiler setpoints per dial mode (°C).
#[derive(Debug, Clone, Copy)]
pub struct TempsCfg {
    pub brew: f32,
    pub hot: f32,
    pub steam: f32,
}

impl Default for TempsCfg {
    fn default() -> Self {
        Self {
            brew: 95.0,
            hot: 100.0,
            steam: 140.0,
        }
    }
}

/// Boiler controller tuning.
#[derive(Debug, Clone, Copy)]
pub struct BoilerCfg {
    pub gains: PidGains,
    /// Anti-windup clamp on the integral sum.
    pub windup: Bounds,
    /// Minimum interval between controller ticks (ms).
    pub dwell_ms: u64,
    /// |temp - setpoint| tolerance for the ready indicator (°C).
    pub ready_tol_c: f32,
}

impl Default for BoilerCfg {
    fn default() -> Self {
        Self {
            gains: PidGains::new(0.3, 0.005, 0.025),
            windup: Bounds::new(0.0, 300.0),
            dwell_ms: 1000,
            ready_tol_c: 2.5,
        }
    }
}

/// Stage lengths and targets for the automated brew routine.
#[derive(Debug, Clone, Copy)]
pub struct AutoBrewCfg {
    /// Pump power the preinfuse ramp ends at (60..=127).
    pub preinfuse_pwr: f32,
    pub preinfuse_on_s: f32,
    pub preinfuse_off_s: f32,
    pub ramp_s: f32,
    /// Target liquid mass in the cup (g).
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
