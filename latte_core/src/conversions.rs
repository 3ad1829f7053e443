//! `From` implementations bridging `latte_config` types to `latte_core`
//! types, so the CLI never maps fields by hand.

use latte_traits::Bounds;

use crate::config::{AutoBrewCfg, BoilerCfg, TempsCfg};
use crate::pid::PidGains;

// ── TempsCfg ─────────────────────────────────────────────────────────────

impl From<&latte_config::Temps> for TempsCfg {
    fn from(c: &latte_config::Temps) -> Self {
        Self {
            brew: c.brew,
            hot: c.hot,
            steam: c.steam,
        }
    }
}

// ── BoilerCfg ────────────────────────────────────────────────────────────

impl From<&latte_config::PidCfg> for BoilerCfg {
    fn from(c: &latte_config::PidCfg) -> Self {
        Self {
            gains: PidGains::new(c.kp, c.ki, c.kd),
            windup: Bounds::new(c.windup_lo, c.windup_hi),
            dwell_ms: c.dwell_ms,
            ready_tol_c: c.ready_tol_c,
        }
    }
}

// ── AutoBrewCfg ──────────────────────────────────────────────────────────

impl From<&latte_config::AutoBrewCfg> for AutoBrewCfg {
    fn from(c: &latte_config::AutoBrewCfg) -> Self {
        Self {
            preinfuse_pwr: c.preinfuse_pwr,
            preinfuse_on_s: c.preinfuse_on_s,
            preinfuse_off_s: c.preinfuse_off_s,
            ramp_s: c.ramp_s,
            yield_g: c.yield_g,
            timeout_s: c.timeout_s,
        }
    }
}
