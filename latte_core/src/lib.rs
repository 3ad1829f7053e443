#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Espresso machine control logic (hardware-agnostic).
//!
//! All hardware interactions go through the `latte_traits` capability
//! interfaces (`Readable<T>`, `Writable<T>`, `Indicators`), so this crate
//! never touches the serial link directly.
//!
//! ## Architecture
//!
//! - **PID**: boiler temperature controller with anti-windup integral
//!   clamping and a sliding-window derivative (`pid` module)
//! - **AutoBrew**: the staged brew routine scheduler (`autobrew` module)
//! - **Machine**: mode/interlock state machine and run loop (`machine`
//!   module)
//! - **BrewLog**: per-session CSV sampling (`brewlog` module)
//! - **Config**: runtime structs plus `From` bridges to the TOML schema
//!   (`config`/`conversions` modules)

pub mod autobrew;
pub mod brewlog;
pub mod config;
pub mod conversions;
pub mod error;
pub mod fault;
pub mod machine;
pub mod mocks;
pub mod pid;
pub mod units;

pub use autobrew::{standard_routine, AutoBrewScheduler, Leg, LegTick};
pub use brewlog::BrewLogger;
pub use config::{AutoBrewCfg, BoilerCfg, TempsCfg};
pub use error::{BuildError, MachineError, Result};
pub use machine::{Machine, MachineBuilder, MachineMode};
pub use pid::{DiscreteDerivative, DiscreteIntegral, Pid, PidGains};
