//! Serial link to the boiler controller firmware.
//!
//! Layers, bottom up:
//! - [`frame`]: wire format and message ids shared with the firmware.
//! - [`transport`]: framed request/response exchanges with per-message
//!   dwell times, duplicate-send suppression, timeouts, and retries.
//! - [`devices`]: typed proxies (sensors, actuators, panel inputs), one
//!   [`transport::Messenger`] each.
//! - [`sim`]: a deterministic firmware model for development and tests.
//! - [`hw`] (feature `hardware`): rppal UART backend and GPIO reset.

pub mod devices;
pub mod error;
pub mod frame;
#[cfg(feature = "hardware")]
pub mod hw;
pub mod sim;
pub mod transport;

pub use error::LinkError;
pub use transport::{LinkCfg, Messenger, SerialLink, Transport};
