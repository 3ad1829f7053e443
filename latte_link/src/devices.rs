//! Device proxies: one per message kind on the link.
//!
//! Each proxy owns its [`Messenger`] and shares the process-wide
//! [`Transport`] handle. Reads inside the messenger's dwell window come
//! from the cached response; writes are suppressed while the value is
//! unchanged. Raw readings are converted to physical units here so the
//! control loop only ever sees °C, bar, and grams.

use std::sync::{Arc, Mutex};

use latte_traits::{Bounds, HwError, HwResult, Indicators, Readable, Writable};

use crate::error::LinkError;
use crate::frame::{self, STATUS_OK};
use crate::transport::{Messenger, SerialLink, Transport};

pub type SharedTransport<L> = Arc<Mutex<Transport<L>>>;

/// Default minimum dwell between sensor polls (ms).
const SENSOR_DWELL_MS: u64 = 100;
/// Heater duty updates are rate-limited to protect the slow PWM (ms).
const HEATER_DWELL_MS: u64 = 50;
/// Pump updates during autobrew ramps (ms).
const PUMP_DWELL_MS: u64 = 5;

/// °C per raw count from the boiler thermocouple.
const TEMP_C_PER_COUNT: f32 = 1.0 / 16.0;
/// bar per raw count from the pressure transducer.
const PRESSURE_BAR_PER_COUNT: f32 = 1.0 / 1000.0;
/// Grams per raw count from the load cell amplifier.
const SCALE_G_PER_COUNT: f32 = 0.000_152_711;

/// Pump drive range. Below `PUMP_MIN_PWR` the vibratory pump stalls, so
/// requests in (0, 60) are pulled up to 60; zero is always allowed.
const PUMP_MIN_PWR: f32 = 60.0;
const PUMP_MAX_PWR: f32 = 127.0;
/// Heater duty byte full scale.
const HEATER_DUTY_SCALE: f32 = 63.0;

fn lock<L: SerialLink>(tp: &SharedTransport<L>) -> HwResult<std::sync::MutexGuard<'_, Transport<L>>> {
    tp.lock().map_err(|_| HwError::from("poisoned transport lock"))
}

/// Send and surface a nonzero status as a typed device fault.
fn submit<L: SerialLink>(
    tp: &SharedTransport<L>,
    msg: &mut Messenger,
    body: &[u8],
    force: bool,
) -> HwResult<()> {
    let status = lock(tp)?.send(msg, body, force)?;
    if status != STATUS_OK {
        return Err(Box::new(LinkError::DeviceFault {
            id: msg.id(),
            status,
        }));
    }
    Ok(())
}

// ── Queries ──────────────────────────────────────────────────────────────

/// Boiler temperature sensor (u16 raw, °C = raw/16).
pub struct TempSensor<L: SerialLink> {
    tp: SharedTransport<L>,
    msg: Messenger,
}

impl<L: SerialLink> TempSensor<L> {
    pub fn new(tp: SharedTransport<L>) -> Self {
        Self {
            tp,
            msg: Messenger::new(frame::MSG_ID_GET_TEMP, SENSOR_DWELL_MS, false),
        }
    }
}

impl<L: SerialLink> Readable<f32> for TempSensor<L> {
    fn read(&mut self) -> HwResult<f32> {
        submit(&self.tp, &mut self.msg, &[], false)?;
        let raw = frame::decode_u16(self.msg.id(), self.msg.response())?;
        Ok(f32::from(raw) * TEMP_C_PER_COUNT)
    }
}

/// Group-head pressure sensor (u16 raw, bar = raw/1000).
pub struct PressureSensor<L: SerialLink> {
    tp: SharedTransport<L>,
    msg: Messenger,
}

impl<L: SerialLink> PressureSensor<L> {
    pub fn new(tp: SharedTransport<L>) -> Self {
        Self {
            tp,
            msg: Messenger::new(frame::MSG_ID_GET_PRESSURE, SENSOR_DWELL_MS, false),
        }
    }
}

impl<L: SerialLink> Readable<f32> for PressureSensor<L> {
    fn read(&mut self) -> HwResult<f32> {
        submit(&self.tp, &mut self.msg, &[], false)?;
        let raw = frame::decode_u16(self.msg.id(), self.msg.response())?;
        Ok(f32::from(raw) * PRESSURE_BAR_PER_COUNT)
    }
}

/// Drip-tray scale (u24 raw counts; grams = gain * (raw - origin)).
pub struct ScaleSensor<L: SerialLink> {
    tp: SharedTransport<L>,
    msg: Messenger,
    gain_g_per_count: f32,
    origin: u32,
}

impl<L: SerialLink> ScaleSensor<L> {
    pub fn new(tp: SharedTransport<L>) -> Self {
        Self {
            tp,
            msg: Messenger::new(frame::MSG_ID_GET_WEIGHT, SENSOR_DWELL_MS, false),
            gain_g_per_count: SCALE_G_PER_COUNT,
            origin: 0,
        }
    }

    pub fn with_gain(mut self, gain_g_per_count: f32) -> Self {
        self.gain_g_per_count = gain_g_per_count;
        self
    }

    /// Re-read the raw count and make it the new zero reference.
    pub fn tare(&mut self) -> HwResult<()> {
        submit(&self.tp, &mut self.msg, &[], true)?;
        self.origin = frame::decode_u24(self.msg.id(), self.msg.response())?;
        tracing::debug!(origin = self.origin, "scale tared");
        Ok(())
    }
}

impl<L: SerialLink> Readable<f32> for ScaleSensor<L> {
    fn read(&mut self) -> HwResult<f32> {
        submit(&self.tp, &mut self.msg, &[], false)?;
        let raw = frame::decode_u24(self.msg.id(), self.msg.response())?;
        Ok(self.gain_g_per_count * (raw as f32 - self.origin as f32))
    }
}

/// Momentary pump switch (u8, nonzero = pressed).
pub struct PumpSwitch<L: SerialLink> {
    tp: SharedTransport<L>,
    msg: Messenger,
}

impl<L: SerialLink> PumpSwitch<L> {
    pub fn new(tp: SharedTransport<L>) -> Self {
        Self {
            tp,
            msg: Messenger::new(frame::MSG_ID_GET_SWITCH, SENSOR_DWELL_MS, false),
        }
    }
}

impl<L: SerialLink> Readable<bool> for PumpSwitch<L> {
    fn read(&mut self) -> HwResult<bool> {
        submit(&self.tp, &mut self.msg, &[], false)?;
        Ok(frame::decode_u8(self.msg.id(), self.msg.response())? != 0)
    }
}

/// Four-position mode dial; only the low two bits are significant.
pub struct ModeDial<L: SerialLink> {
    tp: SharedTransport<L>,
    msg: Messenger,
}

impl<L: SerialLink> ModeDial<L> {
    pub fn new(tp: SharedTransport<L>) -> Self {
        Self {
            tp,
            msg: Messenger::new(frame::MSG_ID_GET_DIAL, SENSOR_DWELL_MS, false),
        }
    }
}

impl<L: SerialLink> Readable<u8> for ModeDial<L> {
    fn read(&mut self) -> HwResult<u8> {
        submit(&self.tp, &mut self.msg, &[], false)?;
        Ok(frame::decode_u8(self.msg.id(), self.msg.response())? & 0x03)
    }
}

/// Zero-cross AC sense (u8, nonzero = mains hot).
pub struct AcSensor<L: SerialLink> {
    tp: SharedTransport<L>,
    msg: Messenger,
}

impl<L: SerialLink> AcSensor<L> {
    pub fn new(tp: SharedTransport<L>) -> Self {
        Self {
            tp,
            msg: Messenger::new(frame::MSG_ID_GET_AC_ON, SENSOR_DWELL_MS, false),
        }
    }
}

impl<L: SerialLink> Readable<bool> for AcSensor<L> {
    fn read(&mut self) -> HwResult<bool> {
        submit(&self.tp, &mut self.msg, &[], false)?;
        Ok(frame::decode_u8(self.msg.id(), self.msg.response())? != 0)
    }
}

// ── Commands ─────────────────────────────────────────────────────────────

/// Boiler heater: duty cycle 0..=1, scaled to the firmware's 0..=63 PWM
/// byte. `write` reports the clamped duty actually applied.
pub struct Heater<L: SerialLink> {
    tp: SharedTransport<L>,
    msg: Messenger,
    bounds: Bounds,
}

impl<L: SerialLink> Heater<L> {
    pub fn new(tp: SharedTransport<L>) -> Self {
        Self {
            tp,
            msg: Messenger::new(frame::MSG_ID_SET_HEATER, HEATER_DWELL_MS, true),
            bounds: Bounds::new(0.0, 1.0),
        }
    }

    fn put(&mut self, duty: f32, force: bool) -> HwResult<f32> {
        let applied = self.bounds.clip(duty);
        let byte = (applied * HEATER_DUTY_SCALE).round() as u8;
        submit(&self.tp, &mut self.msg, &frame::encode_u8(byte), force)?;
        Ok(applied)
    }

    pub fn off(&mut self) -> HwResult<()> {
        self.put(0.0, true).map(|_| ())
    }
}

impl<L: SerialLink> Writable<f32> for Heater<L> {
    fn write(&mut self, duty: f32) -> HwResult<f32> {
        self.put(duty, false)
    }

    fn write_forced(&mut self, duty: f32) -> HwResult<f32> {
        self.put(duty, true)
    }
}

/// Vibratory pump: power 0..=127 with a stall dead band below 60.
pub struct Pump<L: SerialLink> {
    tp: SharedTransport<L>,
    msg: Messenger,
}

impl<L: SerialLink> Pump<L> {
    pub fn new(tp: SharedTransport<L>) -> Self {
        Self {
            tp,
            msg: Messenger::new(frame::MSG_ID_SET_PUMP, PUMP_DWELL_MS, true),
        }
    }

    /// Requests at or below zero stop the pump; anything else lands in the
    /// drivable 60..=127 range.
    fn constrain(pwr: f32) -> f32 {
        if pwr <= 0.0 {
            0.0
        } else {
            pwr.clamp(PUMP_MIN_PWR, PUMP_MAX_PWR)
        }
    }

    fn put(&mut self, pwr: f32, force: bool) -> HwResult<f32> {
        let applied = Self::constrain(pwr);
        submit(
            &self.tp,
            &mut self.msg,
            &frame::encode_u8(applied.round() as u8),
            force,
        )?;
        Ok(applied)
    }

    pub fn on(&mut self) -> HwResult<()> {
        self.put(PUMP_MAX_PWR, true).map(|_| ())
    }

    pub fn off(&mut self) -> HwResult<()> {
        self.put(0.0, true).map(|_| ())
    }
}

impl<L: SerialLink> Writable<f32> for Pump<L> {
    fn write(&mut self, pwr: f32) -> HwResult<f32> {
        self.put(pwr, false)
    }

    fn write_forced(&mut self, pwr: f32) -> HwResult<f32> {
        self.put(pwr, true)
    }
}

/// Three-way solenoid valve; true routes the pump to the group head.
pub struct Solenoid<L: SerialLink> {
    tp: SharedTransport<L>,
    msg: Messenger,
}

impl<L: SerialLink> Solenoid<L> {
    pub fn new(tp: SharedTransport<L>) -> Self {
        Self {
            tp,
            msg: Messenger::new(frame::MSG_ID_SET_SOLENOID, 0, true),
        }
    }

    fn put(&mut self, open: bool, force: bool) -> HwResult<bool> {
        submit(
            &self.tp,
            &mut self.msg,
            &frame::encode_u8(u8::from(open)),
            force,
        )?;
        Ok(open)
    }

    pub fn open(&mut self) -> HwResult<()> {
        self.put(true, false).map(|_| ())
    }

    pub fn close(&mut self) -> HwResult<()> {
        self.put(false, false).map(|_| ())
    }
}

impl<L: SerialLink> Writable<bool> for Solenoid<L> {
    fn write(&mut self, open: bool) -> HwResult<bool> {
        self.put(open, false)
    }

    fn write_forced(&mut self, open: bool) -> HwResult<bool> {
        self.put(open, true)
    }
}

/// Front-panel LED bank (3 bits packed in one byte).
pub struct Leds<L: SerialLink> {
    tp: SharedTransport<L>,
    msg: Messenger,
    state: u8,
}

impl<L: SerialLink> Leds<L> {
    pub fn new(tp: SharedTransport<L>) -> Self {
        Self {
            tp,
            msg: Messenger::new(frame::MSG_ID_SET_LEDS, 0, true),
            state: 0,
        }
    }

    fn put(&mut self, mask: u8) -> HwResult<()> {
        submit(&self.tp, &mut self.msg, &frame::encode_u8(mask), false)?;
        self.state = mask;
        Ok(())
    }
}

impl<L: SerialLink> Indicators for Leds<L> {
    fn set(&mut self, idx: u8, on: bool) -> HwResult<()> {
        if idx > 2 {
            return Err(HwError::from("led index must be in 0..=2"));
        }
        let mask = (self.state & !(1 << idx)) | (u8::from(on) << idx);
        self.put(mask)
    }

    fn set_all(&mut self, led0: bool, led1: bool, led2: bool) -> HwResult<()> {
        self.put(u8::from(led0) | (u8::from(led1) << 1) | (u8::from(led2) << 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pump_constrain_dead_band() {
        assert_eq!(Pump::<crate::sim::SimulatedController>::constrain(-3.0), 0.0);
        assert_eq!(Pump::<crate::sim::SimulatedController>::constrain(0.0), 0.0);
        assert_eq!(Pump::<crate::sim::SimulatedController>::constrain(10.0), 60.0);
        assert_eq!(Pump::<crate::sim::SimulatedController>::constrain(90.0), 90.0);
        assert_eq!(Pump::<crate::sim::SimulatedController>::constrain(200.0), 127.0);
    }
}
