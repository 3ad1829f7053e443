//! In-memory stand-in for the boiler controller firmware.
//!
//! Speaks the real wire format over [`SerialLink`], backed by a crude but
//! deterministic plant model: the boiler warms with heater duty and leaks
//! toward ambient, and the cup gains weight while the pump runs with the
//! solenoid open. Panel inputs (dial, pump switch, AC) are driven through
//! a [`SimHandle`], which is how the CLI's `--sim` mode and the
//! integration tests script scenarios.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::LinkError;
use crate::frame::{self, STATUS_OK};
use crate::transport::SerialLink;

const AMBIENT_C: f32 = 20.0;
/// Heating per query at full duty (°C).
const HEAT_RATE_C: f32 = 1.5;
/// Fractional leak toward ambient per query.
const LOSS_RATE: f32 = 0.01;
/// Raw scale counts gained per query per unit of pump power.
const FLOW_COUNTS_PER_PWR: u32 = 40;

#[derive(Debug)]
struct SimState {
    ac_on: bool,
    pump_switch: bool,
    dial: u8,
    temp_c: f32,
    heater_byte: u8,
    pump_pwr: u8,
    solenoid_open: bool,
    leds: u8,
    weight_counts: u32,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            ac_on: true,
            pump_switch: false,
            dial: 2, // manual
            temp_c: AMBIENT_C,
            heater_byte: 0,
            pump_pwr: 0,
            solenoid_open: false,
            leds: 0,
            weight_counts: 100_000,
        }
    }
}

/// Panel-side handle for scripting the simulated machine.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    pub fn set_ac(&self, on: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.ac_on = on;
        }
    }

    pub fn set_pump_switch(&self, pressed: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.pump_switch = pressed;
        }
    }

    pub fn set_dial(&self, position: u8) {
        if let Ok(mut s) = self.state.lock() {
            s.dial = position & 0x03;
        }
    }

    pub fn temp_c(&self) -> f32 {
        self.state.lock().map(|s| s.temp_c).unwrap_or(0.0)
    }

    pub fn leds(&self) -> u8 {
        self.state.lock().map(|s| s.leds).unwrap_or(0)
    }

    pub fn pump_pwr(&self) -> u8 {
        self.state.lock().map(|s| s.pump_pwr).unwrap_or(0)
    }
}

/// Simulated firmware endpoint implementing the host side's byte stream.
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
    inbound: VecDeque<u8>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            inbound: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn respond(&mut self, id: u8, body: &[u8]) {
        self.inbound.push_back(id);
        self.inbound.push_back(body.len() as u8);
        self.inbound.push_back(STATUS_OK);
        self.inbound.extend(body.iter().copied());
    }

    fn handle_request(&mut self, id: u8, body: &[u8]) {
        let mut s = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        match id {
            frame::MSG_ID_SET_LEDS => {
                s.leds = body.first().copied().unwrap_or(0);
                drop(s);
                self.respond(id, &[]);
            }
            frame::MSG_ID_SET_PUMP => {
                s.pump_pwr = body.first().copied().unwrap_or(0);
                drop(s);
                self.respond(id, &[]);
            }
            frame::MSG_ID_SET_SOLENOID => {
                s.solenoid_open = body.first().copied().unwrap_or(0) != 0;
                drop(s);
                self.respond(id, &[]);
            }
            frame::MSG_ID_SET_HEATER => {
                s.heater_byte = body.first().copied().unwrap_or(0);
                drop(s);
                self.respond(id, &[]);
            }
            frame::MSG_ID_GET_SWITCH => {
                let v = u8::from(s.pump_switch);
                drop(s);
                self.respond(id, &[v]);
            }
            frame::MSG_ID_GET_DIAL => {
                let v = s.dial;
                drop(s);
                self.respond(id, &[v]);
            }
            frame::MSG_ID_GET_AC_ON => {
                let v = u8::from(s.ac_on);
                drop(s);
                self.respond(id, &[v]);
            }
            frame::MSG_ID_GET_TEMP => {
                // First-order plant: heat with duty, leak toward ambient.
                let duty = f32::from(s.heater_byte) / 63.0;
                s.temp_c += duty * HEAT_RATE_C - (s.temp_c - AMBIENT_C) * LOSS_RATE;
                let raw = (s.temp_c * 16.0).clamp(0.0, f32::from(u16::MAX)) as u16;
                drop(s);
                self.respond(id, &frame::encode_u16(raw));
            }
            frame::MSG_ID_GET_PRESSURE => {
                let mbar = if s.pump_pwr > 0 && s.solenoid_open {
                    (9000.0 * f32::from(s.pump_pwr) / 127.0) as u16
                } else {
                    0
                };
                drop(s);
                self.respond(id, &frame::encode_u16(mbar));
            }
            frame::MSG_ID_GET_WEIGHT => {
                if s.pump_pwr > 0 && s.solenoid_open {
                    s.weight_counts = s
                        .weight_counts
                        .saturating_add(u32::from(s.pump_pwr) * FLOW_COUNTS_PER_PWR);
                }
                let raw = s.weight_counts & 0x00ff_ffff;
                drop(s);
                self.respond(id, &frame::encode_u24(raw));
            }
            _ => {
                drop(s);
                // Unknown id: echo it with an error status so the host sees
                // a device fault rather than a hang.
                self.inbound.push_back(id);
                self.inbound.push_back(0);
                self.inbound.push_back(0xff);
            }
        }
    }
}

impl SerialLink for SimulatedController {
    fn clear_input(&mut self) -> std::io::Result<()> {
        self.inbound.clear();
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        if buf.len() < frame::HEADER_LEN {
            return Ok(());
        }
        let (id, len) = (buf[0], buf[1] as usize);
        let body = buf[frame::HEADER_LEN..frame::HEADER_LEN + len.min(buf.len() - 2)].to_vec();
        self.handle_request(id, &body);
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<(), LinkError> {
        if self.inbound.len() < buf.len() {
            return Err(LinkError::Timeout);
        }
        for b in buf.iter_mut() {
            *b = self.inbound.pop_front().unwrap_or(0);
        }
        Ok(())
    }
}
