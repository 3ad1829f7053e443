//! Discrete PID controller for the boiler.
//!
//! Conventions (the source history disagreed; these are fixed here and in
//! DESIGN.md): dwell times are milliseconds; the derivative estimator is
//! fed the NEGATED sensor value, so its slope approximates −dv/dt and a
//! positive `kd` damps the approach to the setpoint.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use eyre::WrapErr;
use latte_traits::clock::{Clock, MonotonicClock};
use latte_traits::{Bounds, Readable, Writable};

use crate::error::Result;
use crate::fault::map_link_error;

/// Controller gains, immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl PidGains {
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }
}

/// Trapezoidal integral with a hard anti-windup clamp.
///
/// The clamp is applied after every accumulation; once saturated the sum
/// simply stops growing (no back-calculation), so the controller
/// under-integrates rather than winding up while the output is pinned.
#[derive(Debug)]
pub struct DiscreteIntegral {
    sum: f32,
    bounds: Bounds,
    prev: Option<(f64, f32)>,
}

impl DiscreteIntegral {
    pub fn new(bounds: Bounds) -> Self {
        Self {
            sum: 0.0,
            bounds,
            prev: None,
        }
    }

    /// Accumulate a sample taken at `t_s` seconds.
    ///
    /// The first sample only seeds the history; accumulation starts with
    /// the second.
    pub fn add_point(&mut self, t_s: f64, value: f32) {
        if let Some((pt, pv)) = self.prev {
            let dt = (t_s - pt) as f32;
            self.sum = self.bounds.clip(self.sum + (pv + value) / 2.0 * dt);
        }
        self.prev = Some((t_s, value));
    }

    pub fn sum(&self) -> f32 {
        self.sum
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.prev = None;
    }
}

/// Sliding-window slope estimator.
///
/// Keeps (time, value) samples spanning at most `span_s` trailing seconds
/// (span <= 0 keeps exactly the last two) and reports the least-squares
/// slope over the retained window. Accumulation is done in f64 so closely
/// spaced ticks don't lose the signal to cancellation.
#[derive(Debug)]
pub struct DiscreteDerivative {
    points: VecDeque<(f64, f32)>,
    span_s: f64,
}

impl DiscreteDerivative {
    pub fn new(span_s: f64) -> Self {
        Self {
            points: VecDeque::new(),
            span_s,
        }
    }

    pub fn add_point(&mut self, t_s: f64, value: f32) {
        self.points.push_back((t_s, value));
    }

    pub fn reset(&mut self) {
        self.points.clear();
    }

    fn prune(&mut self) {
        if self.span_s <= 0.0 {
            while self.points.len() > 2 {
                self.points.pop_front();
            }
            return;
        }
        while self.points.len() > 2 {
            let newest = self.points.back().map(|p| p.0).unwrap_or(0.0);
            let oldest = self.points.front().map(|p| p.0).unwrap_or(0.0);
            if newest - oldest > self.span_s {
                self.points.pop_front();
            } else {
                break;
            }
        }
    }

    /// Least-squares slope over the retained window; 0 with fewer than two
    /// samples.
    pub fn slope(&mut self) -> f32 {
        if self.points.len() < 2 {
            return 0.0;
        }
        self.prune();

        let n = self.points.len() as f64;
        let t_avg: f64 = self.points.iter().map(|p| p.0).sum::<f64>() / n;
        let v_avg: f64 = self.points.iter().map(|p| f64::from(p.1)).sum::<f64>() / n;

        let mut num = 0.0f64;
        let mut den = 0.0f64;
        for (t, v) in &self.points {
            let dt = t - t_avg;
            num += dt * (f64::from(*v) - v_avg);
            den += dt * dt;
        }
        if den == 0.0 {
            return 0.0;
        }
        (num / den) as f32
    }
}

/// PID controller bound to one sensor and one output.
///
/// `tick()` is dwell-gated: calls inside `dwell_ms` of the previous tick
/// are no-ops, so the run loop can call it every cycle without retuning
/// the gains to the loop rate. The output is responsible for clamping to
/// its physical range and reports the value actually applied.
pub struct Pid {
    gains: PidGains,
    setpoint: f32,
    sensor: Option<Box<dyn Readable<f32> + Send>>,
    output: Option<Box<dyn Writable<f32> + Send>>,
    integral: DiscreteIntegral,
    derivative: DiscreteDerivative,
    dwell_ms: u64,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    last_tick_ms: Option<u64>,
    last_input: Option<f32>,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self::with_clock(gains, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(gains: PidGains, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let epoch = clock.now();
        Self {
            gains,
            setpoint: 0.0,
            sensor: None,
            output: None,
            integral: DiscreteIntegral::new(Bounds::unbounded()),
            derivative: DiscreteDerivative::new(0.0),
            dwell_ms: 1000,
            clock,
            epoch,
            last_tick_ms: None,
            last_input: None,
        }
    }

    pub fn with_windup_bounds(mut self, bounds: Bounds) -> Self {
        self.integral = DiscreteIntegral::new(bounds);
        self
    }

    pub fn with_derivative_span(mut self, span_s: f64) -> Self {
        self.derivative = DiscreteDerivative::new(span_s);
        self
    }

    pub fn with_dwell_ms(mut self, dwell_ms: u64) -> Self {
        self.dwell_ms = dwell_ms;
        self
    }

    pub fn attach_sensor(&mut self, sensor: Box<dyn Readable<f32> + Send>) {
        self.sensor = Some(sensor);
    }

    pub fn attach_output(&mut self, output: Box<dyn Writable<f32> + Send>) {
        self.output = Some(output);
    }

    /// Takes effect on the next tick.
    pub fn set_setpoint(&mut self, setpoint: f32) {
        self.setpoint = setpoint;
    }

    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }

    /// True iff the last ticked reading is within `tol` of the setpoint;
    /// false before the first tick.
    pub fn at_setpoint(&self, tol: f32) -> bool {
        self.last_input
            .map(|v| (v - self.setpoint).abs() <= tol)
            .unwrap_or(false)
    }

    /// One controller step: read, estimate, write. No-op inside the dwell
    /// window, and a logged no-op when sensor or output are unbound (a
    /// configuration error, not a runtime fault).
    pub fn tick(&mut self) -> Result<()> {
        let (Some(sensor), Some(output)) = (self.sensor.as_mut(), self.output.as_mut()) else {
            tracing::warn!("pid tick skipped: sensor and output must be attached");
            return Ok(());
        };

        let now_ms = self.clock.ms_since(self.epoch);
        if let Some(last) = self.last_tick_ms
            && now_ms.saturating_sub(last) < self.dwell_ms
        {
            return Ok(());
        }
        self.last_tick_ms = Some(now_ms);

        let v = sensor
            .read()
            .map_err(|e| eyre::Report::new(map_link_error(&*e)))
            .wrap_err("reading boiler temperature")?;
        let t_s = now_ms as f64 / 1000.0;
        let err = self.setpoint - v;

        self.derivative.add_point(t_s, -v);
        self.integral.add_point(t_s, err);

        let u = self.gains.kp * err
            + self.gains.ki * self.integral.sum()
            + self.gains.kd * self.derivative.slope();

        let applied = output
            .write(u)
            .map_err(|e| eyre::Report::new(map_link_error(&*e)))
            .wrap_err("writing heater duty")?;
        self.last_input = Some(v);
        tracing::trace!(temp = v, err, u, applied, "pid tick");
        Ok(())
    }

    /// Drive the bound output directly, bypassing its dwell and
    /// duplicate-send policy. Used for safe-state writes; a no-op when no
    /// output is bound.
    pub fn force_output(&mut self, val: f32) -> Result<()> {
        let Some(output) = self.output.as_mut() else {
            return Ok(());
        };
        output
            .write_forced(val)
            .map_err(|e| eyre::Report::new(map_link_error(&*e)))
            .wrap_err("forcing controller output")?;
        Ok(())
    }

    /// Clears estimator history and the dwell gate; keeps gains and
    /// setpoint. Used on power-cycle recovery.
    pub fn reset(&mut self) {
        self.integral.reset();
        self.derivative.reset();
        self.last_tick_ms = None;
        self.last_input = None;
    }
}
