//! The automated brew routine: an ordered list of independently ticking
//! legs behind a single `tick()`.
//!
//! Legs are a tagged enum rather than trait objects; the scheduler only
//! ever matches on the variant, and each variant carries its own timing
//! state. Time is caller-supplied milliseconds so every timing property
//! is testable without sleeping.

use crate::config::AutoBrewCfg;

/// Pump power a ramp starts from (the vibratory pump's stall floor).
const RAMP_START_PWR: f32 = 60.0;
/// Full pump power.
const FULL_PWR: f32 = 127.0;
/// Minimum interval between ramp re-samples, to avoid flooding the pump
/// messenger with sub-percent updates (ms).
const RAMP_SAMPLE_MS: u64 = 50;

/// Outcome of one leg or scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegTick {
    /// Pump power command (0..=127).
    pub value: f32,
    /// True when `value` differs from the previous tick and should be
    /// written out.
    pub changed: bool,
    pub finished: bool,
}

/// One stage of the brew routine.
pub enum Leg {
    /// Linear power ramp over a duration.
    Ramp {
        from: f32,
        to: f32,
        duration_ms: u64,
        start_ms: Option<u64>,
        last_sample_ms: u64,
        last_value: f32,
    },
    /// Hold a power for a fixed duration.
    ConstantTimed {
        value: f32,
        duration_ms: u64,
        end_ms: Option<u64>,
    },
    /// Hold a power until a predicate fires or a safety timeout elapses.
    ConstantTriggered {
        value: f32,
        timeout_ms: u64,
        trigger: Box<dyn FnMut() -> bool + Send>,
        end_ms: Option<u64>,
    },
    /// One-shot side effect (e.g. tare the scale); finishes immediately.
    FunctionCall {
        value: f32,
        action: Box<dyn FnMut() + Send>,
    },
}

impl Leg {
    pub fn ramp(from: f32, to: f32, duration_ms: u64) -> Self {
        Leg::Ramp {
            from,
            to,
            duration_ms,
            start_ms: None,
            last_sample_ms: 0,
            last_value: from,
        }
    }

    pub fn constant_timed(value: f32, duration_ms: u64) -> Self {
        Leg::ConstantTimed {
            value,
            duration_ms,
            end_ms: None,
        }
    }

    pub fn constant_triggered(
        value: f32,
        timeout_ms: u64,
        trigger: impl FnMut() -> bool + Send + 'static,
    ) -> Self {
        Leg::ConstantTriggered {
            value,
            timeout_ms,
            trigger: Box::new(trigger),
            end_ms: None,
        }
    }

    pub fn function_call(action: impl FnMut() + Send + 'static) -> Self {
        Leg::FunctionCall {
            value: 0.0,
            action: Box::new(action),
        }
    }

    pub fn tick(&mut self, now_ms: u64) -> LegTick {
        match self {
            Leg::Ramp {
                from,
                to,
                duration_ms,
                start_ms,
                last_sample_ms,
                last_value,
            } => match *start_ms {
                None => {
                    *start_ms = Some(now_ms);
                    *last_sample_ms = now_ms;
                    *last_value = *from;
                    LegTick {
                        value: *from,
                        changed: true,
                        finished: *duration_ms == 0,
                    }
                }
                Some(start) => {
                    let finished = now_ms >= start.saturating_add(*duration_ms);
                    let mut changed = false;
                    if now_ms.saturating_sub(*last_sample_ms) >= RAMP_SAMPLE_MS {
                        *last_sample_ms = now_ms;
                        let frac = if *duration_ms == 0 {
                            1.0
                        } else {
                            ((now_ms - start) as f32 / *duration_ms as f32).min(1.0)
                        };
                        *last_value = *from + frac * (*to - *from);
                        changed = true;
                    }
                    LegTick {
                        value: *last_value,
                        changed,
                        finished,
                    }
                }
            },
            Leg::ConstantTimed {
                value,
                duration_ms,
                end_ms,
            } => match *end_ms {
                None => {
                    let end = now_ms.saturating_add(*duration_ms);
                    *end_ms = Some(end);
                    LegTick {
                        value: *value,
                        changed: true,
                        finished: now_ms >= end,
                    }
                }
                Some(end) => LegTick {
                    value: *value,
                    changed: false,
                    finished: now_ms >= end,
                },
            },
            Leg::ConstantTriggered {
                value,
                timeout_ms,
                trigger,
                end_ms,
            } => {
                let changed = end_ms.is_none();
                let end = *end_ms.get_or_insert_with(|| now_ms.saturating_add(*timeout_ms));
                LegTick {
                    value: *value,
                    changed,
                    finished: trigger() || now_ms >= end,
                }
            }
            Leg::FunctionCall { value, action } => {
                action();
                LegTick {
                    value: *value,
                    changed: true,
                    finished: true,
                }
            }
        }
    }

    pub fn reset(&mut self) {
        match self {
            Leg::Ramp { start_ms, .. } => *start_ms = None,
            Leg::ConstantTimed { end_ms, .. } | Leg::ConstantTriggered { end_ms, .. } => {
                *end_ms = None
            }
            Leg::FunctionCall { .. } => {}
        }
    }
}

/// Runs legs in order, advancing the cursor when the current leg reports
/// finished. At most one leg transition happens per tick, so a routine of
/// N legs takes at least N ticks even when every leg finishes instantly;
/// timing tests rely on this cadence.
pub struct AutoBrewScheduler {
    legs: Vec<Leg>,
    current: usize,
}

impl AutoBrewScheduler {
    pub fn new(legs: Vec<Leg>) -> Self {
        Self { legs, current: 0 }
    }

    pub fn leg_count(&self) -> usize {
        self.legs.len()
    }

    /// Index of the running leg; equals `leg_count()` once finished.
    pub fn current_leg(&self) -> usize {
        self.current
    }

    pub fn tick(&mut self, now_ms: u64) -> LegTick {
        let Some(leg) = self.legs.get_mut(self.current) else {
            // Past the last leg: idempotent terminal state.
            return LegTick {
                value: 0.0,
                changed: false,
                finished: true,
            };
        };
        let t = leg.tick(now_ms);
        if t.finished {
            self.current += 1;
            if self.current == self.legs.len() {
                return LegTick {
                    value: t.value,
                    changed: t.changed,
                    finished: true,
                };
            }
        }
        LegTick {
            value: t.value,
            changed: t.changed,
            finished: false,
        }
    }

    /// Rewind to the first leg and clear every leg's timing state.
    pub fn reset(&mut self) {
        self.current = 0;
        for leg in &mut self.legs {
            leg.reset();
        }
    }
}

fn secs_to_ms(s: f32) -> u64 {
    (s.max(0.0) * 1000.0).round() as u64
}

/// The stock five-stage routine: tare, preinfuse ramp, soak, ramp to full
/// power, brew until the target yield or the safety timeout.
pub fn standard_routine(
    cfg: &AutoBrewCfg,
    tare: impl FnMut() + Send + 'static,
    brewed: impl FnMut() -> bool + Send + 'static,
) -> AutoBrewScheduler {
    AutoBrewScheduler::new(vec![
        Leg::function_call(tare),
        Leg::ramp(
            RAMP_START_PWR,
            cfg.preinfuse_pwr,
            secs_to_ms(cfg.preinfuse_on_s),
        ),
        Leg::constant_timed(0.0, secs_to_ms(cfg.preinfuse_off_s)),
        Leg::ramp(RAMP_START_PWR, FULL_PWR, secs_to_ms(cfg.ramp_s)),
        Leg::constant_triggered(FULL_PWR, secs_to_ms(cfg.timeout_s), brewed),
    ])
}
