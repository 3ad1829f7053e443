use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use latte_core::autobrew::{AutoBrewScheduler, Leg};
use latte_core::machine::{Machine, MachineMode, POWER_LED, READY_LED};
use latte_core::mocks::{FakeInput, RecordingLeds, RecordingOutput, SequenceInput};
use latte_core::pid::{Pid, PidGains};
use latte_core::BrewLogger;
use latte_traits::clock::test_clock::TestClock;
use latte_traits::{Bounds, HwResult, Readable};

struct Rig {
    dial: FakeInput<u8>,
    sw: FakeInput<bool>,
    temp: FakeInput<f32>,
    pump: RecordingOutput<f32>,
    solenoid: RecordingOutput<bool>,
    heater: RecordingOutput<f32>,
    leds: RecordingLeds,
    machine: Machine,
}

/// Two-stage routine: hold 90 for one tick's worth, then an instant stop
/// leg. Keeps auto-brew scenarios short.
fn short_routine() -> AutoBrewScheduler {
    AutoBrewScheduler::new(vec![
        Leg::constant_timed(90.0, 0),
        Leg::constant_timed(0.0, 0),
    ])
}

fn rig_with(ac: impl Readable<bool> + Send + 'static, scheduler: AutoBrewScheduler) -> Rig {
    let clock = TestClock::new();
    let dial = FakeInput::new(2u8); // manual
    let sw = FakeInput::new(false);
    let temp = FakeInput::new(95.0);
    let pump = RecordingOutput::new();
    let solenoid = RecordingOutput::new();
    let heater = RecordingOutput::new();
    let leds = RecordingLeds::new();

    let mut boiler = Pid::with_clock(PidGains::new(0.3, 0.005, 0.025), Arc::new(clock.clone()))
        .with_windup_bounds(Bounds::new(0.0, 300.0))
        .with_dwell_ms(0);
    boiler.attach_sensor(Box::new(temp.clone()));
    boiler.attach_output(Box::new(heater.clone()));

    let machine = Machine::builder()
        .with_clock(Arc::new(clock))
        .with_ac_sense(ac)
        .with_dial(dial.clone())
        .with_pump_switch(sw.clone())
        .with_pump(pump.clone())
        .with_solenoid(solenoid.clone())
        .with_leds(leds.clone())
        .with_boiler(boiler)
        .with_scheduler(scheduler)
        .with_cycle_ms(10)
        .build()
        .unwrap();

    Rig {
        dial,
        sw,
        temp,
        pump,
        solenoid,
        heater,
        leds,
        machine,
    }
}

fn rig() -> Rig {
    rig_with(FakeInput::new(true), short_routine())
}

#[test]
fn manual_mode_drives_pump_with_solenoid_open() {
    let mut r = rig();
    r.machine.cycle().unwrap(); // first cycle initializes the mode
    assert_eq!(r.machine.mode(), Some(MachineMode::Manual));
    assert_eq!(r.pump.last(), Some(0.0));

    r.sw.set(true);
    r.machine.cycle().unwrap();
    assert_eq!(r.pump.last(), Some(127.0));
    assert_eq!(r.solenoid.last(), Some(true));
}

#[test]
fn hot_mode_pumps_with_solenoid_closed() {
    let mut r = rig();
    r.dial.set(1);
    r.machine.cycle().unwrap();
    r.sw.set(true);
    r.machine.cycle().unwrap();
    assert_eq!(r.machine.mode(), Some(MachineMode::Hot));
    assert_eq!(r.pump.last(), Some(127.0));
    assert_eq!(r.solenoid.last(), Some(false));
}

#[test]
fn steam_mode_never_runs_the_pump() {
    let mut r = rig();
    r.dial.set(0);
    r.machine.cycle().unwrap();
    r.sw.set(true);
    r.machine.cycle().unwrap();
    assert_eq!(r.machine.mode(), Some(MachineMode::Steam));
    assert_eq!(r.pump.last(), Some(0.0));
    assert_eq!(r.solenoid.last(), Some(false));
}

#[test]
fn mode_flip_to_auto_with_switch_held_locks_the_pump() {
    let mut r = rig();
    r.machine.cycle().unwrap();
    r.sw.set(true);
    r.machine.cycle().unwrap();
    assert_eq!(r.pump.last(), Some(127.0), "manual brew running");

    // Dial flips to Auto mid-brew with the switch still held: the very
    // next cycle must force the pump off instead of starting a brew.
    r.dial.set(3);
    r.machine.cycle().unwrap();
    assert!(r.machine.pump_locked());
    assert_eq!(r.pump.last(), Some(0.0));
    assert_eq!(r.solenoid.last(), Some(false));

    // The lock holds as long as the switch does.
    r.machine.cycle().unwrap();
    assert_eq!(r.pump.last(), Some(0.0));
}

#[test]
fn releasing_the_switch_clears_the_lock_and_arms_auto() {
    let mut r = rig();
    r.machine.cycle().unwrap();
    r.sw.set(true);
    r.machine.cycle().unwrap();
    r.dial.set(3);
    r.machine.cycle().unwrap();
    assert!(r.machine.pump_locked());

    r.sw.set(false);
    r.machine.cycle().unwrap();
    assert!(!r.machine.pump_locked());
    assert_eq!(r.pump.last(), Some(0.0));

    // Press again: the scheduler drives the pump now.
    r.sw.set(true);
    r.machine.cycle().unwrap();
    assert_eq!(r.pump.last(), Some(90.0));
    assert_eq!(r.solenoid.last(), Some(true));
}

#[test]
fn auto_routine_completion_stops_pump_and_closes_solenoid() {
    let mut r = rig();
    r.machine.cycle().unwrap();
    r.dial.set(3);
    r.machine.cycle().unwrap(); // mode change; switch still off
    r.sw.set(true);
    r.machine.cycle().unwrap(); // leg 0: pump 90
    assert_eq!(r.pump.last(), Some(90.0));
    r.machine.cycle().unwrap(); // leg 1 finishes the routine
    assert_eq!(r.pump.last(), Some(0.0));
    assert_eq!(r.solenoid.last(), Some(false));
}

#[test]
fn ac_loss_forces_every_output_off_until_power_returns() {
    // Powered for the first cycle, gone for two polls, then back.
    let ac = SequenceInput::new([true, false, false, true], true);
    let mut r = rig_with(ac, short_routine());
    r.sw.set(true);
    r.dial.set(2);
    r.machine.cycle().unwrap();

    // AC drops: this cycle blocks (polling) until power returns, forcing
    // the safe state on the way down.
    r.machine.cycle().unwrap();
    assert_eq!(r.pump.last(), Some(0.0));
    assert_eq!(r.solenoid.last(), Some(false));
    assert_eq!(r.heater.last(), Some(0.0));
    assert!(!r.leds.get(READY_LED as usize));

    // Recovery: power LED on, mode re-initialized next cycle, lock armed.
    assert!(r.leds.get(POWER_LED as usize));
    assert_eq!(r.machine.mode(), None);
    assert!(r.machine.pump_locked());

    r.machine.cycle().unwrap();
    assert_eq!(r.machine.mode(), Some(MachineMode::Manual));
    // Switch was held across the outage: still locked out.
    assert_eq!(r.pump.last(), Some(0.0));
}

#[test]
fn ready_led_tracks_setpoint_window() {
    let mut r = rig();
    r.machine.cycle().unwrap();
    assert!(r.leds.get(READY_LED as usize), "95.0 °C vs 95.0 setpoint");

    r.temp.set(50.0);
    r.machine.cycle().unwrap();
    assert!(!r.leds.get(READY_LED as usize));
}

#[test]
fn dial_change_updates_the_boiler_setpoint() {
    let mut r = rig();
    r.machine.cycle().unwrap();
    assert!(r.leds.get(READY_LED as usize), "at the 95 °C brew setpoint");

    // Steam raises the setpoint to 140: no longer ready at 95 °C.
    r.dial.set(0);
    r.machine.cycle().unwrap();
    assert!(!r.leds.get(READY_LED as usize));
}

#[test]
fn run_loop_honors_cycle_budget_and_leaves_safe_state() {
    let mut r = rig();
    let shutdown = AtomicBool::new(false);
    r.machine.run(&shutdown, Some(5)).unwrap();
    assert_eq!(r.pump.last(), Some(0.0));
    assert_eq!(r.heater.last(), Some(0.0));
    assert!(!r.leds.get(POWER_LED as usize));
}

#[test]
fn completed_brew_writes_a_session_log() {
    let dir = tempfile::tempdir().unwrap();
    let clock = TestClock::new();
    let mut log = BrewLogger::with_clock(10, Arc::new(clock));
    log.add_source("temp", || 93.0);

    let mut r = {
        let mut rig = rig_with(FakeInput::new(true), short_routine());
        // Rebuild with the logger attached.
        let mut boiler =
            Pid::with_clock(PidGains::new(0.3, 0.005, 0.025), Arc::new(TestClock::new()))
                .with_dwell_ms(0);
        boiler.attach_sensor(Box::new(rig.temp.clone()));
        boiler.attach_output(Box::new(rig.heater.clone()));
        rig.machine = Machine::builder()
            .with_ac_sense(FakeInput::new(true))
            .with_dial(rig.dial.clone())
            .with_pump_switch(rig.sw.clone())
            .with_pump(rig.pump.clone())
            .with_solenoid(rig.solenoid.clone())
            .with_leds(rig.leds.clone())
            .with_boiler(boiler)
            .with_scheduler(short_routine())
            .with_brew_logger(log, dir.path().to_path_buf())
            .build()
            .unwrap();
        rig
    };

    r.dial.set(3);
    r.machine.cycle().unwrap();
    r.sw.set(true);
    r.machine.cycle().unwrap(); // brewing: first sample recorded
    r.machine.cycle().unwrap(); // routine completes: log written

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1, "one brewlog per session");
}

/// Dial standing in for a device that rejects a few commands before
/// recovering.
#[derive(Clone)]
struct FaultyDial {
    failures: Arc<Mutex<u32>>,
}

impl Readable<u8> for FaultyDial {
    fn read(&mut self) -> HwResult<u8> {
        let mut left = self.failures.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return Err(Box::new(latte_link::LinkError::DeviceFault {
                id: 13,
                status: 2,
            }));
        }
        Ok(2)
    }
}

#[test]
fn device_faults_are_ridden_out_by_the_run_loop() {
    let clock = TestClock::new();
    let temp = FakeInput::new(95.0);
    let heater = RecordingOutput::new();
    let mut boiler = Pid::with_clock(PidGains::new(0.3, 0.005, 0.025), Arc::new(clock.clone()))
        .with_dwell_ms(0);
    boiler.attach_sensor(Box::new(temp.clone()));
    boiler.attach_output(Box::new(heater.clone()));

    let mut machine = Machine::builder()
        .with_clock(Arc::new(clock))
        .with_ac_sense(FakeInput::new(true))
        .with_dial(FaultyDial {
            failures: Arc::new(Mutex::new(2)),
        })
        .with_pump_switch(FakeInput::new(false))
        .with_pump(RecordingOutput::<f32>::new())
        .with_solenoid(RecordingOutput::<bool>::new())
        .with_leds(RecordingLeds::new())
        .with_boiler(boiler)
        .with_scheduler(short_routine())
        .build()
        .unwrap();

    let shutdown = AtomicBool::new(false);
    // Two faulted cycles then two good ones: the loop must survive.
    machine.run(&shutdown, Some(4)).unwrap();
    assert_eq!(machine.mode(), Some(MachineMode::Manual));
}

/// Dial whose link has died entirely.
#[derive(Clone)]
struct DeadDial;

impl Readable<u8> for DeadDial {
    fn read(&mut self) -> HwResult<u8> {
        Err(Box::new(latte_link::LinkError::Timeout))
    }
}

#[test]
fn link_timeout_is_fatal_and_forces_safe_state() {
    let clock = TestClock::new();
    let temp = FakeInput::new(95.0);
    let heater = RecordingOutput::new();
    let pump = RecordingOutput::new();
    let mut boiler = Pid::with_clock(PidGains::new(0.3, 0.005, 0.025), Arc::new(clock.clone()))
        .with_dwell_ms(0);
    boiler.attach_sensor(Box::new(temp.clone()));
    boiler.attach_output(Box::new(heater.clone()));

    let mut machine = Machine::builder()
        .with_clock(Arc::new(clock))
        .with_ac_sense(FakeInput::new(true))
        .with_dial(DeadDial)
        .with_pump_switch(FakeInput::new(false))
        .with_pump(pump.clone())
        .with_solenoid(RecordingOutput::<bool>::new())
        .with_leds(RecordingLeds::new())
        .with_boiler(boiler)
        .with_scheduler(short_routine())
        .build()
        .unwrap();

    let shutdown = AtomicBool::new(false);
    let err = machine.run(&shutdown, Some(10)).unwrap_err();
    assert!(format!("{err:#}").contains("mode dial"));
    assert_eq!(pump.last(), Some(0.0));
    assert_eq!(heater.last(), Some(0.0));
}

#[test]
fn builder_rejects_missing_bindings() {
    let err = Machine::builder().build().unwrap_err();
    assert!(err
        .downcast_ref::<latte_core::BuildError>()
        .is_some_and(|b| matches!(b, latte_core::BuildError::MissingAcSense)));
}
