//! Test and helper mocks for latte_core.

use std::sync::{Arc, Mutex};

use latte_traits::{HwError, HwResult, Indicators, Readable, Writable};

/// Input whose value is set from the test; clones share the cell.
#[derive(Clone)]
pub struct FakeInput<T: Copy> {
    value: Arc<Mutex<T>>,
}

impl<T: Copy> FakeInput<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
        }
    }

    pub fn set(&self, value: T) {
        if let Ok(mut v) = self.value.lock() {
            *v = value;
        }
    }
}

impl<T: Copy> Readable<T> for FakeInput<T> {
    fn read(&mut self) -> HwResult<T> {
        Ok(*self
            .value
            .lock()
            .map_err(|_| HwError::from("poisoned fake input"))?)
    }
}

/// Input that errors for the first `failures` reads, then yields `value`.
/// Used to simulate AC dropouts and flaky devices.
#[derive(Clone)]
pub struct FlakyInput<T: Copy> {
    value: Arc<Mutex<T>>,
    failures: Arc<Mutex<u32>>,
}

impl<T: Copy> FlakyInput<T> {
    pub fn new(value: T, failures: u32) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
            failures: Arc::new(Mutex::new(failures)),
        }
    }
}

impl<T: Copy> Readable<T> for FlakyInput<T> {
    fn read(&mut self) -> HwResult<T> {
        let mut left = self
            .failures
            .lock()
            .map_err(|_| HwError::from("poisoned flaky input"))?;
        if *left > 0 {
            *left -= 1;
            return Err(HwError::from("simulated read failure"));
        }
        Ok(*self
            .value
            .lock()
            .map_err(|_| HwError::from("poisoned flaky input"))?)
    }
}

/// Input that replays a scripted sequence, then repeats the final value.
/// Handy for AC dropout scenarios where the powered-down poll loop must
/// eventually see power return.
#[derive(Clone)]
pub struct SequenceInput<T: Copy> {
    values: Arc<Mutex<std::collections::VecDeque<T>>>,
    last: Arc<Mutex<T>>,
}

impl<T: Copy> SequenceInput<T> {
    pub fn new(values: impl IntoIterator<Item = T>, fallback: T) -> Self {
        Self {
            values: Arc::new(Mutex::new(values.into_iter().collect())),
            last: Arc::new(Mutex::new(fallback)),
        }
    }
}

impl<T: Copy> Readable<T> for SequenceInput<T> {
    fn read(&mut self) -> HwResult<T> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| HwError::from("poisoned sequence input"))?;
        let mut last = self
            .last
            .lock()
            .map_err(|_| HwError::from("poisoned sequence input"))?;
        if let Some(v) = values.pop_front() {
            *last = v;
        }
        Ok(*last)
    }
}

/// Output spy recording every write; clones share the record.
#[derive(Clone)]
pub struct RecordingOutput<T: Copy> {
    writes: Arc<Mutex<Vec<T>>>,
}

impl<T: Copy> RecordingOutput<T> {
    pub fn new() -> Self {
        Self {
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn last(&self) -> Option<T> {
        self.writes.lock().ok().and_then(|w| w.last().copied())
    }

    pub fn writes(&self) -> Vec<T> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl<T: Copy> Default for RecordingOutput<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> Writable<T> for RecordingOutput<T> {
    fn write(&mut self, val: T) -> HwResult<T> {
        self.writes
            .lock()
            .map_err(|_| HwError::from("poisoned recording output"))?
            .push(val);
        Ok(val)
    }
}

/// LED bank spy; clones share state.
#[derive(Clone)]
pub struct RecordingLeds {
    state: Arc<Mutex<[bool; 3]>>,
}

impl RecordingLeds {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new([false; 3])),
        }
    }

    pub fn get(&self, idx: usize) -> bool {
        self.state.lock().map(|s| s[idx]).unwrap_or(false)
    }
}

impl Default for RecordingLeds {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicators for RecordingLeds {
    fn set(&mut self, idx: u8, on: bool) -> HwResult<()> {
        let mut s = self
            .state
            .lock()
            .map_err(|_| HwError::from("poisoned recording leds"))?;
        if let Some(slot) = s.get_mut(idx as usize) {
            *slot = on;
        }
        Ok(())
    }

    fn set_all(&mut self, led0: bool, led1: bool, led2: bool) -> HwResult<()> {
        *self
            .state
            .lock()
            .map_err(|_| HwError::from("poisoned recording leds"))? = [led0, led1, led2];
        Ok(())
    }
}
