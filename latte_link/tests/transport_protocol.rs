//! Protocol-level behavior of `Transport` against a scripted peer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use latte_link::frame::{self, STATUS_OK};
use latte_link::transport::{LinkCfg, Messenger, SerialLink, Transport};
use latte_link::LinkError;
use latte_traits::clock::test_clock::TestClock;

/// What the scripted peer does with the next request it sees.
enum Step {
    Respond { status: u8, body: Vec<u8> },
    Timeout,
    WrongId,
}

struct ScriptedLink {
    script: VecDeque<Step>,
    inbound: Vec<u8>,
    writes: usize,
}

impl ScriptedLink {
    fn new(script: Vec<Step>) -> Self {
        Self {
            script: script.into(),
            inbound: Vec::new(),
            writes: 0,
        }
    }
}

impl SerialLink for ScriptedLink {
    fn clear_input(&mut self) -> std::io::Result<()> {
        self.inbound.clear();
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.writes += 1;
        let id = buf[0];
        match self.script.pop_front() {
            Some(Step::Respond { status, body }) => {
                self.inbound.push(id);
                self.inbound.push(body.len() as u8);
                self.inbound.push(status);
                self.inbound.extend_from_slice(&body);
            }
            Some(Step::WrongId) => {
                self.inbound.extend_from_slice(&[id.wrapping_add(1), 0, STATUS_OK]);
            }
            Some(Step::Timeout) | None => {}
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<(), LinkError> {
        if self.inbound.len() < buf.len() {
            return Err(LinkError::Timeout);
        }
        let rest = self.inbound.split_off(buf.len());
        buf.copy_from_slice(&self.inbound);
        self.inbound = rest;
        Ok(())
    }
}

fn transport(script: Vec<Step>) -> (Transport<ScriptedLink>, TestClock) {
    let clock = TestClock::new();
    let tp = Transport::with_clock(
        ScriptedLink::new(script),
        LinkCfg {
            read_timeout_ms: 10,
            retries: 2,
            retry_backoff_ms: 1,
        },
        Arc::new(clock.clone()),
    );
    (tp, clock)
}

#[test]
fn repeated_reads_within_dwell_issue_one_physical_send() {
    let respond = |v: u8| Step::Respond {
        status: STATUS_OK,
        body: vec![v],
    };
    let (mut tp, clock) = transport(vec![respond(1), respond(2)]);
    let mut m = Messenger::new(frame::MSG_ID_GET_AC_ON, 100, false);

    for _ in 0..20 {
        tp.send(&mut m, &[], false).unwrap();
        assert_eq!(m.response(), &[1]);
        clock.advance(Duration::from_millis(4));
    }
    // 20 * 4ms = 80ms < dwell: still the first response.
    clock.advance(Duration::from_millis(25));
    tp.send(&mut m, &[], false).unwrap();
    assert_eq!(m.response(), &[2]);
}

#[test]
fn timeout_retries_then_succeeds() {
    let (mut tp, _clock) = transport(vec![
        Step::Timeout,
        Step::Respond {
            status: STATUS_OK,
            body: vec![7],
        },
    ]);
    let mut m = Messenger::new(frame::MSG_ID_GET_SWITCH, 0, false);
    let status = tp.send(&mut m, &[], true).unwrap();
    assert_eq!(status, STATUS_OK);
    assert_eq!(m.response(), &[7]);
}

#[test]
fn timeout_exhausts_retries_and_propagates() {
    // retries = 2 -> 3 attempts total, all timing out.
    let (mut tp, _clock) = transport(vec![Step::Timeout, Step::Timeout, Step::Timeout]);
    let mut m = Messenger::new(frame::MSG_ID_GET_SWITCH, 0, false);
    let err = tp.send(&mut m, &[], true).unwrap_err();
    assert!(matches!(err, LinkError::Timeout));
}

#[test]
fn id_mismatch_is_fatal_and_not_retried() {
    let (mut tp, _clock) = transport(vec![
        Step::WrongId,
        Step::Respond {
            status: STATUS_OK,
            body: vec![],
        },
    ]);
    let mut m = Messenger::new(frame::MSG_ID_GET_TEMP, 0, false);
    let err = tp.send(&mut m, &[], true).unwrap_err();
    match err {
        LinkError::IdMismatch { expected, got } => {
            assert_eq!(expected, frame::MSG_ID_GET_TEMP);
            assert_eq!(got, frame::MSG_ID_GET_TEMP + 1);
        }
        other => panic!("expected IdMismatch, got {other:?}"),
    }
}

#[test]
fn nonzero_status_is_surfaced_as_is() {
    let (mut tp, _clock) = transport(vec![Step::Respond {
        status: 3,
        body: vec![],
    }]);
    let mut m = Messenger::new(frame::MSG_ID_SET_HEATER, 0, false);
    // The transport reports the device's status without judging it.
    let status = tp.send(&mut m, &[0], true).unwrap();
    assert_eq!(status, 3);
    assert_eq!(m.status(), 3);
}

#[test]
fn failed_exchange_keeps_previous_cache() {
    let (mut tp, clock) = transport(vec![
        Step::Respond {
            status: STATUS_OK,
            body: vec![42],
        },
        Step::Timeout,
        Step::Timeout,
        Step::Timeout,
    ]);
    let mut m = Messenger::new(frame::MSG_ID_GET_WEIGHT, 10, false);
    tp.send(&mut m, &[], false).unwrap();
    clock.advance(Duration::from_millis(20));
    assert!(tp.send(&mut m, &[], false).is_err());
    assert_eq!(m.response(), &[42]);
}
