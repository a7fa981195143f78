//! Scripted bus doubles shared by the unit tests.

use core::convert::Infallible;

use std::cell::RefCell;
use std::rc::Rc;
use std::vec;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::probe::FlashProbe;

/// Everything a probe operation does on the wire, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    CsLow,
    CsHigh,
    Write(Vec<u8>),
    Read(usize),
}

pub type EventLog = Rc<RefCell<Vec<BusEvent>>>;

/// SPI bus that records traffic and serves scripted reply bytes.
/// Once the script is exhausted every further read byte is
/// `exhausted_reply`.
pub struct ScriptedBus {
    log: EventLog,
    replies: Vec<u8>,
    cursor: usize,
    exhausted_reply: u8,
}

impl ScriptedBus {
    fn next_reply(&mut self) -> u8 {
        if self.cursor < self.replies.len() {
            let byte = self.replies[self.cursor];
            self.cursor += 1;
            byte
        } else {
            self.exhausted_reply
        }
    }
}

impl embedded_hal::spi::ErrorType for ScriptedBus {
    type Error = Infallible;
}

impl SpiBus<u8> for ScriptedBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        for word in words.iter_mut() {
            *word = self.next_reply();
        }
        self.log.borrow_mut().push(BusEvent::Read(words.len()));
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        self.log.borrow_mut().push(BusEvent::Write(words.to_vec()));
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        self.log.borrow_mut().push(BusEvent::Write(write.to_vec()));
        for word in read.iter_mut() {
            *word = self.next_reply();
        }
        self.log.borrow_mut().push(BusEvent::Read(read.len()));
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        self.log.borrow_mut().push(BusEvent::Write(words.to_vec()));
        for word in words.iter_mut() {
            *word = self.next_reply();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

/// Chip-select double that records edges into the shared log.
pub struct ScriptedPin {
    log: EventLog,
}

impl embedded_hal::digital::ErrorType for ScriptedPin {
    type Error = Infallible;
}

impl OutputPin for ScriptedPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.log.borrow_mut().push(BusEvent::CsLow);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.log.borrow_mut().push(BusEvent::CsHigh);
        Ok(())
    }
}

/// Delay double that only accumulates the requested time.
pub struct CountingDelay {
    pub slept_ns: u64,
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.slept_ns = self.slept_ns.saturating_add(u64::from(ns));
    }
}

/// Probe over scripted doubles plus the shared event log. The
/// construction edge on chip-select is dropped so tests start from a
/// clean transcript.
pub fn probe_with_replies(
    replies: &[u8],
    exhausted_reply: u8,
) -> (FlashProbe<ScriptedBus, ScriptedPin, CountingDelay>, EventLog) {
    let log: EventLog = Rc::new(RefCell::new(Vec::new()));
    let bus = ScriptedBus {
        log: Rc::clone(&log),
        replies: replies.to_vec(),
        cursor: 0,
        exhausted_reply,
    };
    let pin = ScriptedPin {
        log: Rc::clone(&log),
    };
    let delay = CountingDelay { slept_ns: 0 };
    let probe = match FlashProbe::new(bus, pin, delay) {
        Ok(probe) => probe,
        Err(err) => panic!("probe construction failed: {:?}", err),
    };
    log.borrow_mut().clear();
    (probe, log)
}

/// Write payloads grouped per chip-select window.
pub fn frames_by_window(log: &EventLog) -> Vec<Vec<u8>> {
    let mut windows = Vec::new();
    let mut current: Option<Vec<u8>> = None;
    for event in log.borrow().iter() {
        match event {
            BusEvent::CsLow => current = Some(Vec::new()),
            BusEvent::Write(bytes) => {
                if let Some(window) = current.as_mut() {
                    window.extend_from_slice(bytes);
                }
            }
            BusEvent::CsHigh => {
                if let Some(window) = current.take() {
                    windows.push(window);
                }
            }
            BusEvent::Read(_) => {}
        }
    }
    windows
}

/// Reply script for a full safe-battery pass: the JEDEC triple first,
/// zeroes for everything after it.
pub fn battery_replies(mfr: u8, memory_type: u8, capacity_code: u8) -> Vec<u8> {
    let mut replies = vec![0u8; crate::cmds::expected_report_size()];
    replies[0] = mfr;
    replies[1] = memory_type;
    replies[2] = capacity_code;
    replies
}
