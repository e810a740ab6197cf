//! In-memory GPIO backend that records every level change.
//!
//! Nothing is driven electrically; each write is stored as a [MockEvent] with the instant it
//! happened, so the waveform a driver produces can be inspected afterwards. Used by the tests
//! and by dry runs on machines without GPIO.
use crate::{check_bus_indices, GpioBusOutput, GpioDriver, GpioError, GpioOutput, GpioResult};
use bitvec::vec::BitVec;
use log::trace;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::AtomicU8;
use std::time::Instant;

/// A single recorded pin write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MockEvent {
    pub pin: usize,
    pub level: bool,
    pub at: Instant,
}

pub struct MockGpioDriver {
    used_pins: BitVec<AtomicU8>,
    levels: RefCell<BitVec>,
    events: RefCell<Vec<MockEvent>>,
}

impl MockGpioDriver {
    /// Creates a mock chip with `pin_count` lines, all low.
    pub fn new(pin_count: usize) -> Self {
        MockGpioDriver {
            used_pins: BitVec::repeat(false, pin_count),
            levels: RefCell::new(BitVec::repeat(false, pin_count)),
            events: RefCell::new(Vec::new()),
        }
    }

    /// Returns all events recorded so far, oldest first.
    pub fn events(&self) -> Vec<MockEvent> {
        self.events.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    /// Current level of the given pin.
    pub fn level(&self, pin: usize) -> bool {
        self.levels.borrow().get(pin).is_some_and(|bit| *bit)
    }

    fn record(&self, pin: usize, level: bool, at: Instant) {
        trace!("Mock pin {} -> {}", pin, level);
        self.levels.borrow_mut().set(pin, level);
        self.events.borrow_mut().push(MockEvent { pin, level, at });
    }
}

impl Debug for MockGpioDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockGpioDriver({})", self.used_pins.len())
    }
}

impl GpioDriver for MockGpioDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.used_pins.len())
    }

    fn get_output(&self, index: usize) -> GpioResult<Box<dyn GpioOutput + '_>> {
        if index >= self.count()? {
            return Err(GpioError::InvalidArgument);
        }

        if self.used_pins[index] {
            return Err(GpioError::AlreadyInUse);
        }

        self.used_pins.set_aliased(index, true);

        Ok(Box::new(MockOutput {
            driver: self,
            pin_index: index,
        }))
    }

    fn get_output_bus<const N: usize>(
        &self,
        indices: [usize; N],
    ) -> GpioResult<Box<dyn GpioBusOutput<N> + '_>> {
        check_bus_indices(&indices, self.count()?, |index| self.used_pins[index])?;

        for &index in &indices {
            self.used_pins.set_aliased(index, true);
        }

        Ok(Box::new(MockBusOutput {
            driver: self,
            pin_indices: indices,
        }))
    }
}

struct MockOutput<'a> {
    driver: &'a MockGpioDriver,
    pin_index: usize,
}

impl Debug for MockOutput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}][output]", self.driver, self.pin_index)
    }
}

impl GpioOutput for MockOutput<'_> {
    fn write(&self, value: bool) -> GpioResult<()> {
        self.driver.record(self.pin_index, value, Instant::now());
        Ok(())
    }
}

impl Drop for MockOutput<'_> {
    fn drop(&mut self) {
        self.driver.used_pins.set_aliased(self.pin_index, false);
    }
}

struct MockBusOutput<'a, const N: usize> {
    driver: &'a MockGpioDriver,
    pin_indices: [usize; N],
}

impl<const N: usize> Debug for MockBusOutput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?}[output]", self.driver, self.pin_indices)
    }
}

impl<const N: usize> GpioBusOutput<N> for MockBusOutput<'_, N> {
    fn write(&self, values: &[bool; N]) -> GpioResult<()> {
        let at = Instant::now();
        for (&pin_index, &value) in self.pin_indices.iter().zip(values) {
            self.driver.record(pin_index, value, at);
        }
        Ok(())
    }
}

impl<const N: usize> Drop for MockBusOutput<'_, N> {
    fn drop(&mut self) {
        for &index in &self.pin_indices {
            self.driver.used_pins.set_aliased(index, false);
        }
    }
}
