//! Register-level backend for the BCM283x GPIO block, mapped through `/dev/gpiomem` or `/dev/mem`.
use crate::{check_bus_indices, GpioBusOutput, GpioDriver, GpioError, GpioOutput, GpioResult};
use bitvec::vec::BitVec;
use log::trace;
use memmap2::{MmapOptions, MmapRaw};
use std::fmt::{Debug, Formatter};
use std::fs::OpenOptions;
use std::sync::atomic::AtomicU8;

pub struct RawGpioDriver {
    mmap: MmapRaw,
    used_pins: BitVec<AtomicU8>,
}

impl RawGpioDriver {
    // 0x7E200000 on the bus, 0xFE200000 on the BCM2711
    const GPIO_BASE: u32 = 0x3F200000;

    const PIN_COUNT: usize = 58;

    const FSEL_INPUT: u32 = 0b000;
    const FSEL_OUTPUT: u32 = 0b001;

    // Register offsets, in bytes
    const GPSET0: usize = 0x1C;
    const GPCLR0: usize = 0x28;

    fn create(path: &str, offset: u64) -> GpioResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;

        let mmap = MmapOptions::new()
            .offset(offset)
            .len(4096)
            .map_raw(&file)?;

        Ok(RawGpioDriver {
            mmap,
            used_pins: BitVec::repeat(false, Self::PIN_COUNT),
        })
    }

    /// Maps the GPIO block through `/dev/gpiomem`, which needs no root access and already
    /// starts at the GPIO registers.
    pub fn new_gpiomem() -> GpioResult<Self> {
        Self::create("/dev/gpiomem", 0)
    }

    /// Maps the GPIO block through `/dev/mem` at the physical peripheral address.
    pub fn new_mem() -> GpioResult<Self> {
        Self::create("/dev/mem", Self::GPIO_BASE as u64)
    }

    fn check_index(pin_index: usize) -> GpioResult<()> {
        if pin_index >= Self::PIN_COUNT {
            return Err(GpioError::InvalidArgument);
        }
        Ok(())
    }

    pub(crate) fn raw_set_pin_function(&self, pin_index: usize, function: u32) -> GpioResult<()> {
        Self::check_index(pin_index)?;

        let mmap = self.mmap.as_mut_ptr() as *mut u32;
        // GPFSELn register
        let register_ptr = unsafe { mmap.add(pin_index / 10) };
        let shift = (pin_index % 10) * 3;

        let mut register_value = unsafe { register_ptr.read_volatile() };
        register_value &= !(0b111 << shift);
        register_value |= function << shift;
        unsafe { register_ptr.write_volatile(register_value) };

        Ok(())
    }

    pub(crate) fn raw_set_pin_output(&self, pin_index: usize, high: bool) -> GpioResult<()> {
        Self::check_index(pin_index)?;

        let mmap = self.mmap.as_mut_ptr() as *mut u32;
        // GPSETn/GPCLRn register
        let base = (if high { Self::GPSET0 } else { Self::GPCLR0 }) / 4;
        let register_ptr = unsafe { mmap.add(base + pin_index / 32) };
        let shift = pin_index % 32;

        unsafe { register_ptr.write_volatile(1 << shift) };

        Ok(())
    }

    fn claim(&self, pin_index: usize) -> GpioResult<()> {
        self.used_pins.set_aliased(pin_index, true);
        self.raw_set_pin_output(pin_index, false)?;
        self.raw_set_pin_function(pin_index, Self::FSEL_OUTPUT)?;
        trace!("Claimed pin {} as output", pin_index);
        Ok(())
    }

    fn release(&self, pin_index: usize) {
        // Leave released lines floating
        _ = self.raw_set_pin_function(pin_index, Self::FSEL_INPUT);
        self.used_pins.set_aliased(pin_index, false);
    }
}

impl Debug for RawGpioDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawGpioDriver({:?})", self.mmap.as_ptr().addr())
    }
}

impl GpioDriver for RawGpioDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(Self::PIN_COUNT)
    }

    fn get_output(&self, index: usize) -> GpioResult<Box<dyn GpioOutput + '_>> {
        if index >= self.count()? {
            return Err(GpioError::InvalidArgument);
        }

        if self.used_pins[index] {
            return Err(GpioError::AlreadyInUse);
        }

        self.claim(index)?;

        Ok(Box::new(RawGpioOutput {
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
            self.claim(index)?;
        }

        Ok(Box::new(RawGpioBusOutput {
            driver: self,
            pin_indices: indices,
        }))
    }
}

struct RawGpioOutput<'a> {
    driver: &'a RawGpioDriver,
    pin_index: usize,
}

impl Debug for RawGpioOutput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}][output]", self.driver, self.pin_index)
    }
}

impl GpioOutput for RawGpioOutput<'_> {
    fn write(&self, value: bool) -> GpioResult<()> {
        self.driver.raw_set_pin_output(self.pin_index, value)
    }
}

impl Drop for RawGpioOutput<'_> {
    fn drop(&mut self) {
        self.driver.release(self.pin_index);
    }
}

struct RawGpioBusOutput<'a, const N: usize> {
    driver: &'a RawGpioDriver,
    pin_indices: [usize; N],
}

impl<const N: usize> Debug for RawGpioBusOutput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?}[output]", self.driver, self.pin_indices)
    }
}

impl<const N: usize> GpioBusOutput<N> for RawGpioBusOutput<'_, N> {
    fn write(&self, values: &[bool; N]) -> GpioResult<()> {
        for (&pin_index, &value) in self.pin_indices.iter().zip(values) {
            self.driver.raw_set_pin_output(pin_index, value)?;
        }
        Ok(())
    }
}

impl<const N: usize> Drop for RawGpioBusOutput<'_, N> {
    fn drop(&mut self) {
        for &pin_index in &self.pin_indices {
            self.driver.release(pin_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Same check `get_output_bus` runs, without mapping the registers
    fn check(used_pins: &BitVec<AtomicU8>, indices: [usize; 4]) -> GpioResult<()> {
        check_bus_indices(&indices, RawGpioDriver::PIN_COUNT, |index| used_pins[index])
    }

    #[test]
    fn bus_listing_a_pin_twice_is_rejected() {
        let used_pins = BitVec::repeat(false, RawGpioDriver::PIN_COUNT);

        assert_eq!(check(&used_pins, [4, 4, 5, 6]), Err(GpioError::AlreadyInUse));
        assert_eq!(check(&used_pins, [4, 5, 6, 7]), Ok(()));
    }

    #[test]
    fn bus_with_claimed_or_missing_pin_is_rejected() {
        let used_pins: BitVec<AtomicU8> = BitVec::repeat(false, RawGpioDriver::PIN_COUNT);
        used_pins.set_aliased(5, true);

        assert_eq!(check(&used_pins, [4, 5, 6, 7]), Err(GpioError::AlreadyInUse));
        assert_eq!(check(&used_pins, [20, 21, 22, 58]), Err(GpioError::InvalidArgument));
    }
}
