use crate::lcd::disp0440::driver::{CMD_CLEAR, CMD_HOME, Chip, Disp0440Driver, Disp0440Pins, RegisterSelect};
use crate::{GpioBusOutput, GpioDriver, GpioOutput, GpioResult};
use log::{debug, trace};
use std::thread::sleep;
use std::time::Duration;

/// Delays the driver waits for. The defaults follow the HD44780 datasheet with some margin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Disp0440Timing {
    /// Wait before the first instruction after power-up (datasheet: more than 40 ms).
    pub power_on: Duration,
    /// How long the enable line is held high (datasheet: at least 450 ns).
    pub enable_pulse: Duration,
    /// Wait after each enable pulse (datasheet: 37 us execution time).
    pub command_settle: Duration,
    /// Extra wait after clear and home (datasheet: 1.52 ms).
    pub clear_settle: Duration,
}

impl Default for Disp0440Timing {
    fn default() -> Self {
        Disp0440Timing {
            power_on: Duration::from_millis(50),
            enable_pulse: Duration::from_micros(1),
            command_settle: Duration::from_micros(50),
            clear_settle: Duration::from_millis(2),
        }
    }
}

/// GpioDisp0440Driver drives both controllers of the display over seven GPIO output lines.
///
/// Every delay is a blocking sleep, so each call returns only once the controller is ready for
/// the next transfer.
#[derive(Debug)]
pub struct GpioDisp0440Driver<'a> {
    pins: Disp0440Pins,
    pin_rs: Box<dyn GpioOutput + 'a>,
    pin_en: [Box<dyn GpioOutput + 'a>; 2],
    data_bus: Box<dyn GpioBusOutput<4> + 'a>,
    timing: Disp0440Timing,
}

impl<'a> GpioDisp0440Driver<'a> {
    /// Claims the seven lines from the GPIO backend and drives them all low.
    ///
    /// # Errors
    /// - `GpioError::AlreadyInUse` if a pin is claimed elsewhere or listed twice.
    /// - `GpioError::InvalidArgument` if a pin does not exist on the backend.
    pub fn new<D: GpioDriver>(gpio: &'a D, pins: Disp0440Pins) -> GpioResult<Self> {
        let pin_rs = gpio.get_output(pins.rs)?;
        let pin_en = [gpio.get_output(pins.en1)?, gpio.get_output(pins.en2)?];
        let data_bus = gpio.get_output_bus(pins.data)?;

        for pin in &pin_en {
            pin.write(false)?;
        }
        pin_rs.write(false)?;
        data_bus.write_nibble(0)?;

        Ok(GpioDisp0440Driver {
            pins,
            pin_rs,
            pin_en,
            data_bus,
            timing: Disp0440Timing::default(),
        })
    }

    pub fn with_timing(mut self, timing: Disp0440Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn pins(&self) -> &Disp0440Pins {
        &self.pins
    }

    pub fn timing(&self) -> &Disp0440Timing {
        &self.timing
    }
}

impl Disp0440Driver for GpioDisp0440Driver<'_> {
    /// Initializes one controller by instruction, as the power-on reset circuit can't be relied on.
    ///
    /// After the power-on wait it sends `0011` three times, which puts the controller in 8-bit
    /// mode whatever state it was in, then `0010` to switch to 4-bit mode. Those four transfers
    /// are single nibbles. From there on every instruction is a full byte:
    /// - function set, 4-bit bus with 2 lines and the 5x8 font,
    /// - display on with the cursor off,
    /// - clear,
    /// - entry mode, incrementing without shift.
    fn init(&mut self, chip: Chip) -> GpioResult<()> {
        const SYNC_WAIT_FIRST: Duration = Duration::from_micros(4500);
        const SYNC_WAIT: Duration = Duration::from_micros(150);

        debug!("Initializing {:?} (enable pin {})", chip, self.pins.enable(chip));

        sleep(self.timing.power_on);

        self.set_register_select(RegisterSelect::Command)?;
        self.set_data_nibble(0b0011)?;
        self.pulse_enable(chip)?;
        sleep(SYNC_WAIT_FIRST);
        self.set_data_nibble(0b0011)?;
        self.pulse_enable(chip)?;
        sleep(SYNC_WAIT);
        self.set_data_nibble(0b0011)?;
        self.pulse_enable(chip)?;
        sleep(SYNC_WAIT);
        self.set_data_nibble(0b0010)?;
        self.pulse_enable(chip)?;

        self.function_set(chip)?;
        self.set_display_control(chip, false)?;
        self.clear_display(chip)?;
        self.set_entry_mode(chip)?;

        Ok(())
    }

    fn set_register_select(&mut self, mode: RegisterSelect) -> GpioResult<()> {
        self.pin_rs.write(mode.level())
    }

    fn set_data_nibble(&mut self, value: u8) -> GpioResult<()> {
        let nibble = value & 0x0F;
        trace!("Writing nibble: {:04b}", nibble);
        self.data_bus.write_nibble(nibble)
    }

    /// RS and the data lines are already written when E rises. The latency of a GPIO write
    /// covers the address setup time (tAS, about 40 ns), so no wait is inserted before it.
    fn pulse_enable(&mut self, chip: Chip) -> GpioResult<()> {
        let pin = &self.pin_en[chip.index()];
        pin.write(true)?;
        sleep(self.timing.enable_pulse);
        pin.write(false)?;
        sleep(self.timing.command_settle);
        Ok(())
    }

    fn write_command(&mut self, chip: Chip, command: u8) -> GpioResult<()> {
        self.write_byte(chip, RegisterSelect::Command, command)?;
        if command == CMD_CLEAR || command == CMD_HOME {
            sleep(self.timing.clear_settle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpioError;
    use crate::lcd::disp0440::driver::CMD_DISPLAY_ON_CURSOR;
    use crate::mock::{MockEvent, MockGpioDriver};
    use std::time::Instant;

    const PINS: Disp0440Pins = Disp0440Pins::new(0, 1, 2, 4, 5, 6, 7);

    fn fast_timing() -> Disp0440Timing {
        Disp0440Timing {
            power_on: Duration::from_millis(1),
            ..Disp0440Timing::default()
        }
    }

    /// A nibble latched by a controller on the falling edge of its enable line.
    #[derive(Debug, Eq, PartialEq)]
    struct Latch {
        enable: usize,
        rs: bool,
        nibble: u8,
        high_since: Instant,
        low_at: Instant,
    }

    fn latches(events: &[MockEvent], levels: &mut [bool; 8]) -> Vec<Latch> {
        let mut latches = Vec::new();
        let mut high_since = [None; 8];

        for event in events {
            let was = levels[event.pin];
            levels[event.pin] = event.level;

            if event.pin == PINS.en1 || event.pin == PINS.en2 {
                if !was && event.level {
                    high_since[event.pin] = Some(event.at);
                }
                if was && !event.level {
                    let nibble = PINS
                        .data
                        .iter()
                        .enumerate()
                        .fold(0, |acc, (bit, &pin)| acc | ((levels[pin] as u8) << bit));
                    latches.push(Latch {
                        enable: event.pin,
                        rs: levels[PINS.rs],
                        nibble,
                        high_since: high_since[event.pin].take().unwrap(),
                        low_at: event.at,
                    });
                }
            } else {
                // Nothing else may change while a controller is sampling
                assert!(!levels[PINS.en1] && !levels[PINS.en2], "pin {} changed during a pulse", event.pin);
            }
        }

        latches
    }

    #[test]
    fn write_byte_waveform() {
        let gpio = MockGpioDriver::new(8);
        let mut driver = GpioDisp0440Driver::new(&gpio, PINS).unwrap();
        gpio.clear_events();

        driver.write_byte(Chip::A, RegisterSelect::Data, 0xA5).unwrap();

        let mut levels = [false; 8];
        let latches = latches(&gpio.events(), &mut levels);
        assert_eq!(latches.len(), 2);
        assert_eq!((latches[0].enable, latches[0].rs, latches[0].nibble), (PINS.en1, true, 0xA));
        assert_eq!((latches[1].enable, latches[1].rs, latches[1].nibble), (PINS.en1, true, 0x5));
        assert!(!gpio.level(PINS.en2));
    }

    #[test]
    fn register_select_is_set_before_first_pulse() {
        let gpio = MockGpioDriver::new(8);
        let mut driver = GpioDisp0440Driver::new(&gpio, PINS).unwrap();
        driver.write_char(Chip::B, b'x').unwrap();
        gpio.clear_events();

        driver.write_command(Chip::B, CMD_DISPLAY_ON_CURSOR).unwrap();

        let events = gpio.events();
        let rs = events.iter().position(|e| e.pin == PINS.rs).unwrap();
        let first_enable = events.iter().position(|e| e.pin == PINS.en2).unwrap();
        assert!(rs < first_enable);
        assert!(!events[rs].level);
        assert_eq!(events.iter().filter(|e| e.pin == PINS.rs).count(), 1);
    }

    #[test]
    fn bus_lines_are_written_before_enable_rises() {
        let gpio = MockGpioDriver::new(8);
        let mut driver = GpioDisp0440Driver::new(&gpio, PINS).unwrap();
        gpio.clear_events();

        driver.write_byte(Chip::A, RegisterSelect::Data, 0xA5).unwrap();

        let events = gpio.events();
        let rises: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.pin == PINS.en1 && e.level)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(rises.len(), 2);
        assert_eq!(events[0].pin, PINS.rs);
        for &rise in &rises {
            let setup = &events[rise - 4..rise];
            assert!(setup.iter().all(|e| PINS.data.contains(&e.pin) && e.at <= events[rise].at));
        }
    }

    #[test]
    fn enable_pulse_is_held_for_minimum_width() {
        let gpio = MockGpioDriver::new(8);
        let timing = Disp0440Timing {
            enable_pulse: Duration::from_micros(200),
            ..fast_timing()
        };
        let mut driver = GpioDisp0440Driver::new(&gpio, PINS).unwrap().with_timing(timing);
        gpio.clear_events();

        driver.write_char(Chip::A, b'Q').unwrap();

        let mut levels = [false; 8];
        for latch in latches(&gpio.events(), &mut levels) {
            assert!(latch.low_at - latch.high_since >= timing.enable_pulse);
        }
    }

    #[test]
    fn consecutive_pulses_are_separated_by_settle_time() {
        let gpio = MockGpioDriver::new(8);
        let mut driver = GpioDisp0440Driver::new(&gpio, PINS).unwrap().with_timing(fast_timing());
        gpio.clear_events();

        driver.write_char(Chip::A, b'1').unwrap();
        driver.write_char(Chip::A, b'2').unwrap();

        let mut levels = [false; 8];
        let latches = latches(&gpio.events(), &mut levels);
        assert_eq!(latches.len(), 4);
        for pair in latches.windows(2) {
            assert!(pair[1].high_since - pair[0].low_at >= fast_timing().command_settle);
        }
    }

    #[test]
    fn init_sends_sync_nibbles_then_configuration() {
        let gpio = MockGpioDriver::new(8);
        let mut driver = GpioDisp0440Driver::new(&gpio, PINS).unwrap().with_timing(fast_timing());
        gpio.clear_events();

        driver.init(Chip::B).unwrap();

        let mut levels = [false; 8];
        let latches = latches(&gpio.events(), &mut levels);
        let nibbles: Vec<u8> = latches.iter().map(|l| l.nibble).collect();
        assert_eq!(
            nibbles,
            [0x3, 0x3, 0x3, 0x2, 0x2, 0x8, 0x0, 0xC, 0x0, 0x1, 0x0, 0x6]
        );
        assert!(latches.iter().all(|l| l.enable == PINS.en2 && !l.rs));
    }

    #[test]
    fn clear_waits_for_the_controller() {
        let gpio = MockGpioDriver::new(8);
        let timing = Disp0440Timing {
            clear_settle: Duration::from_millis(5),
            ..fast_timing()
        };
        let mut driver = GpioDisp0440Driver::new(&gpio, PINS).unwrap().with_timing(timing);

        let start = Instant::now();
        driver.clear_display(Chip::A).unwrap();

        assert!(start.elapsed() >= timing.clear_settle);
    }

    #[test]
    fn new_claims_all_seven_pins() {
        let gpio = MockGpioDriver::new(8);
        let _driver = GpioDisp0440Driver::new(&gpio, PINS).unwrap();

        for pin in [PINS.rs, PINS.en1, PINS.en2, 4, 5, 6, 7] {
            assert_eq!(gpio.get_output(pin).unwrap_err(), GpioError::AlreadyInUse);
        }
        assert!(gpio.get_output(3).is_ok());
    }

    #[test]
    fn new_rejects_shared_pins() {
        let gpio = MockGpioDriver::new(8);
        let pins = Disp0440Pins::new(0, 1, 1, 4, 5, 6, 7);

        assert_eq!(GpioDisp0440Driver::new(&gpio, pins).unwrap_err(), GpioError::AlreadyInUse);
    }
}
