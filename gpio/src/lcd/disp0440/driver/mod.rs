//! Bus driver for one of the two HD44780-compatible controllers of a 4x40 display.
//!
//! A 4x40 module is built from two 2x40 controllers stacked on top of each other. Both share the
//! register select line and the 4-bit data bus, and each has its own enable line. A transfer only
//! reaches the controller whose enable line is pulsed, so every operation here names the target
//! [Chip].
//!
//! See [Disp0440Driver] for the protocol and [GpioDisp0440Driver] for the GPIO implementation.

mod gpio;

use crate::{GpioError, GpioResult};
pub use gpio::*;
use log::trace;
use std::fmt::Debug;

/// Clears the display RAM and returns the address counter to 0.
pub const CMD_CLEAR: u8 = 0b00000001;
/// Returns the address counter to 0 without clearing.
pub const CMD_HOME: u8 = 0b00000010;
/// Entry mode: increment the address after each write, no display shift.
pub const CMD_ENTRY_INCREMENT: u8 = 0b00000110;
/// Display on, cursor on.
pub const CMD_DISPLAY_ON_CURSOR: u8 = 0b00001110;
/// Display on, cursor off.
pub const CMD_DISPLAY_ON_NO_CURSOR: u8 = 0b00001100;
/// Function set base. Combine with the `FUNCTION_*` flags.
pub const CMD_FUNCTION_SET: u8 = 0b00100000;
/// Set DDRAM address. The address goes in the lower 7 bits.
pub const CMD_SET_DDRAM_ADDRESS: u8 = 0b10000000;

pub const FUNCTION_4BIT: u8 = 0b00000000;
pub const FUNCTION_2LINE: u8 = 0b00001000;
pub const FUNCTION_5X8_DOTS: u8 = 0b00000000;

/// DDRAM address of the first column of each controller row.
pub const ROW_BASE: [u8; 2] = [0x00, 0x40];

/// One of the two controllers of the display.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Chip {
    /// Upper controller, logical lines 0 and 1. Strobed by enable 1.
    A,
    /// Lower controller, logical lines 2 and 3. Strobed by enable 2.
    B,
}

impl Chip {
    pub const ALL: [Chip; 2] = [Chip::A, Chip::B];

    /// Gets the controller owning the given logical line.
    pub fn for_line(line: u8) -> Chip {
        if line < 2 { Chip::A } else { Chip::B }
    }

    pub fn index(self) -> usize {
        match self {
            Chip::A => 0,
            Chip::B => 1,
        }
    }
}

/// Level of the register select line during a transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegisterSelect {
    /// RS low, the byte is an instruction.
    Command,
    /// RS high, the byte is a character code.
    Data,
}

impl RegisterSelect {
    /// Gets the level the RS pin is driven to.
    pub fn level(self) -> bool {
        matches!(self, RegisterSelect::Data)
    }
}

/// GPIO lines the display is wired to.
///
/// The data pins are listed D4..D7 of the module, the first one carrying the least significant
/// bit of each nibble. The driver does not check the numbers, the GPIO backend refuses pins that
/// are claimed twice.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Disp0440Pins {
    pub rs: usize,
    pub en1: usize,
    pub en2: usize,
    pub data: [usize; 4],
}

impl Disp0440Pins {
    /// Creates the pin assignment in wiring order: register select, enable 1, enable 2, then
    /// the four data lines.
    pub const fn new(rs: usize, en1: usize, en2: usize, d0: usize, d1: usize, d2: usize, d3: usize) -> Self {
        Disp0440Pins {
            rs,
            en1,
            en2,
            data: [d0, d1, d2, d3],
        }
    }

    /// Gets the enable pin strobing the given controller.
    pub fn enable(&self, chip: Chip) -> usize {
        match chip {
            Chip::A => self.en1,
            Chip::B => self.en2,
        }
    }
}

/// The `Disp0440Driver` trait is the write-only 4-bit interface to the two controllers.
///
/// Implementations provide the four pin-level primitives and the power-on sequence. Everything
/// above that, the byte transfer and the instruction set, is built on top of them here.
///
/// # Timing
///
/// The controllers have no acknowledgement channel. A transfer is correct only if the enable
/// pulse is long enough and the controller gets time to execute before the next one, so
/// implementations must block for those delays. A transfer must never be abandoned halfway:
/// a controller that saw only the high nibble is out of sync with the bus.
pub trait Disp0440Driver: Debug {
    /// Runs the cold-start sequence on one controller, leaving it in 4-bit, 2-line, 5x8 mode
    /// with the display on, the cursor off and the display cleared. Must be called once per
    /// controller before anything else is sent to it.
    fn init(&mut self, chip: Chip) -> GpioResult<()>;

    /// Drives the register select line.
    fn set_register_select(&mut self, mode: RegisterSelect) -> GpioResult<()>;

    /// Drives the data lines to the low nibble of `value`.
    fn set_data_nibble(&mut self, value: u8) -> GpioResult<()>;

    /// Strobes the enable line of one controller, which latches the data lines on the falling
    /// edge, then waits for the controller to process it.
    fn pulse_enable(&mut self, chip: Chip) -> GpioResult<()>;

    /// Sends a full byte as two nibbles, high nibble first. The register select line is set
    /// once and stays put across both pulses.
    fn write_byte(&mut self, chip: Chip, mode: RegisterSelect, data: u8) -> GpioResult<()> {
        trace!("Sending {:?} {:08b} to {:?}", mode, data, chip);

        self.set_register_select(mode)?;
        self.set_data_nibble(data >> 4)?;
        self.pulse_enable(chip)?;
        self.set_data_nibble(data & 0x0F)?;
        self.pulse_enable(chip)
    }

    fn write_command(&mut self, chip: Chip, command: u8) -> GpioResult<()> {
        self.write_byte(chip, RegisterSelect::Command, command)
    }

    fn write_char(&mut self, chip: Chip, character: u8) -> GpioResult<()> {
        self.write_byte(chip, RegisterSelect::Data, character)
    }

    /// Clears the controller and sets its address counter to 0.
    fn clear_display(&mut self, chip: Chip) -> GpioResult<()> {
        self.write_command(chip, CMD_CLEAR)
    }

    /// Turns the display on, with or without the underline cursor.
    fn set_display_control(&mut self, chip: Chip, cursor_on: bool) -> GpioResult<()> {
        let command = if cursor_on {
            CMD_DISPLAY_ON_CURSOR
        } else {
            CMD_DISPLAY_ON_NO_CURSOR
        };
        self.write_command(chip, command)
    }

    /// 4-bit bus, two lines, 5x8 font.
    fn function_set(&mut self, chip: Chip) -> GpioResult<()> {
        self.write_command(chip, CMD_FUNCTION_SET | FUNCTION_4BIT | FUNCTION_2LINE | FUNCTION_5X8_DOTS)
    }

    fn set_entry_mode(&mut self, chip: Chip) -> GpioResult<()> {
        self.write_command(chip, CMD_ENTRY_INCREMENT)
    }

    /// Sets the DDRAM address, where the next character goes.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the address does not fit in 7 bits.
    fn set_ddram_address(&mut self, chip: Chip, address: u8) -> GpioResult<()> {
        if address > 0b01111111 {
            return Err(GpioError::InvalidArgument);
        }
        self.write_command(chip, CMD_SET_DDRAM_ADDRESS | address)
    }
}
