//! 4x40 character LCD made of two stacked 2x40 HD44780-compatible controllers.
//!
//! [Disp0440] presents the module as a single display of [LINES] lines by [COLUMNS] columns.
//! Lines 0 and 1 live on the upper controller, lines 2 and 3 on the lower one; the facade picks
//! the controller and its DDRAM address for every write, so text flows across the seam between
//! them like on any other line break.
//!
//! The bus is write-only. A shadow copy of all 160 cells is kept so the display can scroll up
//! when text runs past the last cell, which the controllers can't do on their own.
//!
//! ```no_run
//! use disp0440_gpio::lcd::disp0440::Disp0440;
//! use disp0440_gpio::lcd::disp0440::driver::{Disp0440Pins, GpioDisp0440Driver};
//! use disp0440_gpio::raw::RawGpioDriver;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let gpio = RawGpioDriver::new_gpiomem()?;
//! let pins = Disp0440Pins::new(7, 8, 25, 24, 23, 18, 15);
//! let mut lcd = Disp0440::new(GpioDisp0440Driver::new(&gpio, pins)?);
//! lcd.init()?;
//! lcd.write_message(1, 14, "Hello, world!")?;
//! # Ok(())
//! # }
//! ```

pub mod driver;

use crate::GpioError;
use driver::{Chip, Disp0440Driver, ROW_BASE};
use log::{debug, warn};
use thiserror::Error;

/// Number of logical lines.
pub const LINES: u8 = 4;
/// Number of columns per line.
pub const COLUMNS: u8 = 40;

const CELLS: usize = LINES as usize * COLUMNS as usize;
const BLANK: u8 = b' ';

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum Disp0440Error {
    #[error("position ({line}, {col}) is outside the 4x40 display")]
    OutOfRange { line: u8, col: u8 },
    #[error("display is not initialized")]
    NotInitialized,
    #[error(transparent)]
    Gpio(#[from] GpioError),
}

pub type Disp0440Result<T> = Result<T, Disp0440Error>;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Disp0440State {
    /// Constructed, nothing sent to the controllers yet.
    #[default]
    Uninitialized,
    /// Both controllers went through their init sequence.
    Ready,
}

/// Line and column addressed text output over both controllers.
#[derive(Debug)]
pub struct Disp0440<D: Disp0440Driver> {
    driver: D,
    state: Disp0440State,
    line: u8,
    col: u8,
    chip: Chip,
    cursor_visible: bool,
    screen: [u8; CELLS],
}

impl<D: Disp0440Driver> Disp0440<D> {
    /// Wraps a bus driver. Nothing is sent until [Self::init].
    pub fn new(driver: D) -> Self {
        Disp0440 {
            driver,
            state: Disp0440State::Uninitialized,
            line: 0,
            col: 0,
            chip: Chip::A,
            cursor_visible: false,
            screen: [BLANK; CELLS],
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    pub fn state(&self) -> Disp0440State {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == Disp0440State::Ready
    }

    /// Gets the cursor position as `(line, col)`.
    pub fn cursor(&self) -> (u8, u8) {
        (self.line, self.col)
    }

    pub fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    /// Gets the shadow content of one line, or `None` past the last line.
    pub fn line(&self, line: u8) -> Option<&[u8]> {
        if line >= LINES {
            return None;
        }
        let start = Self::index(line, 0);
        Some(&self.screen[start..start + COLUMNS as usize])
    }

    /// Gets the shadow content of one cell.
    pub fn cell(&self, line: u8, col: u8) -> Option<u8> {
        if line >= LINES || col >= COLUMNS {
            return None;
        }
        Some(self.screen[Self::index(line, col)])
    }

    /// Initializes both controllers, blanks the shadow buffer and homes the cursor.
    ///
    /// Can be called again at any time to recover a display that lost power. If a controller
    /// fails to initialize, the display is left uninitialized with a blank shadow buffer.
    pub fn init(&mut self) -> Disp0440Result<()> {
        self.state = Disp0440State::Uninitialized;
        self.reset_state();
        self.cursor_visible = false;

        for chip in Chip::ALL {
            self.driver.init(chip)?;
        }

        self.state = Disp0440State::Ready;
        debug!("Display ready");
        Ok(())
    }

    /// Clears both controllers and the shadow buffer, and homes the cursor.
    pub fn clear(&mut self) -> Disp0440Result<()> {
        self.ensure_ready()?;

        for chip in Chip::ALL {
            self.driver.clear_display(chip)?;
        }
        if self.cursor_visible && self.chip != Chip::A {
            self.switch_cursor(self.chip, Chip::A)?;
        }

        self.reset_state();
        debug!("Display cleared");
        Ok(())
    }

    /// Moves the cursor to the given position.
    ///
    /// # Errors
    /// - `Disp0440Error::OutOfRange` if `line >= 4` or `col >= 40`. Nothing is sent then.
    pub fn set_cursor(&mut self, line: u8, col: u8) -> Disp0440Result<()> {
        self.ensure_ready()?;

        if line >= LINES || col >= COLUMNS {
            return Err(Disp0440Error::OutOfRange { line, col });
        }

        self.move_to(line, col)?;
        Ok(())
    }

    /// Shows or hides the underline cursor. Only the controller holding the cursor shows it.
    pub fn set_cursor_visible(&mut self, visible: bool) -> Disp0440Result<()> {
        self.ensure_ready()?;

        self.driver.set_display_control(self.chip, visible)?;
        self.cursor_visible = visible;
        Ok(())
    }

    /// Writes one character code at the cursor and advances it.
    ///
    /// Past the end of a line the cursor continues on the next one. Past the end of the last
    /// line the display rolls up by one line and the cursor lands at the start of the last line.
    pub fn write_char(&mut self, character: u8) -> Disp0440Result<()> {
        self.ensure_ready()?;

        self.driver.write_char(self.chip, character)?;
        self.screen[Self::index(self.line, self.col)] = character;

        if self.col + 1 < COLUMNS {
            // The controller already moved its address counter
            self.col += 1;
        } else if self.line + 1 < LINES {
            self.move_to(self.line + 1, 0)?;
        } else {
            self.roll_up()?;
        }
        Ok(())
    }

    /// Writes text starting at the given position.
    pub fn write_message(&mut self, line: u8, col: u8, text: &str) -> Disp0440Result<()> {
        self.set_cursor(line, col)?;
        self.print(text)
    }

    /// Writes text at the cursor. Characters outside ASCII are shown as `?`.
    pub fn print(&mut self, text: &str) -> Disp0440Result<()> {
        self.ensure_ready()?;

        for c in text.chars() {
            if c.is_ascii() {
                self.write_char(c as u8)?;
            } else {
                warn!("Non-ASCII character: {}", c);
                self.write_char(b'?')?;
            }
        }
        Ok(())
    }

    /// Scrolls the whole display up by one line.
    ///
    /// The top line is dropped and the last line is blanked. The controllers can't move their
    /// content, so every cell is rewritten from the shadow buffer. The cursor ends at the start of
    /// the last line.
    pub fn roll_up(&mut self) -> Disp0440Result<()> {
        self.ensure_ready()?;

        debug!("Rolling up");
        let width = COLUMNS as usize;
        self.screen.copy_within(width.., 0);
        self.screen[CELLS - width..].fill(BLANK);

        for line in 0..LINES {
            self.move_to(line, 0)?;
            let start = Self::index(line, 0);
            for i in start..start + width {
                self.driver.write_char(self.chip, self.screen[i])?;
            }
        }

        self.move_to(LINES - 1, 0)?;
        Ok(())
    }

    fn index(line: u8, col: u8) -> usize {
        line as usize * COLUMNS as usize + col as usize
    }

    fn ensure_ready(&self) -> Disp0440Result<()> {
        match self.state {
            Disp0440State::Ready => Ok(()),
            Disp0440State::Uninitialized => Err(Disp0440Error::NotInitialized),
        }
    }

    /// Both controllers have just been cleared, so their address counters are at 0.
    fn reset_state(&mut self) {
        self.screen.fill(BLANK);
        self.line = 0;
        self.col = 0;
        self.chip = Chip::A;
    }

    /// Points the owning controller at a position already known to be on screen.
    fn move_to(&mut self, line: u8, col: u8) -> Disp0440Result<()> {
        let chip = Chip::for_line(line);
        let address = ROW_BASE[(line % 2) as usize] + col;
        self.driver.set_ddram_address(chip, address)?;

        if self.cursor_visible && chip != self.chip {
            self.switch_cursor(self.chip, chip)?;
        }

        self.line = line;
        self.col = col;
        self.chip = chip;
        Ok(())
    }

    fn switch_cursor(&mut self, from: Chip, to: Chip) -> Disp0440Result<()> {
        self.driver.set_display_control(from, false)?;
        self.driver.set_display_control(to, true)?;
        Ok(())
    }
}
