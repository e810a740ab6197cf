pub mod gpiod;
pub mod lcd;
pub mod mock;
pub mod raw;

use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("pin already in use")]
    AlreadyInUse,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        GpioError::Io(err.kind())
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

/// A source of GPIO output lines.
///
/// The LCD bus is write-only, so backends only hand out outputs. A claimed line stays
/// claimed until the returned handle is dropped.
pub trait GpioDriver: Debug {
    /// Gets the amount of GPIO pins available.
    fn count(&self) -> GpioResult<usize>;

    /// Claims the GPIO pin at the given index as an output.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the index is out of range.
    /// - `GpioError::AlreadyInUse` if the pin is already claimed.
    fn get_output(&self, index: usize) -> GpioResult<Box<dyn GpioOutput + '_>>;

    /// Claims the GPIO pins at the specific indices as an output bus.
    ///
    /// The first index is the least significant line of the bus.
    fn get_output_bus<const N: usize>(
        &self,
        indices: [usize; N],
    ) -> GpioResult<Box<dyn GpioBusOutput<N> + '_>>;
}

/// Checks the indices of a bus about to be claimed, before anything is touched.
///
/// # Errors
/// - `GpioError::InvalidArgument` if an index is not below `count`.
/// - `GpioError::AlreadyInUse` if an index is claimed already or listed twice.
pub(crate) fn check_bus_indices(
    indices: &[usize],
    count: usize,
    is_used: impl Fn(usize) -> bool,
) -> GpioResult<()> {
    if indices.iter().any(|&index| index >= count) {
        return Err(GpioError::InvalidArgument);
    }

    for (i, &index) in indices.iter().enumerate() {
        if is_used(index) || indices[..i].contains(&index) {
            return Err(GpioError::AlreadyInUse);
        }
    }
    Ok(())
}

pub trait GpioOutput: Debug {
    /// Writes the state of the GPIO pin.
    fn write(&self, value: bool) -> GpioResult<()>;
}

pub trait GpioBusOutput<const N: usize>: Debug {
    fn write(&self, values: &[bool; N]) -> GpioResult<()>;
}

impl dyn GpioBusOutput<4> + '_ {
    /// Writes the values to the GPIO pins in the bus.
    /// The values are written as a nibble, LSb first.
    pub fn write_nibble(&self, value: u8) -> GpioResult<()> {
        if value > 0b1111 {
            return Err(GpioError::InvalidArgument);
        }

        let mut values = [false; 4];
        for (i, v) in values.iter_mut().enumerate() {
            *v = (value & (1 << i)) != 0;
        }
        self.write(&values)
    }
}
