//! Character LCD drivers.
pub mod disp0440;
