mod config;

use std::io::{self, BufRead};
use dotenv::dotenv;
use log::{debug, info};
use sysinfo::System;
use time::OffsetDateTime;
use time::macros::format_description;
use disp0440_gpio::GpioDriver;
use disp0440_gpio::gpiod::GpiodDriver;
use disp0440_gpio::lcd::disp0440::driver::{Disp0440Driver, GpioDisp0440Driver};
use disp0440_gpio::lcd::disp0440::{COLUMNS, Disp0440, LINES};
use disp0440_gpio::mock::MockGpioDriver;
use disp0440_gpio::raw::RawGpioDriver;
use crate::config::{Backend, Config};

fn main() -> eyre::Result<()> {
    // Initialize environment and logger
    dotenv().ok();
    pretty_env_logger::init();

    info!("disp0440 starting...");

    let config = match Config::try_load()? {
        Some(config) => {
            info!("Config loaded.");
            config
        }
        None => {
            info!("Config file not found. Reading pins from env");
            Config::from_env()?
        }
    };

    info!(
        "LCD @ RS: {}, E1: {}, E2: {}, Data: {:?}",
        config.pins.rs, config.pins.en1, config.pins.en2, config.pins.data
    );

    debug!("Initializing {:?} GPIO backend...", config.backend);
    match config.backend {
        Backend::Gpiomem => run(&RawGpioDriver::new_gpiomem()?, &config),
        Backend::Mem => run(&RawGpioDriver::new_mem()?, &config),
        Backend::Gpiod => run(&GpiodDriver::open(&config.gpio_chip)?, &config),
        Backend::Mock => {
            let gpio = MockGpioDriver::new(64);
            run(&gpio, &config)?;
            info!("Mock backend recorded {} pin changes.", gpio.events().len());
            Ok(())
        }
    }
}

fn run<D: GpioDriver>(gpio: &D, config: &Config) -> eyre::Result<()> {
    debug!("{:?} initialized.", gpio);

    debug!("Initializing LCD driver...");
    let driver = GpioDisp0440Driver::new(gpio, config.pins())?.with_timing(config.timing());
    let mut lcd = Disp0440::new(driver);
    lcd.init()?;
    debug!("{:?} initialized.", lcd.driver());

    show_banner(&mut lcd)?;

    info!("Streaming stdin to the display...");
    lcd.set_cursor(LINES - 1, 0)?;
    for line in io::stdin().lock().lines() {
        let line = line?;
        lcd.print(&timestamp())?;
        lcd.print(&line)?;
        finish_line(&mut lcd)?;
    }

    info!("Input closed.");
    Ok(())
}

fn show_banner<D: Disp0440Driver>(lcd: &mut Disp0440<D>) -> eyre::Result<()> {
    const UNKNOWN_STR: &str = "???";
    const TITLE: &str = concat!("disp0440 v.", env!("CARGO_PKG_VERSION"));

    let title = truncate(TITLE, COLUMNS as usize);
    lcd.write_message(0, centered_col(&title), &title)?;

    let host = System::host_name();
    let host = format!("Host {}", host.as_deref().unwrap_or(UNKNOWN_STR));
    lcd.write_message(1, 0, &truncate(&host, COLUMNS as usize))?;

    let os = System::long_os_version();
    lcd.write_message(2, 0, &truncate(os.as_deref().unwrap_or(UNKNOWN_STR), COLUMNS as usize))?;

    Ok(())
}

/// Column at which `text` starts when centered on a line.
fn centered_col(text: &str) -> u8 {
    let len = u8::try_from(text.len()).unwrap_or(u8::MAX);
    COLUMNS.saturating_sub(len) / 2
}

/// Pads the rest of the current line with blanks so the next text starts on a fresh line,
/// rolling the display up once the last line is full.
fn finish_line<D: Disp0440Driver>(lcd: &mut Disp0440<D>) -> eyre::Result<()> {
    let (_, col) = lcd.cursor();
    if col != 0 {
        for _ in col..COLUMNS {
            lcd.write_char(b' ')?;
        }
    }
    Ok(())
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[hour]:[minute]:[second] "))
        .unwrap_or_default()
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
