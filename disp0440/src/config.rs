use std::env::{var, var_os};
use std::ffi::OsStr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use disp0440_gpio::lcd::disp0440::driver::{Disp0440Pins, Disp0440Timing};
use serde::{Deserialize, Serialize};

/// Where the GPIO lines come from.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Default, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Registers mapped through `/dev/gpiomem`.
    #[default]
    Gpiomem,
    /// Registers mapped through `/dev/mem`, needs root.
    Mem,
    /// Linux GPIO character device.
    Gpiod,
    /// Nothing is driven, pin changes are only recorded.
    Mock,
}

impl FromStr for Backend {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpiomem" => Ok(Backend::Gpiomem),
            "mem" => Ok(Backend::Mem),
            "gpiod" => Ok(Backend::Gpiod),
            "mock" => Ok(Backend::Mock),
            other => Err(eyre::eyre!("Unknown GPIO backend: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
pub struct PinConfig {
    pub rs: usize,
    pub en1: usize,
    pub en2: usize,
    /// D4..D7 of the module, in that order.
    pub data: [usize; 4],
}

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_gpio_chip")]
    pub gpio_chip: String,
    pub pins: PinConfig,
    #[serde(default)]
    pub enable_pulse_us: Option<u64>,
    #[serde(default)]
    pub command_settle_us: Option<u64>,
}

fn default_gpio_chip() -> String {
    "/dev/gpiochip0".to_string()
}

pub fn parse_pin_bus(pin_str: &str) -> eyre::Result<[usize; 4]> {
    pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre::eyre!("Invalid number of data pins"))
}

fn optional_var<T: FromStr>(name: &str) -> eyre::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Ok(value) => Ok(Some(value.trim().parse()?)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Loads the JSON config file named by `CONFIG_FILE`, `disp0440.json` by default.
    ///
    /// Returns `None` if the file doesn't exist.
    pub fn try_load() -> eyre::Result<Option<Self>> {
        let config_str = var_os("CONFIG_FILE");
        let config_str: &OsStr = config_str.as_deref().unwrap_or(OsStr::new("disp0440.json"));
        let config_path = Path::new(config_str);
        if !config_path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(config_path)?;
        let reader = std::io::BufReader::new(file);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    /// Reads the config from `DISP0440_*` environment variables.
    pub fn from_env() -> eyre::Result<Self> {
        let backend = match var("DISP0440_BACKEND") {
            Ok(backend) => backend.parse()?,
            Err(_) => Backend::default(),
        };

        Ok(Config {
            backend,
            gpio_chip: var("DISP0440_GPIO_CHIP").unwrap_or_else(|_| default_gpio_chip()),
            pins: PinConfig {
                rs: var("DISP0440_PIN_RS")?.trim().parse()?,
                en1: var("DISP0440_PIN_EN1")?.trim().parse()?,
                en2: var("DISP0440_PIN_EN2")?.trim().parse()?,
                data: parse_pin_bus(&var("DISP0440_PINS_DATA")?)?,
            },
            enable_pulse_us: optional_var("DISP0440_ENABLE_PULSE_US")?,
            command_settle_us: optional_var("DISP0440_COMMAND_SETTLE_US")?,
        })
    }

    pub fn pins(&self) -> Disp0440Pins {
        let [d0, d1, d2, d3] = self.pins.data;
        Disp0440Pins::new(self.pins.rs, self.pins.en1, self.pins.en2, d0, d1, d2, d3)
    }

    /// Datasheet timing, with the optional overrides applied.
    pub fn timing(&self) -> Disp0440Timing {
        let mut timing = Disp0440Timing::default();
        if let Some(us) = self.enable_pulse_us {
            timing.enable_pulse = Duration::from_micros(us);
        }
        if let Some(us) = self.command_settle_us {
            timing.command_settle = Duration::from_micros(us);
        }
        timing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_bus_accepts_mixed_separators() {
        assert_eq!(parse_pin_bus("24, 23;18 15").unwrap(), [24, 23, 18, 15]);
    }

    #[test]
    fn pin_bus_needs_four_pins() {
        assert!(parse_pin_bus("1,2,3").is_err());
        assert!(parse_pin_bus("1,2,3,4,5").is_err());
        assert!(parse_pin_bus("1,2,x,4").is_err());
    }

    #[test]
    fn config_from_json_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "pins": { "rs": 7, "en1": 8, "en2": 25, "data": [24, 23, 18, 15] } }"#,
        )
        .unwrap();

        assert_eq!(config.backend, Backend::Gpiomem);
        assert_eq!(config.gpio_chip, "/dev/gpiochip0");
        assert_eq!(config.pins(), Disp0440Pins::new(7, 8, 25, 24, 23, 18, 15));
        assert_eq!(config.timing(), Disp0440Timing::default());
    }

    #[test]
    fn config_timing_overrides() {
        let config: Config = serde_json::from_str(
            r#"{
                "backend": "mock",
                "pins": { "rs": 0, "en1": 1, "en2": 2, "data": [3, 4, 5, 6] },
                "enable_pulse_us": 5,
                "command_settle_us": 100
            }"#,
        )
        .unwrap();

        assert_eq!(config.backend, Backend::Mock);
        assert_eq!(config.timing().enable_pulse, Duration::from_micros(5));
        assert_eq!(config.timing().command_settle, Duration::from_micros(100));
        assert_eq!(config.timing().clear_settle, Disp0440Timing::default().clear_settle);
    }

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("GPIOD".parse::<Backend>().unwrap(), Backend::Gpiod);
        assert_eq!(" mem ".parse::<Backend>().unwrap(), Backend::Mem);
        assert!("spi".parse::<Backend>().is_err());
    }
}
