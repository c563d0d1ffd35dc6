//! CO2 level bands and the reference lines drawn on the CO2 graphs.
//!
//! # Example
//!
//! ```
//! use co2mon_service::{Co2Band, Co2Thresholds};
//!
//! let thresholds = Co2Thresholds::default();
//! assert_eq!(thresholds.evaluate(650), Co2Band::Ok);
//! assert_eq!(thresholds.evaluate(1050), Co2Band::OffWarning);
//! ```

use serde::{Deserialize, Serialize};

/// CO2 band a concentration falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Co2Band {
    /// Below the ventilation warning line.
    Ok,
    /// Ventilation should be turned up.
    VentilationWarning,
    /// Ventilation should not be switched off.
    OffWarning,
    /// At or above the critical line.
    Critical,
}

impl Co2Band {
    /// Short label used in the graph legend.
    pub fn label(&self) -> &'static str {
        match self {
            Co2Band::Ok => "OK",
            Co2Band::VentilationWarning => "DEV-WARN",
            Co2Band::OffWarning => "OFF-WARN",
            Co2Band::Critical => "CRIT",
        }
    }

    /// Reference line color as RGB.
    pub fn color(&self) -> [u8; 3] {
        match self {
            Co2Band::Ok => [0x16, 0xF5, 0x0F],
            Co2Band::VentilationWarning => [0xFF, 0x95, 0x2B],
            Co2Band::OffWarning => [0x3F, 0xC0, 0xEB],
            Co2Band::Critical => [0xDE, 0x2C, 0x2F],
        }
    }
}

impl std::fmt::Display for Co2Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Reference concentrations in ppm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Co2Thresholds {
    pub ok: u16,
    pub ventilation_warning: u16,
    pub off_warning: u16,
    pub critical: u16,
}

impl Default for Co2Thresholds {
    fn default() -> Self {
        Self {
            ok: 500,
            ventilation_warning: 800,
            off_warning: 1000,
            critical: 1200,
        }
    }
}

impl Co2Thresholds {
    /// Band of a concentration.
    pub fn evaluate(&self, co2_ppm: u16) -> Co2Band {
        if co2_ppm >= self.critical {
            Co2Band::Critical
        } else if co2_ppm >= self.off_warning {
            Co2Band::OffWarning
        } else if co2_ppm >= self.ventilation_warning {
            Co2Band::VentilationWarning
        } else {
            Co2Band::Ok
        }
    }

    /// Horizontal reference lines, lowest first.
    pub fn reference_lines(&self) -> [(u16, Co2Band); 4] {
        [
            (self.ok, Co2Band::Ok),
            (self.ventilation_warning, Co2Band::VentilationWarning),
            (self.off_warning, Co2Band::OffWarning),
            (self.critical, Co2Band::Critical),
        ]
    }
}
