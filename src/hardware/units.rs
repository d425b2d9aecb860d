//! Length and velocity units accepted by stage adapters.
//!
//! Unit strings come from configuration and from callers of the stage
//! boundary. They are matched case-insensitively after trimming, with the
//! same alias table the rig's motion controllers accept. Unknown strings are
//! a configuration error, raised before any motion command is built.

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance unit for stage positions.
///
/// `Native` is the controller's own unit (encoder steps for the XY stage).
/// Converting to or from `Native` needs the stage's steps-per-millimetre scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LengthUnit {
    /// `mm`
    Millimetres,
    /// `um`
    Micrometres,
    /// `nm`
    Nanometres,
    /// Controller units, scaled by steps per millimetre
    Native,
}

impl LengthUnit {
    /// Millimetres per one unit, or `None` for `Native`.
    fn mm_per_unit(self) -> Option<f64> {
        match self {
            LengthUnit::Millimetres => Some(1.0),
            LengthUnit::Micrometres => Some(1e-3),
            LengthUnit::Nanometres => Some(1e-6),
            LengthUnit::Native => None,
        }
    }

    /// Short name as written in configuration.
    pub fn symbol(self) -> &'static str {
        match self {
            LengthUnit::Millimetres => "mm",
            LengthUnit::Micrometres => "um",
            LengthUnit::Nanometres => "nm",
            LengthUnit::Native => "native",
        }
    }

    /// Convert `value` expressed in `self` into `target`.
    ///
    /// `native_per_mm` is required whenever exactly one side is `Native`.
    pub fn convert(
        self,
        value: f64,
        target: LengthUnit,
        native_per_mm: Option<f64>,
    ) -> ScanResult<f64> {
        if self == target {
            return Ok(value);
        }
        let mm = match self.mm_per_unit() {
            Some(scale) => value * scale,
            None => value / native_scale(native_per_mm)?,
        };
        match target.mm_per_unit() {
            Some(scale) => Ok(mm / scale),
            None => Ok(mm * native_scale(native_per_mm)?),
        }
    }
}

fn native_scale(native_per_mm: Option<f64>) -> ScanResult<f64> {
    match native_per_mm {
        Some(scale) if scale > 0.0 && scale.is_finite() => Ok(scale),
        Some(scale) => Err(ScanError::configuration(format!(
            "Native unit scale must be positive, got {}",
            scale
        ))),
        None => Err(ScanError::configuration(
            "Stage has no native unit scale; cannot convert native units",
        )),
    }
}

impl FromStr for LengthUnit {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mm" | "millimeter" | "millimeters" => Ok(LengthUnit::Millimetres),
            "um" | "micrometer" | "micrometers" | "microns" => Ok(LengthUnit::Micrometres),
            "nm" | "nanometer" | "nanometers" => Ok(LengthUnit::Nanometres),
            "native" | "default" => Ok(LengthUnit::Native),
            _ => Err(ScanError::configuration(format!(
                "Unrecognised units '{}'. Try mm, um, nm, or native",
                s
            ))),
        }
    }
}

impl TryFrom<String> for LengthUnit {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LengthUnit> for String {
    fn from(value: LengthUnit) -> Self {
        value.symbol().to_string()
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Speed unit for stage velocity settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VelocityUnit {
    /// `cm/s`
    CentimetresPerSecond,
    /// `mm/s`
    MillimetresPerSecond,
    /// `um/s`
    MicrometresPerSecond,
    /// `nm/s`
    NanometresPerSecond,
}

impl VelocityUnit {
    /// Short name as written in configuration.
    pub fn symbol(self) -> &'static str {
        match self {
            VelocityUnit::CentimetresPerSecond => "cm/s",
            VelocityUnit::MillimetresPerSecond => "mm/s",
            VelocityUnit::MicrometresPerSecond => "um/s",
            VelocityUnit::NanometresPerSecond => "nm/s",
        }
    }

    /// Convert `value` in this unit to mm/s.
    pub fn to_mm_per_sec(self, value: f64) -> f64 {
        match self {
            VelocityUnit::CentimetresPerSecond => value * 10.0,
            VelocityUnit::MillimetresPerSecond => value,
            VelocityUnit::MicrometresPerSecond => value * 1e-3,
            VelocityUnit::NanometresPerSecond => value * 1e-6,
        }
    }
}

impl FromStr for VelocityUnit {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cm/s" | "cm" => Ok(VelocityUnit::CentimetresPerSecond),
            "mm/s" | "mm" => Ok(VelocityUnit::MillimetresPerSecond),
            "um/s" | "um" => Ok(VelocityUnit::MicrometresPerSecond),
            "nm/s" | "nm" => Ok(VelocityUnit::NanometresPerSecond),
            _ => Err(ScanError::configuration(format!(
                "Unrecognised units '{}'. Try cm/s, mm/s, um/s, or nm/s",
                s
            ))),
        }
    }
}

impl TryFrom<String> for VelocityUnit {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VelocityUnit> for String {
    fn from(value: VelocityUnit) -> Self {
        value.symbol().to_string()
    }
}

impl fmt::Display for VelocityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!(" MM ".parse::<LengthUnit>().unwrap(), LengthUnit::Millimetres);
        assert_eq!("Microns".parse::<LengthUnit>().unwrap(), LengthUnit::Micrometres);
        assert_eq!("nanometers".parse::<LengthUnit>().unwrap(), LengthUnit::Nanometres);
        assert_eq!("default".parse::<LengthUnit>().unwrap(), LengthUnit::Native);
    }

    #[test]
    fn rejects_unknown_unit() {
        let err = "furlong".parse::<LengthUnit>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("Try mm, um, nm, or native"));
    }

    #[test]
    fn converts_between_metric_units() {
        let um = LengthUnit::Millimetres
            .convert(1.5, LengthUnit::Micrometres, None)
            .unwrap();
        assert!((um - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn native_conversion_needs_scale() {
        assert!(LengthUnit::Native
            .convert(100.0, LengthUnit::Millimetres, None)
            .is_err());
        let mm = LengthUnit::Native
            .convert(2000.0, LengthUnit::Millimetres, Some(1000.0))
            .unwrap();
        assert!((mm - 2.0).abs() < 1e-12);
    }

    #[test]
    fn velocity_aliases() {
        let unit: VelocityUnit = "um".parse().unwrap();
        assert!((unit.to_mm_per_sec(500.0) - 0.5).abs() < 1e-12);
        assert!("knots".parse::<VelocityUnit>().is_err());
        assert_eq!(VelocityUnit::CentimetresPerSecond.to_string(), "cm/s");
    }
}
