use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

const AREA_MAX: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area(String);

impl Area {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let area = raw.trim();
        if area.is_empty() {
            return Err(ValidationError::new("area", "area is required"));
        }
        if area.chars().count() > AREA_MAX {
            return Err(ValidationError::new("area", "area must be at most 100 characters"));
        }
        Ok(Self(area.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Six-digit postal index number; the leading digit names the postal region (1..=8).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCode(String);

impl PinCode {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let pin = raw.trim();
        if pin.is_empty() {
            return Err(ValidationError::new("pin_code", "pin code is required"));
        }
        if pin.len() != 6 || !pin.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(ValidationError::new("pin_code", "pin code must be 6 digits"));
        }
        if !matches!(pin.as_bytes()[0], b'1'..=b'8') {
            return Err(ValidationError::new("pin_code", "pin code must start with a digit 1-8"));
        }
        Ok(Self(pin.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub area: Area,
    pub pin_code: PinCode,
}

impl Location {
    pub fn parse(area: &str, pin_code: &str) -> Result<Self, ValidationError> {
        Ok(Self { area: Area::parse(area)?, pin_code: PinCode::parse(pin_code)? })
    }
}

#[cfg(test)]
mod tests {
    use super::{Location, PinCode};

    #[test]
    fn pin_code_enforces_length_and_region_range() {
        assert!(PinCode::parse("560001").is_ok());
        let short = PinCode::parse("56001").expect_err("short");
        assert_eq!(short.message, "pin code must be 6 digits");
        assert_eq!(
            PinCode::parse("960001").expect_err("region").message,
            "pin code must start with a digit 1-8"
        );
        assert_eq!(
            PinCode::parse("060001").expect_err("region").message,
            "pin code must start with a digit 1-8"
        );
    }

    #[test]
    fn location_requires_area() {
        let error = Location::parse("  ", "560001").expect_err("empty area");
        assert_eq!(error.field, "area");
    }
}
