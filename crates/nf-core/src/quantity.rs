//! A magnitude with a unit and an optional symmetric Gaussian uncertainty.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::units::Unit;
use crate::{Error, Result};

/// `magnitude +/- std_dev [unit]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    /// Central value, expressed in `unit`.
    pub magnitude: f64,
    /// One-sigma Gaussian uncertainty in `unit`, if given.
    pub std_dev: Option<f64>,
    /// Unit of `magnitude` and `std_dev`.
    pub unit: Unit,
}

impl Quantity {
    /// Quantity without uncertainty.
    pub fn new(magnitude: f64, unit: Unit) -> Self {
        Self { magnitude, std_dev: None, unit }
    }

    /// Dimensionless quantity without uncertainty.
    pub fn dimensionless(magnitude: f64) -> Self {
        Self::new(magnitude, Unit::dimensionless())
    }

    /// Attach a Gaussian uncertainty. Must be finite and non-negative.
    pub fn with_std_dev(mut self, std_dev: f64) -> Result<Self> {
        if !std_dev.is_finite() || std_dev < 0.0 {
            return Err(Error::Validation(format!(
                "uncertainty must be finite and >= 0, got {std_dev}"
            )));
        }
        self.std_dev = Some(std_dev);
        Ok(self)
    }

    /// Whether `self` can be expressed in `unit`.
    pub fn is_compatible(&self, unit: &Unit) -> bool {
        self.unit.is_compatible(unit)
    }

    /// Same quantity expressed in `unit` (magnitude and uncertainty scaled).
    pub fn to(&self, unit: &Unit) -> Result<Quantity> {
        let f = self.unit.conversion_factor(unit)?;
        Ok(Quantity {
            magnitude: self.magnitude * f,
            std_dev: self.std_dev.map(|s| s * f),
            unit: unit.clone(),
        })
    }

    /// Magnitude expressed in `unit`.
    pub fn m_as(&self, unit: &Unit) -> Result<f64> {
        self.unit.convert(self.magnitude, unit)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.magnitude)?;
        if let Some(s) = self.std_dev {
            write!(f, " +/- {s}")?;
        }
        if !self.unit.is_dimensionless() {
            write!(f, " {}", self.unit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_conversion_scales_uncertainty() {
        let deg = Unit::parse("degree").unwrap();
        let rad = Unit::parse("rad").unwrap();
        let q = Quantity::new(180.0, deg).with_std_dev(18.0).unwrap();
        let r = q.to(&rad).unwrap();
        assert_relative_eq!(r.magnitude, std::f64::consts::PI, epsilon = 1e-12);
        assert_relative_eq!(r.std_dev.unwrap(), std::f64::consts::PI / 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_negative_uncertainty_rejected() {
        assert!(Quantity::dimensionless(1.0).with_std_dev(-0.1).is_err());
        assert!(Quantity::dimensionless(1.0).with_std_dev(f64::NAN).is_err());
    }

    #[test]
    fn test_display() {
        let q = Quantity::new(2.5e-3, Unit::parse("units.eV**2").unwrap())
            .with_std_dev(3e-5)
            .unwrap();
        assert_eq!(q.to_string(), "0.0025 +/- 0.00003 eV**2");
        assert_eq!(Quantity::dimensionless(1.0).to_string(), "1");
    }
}
