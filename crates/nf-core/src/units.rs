//! Physical units used in configuration values.
//!
//! A [`Unit`] is a scale factor relative to the base unit of its [`Dimension`]
//! plus the text it was written as. Base units are metre, gram, second,
//! electronvolt and radian; energy is kept as its own dimension the way
//! particle physicists write it (`eV**2`, `GeV`), not folded into SI.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const N_BASE: usize = 5;
const BASE_NAMES: [&str; N_BASE] = ["length", "mass", "time", "energy", "angle"];

/// Exponents over the base dimensions (length, mass, time, energy, angle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimension([i8; N_BASE]);

impl Dimension {
    /// No dimension at all.
    pub const DIMENSIONLESS: Dimension = Dimension([0, 0, 0, 0, 0]);
    /// Length (metre).
    pub const LENGTH: Dimension = Dimension([1, 0, 0, 0, 0]);
    /// Mass (gram).
    pub const MASS: Dimension = Dimension([0, 1, 0, 0, 0]);
    /// Time (second).
    pub const TIME: Dimension = Dimension([0, 0, 1, 0, 0]);
    /// Energy (electronvolt).
    pub const ENERGY: Dimension = Dimension([0, 0, 0, 1, 0]);
    /// Plane angle (radian).
    pub const ANGLE: Dimension = Dimension([0, 0, 0, 0, 1]);

    /// Mass-squared splitting dimension (`eV**2`).
    pub const ENERGY_SQUARED: Dimension = Dimension([0, 0, 0, 2, 0]);

    /// Whether all exponents are zero.
    pub fn is_dimensionless(&self) -> bool {
        self.0.iter().all(|&e| e == 0)
    }

    fn combine(self, other: Dimension, op: fn(i8, i8) -> Option<i8>) -> Result<Dimension> {
        let mut out = [0i8; N_BASE];
        for (i, o) in out.iter_mut().enumerate() {
            *o = op(self.0[i], other.0[i])
                .ok_or_else(|| Error::Unit(format!("dimension exponent overflow combining {self} and {other}")))?;
        }
        Ok(Dimension(out))
    }

    fn mul(self, other: Dimension) -> Result<Dimension> {
        self.combine(other, i8::checked_add)
    }

    fn div(self, other: Dimension) -> Result<Dimension> {
        self.combine(other, i8::checked_sub)
    }

    fn powi(self, n: i8) -> Result<Dimension> {
        let mut out = [0i8; N_BASE];
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.0[i]
                .checked_mul(n)
                .ok_or_else(|| Error::Unit(format!("dimension exponent overflow raising {self} to {n}")))?;
        }
        Ok(Dimension(out))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }
        let mut first = true;
        for (name, &exp) in BASE_NAMES.iter().zip(self.0.iter()) {
            if exp == 0 {
                continue;
            }
            if !first {
                write!(f, "*")?;
            }
            first = false;
            if exp == 1 {
                write!(f, "[{name}]")?;
            } else {
                write!(f, "[{name}]**{exp}")?;
            }
        }
        Ok(())
    }
}

/// A physical unit: scale to the base unit of `dim`, plus its written form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Unit {
    scale: f64,
    dim: Dimension,
    symbol: String,
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.dim == other.dim && ((self.scale - other.scale).abs() <= 1e-12 * self.scale.abs())
    }
}

impl Unit {
    /// The dimensionless unit with scale 1.
    pub fn dimensionless() -> Self {
        Unit { scale: 1.0, dim: Dimension::DIMENSIONLESS, symbol: "dimensionless".to_string() }
    }

    /// Parse a unit expression such as `units.eV**2`, `degree` or `g/cm**3`.
    ///
    /// An empty string parses as dimensionless.
    pub fn parse(text: &str) -> Result<Self> {
        let symbol = canonical_symbol(text);
        if symbol.is_empty() || symbol == "dimensionless" {
            return Ok(Self::dimensionless());
        }
        let tokens = tokenize(&symbol)?;
        let mut p = UnitParser { tokens: &tokens, pos: 0, text };
        let (scale, dim) = p.expr()?;
        if p.pos != tokens.len() {
            return Err(Error::Unit(format!("unexpected trailing input in unit {text:?}")));
        }
        Ok(Unit { scale, dim, symbol })
    }

    /// Scale relative to the base unit of this dimension.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Dimension of this unit.
    pub fn dimension(&self) -> Dimension {
        self.dim
    }

    /// Written form (without any `units.` prefix).
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Whether this unit has no dimension.
    pub fn is_dimensionless(&self) -> bool {
        self.dim.is_dimensionless()
    }

    /// Whether values in `self` can be converted to `other`.
    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dim == other.dim
    }

    /// Factor `f` such that `x [self] == x * f [other]`.
    pub fn conversion_factor(&self, other: &Unit) -> Result<f64> {
        if !self.is_compatible(other) {
            return Err(Error::Unit(format!(
                "cannot convert from '{}' ({}) to '{}' ({})",
                self.symbol, self.dim, other.symbol, other.dim
            )));
        }
        Ok(self.scale / other.scale)
    }

    /// Convert `value` expressed in `self` into `other`.
    pub fn convert(&self, value: f64, other: &Unit) -> Result<f64> {
        Ok(value * self.conversion_factor(other)?)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

impl From<Unit> for String {
    fn from(u: Unit) -> Self {
        u.symbol
    }
}

impl TryFrom<String> for Unit {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Unit::parse(&s)
    }
}

impl std::str::FromStr for Unit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Unit::parse(s)
    }
}

fn canonical_symbol(text: &str) -> String {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    compact.replace("units.", "").replace("ureg.", "")
}

fn lookup(name: &str) -> Option<(f64, Dimension)> {
    let d = Dimension::DIMENSIONLESS;
    let l = Dimension::LENGTH;
    let m = Dimension::MASS;
    let t = Dimension::TIME;
    let e = Dimension::ENERGY;
    let a = Dimension::ANGLE;
    let v = match name {
        "dimensionless" | "count" | "mol" => (1.0, d),
        "percent" => (0.01, d),
        "rad" | "radian" | "radians" => (1.0, a),
        "deg" | "degree" | "degrees" => (PI / 180.0, a),
        "sr" | "steradian" => (1.0, Dimension([0, 0, 0, 0, 2])),
        "eV" => (1.0, e),
        "meV" => (1e-3, e),
        "keV" => (1e3, e),
        "MeV" => (1e6, e),
        "GeV" => (1e9, e),
        "TeV" => (1e12, e),
        "PeV" => (1e15, e),
        "m" | "meter" | "meters" | "metre" => (1.0, l),
        "mm" | "millimeter" => (1e-3, l),
        "cm" | "centimeter" => (1e-2, l),
        "km" | "kilometer" => (1e3, l),
        "s" | "sec" | "second" | "seconds" => (1.0, t),
        "ns" | "nanosecond" => (1e-9, t),
        "us" | "microsecond" => (1e-6, t),
        "ms" | "millisecond" => (1e-3, t),
        "minute" | "minutes" => (60.0, t),
        "hour" | "hours" => (3600.0, t),
        "day" | "days" => (86_400.0, t),
        // Julian year
        "year" | "years" | "yr" => (365.25 * 86_400.0, t),
        "g" | "gram" | "grams" => (1.0, m),
        "kg" | "kilogram" => (1e3, m),
        _ => return None,
    };
    Some(v)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i8),
    Star,
    Pow,
    Slash,
    LParen,
    RParen,
    Minus,
}

fn tokenize(s: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = s.chars().collect();
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                out.push(Tok::Pow);
                i += 2;
            }
            '^' => {
                out.push(Tok::Pow);
                i += 1;
            }
            '*' => {
                out.push(Tok::Star);
                i += 1;
            }
            '/' => {
                out.push(Tok::Slash);
                i += 1;
            }
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            '-' => {
                out.push(Tok::Minus);
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let lit: String = chars[start..i].iter().collect();
                let n = lit
                    .parse::<i8>()
                    .map_err(|_| Error::Unit(format!("exponent out of range in unit {s:?}")))?;
                out.push(Tok::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                out.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::Unit(format!("unexpected character {other:?} in unit {s:?}")));
            }
        }
    }
    Ok(out)
}

struct UnitParser<'a> {
    tokens: &'a [Tok],
    pos: usize,
    text: &'a str,
}

impl UnitParser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Tok> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn err(&self, what: &str) -> Error {
        Error::Unit(format!("{what} in unit {:?}", self.text))
    }

    fn expr(&mut self) -> Result<(f64, Dimension)> {
        let (mut scale, mut dim) = self.term()?;
        loop {
            match self.peek() {
                Some(Tok::Star) => {
                    self.pos += 1;
                    let (s, d) = self.term()?;
                    scale *= s;
                    dim = dim.mul(d)?;
                }
                Some(Tok::Slash) => {
                    self.pos += 1;
                    let (s, d) = self.term()?;
                    scale /= s;
                    dim = dim.div(d)?;
                }
                _ => return Ok((scale, dim)),
            }
        }
    }

    fn term(&mut self) -> Result<(f64, Dimension)> {
        let (scale, dim) = self.atom()?;
        if self.peek() != Some(&Tok::Pow) {
            return Ok((scale, dim));
        }
        self.pos += 1;
        let negative = if self.peek() == Some(&Tok::Minus) {
            self.pos += 1;
            true
        } else {
            false
        };
        let n = match self.next() {
            Some(Tok::Int(n)) => *n,
            _ => return Err(self.err("expected integer exponent")),
        };
        let n = if negative { -n } else { n };
        Ok((scale.powi(i32::from(n)), dim.powi(n)?))
    }

    fn atom(&mut self) -> Result<(f64, Dimension)> {
        match self.next().cloned() {
            Some(Tok::Ident(name)) => lookup(&name)
                .ok_or_else(|| Error::Unit(format!("unknown unit '{name}' in {:?}", self.text))),
            Some(Tok::Int(1)) => Ok((1.0, Dimension::DIMENSIONLESS)),
            Some(Tok::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Tok::RParen) => Ok(inner),
                    _ => Err(self.err("missing ')'")),
                }
            }
            _ => Err(self.err("expected unit name")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_parse_with_units_prefix() {
        let u = Unit::parse("units.eV**2").unwrap();
        assert_eq!(u.dimension(), Dimension::ENERGY_SQUARED);
        assert_eq!(u.symbol(), "eV**2");
        assert_relative_eq!(u.scale(), 1.0);
    }

    #[test]
    fn test_degree_to_radian() {
        let deg = Unit::parse("degree").unwrap();
        let rad = Unit::parse("rad").unwrap();
        assert_relative_eq!(deg.convert(180.0, &rad).unwrap(), PI, epsilon = 1e-12);
    }

    #[test]
    fn test_density() {
        let u = Unit::parse("g/cm**3").unwrap();
        assert_eq!(u.dimension(), Dimension::MASS.div(Dimension::LENGTH.powi(3).unwrap()).unwrap());
        assert_relative_eq!(u.scale(), 1e6, max_relative = 1e-12);
    }

    #[test]
    fn test_parenthesised_and_negative_exponent() {
        let a = Unit::parse("1/(m*s)").unwrap();
        let b = Unit::parse("m**-1 * s**-1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_is_dimensionless() {
        assert!(Unit::parse("").unwrap().is_dimensionless());
        assert!(Unit::parse("units.dimensionless").unwrap().is_dimensionless());
        assert!(Unit::parse("mol").unwrap().is_dimensionless());
        assert!(Unit::parse("units.count").unwrap().is_dimensionless());
    }

    #[test]
    fn test_exponent_overflow_is_an_error() {
        assert!(matches!(Unit::parse("(m**100)**2"), Err(Error::Unit(_))));
        assert!(matches!(Unit::parse("m**100 * m**100"), Err(Error::Unit(_))));
        assert!(matches!(Unit::parse("m**-100 / m**100"), Err(Error::Unit(_))));
        assert!(matches!(Unit::parse("m**1000"), Err(Error::Unit(_))));
        assert_eq!(Unit::parse("(m**60)**2").unwrap().dimension(), Dimension::LENGTH.powi(120).unwrap());
    }

    #[test]
    fn test_incompatible_conversion_errors() {
        let km = Unit::parse("km").unwrap();
        let gev = Unit::parse("GeV").unwrap();
        assert!(km.conversion_factor(&gev).is_err());
    }

    #[test]
    fn test_unknown_unit() {
        assert!(matches!(Unit::parse("furlong"), Err(Error::Unit(_))));
        assert!(Unit::parse("m**").is_err());
        assert!(Unit::parse("(m").is_err());
    }

    #[test]
    fn test_serde_as_symbol() {
        let u = Unit::parse("units.km").unwrap();
        let json = serde_json::to_string(&u).unwrap();
        assert_eq!(json, "\"km\"");
        let back: Unit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, u);
    }

    proptest! {
        #[test]
        fn prop_deg_rad_deg_identity(x in -1.0e6f64..1.0e6) {
            let deg = Unit::parse("deg").unwrap();
            let rad = Unit::parse("rad").unwrap();
            let back = rad.convert(deg.convert(x, &rad).unwrap(), &deg).unwrap();
            prop_assert!((back - x).abs() <= 1e-12 * x.abs().max(1.0));
        }
    }
}
