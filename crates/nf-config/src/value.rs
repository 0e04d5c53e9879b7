//! Typed interpretation of resolved configuration strings.
//!
//! Grammar (whitespace-insensitive between tokens):
//!
//! ```text
//! quantity := number [ ('+/-' | '±') number ] [ ['*'] unit ]
//! array    := '[' number (',' number)* ']' [ ['*'] unit ]
//! range    := array
//!           | 'nominal' '+' array
//!           | 'nominal' '+' '[' number ',' number ']' '*' 'sigma'
//! dict     := '{' key ':' value (',' key ':' value)* '}'
//! ```
//!
//! Anything that matches none of the typed forms is kept as a string.

use std::collections::BTreeMap;

use nf_core::{Error, Quantity, Result, Unit};
use serde::Serialize;

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// `None`.
    None,
    /// `True` / `False`.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Float literal without unit or uncertainty.
    Float(f64),
    /// Anything else (quotes removed).
    Str(String),
    /// Number with unit and/or uncertainty.
    Quantity(Quantity),
    /// Bracketed numbers sharing a unit.
    Array {
        /// Elements in `unit`.
        values: Vec<f64>,
        /// Shared unit.
        unit: Unit,
    },
    /// Bracketed non-numeric elements.
    List(Vec<Value>),
    /// `{key: value, ...}`.
    Dict(BTreeMap<String, Value>),
}

impl Value {
    /// Short type name for messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Quantity(_) => "quantity",
            Value::Array { .. } => "array",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
        }
    }

    /// Numeric magnitude of an int, float or quantity.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Quantity(q) => Some(q.magnitude),
            _ => None,
        }
    }
}

/// Parse a resolved value string into the most specific [`Value`].
pub fn parse_value(text: &str) -> Result<Value> {
    let s = text.trim();
    match s {
        "None" => return Ok(Value::None),
        "True" | "true" => return Ok(Value::Bool(true)),
        "False" | "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Some(inner) = unquote(s) {
        return Ok(Value::Str(inner));
    }
    if s.starts_with('{') {
        return parse_dict(s);
    }
    if s.starts_with('[') {
        return parse_bracketed(s);
    }
    if let Ok(i) = s.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Ok(Value::Float(f));
    }
    match parse_quantity(s) {
        Ok(q) => Ok(Value::Quantity(q)),
        Err(_) => Ok(Value::Str(s.to_string())),
    }
}

/// Parse `number [+/- number] [[*] unit]`, optionally with the numeric part
/// in parentheses: `(8.5 +/- 0.2) units.degree`.
pub fn parse_quantity(text: &str) -> Result<Quantity> {
    let s = text.trim();
    let (magnitude, std_dev, unit_text) = if let Some(after_paren) = s.strip_prefix('(') {
        let close = after_paren
            .find(')')
            .ok_or_else(|| Error::Validation(format!("missing ')' in quantity {text:?}")))?;
        let (m, sd, rest) = parse_number_part(&after_paren[..close], text)?;
        if !rest.trim().is_empty() {
            return Err(Error::Validation(format!("unexpected {rest:?} in quantity {text:?}")));
        }
        (m, sd, &after_paren[close + 1..])
    } else {
        parse_number_part(s, text)?
    };
    let unit_text = unit_text.trim();
    let unit_text = unit_text.strip_prefix('*').unwrap_or(unit_text);
    let unit = Unit::parse(unit_text)?;
    let q = Quantity::new(magnitude, unit);
    match std_dev {
        Some(sd) => q.with_std_dev(sd),
        None => Ok(q),
    }
}

fn parse_number_part<'a>(s: &'a str, whole: &str) -> Result<(f64, Option<f64>, &'a str)> {
    let (magnitude, rest) = take_number(s.trim_start())
        .ok_or_else(|| Error::Validation(format!("expected a number in {whole:?}")))?;
    let rest = rest.trim_start();
    let pm = rest.strip_prefix("+/-").or_else(|| rest.strip_prefix('±'));
    match pm {
        Some(after) => {
            let (sd, rest) = take_number(after.trim_start()).ok_or_else(|| {
                Error::Validation(format!("expected uncertainty after '+/-' in {whole:?}"))
            })?;
            Ok((magnitude, Some(sd), rest))
        }
        None => Ok((magnitude, None, rest)),
    }
}

/// Longest prefix of `s` that is a float literal, and the remainder.
fn take_number(s: &str) -> Option<(f64, &str)> {
    let b = s.as_bytes();
    let mut i = 0usize;
    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        i += 1;
    }
    let digits_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let mut n_digits = i - digits_start;
    if i < b.len() && b[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        n_digits += i - frac_start;
    }
    if n_digits == 0 {
        return None;
    }
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        let mut j = i + 1;
        if j < b.len() && (b[j] == b'+' || b[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        // `2 eV` must not eat the `e`: only accept a complete exponent.
        if j > exp_start {
            i = j;
        }
    }
    let value = s[..i].parse::<f64>().ok()?;
    Some((value, &s[i..]))
}

/// Parse `[a, b, ...] [[*] unit]` into numbers in `unit`.
pub fn parse_array(text: &str) -> Result<(Vec<f64>, Unit)> {
    match parse_bracketed(text)? {
        Value::Array { values, unit } => Ok((values, unit)),
        other => Err(Error::Validation(format!(
            "expected a numeric array, got {} {text:?}",
            other.type_name()
        ))),
    }
}

fn parse_bracketed(s: &str) -> Result<Value> {
    let close = matching_close(s, 0)
        .ok_or_else(|| Error::Validation(format!("unbalanced brackets in {s:?}")))?;
    let inner = &s[1..close];
    let suffix = s[close + 1..].trim();
    let suffix = suffix.strip_prefix('*').unwrap_or(suffix).trim();

    let items: Vec<&str> = split_top_level(inner, ',')?
        .into_iter()
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .collect();
    let numbers: Option<Vec<f64>> = items.iter().map(|x| x.parse::<f64>().ok()).collect();
    match numbers {
        Some(values) => Ok(Value::Array { values, unit: Unit::parse(suffix)? }),
        None if suffix.is_empty() => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(parse_value(item)?);
            }
            Ok(Value::List(out))
        }
        None => Err(Error::Validation(format!("unit {suffix:?} applied to non-numeric list {s:?}"))),
    }
}

fn parse_dict(s: &str) -> Result<Value> {
    let close = matching_close(s, 0)
        .ok_or_else(|| Error::Validation(format!("unbalanced braces in {s:?}")))?;
    if !s[close + 1..].trim().is_empty() {
        return Err(Error::Validation(format!("trailing text after dict in {s:?}")));
    }
    let mut out = BTreeMap::new();
    for item in split_top_level(&s[1..close], ',')? {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let parts = split_top_level(item, ':')?;
        if parts.len() < 2 {
            return Err(Error::Validation(format!("expected 'key: value' in dict item {item:?}")));
        }
        let key_text = parts[0].trim();
        let key = unquote(key_text).unwrap_or_else(|| key_text.to_string());
        // Re-join in case the value itself contained top-level ':'.
        let value_text = item[parts[0].len() + 1..].trim();
        if out.insert(key.clone(), parse_value(value_text)?).is_some() {
            return Err(Error::Validation(format!("duplicate dict key '{key}' in {s:?}")));
        }
    }
    Ok(Value::Dict(out))
}

/// Byte index of the bracket closing the one at `open`, quote-aware.
fn matching_close(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip_while(|(i, _)| *i < open) {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on `sep` outside brackets and quotes.
fn split_top_level(s: &str, sep: char) -> Result<Vec<&str>> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth -= 1,
            c if c == sep && depth == 0 => {
                out.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
        if depth < 0 {
            return Err(Error::Validation(format!("unbalanced brackets in {s:?}")));
        }
    }
    if quote.is_some() || depth != 0 {
        return Err(Error::Validation(format!("unbalanced quotes or brackets in {s:?}")));
    }
    out.push(&s[start..]);
    Ok(out)
}

/// Strip matching quotes (`'x'`, `"x"`, `r'x'`, `r"x"`).
pub fn unquote(s: &str) -> Option<String> {
    let s = s.trim();
    let body = s.strip_prefix('r').filter(|b| b.starts_with('\'') || b.starts_with('"')).unwrap_or(s);
    if body.len() < 2 {
        return None;
    }
    let first = body.chars().next()?;
    if (first == '\'' || first == '"') && body.ends_with(first) {
        Some(body[1..body.len() - 1].to_string())
    } else {
        None
    }
}

/// Parse a boolean flag.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim() {
        "True" | "true" | "yes" | "on" | "1" => Some(true),
        "False" | "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Comma- and/or whitespace-separated names, empty items dropped.
pub fn parse_name_list(text: &str) -> Vec<String> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Evaluate a range expression against `nominal` and return `(lo, hi)` in the
/// nominal's unit.
///
/// Forms: `[lo, hi] unit`, `nominal + [dlo, dhi] unit`,
/// `nominal + [a, b] * sigma`. A range without a unit is dimensionless and
/// only fits a dimensionless nominal.
pub fn parse_range(text: &str, nominal: &Quantity) -> Result<(f64, f64)> {
    let s = text.trim();
    let (lo, hi) = if let Some(rest) = s.strip_prefix("nominal") {
        let rest = rest.trim_start();
        let rest = rest
            .strip_prefix('+')
            .ok_or_else(|| Error::Validation(format!("expected 'nominal + [..]' in range {text:?}")))?
            .trim_start();
        let close = matching_close(rest, 0)
            .filter(|_| rest.starts_with('['))
            .ok_or_else(|| Error::Validation(format!("expected '[a, b]' in range {text:?}")))?;
        let suffix = rest[close + 1..].trim();
        let suffix = suffix.strip_prefix('*').unwrap_or(suffix).trim();
        if suffix == "sigma" {
            let (values, _) = parse_array(&rest[..=close])?;
            let [a, b] = two(&values, text)?;
            let sigma = nominal.std_dev.ok_or_else(|| {
                Error::Validation(format!("range {text:?} uses sigma but the nominal has no uncertainty"))
            })?;
            (nominal.magnitude + a * sigma, nominal.magnitude + b * sigma)
        } else {
            let (values, unit) = parse_array(rest)?;
            let [a, b] = two(&values, text)?;
            let f = unit.conversion_factor(&nominal.unit)?;
            (nominal.magnitude + a * f, nominal.magnitude + b * f)
        }
    } else {
        let (values, unit) = parse_array(s)?;
        let [a, b] = two(&values, text)?;
        let f = unit.conversion_factor(&nominal.unit)?;
        (a * f, b * f)
    };
    if lo > hi {
        return Err(Error::Validation(format!("range {text:?} has lower bound {lo} > upper bound {hi}")));
    }
    Ok((lo, hi))
}

fn two(values: &[f64], text: &str) -> Result<[f64; 2]> {
    match values {
        [a, b] => Ok([*a, *b]),
        _ => Err(Error::Validation(format!(
            "range {text:?} needs exactly 2 bounds, got {}",
            values.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn q(text: &str) -> Quantity {
        parse_quantity(text).unwrap()
    }

    #[test]
    fn test_quantity_forms() {
        let a = q("33.44 +/- 0.77 units.degree");
        assert_relative_eq!(a.magnitude, 33.44);
        assert_relative_eq!(a.std_dev.unwrap(), 0.77);
        assert_eq!(a.unit.symbol(), "degree");

        let b = q("2.517e-3 +/- 0.026e-3 * units.eV**2");
        assert_relative_eq!(b.magnitude, 2.517e-3);
        assert_eq!(b.unit, Unit::parse("eV**2").unwrap());

        let c = q("(8.57 ± 0.12) degree");
        assert_relative_eq!(c.std_dev.unwrap(), 0.12);

        let d = q("2 eV");
        assert_relative_eq!(d.magnitude, 2.0);
        assert_eq!(d.unit.symbol(), "eV");

        let e = q("-1");
        assert!(e.unit.is_dimensionless());
        assert!(e.std_dev.is_none());
    }

    #[test]
    fn test_quantity_errors() {
        assert!(parse_quantity("abc").is_err());
        assert!(parse_quantity("1 +/- units.deg").is_err());
        assert!(parse_quantity("1 +/- -0.1").is_err());
        assert!(parse_quantity("1 furlong").is_err());
        assert!(parse_quantity("(1 +/- 0.1 units.deg").is_err());
    }

    #[test]
    fn test_scalar_values() {
        assert_eq!(parse_value("None").unwrap(), Value::None);
        assert_eq!(parse_value("True").unwrap(), Value::Bool(true));
        assert_eq!(parse_value("12").unwrap(), Value::Int(12));
        assert_eq!(parse_value("0.5").unwrap(), Value::Float(0.5));
        assert_eq!(parse_value("'a, b'").unwrap(), Value::Str("a, b".into()));
        assert_eq!(parse_value("osc/PREM_12layer.dat").unwrap(), Value::Str("osc/PREM_12layer.dat".into()));
        assert!(matches!(parse_value("20 units.km").unwrap(), Value::Quantity(_)));
    }

    #[test]
    fn test_arrays_and_lists() {
        let (v, u) = parse_array("[1, 80] * units.GeV").unwrap();
        assert_eq!(v, vec![1.0, 80.0]);
        assert_eq!(u.symbol(), "GeV");
        assert_eq!(
            parse_value("['a', 'b']").unwrap(),
            Value::List(vec![Value::Str("a".into()), Value::Str("b".into())])
        );
        assert!(parse_value("['a'] units.km").is_err());
        assert!(parse_value("[1, 2").is_err());
    }

    #[test]
    fn test_dict_with_quoted_braces() {
        let v = parse_value(
            "{'num_bins': 10, 'is_log': True, 'domain': [1, 80] * units.GeV, 'tex': r'\\cos\\,\\theta_{Z,{\\rm true}}'}",
        )
        .unwrap();
        let Value::Dict(d) = v else { panic!("expected dict") };
        assert_eq!(d["num_bins"], Value::Int(10));
        assert_eq!(d["is_log"], Value::Bool(true));
        assert!(matches!(d["domain"], Value::Array { .. }));
        assert_eq!(d["tex"], Value::Str("\\cos\\,\\theta_{Z,{\\rm true}}".into()));
    }

    #[test]
    fn test_ranges() {
        let nominal = q("45 +/- 2 units.degree");
        assert_eq!(parse_range("[0, 90] * units.deg", &nominal).unwrap(), (0.0, 90.0));
        let (lo, hi) = parse_range("[0, 1.5707963267948966] rad", &nominal).unwrap();
        assert_relative_eq!(lo, 0.0);
        assert_relative_eq!(hi, 90.0, epsilon = 1e-9);
        assert_eq!(parse_range("nominal + [-5, 5] units.degree", &nominal).unwrap(), (40.0, 50.0));
        assert_eq!(parse_range("nominal + [-3, 3] * sigma", &nominal).unwrap(), (39.0, 51.0));
    }

    #[test]
    fn test_range_errors() {
        let nominal = q("45 units.degree");
        assert!(parse_range("[0, 90]", &nominal).is_err(), "unitless range for an angle");
        assert!(parse_range("[0, 90] units.km", &nominal).is_err());
        assert!(parse_range("[90, 0] units.deg", &nominal).is_err());
        assert!(parse_range("[0, 45, 90] units.deg", &nominal).is_err());
        assert!(parse_range("nominal + [-1, 1] * sigma", &nominal).is_err());
        assert!(parse_range("nominal - [1, 1] units.deg", &nominal).is_err());

        let dimensionless = q("1.0");
        assert_eq!(parse_range("nominal + [-0.5, 0.5]", &dimensionless).unwrap(), (0.5, 1.5));
    }

    #[test]
    fn test_name_list_and_bool() {
        assert_eq!(parse_name_list("a.b, c.d,\n e.f"), vec!["a.b", "c.d", "e.f"]);
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
