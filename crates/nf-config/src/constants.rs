//! Tables of best-fit oscillation constants.
//!
//! A constants file is a flat list of `name = value` lines, with optional
//! `name.range` and `name.3s_range` bounds and per-hierarchy variants
//! (`theta23_nh`, `theta23_ih`). It is usually included into a pipeline
//! config with `#include ... as <alias>` and referenced as `${alias:name}`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use nf_core::{Error, Param, ParamSet, Prior, Quantity, Result, Unit};
use serde::Serialize;

use crate::document::{ConfigDocument, Entry, DEFAULT_SECTION};
use crate::value::{parse_array, parse_quantity, parse_range};

/// Section name used for a headerless constants file.
pub const CONSTANTS_SECTION: &str = "constants";

/// Neutrino mass ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Hierarchy {
    /// Normal ordering.
    Normal,
    /// Inverted ordering.
    Inverted,
}

impl Hierarchy {
    /// Both orderings.
    pub const ALL: [Hierarchy; 2] = [Hierarchy::Normal, Hierarchy::Inverted];

    /// Short tag used in names and selectors: `nh` or `ih`.
    pub fn tag(self) -> &'static str {
        match self {
            Hierarchy::Normal => "nh",
            Hierarchy::Inverted => "ih",
        }
    }

    /// The other ordering.
    pub fn opposite(self) -> Hierarchy {
        match self {
            Hierarchy::Normal => Hierarchy::Inverted,
            Hierarchy::Inverted => Hierarchy::Normal,
        }
    }

    /// Split `theta23_nh` into (`theta23`, `Normal`).
    pub fn split_suffix(name: &str) -> Option<(&str, Hierarchy)> {
        Hierarchy::ALL.into_iter().find_map(|h| {
            name.strip_suffix(h.tag())
                .and_then(|rest| rest.strip_suffix('_'))
                .filter(|base| !base.is_empty())
                .map(|base| (base, h))
        })
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Hierarchy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nh" | "normal" | "no" => Ok(Hierarchy::Normal),
            "ih" | "inverted" | "io" => Ok(Hierarchy::Inverted),
            other => Err(Error::Validation(format!("unknown hierarchy '{other}' (expected nh or ih)"))),
        }
    }
}

/// Closed interval `[lo, hi]` in its own unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bounds {
    /// Lower bound.
    pub lo: f64,
    /// Upper bound.
    pub hi: f64,
    /// Unit of `lo` and `hi`.
    pub unit: Unit,
}

impl Bounds {
    /// Bounds expressed in `unit`.
    pub fn to_unit(&self, unit: &Unit) -> Result<(f64, f64)> {
        let f = self.unit.conversion_factor(unit)?;
        Ok((self.lo * f, self.hi * f))
    }

    /// Whether `q` lies inside, after unit conversion.
    pub fn contains(&self, q: &Quantity) -> Result<bool> {
        let x = q.m_as(&self.unit)?;
        Ok(self.lo <= x && x <= self.hi)
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn covers(&self, other: &Bounds) -> Result<bool> {
        let (lo, hi) = other.to_unit(&self.unit)?;
        Ok(self.lo <= lo && hi <= self.hi)
    }
}

/// One named constant with its optional ranges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstantEntry {
    /// Name as written, including any `_nh`/`_ih` suffix.
    pub name: String,
    /// Best-fit value, usually with a 1-sigma uncertainty.
    pub nominal: Quantity,
    /// Allowed range.
    pub range: Option<Bounds>,
    /// 3-sigma range.
    #[serde(rename = "3s_range")]
    pub range_3s: Option<Bounds>,
    /// File the nominal came from.
    pub source: String,
    /// Line of the nominal.
    pub line: usize,
}

impl ConstantEntry {
    /// Name without hierarchy suffix.
    pub fn base_name(&self) -> &str {
        Hierarchy::split_suffix(&self.name).map_or(self.name.as_str(), |(base, _)| base)
    }

    /// Hierarchy this entry belongs to, if any.
    pub fn hierarchy(&self) -> Option<Hierarchy> {
        Hierarchy::split_suffix(&self.name).map(|(_, h)| h)
    }

    /// Fixed parameter named after the base name, with the range and a
    /// Gaussian prior when the nominal carries an uncertainty.
    pub fn to_param(&self) -> Result<Param> {
        let mut p = Param::new(self.base_name(), self.nominal.clone()).with_fixed(true);
        if let Some(range) = &self.range {
            let (lo, hi) = range.to_unit(&self.nominal.unit)?;
            p = p.with_range(lo, hi)?;
        }
        if let Some(sigma) = self.nominal.std_dev {
            p = p.with_prior(Prior::Gaussian { mean: self.nominal.magnitude, stddev: sigma })?;
        }
        Ok(p)
    }
}

/// Constants keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConstantsTable {
    entries: BTreeMap<String, ConstantEntry>,
}

/// The two hierarchy variants of one constant.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyPair<'a> {
    /// Name without suffix.
    pub base: String,
    /// `<base>_nh`.
    pub normal: Option<&'a ConstantEntry>,
    /// `<base>_ih`.
    pub inverted: Option<&'a ConstantEntry>,
}

impl ConstantsTable {
    /// Read a constants file. A file without section headers becomes a single
    /// section; otherwise its defaults are used.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let has_headers = text.lines().any(|l| l.trim_start().starts_with('['));
        if has_headers {
            let doc = ConfigDocument::from_file(path)?.interpolate()?;
            Self::from_section(&doc, DEFAULT_SECTION)
        } else {
            let doc = ConfigDocument::from_file_as_section(path, CONSTANTS_SECTION)?.interpolate()?;
            Self::from_section(&doc, CONSTANTS_SECTION)
        }
    }

    /// Build from one section of an interpolated document.
    pub fn from_section(doc: &ConfigDocument, section: &str) -> Result<Self> {
        let sec = doc
            .section(section)
            .ok_or_else(|| Error::Validation(format!("no section [{section}] for constants")))?;

        let mut nominals: Vec<&Entry> = Vec::new();
        let mut attrs: Vec<(&str, &str, &Entry)> = Vec::new();
        for e in &sec.entries {
            match e.key.split_once('.') {
                Some((name, attr)) => attrs.push((name, attr, e)),
                None => nominals.push(e),
            }
        }

        let mut entries = BTreeMap::new();
        for e in nominals {
            let nominal = parse_quantity(&e.value).map_err(|err| located(e, err))?;
            entries.insert(
                e.key.clone(),
                ConstantEntry {
                    name: e.key.clone(),
                    nominal,
                    range: None,
                    range_3s: None,
                    source: e.source.clone(),
                    line: e.line,
                },
            );
        }
        for (name, attr, e) in attrs {
            let Some(entry) = entries.get_mut(name) else {
                return Err(located(e, Error::Validation(format!("'{}' refers to undefined constant '{name}'", e.key))));
            };
            let slot = match attr {
                "range" => &mut entry.range,
                "3s_range" => &mut entry.range_3s,
                other => {
                    return Err(located(
                        e,
                        Error::Validation(format!("unknown constant attribute '{other}' (expected range or 3s_range)")),
                    ))
                }
            };
            *slot = Some(parse_bounds(&e.value, &entry.nominal).map_err(|err| located(e, err))?);
        }
        tracing::debug!(section, n = entries.len(), "loaded constants");
        Ok(Self { entries })
    }

    /// Entry by exact name.
    pub fn get(&self, name: &str) -> Option<&ConstantEntry> {
        self.entries.get(name)
    }

    /// Names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Entries sorted by name.
    pub fn entries(&self) -> impl Iterator<Item = &ConstantEntry> {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `<name>_nh` / `<name>_ih` if present, else `<name>`.
    pub fn for_hierarchy(&self, name: &str, hierarchy: Hierarchy) -> Option<&ConstantEntry> {
        self.entries
            .get(&format!("{name}_{}", hierarchy.tag()))
            .or_else(|| self.entries.get(name))
    }

    /// Effective table for one hierarchy, keyed by base name. Entries for the
    /// other hierarchy are dropped.
    pub fn select(&self, hierarchy: Hierarchy) -> BTreeMap<String, &ConstantEntry> {
        let mut out = BTreeMap::new();
        for e in self.entries.values() {
            match e.hierarchy() {
                None => {
                    out.entry(e.name.clone()).or_insert(e);
                }
                Some(h) if h == hierarchy => {
                    out.insert(e.base_name().to_string(), e);
                }
                Some(_) => {}
            }
        }
        out
    }

    /// Every suffixed constant grouped with its counterpart.
    pub fn hierarchy_pairs(&self) -> Vec<HierarchyPair<'_>> {
        let mut pairs: BTreeMap<&str, HierarchyPair<'_>> = BTreeMap::new();
        for e in self.entries.values() {
            let Some((base, h)) = Hierarchy::split_suffix(&e.name) else { continue };
            let pair = pairs.entry(base).or_insert_with(|| HierarchyPair {
                base: base.to_string(),
                normal: None,
                inverted: None,
            });
            match h {
                Hierarchy::Normal => pair.normal = Some(e),
                Hierarchy::Inverted => pair.inverted = Some(e),
            }
        }
        pairs.into_values().collect()
    }

    /// Parameters for one hierarchy (all fixed, see [`ConstantEntry::to_param`]).
    pub fn to_param_set(&self, hierarchy: Hierarchy) -> Result<ParamSet> {
        let mut set = ParamSet::new();
        for e in self.select(hierarchy).values() {
            set.push(e.to_param()?)?;
        }
        Ok(set)
    }
}

/// `[lo, hi] unit` as written, or `nominal + [..]` evaluated in the nominal's
/// unit.
fn parse_bounds(text: &str, nominal: &Quantity) -> Result<Bounds> {
    if text.trim_start().starts_with("nominal") {
        let (lo, hi) = parse_range(text, nominal)?;
        return Ok(Bounds { lo, hi, unit: nominal.unit.clone() });
    }
    let (values, unit) = parse_array(text)?;
    match values.as_slice() {
        [lo, hi] if lo <= hi => Ok(Bounds { lo: *lo, hi: *hi, unit }),
        [lo, hi] => Err(Error::Validation(format!("range lower bound {lo} > upper bound {hi}"))),
        _ => Err(Error::Validation(format!("range needs exactly 2 bounds, got {}", values.len()))),
    }
}

fn located(e: &Entry, err: Error) -> Error {
    Error::parse(&e.source, e.line, format!("{}: {err}", e.key))
}
