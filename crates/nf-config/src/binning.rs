//! Binning declarations from a `[binning]` section.
//!
//! ```text
//! [binning]
//! reco_binning.order = reco_energy, reco_coszen
//! reco_binning.reco_energy = {'num_bins': 10, 'is_log': True, 'domain': [5, 80] units.GeV}
//! reco_binning.reco_coszen = {'num_bins': 10, 'is_lin': True, 'domain': [-1, 1]}
//! ```

use std::collections::{BTreeMap, BTreeSet};

use nf_core::{Error, Result, Unit};
use serde::Serialize;

use crate::document::{ConfigDocument, Entry};
use crate::value::{parse_name_list, parse_value, Value};

/// Section holding binning declarations.
pub const BINNING_SECTION: &str = "binning";

/// Largest `num_bins` accepted for one dimension.
pub const MAX_BINS: usize = 1_000_000;

/// Bin edges along one dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OneDimBinning {
    /// Dimension name, e.g. `true_energy`.
    pub name: String,
    /// LaTeX label.
    pub tex: Option<String>,
    /// Unit of the edges.
    pub unit: Unit,
    edges: Vec<f64>,
    /// Log-spaced (centers are geometric means).
    pub is_log: bool,
}

impl OneDimBinning {
    /// Binning from explicit edges.
    pub fn from_edges(name: &str, edges: Vec<f64>, unit: Unit, is_log: bool) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::Validation(format!("binning '{name}' needs at least 2 edges, got {}", edges.len())));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(Error::Validation(format!("binning '{name}' has non-finite edges")));
        }
        if edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Validation(format!("binning '{name}' edges must be strictly increasing")));
        }
        if is_log && edges[0] <= 0.0 {
            return Err(Error::Validation(format!("log binning '{name}' needs a positive domain, got {}", edges[0])));
        }
        Ok(Self { name: name.to_string(), tex: None, unit, edges, is_log })
    }

    /// `num_bins` equal-width bins over `[lo, hi]`.
    pub fn linear(name: &str, lo: f64, hi: f64, num_bins: usize, unit: Unit) -> Result<Self> {
        check_num_bins(name, num_bins)?;
        let step = (hi - lo) / num_bins as f64;
        let mut edges: Vec<f64> = (0..=num_bins).map(|i| lo + step * i as f64).collect();
        edges[num_bins] = hi;
        Self::from_edges(name, edges, unit, false)
    }

    /// `num_bins` bins equally spaced in `ln x` over `[lo, hi]`.
    pub fn logarithmic(name: &str, lo: f64, hi: f64, num_bins: usize, unit: Unit) -> Result<Self> {
        check_num_bins(name, num_bins)?;
        if lo <= 0.0 || hi <= 0.0 {
            return Err(Error::Validation(format!("log binning '{name}' needs a positive domain, got [{lo}, {hi}]")));
        }
        let (a, b) = (lo.ln(), hi.ln());
        let step = (b - a) / num_bins as f64;
        let mut edges: Vec<f64> = (0..=num_bins).map(|i| (a + step * i as f64).exp()).collect();
        edges[0] = lo;
        edges[num_bins] = hi;
        Self::from_edges(name, edges, unit, true)
    }

    /// Build from a dict value with keys `num_bins`, `is_log`/`is_lin`,
    /// `domain`, `bin_edges`, `tex`.
    pub fn from_value(name: &str, value: &Value) -> Result<Self> {
        let Value::Dict(d) = value else {
            return Err(Error::Validation(format!("binning '{name}' must be a dict, got {}", value.type_name())));
        };
        for key in d.keys() {
            if !matches!(key.as_str(), "num_bins" | "is_log" | "is_lin" | "domain" | "bin_edges" | "tex") {
                return Err(Error::Validation(format!("binning '{name}': unknown key '{key}'")));
            }
        }
        let flag = |key: &str| -> Result<Option<bool>> {
            match d.get(key) {
                None => Ok(None),
                Some(Value::Bool(b)) => Ok(Some(*b)),
                Some(other) => Err(Error::Validation(format!(
                    "binning '{name}': '{key}' must be True/False, got {}",
                    other.type_name()
                ))),
            }
        };
        let is_log = match (flag("is_log")?, flag("is_lin")?) {
            (Some(log), Some(lin)) if log == lin => {
                return Err(Error::Validation(format!("binning '{name}': is_log and is_lin contradict")))
            }
            (Some(log), _) => log,
            (None, Some(lin)) => !lin,
            (None, None) => false,
        };

        let mut binning = match (d.get("bin_edges"), d.get("num_bins"), d.get("domain")) {
            (Some(edges), None, _) => {
                let (values, unit) = numbers(name, "bin_edges", edges)?;
                Self::from_edges(name, values, unit, is_log)?
            }
            (None, Some(n), Some(domain)) => {
                let n = match n {
                    Value::Int(n) if *n > 0 => usize::try_from(*n).unwrap_or(usize::MAX),
                    _ => return Err(Error::Validation(format!("binning '{name}': num_bins must be a positive integer"))),
                };
                check_num_bins(name, n)?;
                let (values, unit) = numbers(name, "domain", domain)?;
                let &[lo, hi] = values.as_slice() else {
                    return Err(Error::Validation(format!("binning '{name}': domain needs 2 values")));
                };
                if is_log {
                    Self::logarithmic(name, lo, hi, n, unit)?
                } else {
                    Self::linear(name, lo, hi, n, unit)?
                }
            }
            (Some(_), Some(_), _) => {
                return Err(Error::Validation(format!("binning '{name}': give either bin_edges or num_bins, not both")))
            }
            _ => {
                return Err(Error::Validation(format!("binning '{name}' needs bin_edges or num_bins with domain")))
            }
        };
        binning.tex = match d.get("tex") {
            Some(Value::Str(s)) => Some(s.clone()),
            Some(Value::None) | None => None,
            Some(other) => {
                return Err(Error::Validation(format!("binning '{name}': tex must be a string, got {}", other.type_name())))
            }
        };
        Ok(binning)
    }

    /// Bin edges.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bins.
    pub fn num_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// `(first edge, last edge)`.
    pub fn domain(&self) -> (f64, f64) {
        (self.edges[0], self.edges[self.edges.len() - 1])
    }

    /// Bin centers: midpoints, or geometric means for log binning.
    pub fn centers(&self) -> Vec<f64> {
        self.edges
            .windows(2)
            .map(|w| if self.is_log { (w[0] * w[1]).sqrt() } else { 0.5 * (w[0] + w[1]) })
            .collect()
    }
}

fn check_num_bins(name: &str, num_bins: usize) -> Result<()> {
    if num_bins == 0 {
        return Err(Error::Validation(format!("binning '{name}' needs at least one bin")));
    }
    if num_bins > MAX_BINS {
        return Err(Error::Validation(format!(
            "binning '{name}': {num_bins} bins exceeds the limit of {MAX_BINS}"
        )));
    }
    Ok(())
}

fn numbers(name: &str, key: &str, v: &Value) -> Result<(Vec<f64>, Unit)> {
    match v {
        Value::Array { values, unit } => Ok((values.clone(), unit.clone())),
        other => Err(Error::Validation(format!(
            "binning '{name}': {key} must be a numeric array, got {}",
            other.type_name()
        ))),
    }
}

/// Several named dimensions in a fixed order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiDimBinning {
    /// Binning name, e.g. `reco_binning`.
    pub name: String,
    /// Dimensions in declared order.
    pub dims: Vec<OneDimBinning>,
}

impl MultiDimBinning {
    /// Dimension names in order.
    pub fn order(&self) -> Vec<&str> {
        self.dims.iter().map(|d| d.name.as_str()).collect()
    }

    /// Bins per dimension.
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(OneDimBinning::num_bins).collect()
    }

    /// Total number of bins.
    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    /// Dimension by name.
    pub fn dim(&self, name: &str) -> Option<&OneDimBinning> {
        self.dims.iter().find(|d| d.name == name)
    }

    /// Bin centers per dimension.
    pub fn centers(&self) -> Vec<Vec<f64>> {
        self.dims.iter().map(OneDimBinning::centers).collect()
    }
}

/// All binnings declared in a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BinningSet {
    binnings: BTreeMap<String, MultiDimBinning>,
}

impl BinningSet {
    /// Read the `[binning]` section of an interpolated document; no section
    /// gives an empty set.
    pub fn from_document(doc: &ConfigDocument) -> Result<Self> {
        let Some(section) = doc.section(BINNING_SECTION) else {
            return Ok(Self::default());
        };

        let mut orders: BTreeMap<&str, &Entry> = BTreeMap::new();
        let mut dims: BTreeMap<&str, BTreeMap<&str, &Entry>> = BTreeMap::new();
        for e in &section.entries {
            let Some((binning, dim)) = e.key.split_once('.') else {
                return Err(Error::parse(&e.source, e.line, format!("binning key '{}' must be <name>.<dim>", e.key)));
            };
            if dim == "order" {
                orders.insert(binning, e);
            } else {
                dims.entry(binning).or_default().insert(dim, e);
            }
        }

        let mut binnings = BTreeMap::new();
        for (name, dim_entries) in &dims {
            if !orders.contains_key(name) {
                let first = dim_entries.values().next().map_or(section.line, |e| e.line);
                return Err(Error::parse(&section.source, first, format!("binning '{name}' has no {name}.order")));
            }
        }
        for (name, order_entry) in orders {
            let order = parse_name_list(&order_entry.value);
            if order.is_empty() {
                return Err(Error::parse(&order_entry.source, order_entry.line, format!("{name}.order is empty")));
            }
            let mut unique = BTreeSet::new();
            if let Some(dup) = order.iter().find(|d| !unique.insert(d.as_str())) {
                return Err(Error::parse(
                    &order_entry.source,
                    order_entry.line,
                    format!("dimension '{dup}' appears more than once in {name}.order"),
                ));
            }
            let declared = dims.get(name).cloned().unwrap_or_default();
            let mut out = Vec::with_capacity(order.len());
            for dim in &order {
                let e = declared.get(dim.as_str()).ok_or_else(|| {
                    Error::parse(&order_entry.source, order_entry.line, format!("{name}.order names undefined dimension '{dim}'"))
                })?;
                let v = parse_value(&e.value).map_err(|err| Error::parse(&e.source, e.line, err.to_string()))?;
                let b = OneDimBinning::from_value(dim, &v).map_err(|err| Error::parse(&e.source, e.line, err.to_string()))?;
                out.push(b);
            }
            if let Some((extra, e)) = declared.iter().find(|(d, _)| !order.iter().any(|o| o.as_str() == **d)) {
                return Err(Error::parse(&e.source, e.line, format!("dimension '{extra}' is not listed in {name}.order")));
            }
            tracing::debug!(binning = name, dims = ?order, "loaded binning");
            binnings.insert(name.to_string(), MultiDimBinning { name: name.to_string(), dims: out });
        }
        Ok(Self { binnings })
    }

    /// Binning by name.
    pub fn get(&self, name: &str) -> Option<&MultiDimBinning> {
        self.binnings.get(name)
    }

    /// Whether `name` is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.binnings.contains_key(name)
    }

    /// Names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.binnings.keys().map(String::as_str).collect()
    }

    /// Number of binnings.
    pub fn len(&self) -> usize {
        self.binnings.len()
    }

    /// Whether no binning is declared.
    pub fn is_empty(&self) -> bool {
        self.binnings.is_empty()
    }
}
