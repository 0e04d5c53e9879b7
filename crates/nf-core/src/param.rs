//! Fit parameters, ordered parameter sets and hierarchy selectors.

use std::collections::{BTreeMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::prior::Prior;
use crate::quantity::Quantity;
use crate::{Error, Result};

/// Significant figures kept when hashing magnitudes.
const HASH_SIGFIGS: usize = 12;

/// A single named parameter.
///
/// `range` and the magnitude handed to the prior are expressed in the unit
/// of `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name, e.g. `theta23`.
    pub name: String,
    value: Quantity,
    nominal: Quantity,
    /// Fixed parameters are not varied by a fit.
    pub fixed: bool,
    range: Option<(f64, f64)>,
    prior: Option<Prior>,
    /// LaTeX label.
    pub tex: Option<String>,
    /// Whether only discrete values are meaningful.
    pub is_discrete: bool,
}

impl Param {
    /// Free parameter at `value`, which is also its nominal.
    pub fn new(name: impl Into<String>, value: Quantity) -> Self {
        Self {
            name: name.into(),
            nominal: value.clone(),
            value,
            fixed: false,
            range: None,
            prior: None,
            tex: None,
            is_discrete: false,
        }
    }

    /// Set the fixed flag.
    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    /// Set the allowed range; it must contain the nominal value.
    pub fn with_range(mut self, lo: f64, hi: f64) -> Result<Self> {
        if !(lo.is_finite() && hi.is_finite()) || lo > hi {
            return Err(Error::Validation(format!(
                "param '{}': invalid range [{lo}, {hi}]",
                self.name
            )));
        }
        let nominal = self.nominal.magnitude;
        if nominal < lo || nominal > hi {
            return Err(Error::Validation(format!(
                "param '{}': nominal value {nominal} outside range [{lo}, {hi}]",
                self.name
            )));
        }
        self.range = Some((lo, hi));
        Ok(self)
    }

    /// Attach a prior after checking its parameters.
    pub fn with_prior(mut self, prior: Prior) -> Result<Self> {
        prior
            .validate()
            .map_err(|e| Error::Validation(format!("param '{}': {e}", self.name)))?;
        self.prior = Some(prior);
        Ok(self)
    }

    /// Set the LaTeX label.
    pub fn with_tex(mut self, tex: impl Into<String>) -> Self {
        self.tex = Some(tex.into());
        self
    }

    /// Current value.
    pub fn value(&self) -> &Quantity {
        &self.value
    }

    /// Value the parameter was declared with.
    pub fn nominal(&self) -> &Quantity {
        &self.nominal
    }

    /// Allowed range in the value's unit.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    /// Prior, if any.
    pub fn prior(&self) -> Option<&Prior> {
        self.prior.as_ref()
    }

    /// Change the current value. The unit must be compatible and the
    /// converted magnitude must lie inside the range.
    pub fn set_value(&mut self, value: Quantity) -> Result<()> {
        let converted = value.to(&self.value.unit).map_err(|e| {
            Error::Validation(format!("param '{}': {e}", self.name))
        })?;
        if let Some((lo, hi)) = self.range {
            if converted.magnitude < lo || converted.magnitude > hi {
                return Err(Error::Validation(format!(
                    "param '{}': value {} outside range [{lo}, {hi}]",
                    self.name, converted.magnitude
                )));
            }
        }
        self.value.magnitude = converted.magnitude;
        Ok(())
    }

    /// Change the current magnitude (in the param's own unit).
    pub fn set_magnitude(&mut self, magnitude: f64) -> Result<()> {
        let q = Quantity::new(magnitude, self.value.unit.clone());
        self.set_value(q)
    }

    /// Restore the nominal value.
    pub fn reset(&mut self) {
        self.value = self.nominal.clone();
    }

    /// Position of the value within the range, mapped onto `[0, 1]`.
    pub fn rescaled_value(&self) -> Result<f64> {
        let (lo, hi) = self.span()?;
        Ok((self.value.magnitude - lo) / (hi - lo))
    }

    /// Inverse of [`Param::rescaled_value`].
    pub fn set_rescaled_value(&mut self, r: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&r) {
            return Err(Error::Validation(format!(
                "param '{}': rescaled value {r} outside [0, 1]",
                self.name
            )));
        }
        let (lo, hi) = self.span()?;
        self.set_magnitude(lo + r * (hi - lo))
    }

    fn span(&self) -> Result<(f64, f64)> {
        match self.range {
            Some((lo, hi)) if hi > lo => Ok((lo, hi)),
            _ => Err(Error::Validation(format!(
                "param '{}': rescaling needs a range of non-zero width",
                self.name
            ))),
        }
    }

    /// Prior log-likelihood at the current value (0 without a prior).
    pub fn prior_llh(&self) -> Result<f64> {
        match &self.prior {
            Some(p) => p
                .llh(self.value.magnitude)
                .map_err(|e| Error::Validation(format!("param '{}': {e}", self.name))),
            None => Ok(0.0),
        }
    }

    /// `-2 * prior_llh()`.
    pub fn prior_chi2(&self) -> Result<f64> {
        Ok(-2.0 * self.prior_llh()?)
    }
}

/// Ordered collection of uniquely named parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet {
    params: Vec<Param>,
}

impl ParamSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from parameters, rejecting duplicate names.
    pub fn from_params(params: impl IntoIterator<Item = Param>) -> Result<Self> {
        let mut set = Self::new();
        for p in params {
            set.push(p)?;
        }
        Ok(set)
    }

    /// Append a parameter. Duplicate names are an error.
    pub fn push(&mut self, param: Param) -> Result<()> {
        if self.get(&param.name).is_some() {
            return Err(Error::Validation(format!("duplicate param '{}'", param.name)));
        }
        self.params.push(param);
        Ok(())
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    /// Parameter by name.
    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Mutable parameter by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Param> {
        self.params.iter_mut().find(|p| p.name == name)
    }

    fn require_mut(&mut self, name: &str) -> Result<&mut Param> {
        self.get_mut(name).ok_or_else(|| Error::Validation(format!("no param named '{name}'")))
    }

    /// Names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    /// Subset of free parameters.
    pub fn free(&self) -> ParamSet {
        ParamSet { params: self.params.iter().filter(|p| !p.fixed).cloned().collect() }
    }

    /// Subset of fixed parameters.
    pub fn fixed(&self) -> ParamSet {
        ParamSet { params: self.params.iter().filter(|p| p.fixed).cloned().collect() }
    }

    /// Set one parameter's value.
    pub fn set_value(&mut self, name: &str, value: Quantity) -> Result<()> {
        self.require_mut(name)?.set_value(value)
    }

    /// Set the magnitudes of all free parameters, in order, each in its own unit.
    pub fn set_free_values(&mut self, values: &[f64]) -> Result<()> {
        let n_free = self.params.iter().filter(|p| !p.fixed).count();
        if values.len() != n_free {
            return Err(Error::Validation(format!(
                "expected {n_free} free values, got {}",
                values.len()
            )));
        }
        for (p, &v) in self.params.iter_mut().filter(|p| !p.fixed).zip(values) {
            p.set_magnitude(v)?;
        }
        Ok(())
    }

    /// Reset every parameter to its nominal value.
    pub fn reset_all(&mut self) {
        self.params.iter_mut().for_each(Param::reset);
    }

    /// Reset free parameters to their nominal values.
    pub fn reset_free(&mut self) {
        self.params.iter_mut().filter(|p| !p.fixed).for_each(Param::reset);
    }

    /// Mark the named parameters fixed.
    pub fn fix(&mut self, names: &[&str]) -> Result<()> {
        for name in names {
            self.require_mut(name)?.fixed = true;
        }
        Ok(())
    }

    /// Mark the named parameters free.
    pub fn unfix(&mut self, names: &[&str]) -> Result<()> {
        for name in names {
            self.require_mut(name)?.fixed = false;
        }
        Ok(())
    }

    /// Draw every free, ranged parameter uniformly from its range.
    /// Free parameters without a range keep their value.
    pub fn randomize_free<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        for p in self.params.iter_mut().filter(|p| !p.fixed) {
            if let Some((lo, hi)) = p.range {
                let v = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
                p.set_magnitude(v)?;
            }
        }
        Ok(())
    }

    /// Sum of prior log-likelihoods.
    pub fn priors_llh(&self) -> Result<f64> {
        self.params.iter().map(Param::prior_llh).sum()
    }

    /// Sum of prior chi-squares.
    pub fn priors_chi2(&self) -> Result<f64> {
        self.params.iter().map(Param::prior_chi2).sum()
    }

    /// Replace parameters with the same name as one in `other`, append the rest.
    pub fn update(&mut self, other: &ParamSet) {
        for p in &other.params {
            match self.get_mut(&p.name) {
                Some(existing) => *existing = p.clone(),
                None => self.params.push(p.clone()),
            }
        }
    }

    /// SHA-256 over a canonical, order-independent description of the set:
    /// name, value, nominal, unit, flags, range and the prior with its
    /// parameters.
    ///
    /// Magnitudes are rounded to 12 significant figures so values that only
    /// differ by float noise hash equally.
    pub fn hash(&self) -> String {
        let mut sorted: Vec<&Param> = self.params.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut h = Sha256::new();
        for p in sorted {
            let range = p
                .range
                .map(|(lo, hi)| format!("[{},{}]", sigfig(lo), sigfig(hi)))
                .unwrap_or_else(|| "none".to_string());
            let prior = p.prior.as_ref().map(prior_repr).unwrap_or_else(|| "none".to_string());
            let line = format!(
                "{}|{}|{}|{}|{}|{}|{}|{}\n",
                p.name,
                sigfig(p.value.magnitude),
                sigfig(p.nominal.magnitude),
                p.value.unit,
                p.fixed,
                p.is_discrete,
                range,
                prior
            );
            h.update(line.as_bytes());
        }
        let out = h.finalize();
        let mut s = String::with_capacity(64);
        for b in out {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

impl<'a> IntoIterator for &'a ParamSet {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

fn sigfig(x: f64) -> String {
    if x == 0.0 {
        return "0".to_string();
    }
    format!("{:.*e}", HASH_SIGFIGS - 1, x)
}

fn prior_repr(prior: &Prior) -> String {
    let floats = |xs: &[f64]| xs.iter().map(|&x| sigfig(x)).collect::<Vec<_>>().join(",");
    match prior {
        Prior::Uniform => "uniform".to_string(),
        Prior::Gaussian { mean, stddev } => format!("gaussian({},{})", sigfig(*mean), sigfig(*stddev)),
        Prior::Jeffreys { lo, hi } => format!("jeffreys({},{})", sigfig(*lo), sigfig(*hi)),
        Prior::Linterp { x, llh } => format!("linterp([{}],[{}])", floats(x), floats(llh)),
    }
}

/// A base parameter set plus named alternatives (e.g. `nh`, `ih`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSelector {
    /// Parameters that apply regardless of selection.
    pub base: ParamSet,
    /// Alternative definitions keyed by selector name.
    pub selections: BTreeMap<String, ParamSet>,
}

impl ParamSelector {
    /// Selector with only a base set.
    pub fn new(base: ParamSet) -> Self {
        Self { base, selections: BTreeMap::new() }
    }

    /// Add a parameter to the named selection.
    pub fn add_to_selection(&mut self, selection: &str, param: Param) -> Result<()> {
        self.selections.entry(selection.to_string()).or_default().push(param)
    }

    /// Declared selector names, sorted.
    pub fn selection_names(&self) -> Vec<&str> {
        self.selections.keys().map(String::as_str).collect()
    }

    /// Effective set for the given selections: base parameters overridden by
    /// the selected alternatives. A parameter defined in two of the selected
    /// alternatives is ambiguous and rejected.
    pub fn select(&self, names: &[&str]) -> Result<ParamSet> {
        let mut out = self.base.clone();
        let mut seen: HashSet<&str> = HashSet::new();
        for name in names {
            let sel = self.selections.get(*name).ok_or_else(|| {
                Error::Validation(format!(
                    "unknown param selection '{name}' (known: {:?})",
                    self.selection_names()
                ))
            })?;
            for p in sel {
                if !seen.insert(p.name.as_str()) {
                    return Err(Error::Validation(format!(
                        "param '{}' is defined by more than one of the selections {names:?}",
                        p.name
                    )));
                }
            }
            out.update(sel);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn deg(x: f64) -> Quantity {
        Quantity::new(x, Unit::parse("degree").unwrap())
    }

    fn theta23() -> Param {
        Param::new("theta23", deg(45.0)).with_range(0.0, 90.0).unwrap()
    }

    #[test]
    fn test_range_must_contain_nominal() {
        let err = Param::new("theta23", deg(45.0)).with_range(50.0, 90.0);
        assert!(err.is_err());
        assert!(Param::new("x", deg(1.0)).with_range(2.0, 1.0).is_err());
    }

    #[test]
    fn test_set_value_converts_and_checks_range() {
        let mut p = theta23();
        let rad = Unit::parse("rad").unwrap();
        p.set_value(Quantity::new(std::f64::consts::FRAC_PI_4 / 2.0, rad.clone())).unwrap();
        assert_relative_eq!(p.value().magnitude, 22.5, epsilon = 1e-9);
        assert!(p.set_value(Quantity::new(2.0, rad)).is_err());
        assert!(p.set_value(Quantity::new(1.0, Unit::parse("km").unwrap())).is_err());
        p.reset();
        assert_relative_eq!(p.value().magnitude, 45.0);
    }

    #[test]
    fn test_rescaled_value() {
        let mut p = theta23();
        assert_relative_eq!(p.rescaled_value().unwrap(), 0.5);
        p.set_rescaled_value(0.25).unwrap();
        assert_relative_eq!(p.value().magnitude, 22.5);
        assert!(p.set_rescaled_value(1.5).is_err());
        assert!(Param::new("x", deg(1.0)).rescaled_value().is_err());
    }

    #[test]
    fn test_prior_penalty() {
        let p = Param::new("theta13", deg(8.5))
            .with_prior(Prior::Gaussian { mean: 8.6, stddev: 0.1 })
            .unwrap();
        assert_relative_eq!(p.prior_chi2().unwrap(), 1.0, epsilon = 1e-9);
        assert_eq!(theta23().prior_chi2().unwrap(), 0.0);
    }

    #[test]
    fn test_paramset_free_fixed_and_values() {
        let mut ps = ParamSet::from_params([
            theta23(),
            Param::new("deltacp", deg(0.0)).with_range(0.0, 360.0).unwrap().with_fixed(true),
        ])
        .unwrap();
        assert_eq!(ps.free().names(), vec!["theta23"]);
        assert_eq!(ps.fixed().names(), vec!["deltacp"]);
        ps.set_free_values(&[40.0]).unwrap();
        assert_relative_eq!(ps.get("theta23").unwrap().value().magnitude, 40.0);
        assert!(ps.set_free_values(&[1.0, 2.0]).is_err());
        ps.reset_free();
        assert_relative_eq!(ps.get("theta23").unwrap().value().magnitude, 45.0);
        ps.unfix(&["deltacp"]).unwrap();
        assert_eq!(ps.free().len(), 2);
        assert!(ps.fix(&["nope"]).is_err());
    }

    #[test]
    fn test_duplicate_rejected() {
        assert!(ParamSet::from_params([theta23(), theta23()]).is_err());
    }

    #[test]
    fn test_randomize_stays_in_range() {
        let mut ps = ParamSet::from_params([theta23()]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            ps.randomize_free(&mut rng).unwrap();
            let v = ps.get("theta23").unwrap().value().magnitude;
            assert!((0.0..=90.0).contains(&v));
        }
    }

    #[test]
    fn test_hash_order_independent_and_value_sensitive() {
        let a = ParamSet::from_params([theta23(), Param::new("x", deg(1.0))]).unwrap();
        let b = ParamSet::from_params([Param::new("x", deg(1.0)), theta23()]).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);

        let mut c = a.clone();
        c.set_value("theta23", deg(46.0)).unwrap();
        assert_ne!(a.hash(), c.hash());

        let mut d = a.clone();
        d.set_value("theta23", deg(45.0 + 1e-14)).unwrap();
        assert_eq!(a.hash(), d.hash());
    }

    #[test]
    fn test_hash_covers_prior_parameters_and_nominal() {
        let with_prior = |stddev: f64| {
            let p = theta23().with_prior(Prior::Gaussian { mean: 45.0, stddev }).unwrap();
            ParamSet::from_params([p]).unwrap()
        };
        assert_ne!(with_prior(1.0).hash(), with_prior(9.0).hash());
        assert_eq!(with_prior(1.0).hash(), with_prior(1.0).hash());

        let jeffreys = |hi: f64| {
            let p = Param::new("x", deg(1.0)).with_prior(Prior::Jeffreys { lo: 0.5, hi }).unwrap();
            ParamSet::from_params([p]).unwrap()
        };
        assert_ne!(jeffreys(2.0).hash(), jeffreys(3.0).hash());

        // Same current value, different nominal.
        let mut moved = ParamSet::from_params([Param::new("theta23", deg(40.0))]).unwrap();
        moved.set_value("theta23", deg(45.0)).unwrap();
        let plain = ParamSet::from_params([Param::new("theta23", deg(45.0))]).unwrap();
        assert_ne!(moved.hash(), plain.hash());

        let mut discrete = Param::new("theta23", deg(45.0));
        discrete.is_discrete = true;
        assert_ne!(ParamSet::from_params([discrete]).unwrap().hash(), plain.hash());
    }

    #[test]
    fn test_selector() {
        let mut sel = ParamSelector::new(ParamSet::from_params([theta23()]).unwrap());
        sel.add_to_selection("nh", Param::new("theta23", deg(48.3))).unwrap();
        sel.add_to_selection("ih", Param::new("theta23", deg(48.6))).unwrap();
        let nh = sel.select(&["nh"]).unwrap();
        assert_relative_eq!(nh.get("theta23").unwrap().value().magnitude, 48.3);
        let base = sel.select(&[]).unwrap();
        assert_relative_eq!(base.get("theta23").unwrap().value().magnitude, 45.0);
        assert!(sel.select(&["nh", "ih"]).is_err());
        assert!(sel.select(&["xh"]).is_err());
    }
}
