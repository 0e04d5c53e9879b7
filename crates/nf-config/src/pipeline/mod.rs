//! Pipeline declarations: stage order, modes, parameters and keyword
//! arguments.
//!
//! ```text
//! [pipeline]
//! order = data.simple_data_loader, osc.prob3, utils.hist
//! param_selections = nh
//!
//! [osc.prob3]
//! calc_mode = true_allsky_fine
//! apply_mode = events
//! param.earth_model = osc/PREM_12layer.dat
//! param.theta12 = ${osc:theta12}
//! param.theta12.fixed = True
//! param.nh.theta23 = ${osc:theta23_nh}
//! param.nh.theta23.fixed = False
//! param.nh.theta23.range = [0, 90] * units.deg
//! param.ih.theta23 = ${osc:theta23_ih}
//! ```
//!
//! Parameters whose value is not numeric (file names, flags) are kept as
//! stage settings rather than fit parameters.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use nf_core::{Error, Param, ParamSelector, ParamSet, Prior, Quantity, Result};
use serde::{Deserialize, Serialize, Serializer};

use crate::binning::{BinningSet, BINNING_SECTION};
use crate::constants::Hierarchy;
use crate::document::{ConfigDocument, Entry, Section, DEFAULT_SECTION};
use crate::resources;
use crate::value::{parse_bool, parse_name_list, parse_range, parse_value, unquote, Value};

/// Section declaring the stage order.
pub const PIPELINE_SECTION: &str = "pipeline";

const PIPELINE_KEYS: [&str; 5] = ["order", "param_selections", "name", "output_binning", "output_key"];
const PARAM_PREFIXES: [&str; 2] = ["param.", "params."];

/// Where a stage computes or applies its results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Per event.
    Events,
    /// On the named binning.
    Binning(String),
}

impl Mode {
    /// `events`, a binning name, or `None`/empty for no mode.
    pub fn parse(text: &str) -> Option<Mode> {
        let t = unquote(text).unwrap_or_else(|| text.trim().to_string());
        match t.as_str() {
            "" | "None" => None,
            "events" => Some(Mode::Events),
            _ => Some(Mode::Binning(t)),
        }
    }

    /// Binning name, if binned.
    pub fn binning(&self) -> Option<&str> {
        match self {
            Mode::Events => None,
            Mode::Binning(name) => Some(name),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Events => f.write_str("events"),
            Mode::Binning(name) => f.write_str(name),
        }
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One `[stage.service]` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageConfig {
    /// `stage.service`.
    pub name: String,
    /// Stage part, e.g. `osc`.
    pub stage: String,
    /// Service part, e.g. `prob3`.
    pub service: String,
    /// Calculation mode.
    pub calc_mode: Option<Mode>,
    /// Application mode.
    pub apply_mode: Option<Mode>,
    /// Numeric parameters, with per-selection alternatives.
    pub params: ParamSelector,
    /// Non-numeric `param.*` values (file names, flags).
    pub param_settings: BTreeMap<String, Value>,
    /// Every other key.
    pub kwargs: BTreeMap<String, Value>,
    /// File of the section header.
    pub source: String,
    /// Line of the section header.
    pub line: usize,
}

impl StageConfig {
    /// Effective parameters under `selections`. Selections this stage does
    /// not declare are skipped.
    pub fn params(&self, selections: &[&str]) -> Result<ParamSet> {
        let own: Vec<&str> = selections
            .iter()
            .copied()
            .filter(|s| self.params.selections.contains_key(*s))
            .collect();
        self.params.select(&own)
    }

    /// Names of every parameter or setting declared in any selection.
    pub fn declared_names(&self) -> BTreeSet<&str> {
        let mut out: BTreeSet<&str> = self.params.base.iter().map(|p| p.name.as_str()).collect();
        for set in self.params.selections.values() {
            out.extend(set.iter().map(|p| p.name.as_str()));
        }
        out.extend(self.param_settings.keys().map(String::as_str));
        out
    }
}

/// A fully loaded pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    /// Optional pipeline name.
    pub name: Option<String>,
    /// Stage names in execution order.
    pub order: Vec<String>,
    /// Active parameter selections.
    pub param_selections: Vec<String>,
    /// Binning of the pipeline output.
    pub output_binning: Option<String>,
    /// Output keys.
    pub output_key: Vec<String>,
    /// Stages, in `order`.
    pub stages: Vec<StageConfig>,
    /// Declared binnings.
    pub binnings: BinningSet,
    /// Stage-like sections not listed in `order`.
    pub ignored_sections: Vec<String>,
}

impl PipelineConfig {
    /// Read, interpolate and load a pipeline file.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_document(&ConfigDocument::from_file(path)?)
    }

    /// Parse, interpolate and load pipeline text.
    pub fn parse_str(text: &str, source_name: &str) -> Result<Self> {
        Self::from_document(&ConfigDocument::parse_str(text, source_name)?)
    }

    /// Load from a parsed document. References are interpolated first.
    pub fn from_document(doc: &ConfigDocument) -> Result<Self> {
        let doc = doc.interpolate()?;
        let pipeline = doc
            .section(PIPELINE_SECTION)
            .ok_or_else(|| Error::Validation(format!("missing [{PIPELINE_SECTION}] section")))?;

        for key in pipeline.keys() {
            if !PIPELINE_KEYS.contains(&key) {
                tracing::warn!(key, "ignoring unknown key in [pipeline]");
            }
        }

        let order_entry = pipeline.entry("order").ok_or_else(|| {
            Error::parse(&pipeline.source, pipeline.line, "[pipeline] has no 'order'")
        })?;
        let order = parse_name_list(&order_entry.value);
        if order.is_empty() {
            return Err(Error::parse(&order_entry.source, order_entry.line, "[pipeline] order is empty"));
        }
        let mut seen = BTreeSet::new();
        for name in &order {
            if !seen.insert(name.as_str()) {
                return Err(Error::parse(
                    &order_entry.source,
                    order_entry.line,
                    format!("stage '{name}' appears more than once in order"),
                ));
            }
            if split_stage_name(name).is_none() {
                return Err(Error::parse(
                    &order_entry.source,
                    order_entry.line,
                    format!("stage '{name}' must be written as <stage>.<service>"),
                ));
            }
        }

        let param_selections =
            pipeline.get("param_selections").map(parse_name_list).unwrap_or_default();
        let mut selectors: BTreeSet<String> = param_selections.iter().cloned().collect();
        selectors.extend(Hierarchy::ALL.iter().map(|h| h.tag().to_string()));

        let binnings = BinningSet::from_document(&doc)?;

        let mut stages = Vec::with_capacity(order.len());
        for name in &order {
            let section = doc.section(name).ok_or_else(|| {
                Error::parse(&order_entry.source, order_entry.line, format!("no section [{name}] for stage '{name}'"))
            })?;
            stages.push(load_stage(name, section, &selectors)?);
        }

        let ignored_sections: Vec<String> = doc
            .sections()
            .map(|s| s.name.as_str())
            .filter(|n| {
                *n != PIPELINE_SECTION
                    && *n != BINNING_SECTION
                    && *n != DEFAULT_SECTION
                    && split_stage_name(n).is_some()
                    && !seen.contains(n)
            })
            .map(str::to_string)
            .collect();
        for name in &ignored_sections {
            tracing::warn!(section = %name, "stage section is not in [pipeline] order; ignoring it");
        }

        let text = |key: &str| pipeline.get(key).map(|v| unquote(v).unwrap_or_else(|| v.trim().to_string()));
        let config = Self {
            name: text("name"),
            order,
            param_selections,
            output_binning: text("output_binning"),
            output_key: pipeline.get("output_key").map(parse_name_list).unwrap_or_default(),
            stages,
            binnings,
            ignored_sections,
        };
        tracing::info!(stages = config.stages.len(), "loaded pipeline");
        Ok(config)
    }

    /// Stage by `stage.service` name.
    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Merged parameters of all stages under the configured selections.
    pub fn params(&self) -> Result<ParamSet> {
        let selections: Vec<&str> = self.param_selections.iter().map(String::as_str).collect();
        self.params_with(&selections)
    }

    /// Merged parameters under explicit selections. A parameter declared by
    /// several stages must agree in value, unit and fixed flag.
    pub fn params_with(&self, selections: &[&str]) -> Result<ParamSet> {
        for sel in selections {
            let known = self.param_selections.iter().any(|s| s == sel)
                || self.stages.iter().any(|st| st.params.selections.contains_key(*sel));
            if !known {
                return Err(Error::Validation(format!("unknown param selection '{sel}'")));
            }
        }
        let mut merged = ParamSet::new();
        let mut owner: BTreeMap<String, &str> = BTreeMap::new();
        for stage in &self.stages {
            for p in &stage.params(selections)? {
                match merged.get(&p.name) {
                    Some(prev) => {
                        if let Some(why) = disagreement(prev, p) {
                            return Err(Error::Validation(format!(
                                "param '{}' differs between stages {} and {}: {why}",
                                p.name, owner[&p.name], stage.name
                            )));
                        }
                    }
                    None => {
                        owner.insert(p.name.clone(), &stage.name);
                        merged.push(p.clone())?;
                    }
                }
            }
        }
        Ok(merged)
    }

    /// Hash of [`PipelineConfig::params_with`].
    pub fn params_hash(&self, selections: &[&str]) -> Result<String> {
        Ok(self.params_with(selections)?.hash())
    }
}

/// Why two declarations of the same parameter conflict, if they do.
pub(crate) fn disagreement(a: &Param, b: &Param) -> Option<String> {
    if a.fixed != b.fixed {
        return Some(format!("fixed={} vs fixed={}", a.fixed, b.fixed));
    }
    let Ok(bm) = b.value().m_as(&a.value().unit) else {
        return Some(format!("incompatible units '{}' and '{}'", a.value().unit, b.value().unit));
    };
    let am = a.value().magnitude;
    let tol = 1e-9 * am.abs().max(bm.abs()).max(1e-300);
    if (am - bm).abs() > tol {
        return Some(format!("value {} vs {}", a.value(), b.value()));
    }
    None
}

fn split_stage_name(name: &str) -> Option<(&str, &str)> {
    name.split_once('.').filter(|(stage, service)| {
        !stage.is_empty() && !service.is_empty() && !service.contains('.')
    })
}

/// `param.[<sel>.]<name>[.<attr>]`.
struct ParamKey<'a> {
    selection: Option<&'a str>,
    name: &'a str,
    attr: Option<&'a str>,
}

fn split_param_key<'a>(key: &'a str, selectors: &BTreeSet<String>) -> Option<ParamKey<'a>> {
    let rest = PARAM_PREFIXES.iter().find_map(|p| key.strip_prefix(*p))?;
    let (selection, rest) = match rest.split_once('.') {
        Some((first, tail)) if selectors.contains(first) => (Some(first), tail),
        _ => (None, rest),
    };
    let (name, attr) = match rest.split_once('.') {
        Some((name, attr)) => (name, Some(attr)),
        None => (rest, None),
    };
    Some(ParamKey { selection, name, attr })
}

#[derive(Default)]
struct ParamDecl<'a> {
    value: Option<&'a Entry>,
    attrs: Vec<(&'a str, &'a Entry)>,
}

fn load_stage(name: &str, section: &Section, selectors: &BTreeSet<String>) -> Result<StageConfig> {
    let (stage, service) = split_stage_name(name)
        .ok_or_else(|| Error::Validation(format!("stage '{name}' must be written as <stage>.<service>")))?;
    let located = |e: &Entry, msg: String| Error::parse(&e.source, e.line, format!("[{name}] {}: {msg}", e.key));

    let mut calc_mode = None;
    let mut apply_mode = None;
    let mut kwargs = BTreeMap::new();
    // Keyed by (selection, name), in file order.
    let mut decls: Vec<((Option<&str>, &str), ParamDecl<'_>)> = Vec::new();

    for e in &section.entries {
        match e.key.as_str() {
            "calc_mode" => calc_mode = Mode::parse(&e.value),
            "apply_mode" => apply_mode = Mode::parse(&e.value),
            key => match split_param_key(key, selectors) {
                Some(pk) => {
                    if pk.name.is_empty() {
                        return Err(located(e, "empty parameter name".to_string()));
                    }
                    let id = (pk.selection, pk.name);
                    let idx = match decls.iter().position(|(k, _)| *k == id) {
                        Some(i) => i,
                        None => {
                            decls.push((id, ParamDecl::default()));
                            decls.len() - 1
                        }
                    };
                    let decl = &mut decls[idx].1;
                    match pk.attr {
                        None => decl.value = Some(e),
                        Some(attr) => decl.attrs.push((attr, e)),
                    }
                }
                None => {
                    let v = parse_value(&e.value).map_err(|err| located(e, err.to_string()))?;
                    kwargs.insert(key.to_string(), v);
                }
            },
        }
    }

    let mut params = ParamSelector::default();
    let mut param_settings = BTreeMap::new();
    for ((selection, pname), decl) in decls {
        let Some(value_entry) = decl.value else {
            let (_, e) = decl.attrs[0];
            let which = selection.map(|s| format!("{s}.{pname}")).unwrap_or_else(|| pname.to_string());
            return Err(located(e, format!("attributes given for undefined parameter '{which}'")));
        };
        match build_param(pname, value_entry, &decl.attrs).map_err(|err| located(value_entry, err.to_string()))? {
            Built::Param(p) => match selection {
                Some(sel) => params.add_to_selection(sel, p)?,
                None => params.base.push(p)?,
            },
            Built::Setting(v) => {
                if selection.is_some() {
                    return Err(located(value_entry, "non-numeric parameters cannot depend on a selection".to_string()));
                }
                param_settings.insert(pname.to_string(), v);
            }
        }
    }

    tracing::debug!(
        stage = name,
        params = params.base.len(),
        selections = ?params.selection_names(),
        "loaded stage"
    );
    Ok(StageConfig {
        name: name.to_string(),
        stage: stage.to_string(),
        service: service.to_string(),
        calc_mode,
        apply_mode,
        params,
        param_settings,
        kwargs,
        source: section.source.clone(),
        line: section.line,
    })
}

enum Built {
    Param(Param),
    Setting(Value),
}

fn build_param(name: &str, value_entry: &Entry, attrs: &[(&str, &Entry)]) -> Result<Built> {
    let nominal = match parse_value(&value_entry.value)? {
        Value::Quantity(q) => q,
        Value::Int(i) => Quantity::dimensionless(i as f64),
        Value::Float(f) => Quantity::dimensionless(f),
        other => {
            for (attr, e) in attrs {
                let allowed = *attr == "fixed" && parse_bool(&e.value) == Some(true);
                if !allowed {
                    return Err(Error::Validation(format!(
                        "'{attr}' is not supported on non-numeric parameter '{name}'"
                    )));
                }
            }
            return Ok(Built::Setting(other));
        }
    };

    let mut fixed = true;
    let mut range_text: Option<&str> = None;
    let mut prior_kind: Option<String> = None;
    let mut prior_data: Option<&Entry> = None;
    let mut tex = None;
    let mut is_discrete = false;
    for (attr, e) in attrs {
        let v = e.value.trim();
        match *attr {
            "fixed" => {
                fixed = parse_bool(v)
                    .ok_or_else(|| Error::Validation(format!("{}: expected True or False, got {v:?}", e.key)))?
            }
            "range" => range_text = Some(v).filter(|t| *t != "None"),
            "prior" => prior_kind = Some(unquote(v).unwrap_or_else(|| v.to_string())),
            "prior.data" => prior_data = Some(e),
            "tex" => tex = Some(unquote(v).unwrap_or_else(|| v.to_string())),
            "is_discrete" => {
                is_discrete = parse_bool(v)
                    .ok_or_else(|| Error::Validation(format!("{}: expected True or False, got {v:?}", e.key)))?
            }
            other => return Err(Error::Validation(format!("unknown parameter attribute '{other}' in {}", e.key))),
        }
    }

    let range = range_text.map(|t| parse_range(t, &nominal)).transpose()?;
    let prior = resolve_prior(name, &nominal, range, prior_kind.as_deref(), prior_data)?;

    let mut p = Param::new(name, nominal).with_fixed(fixed);
    p.is_discrete = is_discrete;
    if let Some(tex) = tex {
        p = p.with_tex(tex);
    }
    if let Some((lo, hi)) = range {
        p = p.with_range(lo, hi)?;
    }
    if let Some(prior) = prior {
        p = p.with_prior(prior)?;
    }
    Ok(Built::Param(p))
}

fn resolve_prior(
    name: &str,
    nominal: &Quantity,
    range: Option<(f64, f64)>,
    kind: Option<&str>,
    data: Option<&Entry>,
) -> Result<Option<Prior>> {
    if data.is_some() && kind != Some("linterp") {
        return Err(Error::Validation(format!("'{name}.prior.data' is only used with prior = linterp")));
    }
    let gaussian = || {
        nominal.std_dev.map(|stddev| Prior::Gaussian { mean: nominal.magnitude, stddev })
    };
    match kind {
        None => Ok(gaussian()),
        Some("None") => Ok(None),
        Some("uniform") => Ok(Some(Prior::Uniform)),
        Some("gaussian") => gaussian().map(Some).ok_or_else(|| {
            Error::Validation(format!("gaussian prior on '{name}' needs a value written as 'x +/- sigma'"))
        }),
        Some("jeffreys") => {
            let (lo, hi) = range
                .ok_or_else(|| Error::Validation(format!("jeffreys prior on '{name}' needs a range")))?;
            Ok(Some(Prior::Jeffreys { lo, hi }))
        }
        Some("linterp") => {
            let e = data.ok_or_else(|| {
                Error::Validation(format!("linterp prior on '{name}' needs '{name}.prior.data'"))
            })?;
            load_linterp(e).map(Some)
        }
        Some(other) => Err(Error::Validation(format!(
            "unknown prior '{other}' on '{name}' (expected uniform, gaussian, jeffreys, linterp)"
        ))),
    }
}

/// JSON table with `x` and either `llh` or `chi2` (`llh = -chi2 / 2`).
#[derive(Debug, Deserialize)]
struct PriorTable {
    x: Vec<f64>,
    #[serde(default)]
    llh: Option<Vec<f64>>,
    #[serde(default)]
    chi2: Option<Vec<f64>>,
}

fn load_linterp(e: &Entry) -> Result<Prior> {
    let spec = unquote(&e.value).unwrap_or_else(|| e.value.trim().to_string());
    let path = resources::find_resource(&spec, e.source_dir())?;
    tracing::debug!(path = %path.display(), "reading prior table");
    let table: PriorTable = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    let llh = match (table.llh, table.chi2) {
        (Some(llh), None) => llh,
        (None, Some(chi2)) => chi2.into_iter().map(|c| -0.5 * c).collect(),
        _ => {
            return Err(Error::Validation(format!(
                "prior table {} needs exactly one of 'llh' or 'chi2'",
                path.display()
            )))
        }
    };
    Ok(Prior::Linterp { x: table.x, llh })
}
