//! Data-level checks on loaded constants and pipelines.
//!
//! Loading already rejects malformed input, including pipeline parameters
//! whose value lies outside their range or whose prior is invalid. These
//! checks look at the relationships between well-formed pieces (hierarchy
//! pairs, constant ranges against nominals, binning references, stage
//! parameters against the service catalog) and collect every finding
//! instead of stopping at the first.

use std::collections::BTreeSet;
use std::fmt;

use nf_core::Param;
use serde::Serialize;

use crate::catalog;
use crate::constants::{Bounds, ConstantEntry, ConstantsTable};
use crate::pipeline::{Mode, PipelineConfig, StageConfig};
use crate::value::Value;

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Worth knowing, nothing wrong.
    Info,
    /// Probably a mistake.
    Warning,
    /// Definitely wrong.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    /// Severity.
    pub severity: Severity,
    /// What the finding is about, e.g. `osc.prob3` or `theta23_nh`.
    pub location: String,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [{}] {}", self.severity, self.location, self.message)
    }
}

/// Collected findings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    /// Findings in the order they were made.
    pub issues: Vec<Issue>,
}

impl Report {
    /// Empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finding.
    pub fn push(&mut self, severity: Severity, location: impl Into<String>, message: impl Into<String>) {
        self.issues.push(Issue { severity, location: location.into(), message: message.into() });
    }

    /// Add an error.
    pub fn error(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, location, message);
    }

    /// Add a warning.
    pub fn warning(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, location, message);
    }

    /// Add an informational note.
    pub fn info(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Info, location, message);
    }

    /// Append another report's findings.
    pub fn merge(&mut self, other: Report) {
        self.issues.extend(other.issues);
    }

    /// No errors (warnings and infos allowed).
    pub fn is_ok(&self) -> bool {
        self.n_errors() == 0
    }

    /// Number of errors.
    pub fn n_errors(&self) -> usize {
        self.count(Severity::Error)
    }

    /// Number of warnings.
    pub fn n_warnings(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Findings at or above `severity`.
    pub fn at_least(&self, severity: Severity) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.severity >= severity)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "{issue}")?;
        }
        write!(f, "{} error(s), {} warning(s)", self.n_errors(), self.n_warnings())
    }
}

/// Check a constants table: hierarchy pairs and ranges.
pub fn validate_constants(table: &ConstantsTable) -> Report {
    let mut report = Report::new();
    for pair in table.hierarchy_pairs() {
        match (pair.normal, pair.inverted) {
            (Some(_), None) => report.error(format!("{}_nh", pair.base), format!("no matching {}_ih", pair.base)),
            (None, Some(_)) => report.error(format!("{}_ih", pair.base), format!("no matching {}_nh", pair.base)),
            _ => {}
        }
        if table.get(&pair.base).is_some() {
            report.warning(
                pair.base.as_str(),
                "defined both with and without hierarchy suffix; the suffixed values take precedence",
            );
        }
    }
    for entry in table.entries() {
        check_constant(entry, &mut report);
    }
    report
}

fn check_constant(entry: &ConstantEntry, report: &mut Report) {
    let name = entry.name.as_str();
    if let Some(sd) = entry.nominal.std_dev {
        if sd == 0.0 {
            report.warning(name, "uncertainty is zero");
        }
    }
    let ranges = [("range", &entry.range), ("3s_range", &entry.range_3s)];
    for (label, bounds) in ranges {
        let Some(bounds) = bounds else { continue };
        check_bounds(name, label, bounds, entry, report);
    }
    if let (Some(r), Some(r3)) = (&entry.range, &entry.range_3s) {
        if let Ok(false) = r3.covers(r) {
            report.warning(name, format!("3s_range [{}, {}] does not cover range [{}, {}]", r3.lo, r3.hi, r.lo, r.hi));
        }
    }
}

fn check_bounds(name: &str, label: &str, bounds: &Bounds, entry: &ConstantEntry, report: &mut Report) {
    match bounds.contains(&entry.nominal) {
        Ok(true) => {}
        Ok(false) => report.error(
            name,
            format!("{label} [{}, {}] {} does not contain nominal {}", bounds.lo, bounds.hi, bounds.unit, entry.nominal),
        ),
        Err(e) => report.error(name, format!("{label}: {e}")),
    }
}

/// Check a loaded pipeline: modes against binnings, parameters, the service
/// catalog, selections and cross-stage agreement.
pub fn validate_pipeline(pipeline: &PipelineConfig) -> Report {
    let mut report = Report::new();
    let binnings = &pipeline.binnings;

    if let Some(out) = &pipeline.output_binning {
        if !binnings.contains(out) {
            report.error("pipeline", format!("output_binning '{out}' is not a declared binning"));
        }
    }
    for name in &pipeline.ignored_sections {
        report.warning(name.as_str(), "stage section is not listed in [pipeline] order and is ignored");
    }

    let stage_selections: BTreeSet<&str> = pipeline
        .stages
        .iter()
        .flat_map(|s| s.params.selections.keys().map(String::as_str))
        .collect();
    for sel in &pipeline.param_selections {
        if !stage_selections.contains(sel.as_str()) {
            report.warning("pipeline", format!("param selection '{sel}' is not used by any stage"));
        }
    }

    for stage in &pipeline.stages {
        check_stage(stage, pipeline, &mut report);
    }

    if let Err(e) = pipeline.params() {
        report.error("pipeline", e.to_string());
    }
    report
}

fn check_stage(stage: &StageConfig, pipeline: &PipelineConfig, report: &mut Report) {
    let loc = stage.name.as_str();
    for (label, mode) in [("calc_mode", &stage.calc_mode), ("apply_mode", &stage.apply_mode)] {
        if let Some(Mode::Binning(b)) = mode {
            if !pipeline.binnings.contains(b) {
                report.error(loc, format!("{label} '{b}' is not a declared binning"));
            }
        }
    }
    for (key, value) in stage.kwargs.iter().filter(|(k, _)| k.ends_with("_binning")) {
        if let Value::Str(b) = value {
            if !pipeline.binnings.contains(b) {
                report.error(loc, format!("{key} '{b}' is not a declared binning"));
            }
        }
    }

    for p in stage.params.base.iter().chain(stage.params.selections.values().flat_map(|s| s.iter())) {
        check_param(loc, p, report);
    }

    let sel_names: Vec<&String> = stage.params.selections.keys().collect();
    if sel_names.len() == 1 {
        report.warning(loc, format!("only one param selection '{}' is declared", sel_names[0]));
    }
    let all: BTreeSet<&str> = stage
        .params
        .selections
        .values()
        .flat_map(|s| s.iter().map(|p| p.name.as_str()))
        .collect();
    for (sel, set) in &stage.params.selections {
        for name in &all {
            if set.get(name).is_none() {
                report.error(loc, format!("param '{name}' has no definition for selection '{sel}'"));
            }
        }
    }
    let active = pipeline.param_selections.iter().any(|s| stage.params.selections.contains_key(s));
    if !stage.params.selections.is_empty() && !active {
        report.warning(
            loc,
            format!(
                "declares selections {:?} but none is active; selection-only params are dropped",
                stage.params.selection_names()
            ),
        );
    }

    report.merge(catalog::check_stage(stage));
}

/// Range containment and prior parameters are enforced when the pipeline
/// loads (`Param::with_range`, `Param::with_prior`), so only the free-range
/// check remains here.
fn check_param(loc: &str, p: &Param, report: &mut Report) {
    if !p.fixed && p.range().is_none() {
        report.warning(loc, format!("free param '{}' has no range", p.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ConfigDocument;

    fn constants(text: &str) -> ConstantsTable {
        let doc = ConfigDocument::parse_str(text, "<t>").unwrap().interpolate().unwrap();
        ConstantsTable::from_section(&doc, crate::DEFAULT_SECTION).unwrap()
    }

    fn pipeline(text: &str) -> PipelineConfig {
        PipelineConfig::parse_str(text, "<t>").unwrap()
    }

    #[test]
    fn test_report_counts_and_display() {
        let mut r = Report::new();
        r.info("a", "fine");
        r.warning("b", "hmm");
        assert!(r.is_ok());
        r.error("c", "bad");
        assert!(!r.is_ok());
        assert_eq!((r.n_errors(), r.n_warnings()), (1, 1));
        assert_eq!(r.at_least(Severity::Warning).count(), 2);
        let text = r.to_string();
        assert!(text.contains("error: [c] bad"));
        assert!(text.ends_with("1 error(s), 1 warning(s)"));
    }

    #[test]
    fn test_hierarchy_pairs_must_match() {
        let r = validate_constants(&constants("a_nh = 1\na_ih = 2\nb_nh = 3\nc_ih = 4\n"));
        assert_eq!(r.n_errors(), 2);
        assert!(r.issues.iter().any(|i| i.location == "b_nh" && i.message.contains("b_ih")));
        assert!(r.issues.iter().any(|i| i.location == "c_ih" && i.message.contains("c_nh")));
    }

    #[test]
    fn test_ranges_contain_nominal() {
        let r = validate_constants(&constants(
            "x = 5 units.deg\nx.range = [0, 4] units.deg\n\
             y = 1 units.deg\ny.range = [0, 1] units.km\n\
             z = 0.5 units.deg\nz.range = [0, 0.1] units.rad\nz.3s_range = [0, 0.05] units.rad\n",
        ));
        assert_eq!(r.n_errors(), 2, "{r}");
        assert!(r.issues.iter().any(|i| i.location == "x" && i.message.contains("does not contain")));
        assert!(r.issues.iter().any(|i| i.location == "y" && i.message.contains("cannot convert")));
        assert!(r.issues.iter().any(|i| i.location == "z" && i.severity == Severity::Warning));
    }

    #[test]
    fn test_clean_pipeline_passes() {
        let p = pipeline(
            "[pipeline]\norder = osc.prob3\n\
             [binning]\nb.order = e\nb.e = {'num_bins': 2, 'domain': [1, 2] units.GeV}\n\
             [osc.prob3]\ncalc_mode = b\napply_mode = events\n\
             param.earth_model = osc/PREM_12layer.dat\nparam.YeI = 0.4656\nparam.YeM = 0.4957\nparam.YeO = 0.4656\n\
             param.detector_depth = 2 units.km\nparam.prop_height = 20 units.km\n\
             param.deltacp = 0 units.deg\nparam.deltam21 = 7.42e-5 units.eV**2\nparam.deltam31 = 2.5e-3 units.eV**2\n\
             param.theta12 = 33.4 units.deg\nparam.theta13 = 8.6 units.deg\nparam.theta23 = 45 units.deg\n",
        );
        let r = validate_pipeline(&p);
        assert!(r.is_ok(), "{r}");
        assert_eq!(r.n_warnings(), 0, "{r}");
    }

    #[test]
    fn test_pipeline_findings() {
        let p = pipeline(
            "[pipeline]\norder = a.b, c.d\noutput_binning = nope\n\
             [a.b]\ncalc_mode = missing\noutput_binning = also_missing\n\
             param.x = 1\nparam.x.fixed = False\n\
             param.nh.y = 1\nparam.ih.z = 1\n\
             [c.d]\nparam.x = 2\n\
             [e.f]\n",
        );
        let r = validate_pipeline(&p);
        let has = |sev: Severity, needle: &str| r.issues.iter().any(|i| i.severity == sev && i.message.contains(needle));
        assert!(has(Severity::Error, "output_binning 'nope'"), "{r}");
        assert!(has(Severity::Error, "calc_mode 'missing'"), "{r}");
        assert!(has(Severity::Error, "output_binning 'also_missing'"), "{r}");
        assert!(has(Severity::Warning, "free param 'x' has no range"), "{r}");
        assert!(has(Severity::Error, "param 'y' has no definition for selection 'ih'"), "{r}");
        assert!(has(Severity::Error, "param 'z' has no definition for selection 'nh'"), "{r}");
        assert!(has(Severity::Warning, "none is active"), "{r}");
        assert!(has(Severity::Warning, "not listed in [pipeline] order"), "{r}");
        assert!(has(Severity::Error, "differs between stages"), "{r}");
        assert!(has(Severity::Info, "unknown service"), "{r}");
    }

    #[test]
    fn test_param_range_and_prior_enforced_at_load() {
        let load = |body: &str| PipelineConfig::parse_str(&format!("[pipeline]\norder = a.b\n[a.b]\n{body}"), "<t>");
        let err = load("param.x = 5\nparam.x.range = [0, 1]\n").unwrap_err();
        assert!(err.to_string().contains("outside range"), "{err}");
        assert!(load("param.x = 1 +/- 0\n").is_err(), "zero-width gaussian prior");

        let r = validate_pipeline(&load("param.x = 0.5\nparam.x.fixed = False\nparam.x.range = [0, 1]\n").unwrap());
        assert!(r.issues.iter().all(|i| !i.message.contains("param 'x'")), "{r}");
    }
}
