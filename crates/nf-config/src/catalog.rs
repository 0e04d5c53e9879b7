//! Known stage services and the parameters they expect.

use nf_core::{Dimension, Param};

use crate::pipeline::StageConfig;
use crate::validate::Report;

/// What kind of value a service expects for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Numeric, with this dimension.
    Quantity(Dimension),
    /// Non-numeric setting (file name, flag, selection string).
    Setting,
}

/// One expected parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedParam {
    /// Parameter name.
    pub name: &'static str,
    /// Expected kind.
    pub kind: ParamKind,
    /// Whether the service refuses to run without it.
    pub required: bool,
}

/// Parameters accepted by a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSpec {
    /// `stage.service`.
    pub name: &'static str,
    /// Named parameters.
    pub params: &'static [ExpectedParam],
    /// Further parameters allowed when their name starts with this prefix.
    pub extra_prefix: Option<&'static str>,
    /// Any further parameter is allowed.
    pub open: bool,
}

const fn q(name: &'static str, dim: Dimension) -> ExpectedParam {
    ExpectedParam { name, kind: ParamKind::Quantity(dim), required: true }
}

const fn setting(name: &'static str) -> ExpectedParam {
    ExpectedParam { name, kind: ParamKind::Setting, required: true }
}

const fn optional(p: ExpectedParam) -> ExpectedParam {
    ExpectedParam { required: false, ..p }
}

const NONE: Dimension = Dimension::DIMENSIONLESS;

const PROB3: &[ExpectedParam] = &[
    setting("earth_model"),
    q("YeI", NONE),
    q("YeM", NONE),
    q("YeO", NONE),
    q("detector_depth", Dimension::LENGTH),
    q("prop_height", Dimension::LENGTH),
    q("deltacp", Dimension::ANGLE),
    q("deltam21", Dimension::ENERGY_SQUARED),
    q("deltam31", Dimension::ENERGY_SQUARED),
    q("theta12", Dimension::ANGLE),
    q("theta13", Dimension::ANGLE),
    q("theta23", Dimension::ANGLE),
    optional(q("nutau_norm", NONE)),
    optional(setting("no_nc_osc")),
    optional(q("true_e_scale", NONE)),
];

const NUTAU: &[ExpectedParam] = &[q("nu_nc_norm", NONE)];

const PID_SMOOTH: &[ExpectedParam] = &[
    setting("pid_events"),
    setting("transform_events_keep_criteria"),
    setting("pid_spec"),
    setting("pid_weights_name"),
];

const AEFF: &[ExpectedParam] = &[q("livetime", Dimension::TIME), q("aeff_scale", NONE)];

/// Every service this crate knows about.
pub const SERVICES: &[ServiceSpec] = &[
    ServiceSpec { name: "osc.prob3", params: PROB3, extra_prefix: None, open: false },
    ServiceSpec { name: "combine.nutau", params: NUTAU, extra_prefix: None, open: false },
    ServiceSpec { name: "pid.smooth", params: PID_SMOOTH, extra_prefix: None, open: false },
    ServiceSpec { name: "aeff.aeff", params: AEFF, extra_prefix: None, open: false },
    ServiceSpec { name: "flux.daemon_flux", params: &[], extra_prefix: Some("daemon_"), open: false },
    ServiceSpec { name: "data.simple_data_loader", params: &[], extra_prefix: None, open: false },
    ServiceSpec { name: "utils.hist", params: &[], extra_prefix: None, open: false },
    // Parameter names follow the fitted hypersurface file.
    ServiceSpec { name: "discr_sys.hypersurfaces", params: &[], extra_prefix: None, open: true },
];

/// Spec for `stage.service`.
pub fn lookup(name: &str) -> Option<&'static ServiceSpec> {
    SERVICES.iter().find(|s| s.name == name)
}

impl ServiceSpec {
    /// Expected parameter by name.
    pub fn param(&self, name: &str) -> Option<&'static ExpectedParam> {
        self.params.iter().find(|p| p.name == name)
    }

    fn allows_extra(&self, name: &str) -> bool {
        self.open || self.extra_prefix.is_some_and(|prefix| name.starts_with(prefix))
    }
}

/// Compare a stage's parameters with its service's expectations.
pub fn check_stage(stage: &StageConfig) -> Report {
    let mut report = Report::new();
    let loc = stage.name.as_str();
    let Some(spec) = lookup(&stage.name) else {
        report.info(loc, format!("unknown service '{}'; parameters not checked", stage.name));
        return report;
    };

    let declared = stage.declared_names();
    for expected in spec.params.iter().filter(|p| p.required) {
        if !declared.contains(expected.name) {
            report.error(loc, format!("missing param '{}' expected by {}", expected.name, spec.name));
        }
    }
    for name in &declared {
        if spec.param(name).is_none() && !spec.allows_extra(name) {
            report.warning(loc, format!("param '{name}' is not used by {}", spec.name));
        }
    }

    let params = stage.params.base.iter().chain(stage.params.selections.values().flat_map(|s| s.iter()));
    for p in params {
        check_kind(loc, spec, p, &mut report);
    }
    for name in stage.param_settings.keys() {
        if let Some(ExpectedParam { kind: ParamKind::Quantity(dim), .. }) = spec.param(name) {
            report.error(loc, format!("param '{name}' must be a number with dimension {dim}, got a non-numeric value"));
        }
    }
    report
}

fn check_kind(loc: &str, spec: &ServiceSpec, p: &Param, report: &mut Report) {
    match spec.param(&p.name).map(|e| e.kind) {
        Some(ParamKind::Quantity(dim)) => {
            let got = p.value().unit.dimension();
            if got != dim {
                report.error(
                    loc,
                    format!("param '{}' has unit '{}' ({got}), expected dimension {dim}", p.name, p.value().unit),
                );
            }
        }
        Some(ParamKind::Setting) => {
            report.error(loc, format!("param '{}' must be a setting, got the number {}", p.name, p.value()));
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;

    fn stage(service: &str, body: &str) -> StageConfig {
        let text = format!("[pipeline]\norder = {service}\n[{service}]\n{body}");
        PipelineConfig::parse_str(&text, "<t>").unwrap().stages.remove(0)
    }

    fn messages(r: &Report) -> Vec<String> {
        r.issues.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_catalog_entries() {
        assert_eq!(lookup("osc.prob3").unwrap().params.iter().filter(|p| p.required).count(), 12);
        assert_eq!(lookup("combine.nutau").unwrap().params[0].name, "nu_nc_norm");
        assert_eq!(lookup("pid.smooth").unwrap().params.len(), 4);
        assert!(lookup("osc.nusquids").is_none());
    }

    #[test]
    fn test_missing_and_unexpected() {
        let r = check_stage(&stage("combine.nutau", "param.nutau_norm = 1\n"));
        let m = messages(&r);
        assert!(m.iter().any(|s| s.contains("missing param 'nu_nc_norm'")), "{m:?}");
        assert!(m.iter().any(|s| s.starts_with("warning") && s.contains("'nutau_norm' is not used")), "{m:?}");
    }

    #[test]
    fn test_dimension_mismatch() {
        let r = check_stage(&stage("aeff.aeff", "param.livetime = 2.5 units.km\nparam.aeff_scale = 1.0\n"));
        assert_eq!(r.n_errors(), 1);
        assert!(r.issues[0].message.contains("expected dimension [time]"), "{r}");

        let ok = check_stage(&stage("aeff.aeff", "param.livetime = 2.5 units.year\nparam.aeff_scale = 1.0\n"));
        assert!(ok.issues.is_empty(), "{ok}");
    }

    #[test]
    fn test_setting_versus_number() {
        let r = check_stage(&stage("pid.smooth", "param.pid_events = 3\nparam.transform_events_keep_criteria = None\n\
             param.pid_spec = {'trck': 'pid > 3'}\nparam.pid_weights_name = weighted_aeff\n"));
        let m = messages(&r);
        assert_eq!(r.n_errors(), 1, "{m:?}");
        assert!(m[0].contains("'pid_events' must be a setting"), "{m:?}");

        let r = check_stage(&stage("combine.nutau", "param.nu_nc_norm = some_file.dat\n"));
        assert!(messages(&r).iter().any(|s| s.contains("must be a number")));
    }

    #[test]
    fn test_prefix_and_open_services() {
        let r = check_stage(&stage("flux.daemon_flux", "param.daemon_K_158G = 0 +/- 1\nparam.barr_a = 0\n"));
        assert_eq!(r.n_warnings(), 1);
        assert!(r.issues[0].message.contains("barr_a"));

        let r = check_stage(&stage("discr_sys.hypersurfaces", "param.dom_eff = 1.0\n"));
        assert!(r.issues.is_empty());

        let r = check_stage(&stage("osc.nusquids", "param.x = 1\n"));
        assert_eq!(r.issues[0].severity, crate::Severity::Info);
    }
}
