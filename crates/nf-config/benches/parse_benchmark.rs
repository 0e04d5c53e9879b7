use criterion::{Criterion, criterion_group, criterion_main};
use nf_config::{BinningSet, ConfigDocument, ConstantsTable, DEFAULT_SECTION, PipelineConfig};
use std::hint::black_box;

const NUFIT: &str = include_str!("../../../tests/fixtures/settings/osc/nufit_v5.cfg");
const BINNING: &str = include_str!("../../../tests/fixtures/settings/binning/example.cfg");

const PIPELINE: &str = r#"
[pipeline]
order = osc.prob3, aeff.aeff
param_selections = nh
output_binning = reco

[binning]
reco.order = reco_energy, reco_coszen
reco.reco_energy = {'num_bins': 10, 'is_log': True, 'domain': [5, 100] units.GeV}
reco.reco_coszen = {'num_bins': 10, 'is_lin': True, 'domain': [-1, 1]}

[osc]
theta23_nh = 49.2 +/- 1.1 units.degree
theta23_ih = 49.5 +/- 1.0 units.degree

[osc.prob3]
calc_mode = reco
apply_mode = reco
param.earth_model = osc/PREM_12layer.dat
param.detector_depth = 2 units.km
param.theta12 = 33.44 +/- 0.77 units.degree
param.nh.theta23 = ${osc:theta23_nh}
param.nh.theta23.fixed = False
param.nh.theta23.range = [0, 90] units.degree
param.ih.theta23 = ${osc:theta23_ih}
param.ih.theta23.fixed = False
param.ih.theta23.range = [0, 90] units.degree

[aeff.aeff]
calc_mode = events
apply_mode = events
param.livetime = 2.5 * units.year
param.aeff_scale = 1.0
param.aeff_scale.fixed = False
param.aeff_scale.range = [0.5, 1.5]
"#;

fn benchmark_constants(c: &mut Criterion) {
    c.bench_function("constants_nufit_v5", |b| {
        b.iter(|| {
            let doc = ConfigDocument::parse_str(black_box(NUFIT), "nufit_v5.cfg").unwrap().interpolate().unwrap();
            black_box(ConstantsTable::from_section(&doc, DEFAULT_SECTION).unwrap())
        })
    });
}

fn benchmark_binning(c: &mut Criterion) {
    c.bench_function("binning_example", |b| {
        b.iter(|| {
            let doc = ConfigDocument::parse_str(black_box(BINNING), "example.cfg").unwrap().interpolate().unwrap();
            black_box(BinningSet::from_document(&doc).unwrap())
        })
    });
}

fn benchmark_pipeline(c: &mut Criterion) {
    c.bench_function("pipeline_load", |b| {
        b.iter(|| black_box(PipelineConfig::parse_str(black_box(PIPELINE), "pipeline.cfg").unwrap()))
    });

    let pipeline = PipelineConfig::parse_str(PIPELINE, "pipeline.cfg").unwrap();
    c.bench_function("pipeline_params_hash", |b| {
        b.iter(|| black_box(pipeline.params_hash(black_box(&["nh"])).unwrap()))
    });
}

criterion_group!(benches, benchmark_constants, benchmark_binning, benchmark_pipeline);
criterion_main!(benches);
