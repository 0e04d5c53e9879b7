use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_nufit"))
}

fn repo_root() -> PathBuf {
    // crates/nf-cli -> repo root
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..").canonicalize().unwrap()
}

fn fixtures() -> PathBuf {
    repo_root().join("tests/fixtures")
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("nufit_cli_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .env_remove("NUFIT_RESOURCES")
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

#[test]
fn check_accepts_example_pipeline() {
    let fx = fixtures();
    let cfg = fx.join("settings/pipeline/example.cfg");
    let out = run(&["check", cfg.to_str().unwrap(), "--resources", fx.to_str().unwrap()]);
    assert!(
        out.status.success(),
        "check should succeed, stdout={} stderr={}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("0 error(s), 0 warning(s)"), "stdout={stdout}");
}

#[test]
fn check_fails_without_resource_root() {
    let cfg = fixtures().join("settings/pipeline/example.cfg");
    let out = run(&["check", cfg.to_str().unwrap()]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("osc/nufit_v5.cfg"), "stderr={stderr}");
}

#[test]
fn check_resources_from_environment() {
    let fx = fixtures();
    let cfg = fx.join("settings/pipeline/example.cfg");
    let out = Command::new(bin_path())
        .args(["check", cfg.to_str().unwrap()])
        .env("NUFIT_RESOURCES", &fx)
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn check_constants_reports_errors_as_json() {
    let cfg = fixtures().join("settings/osc/nufit_broken.cfg");
    let out = run(&["check", "--constants", "--json", cfg.to_str().unwrap()]);
    assert!(!out.status.success(), "broken constants must fail");
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["ok"], false);
    assert_eq!(v["n_errors"], 2);
    let issues = v["issues"].as_array().unwrap();
    assert!(issues.iter().any(|i| i["location"] == "theta23_nh" && i["message"].as_str().unwrap().contains("theta23_ih")));
    assert!(issues.iter().any(|i| i["message"].as_str().unwrap().contains("does not contain nominal")));
}

#[test]
fn check_constants_accepts_nufit_table() {
    let cfg = fixtures().join("settings/osc/nufit_v5.cfg");
    let out = run(&["check", "--constants", cfg.to_str().unwrap()]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn check_reports_pipeline_problems() {
    let dir = tmp_dir("check_bad");
    let cfg = dir.join("bad.cfg");
    std::fs::write(
        &cfg,
        "[pipeline]\norder = osc.prob3\noutput_binning = nowhere\n\
         [osc.prob3]\ncalc_mode = nowhere\nparam.theta12 = 33 units.km\n",
    )
    .unwrap();
    let out = run(&["check", cfg.to_str().unwrap()]);
    assert!(!out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("output_binning 'nowhere'"), "stdout={stdout}");
    assert!(stdout.contains("calc_mode 'nowhere'"), "stdout={stdout}");
    assert!(stdout.contains("missing param 'theta23'"), "stdout={stdout}");
    assert!(stdout.contains("expected dimension [angle]"), "stdout={stdout}");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("failed validation"), "stderr={stderr}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn check_rejects_include_cycle() {
    let dir = tmp_dir("check_cycle");
    std::fs::write(dir.join("a.cfg"), "#include b.cfg\n[pipeline]\norder = x.y\n[x.y]\n").unwrap();
    std::fs::write(dir.join("b.cfg"), "#include a.cfg\n").unwrap();
    let out = run(&["check", dir.join("a.cfg").to_str().unwrap()]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("include cycle"), "stderr={stderr}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn find_uses_resource_subdirectories() {
    let fx = fixtures();
    let out = run(&["--resources", fx.to_str().unwrap(), "find", "osc/nufit_v5.cfg"]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let found = PathBuf::from(String::from_utf8_lossy(&out.stdout).trim());
    assert_eq!(found, fx.join("settings/osc/nufit_v5.cfg"));

    let out = run(&["find", "osc/no_such_file.cfg"]);
    assert!(!out.status.success());
}
