use basinfield_app::{PerturbationRequest, RunConfig, load_patch, run_headless};
use basinfield_core::{Preset, SimulationParameters};

fn small_config() -> RunConfig {
    RunConfig {
        params: SimulationParameters {
            grid_size: 24,
            initial_noise: 0.3,
            seed: 0xC0FFEE,
            ..SimulationParameters::default()
        },
        ticks: 30,
        ..RunConfig::default()
    }
}

#[test]
fn headless_run_reaches_requested_tick() {
    let summary = run_headless(&small_config()).expect("run");
    assert_eq!(summary.state.step.0, 30);
    assert!(!summary.state.is_running);
    assert_eq!(summary.frame_hash.len(), 16);
    assert!(summary.frames >= 30);
    assert!(summary.state.energy.is_finite());
}

#[test]
fn identical_configs_produce_identical_hashes() {
    let mut config = small_config();
    config.perturbations = vec![
        "fracture@5,5".parse::<PerturbationRequest>().expect("request"),
        "vortex@20,3:10".parse::<PerturbationRequest>().expect("request"),
    ];
    config.preset = Some(Preset::Turbulent);
    config.transition_frames = 8;
    let a = run_headless(&config).expect("run a");
    let b = run_headless(&config).expect("run b");
    assert_eq!(a.frame_hash, b.frame_hash);
    assert_eq!(a.event_counts, b.event_counts);
}

#[test]
fn preset_transition_lands_on_target() {
    let mut config = small_config();
    config.preset = Some(Preset::Crystalline);
    config.transition_frames = 5;
    let summary = run_headless(&config).expect("run");
    let expected = config.params.merged(&Preset::Crystalline.patch());
    assert_eq!(summary.params, expected);
}

#[test]
fn replay_and_shadow_checks_pass() {
    let mut config = small_config();
    config.determinism_interval = 5;
    config.verify_replay = true;
    config.perturbations = vec!["impulse@12,12:3".parse().expect("request")];
    let summary = run_headless(&config).expect("run");
    assert!(summary.determinism.expect("shadow check ran").is_deterministic);
    assert!(summary.replay.expect("replay ran").is_deterministic);
}

#[test]
fn oversized_grid_is_rejected() {
    let mut config = small_config();
    config.params.grid_size = 5000;
    let err = run_headless(&config).expect_err("grid too large");
    assert!(format!("{err:#}").contains("exceeds the maximum"));
}

#[test]
fn patch_files_are_parsed() {
    let dir = std::env::temp_dir().join(format!("basinfield-patch-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let good = dir.join("good.json");
    std::fs::write(&good, r#"{ "dt": 0.1, "w_k": 2.5 }"#).expect("write");
    let patch = load_patch(&good).expect("patch");
    assert_eq!(patch.dt, Some(0.1));
    assert_eq!(patch.w_k, Some(2.5));

    let bad = dir.join("bad.json");
    std::fs::write(&bad, r#"{ "unknown_knob": 1 }"#).expect("write");
    assert!(load_patch(&bad).is_err());
    assert!(load_patch(&dir.join("missing.json")).is_err());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unusable_frame_rates_are_rejected() {
    for fps in [1e10, f64::INFINITY, f64::NAN, 0.0, -30.0] {
        let mut config = small_config();
        config.ticks = 3;
        config.target_fps = fps;
        let err = run_headless(&config).expect_err("frame rate out of range");
        assert!(format!("{err:#}").contains("target fps"), "{fps}");
    }
}

#[test]
fn fastest_and_slowest_frame_rates_still_finish() {
    for fps in [1_000.0, 0.5] {
        let mut config = small_config();
        config.ticks = 6;
        config.target_fps = fps;
        let summary = run_headless(&config).expect("run");
        assert_eq!(summary.state.step.0, 6, "{fps}");
    }
}
