use qcflow::calculator::Calc;
use qcflow::engine::LennardJones;
use qcflow::runner::{run_calc, RunConfig, RunError};
use qcflow::structure::Structure;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

fn dimer_with_calc() -> Structure {
    let mut s = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0]), ("Ar", [0.0, 0.0, 1.2])]);
    s.calc = Some(Calc::new("ar2", LennardJones::default()));
    s
}

#[test]
fn test_copy_file_survives_uncompressed_without_gzip() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    fs::create_dir_all(&run_dir).unwrap();
    fs::write(run_dir.join("f.txt"), "prerequisite").unwrap();

    let config = RunConfig {
        run_dir: Some(run_dir.clone()),
        scratch_dir: Some(dir.path().join("scratch")),
        gzip: false,
        copy_files: BTreeSet::from(["f.txt".to_string()]),
        clean_dir: true,
    };
    let out = run_calc(dimer_with_calc(), &config).unwrap();
    assert!(out.calc.unwrap().has_results());

    assert!(run_dir.join("f.txt").exists());
    assert!(!run_dir.join("f.txt.gz").exists());
    assert_eq!(
        fs::read_to_string(run_dir.join("f.txt")).unwrap(),
        "prerequisite"
    );
}

#[test]
fn test_gzip_leaves_only_compressed_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    fs::create_dir_all(&run_dir).unwrap();
    fs::write(run_dir.join("f.txt"), "prerequisite").unwrap();

    let config = RunConfig {
        run_dir: Some(run_dir.clone()),
        scratch_dir: Some(dir.path().join("scratch")),
        gzip: true,
        copy_files: BTreeSet::from(["f.txt".to_string()]),
        clean_dir: true,
    };
    run_calc(dimer_with_calc(), &config).unwrap();

    assert!(!run_dir.join("f.txt").exists());
    assert!(run_dir.join("f.txt.gz").exists());
}

#[test]
fn test_no_calculator_is_config_error_without_fs_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    let scratch_root = dir.path().join("scratch");
    fs::create_dir_all(&run_dir).unwrap();

    let config = RunConfig {
        run_dir: Some(run_dir.clone()),
        scratch_dir: Some(scratch_root.clone()),
        ..RunConfig::default()
    };
    let bare = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0])]);
    let err = run_calc(bare, &config).unwrap_err();
    assert!(matches!(err, RunError::NoCalculator));

    assert!(!scratch_root.exists());
    assert_eq!(fs::read_dir(&run_dir).unwrap().count(), 0);
}

#[test]
fn test_clean_dir_policy() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    fs::create_dir_all(&run_dir).unwrap();

    // clean_dir: true removes the scratch working directory
    let scratch_cleaned = dir.path().join("scratch_cleaned");
    let config = RunConfig {
        run_dir: Some(run_dir.clone()),
        scratch_dir: Some(scratch_cleaned.clone()),
        clean_dir: true,
        ..RunConfig::default()
    };
    run_calc(dimer_with_calc(), &config).unwrap();
    assert_eq!(fs::read_dir(&scratch_cleaned).unwrap().count(), 0);

    // clean_dir: false keeps it for forensics
    let scratch_kept = dir.path().join("scratch_kept");
    let config = RunConfig {
        run_dir: Some(run_dir.clone()),
        scratch_dir: Some(scratch_kept.clone()),
        clean_dir: false,
        ..RunConfig::default()
    };
    run_calc(dimer_with_calc(), &config).unwrap();
    let kept: Vec<PathBuf> = fs::read_dir(&scratch_kept)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(kept.len(), 1);
    assert!(kept[0]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("qcflow-"));
}

#[test]
fn test_two_sessions_get_distinct_scratch_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    let scratch_root = dir.path().join("scratch");
    fs::create_dir_all(&run_dir).unwrap();

    let config = RunConfig {
        run_dir: Some(run_dir),
        scratch_dir: Some(scratch_root.clone()),
        clean_dir: false,
        ..RunConfig::default()
    };
    run_calc(dimer_with_calc(), &config).unwrap();
    run_calc(dimer_with_calc(), &config).unwrap();
    assert_eq!(fs::read_dir(&scratch_root).unwrap().count(), 2);
}
