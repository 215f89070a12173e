use qcflow::calculator::Calc;
use qcflow::engine::LennardJones;
use qcflow::optimize::{run_opt, OptConfig};
use qcflow::runner::RunConfig;
use qcflow::structure::Structure;
use std::collections::BTreeSet;
use std::fs;

fn dimer(r: f64) -> Structure {
    let mut s = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0]), ("Ar", [0.0, 0.0, r])]);
    s.calc = Some(Calc::new("ar2-relax", LennardJones::default()));
    s
}

#[test]
fn test_optimization_stages_scratch_once() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    let scratch_root = dir.path().join("scratch");
    fs::create_dir_all(&run_dir).unwrap();
    fs::write(run_dir.join("restart.dat"), "wavefunction").unwrap();

    let run = RunConfig {
        run_dir: Some(run_dir.clone()),
        scratch_dir: Some(scratch_root.clone()),
        copy_files: BTreeSet::from(["restart.dat".to_string()]),
        clean_dir: false,
        ..RunConfig::default()
    };
    let opt = OptConfig::default();
    let trajectory = run_opt(dimer(1.3), &opt, &run).unwrap();

    assert!(trajectory.is_converged(opt.fmax));
    // Many evaluations, one scratch working directory.
    assert!(trajectory.len() > 2);
    assert_eq!(fs::read_dir(&scratch_root).unwrap().count(), 1);
    // Staged file made it back to the run directory.
    assert!(run_dir.join("restart.dat").exists());
}

#[test]
fn test_unconverged_trajectory_is_data_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let run = RunConfig {
        run_dir: Some(dir.path().to_path_buf()),
        ..RunConfig::default()
    };
    let opt = OptConfig {
        max_steps: 1,
        ..OptConfig::default()
    };
    let trajectory = run_opt(dimer(2.5), &opt, &run).unwrap();
    assert!(!trajectory.is_converged(opt.fmax));
    assert!(trajectory.max_force().unwrap() >= opt.fmax);

    // The trajectory file still recorded the partial progress.
    let content = fs::read_to_string(dir.path().join("opt.traj.xyz")).unwrap();
    assert_eq!(content.matches("frame ").count(), trajectory.len());
}
