//! Iterative geometry optimization driver.
//!
//! Drives repeated force evaluations through an attached calculator until the
//! maximum atomic force component falls below a threshold, collecting every
//! intermediate structure into a [`Trajectory`].
//!
//! Scratch staging happens once for the whole trajectory, not per step; each
//! step is one invocation of the engine's compute trigger inside the shared
//! working directory. Non-convergence within the step budget is not an error:
//! the best-effort trajectory is returned and the terminal frame's forces are
//! observably above threshold, so callers inspect
//! [`Trajectory::is_converged`].

use crate::calculator::Calc;
use crate::io;
use crate::runner::{RunConfig, RunError, Result, ScratchSession};
use crate::structure::Structure;
use log::{info, warn};
use nalgebra::{DMatrix, DVector};

/// Optimization step algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Fast inertial relaxation engine; robust default for noisy forces
    #[default]
    Fire,
    /// Quasi-Newton steps with PSB Hessian updates
    Bfgs,
}

/// Configuration for one optimization run.
#[derive(Debug, Clone)]
pub struct OptConfig {
    /// Step algorithm
    pub algorithm: Algorithm,
    /// Force convergence threshold: max |force component| in eV/Angstrom
    pub fmax: f64,
    /// Maximum number of optimization steps (evaluations = steps + 1)
    pub max_steps: usize,
    /// Trajectory filename written incrementally into the run directory;
    /// `None` disables the file
    pub trajectory: Option<String>,
    /// Largest allowed step norm in Angstrom
    pub max_step_size: f64,
}

impl Default for OptConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Fire,
            fmax: 0.01,
            max_steps: 500,
            trajectory: Some("opt.traj.xyz".to_string()),
            max_step_size: 0.2,
        }
    }
}

/// Ordered sequence of structure snapshots from an iterative optimization.
///
/// Append-only while the run is active, immutable afterward. Every frame
/// carries its own calculator results; the terminal frame of an unconverged
/// run has forces above threshold.
#[derive(Debug, Default)]
pub struct Trajectory {
    /// Structure snapshots in evaluation order
    pub frames: Vec<Structure>,
}

impl Trajectory {
    /// Number of recorded frames (force evaluations).
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True if no frame was recorded.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Borrow the terminal frame.
    pub fn last_frame(&self) -> Option<&Structure> {
        self.frames.last()
    }

    /// Consume the trajectory, returning the terminal frame.
    pub fn into_final_structure(mut self) -> Option<Structure> {
        self.frames.pop()
    }

    /// Max |force component| of the terminal frame, if it has forces.
    pub fn max_force(&self) -> Option<f64> {
        let frame = self.frames.last()?;
        let forces = frame.calc.as_ref()?.results().forces_vector()?;
        Some(forces.iter().fold(0.0, |m: f64, f| m.max(f.abs())))
    }

    /// Whether the terminal frame satisfies the force threshold.
    pub fn is_converged(&self, fmax: f64) -> bool {
        self.max_force().map(|f| f < fmax).unwrap_or(false)
    }
}

/// FIRE integrator state (velocity mixing with adaptive timestep).
struct Fire {
    velocities: DVector<f64>,
    dt: f64,
    dt_max: f64,
    alpha: f64,
    n_uphill_reset: usize,
}

impl Fire {
    const ALPHA_START: f64 = 0.1;
    const F_INC: f64 = 1.1;
    const F_DEC: f64 = 0.5;
    const F_ALPHA: f64 = 0.99;
    const N_MIN: usize = 5;

    fn new(dof: usize) -> Self {
        Self {
            velocities: DVector::zeros(dof),
            dt: 0.1,
            dt_max: 1.0,
            alpha: Self::ALPHA_START,
            n_uphill_reset: 0,
        }
    }

    fn step(&mut self, positions: &DVector<f64>, forces: &DVector<f64>, max_step: f64) -> DVector<f64> {
        let power = forces.dot(&self.velocities);
        if power > 0.0 {
            let f_norm = forces.norm();
            if f_norm > 0.0 {
                let v_norm = self.velocities.norm();
                self.velocities = &self.velocities * (1.0 - self.alpha)
                    + forces * (self.alpha * v_norm / f_norm);
            }
            if self.n_uphill_reset > Self::N_MIN {
                self.dt = (self.dt * Self::F_INC).min(self.dt_max);
                self.alpha *= Self::F_ALPHA;
            }
            self.n_uphill_reset += 1;
        } else {
            self.velocities.fill(0.0);
            self.alpha = Self::ALPHA_START;
            self.dt *= Self::F_DEC;
            self.n_uphill_reset = 0;
        }

        self.velocities += forces * self.dt;
        let mut dr = &self.velocities * self.dt;
        let norm = dr.norm();
        if norm > max_step {
            dr *= max_step / norm;
        }
        positions + dr
    }
}

/// BFGS state: approximate Hessian plus the previous point.
struct Bfgs {
    hessian: DMatrix<f64>,
    prev: Option<(DVector<f64>, DVector<f64>)>,
}

impl Bfgs {
    /// Initial curvature guess in eV/Angstrom^2.
    const ALPHA: f64 = 70.0;

    fn new(dof: usize) -> Self {
        Self {
            hessian: DMatrix::identity(dof, dof) * Self::ALPHA,
            prev: None,
        }
    }

    fn step(&mut self, positions: &DVector<f64>, forces: &DVector<f64>, max_step: f64) -> DVector<f64> {
        let gradient = -forces;
        if let Some((prev_x, prev_g)) = &self.prev {
            let sk = positions - prev_x;
            let yk = &gradient - prev_g;
            self.hessian = update_hessian_psb(&self.hessian, &sk, &yk);
        }
        self.prev = Some((positions.clone(), gradient.clone()));

        // Solve H * dk = -g
        let neg_g = forces.clone();
        let dk = self
            .hessian
            .clone()
            .lu()
            .solve(&neg_g)
            .unwrap_or_else(|| forces / Self::ALPHA);

        let mut x_new = positions + &dk;
        let step_norm = dk.norm();
        if step_norm > max_step {
            x_new = positions + &dk * (max_step / step_norm);
        }
        x_new
    }
}

/// Update a Hessian approximation with the PSB formula.
fn update_hessian_psb(
    hessian: &DMatrix<f64>,
    sk: &DVector<f64>,
    yk: &DVector<f64>,
) -> DMatrix<f64> {
    let mut h_new = hessian.clone();

    let hsk = hessian * sk;
    let diff = yk - &hsk;
    let sk_dot_sk = sk.dot(sk);

    if sk_dot_sk.abs() > 1e-10 {
        let sk_diff = sk.dot(&diff);
        let term1 = &diff * sk.transpose() + sk * diff.transpose();
        let term2 = (sk * sk.transpose()) * (sk_diff / sk_dot_sk);
        h_new += (term1 - term2) / sk_dot_sk;
    }

    h_new
}

enum Stepper {
    Fire(Fire),
    Bfgs(Bfgs),
}

impl Stepper {
    fn new(algorithm: Algorithm, dof: usize) -> Self {
        match algorithm {
            Algorithm::Fire => Stepper::Fire(Fire::new(dof)),
            Algorithm::Bfgs => Stepper::Bfgs(Bfgs::new(dof)),
        }
    }

    fn step(&mut self, x: &DVector<f64>, f: &DVector<f64>, max_step: f64) -> DVector<f64> {
        match self {
            Stepper::Fire(s) => s.step(x, f, max_step),
            Stepper::Bfgs(s) => s.step(x, f, max_step),
        }
    }
}

fn max_force_component(forces: &DVector<f64>) -> f64 {
    forces.iter().fold(0.0, |m: f64, f| m.max(f.abs()))
}

/// Drive repeated force evaluations to convergence and return the trajectory.
///
/// Convergence is checked after each evaluation and before any step is
/// taken, so an already-converged input finishes after exactly one
/// evaluation. Exhausting `max_steps` returns the trajectory unconverged
/// rather than failing; engine errors propagate immediately.
pub fn run_opt(mut structure: Structure, opt: &OptConfig, run: &RunConfig) -> Result<Trajectory> {
    let Some(mut calc) = structure.calc.take() else {
        return Err(RunError::NoCalculator);
    };

    let run_dir = run.resolve_run_dir()?;
    let session = ScratchSession::create(&run_dir, run)?;
    let ctx = session.context();
    let traj_path = opt.trajectory.as_ref().map(|name| run_dir.join(name));

    let mut trajectory = Trajectory::default();
    let mut stepper = Stepper::new(opt.algorithm, structure.positions.len());
    let mut steps_taken = 0usize;

    loop {
        calc.run(&structure, &ctx)?;
        let forces = calc
            .results()
            .forces_vector()
            .ok_or(RunError::MissingForces)?;
        let fmax_now = max_force_component(&forces);

        record_frame(&mut trajectory, &structure, &calc, traj_path.as_deref(), fmax_now)?;

        if fmax_now < opt.fmax {
            info!(
                "optimization converged after {} evaluation(s): fmax {:.6} < {:.6}",
                trajectory.len(),
                fmax_now,
                opt.fmax
            );
            break;
        }
        if steps_taken >= opt.max_steps {
            warn!(
                "optimization not converged after {} steps: fmax {:.6} >= {:.6}",
                steps_taken, fmax_now, opt.fmax
            );
            break;
        }

        structure.positions = stepper.step(&structure.positions, &forces, opt.max_step_size);
        steps_taken += 1;
    }

    session.finalize()?;
    Ok(trajectory)
}

fn record_frame(
    trajectory: &mut Trajectory,
    structure: &Structure,
    calc: &Calc,
    traj_path: Option<&std::path::Path>,
    fmax_now: f64,
) -> Result<()> {
    let mut snapshot = structure.clone();
    snapshot.calc = Some(calc.clone());
    if let Some(path) = traj_path {
        let comment = format!(
            "frame {} energy {:.8} fmax {:.6}",
            trajectory.len(),
            calc.results().energy.unwrap_or(f64::NAN),
            fmax_now
        );
        io::append_xyz_frame(&snapshot.symbols, &snapshot.positions, &comment, path)?;
    }
    trajectory.frames.push(snapshot);
    Ok(())
}
