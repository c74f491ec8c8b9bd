//! One independent Monte-Carlo Simulated-Annealing search
//!
//! A task owns its RNG, seeded by the host before dispatch, and shares only
//! immutable state with its siblings: the ligand, the scoring table, the box
//! and the grid maps. Each outer iteration perturbs the current pose,
//! refines the candidate with BFGS and cluster-inserts the minimum into the
//! task-local result list.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::grid::{GridMaps, SearchBox};
use crate::ligand::conformation::{normalized_angle, Conformation};
use crate::ligand::{Change, Ligand, Workspace};
use crate::optimization::local::{minimize, NUM_ALPHAS};
use crate::optimization::{add_to_results, DockingResult};
use crate::scoring::ScoringFunction;

/// Attempts at finding a valid random initial conformation.
const MAX_INITIAL_TRIALS: usize = 100;

/// Parameters of one Monte-Carlo task
#[derive(Debug, Clone)]
pub struct MonteCarloParams {
    /// Number of outer iterations.
    pub num_iterations: usize,

    /// Capacity of the task-local result list.
    pub max_results: usize,

    /// Metropolis temperature in kcal/mol; kT at 298 K.
    pub temperature: f64,

    /// Per-component Gaussian scale of the position perturbation (A).
    pub position_sigma: f64,

    /// Scale of the random rotation vector (radians).
    pub orientation_sigma: f64,

    /// Per-torsion Gaussian scale (radians).
    pub torsion_sigma: f64,
}

impl Default for MonteCarloParams {
    fn default() -> Self {
        Self {
            num_iterations: 100,
            max_results: 20,
            temperature: 0.593,
            position_sigma: 1.0,
            orientation_sigma: 0.25,
            torsion_sigma: 1.0,
        }
    }
}

/// Runs one search task and returns its energy-sorted, clustered results.
///
/// Fully deterministic for a given seed; two tasks with the same seed
/// produce identical result lists.
pub fn monte_carlo_task(
    lig: &Ligand,
    seed: u64,
    alphas: &[f64; NUM_ALPHAS],
    sf: &ScoringFunction,
    b: &SearchBox,
    maps: &GridMaps,
    params: &MonteCarloParams,
) -> Vec<DockingResult> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ws = Workspace::new(lig);
    let mut g = Change::zeros(lig.num_active_torsions);
    let e_upper_bound = 4.0 * lig.num_heavy_atoms() as f64;
    let required_square_error = 4.0 * lig.num_heavy_atoms() as f64;
    let mut results: Vec<DockingResult> = Vec::with_capacity(params.max_results);

    // Random restart: draw initial conformations until one passes the
    // validity bound.
    let mut current = None;
    for _ in 0..MAX_INITIAL_TRIALS {
        let cand = random_conformation(&mut rng, b, lig.num_active_torsions);
        if let Some(ev) = lig.evaluate(&cand, sf, b, maps, e_upper_bound, &mut ws, &mut g) {
            current = Some((cand, ev.e));
            break;
        }
    }
    let Some((mut conf0, mut e0)) = current else {
        return results;
    };

    for _ in 0..params.num_iterations {
        let c1 = perturb(&mut rng, &conf0, params);
        let Some(ev1) = lig.evaluate(&c1, sf, b, maps, e_upper_bound, &mut ws, &mut g) else {
            continue;
        };
        let m = minimize(
            lig,
            sf,
            b,
            maps,
            alphas,
            c1,
            ev1.e,
            ev1.f,
            g.as_vector().clone(),
            &mut ws,
        );

        // Metropolis acceptance on the minimized energy.
        let accept =
            m.e < e0 || rng.gen::<f64>() < ((e0 - m.e) / params.temperature).exp();

        let heavy_atoms = lig.pose_heavy(&m.conf, &mut ws);
        add_to_results(
            &mut results,
            DockingResult {
                e: m.e,
                f: m.f,
                e_nd: 0.0,
                conf: m.conf.clone(),
                heavy_atoms,
            },
            params.max_results,
            required_square_error,
        );

        if accept {
            conf0 = m.conf;
            e0 = m.e;
        }
    }
    results
}

/// Position uniform in the box, orientation uniform on SO(3), torsions
/// uniform in `[-pi, pi]`.
fn random_conformation(rng: &mut StdRng, b: &SearchBox, num_torsions: usize) -> Conformation {
    let position = Vector3::new(
        rng.gen_range(b.corner1[0]..b.corner2[0]),
        rng.gen_range(b.corner1[1]..b.corner2[1]),
        rng.gen_range(b.corner1[2]..b.corner2[2]),
    );
    let orientation = random_orientation(rng);
    let torsions = (0..num_torsions).map(|_| rng.gen_range(-PI..PI)).collect();
    Conformation {
        position,
        orientation,
        torsions,
    }
}

/// Uniform unit quaternion from a normalized 4-dimensional Gaussian.
fn random_orientation(rng: &mut StdRng) -> UnitQuaternion<f64> {
    loop {
        let q = Quaternion::new(
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
        );
        if q.norm() > 1e-9 {
            return UnitQuaternion::from_quaternion(q);
        }
    }
}

/// Gaussian perturbation scaled per component; the orientation is composed
/// with a random small rotation and torsions wrap.
fn perturb(rng: &mut StdRng, c: &Conformation, params: &MonteCarloParams) -> Conformation {
    let position = c.position
        + params.position_sigma
            * Vector3::new(
                rng.sample::<f64, _>(StandardNormal),
                rng.sample::<f64, _>(StandardNormal),
                rng.sample::<f64, _>(StandardNormal),
            );
    let rotation = params.orientation_sigma
        * Vector3::new(
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
        );
    let mut orientation = UnitQuaternion::from_scaled_axis(rotation) * c.orientation;
    orientation.renormalize();
    let torsions = c
        .torsions
        .iter()
        .map(|t| {
            normalized_angle(t + params.torsion_sigma * rng.sample::<f64, _>(StandardNormal))
        })
        .collect();
    Conformation {
        position,
        orientation,
        torsions,
    }
}
