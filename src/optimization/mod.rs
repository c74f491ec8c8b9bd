//! Search results and the online RMSD-clustered merger

pub mod local;
pub mod monte_carlo;

use nalgebra::Vector3;
use thiserror::Error;

use crate::ligand::conformation::Conformation;

/// Errors that can occur while searching for conformations
#[derive(Error, Debug)]
pub enum OptimizationError {
    #[error("no valid conformation found in the search space")]
    NoConformation,

    #[error("{failed} of {total} search tasks panicked")]
    TaskPanic { failed: usize, total: usize },
}

/// A locally minimized pose found by one search task.
#[derive(Debug, Clone)]
pub struct DockingResult {
    /// Total free energy; the sort and clustering key.
    pub e: f64,
    /// Inter-molecular free energy, i.e. with the intra-ligand term
    /// excluded. Only for output purpose.
    pub f: f64,
    /// Normalized free energy, filled in when the result is reported.
    pub e_nd: f64,
    pub conf: Conformation,
    /// World coordinates of the heavy atoms.
    pub heavy_atoms: Vec<Vector3<f64>>,
}

impl DockingResult {
    /// Squared coordinate-wise distance to another result of the same
    /// ligand.
    fn square_error(&self, other: &Self) -> f64 {
        debug_assert_eq!(self.heavy_atoms.len(), other.heavy_atoms.len());
        self.heavy_atoms
            .iter()
            .zip(&other.heavy_atoms)
            .map(|(a, b)| (a - b).norm_squared())
            .sum()
    }
}

/// Inserts a result into an energy-sorted, RMSD-clustered list.
///
/// Two results closer than `required_square_error` (i.e. RMSD below 2 A for
/// the conventional `4 * num_heavy_atoms` threshold) belong to the same
/// cluster and only the lower-energy representative survives. The list never
/// grows beyond `capacity`; the highest-energy entry is dropped first.
pub fn add_to_results(
    results: &mut Vec<DockingResult>,
    r: DockingResult,
    capacity: usize,
    required_square_error: f64,
) {
    debug_assert!(capacity > 0);
    if let Some(pos) = results
        .iter()
        .position(|o| r.square_error(o) < required_square_error)
    {
        if r.e < results[pos].e {
            results.remove(pos);
            let ins = results.partition_point(|o| o.e < r.e);
            results.insert(ins, r);
        }
        return;
    }
    let ins = results.partition_point(|o| o.e < r.e);
    if ins == results.len() && results.len() >= capacity {
        return;
    }
    results.insert(ins, r);
    results.truncate(capacity);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(e: f64, coords: &[f64]) -> DockingResult {
        DockingResult {
            e,
            f: e,
            e_nd: 0.0,
            conf: Conformation::new(0),
            heavy_atoms: coords.iter().map(|&x| Vector3::new(x, 0.0, 0.0)).collect(),
        }
    }

    fn energies(results: &[DockingResult]) -> Vec<f64> {
        results.iter().map(|r| r.e).collect()
    }

    #[test]
    fn test_same_cluster_keeps_lower_energy() {
        // Ten heavy atoms shifted by 0.5 A: square error 2.5, threshold 40.
        let mut results = Vec::new();
        let a = result(-5.0, &[0.0; 10]);
        let b = result(-7.0, &[0.5; 10]);
        add_to_results(&mut results, a, 64, 40.0);
        add_to_results(&mut results, b, 64, 40.0);
        assert_eq!(energies(&results), vec![-7.0]);
    }

    #[test]
    fn test_distant_results_both_survive() {
        // Shifted by 3 A uniformly: square error 90, above the threshold.
        let mut results = Vec::new();
        add_to_results(&mut results, result(-5.0, &[0.0; 10]), 64, 40.0);
        add_to_results(&mut results, result(-7.0, &[3.0; 10]), 64, 40.0);
        assert_eq!(energies(&results), vec![-7.0, -5.0]);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut results = Vec::new();
        let r = result(-5.0, &[0.0; 10]);
        add_to_results(&mut results, r.clone(), 64, 40.0);
        let snapshot = energies(&results);
        add_to_results(&mut results, r, 64, 40.0);
        assert_eq!(energies(&results), snapshot);
    }

    #[test]
    fn test_sorted_order_is_preserved() {
        let mut results = Vec::new();
        for (e, x) in [(-3.0, 0.0), (-9.0, 10.0), (-6.0, 20.0), (-1.0, 30.0)] {
            add_to_results(&mut results, result(e, &[x; 10]), 64, 40.0);
            for w in results.windows(2) {
                assert!(w[0].e <= w[1].e);
            }
        }
        assert_eq!(energies(&results), vec![-9.0, -6.0, -3.0, -1.0]);
    }

    #[test]
    fn test_capacity_drops_highest_energy() {
        let mut results = Vec::new();
        for i in 0..5 {
            add_to_results(&mut results, result(i as f64, &[10.0 * i as f64; 10]), 3, 40.0);
        }
        assert_eq!(energies(&results), vec![0.0, 1.0, 2.0]);
        // A better result still displaces the worst survivor.
        add_to_results(&mut results, result(-1.0, &[90.0; 10]), 3, 40.0);
        assert_eq!(energies(&results), vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_replacement_restores_sort_order() {
        let mut results = Vec::new();
        add_to_results(&mut results, result(-8.0, &[0.0; 10]), 64, 40.0);
        add_to_results(&mut results, result(-5.0, &[10.0; 10]), 64, 40.0);
        // Same cluster as the second entry but now the global best.
        add_to_results(&mut results, result(-9.0, &[10.2; 10]), 64, 40.0);
        assert_eq!(energies(&results), vec![-9.0, -8.0]);
    }
}
