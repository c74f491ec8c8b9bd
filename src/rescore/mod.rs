//! Rescoring feature extraction and the black-box model boundary
//!
//! A docked pose is summarized into a fixed-length feature vector: 36
//! occurrence counts of ligand/receptor rescore-type pairs within 12 A, the
//! five unweighted scoring terms accumulated within the scoring cutoff, and
//! the ligand's flexibility penalty factor. The model mapping the vector to
//! a scalar is external to the core.

use nalgebra::Vector3;

use crate::ligand::Ligand;
use crate::receptor::Receptor;
use crate::scoring::{ScoringFunction, CUTOFF_SQR};

/// Length of the rescoring feature vector.
pub const NUM_FEATURES: usize = 42;

/// Squared distance cutoff of the pair-count features.
const COUNT_CUTOFF_SQR: f64 = 144.0;

/// Receptor rescore types participating in the pair counts: C, N, O, S.
const NUM_RECEPTOR_RF_TYPES: usize = 4;

/// A black-box function from the feature vector to a scalar score.
pub trait Rescorer: Send + Sync {
    fn predict(&self, features: &[f32; NUM_FEATURES]) -> f64;
}

/// The no-model fallback; hosts without a trained forest report zero.
pub struct NullRescorer;

impl Rescorer for NullRescorer {
    fn predict(&self, _features: &[f32; NUM_FEATURES]) -> f64 {
        0.0
    }
}

/// Builds the feature vector of a docked pose.
///
/// `heavy_atoms` are the posed world coordinates of the ligand's heavy
/// atoms. Atoms without a rescore type contribute to neither feature group.
pub fn features(
    lig: &Ligand,
    heavy_atoms: &[Vector3<f64>],
    rec: &Receptor,
) -> [f32; NUM_FEATURES] {
    let mut v = [0.0f32; NUM_FEATURES];
    for (i, la) in lig.heavy_atoms.iter().enumerate() {
        let Some(lrf) = la.rf else { continue };
        for ra in &rec.atoms {
            let Some(rrf) = ra.rf else { continue };
            if (rrf as usize) >= NUM_RECEPTOR_RF_TYPES {
                continue;
            }
            let r2 = (heavy_atoms[i] - ra.coordinate).norm_squared();
            if r2 >= COUNT_CUTOFF_SQR {
                continue;
            }
            v[(lrf as usize) * NUM_RECEPTOR_RF_TYPES + rrf as usize] += 1.0;
            if r2 < CUTOFF_SQR {
                ScoringFunction::accumulate_terms(&mut v[36..41], la.xs, ra.xs, r2);
            }
        }
    }
    v[NUM_FEATURES - 1] = lig.flexibility_penalty_factor as f32;
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AdType, Atom};
    use crate::grid::SearchBox;
    use crate::ligand::conformation::Conformation;
    use crate::receptor;
    use std::io::BufReader;

    fn carbon_ligand() -> Ligand {
        let text = [
            "ROOT",
            "ATOM      1  C1  LIG A   1       0.000   0.000   0.000  0.00  0.00     0.000 C ",
            "ENDROOT",
            "TORSDOF 0",
        ]
        .join("\n");
        Ligand::parse(&mut BufReader::new(text.as_bytes())).unwrap()
    }

    #[test]
    fn test_pair_count_feature() {
        let b = SearchBox::new(Vector3::zeros(), Vector3::new(10.0, 10.0, 10.0), 0.5);
        let atom = Atom::new(Vector3::new(3.0, 0.0, 0.0), AdType::N);
        let rec = receptor::Receptor::from_atoms(vec![atom], &b);
        let lig = carbon_ligand();
        let conf = Conformation::new(0);
        let (heavy, _) = lig.pose(&conf);
        let v = features(&lig, &heavy, &rec);
        // Ligand carbon (type 0) against receptor nitrogen (type 1).
        assert_eq!(v[1], 1.0);
        assert_eq!(v.iter().take(36).sum::<f32>(), 1.0);
        // Within the scoring cutoff, so the term features are non-zero.
        assert!(v[36] > 0.0);
        assert_eq!(v[41], 1.0);
    }

    #[test]
    fn test_far_receptor_atom_contributes_nothing() {
        let b = SearchBox::new(Vector3::zeros(), Vector3::new(10.0, 10.0, 10.0), 0.5);
        let atom = Atom::new(Vector3::new(13.0, 0.0, 0.0), AdType::C);
        let rec = receptor::Receptor::from_atoms(vec![atom], &b);
        let lig = carbon_ligand();
        let (heavy, _) = lig.pose(&Conformation::new(0));
        let v = features(&lig, &heavy, &rec);
        assert_eq!(v.iter().take(41).sum::<f32>(), 0.0);
    }

    #[test]
    fn test_count_cutoff_is_wider_than_scoring_cutoff() {
        let b = SearchBox::new(Vector3::zeros(), Vector3::new(10.0, 10.0, 10.0), 0.5);
        // 10 A away: counted, but outside the scoring cutoff.
        let atom = Atom::new(Vector3::new(10.0, 0.0, 0.0), AdType::C);
        let rec = receptor::Receptor::from_atoms(vec![atom], &b);
        let lig = carbon_ligand();
        let (heavy, _) = lig.pose(&Conformation::new(0));
        let v = features(&lig, &heavy, &rec);
        assert_eq!(v[0], 1.0);
        assert_eq!(v[36..41].iter().sum::<f32>(), 0.0);
    }

    #[test]
    fn test_null_rescorer() {
        assert_eq!(NullRescorer.predict(&[0.0; NUM_FEATURES]), 0.0);
    }
}
