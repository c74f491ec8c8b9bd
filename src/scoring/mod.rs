//! The pairwise scoring function and its precomputed table
//!
//! The potential is a weighted sum of five terms of the surface distance
//! `d = r - (rvdw(t1) + rvdw(t2))`: two Gaussians, a one-sided quadratic
//! repulsion, a hydrophobic ramp and a hydrogen-bond ramp. For fast lookup
//! during evaluation the potential is tabulated per unordered type pair over
//! a discretized squared distance.

use crate::atom::{XsType, XS_TYPE_SIZE};

/// Distance cutoff of the scoring function in Angstroms.
pub const CUTOFF: f64 = 8.0;

/// Square of the distance cutoff.
pub const CUTOFF_SQR: f64 = CUTOFF * CUTOFF;

/// Sampling factor for the squared inter-atomic distance.
pub const FACTOR: f64 = 256.0;

/// Number of samples tabulated per type pair within `[0, CUTOFF_SQR]`.
pub const NUM_SAMPLES: usize = (FACTOR * CUTOFF_SQR) as usize + 1;

/// Number of unordered type pairs, i.e. rows of the table.
pub const NUM_TYPE_PAIRS: usize = XS_TYPE_SIZE * (XS_TYPE_SIZE + 1) / 2;

const WEIGHT_GAUSS1: f64 = -0.035579;
const WEIGHT_GAUSS2: f64 = -0.005156;
const WEIGHT_REPULSION: f64 = 0.840245;
const WEIGHT_HYDROPHOBIC: f64 = -0.035069;
const WEIGHT_HBOND: f64 = -0.587439;

/// Maps an unordered interaction type pair to a dense row index of the
/// upper-triangular table.
pub fn pair_index(t1: XsType, t2: XsType) -> usize {
    let (i, j) = if (t1 as usize) <= (t2 as usize) {
        (t1 as usize, t2 as usize)
    } else {
        (t2 as usize, t1 as usize)
    };
    i + j * (j + 1) / 2
}

/// A tabulated sample: the potential and its radial derivative divided by r.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringElement {
    pub e: f64,
    pub dor: f64,
}

/// The precomputed scoring table, one row per unordered type pair.
pub struct ScoringFunction {
    rows: Vec<Vec<ScoringElement>>,
}

impl ScoringFunction {
    /// The sampling radii `rs[i] = sqrt(i / FACTOR)`, shared by every row.
    pub fn sampling_radii() -> Vec<f64> {
        (0..NUM_SAMPLES).map(|i| (i as f64 / FACTOR).sqrt()).collect()
    }

    /// Evaluates the raw potential for types `t1`, `t2` at distance `r`.
    pub fn score(t1: XsType, t2: XsType, r: f64) -> f64 {
        let d = r - (t1.vdw_radius() + t2.vdw_radius());
        let mut e = WEIGHT_GAUSS1 * (-(d * 2.0).powi(2)).exp()
            + WEIGHT_GAUSS2 * (-((d - 3.0) * 0.5).powi(2)).exp()
            + WEIGHT_REPULSION * if d > 0.0 { 0.0 } else { d * d };
        if t1.is_hydrophobic() && t2.is_hydrophobic() {
            e += WEIGHT_HYDROPHOBIC
                * if d >= 1.5 {
                    0.0
                } else if d <= 0.5 {
                    1.0
                } else {
                    1.5 - d
                };
        }
        if XsType::hbond(t1, t2) {
            e += WEIGHT_HBOND
                * if d >= 0.0 {
                    0.0
                } else if d <= -0.7 {
                    1.0
                } else {
                    d * (1.0 / -0.7)
                };
        }
        e
    }

    /// Accumulates the five unweighted terms into `v[0..5]` for the rescoring
    /// feature vector. `r2` is the squared inter-atomic distance.
    pub fn accumulate_terms(v: &mut [f32], t1: XsType, t2: XsType, r2: f64) {
        let d = (r2.sqrt() - (t1.vdw_radius() + t2.vdw_radius())) as f32;
        v[0] += (-4.0 * d * d).exp();
        v[1] += (-0.25 * (d - 3.0) * (d - 3.0)).exp();
        v[2] += if d < 0.0 { d * d } else { 0.0 };
        v[3] += if t1.is_hydrophobic() && t2.is_hydrophobic() {
            if d >= 1.5 {
                0.0
            } else if d <= 0.5 {
                1.0
            } else {
                1.5 - d
            }
        } else {
            0.0
        };
        v[4] += if XsType::hbond(t1, t2) {
            if d >= 0.0 {
                0.0
            } else if d <= -0.7 {
                1.0
            } else {
                d * (1.0 / -0.7)
            }
        } else {
            0.0
        };
    }

    /// Computes the tabulated row for the unordered pair `(t1, t2)`.
    ///
    /// The interior `dor` samples are forward differences of `e` against the
    /// sampling radii, divided by r so the evaluator can form the chain-rule
    /// derivative with a single multiply; both boundary samples carry zero.
    pub fn precalculate(t1: XsType, t2: XsType, rs: &[f64]) -> Vec<ScoringElement> {
        debug_assert_eq!(rs.len(), NUM_SAMPLES);
        let mut p: Vec<ScoringElement> = rs
            .iter()
            .map(|&r| ScoringElement {
                e: Self::score(t1, t2, r),
                dor: 0.0,
            })
            .collect();
        for i in 1..NUM_SAMPLES - 1 {
            p[i].dor = (p[i + 1].e - p[i].e) / ((rs[i + 1] - rs[i]) * rs[i]);
        }
        p
    }

    /// Assembles a table from rows computed by [`Self::precalculate`],
    /// indexed by [`pair_index`].
    pub fn from_rows(rows: Vec<Vec<ScoringElement>>) -> Self {
        debug_assert_eq!(rows.len(), NUM_TYPE_PAIRS);
        Self { rows }
    }

    /// Builds the full table on the calling thread. The host normally fans
    /// the per-row computation out to the task pool instead.
    pub fn new() -> Self {
        let rs = Self::sampling_radii();
        let mut rows = Vec::with_capacity(NUM_TYPE_PAIRS);
        for j in 0..XS_TYPE_SIZE {
            for i in 0..=j {
                debug_assert_eq!(
                    pair_index(crate::atom::XS_TYPES[i], crate::atom::XS_TYPES[j]),
                    rows.len()
                );
                rows.push(Self::precalculate(
                    crate::atom::XS_TYPES[i],
                    crate::atom::XS_TYPES[j],
                    &rs,
                ));
            }
        }
        Self::from_rows(rows)
    }

    /// Constant-time lookup at squared distance `r2`. The caller guarantees
    /// `r2 <= CUTOFF_SQR`.
    #[inline]
    pub fn evaluate(&self, type_pair_index: usize, r2: f64) -> ScoringElement {
        debug_assert!(r2 <= CUTOFF_SQR);
        self.rows[type_pair_index][(FACTOR * r2) as usize]
    }
}

impl Default for ScoringFunction {
    fn default() -> Self {
        Self::new()
    }
}
