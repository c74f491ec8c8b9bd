//! The cuboidal search space and the per-type grid maps
//!
//! The box is discretized at the grid granularity into probe points, and
//! more coarsely into partitions used to bucket receptor atoms for fast
//! neighbor lookup. One grid map per interaction type caches the receptor
//! field over the probe lattice; maps are built lazily on the first ligand
//! that needs the type and cleared wholesale on job change.

use nalgebra::Vector3;
use thiserror::Error;

use crate::atom::{XsType, XS_TYPE_SIZE};
use crate::receptor::Receptor;
use crate::scoring::{pair_index, ScoringFunction, CUTOFF_SQR};

/// Target edge length of a partition in Angstroms.
const PARTITION_GRANULARITY: f64 = 3.0;

/// Errors that can occur when working with the search space and grid maps
#[derive(Error, Debug)]
pub enum GridError {
    #[error("grid map of {0} probes exceeds available memory")]
    Allocation(usize),
}

/// A cuboidal search region discretized into probe points and partitions.
#[derive(Debug, Clone)]
pub struct SearchBox {
    pub center: Vector3<f64>,
    /// Per-axis size of the box.
    pub span: Vector3<f64>,
    pub corner1: Vector3<f64>,
    pub corner2: Vector3<f64>,
    pub granularity: f64,
    pub granularity_inverse: f64,
    /// Number of probe points per axis.
    pub num_probes: [usize; 3],
    /// Number of partitions per axis.
    pub num_partitions: [usize; 3],
    /// Per-axis partition size; divides the span exactly.
    pub partition_size: Vector3<f64>,
    pub partition_size_inverse: Vector3<f64>,
}

impl SearchBox {
    pub fn new(center: Vector3<f64>, span: Vector3<f64>, granularity: f64) -> Self {
        let corner1 = center - span * 0.5;
        let corner2 = corner1 + span;
        let mut num_probes = [0; 3];
        let mut num_partitions = [0; 3];
        let mut partition_size = Vector3::zeros();
        for i in 0..3 {
            num_probes[i] = (span[i] / granularity).ceil() as usize + 1;
            num_partitions[i] = ((span[i] / PARTITION_GRANULARITY).floor() as usize).max(1);
            partition_size[i] = span[i] / num_partitions[i] as f64;
        }
        let partition_size_inverse = Vector3::new(
            1.0 / partition_size[0],
            1.0 / partition_size[1],
            1.0 / partition_size[2],
        );
        Self {
            center,
            span,
            corner1,
            corner2,
            granularity,
            granularity_inverse: 1.0 / granularity,
            num_probes,
            num_partitions,
            partition_size,
            partition_size_inverse,
        }
    }

    /// True if the coordinate lies inside the box.
    pub fn contains(&self, v: &Vector3<f64>) -> bool {
        (0..3).all(|i| self.corner1[i] <= v[i] && v[i] <= self.corner2[i])
    }

    /// True if the coordinate is within the scoring cutoff of the box.
    pub fn within_cutoff(&self, v: &Vector3<f64>) -> bool {
        aabb_distance_sqr(&self.corner1, &self.corner2, v) < CUTOFF_SQR
    }

    /// World coordinate of the probe point at the given lattice index.
    pub fn probe_coordinate(&self, index: [usize; 3]) -> Vector3<f64> {
        Vector3::new(
            self.corner1[0] + self.granularity * index[0] as f64,
            self.corner1[1] + self.granularity * index[1] as f64,
            self.corner1[2] + self.granularity * index[2] as f64,
        )
    }

    /// Lower corner of the partition at the given index.
    pub fn partition_corner1(&self, index: [usize; 3]) -> Vector3<f64> {
        Vector3::new(
            self.corner1[0] + self.partition_size[0] * index[0] as f64,
            self.corner1[1] + self.partition_size[1] * index[1] as f64,
            self.corner1[2] + self.partition_size[2] * index[2] as f64,
        )
    }

    /// Index of the partition containing the coordinate, clamped to the box.
    pub fn partition_of(&self, v: &Vector3<f64>) -> [usize; 3] {
        let mut index = [0; 3];
        for i in 0..3 {
            let f = (v[i] - self.corner1[i]) * self.partition_size_inverse[i];
            index[i] = (f.max(0.0) as usize).min(self.num_partitions[i] - 1);
        }
        index
    }
}

/// Squared distance from a point to an axis-aligned box.
pub fn aabb_distance_sqr(
    corner1: &Vector3<f64>,
    corner2: &Vector3<f64>,
    v: &Vector3<f64>,
) -> f64 {
    let mut d2 = 0.0;
    for i in 0..3 {
        let d = if v[i] < corner1[i] {
            corner1[i] - v[i]
        } else if v[i] > corner2[i] {
            v[i] - corner2[i]
        } else {
            0.0
        };
        d2 += d * d;
    }
    d2
}

/// A fully populated scalar field over the probe lattice for one
/// interaction type.
#[derive(Debug, Clone)]
pub struct GridMap {
    num_probes: [usize; 3],
    data: Vec<f64>,
}

impl GridMap {
    pub fn new(num_probes: [usize; 3]) -> Result<Self, GridError> {
        let total = num_probes[0] * num_probes[1] * num_probes[2];
        let mut data = Vec::new();
        data.try_reserve_exact(total)
            .map_err(|_| GridError::Allocation(total))?;
        data.resize(total, 0.0);
        Ok(Self { num_probes, data })
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (x * self.num_probes[1] + y) * self.num_probes[2] + z
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize, z: usize) -> f64 {
        self.data[self.index(x, y, z)]
    }

    /// Installs the values of one x-slab, laid out as `y * nz + z`.
    pub fn write_slab(&mut self, x: usize, values: &[f64]) {
        let plane = self.num_probes[1] * self.num_probes[2];
        debug_assert_eq!(values.len(), plane);
        let start = x * plane;
        self.data[start..start + plane].copy_from_slice(values);
    }

    /// Trilinearly interpolates the map at a coordinate inside the box,
    /// returning the energy and its analytical gradient.
    pub fn interpolate(&self, b: &SearchBox, v: &Vector3<f64>) -> (f64, Vector3<f64>) {
        let mut i0 = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for k in 0..3 {
            let f = ((v[k] - b.corner1[k]) * b.granularity_inverse).max(0.0);
            i0[k] = (f as usize).min(self.num_probes[k] - 2);
            frac[k] = f - i0[k] as f64;
        }
        let (x0, y0, z0) = (i0[0], i0[1], i0[2]);
        let (dx, dy, dz) = (frac[0], frac[1], frac[2]);

        let e000 = self.at(x0, y0, z0);
        let e100 = self.at(x0 + 1, y0, z0);
        let e010 = self.at(x0, y0 + 1, z0);
        let e110 = self.at(x0 + 1, y0 + 1, z0);
        let e001 = self.at(x0, y0, z0 + 1);
        let e101 = self.at(x0 + 1, y0, z0 + 1);
        let e011 = self.at(x0, y0 + 1, z0 + 1);
        let e111 = self.at(x0 + 1, y0 + 1, z0 + 1);

        let c00 = e000 * (1.0 - dx) + e100 * dx;
        let c10 = e010 * (1.0 - dx) + e110 * dx;
        let c01 = e001 * (1.0 - dx) + e101 * dx;
        let c11 = e011 * (1.0 - dx) + e111 * dx;
        let c0 = c00 * (1.0 - dy) + c10 * dy;
        let c1 = c01 * (1.0 - dy) + c11 * dy;
        let e = c0 * (1.0 - dz) + c1 * dz;

        let gx = ((e100 - e000) * (1.0 - dy) * (1.0 - dz)
            + (e110 - e010) * dy * (1.0 - dz)
            + (e101 - e001) * (1.0 - dy) * dz
            + (e111 - e011) * dy * dz)
            * b.granularity_inverse;
        let gy = ((c10 - c00) * (1.0 - dz) + (c11 - c01) * dz) * b.granularity_inverse;
        let gz = (c1 - c0) * b.granularity_inverse;

        (e, Vector3::new(gx, gy, gz))
    }
}

/// The per-type grid map cache for the current receptor and box.
#[derive(Debug, Default)]
pub struct GridMaps {
    maps: Vec<Option<GridMap>>,
}

impl GridMaps {
    pub fn new() -> Self {
        Self {
            maps: (0..XS_TYPE_SIZE).map(|_| None).collect(),
        }
    }

    pub fn get(&self, t: XsType) -> Option<&GridMap> {
        self.maps[t as usize].as_ref()
    }

    pub fn is_populated(&self, t: XsType) -> bool {
        self.maps[t as usize].is_some()
    }

    /// Allocates an empty map for the type. The caller fills it slab by slab
    /// before the map is ever read.
    pub fn allocate(&mut self, t: XsType, num_probes: [usize; 3]) -> Result<(), GridError> {
        debug_assert!(!self.is_populated(t));
        self.maps[t as usize] = Some(GridMap::new(num_probes)?);
        Ok(())
    }

    pub fn get_mut(&mut self, t: XsType) -> Option<&mut GridMap> {
        self.maps[t as usize].as_mut()
    }

    /// Drops the map of one type, e.g. after a failed build.
    pub fn remove(&mut self, t: XsType) {
        self.maps[t as usize] = None;
    }

    /// Drops every map; called when the receptor or box changes.
    pub fn clear(&mut self) {
        for m in &mut self.maps {
            *m = None;
        }
    }
}

/// One x-slab of freshly computed grid map values for a set of types.
pub struct SlabValues {
    pub x: usize,
    /// Per type, the `num_probes[1] * num_probes[2]` plane of energies.
    pub planes: Vec<(XsType, Vec<f64>)>,
}

/// Computes the grid map values of one x-slab for every type in `types`.
///
/// The value at a probe is the sum of the tabulated potential over all
/// receptor atoms of the probe's partition within the cutoff. A probe
/// consults only its own partition's atom list, never the full receptor.
pub fn populate_slab(
    b: &SearchBox,
    rec: &Receptor,
    sf: &ScoringFunction,
    types: &[XsType],
    x: usize,
) -> SlabValues {
    let ny = b.num_probes[1];
    let nz = b.num_probes[2];
    let mut planes: Vec<(XsType, Vec<f64>)> =
        types.iter().map(|&t| (t, vec![0.0; ny * nz])).collect();
    let pair_indices: Vec<Vec<usize>> = types
        .iter()
        .map(|&t| {
            (0..XS_TYPE_SIZE)
                .map(|a| pair_index(t, crate::atom::XS_TYPES[a]))
                .collect()
        })
        .collect();

    for y in 0..ny {
        for z in 0..nz {
            let probe = b.probe_coordinate([x, y, z]);
            let cell = b.partition_of(&probe);
            for &a_idx in rec.partition_atoms(cell) {
                let a = &rec.atoms[a_idx];
                let r2 = (a.coordinate - probe).norm_squared();
                if r2 >= CUTOFF_SQR {
                    continue;
                }
                for (ti, (_, plane)) in planes.iter_mut().enumerate() {
                    let e = sf.evaluate(pair_indices[ti][a.xs as usize], r2).e;
                    plane[y * nz + z] += e;
                }
            }
        }
    }
    SlabValues { x, planes }
}

/// Allocates and populates the maps of the given types on the calling
/// thread, slab by slab. The engine fans the slabs out to the task pool
/// instead; this serial form serves small hosts and tests.
pub fn populate_maps(
    maps: &mut GridMaps,
    b: &SearchBox,
    rec: &Receptor,
    sf: &ScoringFunction,
    types: &[XsType],
) -> Result<(), GridError> {
    for &t in types {
        maps.allocate(t, b.num_probes)?;
    }
    for x in 0..b.num_probes[0] {
        let slab = populate_slab(b, rec, sf, types, x);
        for (t, plane) in slab.planes {
            if let Some(map) = maps.get_mut(t) {
                map.write_slab(slab.x, &plane);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_box_geometry_invariants() {
        let b = SearchBox::new(
            Vector3::new(1.0, -2.0, 3.0),
            Vector3::new(20.0, 16.0, 18.0),
            0.08,
        );
        for i in 0..3 {
            assert_relative_eq!(b.corner1[i] + b.span[i], b.corner2[i], epsilon = 1e-12);
            assert_eq!(b.num_probes[i], (b.span[i] / 0.08).ceil() as usize + 1);
            // Partition sizes divide the span exactly.
            assert_relative_eq!(
                b.partition_size[i] * b.num_partitions[i] as f64,
                b.span[i],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_tiny_box_has_at_least_one_partition() {
        let b = SearchBox::new(Vector3::zeros(), Vector3::new(2.0, 2.0, 2.0), 0.1);
        assert_eq!(b.num_partitions, [1, 1, 1]);
        assert_eq!(b.partition_of(&Vector3::new(0.99, -0.99, 0.0)), [0, 0, 0]);
    }

    #[test]
    fn test_contains_and_cutoff() {
        let b = SearchBox::new(Vector3::zeros(), Vector3::new(10.0, 10.0, 10.0), 0.08);
        assert!(b.contains(&Vector3::new(4.9, -4.9, 0.0)));
        assert!(!b.contains(&Vector3::new(5.1, 0.0, 0.0)));
        assert!(b.within_cutoff(&Vector3::new(12.9, 0.0, 0.0)));
        assert!(!b.within_cutoff(&Vector3::new(13.1, 0.0, 0.0)));
    }

    #[test]
    fn test_aabb_distance() {
        let c1 = Vector3::new(0.0, 0.0, 0.0);
        let c2 = Vector3::new(1.0, 1.0, 1.0);
        assert_eq!(aabb_distance_sqr(&c1, &c2, &Vector3::new(0.5, 0.5, 0.5)), 0.0);
        assert_eq!(aabb_distance_sqr(&c1, &c2, &Vector3::new(2.0, 0.5, 0.5)), 1.0);
        assert_eq!(aabb_distance_sqr(&c1, &c2, &Vector3::new(2.0, 2.0, 0.5)), 2.0);
    }

    #[test]
    fn test_grid_map_slab_layout() {
        let mut m = GridMap::new([3, 2, 2]).unwrap();
        m.write_slab(1, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(m.at(1, 0, 0), 1.0);
        assert_eq!(m.at(1, 0, 1), 2.0);
        assert_eq!(m.at(1, 1, 0), 3.0);
        assert_eq!(m.at(1, 1, 1), 4.0);
        assert_eq!(m.at(0, 0, 0), 0.0);
        assert_eq!(m.at(2, 1, 1), 0.0);
    }

    #[test]
    fn test_map_is_zero_beyond_cutoff() {
        use crate::atom::AdType;
        let b = SearchBox::new(Vector3::zeros(), Vector3::new(4.0, 4.0, 4.0), 0.5);
        let sf = ScoringFunction::new();
        // The nearest box corner is exactly 8 A from the atom.
        let atom = crate::atom::Atom::new(Vector3::new(10.0, 0.0, 0.0), AdType::C);
        let rec = crate::receptor::Receptor::from_atoms(vec![atom], &b);
        let mut maps = GridMaps::new();
        populate_maps(&mut maps, &b, &rec, &sf, &[XsType::CarbonH]).unwrap();
        let m = maps.get(XsType::CarbonH).unwrap();
        for x in 0..b.num_probes[0] {
            for y in 0..b.num_probes[1] {
                for z in 0..b.num_probes[2] {
                    assert_eq!(m.at(x, y, z), 0.0);
                }
            }
        }
    }

    #[test]
    fn test_single_atom_map_matches_table() {
        use crate::atom::AdType;
        use crate::scoring::pair_index;
        let b = SearchBox::new(Vector3::zeros(), Vector3::new(6.0, 6.0, 6.0), 0.5);
        let sf = ScoringFunction::new();
        let atom = crate::atom::Atom::new(Vector3::zeros(), AdType::C);
        let rec = crate::receptor::Receptor::from_atoms(vec![atom], &b);
        let mut maps = GridMaps::new();
        populate_maps(&mut maps, &b, &rec, &sf, &[XsType::CarbonH]).unwrap();
        let m = maps.get(XsType::CarbonH).unwrap();
        let probe = b.probe_coordinate([2, 3, 4]);
        let r2 = probe.norm_squared();
        let expected = sf.evaluate(pair_index(XsType::CarbonH, XsType::CarbonH), r2).e;
        assert_relative_eq!(m.at(2, 3, 4), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_interpolation_of_linear_field() {
        // A field linear in the probe indices is reproduced exactly, and so
        // is its gradient.
        let b = SearchBox::new(Vector3::zeros(), Vector3::new(2.0, 2.0, 2.0), 0.5);
        let [nx, ny, nz] = b.num_probes;
        let mut m = GridMap::new(b.num_probes).unwrap();
        for x in 0..nx {
            let mut plane = vec![0.0; ny * nz];
            for y in 0..ny {
                for z in 0..nz {
                    plane[y * nz + z] = 2.0 * x as f64 + 3.0 * y as f64 + 4.0 * z as f64;
                }
            }
            m.write_slab(x, &plane);
        }
        let v = Vector3::new(0.3, -0.7, 0.15);
        let (e, grad) = m.interpolate(&b, &v);
        let idx = (v - b.corner1) * b.granularity_inverse;
        assert_relative_eq!(e, 2.0 * idx[0] + 3.0 * idx[1] + 4.0 * idx[2], epsilon = 1e-9);
        assert_relative_eq!(grad[0], 2.0 * b.granularity_inverse, epsilon = 1e-9);
        assert_relative_eq!(grad[1], 3.0 * b.granularity_inverse, epsilon = 1e-9);
        assert_relative_eq!(grad[2], 4.0 * b.granularity_inverse, epsilon = 1e-9);
    }

    #[test]
    fn test_grid_maps_lifecycle() {
        let mut maps = GridMaps::new();
        assert!(!maps.is_populated(XsType::CarbonH));
        maps.allocate(XsType::CarbonH, [2, 2, 2]).unwrap();
        assert!(maps.is_populated(XsType::CarbonH));
        assert!(!maps.is_populated(XsType::OxygenA));
        maps.clear();
        assert!(!maps.is_populated(XsType::CarbonH));
    }
}
