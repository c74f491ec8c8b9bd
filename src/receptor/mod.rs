//! Receptor parsing and partition bucketing
//!
//! The receptor is an ordered list of heavy atoms plus a partition grid:
//! each partition holds the indices of every receptor atom that can possibly
//! lie within the scoring cutoff of any probe point of that partition. Both
//! are built once per job.

use nalgebra::Vector3;

use crate::atom::{AdType, Atom};
use crate::grid::{aabb_distance_sqr, SearchBox};
use crate::io::{atom_type_field, coordinate_fields, ParseError};
use crate::scoring::CUTOFF_SQR;

/// A receptor prepared for grid map construction.
#[derive(Debug)]
pub struct Receptor {
    /// Heavy atoms in file order.
    pub atoms: Vec<Atom>,
    num_partitions: [usize; 3],
    /// Per partition, the indices of nearby receptor atoms.
    partitions: Vec<Vec<usize>>,
}

impl Receptor {
    /// Parses PDBQT text and buckets the atoms into the partitions of the
    /// given search box.
    ///
    /// Non-polar hydrogens are dropped. A polar hydrogen donorizes the
    /// bonded hetero atom within the current residue, and carbons bonded to
    /// a hetero atom within the same residue lose their hydrophobic tag.
    pub fn from_pdbqt(content: &str, b: &SearchBox) -> Result<Self, ParseError> {
        let mut atoms: Vec<Atom> = Vec::with_capacity(4096);
        // Start index of each residue in `atoms`, used to scope the
        // donorization and dehydrophobicization passes.
        let mut residues: Vec<usize> = Vec::with_capacity(1024);
        let mut residue_seq = String::new();

        for (line_idx, line) in content.lines().enumerate() {
            if !(line.starts_with("ATOM") || line.starts_with("HETATM")) {
                continue;
            }
            let num_line = line_idx + 1;
            let type_str = atom_type_field(line)
                .ok_or_else(|| ParseError::malformed(num_line, "truncated atom record"))?;
            let ad = AdType::from_pdbqt(type_str)
                .ok_or_else(|| ParseError::UnsupportedAtomType(type_str.to_string()))?;
            if ad == AdType::H {
                continue;
            }
            let coordinate = coordinate_fields(line)
                .ok_or_else(|| ParseError::malformed(num_line, "invalid coordinate"))?;
            let a = Atom::new(coordinate, ad);

            if ad == AdType::Hd {
                // The bonded hetero atom becomes a hydrogen bond donor.
                let residue_start = residues.last().copied().unwrap_or(0);
                for hetero in atoms[residue_start..].iter_mut().rev() {
                    if hetero.is_hetero() && a.is_neighbor(hetero) {
                        hetero.donorize();
                        break;
                    }
                }
                continue;
            }

            let seq = line.get(22..26).unwrap_or("");
            if seq != residue_seq {
                residue_seq = seq.to_string();
                residues.push(atoms.len());
            }
            atoms.push(a);
        }

        // Within each residue, carbons bonded to a hetero atom are polar.
        residues.push(atoms.len());
        for r in residues.windows(2) {
            let (begin, end) = (r[0], r[1]);
            for i in begin..end {
                if !atoms[i].is_hetero() {
                    continue;
                }
                for j in begin..end {
                    if atoms[j].is_hetero() {
                        continue;
                    }
                    if atoms[i].is_neighbor(&atoms[j]) {
                        atoms[j].dehydrophobicize();
                    }
                }
            }
        }

        Ok(Self::from_atoms(atoms, b))
    }

    /// Builds a receptor from already typed atoms, bucketing them into the
    /// partitions of the search box.
    pub fn from_atoms(atoms: Vec<Atom>, b: &SearchBox) -> Self {
        // Only atoms within the cutoff of the box can ever contribute.
        let nearby: Vec<usize> = (0..atoms.len())
            .filter(|&i| b.within_cutoff(&atoms[i].coordinate))
            .collect();

        let [nx, ny, nz] = b.num_partitions;
        let mut partitions = vec![Vec::new(); nx * ny * nz];
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    let corner1 = b.partition_corner1([x, y, z]);
                    let corner2 = b.partition_corner1([x + 1, y + 1, z + 1]);
                    let cell = &mut partitions[(x * ny + y) * nz + z];
                    for &i in &nearby {
                        if aabb_distance_sqr(&corner1, &corner2, &atoms[i].coordinate)
                            < CUTOFF_SQR
                        {
                            cell.push(i);
                        }
                    }
                }
            }
        }
        Self {
            atoms,
            num_partitions: b.num_partitions,
            partitions,
        }
    }

    /// An empty receptor; every grid map built against it is zero.
    pub fn empty(b: &SearchBox) -> Self {
        Self::from_atoms(Vec::new(), b)
    }

    /// The indices of the receptor atoms bucketed into the given partition.
    pub fn partition_atoms(&self, index: [usize; 3]) -> &[usize] {
        let [x, y, z] = index;
        &self.partitions[(x * self.num_partitions[1] + y) * self.num_partitions[2] + z]
    }
}
