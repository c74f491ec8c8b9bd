//! Input/output plumbing shared by the host and the parsers
//!
//! Covers the column-oriented field extraction used by the PDBQT and ligand
//! header formats, the sidecar header offset index, and the per-slice CSV
//! rows that carry docked conformations between phase 1 and phase 2.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use thiserror::Error;

use crate::ligand::conformation::Conformation;

/// Errors that can occur while parsing input records
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("atom type {0} is not supported")]
    UnsupportedAtomType(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    pub fn malformed(line: usize, message: impl Into<String>) -> Self {
        Self::Malformed {
            line,
            message: message.into(),
        }
    }
}

/// Extracts and parses a right-justified field from 1-based inclusive
/// columns, the convention of the fixed-column PDBQT and header formats.
pub fn field<T: FromStr>(line: &str, col1: usize, col2: usize) -> Option<T> {
    line.get(col1 - 1..col2.min(line.len()))?.trim().parse().ok()
}

/// The AutoDock type string of an ATOM/HETATM record, 1-based columns 78-79.
pub fn atom_type_field(line: &str) -> Option<&str> {
    line.get(77..(79.min(line.len()))).map(str::trim)
}

/// The coordinate of an ATOM/HETATM record, 1-based columns 31-54.
pub fn coordinate_fields(line: &str) -> Option<Vector3<f64>> {
    Some(Vector3::new(
        field(line, 31, 38)?,
        field(line, 39, 46)?,
        field(line, 47, 54)?,
    ))
}

/// The nine physicochemical properties carried by a ligand header line,
/// used by the property filter before the ligand record is parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct LigandHeader {
    pub id: String,
    pub mwt: f64,
    pub logp: f64,
    /// Apolar desolvation.
    pub ads: f64,
    /// Polar desolvation.
    pub pds: f64,
    pub hbd: i32,
    pub hba: i32,
    pub tpsa: i32,
    pub chg: i32,
    pub nrb: i32,
}

impl LigandHeader {
    /// Parses the fixed columns of a header line, e.g.
    /// `REMARK     00000007  277.364     2.51 ...`.
    pub fn parse(line: &str) -> Option<Self> {
        Some(Self {
            id: line.get(11..19)?.trim().to_string(),
            mwt: field(line, 21, 28)?,
            logp: field(line, 30, 37)?,
            ads: field(line, 39, 46)?,
            pds: field(line, 48, 55)?,
            hbd: field(line, 57, 59)?,
            hba: field(line, 61, 63)?,
            tpsa: field(line, 65, 67)?,
            chg: field(line, 69, 71)?,
            nrb: field(line, 73, 75)?,
        })
    }
}

/// The sidecar index of byte offsets into the ligand text file, one
/// fixed-width little-endian u64 per ligand.
pub struct HeaderIndex {
    file: File,
    num_ligands: usize,
}

impl HeaderIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            num_ligands: (len / 8) as usize,
        })
    }

    pub fn len(&self) -> usize {
        self.num_ligands
    }

    pub fn is_empty(&self) -> bool {
        self.num_ligands == 0
    }

    /// Byte offset of ligand `i` in the ligand text file.
    pub fn offset(&mut self, i: usize) -> Result<u64, ParseError> {
        self.file.seek(SeekFrom::Start(8 * i as u64))?;
        let mut buf = [0u8; 8];
        self.file.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

/// One row of a per-slice CSV: the docked conformation of one ligand.
///
/// Floating-point fields are written in fixed notation with 12 digits so the
/// conformation can be reconstituted during slice combination.
#[derive(Debug, Clone)]
pub struct SliceRow {
    pub index: usize,
    /// Inter-molecular free energy normalized by the flexibility penalty.
    pub energy: f64,
    pub rescore: f64,
    pub conf: Conformation,
}

impl SliceRow {
    pub fn to_csv(&self) -> String {
        let p = &self.conf.position;
        let q = self.conf.orientation.quaternion();
        let mut s = format!(
            "{},{:.12},{:.12},{:.12},{:.12},{:.12},{:.12},{:.12},{:.12},{:.12}",
            self.index, self.energy, self.rescore, p[0], p[1], p[2], q.w, q.i, q.j, q.k
        );
        for t in &self.conf.torsions {
            s.push_str(&format!(",{:.12}", t));
        }
        s
    }

    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split(',').collect();
        if tokens.len() < 10 {
            return None;
        }
        let index = tokens[0].parse().ok()?;
        let energy = tokens[1].parse().ok()?;
        let rescore = tokens[2].parse().ok()?;
        let reals: Vec<f64> = tokens[3..]
            .iter()
            .map(|t| t.parse().ok())
            .collect::<Option<_>>()?;
        let position = Vector3::new(reals[0], reals[1], reals[2]);
        let orientation = UnitQuaternion::from_quaternion(Quaternion::new(
            reals[3], reals[4], reals[5], reals[6],
        ));
        Some(Self {
            index,
            energy,
            rescore,
            conf: Conformation {
                position,
                orientation,
                torsions: reals[7..].to_vec(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const HEADER: &str =
        "REMARK     00000007  277.364     2.51     6.94   -14.93   0   4  39   0   8    ";

    #[test]
    fn test_field_extraction() {
        assert_eq!(field::<i32>("ATOM     12", 6, 11), Some(12));
        assert_eq!(field::<f64>("   1.50", 1, 7), Some(1.5));
        assert_eq!(field::<i32>("abc", 1, 3), None);
        // Columns past the end of the line are tolerated.
        assert_eq!(field::<i32>("  7", 1, 10), Some(7));
    }

    #[test]
    fn test_ligand_header_parse() {
        let h = LigandHeader::parse(HEADER).unwrap();
        assert_eq!(h.id, "00000007");
        assert_relative_eq!(h.mwt, 277.364);
        assert_relative_eq!(h.logp, 2.51);
        assert_relative_eq!(h.ads, 6.94);
        assert_relative_eq!(h.pds, -14.93);
        assert_eq!(h.hbd, 0);
        assert_eq!(h.hba, 4);
        assert_eq!(h.tpsa, 39);
        assert_eq!(h.chg, 0);
        assert_eq!(h.nrb, 8);
    }

    #[test]
    fn test_header_index_offsets() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for offset in [0u64, 1234, 99999] {
            f.write_all(&offset.to_le_bytes()).unwrap();
        }
        let mut idx = HeaderIndex::open(f.path()).unwrap();
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.offset(0).unwrap(), 0);
        assert_eq!(idx.offset(2).unwrap(), 99999);
        assert_eq!(idx.offset(1).unwrap(), 1234);
    }

    #[test]
    fn test_slice_row_round_trip() {
        let row = SliceRow {
            index: 42,
            energy: -7.25,
            rescore: 6.1,
            conf: Conformation {
                position: Vector3::new(1.0, -2.5, 0.125),
                orientation: UnitQuaternion::from_quaternion(Quaternion::new(1.0, 0.0, 0.0, 0.0)),
                torsions: vec![0.5, -1.25],
            },
        };
        let parsed = SliceRow::parse(&row.to_csv()).unwrap();
        assert_eq!(parsed.index, 42);
        assert_relative_eq!(parsed.energy, -7.25, epsilon = 1e-9);
        assert_relative_eq!(parsed.rescore, 6.1, epsilon = 1e-9);
        assert_relative_eq!(parsed.conf.position[1], -2.5, epsilon = 1e-9);
        assert_eq!(parsed.conf.torsions.len(), 2);
        assert_relative_eq!(parsed.conf.torsions[1], -1.25, epsilon = 1e-9);
    }

    #[test]
    fn test_slice_row_rejects_short_lines() {
        assert!(SliceRow::parse("1,2,3").is_none());
    }
}
