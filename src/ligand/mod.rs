//! The ligand model: a tree of rigid frames with an analytical evaluator
//!
//! A ligand is parsed from a PDBQT record into a rooted tree of frames
//! connected by rotatable-bond hinges, stored flat in depth-first pre-order.
//! The evaluator poses the tree for a conformation, reads the grid maps and
//! the intra-ligand interaction list, and projects the per-atom forces back
//! onto the conformation's change vector in a single reverse pass.

pub mod conformation;

use std::collections::HashMap;
use std::io::{BufRead, Write};

use nalgebra::{Rotation3, Unit, UnitQuaternion, Vector3};

use crate::atom::{AdType, Atom, XsType};
use crate::grid::{GridMaps, SearchBox};
use crate::io::{atom_type_field, coordinate_fields, field, ParseError};
use crate::scoring::{pair_index, ScoringFunction, CUTOFF_SQR};
pub use conformation::{Change, Conformation};

/// Weight of one active torsion in the flexibility penalty.
const FLEXIBILITY_WEIGHT: f64 = 0.05846;

/// Linear penalty per Angstrom for a heavy atom escaping the box. The
/// matching gradient points back into the box.
const OUT_OF_BOX_SLOPE: f64 = 100.0;

/// A rigid fragment of the ligand, connected to its parent frame by at most
/// one rotatable bond.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Parent frame index; the root frame points at itself.
    pub parent: usize,
    /// Heavy atom index of the bond origin inside the parent frame.
    pub rotor_x: usize,
    /// Heavy atom index of this frame's origin.
    pub rotor_y: usize,
    /// True iff the hinge is rotatable and not frozen by topology.
    pub active: bool,
    /// Heavy atom index range owned by this frame.
    pub habegin: usize,
    pub haend: usize,
    /// Hydrogen index range owned by this frame.
    pub hybegin: usize,
    pub hyend: usize,
    /// Rotor Y relative to the parent's origin, in the input pose.
    pub relative_origin: Vector3<f64>,
    /// Unit vector from rotor X to rotor Y, in the input pose.
    pub relative_axis: Vector3<f64>,
    /// Ordinal of this frame's angle among the active torsions.
    pub torsion: Option<usize>,
}

/// A scored intra-ligand atom pair with its precomputed type pair row.
#[derive(Debug, Clone)]
pub struct InteractingPair {
    pub i: usize,
    pub j: usize,
    pub p: usize,
}

enum ModelLine {
    Verbatim(String),
    Heavy { index: usize, line: String },
    Hydrogen { index: usize, line: String },
}

/// The result of one energy evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation {
    /// Total free energy: grid interaction plus intra-ligand.
    pub e: f64,
    /// Free energy with the intra-ligand term excluded.
    pub f: f64,
}

/// A parsed ligand, ready for evaluation against a receptor's grid maps.
pub struct Ligand {
    pub frames: Vec<Frame>,
    pub heavy_atoms: Vec<Atom>,
    pub hydrogens: Vec<Atom>,
    /// Atom coordinates relative to the owning frame's origin, input pose.
    rel_heavy: Vec<Vector3<f64>>,
    rel_hydrogens: Vec<Vector3<f64>>,
    template: Vec<ModelLine>,
    pub interacting_pairs: Vec<InteractingPair>,
    pub num_active_torsions: usize,
    pub num_inactive_torsions: usize,
    /// 1 / (1 + c * (n_active + 0.5 * n_inactive)); normalizes free energy
    /// across ligands of differing flexibility.
    pub flexibility_penalty_factor: f64,
}

struct FrameBuild {
    parent: usize,
    rotor_x: usize,
    rotor_y_serial: Option<usize>,
    rotor_y: Option<usize>,
    habegin: usize,
    haend: Option<usize>,
    hybegin: usize,
    hyend: Option<usize>,
    active: bool,
}

impl FrameBuild {
    fn close(&mut self, num_heavy: usize, num_hydrogens: usize) {
        if self.haend.is_none() {
            self.haend = Some(num_heavy);
            self.hyend = Some(num_hydrogens);
        }
    }
}

impl Ligand {
    /// Parses the PDBQT record of one ligand, consuming lines up to and
    /// including TORSDOF. Leading REMARK lines are skipped; the property
    /// header is expected to have been consumed by the caller.
    pub fn parse<R: BufRead>(reader: &mut R) -> Result<Self, ParseError> {
        let mut frames: Vec<FrameBuild> = Vec::with_capacity(8);
        let mut stack: Vec<usize> = Vec::with_capacity(8);
        let mut heavy_atoms: Vec<Atom> = Vec::with_capacity(64);
        let mut hydrogens: Vec<Atom> = Vec::with_capacity(32);
        let mut bonds: Vec<Vec<usize>> = Vec::with_capacity(64);
        let mut serials: HashMap<usize, usize> = HashMap::with_capacity(64);
        let mut template: Vec<ModelLine> = Vec::with_capacity(96);
        let mut num_lines = 0usize;
        let mut raw = String::with_capacity(96);

        loop {
            raw.clear();
            if reader.read_line(&mut raw)? == 0 {
                break;
            }
            num_lines += 1;
            let line = raw.trim_end();

            if line.starts_with("ATOM") || line.starts_with("HETATM") {
                let f_idx = *stack.last().ok_or_else(|| {
                    ParseError::malformed(num_lines, "atom record outside ROOT or BRANCH")
                })?;
                let serial: usize = field(line, 7, 11)
                    .ok_or_else(|| ParseError::malformed(num_lines, "invalid atom serial"))?;
                let type_str = atom_type_field(line)
                    .ok_or_else(|| ParseError::malformed(num_lines, "truncated atom record"))?;
                let ad = AdType::from_pdbqt(type_str)
                    .ok_or_else(|| ParseError::UnsupportedAtomType(type_str.to_string()))?;
                let coordinate = coordinate_fields(line)
                    .ok_or_else(|| ParseError::malformed(num_lines, "invalid coordinate"))?;
                let mut a = Atom::new(coordinate, ad);

                if ad.is_hydrogen() {
                    if ad == AdType::Hd {
                        // The bonded hetero atom becomes a donor.
                        for i in (frames[f_idx].habegin..heavy_atoms.len()).rev() {
                            if heavy_atoms[i].is_hetero() && a.is_neighbor(&heavy_atoms[i]) {
                                heavy_atoms[i].donorize();
                                break;
                            }
                        }
                    }
                    template.push(ModelLine::Hydrogen {
                        index: hydrogens.len(),
                        line: line.to_string(),
                    });
                    hydrogens.push(a);
                    continue;
                }

                let idx = heavy_atoms.len();
                bonds.push(Vec::with_capacity(4));
                if frames[f_idx].rotor_y.is_none() {
                    if let Some(expected) = frames[f_idx].rotor_y_serial {
                        if serial != expected {
                            return Err(ParseError::malformed(
                                num_lines,
                                format!("expected rotor Y serial {expected}, found {serial}"),
                            ));
                        }
                    }
                    frames[f_idx].rotor_y = Some(idx);
                    if f_idx != 0 {
                        // The frame hinge is a covalent bond.
                        let rx = frames[f_idx].rotor_x;
                        bonds[idx].push(rx);
                        bonds[rx].push(idx);
                        pair_refine(&mut a, &mut heavy_atoms[rx]);
                    }
                }
                for i in frames[f_idx].habegin..idx {
                    if a.is_neighbor(&heavy_atoms[i]) {
                        bonds[idx].push(i);
                        bonds[i].push(idx);
                        pair_refine(&mut a, &mut heavy_atoms[i]);
                    }
                }
                serials.insert(serial, idx);
                template.push(ModelLine::Heavy {
                    index: idx,
                    line: line.to_string(),
                });
                heavy_atoms.push(a);
            } else if line.starts_with("ROOT") {
                if !frames.is_empty() {
                    return Err(ParseError::malformed(num_lines, "duplicate ROOT"));
                }
                frames.push(FrameBuild {
                    parent: 0,
                    rotor_x: 0,
                    rotor_y_serial: None,
                    rotor_y: None,
                    habegin: 0,
                    haend: None,
                    hybegin: 0,
                    hyend: None,
                    active: false,
                });
                stack.push(0);
                template.push(ModelLine::Verbatim(line.to_string()));
            } else if line.starts_with("ENDROOT") {
                frames[0].close(heavy_atoms.len(), hydrogens.len());
                template.push(ModelLine::Verbatim(line.to_string()));
            } else if line.starts_with("BRANCH") {
                let mut parts = line.split_whitespace().skip(1);
                let (x, y): (usize, usize) = match (
                    parts.next().and_then(|t| t.parse().ok()),
                    parts.next().and_then(|t| t.parse().ok()),
                ) {
                    (Some(x), Some(y)) => (x, y),
                    _ => return Err(ParseError::malformed(num_lines, "invalid BRANCH record")),
                };
                let parent = *stack.last().ok_or_else(|| {
                    ParseError::malformed(num_lines, "BRANCH outside ROOT")
                })?;
                frames[parent].close(heavy_atoms.len(), hydrogens.len());
                let rotor_x = *serials.get(&x).ok_or_else(|| {
                    ParseError::malformed(num_lines, format!("unknown rotor X serial {x}"))
                })?;
                frames.push(FrameBuild {
                    parent,
                    rotor_x,
                    rotor_y_serial: Some(y),
                    rotor_y: None,
                    habegin: heavy_atoms.len(),
                    haend: None,
                    hybegin: hydrogens.len(),
                    hyend: None,
                    active: true,
                });
                stack.push(frames.len() - 1);
                template.push(ModelLine::Verbatim(line.to_string()));
            } else if line.starts_with("ENDBRANCH") {
                let f_idx = stack.pop().ok_or_else(|| {
                    ParseError::malformed(num_lines, "unmatched ENDBRANCH")
                })?;
                if f_idx == 0 {
                    return Err(ParseError::malformed(num_lines, "ENDBRANCH closes ROOT"));
                }
                frames[f_idx].close(heavy_atoms.len(), hydrogens.len());
                let habegin = frames[f_idx].habegin;
                let haend = frames[f_idx].haend.unwrap_or(habegin);
                if habegin == haend {
                    return Err(ParseError::malformed(num_lines, "empty BRANCH"));
                }
                // A terminal frame owning a single heavy atom, e.g. -OH or
                // -CH3, cannot affect scoring through its torsion.
                if f_idx == frames.len() - 1 && haend - habegin == 1 {
                    frames[f_idx].active = false;
                }
                template.push(ModelLine::Verbatim(line.to_string()));
            } else if line.starts_with("TORSDOF") {
                template.push(ModelLine::Verbatim(line.to_string()));
                break;
            }
            // REMARK and other records carry nothing the model needs.
        }

        if frames.is_empty() {
            return Err(ParseError::malformed(num_lines, "missing ROOT record"));
        }
        if stack.len() != 1 {
            return Err(ParseError::malformed(num_lines, "unterminated BRANCH"));
        }
        frames[0].close(heavy_atoms.len(), hydrogens.len());
        if frames[0].rotor_y.is_none() {
            return Err(ParseError::malformed(num_lines, "ROOT has no heavy atom"));
        }

        Self::finalize(frames, heavy_atoms, hydrogens, bonds, template)
    }

    fn finalize(
        builds: Vec<FrameBuild>,
        heavy_atoms: Vec<Atom>,
        hydrogens: Vec<Atom>,
        bonds: Vec<Vec<usize>>,
        template: Vec<ModelLine>,
    ) -> Result<Self, ParseError> {
        let num_heavy = heavy_atoms.len();
        let mut num_active_torsions = 0;
        let mut frames: Vec<Frame> = Vec::with_capacity(builds.len());

        for (k, fb) in builds.iter().enumerate() {
            let rotor_y = fb.rotor_y.unwrap_or(0);
            let origin = heavy_atoms[rotor_y].coordinate;
            let (relative_origin, relative_axis) = if k == 0 {
                (Vector3::zeros(), Vector3::zeros())
            } else {
                let parent_origin =
                    heavy_atoms[builds[fb.parent].rotor_y.unwrap_or(0)].coordinate;
                let axis = Unit::new_normalize(origin - heavy_atoms[fb.rotor_x].coordinate);
                (origin - parent_origin, axis.into_inner())
            };
            let torsion = if k > 0 && fb.active {
                num_active_torsions += 1;
                Some(num_active_torsions - 1)
            } else {
                None
            };
            frames.push(Frame {
                parent: fb.parent,
                rotor_x: fb.rotor_x,
                rotor_y,
                active: fb.active,
                habegin: fb.habegin,
                haend: fb.haend.unwrap_or(num_heavy),
                hybegin: fb.hybegin,
                hyend: fb.hyend.unwrap_or(hydrogens.len()),
                relative_origin,
                relative_axis,
                torsion,
            });
        }
        let num_inactive_torsions = frames.len() - 1 - num_active_torsions;

        let mut frame_of = vec![0usize; num_heavy];
        let mut frame_of_hydrogen = vec![0usize; hydrogens.len()];
        for (k, f) in frames.iter().enumerate() {
            for i in f.habegin..f.haend {
                frame_of[i] = k;
            }
            for i in f.hybegin..f.hyend {
                frame_of_hydrogen[i] = k;
            }
        }

        let rel_heavy: Vec<Vector3<f64>> = (0..num_heavy)
            .map(|i| {
                heavy_atoms[i].coordinate
                    - heavy_atoms[frames[frame_of[i]].rotor_y].coordinate
            })
            .collect();
        let rel_hydrogens: Vec<Vector3<f64>> = (0..hydrogens.len())
            .map(|i| {
                hydrogens[i].coordinate
                    - heavy_atoms[frames[frame_of_hydrogen[i]].rotor_y].coordinate
            })
            .collect();

        // Pairs in different frames, excluding 1-2, 1-3 and 1-4 topological
        // neighbors, carry the intra-ligand energy.
        let mut interacting_pairs = Vec::new();
        let mut hop = vec![u32::MAX; num_heavy];
        let mut queue = Vec::with_capacity(num_heavy);
        for i in 0..num_heavy {
            hop.fill(u32::MAX);
            hop[i] = 0;
            queue.clear();
            queue.push(i);
            let mut head = 0;
            while head < queue.len() {
                let u = queue[head];
                head += 1;
                if hop[u] == 3 {
                    continue;
                }
                for &v in &bonds[u] {
                    if hop[v] == u32::MAX {
                        hop[v] = hop[u] + 1;
                        queue.push(v);
                    }
                }
            }
            for j in i + 1..num_heavy {
                if frame_of[i] != frame_of[j] && hop[j] > 3 {
                    interacting_pairs.push(InteractingPair {
                        i,
                        j,
                        p: pair_index(heavy_atoms[i].xs, heavy_atoms[j].xs),
                    });
                }
            }
        }

        let flexibility_penalty_factor = 1.0
            / (1.0
                + FLEXIBILITY_WEIGHT
                    * (num_active_torsions as f64 + 0.5 * num_inactive_torsions as f64));

        Ok(Self {
            frames,
            heavy_atoms,
            hydrogens,
            rel_heavy,
            rel_hydrogens,
            template,
            interacting_pairs,
            num_active_torsions,
            num_inactive_torsions,
            flexibility_penalty_factor,
        })
    }

    pub fn num_heavy_atoms(&self) -> usize {
        self.heavy_atoms.len()
    }

    /// The distinct interaction types of the heavy atoms, i.e. the grid maps
    /// this ligand needs.
    pub fn atom_types(&self) -> Vec<XsType> {
        let mut types: Vec<XsType> = Vec::with_capacity(8);
        for a in &self.heavy_atoms {
            if !types.contains(&a.xs) {
                types.push(a.xs);
            }
        }
        types
    }

    /// Poses the frame tree for a conformation, filling the workspace with
    /// world-space frame origins, rotations, axes and heavy atom coordinates.
    fn pose_into(&self, conf: &Conformation, ws: &mut Workspace) {
        ws.orientations[0] = conf.orientation;
        ws.rotations[0] = conf.orientation.to_rotation_matrix();
        ws.origins[0] = conf.position;
        for (k, f) in self.frames.iter().enumerate().skip(1) {
            let p = f.parent;
            ws.origins[k] = ws.origins[p] + ws.rotations[p] * f.relative_origin;
            let axis = Unit::new_normalize(ws.rotations[p] * f.relative_axis);
            let angle = f.torsion.map_or(0.0, |t| conf.torsions[t]);
            ws.axes[k] = axis.into_inner();
            ws.orientations[k] =
                UnitQuaternion::from_axis_angle(&axis, angle) * ws.orientations[p];
            ws.rotations[k] = ws.orientations[k].to_rotation_matrix();
        }
        for (k, f) in self.frames.iter().enumerate() {
            for i in f.habegin..f.haend {
                ws.coords[i] = ws.origins[k] + ws.rotations[k] * self.rel_heavy[i];
            }
        }
    }

    /// World coordinates of the heavy atoms, posed through a reusable
    /// workspace.
    pub fn pose_heavy(&self, conf: &Conformation, ws: &mut Workspace) -> Vec<Vector3<f64>> {
        self.pose_into(conf, ws);
        ws.coords.clone()
    }

    /// World coordinates of all heavy atoms and hydrogens for a conformation.
    pub fn pose(&self, conf: &Conformation) -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>) {
        let mut ws = Workspace::new(self);
        self.pose_into(conf, &mut ws);
        let mut hydrogens = vec![Vector3::zeros(); self.hydrogens.len()];
        for (k, f) in self.frames.iter().enumerate() {
            for i in f.hybegin..f.hyend {
                hydrogens[i] = ws.origins[k] + ws.rotations[k] * self.rel_hydrogens[i];
            }
        }
        (ws.coords, hydrogens)
    }

    /// Evaluates the free energy and its gradient at a conformation.
    ///
    /// Returns `None` once the total energy reaches `e_upper_bound`; the
    /// gradient is only written for accepted evaluations. The grid map of
    /// every heavy atom type must have been populated by the host.
    pub fn evaluate(
        &self,
        conf: &Conformation,
        sf: &ScoringFunction,
        b: &SearchBox,
        maps: &GridMaps,
        e_upper_bound: f64,
        ws: &mut Workspace,
        g: &mut Change,
    ) -> Option<Evaluation> {
        self.pose_into(conf, ws);

        // Grid interaction term; atoms outside the box pay a linear penalty
        // with a gradient pointing back inside.
        let mut e = 0.0;
        for (i, a) in self.heavy_atoms.iter().enumerate() {
            let v = &ws.coords[i];
            if b.contains(v) {
                let map = maps
                    .get(a.xs)
                    .expect("grid map of a required atom type is not populated");
                let (ei, gi) = map.interpolate(b, v);
                e += ei;
                ws.forces[i] = gi;
            } else {
                let mut excess = 0.0;
                let mut gi = Vector3::zeros();
                for k in 0..3 {
                    if v[k] < b.corner1[k] {
                        excess += b.corner1[k] - v[k];
                        gi[k] = -OUT_OF_BOX_SLOPE;
                    } else if v[k] > b.corner2[k] {
                        excess += v[k] - b.corner2[k];
                        gi[k] = OUT_OF_BOX_SLOPE;
                    }
                }
                e += OUT_OF_BOX_SLOPE * excess;
                ws.forces[i] = gi;
            }
        }
        let f = e;

        // Intra-ligand term over the precomputed interaction list.
        for pair in &self.interacting_pairs {
            let r = ws.coords[pair.i] - ws.coords[pair.j];
            let r2 = r.norm_squared();
            if r2 < CUTOFF_SQR {
                let el = sf.evaluate(pair.p, r2);
                e += el.e;
                let d = el.dor * r;
                ws.forces[pair.i] += d;
                ws.forces[pair.j] -= d;
            }
        }
        if e >= e_upper_bound {
            return None;
        }

        // Project atom forces onto the change vector: accumulate force and
        // torque per frame in reverse pre-order, so every frame is processed
        // after all of its children.
        ws.frame_forces.fill(Vector3::zeros());
        ws.frame_torques.fill(Vector3::zeros());
        for k in (0..self.frames.len()).rev() {
            let frame = &self.frames[k];
            let mut force = ws.frame_forces[k];
            let mut torque = ws.frame_torques[k];
            for i in frame.habegin..frame.haend {
                force += ws.forces[i];
                torque += (ws.coords[i] - ws.origins[k]).cross(&ws.forces[i]);
            }
            if k == 0 {
                g.set_position(force);
                g.set_orientation(torque);
            } else {
                if let Some(t) = frame.torsion {
                    g.set_torsion(t, torque.dot(&ws.axes[k]));
                }
                let p = frame.parent;
                ws.frame_forces[p] += force;
                ws.frame_torques[p] +=
                    torque + (ws.origins[k] - ws.origins[p]).cross(&force);
            }
        }

        Some(Evaluation { e, f })
    }

    /// Writes one PDBQT model of the ligand posed at a conformation,
    /// splicing the new coordinates into the original atom records.
    pub fn write_model<W: Write>(&self, w: &mut W, conf: &Conformation) -> std::io::Result<()> {
        let (heavy, hydrogens) = self.pose(conf);
        for entry in &self.template {
            match entry {
                ModelLine::Verbatim(line) => writeln!(w, "{line}")?,
                ModelLine::Heavy { index, line } => {
                    writeln!(w, "{}", splice_coordinate(line, &heavy[*index]))?
                }
                ModelLine::Hydrogen { index, line } => {
                    writeln!(w, "{}", splice_coordinate(line, &hydrogens[*index]))?
                }
            }
        }
        Ok(())
    }
}

/// When a covalent bond joins a hetero atom and a carbon, the carbon loses
/// its hydrophobic tag.
fn pair_refine(a: &mut Atom, b: &mut Atom) {
    if a.is_hetero() && !b.is_hetero() {
        b.dehydrophobicize();
    } else if !a.is_hetero() && b.is_hetero() {
        a.dehydrophobicize();
    }
}

fn splice_coordinate(line: &str, v: &Vector3<f64>) -> String {
    let mut s = line.to_string();
    s.replace_range(30..54, &format!("{:8.3}{:8.3}{:8.3}", v[0], v[1], v[2]));
    s
}

/// Reusable per-task scratch space for posing and evaluating one ligand.
pub struct Workspace {
    /// World coordinates of the heavy atoms.
    pub coords: Vec<Vector3<f64>>,
    forces: Vec<Vector3<f64>>,
    origins: Vec<Vector3<f64>>,
    orientations: Vec<UnitQuaternion<f64>>,
    rotations: Vec<Rotation3<f64>>,
    axes: Vec<Vector3<f64>>,
    frame_forces: Vec<Vector3<f64>>,
    frame_torques: Vec<Vector3<f64>>,
}

impl Workspace {
    pub fn new(lig: &Ligand) -> Self {
        let nf = lig.frames.len();
        let na = lig.heavy_atoms.len();
        Self {
            coords: vec![Vector3::zeros(); na],
            forces: vec![Vector3::zeros(); na],
            origins: vec![Vector3::zeros(); nf],
            orientations: vec![UnitQuaternion::identity(); nf],
            rotations: vec![Rotation3::identity(); nf],
            axes: vec![Vector3::zeros(); nf],
            frame_forces: vec![Vector3::zeros(); nf],
            frame_torques: vec![Vector3::zeros(); nf],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::BufReader;

    pub fn atom_line(serial: usize, name: &str, x: f64, y: f64, z: f64, t: &str) -> String {
        format!(
            "ATOM  {:>5} {:<4} LIG A   1    {:>8.3}{:>8.3}{:>8.3}  0.00  0.00    {:>6.3} {:<2}",
            serial, name, x, y, z, 0.0, t
        )
    }

    fn parse(text: &str) -> Ligand {
        Ligand::parse(&mut BufReader::new(text.as_bytes())).unwrap()
    }

    fn rigid_two_atoms() -> Ligand {
        parse(&[
            "ROOT".to_string(),
            atom_line(1, "C1", 0.0, 0.0, 0.0, "C"),
            atom_line(2, "C2", 1.5, 0.0, 0.0, "C"),
            "ENDROOT".to_string(),
            "TORSDOF 0".to_string(),
        ]
        .join("\n"))
    }

    fn pentane_chain() -> Ligand {
        parse(&[
            "ROOT".to_string(),
            atom_line(1, "C1", 0.0, 0.0, 0.0, "C"),
            atom_line(2, "C2", 1.5, 0.0, 0.0, "C"),
            "ENDROOT".to_string(),
            "BRANCH 2 3".to_string(),
            atom_line(3, "C3", 2.3, 1.3, 0.0, "C"),
            atom_line(4, "C4", 3.8, 1.3, 0.0, "C"),
            "ENDBRANCH 2 3".to_string(),
            "BRANCH 2 5".to_string(),
            atom_line(5, "C5", 2.3, -1.3, 0.0, "C"),
            "ENDBRANCH 2 5".to_string(),
            "TORSDOF 2".to_string(),
        ]
        .join("\n"))
    }

    #[test]
    fn test_rigid_ligand_has_no_torsions() {
        let lig = rigid_two_atoms();
        assert_eq!(lig.frames.len(), 1);
        assert_eq!(lig.num_active_torsions, 0);
        assert_eq!(lig.num_inactive_torsions, 0);
        assert_relative_eq!(lig.flexibility_penalty_factor, 1.0);
        assert_eq!(Conformation::new(lig.num_active_torsions).num_variables(), 6);
    }

    #[test]
    fn test_branch_parsing_builds_frame_tree() {
        let lig = pentane_chain();
        assert_eq!(lig.frames.len(), 3);
        assert_eq!(lig.frames[1].parent, 0);
        assert_eq!(lig.frames[2].parent, 0);
        assert_eq!(lig.frames[1].rotor_x, 1);
        assert_eq!(lig.frames[1].rotor_y, 2);
        assert!(lig.frames[1].active);
        // The single heavy atom terminal frame is frozen by topology.
        assert!(!lig.frames[2].active);
        assert_eq!(lig.num_active_torsions, 1);
        assert_eq!(lig.num_inactive_torsions, 1);
        assert_relative_eq!(
            lig.flexibility_penalty_factor,
            1.0 / (1.0 + 0.05846 * 1.5),
            epsilon = 1e-12
        );
    }

    fn hexane_chain() -> Ligand {
        parse(&[
            "ROOT".to_string(),
            atom_line(1, "C1", 0.0, 0.0, 0.0, "C"),
            atom_line(2, "C2", 1.5, 0.0, 0.0, "C"),
            "ENDROOT".to_string(),
            "BRANCH 2 3".to_string(),
            atom_line(3, "C3", 2.3, 1.3, 0.0, "C"),
            atom_line(4, "C4", 3.8, 1.3, 0.0, "C"),
            "BRANCH 4 5".to_string(),
            atom_line(5, "C5", 4.6, 2.6, 0.0, "C"),
            atom_line(6, "C6", 6.1, 2.6, 0.0, "C"),
            "ENDBRANCH 4 5".to_string(),
            "ENDBRANCH 2 3".to_string(),
            "TORSDOF 2".to_string(),
        ]
        .join("\n"))
    }

    #[test]
    fn test_interaction_list_excludes_topological_neighbors() {
        // Every pentane pair is within one frame or within 3 bonds.
        assert!(pentane_chain().interacting_pairs.is_empty());

        // Hexane keeps only the pairs 4 or more bonds apart and in
        // different frames.
        let lig = hexane_chain();
        let pairs: Vec<(usize, usize)> =
            lig.interacting_pairs.iter().map(|p| (p.i, p.j)).collect();
        assert_eq!(pairs, vec![(0, 4), (0, 5), (1, 5)]);
    }

    #[test]
    fn test_pose_identity_recovers_relative_geometry() {
        let lig = pentane_chain();
        // Pose at the root origin with identity orientation and zero
        // torsions: distances to the root origin must match the input pose.
        let mut conf = Conformation::new(lig.num_active_torsions);
        conf.position = lig.heavy_atoms[0].coordinate;
        let (heavy, _) = lig.pose(&conf);
        for (i, a) in lig.heavy_atoms.iter().enumerate() {
            assert_relative_eq!((heavy[i] - a.coordinate).norm(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_torsion_rotates_only_the_subtree() {
        let lig = pentane_chain();
        let mut conf = Conformation::new(1);
        conf.position = lig.heavy_atoms[0].coordinate;
        conf.torsions[0] = std::f64::consts::PI / 2.0;
        let (heavy, _) = lig.pose(&conf);
        // Root atoms and the rotor Y are unmoved.
        assert_relative_eq!((heavy[0] - lig.heavy_atoms[0].coordinate).norm(), 0.0, epsilon = 1e-9);
        assert_relative_eq!((heavy[2] - lig.heavy_atoms[2].coordinate).norm(), 0.0, epsilon = 1e-9);
        // C4 moves; its distance to the rotor Y is preserved.
        assert!((heavy[3] - lig.heavy_atoms[3].coordinate).norm() > 0.5);
        assert_relative_eq!(
            (heavy[3] - heavy[2]).norm(),
            (lig.heavy_atoms[3].coordinate - lig.heavy_atoms[2].coordinate).norm(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_carbon_bonded_to_hetero_is_polar() {
        let lig = parse(
            &[
                "ROOT".to_string(),
                atom_line(1, "C1", 0.0, 0.0, 0.0, "C"),
                atom_line(2, "O1", 1.4, 0.0, 0.0, "OA"),
                "ENDROOT".to_string(),
                "TORSDOF 0".to_string(),
            ]
            .join("\n"),
        );
        assert_eq!(lig.heavy_atoms[0].xs, XsType::CarbonP);
        assert_eq!(lig.heavy_atoms[1].xs, XsType::OxygenA);
    }

    #[test]
    fn test_polar_hydrogen_donorizes_ligand_hetero() {
        let lig = parse(
            &[
                "ROOT".to_string(),
                atom_line(1, "N1", 0.0, 0.0, 0.0, "N"),
                atom_line(2, "HN", 1.0, 0.0, 0.0, "HD"),
                "ENDROOT".to_string(),
                "TORSDOF 0".to_string(),
            ]
            .join("\n"),
        );
        assert_eq!(lig.heavy_atoms[0].xs, XsType::NitrogenD);
        assert_eq!(lig.hydrogens.len(), 1);
    }

    #[test]
    fn test_empty_branch_is_rejected() {
        let text = [
            "ROOT".to_string(),
            atom_line(1, "C1", 0.0, 0.0, 0.0, "C"),
            "ENDROOT".to_string(),
            "BRANCH 1 2".to_string(),
            "ENDBRANCH 1 2".to_string(),
            "TORSDOF 1".to_string(),
        ]
        .join("\n");
        assert!(Ligand::parse(&mut BufReader::new(text.as_bytes())).is_err());
    }

    #[test]
    fn test_atom_types_are_distinct() {
        let lig = pentane_chain();
        assert_eq!(lig.atom_types(), vec![XsType::CarbonH]);
    }

    #[test]
    fn test_write_model_splices_new_coordinates() {
        let lig = rigid_two_atoms();
        let mut conf = Conformation::new(0);
        conf.position = Vector3::new(10.0, 20.0, 30.0);
        let mut out = Vec::new();
        lig.write_model(&mut out, &conf).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("  10.000  20.000  30.000"));
        assert!(text.starts_with("ROOT"));
        assert!(text.contains("TORSDOF"));
    }
}
