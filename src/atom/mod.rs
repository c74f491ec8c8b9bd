//! Atom typing and the atom record consumed by the docking core
//!
//! Three type systems coexist: the AutoDock source types assigned while
//! parsing PDBQT text, the XScore interaction types driving the scoring
//! table and the grid maps, and the RF rescore types consumed by the
//! rescoring feature vector.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// AutoDock source atom types, assigned from the last column of a PDBQT
/// ATOM/HETATM record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdType {
    /// Non-polar hydrogen, i.e. bonded to carbon.
    H,
    /// Polar hydrogen, i.e. bonded to a hetero atom.
    Hd,
    /// Carbon, not in a ring.
    C,
    /// Carbon, in a ring.
    A,
    /// Nitrogen, not a hydrogen bond acceptor.
    N,
    /// Nitrogen, a hydrogen bond acceptor.
    Na,
    /// Oxygen, a hydrogen bond acceptor.
    Oa,
    /// Sulfur, not a hydrogen bond acceptor.
    S,
    /// Sulfur, a hydrogen bond acceptor.
    Sa,
    Se,
    P,
    F,
    Cl,
    Br,
    I,
    Zn,
    Fe,
    Mg,
    Ca,
    Mn,
    Cu,
    Sodium,
    K,
    Hg,
    Ni,
    Co,
    Cd,
    As,
    Sr,
}

/// All supported AutoDock types, in canonical order.
pub const AD_TYPES: [AdType; 29] = [
    AdType::H,
    AdType::Hd,
    AdType::C,
    AdType::A,
    AdType::N,
    AdType::Na,
    AdType::Oa,
    AdType::S,
    AdType::Sa,
    AdType::Se,
    AdType::P,
    AdType::F,
    AdType::Cl,
    AdType::Br,
    AdType::I,
    AdType::Zn,
    AdType::Fe,
    AdType::Mg,
    AdType::Ca,
    AdType::Mn,
    AdType::Cu,
    AdType::Sodium,
    AdType::K,
    AdType::Hg,
    AdType::Ni,
    AdType::Co,
    AdType::Cd,
    AdType::As,
    AdType::Sr,
];

impl AdType {
    /// Parses an AutoDock type name. Returns `None` for unsupported types.
    pub fn from_pdbqt(s: &str) -> Option<Self> {
        Some(match s {
            "H" => AdType::H,
            "HD" => AdType::Hd,
            "C" => AdType::C,
            "A" => AdType::A,
            "N" => AdType::N,
            "NA" => AdType::Na,
            "OA" => AdType::Oa,
            "S" => AdType::S,
            "SA" => AdType::Sa,
            "Se" => AdType::Se,
            "P" => AdType::P,
            "F" => AdType::F,
            "Cl" => AdType::Cl,
            "Br" => AdType::Br,
            "I" => AdType::I,
            "Zn" => AdType::Zn,
            "Fe" => AdType::Fe,
            "Mg" => AdType::Mg,
            "Ca" => AdType::Ca,
            "Mn" => AdType::Mn,
            "Cu" => AdType::Cu,
            "Na" => AdType::Sodium,
            "K" => AdType::K,
            "Hg" => AdType::Hg,
            "Ni" => AdType::Ni,
            "Co" => AdType::Co,
            "Cd" => AdType::Cd,
            "As" => AdType::As,
            "Sr" => AdType::Sr,
            _ => return None,
        })
    }

    /// Covalent radius in Angstroms, factorized by 1.1 for extra allowance.
    pub fn covalent_radius(self) -> f64 {
        match self {
            AdType::H | AdType::Hd => 0.407,
            AdType::C | AdType::A => 0.847,
            AdType::N | AdType::Na => 0.825,
            AdType::Oa => 0.803,
            AdType::S | AdType::Sa => 1.122,
            AdType::Se => 1.276,
            AdType::P => 1.166,
            AdType::F => 0.781,
            AdType::Cl => 1.089,
            AdType::Br => 1.254,
            AdType::I => 1.463,
            AdType::Zn => 1.441,
            AdType::Fe => 1.375,
            AdType::Mg => 1.430,
            AdType::Ca => 1.914,
            AdType::Mn => 1.529,
            AdType::Cu => 1.518,
            AdType::Sodium => 1.694,
            AdType::K => 2.156,
            AdType::Hg => 1.639,
            AdType::Ni => 1.331,
            AdType::Co => 1.386,
            AdType::Cd => 1.628,
            AdType::As => 1.309,
            AdType::Sr => 2.112,
        }
    }

    /// True for both polar and non-polar hydrogen.
    pub fn is_hydrogen(self) -> bool {
        matches!(self, AdType::H | AdType::Hd)
    }

    /// True for non-carbon heavy atoms.
    pub fn is_hetero(self) -> bool {
        !matches!(self, AdType::H | AdType::Hd | AdType::C | AdType::A)
    }

    /// Maps the source type onto the interaction type used by the scoring
    /// table and the grid maps. Hydrogens are never scored; they carry the
    /// hydrophobic-carbon tag as a placeholder.
    pub fn to_xs(self) -> XsType {
        match self {
            AdType::H | AdType::Hd => XsType::CarbonH,
            AdType::C | AdType::A => XsType::CarbonH,
            AdType::N => XsType::NitrogenP,
            AdType::Na => XsType::NitrogenA,
            AdType::Oa => XsType::OxygenA,
            AdType::S | AdType::Sa | AdType::Se => XsType::SulfurP,
            AdType::P => XsType::PhosphorusP,
            AdType::F => XsType::FluorineH,
            AdType::Cl => XsType::ChlorineH,
            AdType::Br => XsType::BromineH,
            AdType::I => XsType::IodineH,
            _ => XsType::MetalD,
        }
    }

    /// Maps the source type onto the rescore type. Hydrogens, selenium and
    /// metals have no rescore type.
    pub fn to_rf(self) -> Option<RfType> {
        Some(match self {
            AdType::C | AdType::A => RfType::C,
            AdType::N | AdType::Na => RfType::N,
            AdType::Oa => RfType::O,
            AdType::S | AdType::Sa => RfType::S,
            AdType::P => RfType::P,
            AdType::F => RfType::F,
            AdType::Cl => RfType::Cl,
            AdType::Br => RfType::Br,
            AdType::I => RfType::I,
            _ => return None,
        })
    }
}

/// XScore interaction atom types.
///
/// The tag is assigned once at parse time from the source type and may only
/// be refined by [`Atom::donorize`] and [`Atom::dehydrophobicize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum XsType {
    /// Carbon, hydrophobic, not bonded to a hetero atom.
    CarbonH = 0,
    /// Carbon, bonded to a hetero atom.
    CarbonP = 1,
    /// Nitrogen, neither hydrogen bond donor nor acceptor.
    NitrogenP = 2,
    /// Nitrogen, hydrogen bond donor.
    NitrogenD = 3,
    /// Nitrogen, hydrogen bond acceptor.
    NitrogenA = 4,
    /// Nitrogen, both hydrogen bond donor and acceptor.
    NitrogenDA = 5,
    /// Oxygen, hydrogen bond acceptor.
    OxygenA = 6,
    /// Oxygen, both hydrogen bond donor and acceptor.
    OxygenDA = 7,
    /// Sulfur or selenium.
    SulfurP = 8,
    PhosphorusP = 9,
    FluorineH = 10,
    ChlorineH = 11,
    BromineH = 12,
    IodineH = 13,
    /// Metal, hydrogen bond donor.
    MetalD = 14,
}

/// Number of supported interaction types.
pub const XS_TYPE_SIZE: usize = 15;

/// All interaction types, indexable by their discriminant.
pub const XS_TYPES: [XsType; XS_TYPE_SIZE] = [
    XsType::CarbonH,
    XsType::CarbonP,
    XsType::NitrogenP,
    XsType::NitrogenD,
    XsType::NitrogenA,
    XsType::NitrogenDA,
    XsType::OxygenA,
    XsType::OxygenDA,
    XsType::SulfurP,
    XsType::PhosphorusP,
    XsType::FluorineH,
    XsType::ChlorineH,
    XsType::BromineH,
    XsType::IodineH,
    XsType::MetalD,
];

impl XsType {
    /// Van der Waals radius in Angstroms.
    pub fn vdw_radius(self) -> f64 {
        match self {
            XsType::CarbonH | XsType::CarbonP => 1.9,
            XsType::NitrogenP | XsType::NitrogenD | XsType::NitrogenA | XsType::NitrogenDA => 1.8,
            XsType::OxygenA | XsType::OxygenDA => 1.7,
            XsType::SulfurP => 2.0,
            XsType::PhosphorusP => 2.1,
            XsType::FluorineH => 1.5,
            XsType::ChlorineH => 1.8,
            XsType::BromineH => 2.0,
            XsType::IodineH => 2.2,
            XsType::MetalD => 1.2,
        }
    }

    pub fn is_hydrophobic(self) -> bool {
        matches!(
            self,
            XsType::CarbonH
                | XsType::FluorineH
                | XsType::ChlorineH
                | XsType::BromineH
                | XsType::IodineH
        )
    }

    pub fn is_donor(self) -> bool {
        matches!(
            self,
            XsType::NitrogenD | XsType::NitrogenDA | XsType::OxygenDA | XsType::MetalD
        )
    }

    pub fn is_acceptor(self) -> bool {
        matches!(
            self,
            XsType::NitrogenA | XsType::NitrogenDA | XsType::OxygenA | XsType::OxygenDA
        )
    }

    /// True if the two types form a hydrogen bond donor/acceptor pair.
    pub fn hbond(t1: Self, t2: Self) -> bool {
        (t1.is_donor() && t2.is_acceptor()) || (t2.is_donor() && t1.is_acceptor())
    }
}

/// RF rescore atom types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum RfType {
    C = 0,
    N = 1,
    O = 2,
    S = 3,
    P = 4,
    F = 5,
    Cl = 6,
    Br = 7,
    I = 8,
}

/// Number of supported rescore types.
pub const RF_TYPE_SIZE: usize = 9;

/// An atom as consumed by the docking core.
#[derive(Debug, Clone)]
pub struct Atom {
    /// 3D coordinate in Angstroms. For ligand atoms this is the input pose.
    pub coordinate: Vector3<f64>,
    /// AutoDock source type.
    pub ad: AdType,
    /// XScore interaction type, refined in place during parsing.
    pub xs: XsType,
    /// RF rescore type, absent for hydrogens, selenium and metals.
    pub rf: Option<RfType>,
}

impl Atom {
    pub fn new(coordinate: Vector3<f64>, ad: AdType) -> Self {
        Self {
            coordinate,
            ad,
            xs: ad.to_xs(),
            rf: ad.to_rf(),
        }
    }

    pub fn is_hydrogen(&self) -> bool {
        self.ad.is_hydrogen()
    }

    pub fn is_hetero(&self) -> bool {
        self.ad.is_hetero()
    }

    /// True if the current atom is covalently bonded to the given atom.
    pub fn is_neighbor(&self, other: &Atom) -> bool {
        let r = self.ad.covalent_radius() + other.ad.covalent_radius();
        (self.coordinate - other.coordinate).norm_squared() < r * r
    }

    /// For nitrogen and oxygen, widens the interaction type to a hydrogen
    /// bond donor. Strictly monotonic in the hydrogen-bonding partial order.
    pub fn donorize(&mut self) {
        self.xs = match self.xs {
            XsType::NitrogenP => XsType::NitrogenD,
            XsType::NitrogenA => XsType::NitrogenDA,
            XsType::OxygenA => XsType::OxygenDA,
            other => other,
        };
    }

    /// For carbon bonded to a hetero atom, drops the hydrophobic tag.
    pub fn dehydrophobicize(&mut self) {
        debug_assert!(!self.is_hetero());
        self.xs = XsType::CarbonP;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ad_type_from_pdbqt() {
        assert_eq!(AdType::from_pdbqt("C"), Some(AdType::C));
        assert_eq!(AdType::from_pdbqt("A"), Some(AdType::A));
        assert_eq!(AdType::from_pdbqt("OA"), Some(AdType::Oa));
        assert_eq!(AdType::from_pdbqt("HD"), Some(AdType::Hd));
        assert_eq!(AdType::from_pdbqt("Zn"), Some(AdType::Zn));
        assert_eq!(AdType::from_pdbqt("X"), None);
    }

    #[test]
    fn test_source_to_interaction_map_is_total() {
        for ad in AD_TYPES {
            // Must not panic, and hydrogens fold into the placeholder tag.
            let _ = ad.to_xs();
        }
        assert_eq!(AdType::C.to_xs(), XsType::CarbonH);
        assert_eq!(AdType::A.to_xs(), XsType::CarbonH);
        assert_eq!(AdType::Na.to_xs(), XsType::NitrogenA);
        assert_eq!(AdType::Zn.to_xs(), XsType::MetalD);
        assert_eq!(AdType::Se.to_xs(), XsType::SulfurP);
    }

    #[test]
    fn test_source_to_rescore_map_is_partial() {
        assert_eq!(AdType::C.to_rf(), Some(RfType::C));
        assert_eq!(AdType::A.to_rf(), Some(RfType::C));
        assert_eq!(AdType::Sa.to_rf(), Some(RfType::S));
        assert_eq!(AdType::H.to_rf(), None);
        assert_eq!(AdType::Se.to_rf(), None);
        assert_eq!(AdType::Fe.to_rf(), None);
    }

    #[test]
    fn test_donorize_transitions() {
        let mut a = Atom::new(Vector3::zeros(), AdType::N);
        assert_eq!(a.xs, XsType::NitrogenP);
        a.donorize();
        assert_eq!(a.xs, XsType::NitrogenD);
        // A second donorize is a no-op: the refinement is monotonic.
        a.donorize();
        assert_eq!(a.xs, XsType::NitrogenD);

        let mut a = Atom::new(Vector3::zeros(), AdType::Na);
        a.donorize();
        assert_eq!(a.xs, XsType::NitrogenDA);

        let mut a = Atom::new(Vector3::zeros(), AdType::Oa);
        a.donorize();
        assert_eq!(a.xs, XsType::OxygenDA);
    }

    #[test]
    fn test_dehydrophobicize() {
        let mut a = Atom::new(Vector3::zeros(), AdType::C);
        assert!(a.xs.is_hydrophobic());
        a.dehydrophobicize();
        assert_eq!(a.xs, XsType::CarbonP);
        assert!(!a.xs.is_hydrophobic());
    }

    #[test]
    fn test_hbond_pairing() {
        assert!(XsType::hbond(XsType::NitrogenD, XsType::OxygenA));
        assert!(XsType::hbond(XsType::OxygenA, XsType::MetalD));
        assert!(XsType::hbond(XsType::OxygenDA, XsType::OxygenDA));
        assert!(!XsType::hbond(XsType::CarbonH, XsType::OxygenA));
        assert!(!XsType::hbond(XsType::NitrogenD, XsType::MetalD));
    }

    #[test]
    fn test_neighbor_detection() {
        let a = Atom::new(Vector3::zeros(), AdType::C);
        let b = Atom::new(Vector3::new(1.5, 0.0, 0.0), AdType::C);
        let c = Atom::new(Vector3::new(2.5, 0.0, 0.0), AdType::C);
        assert!(a.is_neighbor(&b));
        assert!(!a.is_neighbor(&c));
    }
}
