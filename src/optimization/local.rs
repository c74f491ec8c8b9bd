//! BFGS local minimization with a backtracking line search
//!
//! Each Monte-Carlo candidate is refined by a dense BFGS over the change
//! vector space. The line search walks a precalculated alpha ladder and
//! accepts the first step satisfying the Armijo condition; the rank-two
//! inverse-Hessian update is skipped whenever the curvature condition fails.

use nalgebra::{DMatrix, DVector};

use crate::grid::{GridMaps, SearchBox};
use crate::ligand::conformation::{Change, Conformation};
use crate::ligand::{Ligand, Workspace};
use crate::scoring::ScoringFunction;

/// Number of alpha values tried per line search.
pub const NUM_ALPHAS: usize = 5;

/// Armijo sufficient-decrease constant.
const ARMIJO_C: f64 = 1e-4;

/// Curvature threshold below which the BFGS update is skipped.
const CURVATURE_EPSILON: f64 = 1e-10;

/// Maximum number of BFGS steps per candidate.
const MAX_ITERATIONS: usize = 15;

/// The alpha ladder `10^0, 10^-1, ..., 10^-4`.
pub fn alpha_ladder() -> [f64; NUM_ALPHAS] {
    let mut alphas = [1.0; NUM_ALPHAS];
    for i in 1..NUM_ALPHAS {
        alphas[i] = alphas[i - 1] * 0.1;
    }
    alphas
}

/// A locally minimized conformation and its energies.
pub struct Minimized {
    pub conf: Conformation,
    pub e: f64,
    pub f: f64,
}

/// Minimizes from an already evaluated starting point.
///
/// `e`, `f` and `grad` must be the evaluation of `conf`. The inverse-Hessian
/// estimate starts at identity for every call.
#[allow(clippy::too_many_arguments)]
pub fn minimize(
    lig: &Ligand,
    sf: &ScoringFunction,
    b: &SearchBox,
    maps: &GridMaps,
    alphas: &[f64; NUM_ALPHAS],
    conf: Conformation,
    e: f64,
    f: f64,
    grad: DVector<f64>,
    ws: &mut Workspace,
) -> Minimized {
    let n = grad.len();
    let mut h = DMatrix::<f64>::identity(n, n);
    let mut c1 = conf;
    let mut e1 = e;
    let mut f1 = f;
    let mut g1 = grad;
    let mut g2 = Change::zeros(lig.num_active_torsions);

    for _ in 0..MAX_ITERATIONS {
        let p = -(&h * &g1);
        let pg = p.dot(&g1);
        if pg >= 0.0 {
            break;
        }

        // Backtracking line search: accept the first alpha satisfying
        // e(x + alpha p) < e(x) + c alpha p'g.
        let mut accepted = None;
        for &alpha in alphas {
            let c2 = c1.step(&p, alpha);
            let bound = e1 + ARMIJO_C * alpha * pg;
            if let Some(ev) = lig.evaluate(&c2, sf, b, maps, bound, ws, &mut g2) {
                accepted = Some((alpha, c2, ev));
                break;
            }
        }
        let Some((alpha, c2, ev)) = accepted else {
            break;
        };

        let s = alpha * &p;
        let y = g2.as_vector() - &g1;
        let sy = s.dot(&y);
        if sy > CURVATURE_EPSILON {
            let hy = &h * &y;
            let yhy = y.dot(&hy);
            let r = 1.0 / sy;
            h += ((sy + yhy) * r * r) * (&s * s.transpose());
            h -= r * (&hy * s.transpose() + &s * hy.transpose());
        }

        c1 = c2;
        e1 = ev.e;
        f1 = ev.f;
        g1 = g2.as_vector().clone();
    }

    Minimized {
        conf: c1,
        e: e1,
        f: f1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::XsType;
    use crate::grid::populate_maps;
    use crate::receptor::Receptor;
    use nalgebra::Vector3;
    use std::io::BufReader;

    fn rigid_ligand() -> Ligand {
        let text = [
            "ROOT",
            "ATOM      1  C1  LIG A   1       0.000   0.000   0.000  0.00  0.00     0.000 C ",
            "ATOM      2  C2  LIG A   1       1.500   0.000   0.000  0.00  0.00     0.000 C ",
            "ENDROOT",
            "TORSDOF 0",
        ]
        .join("\n");
        Ligand::parse(&mut BufReader::new(text.as_bytes())).unwrap()
    }

    #[test]
    fn test_minimize_pulls_ligand_back_into_box() {
        let b = SearchBox::new(Vector3::zeros(), Vector3::new(10.0, 10.0, 10.0), 0.5);
        let rec = Receptor::empty(&b);
        let sf = ScoringFunction::new();
        let lig = rigid_ligand();
        let mut maps = GridMaps::new();
        populate_maps(&mut maps, &b, &rec, &sf, &[XsType::CarbonH]).unwrap();

        // The second atom starts one Angstrom outside the +x wall.
        let mut conf = Conformation::new(0);
        conf.position = Vector3::new(4.5, 0.0, 0.0);
        let mut ws = Workspace::new(&lig);
        let mut g = Change::zeros(0);
        let ev = lig
            .evaluate(&conf, &sf, &b, &maps, f64::INFINITY, &mut ws, &mut g)
            .unwrap();
        assert!(ev.e > 0.0);

        let m = minimize(
            &lig,
            &sf,
            &b,
            &maps,
            &alpha_ladder(),
            conf,
            ev.e,
            ev.f,
            g.as_vector().clone(),
            &mut ws,
        );
        assert!(m.e < ev.e);
        let (heavy, _) = lig.pose(&m.conf);
        assert!(heavy[1][0] <= b.corner2[0] + 1e-6);
    }

    #[test]
    fn test_alpha_ladder_is_powers_of_ten() {
        let alphas = alpha_ladder();
        assert_eq!(alphas.len(), 5);
        for (i, a) in alphas.iter().enumerate() {
            approx::assert_relative_eq!(*a, 10f64.powi(-(i as i32)), epsilon = 1e-15);
        }
    }
}
