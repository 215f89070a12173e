//! Molecular symmetry: rotational geometry classes and Schoenflies point
//! groups.
//!
//! The thermochemistry post-processor needs two things from a structure's
//! geometry: its rotational class (monatomic / linear / nonlinear), which
//! decides how many rigid-body modes to discard and which rotational
//! partition function applies, and its point group, which supplies the
//! rotational symmetry number.
//!
//! Point groups are detected with the standard tolerance-based decision
//! tree: principal moments of inertia split structures into linear,
//! spherical-top, symmetric-top and asymmetric-top branches, then candidate
//! rotation axes and mirror normals generated from the principal axes and
//! same-species site vectors are tested by mapping every site onto a
//! same-species site within a distance tolerance. Linear groups use the
//! `D*h` / `C*v` labels.

use crate::structure::{Structure, UnknownElement};
use nalgebra::{Matrix3, Rotation3, Unit, Vector3};

/// Distance tolerance (Angstrom) for matching a transformed site onto an
/// original site.
const MATCH_TOL: f64 = 0.3;
/// Relative tolerance for comparing principal moments.
const EIG_TOL: f64 = 0.02;
/// Relative threshold on the smallest principal moment below which a
/// structure counts as linear.
const LINEAR_TOL: f64 = 1e-3;
/// Highest rotation order searched for.
const MAX_ROTATION_ORDER: usize = 8;

/// Rotational geometry classification of a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryClass {
    /// Single site; no rotational degrees of freedom
    Monatomic,
    /// All sites on one axis; two rotational degrees of freedom
    Linear,
    /// General case; three rotational degrees of freedom
    Nonlinear,
}

impl GeometryClass {
    /// Lowercase label used in summary records.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryClass::Monatomic => "monatomic",
            GeometryClass::Linear => "linear",
            GeometryClass::Nonlinear => "nonlinear",
        }
    }

    /// Number of rigid-body (translational + rotational) modes.
    pub fn rigid_body_modes(&self) -> usize {
        match self {
            GeometryClass::Monatomic => 3,
            GeometryClass::Linear => 5,
            GeometryClass::Nonlinear => 6,
        }
    }
}

/// Principal moments of inertia in amu Angstrom^2, ascending, about the
/// center of mass.
pub fn principal_moments(structure: &Structure) -> Result<[f64; 3], UnknownElement> {
    let (moments, _) = inertia_eigen(structure)?;
    Ok(moments)
}

/// Classify the rotational geometry from the principal moments.
pub fn classify_geometry(structure: &Structure) -> Result<GeometryClass, UnknownElement> {
    if structure.len() == 1 {
        return Ok(GeometryClass::Monatomic);
    }
    let moments = principal_moments(structure)?;
    if moments[0] <= LINEAR_TOL * moments[2] {
        Ok(GeometryClass::Linear)
    } else {
        Ok(GeometryClass::Nonlinear)
    }
}

/// Detect the Schoenflies point group label of a structure.
pub fn point_group(structure: &Structure) -> Result<String, UnknownElement> {
    if structure.len() == 1 {
        return Ok("Kh".to_string());
    }
    let analyzer = Analyzer::new(structure)?;
    Ok(analyzer.analyze())
}

/// Rotational symmetry number for a Schoenflies label.
///
/// Unrecognized labels conservatively map to 1.
pub fn symmetry_number(point_group: &str) -> u32 {
    let order: u32 = point_group
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0);
    match point_group {
        "C1" | "Ci" | "Cs" | "C*v" | "Kh" => 1,
        "D*h" => 2,
        "T" | "Td" | "Th" => 12,
        "O" | "Oh" => 24,
        "I" | "Ih" => 60,
        pg if pg.starts_with('D') && order > 0 => 2 * order,
        pg if pg.starts_with('C') && order > 0 => order,
        // S2n contains Cn
        pg if pg.starts_with('S') && order > 0 => order / 2,
        _ => 1,
    }
}

fn inertia_eigen(structure: &Structure) -> Result<([f64; 3], [Vector3<f64>; 3]), UnknownElement> {
    let masses = structure.masses()?;
    let com = structure.center_of_mass()?;
    let mut tensor = Matrix3::zeros();
    for (i, m) in masses.iter().enumerate() {
        let p = structure.position(i);
        let r = Vector3::new(p[0] - com[0], p[1] - com[1], p[2] - com[2]);
        tensor += (Matrix3::identity() * r.norm_squared() - r * r.transpose()) * *m;
    }
    let eigen = tensor.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    let moments = [
        eigen.eigenvalues[order[0]],
        eigen.eigenvalues[order[1]],
        eigen.eigenvalues[order[2]],
    ];
    let axes = [
        eigen.eigenvectors.column(order[0]).into_owned(),
        eigen.eigenvectors.column(order[1]).into_owned(),
        eigen.eigenvectors.column(order[2]).into_owned(),
    ];
    Ok((moments, axes))
}

/// Tolerance-based point-group detection over COM-centered coordinates.
struct Analyzer {
    species: Vec<String>,
    coords: Vec<Vector3<f64>>,
    moments: [f64; 3],
    axes: [Vector3<f64>; 3],
}

impl Analyzer {
    fn new(structure: &Structure) -> Result<Self, UnknownElement> {
        let com = structure.center_of_mass()?;
        let coords = (0..structure.len())
            .map(|i| {
                let p = structure.position(i);
                Vector3::new(p[0] - com[0], p[1] - com[1], p[2] - com[2])
            })
            .collect();
        let (moments, axes) = inertia_eigen(structure)?;
        Ok(Self {
            species: structure.symbols.clone(),
            coords,
            moments,
            axes,
        })
    }

    fn analyze(&self) -> String {
        let [e0, _e1, e2] = self.moments;
        if e0 <= LINEAR_TOL * e2 {
            return if self.has_inversion() {
                "D*h".to_string()
            } else {
                "C*v".to_string()
            };
        }
        let spread = (e2 - e0) / e2.max(f64::EPSILON);
        if spread < EIG_TOL {
            self.spherical_top()
        } else if let Some(unique) = self.unique_axis() {
            self.top_with_axis(unique)
        } else {
            self.asymmetric_top()
        }
    }

    /// Unique principal axis of a symmetric top, if two moments coincide.
    fn unique_axis(&self) -> Option<Vector3<f64>> {
        let [e0, e1, e2] = self.moments;
        if (e1 - e0) / e2 < EIG_TOL {
            Some(self.axes[2])
        } else if (e2 - e1) / e2 < EIG_TOL {
            Some(self.axes[0])
        } else {
            None
        }
    }

    fn spherical_top(&self) -> String {
        // Candidate axes: site vectors and same-species pair midpoints.
        let mut best_order = 1;
        let mut c4 = false;
        for axis in self.axis_candidates() {
            let order = self.max_rotation_order(&axis);
            if order >= 4 {
                c4 = true;
            }
            best_order = best_order.max(order);
        }
        if best_order >= 5 {
            if self.has_inversion() {
                "Ih".to_string()
            } else {
                "I".to_string()
            }
        } else if c4 {
            if self.has_inversion() {
                "Oh".to_string()
            } else {
                "O".to_string()
            }
        } else if best_order == 3 {
            if self.has_inversion() {
                "Th".to_string()
            } else if self.has_any_mirror() {
                "Td".to_string()
            } else {
                "T".to_string()
            }
        } else {
            // Tolerance defeated the spherical branch; fall back on the
            // general machinery.
            self.asymmetric_top()
        }
    }

    fn top_with_axis(&self, axis: Vector3<f64>) -> String {
        let n = self.max_rotation_order(&axis);
        if n < 2 {
            return self.asymmetric_top();
        }
        let has_sigma_h = self.is_valid_op(&reflection(&axis));
        let n_perp_c2 = self
            .perpendicular_axis_candidates(&axis)
            .into_iter()
            .filter(|c| self.is_valid_op(&rotation(c, 2, 1)))
            .count();

        if n_perp_c2 >= 1 {
            if has_sigma_h {
                format!("D{n}h")
            } else if self.has_sigma_v(&axis) {
                format!("D{n}d")
            } else {
                format!("D{n}")
            }
        } else if has_sigma_h {
            format!("C{n}h")
        } else if self.has_sigma_v(&axis) {
            format!("C{n}v")
        } else if self.is_valid_op(&improper_rotation(&axis, 2 * n)) {
            format!("S{}", 2 * n)
        } else {
            format!("C{n}")
        }
    }

    fn asymmetric_top(&self) -> String {
        let c2_axes: Vec<Vector3<f64>> = self
            .axes
            .iter()
            .copied()
            .filter(|a| self.is_valid_op(&rotation(a, 2, 1)))
            .collect();
        match c2_axes.len() {
            n if n >= 2 => {
                // All three principal axes are C2 in D2 and above; classify
                // around one of them.
                self.top_with_axis(c2_axes[0])
            }
            1 => self.top_with_axis(c2_axes[0]),
            _ => {
                if self.has_any_mirror() {
                    "Cs".to_string()
                } else if self.has_inversion() {
                    "Ci".to_string()
                } else {
                    "C1".to_string()
                }
            }
        }
    }

    /// Highest n <= MAX_ROTATION_ORDER with a valid Cn about `axis`.
    fn max_rotation_order(&self, axis: &Vector3<f64>) -> usize {
        let mut best = 1;
        for n in 2..=MAX_ROTATION_ORDER {
            if self.is_valid_op(&rotation(axis, n, 1)) {
                best = n;
            }
        }
        best
    }

    fn axis_candidates(&self) -> Vec<Vector3<f64>> {
        let mut candidates: Vec<Vector3<f64>> = Vec::new();
        let mut push = |v: Vector3<f64>| {
            if v.norm() > MATCH_TOL {
                let u = v.normalize();
                if !candidates.iter().any(|c: &Vector3<f64>| {
                    (c - u).norm() < 1e-3 || (c + u).norm() < 1e-3
                }) {
                    candidates.push(u);
                }
            }
        };
        for axis in &self.axes {
            push(*axis);
        }
        for (i, p) in self.coords.iter().enumerate() {
            push(*p);
            for (j, q) in self.coords.iter().enumerate().skip(i + 1) {
                if self.species[i] == self.species[j] {
                    push((p + q) / 2.0);
                    push(p.cross(q));
                }
            }
        }
        candidates
    }

    /// Directions perpendicular to `axis` that could host a C2: projected
    /// site vectors and projected same-species pair midpoints.
    fn perpendicular_axis_candidates(&self, axis: &Vector3<f64>) -> Vec<Vector3<f64>> {
        let u = axis.normalize();
        let mut candidates: Vec<Vector3<f64>> = Vec::new();
        let mut push = |v: Vector3<f64>| {
            let perp = &v - u * v.dot(&u);
            if perp.norm() > MATCH_TOL {
                let p = perp.normalize();
                if !candidates.iter().any(|c: &Vector3<f64>| {
                    (c - p).norm() < 1e-3 || (c + p).norm() < 1e-3
                }) {
                    candidates.push(p);
                }
            }
        };
        for (i, p) in self.coords.iter().enumerate() {
            push(*p);
            for (j, q) in self.coords.iter().enumerate().skip(i + 1) {
                if self.species[i] == self.species[j] {
                    push((p + q) / 2.0);
                }
            }
        }
        candidates
    }

    /// Any mirror plane containing `axis`.
    fn has_sigma_v(&self, axis: &Vector3<f64>) -> bool {
        let u = axis.normalize();
        for (i, p) in self.coords.iter().enumerate() {
            // Normal to the plane spanned by the axis and this site
            let normal = u.cross(p);
            if normal.norm() > MATCH_TOL && self.is_valid_op(&reflection(&normal)) {
                return true;
            }
            for (j, q) in self.coords.iter().enumerate().skip(i + 1) {
                if self.species[i] == self.species[j] {
                    let normal = p - q;
                    let in_plane = normal.dot(&u).abs() < MATCH_TOL;
                    if in_plane && normal.norm() > MATCH_TOL && self.is_valid_op(&reflection(&normal))
                    {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn has_any_mirror(&self) -> bool {
        for axis in &self.axes {
            if self.is_valid_op(&reflection(axis)) {
                return true;
            }
        }
        for (i, p) in self.coords.iter().enumerate() {
            for (j, q) in self.coords.iter().enumerate().skip(i + 1) {
                if self.species[i] == self.species[j] {
                    let normal = p - q;
                    if normal.norm() > MATCH_TOL && self.is_valid_op(&reflection(&normal)) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn has_inversion(&self) -> bool {
        self.is_valid_op(&(-Matrix3::identity()))
    }

    /// A symmetry operation is valid when it maps every site onto a
    /// same-species site within the distance tolerance.
    fn is_valid_op(&self, op: &Matrix3<f64>) -> bool {
        self.coords.iter().enumerate().all(|(i, p)| {
            let mapped = op * p;
            self.coords
                .iter()
                .enumerate()
                .any(|(j, q)| self.species[i] == self.species[j] && (q - mapped).norm() < MATCH_TOL)
        })
    }
}

fn rotation(axis: &Vector3<f64>, order: usize, power: usize) -> Matrix3<f64> {
    let angle = 2.0 * std::f64::consts::PI * power as f64 / order as f64;
    Rotation3::from_axis_angle(&Unit::new_normalize(*axis), angle).into_inner()
}

fn reflection(normal: &Vector3<f64>) -> Matrix3<f64> {
    let n = normal.normalize();
    Matrix3::identity() - 2.0 * n * n.transpose()
}

fn improper_rotation(axis: &Vector3<f64>, order: usize) -> Matrix3<f64> {
    reflection(axis) * rotation(axis, order, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water() -> Structure {
        Structure::from_sites(&[
            ("O", [0.0, 0.0, 0.119262]),
            ("H", [0.0, 0.763239, -0.477047]),
            ("H", [0.0, -0.763239, -0.477047]),
        ])
    }

    fn methane() -> Structure {
        let d = 0.629118;
        Structure::from_sites(&[
            ("C", [0.0, 0.0, 0.0]),
            ("H", [d, d, d]),
            ("H", [d, -d, -d]),
            ("H", [-d, d, -d]),
            ("H", [-d, -d, d]),
        ])
    }

    fn ammonia() -> Structure {
        Structure::from_sites(&[
            ("N", [0.0, 0.0, 0.11649]),
            ("H", [0.0, 0.93973, -0.27181]),
            ("H", [0.81383, -0.46986, -0.27181]),
            ("H", [-0.81383, -0.46986, -0.27181]),
        ])
    }

    fn co2() -> Structure {
        Structure::from_sites(&[
            ("C", [0.0, 0.0, 0.0]),
            ("O", [0.0, 0.0, 1.16]),
            ("O", [0.0, 0.0, -1.16]),
        ])
    }

    #[test]
    fn test_geometry_classes() {
        let atom = Structure::from_sites(&[("Ar", [0.0, 0.0, 0.0])]);
        assert_eq!(classify_geometry(&atom).unwrap(), GeometryClass::Monatomic);
        assert_eq!(classify_geometry(&co2()).unwrap(), GeometryClass::Linear);
        assert_eq!(classify_geometry(&water()).unwrap(), GeometryClass::Nonlinear);
    }

    #[test]
    fn test_point_group_water_c2v() {
        assert_eq!(point_group(&water()).unwrap(), "C2v");
    }

    #[test]
    fn test_point_group_ammonia_c3v() {
        assert_eq!(point_group(&ammonia()).unwrap(), "C3v");
    }

    #[test]
    fn test_point_group_methane_td() {
        assert_eq!(point_group(&methane()).unwrap(), "Td");
    }

    #[test]
    fn test_point_group_linear() {
        assert_eq!(point_group(&co2()).unwrap(), "D*h");
        let hcn = Structure::from_sites(&[
            ("H", [0.0, 0.0, -1.064]),
            ("C", [0.0, 0.0, 0.0]),
            ("N", [0.0, 0.0, 1.156]),
        ]);
        assert_eq!(point_group(&hcn).unwrap(), "C*v");
    }

    #[test]
    fn test_point_group_monatomic() {
        let atom = Structure::from_sites(&[("Cu", [0.0, 0.0, 0.0])]);
        assert_eq!(point_group(&atom).unwrap(), "Kh");
    }

    #[test]
    fn test_symmetry_numbers() {
        assert_eq!(symmetry_number("C1"), 1);
        assert_eq!(symmetry_number("C*v"), 1);
        assert_eq!(symmetry_number("D*h"), 2);
        assert_eq!(symmetry_number("C2v"), 2);
        assert_eq!(symmetry_number("C3v"), 3);
        assert_eq!(symmetry_number("D6h"), 12);
        assert_eq!(symmetry_number("Td"), 12);
        assert_eq!(symmetry_number("Oh"), 24);
        assert_eq!(symmetry_number("S4"), 2);
    }
}
