//
// structure.rs
// Copyright (C) 2019 Malcolm Ramsay <malramsay64@gmail.com>
// Distributed under terms of the MIT license.
//

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use anyhow::{anyhow, bail, Error};
use nalgebra::Vector3;

/// The periodic lattice of a crystal structure
///
/// The lattice is stored as the three cell vectors in cartesian space, which
/// is the representation needed for converting the fractional coordinates of
/// the atomic sites to cartesian positions.
///
#[derive(Debug, Clone, PartialEq)]
pub struct Lattice {
    vectors: [Vector3<f64>; 3],
}

impl Lattice {
    /// Construct a lattice from the six crystallographic cell parameters
    ///
    /// The angles are given in degrees, following the convention of the CIF
    /// format. The first cell vector is aligned with the $x$ axis and the
    /// second lies in the $xy$ plane.
    ///
    pub fn from_parameters(
        a: f64,
        b: f64,
        c: f64,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> Result<Lattice, Error> {
        let (alpha_r, beta_r, gamma_r) = (
            alpha.to_radians(),
            beta.to_radians(),
            gamma.to_radians(),
        );
        let c_x = c * beta_r.cos();
        let c_y = c * (alpha_r.cos() - beta_r.cos() * gamma_r.cos()) / gamma_r.sin();
        let c_z = (c * c - c_x * c_x - c_y * c_y).sqrt();

        let lattice = Lattice {
            vectors: [
                Vector3::new(a, 0., 0.),
                Vector3::new(b * gamma_r.cos(), b * gamma_r.sin(), 0.),
                Vector3::new(c_x, c_y, c_z),
            ],
        };
        if !lattice.volume().is_finite() || lattice.volume() <= 0. {
            bail!(
                "degenerate cell parameters: a={} b={} c={} alpha={} beta={} gamma={}",
                a,
                b,
                c,
                alpha,
                beta,
                gamma
            );
        }
        Ok(lattice)
    }

    /// The lengths of the three cell vectors, conventionally $(a, b, c)$
    pub fn lengths(&self) -> [f64; 3] {
        [
            self.vectors[0].norm(),
            self.vectors[1].norm(),
            self.vectors[2].norm(),
        ]
    }

    /// The cell angles $(\alpha, \beta, \gamma)$ in degrees
    pub fn angles(&self) -> [f64; 3] {
        let angle = |u: &Vector3<f64>, v: &Vector3<f64>| {
            (u.dot(v) / (u.norm() * v.norm())).min(1.).max(-1.).acos().to_degrees()
        };
        [
            angle(&self.vectors[1], &self.vectors[2]),
            angle(&self.vectors[0], &self.vectors[2]),
            angle(&self.vectors[0], &self.vectors[1]),
        ]
    }

    pub fn volume(&self) -> f64 {
        self.vectors[0].dot(&self.vectors[1].cross(&self.vectors[2])).abs()
    }

    /// Convert a point in fractional coordinates to cartesian coordinates
    pub fn to_cartesian(&self, frac: &Vector3<f64>) -> Vector3<f64> {
        self.vectors[0] * frac.x + self.vectors[1] * frac.y + self.vectors[2] * frac.z
    }

    /// Scale every cell vector by a constant factor
    pub fn scaled_by(&self, factor: f64) -> Lattice {
        Lattice {
            vectors: [
                self.vectors[0] * factor,
                self.vectors[1] * factor,
                self.vectors[2] * factor,
            ],
        }
    }

    /// The shortest distance between two fractional positions
    ///
    /// The distance accounts for the periodic boundary conditions of the
    /// lattice, checking the surrounding shell of periodic images for the
    /// closest one.
    ///
    pub fn min_image_distance(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> f64 {
        let delta = Vector3::new(
            wrap_centered(to.x - from.x),
            wrap_centered(to.y - from.y),
            wrap_centered(to.z - from.z),
        );
        let mut best = std::f64::INFINITY;
        for i in -1..=1 {
            for j in -1..=1 {
                for k in -1..=1 {
                    let image = delta + Vector3::new(f64::from(i), f64::from(j), f64::from(k));
                    best = best.min(self.to_cartesian(&image).norm());
                }
            }
        }
        best
    }
}

/// Wrap a fractional offset into the interval [-0.5, 0.5)
fn wrap_centered(x: f64) -> f64 {
    x - x.round()
}

/// A single atomic site within a structure
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub element: String,
    pub frac: Vector3<f64>,
}

/// An atomic crystal structure, a lattice decorated with atomic sites
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub lattice: Lattice,
    pub sites: Vec<Site>,
}

impl Structure {
    /// Parse a structure from the text of a CIF file
    ///
    /// This handles the subset of the CIF format the pipeline exchanges: the
    /// six `_cell_*` parameters and a `loop_` block containing the fractional
    /// coordinates of each site. Standard uncertainty suffixes on numeric
    /// values, `5.64(2)`, are stripped before parsing.
    ///
    pub fn from_cif(text: &str) -> Result<Structure, Error> {
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let mut params: HashMap<&str, f64> = HashMap::new();
        let mut sites: Vec<Site> = Vec::new();

        let mut index = 0;
        while index < lines.len() {
            let line = lines[index];
            if line.is_empty() || line.starts_with('#') {
                index += 1;
                continue;
            }
            if line.starts_with("_cell_") {
                let mut fields = line.split_whitespace();
                if let (Some(tag), Some(value)) = (fields.next(), fields.next()) {
                    if let Some(value) = parse_numeric(value) {
                        params.insert(tag, value);
                    }
                }
                index += 1;
                continue;
            }
            if line == "loop_" {
                index += 1;
                let mut columns: Vec<&str> = Vec::new();
                while index < lines.len() && lines[index].starts_with('_') {
                    if let Some(tag) = lines[index].split_whitespace().next() {
                        columns.push(tag);
                    }
                    index += 1;
                }
                let site_loop = columns.iter().any(|&c| c == "_atom_site_fract_x");
                while index < lines.len() {
                    let row = lines[index];
                    if row.is_empty()
                        || row.starts_with('_')
                        || row.starts_with('#')
                        || row.starts_with("loop_")
                        || row.starts_with("data_")
                    {
                        break;
                    }
                    if site_loop {
                        let fields: Vec<&str> = row.split_whitespace().collect();
                        if fields.len() == columns.len() {
                            if let Some(site) = site_from_row(&columns, &fields) {
                                sites.push(site);
                            }
                        }
                    }
                    index += 1;
                }
                continue;
            }
            index += 1;
        }

        let cell = |tag: &str| {
            params
                .get(tag)
                .copied()
                .ok_or_else(|| anyhow!("missing cell parameter {}", tag))
        };
        let lattice = Lattice::from_parameters(
            cell("_cell_length_a")?,
            cell("_cell_length_b")?,
            cell("_cell_length_c")?,
            cell("_cell_angle_alpha")?,
            cell("_cell_angle_beta")?,
            cell("_cell_angle_gamma")?,
        )?;

        if sites.is_empty() {
            bail!("no atomic sites found in structure");
        }

        Ok(Structure { lattice, sites })
    }

    /// Write the structure as the text of a CIF file
    ///
    /// The structure is written as a full P1 listing of the sites, the same
    /// subset of the format accepted by [`Structure::from_cif`].
    pub fn to_cif(&self) -> String {
        let mut out = String::new();
        let [a, b, c] = self.lattice.lengths();
        let [alpha, beta, gamma] = self.lattice.angles();
        writeln!(out, "data_{}", self.formula()).unwrap();
        writeln!(out, "_symmetry_space_group_name_H-M 'P 1'").unwrap();
        writeln!(out, "_cell_length_a {:.6}", a).unwrap();
        writeln!(out, "_cell_length_b {:.6}", b).unwrap();
        writeln!(out, "_cell_length_c {:.6}", c).unwrap();
        writeln!(out, "_cell_angle_alpha {:.6}", alpha).unwrap();
        writeln!(out, "_cell_angle_beta {:.6}", beta).unwrap();
        writeln!(out, "_cell_angle_gamma {:.6}", gamma).unwrap();
        writeln!(out, "loop_").unwrap();
        writeln!(out, "_atom_site_type_symbol").unwrap();
        writeln!(out, "_atom_site_label").unwrap();
        writeln!(out, "_atom_site_fract_x").unwrap();
        writeln!(out, "_atom_site_fract_y").unwrap();
        writeln!(out, "_atom_site_fract_z").unwrap();
        let mut counters: BTreeMap<&str, usize> = BTreeMap::new();
        for site in &self.sites {
            let counter = counters.entry(site.element.as_str()).or_insert(0);
            *counter += 1;
            writeln!(
                out,
                "{} {}{} {:.6} {:.6} {:.6}",
                site.element, site.element, counter, site.frac.x, site.frac.y, site.frac.z
            )
            .unwrap();
        }
        out
    }

    /// The number of each element in the structure
    pub fn composition(&self) -> BTreeMap<String, usize> {
        let mut composition = BTreeMap::new();
        for site in &self.sites {
            *composition.entry(site.element.clone()).or_insert(0) += 1;
        }
        composition
    }

    /// The composition divided through by the greatest common factor
    ///
    /// Structures which are supercells of each other share the same reduced
    /// composition, which makes it the appropriate quantity for an
    /// element-only comparison of two structures.
    pub fn reduced_composition(&self) -> BTreeMap<String, usize> {
        let composition = self.composition();
        let factor = composition.values().fold(0, |acc, &count| gcd(acc, count));
        composition
            .into_iter()
            .map(|(element, count)| (element, count / factor.max(1)))
            .collect()
    }

    /// A short chemical formula built from the reduced composition
    pub fn formula(&self) -> String {
        let mut formula = String::new();
        for (element, count) in self.reduced_composition() {
            formula.push_str(&element);
            if count > 1 {
                formula.push_str(&count.to_string());
            }
        }
        formula
    }

    pub fn volume_per_site(&self) -> f64 {
        self.lattice.volume() / self.sites.len() as f64
    }

    /// Rescale the lattice so each site occupies a unit volume
    ///
    /// The fractional coordinates of the sites are unchanged by the scaling,
    /// leaving an otherwise identical structure.
    pub fn normalised_volume(&self) -> Structure {
        let factor = self.volume_per_site().powf(-1. / 3.);
        Structure {
            lattice: self.lattice.scaled_by(factor),
            sites: self.sites.clone(),
        }
    }
}

/// Extract a site from one row of an atom-site loop
fn site_from_row(columns: &[&str], fields: &[&str]) -> Option<Site> {
    let position = |tag: &str| columns.iter().position(|&c| c == tag);

    let element_field = position("_atom_site_type_symbol")
        .or_else(|| position("_atom_site_label"))?;
    let element: String = fields[element_field]
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if element.is_empty() {
        return None;
    }

    let coordinate = |tag: &str| position(tag).and_then(|i| parse_numeric(fields[i]));
    Some(Site {
        element,
        frac: Vector3::new(
            coordinate("_atom_site_fract_x")?,
            coordinate("_atom_site_fract_y")?,
            coordinate("_atom_site_fract_z")?,
        ),
    })
}

/// Parse a CIF numeric value, stripping any standard uncertainty suffix
fn parse_numeric(token: &str) -> Option<f64> {
    token.split('(').next().and_then(|t| t.parse().ok())
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    pub fn rocksalt_cif() -> &'static str {
        "data_NaCl
_symmetry_space_group_name_H-M 'P 1'
_cell_length_a 5.64
_cell_length_b 5.64
_cell_length_c 5.64
_cell_angle_alpha 90.0
_cell_angle_beta 90.0
_cell_angle_gamma 90.0
loop_
_atom_site_type_symbol
_atom_site_label
_atom_site_fract_x
_atom_site_fract_y
_atom_site_fract_z
Na Na1 0.0 0.0 0.0
Na Na2 0.5 0.5 0.0
Na Na3 0.5 0.0 0.5
Na Na4 0.0 0.5 0.5
Cl Cl1 0.5 0.0 0.0
Cl Cl2 0.0 0.5 0.0
Cl Cl3 0.0 0.0 0.5
Cl Cl4 0.5 0.5 0.5
"
    }

    #[test]
    fn parse_rocksalt() -> Result<(), Error> {
        let structure = Structure::from_cif(rocksalt_cif())?;
        assert_eq!(structure.sites.len(), 8);
        let [a, b, c] = structure.lattice.lengths();
        assert_abs_diff_eq!(a, 5.64, epsilon = 1e-8);
        assert_abs_diff_eq!(b, 5.64, epsilon = 1e-8);
        assert_abs_diff_eq!(c, 5.64, epsilon = 1e-8);
        for angle in &structure.lattice.angles() {
            assert_abs_diff_eq!(*angle, 90., epsilon = 1e-8);
        }
        Ok(())
    }

    #[test]
    fn parse_uncertainty_suffix() -> Result<(), Error> {
        let text = rocksalt_cif().replace("_cell_length_a 5.64", "_cell_length_a 5.64(2)");
        let structure = Structure::from_cif(&text)?;
        assert_abs_diff_eq!(structure.lattice.lengths()[0], 5.64, epsilon = 1e-8);
        Ok(())
    }

    #[test]
    fn missing_cell_parameter_is_error() {
        let text = rocksalt_cif().replace("_cell_length_c 5.64", "");
        assert!(Structure::from_cif(&text).is_err());
    }

    #[test]
    fn no_sites_is_error() {
        let text: String = rocksalt_cif()
            .lines()
            .take_while(|line| !line.starts_with("Na"))
            .map(|line| format!("{}\n", line))
            .collect();
        assert!(Structure::from_cif(&text).is_err());
    }

    #[test]
    fn reduced_composition() -> Result<(), Error> {
        let structure = Structure::from_cif(rocksalt_cif())?;
        let reduced = structure.reduced_composition();
        assert_eq!(reduced.get("Na"), Some(&1));
        assert_eq!(reduced.get("Cl"), Some(&1));
        assert_eq!(structure.formula(), "ClNa");
        Ok(())
    }

    #[test]
    fn cif_round_trip() -> Result<(), Error> {
        let structure = Structure::from_cif(rocksalt_cif())?;
        let reparsed = Structure::from_cif(&structure.to_cif())?;
        assert_eq!(structure.sites.len(), reparsed.sites.len());
        assert_abs_diff_eq!(
            structure.lattice.volume(),
            reparsed.lattice.volume(),
            epsilon = 1e-6
        );
        Ok(())
    }

    #[test]
    fn min_image_wraps_across_boundary() -> Result<(), Error> {
        let lattice = Lattice::from_parameters(10., 10., 10., 90., 90., 90.)?;
        let near_origin = Vector3::new(0.05, 0., 0.);
        let near_far_edge = Vector3::new(0.95, 0., 0.);
        assert_abs_diff_eq!(
            lattice.min_image_distance(&near_origin, &near_far_edge),
            1.,
            epsilon = 1e-8
        );
        Ok(())
    }

    #[test]
    fn normalised_volume_is_unit_per_site() -> Result<(), Error> {
        let structure = Structure::from_cif(rocksalt_cif())?;
        let normalised = structure.normalised_volume();
        assert_abs_diff_eq!(normalised.volume_per_site(), 1., epsilon = 1e-8);
        Ok(())
    }
}
