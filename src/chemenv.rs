//
// chemenv.rs
// Copyright (C) 2019 Malcolm Ramsay <malramsay64@gmail.com>
// Distributed under terms of the MIT license.
//

use std::collections::HashSet;
use std::fmt;
use std::fmt::Write;

use itertools::Itertools;
use nalgebra::Vector3;

use crate::structure::Structure;

/// Geometries with a symmetry measure above this are discarded outright
const CSM_CUTOFF: f64 = 10.;

/// A single surviving geometry with at least this weight is reported alone
const DOMINANT_FRACTION: f64 = 0.9;

/// Tuning parameters for the local environment analysis
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentParams {
    /// Multiplier on the nearest neighbor distance for the search radius
    pub distance_cutoff: f64,
    /// Minimum distance weight for a candidate neighbor to count
    pub angle_cutoff: f64,
    /// Scaling of the maximum distance when collecting candidate neighbors
    pub max_dist_factor: f64,
}

impl Default for EnvironmentParams {
    fn default() -> EnvironmentParams {
        EnvironmentParams {
            distance_cutoff: 1.,
            angle_cutoff: 0.3,
            max_dist_factor: 1.5,
        }
    }
}

/// One candidate coordination geometry for a site
#[derive(Debug, Clone)]
pub struct GeometryAssignment {
    pub name: &'static str,
    pub symbol: &'static str,
    pub fraction: f64,
    pub csm: f64,
}

/// The coordination environment determined for a symmetry-distinct site
///
/// A single assignment means the environment was uniquely determined, more
/// than one is a distribution over candidate geometries with fractional
/// weights.
#[derive(Debug, Clone)]
pub struct SiteEnvironment {
    pub site_index: usize,
    pub element: String,
    pub assignments: Vec<GeometryAssignment>,
}

impl SiteEnvironment {
    pub fn is_unique(&self) -> bool {
        self.assignments.len() == 1
    }
}

/// Raised when no usable neighbor shell exists for a site
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborsNotComputed;

impl fmt::Display for NeighborsNotComputed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "neighbors not computed for site")
    }
}

impl std::error::Error for NeighborsNotComputed {}

/// The capability of classifying the local geometry around atomic sites
///
/// This is the seam to the geometry analysis. A site can fail with
/// [`NeighborsNotComputed`] or produce no usable candidate geometry at all,
/// both of which callers are expected to skip over rather than treat as
/// errors.
pub trait GeometryFinder {
    /// Indices of one representative site per symmetry-distinct group
    fn distinct_sites(&self, structure: &Structure, params: &EnvironmentParams) -> Vec<usize>;

    /// Classify the coordination environment of one site
    fn analyse_site(
        &self,
        structure: &Structure,
        site_index: usize,
        params: &EnvironmentParams,
    ) -> Result<Option<SiteEnvironment>, NeighborsNotComputed>;
}

/// Produce the human-readable environment summary for a structure
///
/// One block per symmetry-distinct site. Sites without a computable neighbor
/// shell, or without any surviving candidate geometry, are silently omitted.
pub fn environment_report<G: GeometryFinder>(
    finder: &G,
    structure: &Structure,
    params: &EnvironmentParams,
) -> String {
    let mut report = String::new();
    for index in finder.distinct_sites(structure, params) {
        let environment = match finder.analyse_site(structure, index, params) {
            Ok(Some(environment)) => environment,
            Ok(None) | Err(NeighborsNotComputed) => continue,
        };
        report.push_str(&format_environment(&environment));
    }
    report
}

fn format_environment(environment: &SiteEnvironment) -> String {
    let mut block = String::new();
    let species = format!("{}1", environment.element);
    if environment.is_unique() {
        let assignment = &environment.assignments[0];
        writeln!(
            block,
            "Environment for site #{} {} ({}) : {} ({})",
            environment.site_index,
            environment.element,
            species,
            assignment.name,
            assignment.symbol
        )
        .unwrap();
    } else {
        writeln!(
            block,
            "Environments for site #{} {} ({}) : ",
            environment.site_index, environment.element, species
        )
        .unwrap();
        for assignment in &environment.assignments {
            writeln!(
                block,
                " - {} ({}): {:.2}% (csm : {:.6})",
                assignment.name,
                assignment.symbol,
                assignment.fraction * 100.,
                assignment.csm
            )
            .unwrap();
        }
    }
    block
}

/// An ideal coordination geometry and its characteristic angle multiset
struct IdealGeometry {
    name: &'static str,
    symbol: &'static str,
    angles: Vec<f64>,
}

impl IdealGeometry {
    fn new(name: &'static str, symbol: &'static str, angles: Vec<f64>) -> IdealGeometry {
        IdealGeometry {
            name,
            symbol,
            angles,
        }
    }
}

const TETRAHEDRAL_ANGLE: f64 = 109.47122063449069;
const CUBE_ANGLE: f64 = 70.52877936550931;

/// The candidate geometries for a given coordination number
fn candidate_geometries(coordination: usize) -> Vec<IdealGeometry> {
    match coordination {
        1 => vec![IdealGeometry::new("Single neighbor", "S:1", vec![])],
        2 => vec![
            IdealGeometry::new("Linear", "L:2", vec![180.]),
            IdealGeometry::new("Angular", "A:2", vec![120.]),
        ],
        3 => vec![
            IdealGeometry::new("Trigonal plane", "TL:3", vec![120., 120., 120.]),
            IdealGeometry::new(
                "Triangular non-coplanar",
                "TY:3",
                vec![TETRAHEDRAL_ANGLE; 3],
            ),
        ],
        4 => vec![
            IdealGeometry::new("Tetrahedron", "T:4", vec![TETRAHEDRAL_ANGLE; 6]),
            IdealGeometry::new("Square plane", "S:4", vec![90., 90., 90., 90., 180., 180.]),
        ],
        5 => vec![
            IdealGeometry::new(
                "Trigonal bipyramid",
                "T:5",
                vec![90., 90., 90., 90., 90., 90., 120., 120., 120., 180.],
            ),
            IdealGeometry::new(
                "Square pyramid",
                "S:5",
                vec![90., 90., 90., 90., 90., 90., 90., 90., 180., 180.],
            ),
        ],
        6 => {
            let mut angles = vec![90.; 12];
            angles.extend(vec![180.; 3]);
            vec![IdealGeometry::new("Octahedron", "O:6", angles)]
        }
        8 => {
            let mut angles = vec![CUBE_ANGLE; 12];
            angles.extend(vec![TETRAHEDRAL_ANGLE; 12]);
            angles.extend(vec![180.; 4]);
            vec![IdealGeometry::new("Cube", "C:8", angles)]
        }
        12 => {
            let mut angles = vec![60.; 24];
            angles.extend(vec![90.; 12]);
            angles.extend(vec![120.; 24]);
            angles.extend(vec![180.; 6]);
            vec![IdealGeometry::new("Cuboctahedron", "C:12", angles)]
        }
        _ => vec![],
    }
}

/// A geometry finder built on distance-weighted neighbor shells
///
/// Neighbors of a site are the periodic images within the scaled nearest
/// neighbor distance whose inverse sixth power distance weight clears the
/// angle cutoff. The coordination number selects the candidate ideal
/// geometries, which are ranked by a continuous symmetry measure over the
/// neighbor-angle multiset.
#[derive(Debug, Clone, Copy, Default)]
pub struct CutoffGeometryFinder;

impl CutoffGeometryFinder {
    /// The cartesian offsets of every neighbor of a site
    fn neighbor_vectors(
        &self,
        structure: &Structure,
        site_index: usize,
        params: &EnvironmentParams,
    ) -> Result<Vec<Vector3<f64>>, NeighborsNotComputed> {
        let site = &structure.sites[site_index];
        let mut candidates: Vec<(f64, Vector3<f64>)> = Vec::new();
        for (other_index, other) in structure.sites.iter().enumerate() {
            for i in -1..=1 {
                for j in -1..=1 {
                    for k in -1..=1 {
                        if other_index == site_index && i == 0 && j == 0 && k == 0 {
                            continue;
                        }
                        let offset = other.frac - site.frac
                            + Vector3::new(f64::from(i), f64::from(j), f64::from(k));
                        let cartesian = structure.lattice.to_cartesian(&offset);
                        let distance = cartesian.norm();
                        if distance > 1e-8 {
                            candidates.push((distance, cartesian));
                        }
                    }
                }
            }
        }

        let nearest = candidates
            .iter()
            .map(|(distance, _)| *distance)
            .fold(std::f64::INFINITY, f64::min);
        // An effectively isolated atom has no meaningful neighbor shell.
        if !nearest.is_finite() || nearest > 10. * params.distance_cutoff {
            return Err(NeighborsNotComputed);
        }

        let radius = nearest * params.distance_cutoff * params.max_dist_factor;
        let neighbors: Vec<Vector3<f64>> = candidates
            .into_iter()
            .filter(|(distance, _)| {
                *distance <= radius && (nearest / distance).powi(6) >= params.angle_cutoff
            })
            .map(|(_, cartesian)| cartesian)
            .collect();
        if neighbors.is_empty() {
            return Err(NeighborsNotComputed);
        }
        Ok(neighbors)
    }

    /// The sorted angles between every pair of neighbor vectors, in degrees
    fn neighbor_angles(vectors: &[Vector3<f64>]) -> Vec<f64> {
        let mut angles: Vec<f64> = vectors
            .iter()
            .tuple_combinations()
            .map(|(u, v)| {
                (u.dot(v) / (u.norm() * v.norm()))
                    .min(1.)
                    .max(-1.)
                    .acos()
                    .to_degrees()
            })
            .collect();
        angles.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        angles
    }

    /// Mean square deviation between observed and ideal angle multisets
    ///
    /// The measure is scaled so a five degree root mean square deviation
    /// scores 1, keeping well fitting environments comfortably under the
    /// cutoff.
    fn symmetry_measure(observed: &[f64], ideal: &[f64]) -> f64 {
        if observed.len() != ideal.len() {
            return std::f64::INFINITY;
        }
        if observed.is_empty() {
            return 0.;
        }
        let mut ideal = ideal.to_vec();
        ideal.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let sum: f64 = observed
            .iter()
            .zip(ideal.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        sum / observed.len() as f64 / 25.
    }

    /// A per-site fingerprint grouping sites related by symmetry
    fn fingerprint(
        &self,
        structure: &Structure,
        site_index: usize,
        params: &EnvironmentParams,
    ) -> (String, Vec<i64>) {
        let element = structure.sites[site_index].element.clone();
        let mut distances: Vec<i64> = match self.neighbor_vectors(structure, site_index, params) {
            Ok(vectors) => vectors
                .iter()
                .map(|v| (v.norm() * 100.).round() as i64)
                .collect(),
            Err(NeighborsNotComputed) => vec![],
        };
        distances.sort();
        (element, distances)
    }
}

impl GeometryFinder for CutoffGeometryFinder {
    fn distinct_sites(&self, structure: &Structure, params: &EnvironmentParams) -> Vec<usize> {
        let mut seen: HashSet<(String, Vec<i64>)> = HashSet::new();
        let mut representatives = Vec::new();
        for index in 0..structure.sites.len() {
            if seen.insert(self.fingerprint(structure, index, params)) {
                representatives.push(index);
            }
        }
        representatives
    }

    fn analyse_site(
        &self,
        structure: &Structure,
        site_index: usize,
        params: &EnvironmentParams,
    ) -> Result<Option<SiteEnvironment>, NeighborsNotComputed> {
        let vectors = self.neighbor_vectors(structure, site_index, params)?;
        let observed = Self::neighbor_angles(&vectors);

        let mut assignments: Vec<GeometryAssignment> = candidate_geometries(vectors.len())
            .into_iter()
            .filter_map(|geometry| {
                let csm = Self::symmetry_measure(&observed, &geometry.angles);
                if csm <= CSM_CUTOFF {
                    Some(GeometryAssignment {
                        name: geometry.name,
                        symbol: geometry.symbol,
                        fraction: 0.,
                        csm,
                    })
                } else {
                    None
                }
            })
            .collect();
        if assignments.is_empty() {
            return Ok(None);
        }

        // Weight the surviving geometries by inverse symmetry measure.
        let total: f64 = assignments.iter().map(|a| 1. / (a.csm + 0.05)).sum();
        for assignment in &mut assignments {
            assignment.fraction = 1. / (assignment.csm + 0.05) / total;
        }
        assignments.sort_by(|a, b| {
            b.fraction
                .partial_cmp(&a.fraction)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if assignments[0].fraction >= DOMINANT_FRACTION {
            assignments.truncate(1);
            assignments[0].fraction = 1.;
        }

        Ok(Some(SiteEnvironment {
            site_index,
            element: structure.sites[site_index].element.clone(),
            assignments,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::Structure;

    fn rocksalt() -> Structure {
        Structure::from_cif(
            "data_NaCl
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
",
        )
        .unwrap()
    }

    fn zincblende() -> Structure {
        Structure::from_cif(
            "data_ZnS
_cell_length_a 5.41
_cell_length_b 5.41
_cell_length_c 5.41
_cell_angle_alpha 90.0
_cell_angle_beta 90.0
_cell_angle_gamma 90.0
loop_
_atom_site_type_symbol
_atom_site_label
_atom_site_fract_x
_atom_site_fract_y
_atom_site_fract_z
Zn Zn1 0.0 0.0 0.0
Zn Zn2 0.5 0.5 0.0
Zn Zn3 0.5 0.0 0.5
Zn Zn4 0.0 0.5 0.5
S S1 0.25 0.25 0.25
S S2 0.75 0.75 0.25
S S3 0.75 0.25 0.75
S S4 0.25 0.75 0.75
",
        )
        .unwrap()
    }

    fn trigonal_bipyramid() -> Structure {
        Structure::from_cif(
            "data_PCl5
_cell_length_a 20.0
_cell_length_b 20.0
_cell_length_c 20.0
_cell_angle_alpha 90.0
_cell_angle_beta 90.0
_cell_angle_gamma 90.0
loop_
_atom_site_type_symbol
_atom_site_label
_atom_site_fract_x
_atom_site_fract_y
_atom_site_fract_z
P P1 0.5 0.5 0.5
Cl Cl1 0.5 0.5 0.6
Cl Cl2 0.5 0.5 0.4
Cl Cl3 0.6 0.5 0.5
Cl Cl4 0.45 0.586602540 0.5
Cl Cl5 0.45 0.413397460 0.5
",
        )
        .unwrap()
    }

    #[test]
    fn rocksalt_sites_are_octahedral() {
        let finder = CutoffGeometryFinder::default();
        let params = EnvironmentParams::default();
        let structure = rocksalt();

        let distinct = finder.distinct_sites(&structure, &params);
        assert_eq!(distinct.len(), 2);

        for index in distinct {
            let environment = finder
                .analyse_site(&structure, index, &params)
                .unwrap()
                .unwrap();
            assert!(environment.is_unique());
            assert_eq!(environment.assignments[0].symbol, "O:6");
            assert!(environment.assignments[0].csm < 1e-6);
        }
    }

    #[test]
    fn zincblende_is_tetrahedral() {
        let finder = CutoffGeometryFinder::default();
        let params = EnvironmentParams::default();
        let structure = zincblende();

        let environment = finder
            .analyse_site(&structure, 0, &params)
            .unwrap()
            .unwrap();
        assert!(environment.is_unique());
        assert_eq!(environment.assignments[0].symbol, "T:4");
    }

    #[test]
    fn exact_bipyramid_is_uniquely_determined() {
        let finder = CutoffGeometryFinder::default();
        let params = EnvironmentParams::default();
        let structure = trigonal_bipyramid();

        let environment = finder
            .analyse_site(&structure, 0, &params)
            .unwrap()
            .unwrap();
        assert!(environment.is_unique());
        assert_eq!(environment.assignments[0].symbol, "T:5");
    }

    #[test]
    fn isolated_atom_has_no_neighbors() {
        let finder = CutoffGeometryFinder::default();
        let params = EnvironmentParams::default();
        let structure = Structure::from_cif(
            "data_He
_cell_length_a 30.0
_cell_length_b 30.0
_cell_length_c 30.0
_cell_angle_alpha 90.0
_cell_angle_beta 90.0
_cell_angle_gamma 90.0
loop_
_atom_site_type_symbol
_atom_site_label
_atom_site_fract_x
_atom_site_fract_y
_atom_site_fract_z
He He1 0.5 0.5 0.5
",
        )
        .unwrap();

        assert_eq!(
            finder.analyse_site(&structure, 0, &params).err(),
            Some(NeighborsNotComputed)
        );
        // The failed site is omitted from the report entirely.
        assert_eq!(environment_report(&finder, &structure, &params), "");
    }

    #[test]
    fn report_lists_each_distinct_site_once() {
        let finder = CutoffGeometryFinder::default();
        let params = EnvironmentParams::default();
        let report = environment_report(&finder, &rocksalt(), &params);

        assert_eq!(report.matches("Octahedron (O:6)").count(), 2);
        assert!(report.contains("Environment for site #0 Na (Na1) : Octahedron (O:6)"));
    }

    #[test]
    fn distribution_blocks_carry_percentages() {
        let environment = SiteEnvironment {
            site_index: 3,
            element: String::from("Fe"),
            assignments: vec![
                GeometryAssignment {
                    name: "Trigonal bipyramid",
                    symbol: "T:5",
                    fraction: 0.65,
                    csm: 2.13,
                },
                GeometryAssignment {
                    name: "Square pyramid",
                    symbol: "S:5",
                    fraction: 0.35,
                    csm: 3.44,
                },
            ],
        };
        let block = format_environment(&environment);
        assert!(block.starts_with("Environments for site #3 Fe (Fe1) : "));
        assert!(block.contains(" - Trigonal bipyramid (T:5): 65.00% (csm : 2.130000)"));
        assert!(block.contains(" - Square pyramid (S:5): 35.00% (csm : 3.440000)"));
    }
}
