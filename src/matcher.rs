//
// matcher.rs
// Copyright (C) 2019 Malcolm Ramsay <malramsay64@gmail.com>
// Distributed under terms of the MIT license.
//

use anyhow::Error;
use log::{debug, warn};

use crate::structure::{Lattice, Structure};

/// The geometric tolerances for deciding two structures are the same crystal
///
/// The length tolerance is fractional, the site tolerance is a cartesian
/// distance in the volume-normalised cell, and the angle tolerance is in
/// degrees.
#[derive(Debug, Clone, Copy)]
pub struct MatcherTolerances {
    pub length_tol: f64,
    pub site_tol: f64,
    pub angle_tol: f64,
}

impl Default for MatcherTolerances {
    fn default() -> MatcherTolerances {
        MatcherTolerances {
            length_tol: 0.2,
            site_tol: 0.3,
            angle_tol: 5.,
        }
    }
}

/// The capability of testing two structures for crystallographic equivalence
///
/// This is the seam to the geometric matching algorithm. Implementations
/// decide equivalence up to their own configured tolerances; an `Err` means
/// the comparison itself could not be carried out, not that the structures
/// differ.
pub trait StructureMatcher {
    fn fit(&self, reference: &Structure, candidate: &Structure) -> Result<bool, Error>;
}

/// The result of evaluating a candidate against the ground truth
///
/// A failed comparison is kept distinct from a confirmed non-match so that
/// callers can tell "these structures differ" apart from "the comparison
/// never ran".
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched,
    NotMatched,
    ComparisonFailed(String),
}

impl MatchOutcome {
    /// Whether the candidate is confirmed equivalent to the ground truth
    pub fn is_match(&self) -> bool {
        *self == MatchOutcome::Matched
    }
}

/// Decides whether a generated candidate matches the ground-truth structure
///
/// The evaluator owns the failure containment around the matcher: a missing
/// candidate is not a match and never reaches the matcher, and a structure
/// text that fails to parse, or an internal matcher error, is reported as a
/// failed comparison rather than propagated.
#[derive(Debug, Clone)]
pub struct MatchEvaluator<M> {
    matcher: M,
}

impl<M: StructureMatcher> MatchEvaluator<M> {
    pub fn new(matcher: M) -> MatchEvaluator<M> {
        MatchEvaluator { matcher }
    }

    pub fn evaluate(&self, reference_cif: &str, candidate_cif: Option<&str>) -> MatchOutcome {
        let candidate_cif = match candidate_cif {
            Some(text) => text,
            None => return MatchOutcome::NotMatched,
        };
        let reference = match Structure::from_cif(reference_cif) {
            Ok(structure) => structure,
            Err(err) => {
                warn!("unable to parse ground truth structure: {}", err);
                return MatchOutcome::ComparisonFailed(format!("ground truth: {}", err));
            }
        };
        let candidate = match Structure::from_cif(candidate_cif) {
            Ok(structure) => structure,
            Err(err) => {
                warn!("unable to parse candidate structure: {}", err);
                return MatchOutcome::ComparisonFailed(format!("candidate: {}", err));
            }
        };
        match self.matcher.fit(&reference, &candidate) {
            Ok(true) => MatchOutcome::Matched,
            Ok(false) => MatchOutcome::NotMatched,
            Err(err) => {
                warn!("structure comparison failed: {}", err);
                MatchOutcome::ComparisonFailed(err.to_string())
            }
        }
    }
}

/// A structure matcher comparing lattices and site mappings under tolerance
///
/// Comparison is element-only, oxidation and magnetic state never enter the
/// picture. With `scale` set, both structures are first normalised to a unit
/// volume per site so the comparison is independent of an overall scale
/// factor. Structures with differing site counts are not reduced to a
/// primitive setting and report no match.
#[derive(Debug, Clone)]
pub struct LatticeMatcher {
    tolerances: MatcherTolerances,
    primitive_cell: bool,
    scale: bool,
}

impl Default for LatticeMatcher {
    fn default() -> LatticeMatcher {
        LatticeMatcher {
            tolerances: MatcherTolerances::default(),
            primitive_cell: true,
            scale: true,
        }
    }
}

impl LatticeMatcher {
    pub fn new(tolerances: MatcherTolerances, primitive_cell: bool, scale: bool) -> LatticeMatcher {
        LatticeMatcher {
            tolerances,
            primitive_cell,
            scale,
        }
    }

    /// Compare the sorted cell lengths and angles of the two lattices
    fn lattices_agree(&self, reference: &Lattice, candidate: &Lattice) -> bool {
        let sorted = |mut values: [f64; 3]| {
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values
        };
        let ref_lengths = sorted(reference.lengths());
        let cand_lengths = sorted(candidate.lengths());
        for (a, b) in ref_lengths.iter().zip(cand_lengths.iter()) {
            if (a - b).abs() > self.tolerances.length_tol * b {
                return false;
            }
        }
        let ref_angles = sorted(reference.angles());
        let cand_angles = sorted(candidate.angles());
        ref_angles
            .iter()
            .zip(cand_angles.iter())
            .all(|(a, b)| (a - b).abs() <= self.tolerances.angle_tol)
    }

    /// Try to map every reference site onto a distinct candidate site
    ///
    /// Every candidate site sharing an element with the first reference site
    /// is tried as the anchor of a rigid translation between the two site
    /// sets; a mapping under one of those translations is enough.
    fn sites_agree(&self, reference: &Structure, candidate: &Structure) -> bool {
        let anchor = match reference.sites.first() {
            Some(site) => site,
            None => return false,
        };
        candidate
            .sites
            .iter()
            .filter(|site| site.element == anchor.element)
            .any(|site| self.mapped_under_shift(reference, candidate, &(site.frac - anchor.frac)))
    }

    fn mapped_under_shift(
        &self,
        reference: &Structure,
        candidate: &Structure,
        shift: &nalgebra::Vector3<f64>,
    ) -> bool {
        let mut used = vec![false; candidate.sites.len()];
        for site in &reference.sites {
            let target = site.frac + shift;
            let found = candidate.sites.iter().enumerate().position(|(index, other)| {
                !used[index]
                    && other.element == site.element
                    && candidate.lattice.min_image_distance(&target, &other.frac)
                        <= self.tolerances.site_tol
            });
            match found {
                Some(index) => used[index] = true,
                None => return false,
            }
        }
        true
    }
}

impl StructureMatcher for LatticeMatcher {
    fn fit(&self, reference: &Structure, candidate: &Structure) -> Result<bool, Error> {
        // With primitive cell reduction the comparison works on the reduced
        // composition, otherwise the full cell contents have to agree.
        let compositions_agree = if self.primitive_cell {
            reference.reduced_composition() == candidate.reduced_composition()
        } else {
            reference.composition() == candidate.composition()
        };
        if !compositions_agree {
            return Ok(false);
        }
        if reference.sites.len() != candidate.sites.len() {
            debug!(
                "site counts differ ({} vs {}), supercell settings are not reduced",
                reference.sites.len(),
                candidate.sites.len()
            );
            return Ok(false);
        }
        let (reference, candidate) = if self.scale {
            (reference.normalised_volume(), candidate.normalised_volume())
        } else {
            (reference.clone(), candidate.clone())
        };
        if !self.lattices_agree(&reference.lattice, &candidate.lattice) {
            return Ok(false);
        }
        Ok(self.sites_agree(&reference, &candidate))
    }
}
