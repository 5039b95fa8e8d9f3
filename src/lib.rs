//
// lib.rs
// Copyright (C) 2019 Malcolm Ramsay <malramsay64@gmail.com>
// Distributed under terms of the MIT license.
//

//! Evaluate a generative model's crystal structures against a challenge set.
//!
//! For each formula in a held-out challenge set this crate locates the
//! ground-truth structure, loads the model's generated candidates for two
//! independent runs (with and without space-group conditioning), decides
//! whether the best scoring candidate is the same crystal as the ground
//! truth, and reports per-formula and aggregate statistics along with a
//! coordination-environment summary of every structure written out.

pub mod chemenv;
pub mod dataset;
pub mod energy;
pub mod matcher;
pub mod report;
pub mod runs;
pub mod structure;

pub use crate::chemenv::{
    environment_report, CutoffGeometryFinder, EnvironmentParams, GeometryFinder, SiteEnvironment,
};
pub use crate::dataset::ChallengeSet;
pub use crate::energy::EnergyTable;
pub use crate::matcher::{
    LatticeMatcher, MatchEvaluator, MatchOutcome, MatcherTolerances, StructureMatcher,
};
pub use crate::report::{
    run_challenge, ChallengeConfig, ChallengeSummary, FormulaOutcome, Variant, VariantTally,
};
pub use crate::runs::{read_run, RunRecord};
pub use crate::structure::{Lattice, Site, Structure};
