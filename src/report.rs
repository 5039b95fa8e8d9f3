//
// report.rs
// Copyright (C) 2019 Malcolm Ramsay <malramsay64@gmail.com>
// Distributed under terms of the MIT license.
//

use std::fs;
use std::ops;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::{debug, info, warn};

use crate::chemenv::{environment_report, EnvironmentParams, GeometryFinder};
use crate::dataset::ChallengeSet;
use crate::energy::EnergyTable;
use crate::matcher::{MatchEvaluator, MatchOutcome, StructureMatcher};
use crate::runs::read_run;
use crate::structure::Structure;

/// The two generation runs evaluated for every formula
///
/// The runs are produced independently, one with the model conditioned on
/// the true space group and one without, and their statistics are kept
/// strictly apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Variant {
    NoSpaceGroup,
    WithSpaceGroup,
}

impl Variant {
    /// Both variants in their fixed evaluation order
    pub const ALL: [Variant; 2] = [Variant::NoSpaceGroup, Variant::WithSpaceGroup];

    /// The root directory of this variant's generation run
    pub fn run_dir(self, model_dir: &Path, model: &str) -> PathBuf {
        match self {
            Variant::NoSpaceGroup => model_dir.join(format!("{}_challenge", model)),
            Variant::WithSpaceGroup => model_dir.join(format!("{}_challenge_sg", model)),
        }
    }

    pub fn includes_space_group(self) -> &'static str {
        match self {
            Variant::NoSpaceGroup => "no",
            Variant::WithSpaceGroup => "yes",
        }
    }

    /// The file stem for the best candidate written to the output tree
    pub fn file_stem(self) -> &'static str {
        match self {
            Variant::NoSpaceGroup => "best_gen_no_spacegroup",
            Variant::WithSpaceGroup => "best_gen_with_spacegroup",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Variant::NoSpaceGroup => 0,
            Variant::WithSpaceGroup => 1,
        }
    }
}

/// Counts of the four aggregate metrics for one run variant
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VariantTally {
    pub generated: usize,
    pub valid_on_first: usize,
    pub matched: usize,
    pub matched_unseen: usize,
}

impl ops::AddAssign for VariantTally {
    fn add_assign(&mut self, other: VariantTally) {
        self.generated += other.generated;
        self.valid_on_first += other.valid_on_first;
        self.matched += other.matched;
        self.matched_unseen += other.matched_unseen;
    }
}

/// Everything known about one formula under one run variant
#[derive(Debug, Clone)]
pub struct FormulaOutcome {
    pub formula: String,
    pub seen: bool,
    pub reference_energy: f64,
    pub variant: Variant,
    pub validity_rate: f64,
    pub mean_energy: f64,
    pub min_energy: f64,
    pub valid_on_first: bool,
    pub matched: MatchOutcome,
}

impl FormulaOutcome {
    /// The contribution of this outcome to the aggregate counts
    ///
    /// Aggregation is a fold over these values, the counters themselves are
    /// never shared mutable state.
    pub fn tally(&self) -> VariantTally {
        let matched = self.matched.is_match();
        VariantTally {
            generated: (self.validity_rate > 0.) as usize,
            valid_on_first: self.valid_on_first as usize,
            matched: matched as usize,
            matched_unseen: (matched && !self.seen) as usize,
        }
    }

    /// One row of the consolidated results table
    fn csv_row(&self) -> Vec<String> {
        vec![
            self.formula.clone(),
            yes_no(self.seen).to_string(),
            format!("{:.5}", self.reference_energy),
            self.variant.includes_space_group().to_string(),
            format!("{:.5}", self.mean_energy),
            format!("{:.5}", self.min_energy),
            format!("{:.2}", self.validity_rate),
            yes_no(self.valid_on_first).to_string(),
            yes_no(self.matched.is_match()).to_string(),
        ]
    }

    /// One row of the fixed-width console table
    fn console_row(&self) -> String {
        let label = match self.variant {
            Variant::NoSpaceGroup => {
                let seen_marker = if self.seen { "* " } else { "" };
                format!("{:<20}", format!("{}{}", seen_marker, self.formula))
            }
            Variant::WithSpaceGroup => format!("Ref. E: {:10.5}  ", self.reference_energy),
        };
        let space_group = match self.variant {
            Variant::NoSpaceGroup => "      no      ",
            Variant::WithSpaceGroup => "      yes     ",
        };
        format!(
            "{}|{}| {:8.5} | {:8.5} | {:7.2} | {:<15} | {:<13} |",
            label,
            space_group,
            self.mean_energy,
            self.min_energy,
            self.validity_rate,
            yes_no(self.valid_on_first),
            yes_no(self.matched.is_match()),
        )
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// The header of the consolidated results table
const RESULTS_HEADER: [&str; 9] = [
    "formula",
    "seen_in_training",
    "true_E",
    "includes_space_group",
    "mean_E",
    "min_E",
    "pct_valid",
    "valid_on_first",
    "matches_true",
];

const CONSOLE_HEADER: &str = "Composition         | space group? |  mean E  |  best E  \
                              | % valid | valid on first? | matches true? |";
const CONSOLE_SEPARATOR: &str = "--------------------|--------------|----------|----------\
                                 |---------|-----------------|---------------|";

/// The aggregate result of a full challenge evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChallengeSummary {
    pub total: usize,
    pub tallies: [VariantTally; 2],
}

/// The configuration of a challenge evaluation
#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    pub challenge_set: PathBuf,
    pub energies: PathBuf,
    pub model: String,
    pub model_dir: PathBuf,
    pub out_dir: PathBuf,
    pub env_params: EnvironmentParams,
}

/// Evaluate the generation runs of a model against the challenge set
///
/// Formulas are processed one at a time in sorted order, each contributing
/// a directory of structures and environment reports, two rows of console
/// output, and two rows of the consolidated results table. Output is staged
/// in a scratch directory and swapped into place only once the whole run has
/// succeeded, so an aborted run never leaves a partial tree at the published
/// path.
pub fn run_challenge<M, G>(
    config: &ChallengeConfig,
    matcher: M,
    finder: &G,
) -> Result<ChallengeSummary, Error>
where
    M: StructureMatcher,
    G: GeometryFinder,
{
    let challenge = ChallengeSet::from_archive(&config.challenge_set)?;
    let energies = EnergyTable::from_csv(&config.energies)?;
    let evaluator = MatchEvaluator::new(matcher);

    let staging = staging_dir(&config.out_dir);
    if staging.exists() {
        debug!("removing stale staging directory {:?}", staging);
        fs::remove_dir_all(&staging)
            .with_context(|| format!("unable to clear staging directory {:?}", staging))?;
    }
    fs::create_dir_all(&staging)
        .with_context(|| format!("unable to create staging directory {:?}", staging))?;

    println!("{}", CONSOLE_HEADER);
    println!("{}", CONSOLE_SEPARATOR);

    let mut outcomes: Vec<FormulaOutcome> = Vec::new();
    for formula in challenge.formulas() {
        let true_cif = match challenge.structure(formula) {
            Some(text) => text,
            None => continue,
        };
        let formula_dir = staging.join(formula);
        fs::create_dir_all(&formula_dir)
            .with_context(|| format!("unable to create output directory {:?}", formula_dir))?;

        write_structure_and_report(&formula_dir, "true", true_cif, finder, &config.env_params)?;

        let seen = challenge.seen_in_training(formula);
        let reference_energy = energies.lookup(formula);

        for &variant in Variant::ALL.iter() {
            let run_dir = variant.run_dir(&config.model_dir, &config.model);
            let record = read_run(&run_dir, formula);
            let matched = evaluator.evaluate(true_cif, record.best_candidate.as_deref());

            if let Some(candidate) = &record.best_candidate {
                write_structure_and_report(
                    &formula_dir,
                    variant.file_stem(),
                    candidate,
                    finder,
                    &config.env_params,
                )?;
            }

            let outcome = FormulaOutcome {
                formula: formula.to_string(),
                seen,
                reference_energy,
                variant,
                validity_rate: record.validity_rate,
                mean_energy: record.mean_energy,
                min_energy: record.min_energy,
                valid_on_first: record.valid_on_first,
                matched,
            };
            println!("{}", outcome.console_row());
            outcomes.push(outcome);
        }
        println!("{}", CONSOLE_SEPARATOR);
    }
    println!("* seen in training");

    write_results_table(&staging.join("results.csv"), &outcomes)?;

    let mut tallies = [VariantTally::default(); 2];
    for outcome in &outcomes {
        tallies[outcome.variant.index()] += outcome.tally();
    }
    let summary = ChallengeSummary {
        total: challenge.len(),
        tallies,
    };
    print_summary(&summary);

    publish(&staging, &config.out_dir)?;
    info!("challenge results written to {:?}", config.out_dir);
    Ok(summary)
}

/// Write a structure and its environment report next to each other
///
/// A structure text which cannot be parsed still gets written out verbatim,
/// the environment report is simply left empty, one malformed candidate is
/// not allowed to abort the batch.
fn write_structure_and_report<G: GeometryFinder>(
    dir: &Path,
    stem: &str,
    cif: &str,
    finder: &G,
    params: &EnvironmentParams,
) -> Result<(), Error> {
    let cif_path = dir.join(format!("{}.cif", stem));
    fs::write(&cif_path, cif).with_context(|| format!("unable to write {:?}", cif_path))?;

    let report = match Structure::from_cif(cif) {
        Ok(structure) => environment_report(finder, &structure, params),
        Err(err) => {
            warn!("skipping environment analysis for {:?}: {}", cif_path, err);
            String::new()
        }
    };
    let report_path = dir.join(format!("{}_envs.txt", stem));
    fs::write(&report_path, report).with_context(|| format!("unable to write {:?}", report_path))
}

fn write_results_table(path: &Path, outcomes: &[FormulaOutcome]) -> Result<(), Error> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("unable to create results table {:?}", path))?;
    writer.write_record(&RESULTS_HEADER)?;
    for outcome in outcomes {
        writer.write_record(outcome.csv_row())?;
    }
    writer.flush()?;
    Ok(())
}

fn print_summary(summary: &ChallengeSummary) {
    let total = summary.total;
    let [first, second] = summary.tallies;
    println!("                      | no sg | w/ sg |");
    println!("----------------------|-------|-------|");
    println!(
        "Can generate          | {}/{} | {}/{} |",
        first.generated, total, second.generated, total
    );
    println!(
        "Valid on first        | {}/{} | {}/{} |",
        first.valid_on_first, total, second.valid_on_first, total
    );
    println!(
        "Matches true (all)    | {}/{} | {}/{} |",
        first.matched, total, second.matched, total
    );
    println!(
        "Matches true (unseen) | {}/{} | {}/{} |",
        first.matched_unseen, total, second.matched_unseen, total
    );
}

fn staging_dir(out_dir: &Path) -> PathBuf {
    let mut name = out_dir.file_name().unwrap_or_default().to_os_string();
    name.push(".staging");
    out_dir.with_file_name(name)
}

/// Swap the staged output into place
fn publish(staging: &Path, out_dir: &Path) -> Result<(), Error> {
    if out_dir.exists() {
        info!("replacing existing output directory {:?}", out_dir);
        fs::remove_dir_all(out_dir)
            .with_context(|| format!("unable to remove previous output {:?}", out_dir))?;
    }
    fs::rename(staging, out_dir)
        .with_context(|| format!("unable to publish output to {:?}", out_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(variant: Variant) -> FormulaOutcome {
        FormulaOutcome {
            formula: String::from("NaCl"),
            seen: false,
            reference_energy: -3.25,
            variant,
            validity_rate: 0.9,
            mean_energy: -1.5,
            min_energy: -2.,
            valid_on_first: true,
            matched: MatchOutcome::Matched,
        }
    }

    #[test]
    fn tally_counts_unseen_matches() {
        let tally = outcome(Variant::NoSpaceGroup).tally();
        assert_eq!(tally.generated, 1);
        assert_eq!(tally.valid_on_first, 1);
        assert_eq!(tally.matched, 1);
        assert_eq!(tally.matched_unseen, 1);
    }

    #[test]
    fn tally_excludes_seen_formulas_from_unseen() {
        let mut seen = outcome(Variant::NoSpaceGroup);
        seen.seen = true;
        let tally = seen.tally();
        assert_eq!(tally.matched, 1);
        assert_eq!(tally.matched_unseen, 0);
    }

    #[test]
    fn failed_comparison_is_not_a_match() {
        let mut failed = outcome(Variant::NoSpaceGroup);
        failed.matched = MatchOutcome::ComparisonFailed(String::from("parse error"));
        let tally = failed.tally();
        assert_eq!(tally.matched, 0);
        assert_eq!(tally.matched_unseen, 0);
    }

    #[test]
    fn tallies_fold_by_addition() {
        let mut total = VariantTally::default();
        total += outcome(Variant::NoSpaceGroup).tally();
        total += outcome(Variant::NoSpaceGroup).tally();
        assert_eq!(total.generated, 2);
        assert_eq!(total.matched, 2);
    }

    #[test]
    fn csv_row_encodes_missing_energies_as_nan() {
        let mut missing = outcome(Variant::WithSpaceGroup);
        missing.validity_rate = 0.;
        missing.mean_energy = std::f64::NAN;
        missing.min_energy = std::f64::NAN;
        missing.matched = MatchOutcome::NotMatched;
        missing.valid_on_first = false;
        let row = missing.csv_row();
        assert_eq!(row[3], "yes");
        assert_eq!(row[4], "NaN");
        assert_eq!(row[5], "NaN");
        assert_eq!(row[6], "0.00");
        assert_eq!(row[8], "no");
    }

    #[test]
    fn variant_run_directories() {
        let model_dir = Path::new("/runs");
        assert_eq!(
            Variant::NoSpaceGroup.run_dir(model_dir, "cif_model_35"),
            Path::new("/runs/cif_model_35_challenge")
        );
        assert_eq!(
            Variant::WithSpaceGroup.run_dir(model_dir, "cif_model_35"),
            Path::new("/runs/cif_model_35_challenge_sg")
        );
    }

    #[test]
    fn staging_path_sits_next_to_output() {
        assert_eq!(
            staging_dir(Path::new("/out/analysis")),
            Path::new("/out/analysis.staging")
        );
    }
}
