//
// runs.rs
// Copyright (C) 2019 Malcolm Ramsay <malramsay64@gmail.com>
// Distributed under terms of the MIT license.
//

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Error};
use log::{debug, warn};
use serde::Deserialize;

/// One row of the run-level summary table, one per formula
#[derive(Debug, Deserialize)]
struct SummaryRow {
    formula: String,
    validity_rate: f64,
    mean_e: f64,
    min_e: f64,
}

/// The outcome of one generation run for a single formula
///
/// A formula missing from the run, in part or entirely, is not an error, it
/// degrades to a record with no valid candidates. The energies are NaN in
/// that case, mirroring the run summaries written upstream.
///
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub validity_rate: f64,
    pub mean_energy: f64,
    pub min_energy: f64,
    pub best_candidate: Option<String>,
    pub valid_on_first: bool,
}

impl RunRecord {
    fn empty() -> RunRecord {
        RunRecord {
            validity_rate: 0.,
            mean_energy: std::f64::NAN,
            min_energy: std::f64::NAN,
            best_candidate: None,
            valid_on_first: false,
        }
    }
}

/// Read the outcome of a generation run for one formula
///
/// The summary fields come from the `results.csv` at the run root. The best
/// candidate is resolved separately from the per-formula candidate table,
/// and only when the run produced any valid candidate at all. The
/// first-attempt check reads the candidate table directly, it does not
/// depend on a summary row being present.
///
pub fn read_run(run_root: &Path, formula: &str) -> RunRecord {
    let mut record = read_summary(run_root, formula).unwrap_or_else(RunRecord::empty);
    if record.validity_rate > 0. {
        record.best_candidate = match best_candidate(run_root, formula) {
            Ok(content) => Some(content),
            Err(err) => {
                warn!("unable to resolve best candidate for {}: {}", formula, err);
                None
            }
        };
    }
    record.valid_on_first = valid_on_first(&run_root.join(formula));
    record
}

/// The summary row for one formula from the run root table
fn read_summary(run_root: &Path, formula: &str) -> Option<RunRecord> {
    let path = run_root.join("results.csv");
    let mut reader = match csv::Reader::from_path(&path) {
        Ok(reader) => reader,
        Err(err) => {
            debug!("no run summary at {:?}: {}", path, err);
            return None;
        }
    };
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                debug!("skipping malformed summary row in {:?}: {}", path, err);
                continue;
            }
        };
        // Only the first four columns are part of the contract, anything
        // after them is ignored.
        let leading = csv::StringRecord::from(row.iter().take(4).collect::<Vec<&str>>());
        let parsed: Result<SummaryRow, _> = leading.deserialize(None);
        match parsed {
            Ok(summary) if summary.formula == formula => {
                return Some(RunRecord {
                    validity_rate: summary.validity_rate,
                    mean_energy: summary.mean_e,
                    min_energy: summary.min_e,
                    best_candidate: None,
                    valid_on_first: false,
                });
            }
            Ok(_) => continue,
            Err(err) => {
                debug!("skipping malformed summary row in {:?}: {}", path, err);
                continue;
            }
        }
    }
    None
}

/// Load the text of the lowest scoring candidate structure for a formula
///
/// The candidate table holds `(candidate_filename, iteration_index, score)`
/// rows. The strictly smallest score wins, which resolves tied scores to the
/// first row encountered.
///
fn best_candidate(run_root: &Path, formula: &str) -> Result<String, Error> {
    let table = run_root.join(formula).join("results.csv");
    let mut reader = csv::Reader::from_path(&table)
        .map_err(|err| anyhow!("no candidate table at {:?}: {}", table, err))?;

    let mut best_score = std::f64::INFINITY;
    let mut best_name: Option<String> = None;
    for row in reader.records() {
        let row = row?;
        let name = row
            .get(0)
            .ok_or_else(|| anyhow!("candidate row without a filename in {:?}", table))?;
        let score: f64 = row
            .get(2)
            .ok_or_else(|| anyhow!("candidate row without a score in {:?}", table))?
            .trim()
            .parse()?;
        if score < best_score {
            best_score = score;
            best_name = Some(name.to_string());
        }
    }

    let best_name =
        best_name.ok_or_else(|| anyhow!("candidate table {:?} holds no rows", table))?;
    let path = run_root.join(formula).join(&best_name);
    Ok(fs::read_to_string(&path)
        .map_err(|err| anyhow!("unable to read candidate {:?}: {}", path, err))?)
}

/// Whether the first generated candidate for a formula was valid
///
/// This checks the iteration index of the first data row against the literal
/// value 1, the first row being present is not enough on its own.
fn valid_on_first(formula_dir: &Path) -> bool {
    let path = formula_dir.join("results.csv");
    let mut reader = match csv::Reader::from_path(&path) {
        Ok(reader) => reader,
        Err(_) => return false,
    };
    match reader.records().next() {
        Some(Ok(row)) => row
            .get(1)
            .and_then(|field| field.trim().parse::<i64>().ok())
            .map_or(false, |iteration| iteration == 1),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_run(
        dir: &Path,
        summary: &str,
        formula: &str,
        candidates: &[(&str, u64, f64, &str)],
    ) -> Result<(), Error> {
        fs::create_dir_all(dir.join(formula))?;
        fs::write(dir.join("results.csv"), summary)?;
        let mut table = fs::File::create(dir.join(formula).join("results.csv"))?;
        writeln!(table, "cif_fname,iteration,score")?;
        for (name, iteration, score, content) in candidates {
            writeln!(table, "{},{},{}", name, iteration, score)?;
            fs::write(dir.join(formula).join(name), content)?;
        }
        Ok(())
    }

    #[test]
    fn best_candidate_has_minimum_score() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        write_run(
            dir.path(),
            "formula,validity_rate,mean_E,min_E\nNaCl,0.9,-1.5,-2.0\n",
            "NaCl",
            &[
                ("c1.cif", 2, 5.0, "candidate one"),
                ("c2.cif", 1, 3.0, "candidate two"),
            ],
        )?;
        let record = read_run(dir.path(), "NaCl");
        assert_eq!(record.validity_rate, 0.9);
        assert_eq!(record.best_candidate.as_deref(), Some("candidate two"));
        // The second row carries iteration 1 but the check looks only at the
        // first row of the table.
        assert!(!record.valid_on_first);
        Ok(())
    }

    #[test]
    fn tied_scores_resolve_to_first_row() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        write_run(
            dir.path(),
            "formula,validity_rate,mean_E,min_E\nNaCl,1.0,-1.5,-2.0\n",
            "NaCl",
            &[
                ("c1.cif", 1, 3.0, "candidate one"),
                ("c2.cif", 2, 3.0, "candidate two"),
            ],
        )?;
        let record = read_run(dir.path(), "NaCl");
        assert_eq!(record.best_candidate.as_deref(), Some("candidate one"));
        assert!(record.valid_on_first);
        Ok(())
    }

    #[test]
    fn zero_validity_skips_candidate_lookup() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        // No candidate table exists, the lookup must not be attempted.
        fs::write(
            dir.path().join("results.csv"),
            "formula,validity_rate,mean_E,min_E\nNaCl,0.0,nan,nan\n",
        )?;
        let record = read_run(dir.path(), "NaCl");
        assert_eq!(record.validity_rate, 0.);
        assert!(record.mean_energy.is_nan());
        assert!(record.min_energy.is_nan());
        assert!(record.best_candidate.is_none());
        assert!(!record.valid_on_first);
        Ok(())
    }

    #[test]
    fn missing_run_degrades_to_empty_record() {
        let record = read_run(Path::new("/nonexistent/run"), "Li2O");
        assert_eq!(record.validity_rate, 0.);
        assert!(record.mean_energy.is_nan());
        assert!(record.min_energy.is_nan());
        assert!(record.best_candidate.is_none());
        assert!(!record.valid_on_first);
    }

    #[test]
    fn formula_absent_from_summary_degrades() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join("results.csv"),
            "formula,validity_rate,mean_E,min_E\nNaCl,1.0,-1.5,-2.0\n",
        )?;
        let record = read_run(dir.path(), "Li2O");
        assert_eq!(record.validity_rate, 0.);
        assert!(record.best_candidate.is_none());
        Ok(())
    }

    #[test]
    fn first_attempt_check_works_without_summary_row() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        // The candidate table exists but the run-root summary knows nothing
        // about the formula.
        fs::write(
            dir.path().join("results.csv"),
            "formula,validity_rate,mean_E,min_E\nNaCl,1.0,-1.5,-2.0\n",
        )?;
        fs::create_dir_all(dir.path().join("Li2O"))?;
        fs::write(
            dir.path().join("Li2O").join("results.csv"),
            "cif_fname,iteration,score\nc1.cif,1,3.0\n",
        )?;
        let record = read_run(dir.path(), "Li2O");
        assert_eq!(record.validity_rate, 0.);
        assert!(record.best_candidate.is_none());
        assert!(record.valid_on_first);
        Ok(())
    }

    #[test]
    fn extra_columns_are_tolerated() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("NaCl"))?;
        fs::write(
            dir.path().join("results.csv"),
            "formula,validity_rate,mean_E,min_E,notes\nNaCl,1.0,-1.5,-2.0,fine\n",
        )?;
        fs::write(
            dir.path().join("NaCl").join("results.csv"),
            "cif_fname,iteration,score,notes\nc1.cif,1,3.0,fine\n",
        )?;
        fs::write(dir.path().join("NaCl").join("c1.cif"), "candidate one")?;
        let record = read_run(dir.path(), "NaCl");
        assert_eq!(record.best_candidate.as_deref(), Some("candidate one"));
        assert!(record.valid_on_first);
        Ok(())
    }
}
