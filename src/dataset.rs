//
// dataset.rs
// Copyright (C) 2019 Malcolm Ramsay <malramsay64@gmail.com>
// Distributed under terms of the MIT license.
//

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Error};
use log::debug;

/// The file name suffix identifying the canonical structure file of a formula
const CANONICAL_SUFFIX: &str = "pymatgen.cif";

/// The provenance label marking a formula as part of the training data
const TRAINING_LABEL: &str = "training set";

/// The reference dataset the generated structures are evaluated against
///
/// The challenge set maps each formula to the text of its ground-truth
/// structure, along with the provenance of each formula, whether it was seen
/// in the training data of the generative model. Both are loaded once from
/// the packaged archive and are read-only afterwards.
///
#[derive(Debug, Clone)]
pub struct ChallengeSet {
    structures: BTreeMap<String, String>,
    training: HashSet<String>,
}

impl ChallengeSet {
    /// Load the challenge set from a zip archive
    ///
    /// The archive holds a `metadata.csv` with one `(formula, source_label)`
    /// row per formula, and the ground-truth structures at paths of the shape
    /// `<root>/<formula>/<name>` where the name carries the canonical suffix.
    /// Entries of any other shape are skipped. A second canonical structure
    /// for the same formula is an error, the archive gives no ordering
    /// guarantee which would make an overwrite well defined.
    ///
    pub fn from_archive(path: &Path) -> Result<ChallengeSet, Error> {
        let file = File::open(path)
            .with_context(|| format!("unable to open challenge set archive {:?}", path))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("unable to read challenge set archive {:?}", path))?;

        let mut structures: BTreeMap<String, String> = BTreeMap::new();
        let mut training: HashSet<String> = HashSet::new();

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let name = entry.name().to_string();
            let components: Vec<&str> = name.split('/').collect();

            if components.last() == Some(&"metadata.csv") {
                let mut content = String::new();
                entry.read_to_string(&mut content)?;
                for formula in training_formulas(&content)? {
                    training.insert(formula);
                }
                continue;
            }

            // Ground truth structures sit at <root>/<formula>/<name>, anything
            // else in the archive is of no interest here.
            if components.len() < 3 || components.last().map_or(true, |c| c.is_empty()) {
                continue;
            }
            let formula = components[1];
            let file_name = components[2];
            if !file_name.ends_with(CANONICAL_SUFFIX) {
                continue;
            }

            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            if structures.insert(formula.to_string(), content).is_some() {
                bail!(
                    "duplicate canonical structure for formula {} in {:?}",
                    formula,
                    path
                );
            }
        }

        debug!(
            "loaded {} ground truth structures, {} formulas seen in training",
            structures.len(),
            training.len()
        );
        Ok(ChallengeSet {
            structures,
            training,
        })
    }

    /// Iterate over the formulas in sorted order
    pub fn formulas(&self) -> impl Iterator<Item = &str> {
        self.structures.keys().map(String::as_str)
    }

    /// The text of the ground-truth structure for a formula
    pub fn structure(&self, formula: &str) -> Option<&str> {
        self.structures.get(formula).map(String::as_str)
    }

    pub fn seen_in_training(&self, formula: &str) -> bool {
        self.training.contains(formula)
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }
}

/// The formulas labelled as part of the training set in the metadata table
fn training_formulas(content: &str) -> Result<Vec<String>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(content.as_bytes());
    let mut formulas = Vec::new();
    for record in reader.records() {
        let record = record.context("malformed row in challenge set metadata")?;
        let formula = record.get(0).unwrap_or("").trim();
        let source = record.get(1).unwrap_or("").trim();
        if source == TRAINING_LABEL {
            formulas.push(formula.to_string());
        }
    }
    Ok(formulas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_archive(entries: &[(&str, &str)]) -> Result<tempfile::NamedTempFile, Error> {
        let file = tempfile::NamedTempFile::new()?;
        let mut writer = zip::ZipWriter::new(file.reopen()?);
        for (name, content) in entries {
            writer.start_file(*name, zip::write::FileOptions::default())?;
            writer.write_all(content.as_bytes())?;
        }
        writer.finish()?;
        Ok(file)
    }

    const METADATA: &str = "formula,source\nNaCl,training set\nCsCl,holdout\n";

    #[test]
    fn load_structures_and_provenance() -> Result<(), Error> {
        let archive = write_archive(&[
            ("challenge/metadata.csv", METADATA),
            ("challenge/NaCl/NaCl.pymatgen.cif", "structure text NaCl"),
            ("challenge/CsCl/CsCl.pymatgen.cif", "structure text CsCl"),
            ("challenge/CsCl/CsCl.notes.txt", "ignored"),
            ("challenge/stray.cif", "ignored, too few path segments"),
        ])?;
        let challenge = ChallengeSet::from_archive(archive.path())?;

        assert_eq!(challenge.len(), 2);
        assert_eq!(
            challenge.formulas().collect::<Vec<_>>(),
            vec!["CsCl", "NaCl"]
        );
        assert_eq!(challenge.structure("NaCl"), Some("structure text NaCl"));
        assert!(challenge.seen_in_training("NaCl"));
        assert!(!challenge.seen_in_training("CsCl"));
        Ok(())
    }

    #[test]
    fn duplicate_canonical_structure_is_error() -> Result<(), Error> {
        let archive = write_archive(&[
            ("challenge/metadata.csv", METADATA),
            ("challenge/NaCl/NaCl.pymatgen.cif", "first"),
            ("challenge/NaCl/other.pymatgen.cif", "second"),
        ])?;
        assert!(ChallengeSet::from_archive(archive.path()).is_err());
        Ok(())
    }

    #[test]
    fn missing_archive_is_error() {
        let missing = Path::new("/nonexistent/challenge.zip");
        assert!(ChallengeSet::from_archive(missing).is_err());
    }
}
