//
// energy.rs
// Copyright (C) 2019 Malcolm Ramsay <malramsay64@gmail.com>
// Distributed under terms of the MIT license.
//

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Error};
use log::warn;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct EnergyRow {
    formula: String,
    energy: f64,
}

/// Independently computed reference energies, one per formula
///
/// These are used for reporting only, they play no part in deciding whether
/// a generated structure matches the ground truth.
#[derive(Debug, Clone)]
pub struct EnergyTable {
    energies: HashMap<String, f64>,
}

impl EnergyTable {
    /// Load the reference energies from a flat table of (formula, energy)
    pub fn from_csv(path: &Path) -> Result<EnergyTable, Error> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("unable to open energy reference table {:?}", path))?;
        let mut energies = HashMap::new();
        for row in reader.deserialize() {
            let row: EnergyRow =
                row.with_context(|| format!("malformed row in energy table {:?}", path))?;
            energies.insert(row.formula, row.energy);
        }
        Ok(EnergyTable { energies })
    }

    /// The reference energy of a formula
    ///
    /// A formula without a reference energy yields NaN rather than aborting
    /// the batch, the value is report-only so a missing row degrades the one
    /// output row it appears in.
    pub fn lookup(&self, formula: &str) -> f64 {
        match self.energies.get(formula) {
            Some(&energy) => energy,
            None => {
                warn!("no reference energy for formula {}", formula);
                std::f64::NAN
            }
        }
    }

    pub fn len(&self) -> usize {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }
}
