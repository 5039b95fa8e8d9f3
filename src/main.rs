//
// main.rs
// Copyright (C) 2019 Malcolm Ramsay <malramsay64@gmail.com>
// Distributed under terms of the MIT license.
//

use std::path::PathBuf;

use anyhow::Error;
use log::{debug, LevelFilter};
use structopt::StructOpt;

use crystal_challenge::{
    run_challenge, ChallengeConfig, CutoffGeometryFinder, EnvironmentParams, LatticeMatcher,
    MatcherTolerances,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "challenge")]
struct Args {
    /// Pass many times for more log output
    ///
    /// By default info messages and above are reported. Passing `-v` one time
    /// enables debug logging, `-vv` and beyond trace.
    #[structopt(long, short, parse(from_occurrences))]
    verbosity: u8,

    /// The name of the generative model being evaluated
    #[structopt(long, default_value = "cif_model_35")]
    model: String,

    /// The directory holding the generation runs of the model
    #[structopt(long, parse(from_os_str), default_value = "../out")]
    model_dir: PathBuf,

    /// The packaged challenge set archive with the ground truth structures
    #[structopt(long, parse(from_os_str), default_value = "../out/ChallengeSet-v1.zip")]
    challenge_set: PathBuf,

    /// The table of reference energies, one per formula
    #[structopt(
        long,
        parse(from_os_str),
        default_value = "../out/ChallengeSet-v1.alignn_energies.csv"
    )]
    energies: PathBuf,

    /// Where to write the per-formula analysis and the consolidated table
    #[structopt(long, parse(from_os_str))]
    out_dir: PathBuf,

    /// The fractional tolerance on cell lengths when matching structures
    #[structopt(long, default_value = "0.2")]
    length_tol: f64,

    /// The cartesian tolerance on site positions when matching structures
    #[structopt(long, default_value = "0.3")]
    site_tol: f64,

    /// The tolerance on cell angles in degrees when matching structures
    #[structopt(long, default_value = "5")]
    angle_tol: f64,

    /// Multiplier on the nearest neighbour distance for the environment search
    #[structopt(long, default_value = "1.0")]
    distance_cutoff: f64,

    /// Minimum distance weight for a neighbour to count towards an environment
    #[structopt(long, default_value = "0.3")]
    angle_cutoff: f64,

    /// Scaling of the maximum distance when collecting candidate neighbours
    #[structopt(long, default_value = "1.5")]
    max_dist_factor: f64,
}

#[paw::main]
fn main(args: Args) -> Result<(), Error> {
    let log_level = match args.verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        2 => LevelFilter::Trace,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(log_level).init();

    debug!("Logging Level: {}", log_level);

    let tolerances = MatcherTolerances {
        length_tol: args.length_tol,
        site_tol: args.site_tol,
        angle_tol: args.angle_tol,
    };
    let matcher = LatticeMatcher::new(tolerances, true, true);
    let finder = CutoffGeometryFinder::default();

    let config = ChallengeConfig {
        challenge_set: args.challenge_set,
        energies: args.energies,
        model: args.model,
        model_dir: args.model_dir,
        out_dir: args.out_dir,
        env_params: EnvironmentParams {
            distance_cutoff: args.distance_cutoff,
            angle_cutoff: args.angle_cutoff,
            max_dist_factor: args.max_dist_factor,
        },
    };

    run_challenge(&config, matcher, &finder)?;
    Ok(())
}
