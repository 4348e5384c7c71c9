//! A small adaptive importance sampling demo: deterministic mixture weights for a
//! 2D Gaussian restricted to a box, with a Student's t proposal refit after every round.
//!
//! Run with `RUST_LOG=debug` to see the per-round log output.

use indicatif::{ProgressBar, ProgressStyle};
use mini_pmc::distributions::{Gaussian, Mixture, StudentT};
use mini_pmc::importance_sampling::DeterministicIS;
use mini_pmc::indicator::{Hyperrectangle, Restricted};
use mini_pmc::stats;
use ndarray::{arr1, arr2};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    const ROUNDS: usize = 6;
    const ROUND_SIZE: usize = 5_000;
    const DOF: f64 = 5.0;
    const SEED: u64 = 42;

    env_logger::init();

    let gaussian = Gaussian::new(arr1(&[1.0, -2.0]), arr2(&[[2.0, 0.9], [0.9, 1.0]]))?;
    let support = Hyperrectangle::new(arr1(&[-10.0, -10.0]), arr1(&[10.0, 10.0]))?;
    let target = Restricted::new(gaussian, support);

    // two wide components on either side of the target
    let initial = Mixture::new(
        vec![
            StudentT::new(arr1(&[-3.0, 3.0]), arr2(&[[9.0, 0.0], [0.0, 9.0]]), DOF)?,
            StudentT::new(arr1(&[3.0, -3.0]), arr2(&[[9.0, 0.0], [0.0, 9.0]]), DOF)?,
        ],
        vec![0.5, 0.5],
    )?;

    let mut sampler = DeterministicIS::new(target, initial)
        .with_prealloc(ROUNDS * ROUND_SIZE)
        .set_seed(SEED);

    let pb = ProgressBar::new((ROUNDS * ROUND_SIZE) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );

    for round in 0..ROUNDS {
        pb.set_message(format!("round {round}"));
        let origin = sampler.run_with_trace(ROUND_SIZE)?;
        pb.inc(ROUND_SIZE as u64);

        let n_components = sampler.proposal.components().len();
        let counts: Vec<usize> = (0..n_components)
            .map(|k| origin.iter().filter(|&&c| c == k).count())
            .collect();

        let samples = sampler.history.all();
        let mean = stats::mean(samples)?;
        let cov = stats::covariance(samples)?;
        pb.println(format!(
            "round {round}: samples per component {counts:?}, ess {:.3}, perplexity {:.3}",
            stats::effective_sample_size(samples)?,
            stats::perplexity(samples)?,
        ));

        // refit: a single t component matching the current weighted moments
        sampler.proposal = Mixture::new(vec![StudentT::new(mean, cov, DOF)?], vec![1.0])?;
    }
    pb.finish_with_message("Done!");

    let samples = sampler.history.all();
    println!("Generated {} weighted samples", samples.nrows());
    println!("Mean: {}", stats::mean(samples)?);
    println!("Covariance:\n{}", stats::covariance(samples)?);

    #[cfg(feature = "csv")]
    {
        mini_pmc::io::csv::save_csv(&sampler.history, "weighted_samples.csv")?;
        println!("Saved weighted samples to weighted_samples.csv");
    }

    Ok(())
}

#[test]
fn test_main() {
    main().expect("Expected main to not return an error.");
}
