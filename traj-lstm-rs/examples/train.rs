//! Trajectory LSTM training example on synthetic walks.
//!
//! This example demonstrates:
//! - Training on noisy straight-line trajectories
//! - Per-epoch learning-rate decay
//! - Saving weights and configuration
//! - Reloading in inference mode and sampling a continuation
//!
//! Usage:
//!   cargo run --example train --release [epochs] [output_dir]
//!
//! Verbose step logging:
//!   RUST_LOG=traj_lstm_rs=debug cargo run --example train --release

use std::path::PathBuf;
use std::time::Instant;

use candle_core::Device;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

use traj_lstm_rs::{Point, Sampler, TrajBatch, TrajConfig, TrajModel, TrajTrainer, Trajectory};

/// Straight walk from a random start with a random velocity and jitter.
fn synthetic_walk(rng: &mut ChaCha8Rng, len: usize) -> Trajectory {
    let start = (rng.gen_range(-2.0f32..2.0), rng.gen_range(-2.0f32..2.0));
    let velocity = (rng.gen_range(-0.5f32..0.5), rng.gen_range(-0.5f32..0.5));
    (0..len)
        .map(|t| {
            let t = t as f32;
            Point::new(
                start.0 + velocity.0 * t + rng.gen_range(-0.02f32..0.02),
                start.1 + velocity.1 * t + rng.gen_range(-0.02f32..0.02),
            )
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Trajectory LSTM Training ===\n");

    #[cfg(feature = "cuda")]
    let device = Device::new_cuda(0)?;
    #[cfg(not(feature = "cuda"))]
    let device = Device::Cpu;

    let mut args = std::env::args().skip(1);
    let epochs: usize = args.next().map(|s| s.parse()).transpose()?.unwrap_or(20);
    let output_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("traj-lstm-run"));
    std::fs::create_dir_all(&output_dir)?;

    let config = TrajConfig::default().with_hidden_size(64).with_batch(16, 8);
    println!("Device: {:?}", device);
    println!("Parameters: {}", config.parameter_count());
    println!("Hidden size: {}", config.hidden_size);
    println!("Batch: {} x {} steps", config.batch_size, config.seq_length);
    println!();

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let walks: Vec<Trajectory> = (0..config.batch_size * 8)
        .map(|_| synthetic_walk(&mut rng, config.seq_length + 1))
        .collect();
    let batches = walks
        .chunks(config.batch_size)
        .map(|chunk| TrajBatch::next_step(chunk, config.seq_length, &device))
        .collect::<Result<Vec<_>, _>>()?;

    let mut trainer = TrajTrainer::from_config(&config, &device)?;

    println!("{:-<48}", "");
    println!("{:>6} | {:>10} | {:>10} | {:>10}", "Epoch", "LR", "Cost", "ms/epoch");
    println!("{:-<48}", "");

    for epoch in 0..epochs {
        let started = Instant::now();
        let lr = config.learning_rate_for_epoch(epoch);
        trainer.set_learning_rate(lr);

        let mut total = 0.0f32;
        for batch in &batches {
            total += trainer.train_step(batch)?.cost;
        }
        let mean = total / batches.len() as f32;
        println!(
            "{:>6} | {:>10.6} | {:>10.4} | {:>10}",
            epoch,
            lr,
            mean,
            started.elapsed().as_millis()
        );
    }
    println!("{:-<48}", "");

    let weights_path = output_dir.join("model.safetensors");
    let config_path = output_dir.join("config.json");
    let model = trainer.into_model();
    model.save(&weights_path)?;
    config.save_json(&config_path)?;
    println!("\nSaved to {}", output_dir.display());

    let restored = TrajModel::load(
        &TrajConfig::load_json(&config_path)?.inference(),
        &weights_path,
        &device,
    )?;
    let observed = synthetic_walk(&mut rng, 4);
    let predicted = Sampler::new(&restored, 0).sample(&observed, 6)?;

    println!("\n=== Sampled Continuation ===");
    for (i, p) in predicted.iter().enumerate() {
        let tag = if i < observed.len() { "observed" } else { "sampled" };
        println!("{:>3} {:>9} ({:>7.3}, {:>7.3})", i, tag, p.x, p.y);
    }

    Ok(())
}
