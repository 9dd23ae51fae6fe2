//! Run one forward pass through a freshly initialized model
//!
//! This example demonstrates:
//! - Building a model from a named preset or a JSON config file
//! - Running an inference forward and a training-mode forward
//! - Checking the no-look-ahead property on real logits
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --example forward_pass -- --preset small --batch 4
//! RUST_LOG=coregpt=debug cargo run --example forward_pass -- --config model.json
//! ```

use std::time::Instant;

use clap::Parser;
use coregpt::{Config, Mode, GPT};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "forward_pass",
    about = "Initialize a GPT model and time a forward pass"
)]
struct Args {
    /// Named preset: tiny, small or gpt2-small
    #[arg(long, default_value = "tiny")]
    preset: String,

    /// JSON config file; overrides --preset
    #[arg(long)]
    config: Option<String>,

    /// Vocabulary size used with --preset
    #[arg(long, default_value = "512")]
    vocab: usize,

    /// Seed for both weight init and token sampling
    #[arg(long, default_value = "1337")]
    seed: u64,

    /// Sequences per batch
    #[arg(long, default_value = "2")]
    batch: usize,

    /// Tokens per sequence (defaults to the block size)
    #[arg(long)]
    seq_len: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => match args.preset.as_str() {
            "tiny" => Config::tiny(args.vocab),
            "small" => Config::small(args.vocab),
            "gpt2-small" => Config::gpt2_small(args.vocab),
            other => return Err(format!("unknown preset '{other}'").into()),
        },
    };

    println!("\n{}", "=".repeat(70));
    println!("  GPT Forward Pass");
    println!("{}", "=".repeat(70));
    println!("{}", config.to_json()?);

    let start = Instant::now();
    let model = GPT::with_seed(&config, args.seed)?;
    println!(
        "\nBuilt model: {} parameters in {:.2?}",
        model.num_parameters(),
        start.elapsed()
    );

    let seq_len = args.seq_len.unwrap_or(config.block_size);
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let tokens: Vec<Vec<usize>> = (0..args.batch)
        .map(|_| {
            (0..seq_len)
                .map(|_| rng.random_range(0..config.vocab_size))
                .collect()
        })
        .collect();

    let start = Instant::now();
    let logits = model.forward(&tokens, Mode::Inference)?;
    println!(
        "Inference forward: shape {:?} in {:.2?}",
        logits.shape,
        start.elapsed()
    );

    let start = Instant::now();
    let train_logits = model.forward(&tokens, Mode::Train(&mut rng))?;
    println!(
        "Training forward:  shape {:?} in {:.2?}",
        train_logits.shape,
        start.elapsed()
    );

    // Changing the last token must leave every earlier position untouched
    if seq_len > 1 {
        let mut altered = tokens.clone();
        if let Some(last) = altered[0].last_mut() {
            *last = (*last + 1) % config.vocab_size;
        }
        let altered_logits = model.forward(&altered, Mode::Inference)?;
        let prefix = (seq_len - 1) * config.vocab_size;
        let unchanged = logits.data[..prefix] == altered_logits.data[..prefix];
        println!("Prefix logits unchanged after editing last token: {unchanged}");
    }

    Ok(())
}
