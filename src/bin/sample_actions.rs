//! Drives an action head with synthetic ragged batches.
//! Every step samples actions, replays them, and checks both passes agree.
use clap::Parser;
use indicatif::ProgressIterator;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use entity_policy::{
    ActionHead, ActionHeadConfig, HeadKind, Placement, RaggedBuffer, RaggedTensor,
    VecActionMask, VecCategoricalActionMask,
};

#[derive(Parser, Debug)]
struct Args {
    /// Number of environments in each batch.
    #[arg(long, default_value_t = 16)]
    env_count: usize,
    /// Maximum number of entities per environment. Each entity acts with probability `act_prob`.
    #[arg(long, default_value_t = 8)]
    max_actors: i64,
    /// Probability that an entity acts on a given step.
    #[arg(long, default_value_t = 0.5, value_parser = parse_probability)]
    act_prob: f64,
    /// Embedding width.
    #[arg(long, default_value_t = 32)]
    d_model: i64,
    /// Number of discrete choices per actor.
    #[arg(long, default_value_t = 6)]
    n_choice: i64,
    /// Number of batches to run through.
    #[arg(long, default_value_t = 200)]
    steps: u32,
    /// Use the rescaled Beta head instead of the categorical one.
    #[arg(long, default_value_t = false)]
    continuous: bool,
    /// Evaluate the distribution on the CPU regardless of the embedding device.
    #[arg(long, default_value_t = false)]
    cpu_placement: bool,
    /// Mark a random subset of choices illegal.
    #[arg(long, default_value_t = false)]
    masked: bool,
    /// Seed for both batch generation and sampling.
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Whether CUDA should be used. If false, everything runs on the CPU.
    #[arg(long, default_value_t = false)]
    cuda: bool,
}

/// Parses a probability, rejecting anything outside [0, 1].
fn parse_probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("`{s}` is not a number: {e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{p} is not a probability in [0, 1]"))
    }
}

struct Batch {
    x: RaggedTensor,
    offsets: RaggedBuffer<i64>,
    mask: VecActionMask,
}

/// Generates embeddings and a categorical mask for one step.
fn random_batch(args: &Args, rng: &mut StdRng, device: tch::Device) -> anyhow::Result<Batch> {
    let mut entity_lengths = Vec::with_capacity(args.env_count);
    let mut offsets = Vec::with_capacity(args.env_count);
    let mut actors = Vec::with_capacity(args.env_count);
    let mut legal = Vec::with_capacity(args.env_count);
    let mut next_row = 0;
    for _ in 0..args.env_count {
        let entities = rng.gen_range(0..=args.max_actors);
        let env_actors: Vec<i64> = (0..entities)
            .filter(|_| rng.gen_bool(args.act_prob))
            .collect();
        let mut env_legal = Vec::with_capacity(env_actors.len() * args.n_choice as usize);
        for _ in &env_actors {
            // At least one legal choice per actor
            let always = rng.gen_range(0..args.n_choice);
            env_legal.extend((0..args.n_choice).map(|c| c == always || rng.gen_bool(0.5)));
        }
        offsets.push(vec![next_row]);
        actors.push(env_actors);
        legal.push(env_legal);
        entity_lengths.push(entities);
        next_row += entities;
    }

    let data = tch::Tensor::randn(&[next_row, args.d_model], (tch::Kind::Float, device));
    let legal = if args.masked {
        Some(RaggedBuffer::from_sequences(args.n_choice as usize, &legal)?)
    } else {
        None
    };
    Ok(Batch {
        x: RaggedTensor::new(data, entity_lengths),
        offsets: RaggedBuffer::from_sequences(1, &offsets)?,
        mask: VecCategoricalActionMask::new(RaggedBuffer::from_sequences(1, &actors)?, legal)
            .into(),
    })
}

/// Splits a flat action tensor back into per-environment sequences.
fn tensor_to_ragged(action: &tch::Tensor, lengths: &[i64]) -> anyhow::Result<RaggedBuffer<i64>> {
    let flat: Vec<i64> = (0..action.size()[0])
        .map(|i| action.int64_value(&[i]))
        .collect();
    let lengths = lengths.iter().map(|&l| l as usize).collect();
    Ok(RaggedBuffer::from_flattened(1, flat, lengths)?)
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = Args::parse();
    tracing::info!(?args, "starting");

    let device = if args.cuda {
        tch::Device::Cuda(0)
    } else {
        tch::Device::Cpu
    };
    tch::manual_seed(args.seed as i64);
    let mut rng = StdRng::seed_from_u64(args.seed);

    let kind = if args.continuous {
        HeadKind::ContinuousRescaled
    } else {
        HeadKind::Discrete
    };
    let placement = if args.cpu_placement {
        Placement::Cpu
    } else {
        Placement::Inherit
    };
    let vs = tch::nn::VarStore::new(device);
    let head = ActionHead::new(
        &vs.root(),
        args.d_model,
        args.n_choice,
        ActionHeadConfig::new()
            .with_kind(kind)
            .with_placement(placement),
    )?;

    let mut total_actors = 0;
    let mut entropy_sum = 0.0;
    let mut max_replay_gap = 0.0_f64;
    for step in (0..args.steps).progress() {
        let batch = random_batch(&args, &mut rng, device)?;
        let (sampled, replayed) = tch::no_grad(|| -> anyhow::Result<_> {
            let sampled = head.forward(&batch.x, &batch.offsets, &batch.mask, None)?;
            let prev = tensor_to_ragged(&sampled.action, &sampled.lengths)?;
            let replayed = head.forward(&batch.x, &batch.offsets, &batch.mask, Some(&prev))?;
            Ok((sampled, replayed))
        })?;

        let actors = sampled.action.size()[0];
        if actors == 0 {
            tracing::debug!(step, "no acting actors");
            continue;
        }
        total_actors += actors;
        entropy_sum += sampled.entropy.sum(tch::Kind::Double).double_value(&[]);
        let gap = (&sampled.logprob - &replayed.logprob)
            .abs()
            .max()
            .double_value(&[]);
        max_replay_gap = max_replay_gap.max(gap);
        tracing::debug!(step, actors, gap, "step");
    }

    let mean_entropy = if total_actors > 0 {
        entropy_sum / total_actors as f64
    } else {
        0.0
    };
    tracing::info!(
        total_actors,
        mean_entropy,
        max_replay_gap,
        "finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probability() {
        assert_eq!(parse_probability("0.25"), Ok(0.25));
        assert_eq!(parse_probability("1"), Ok(1.0));
        assert!(parse_probability("1.5").is_err());
        assert!(parse_probability("-0.1").is_err());
        assert!(parse_probability("NaN").is_err());
        assert!(parse_probability("often").is_err());
    }

    #[test]
    fn test_act_prob_rejected_by_cli() {
        assert!(Args::try_parse_from(["sample_actions", "--act-prob", "2.0"]).is_err());
        let args = Args::try_parse_from(["sample_actions", "--act-prob", "0.9"]).unwrap();
        assert_eq!(args.act_prob, 0.9);
    }
}
