//! Stochastic action head over a ragged set of actors.
//!
//! Every environment in a batch contributes zero or more actors. The head
//! gathers the embeddings of the actors that act this step, projects them to
//! logits and either samples a new action per actor or re-scores a recorded
//! one.

use tch::{nn, Device, Kind, Tensor};

use crate::action_mask::{VecActionMask, VecCategoricalActionMask};
use crate::distributions::{Beta, Categorical, Distribution};
use crate::error::HeadError;
use crate::model_utils::{layer_init, Placement};
use crate::ragged::{RaggedBuffer, RaggedTensor};

/// Added to the logits of illegal choices before the distribution is built.
pub const ILLEGAL_LOGIT_BIAS: f64 = -1e9;

/// Largest `f64` strictly below 2^63, the ceiling for rescaled continuous actions.
const MAX_ENCODABLE: f64 = 9_223_372_036_854_774_784.0;

/// Parameterization of the per-actor choice distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadKind {
    /// Categorical over `n_choice` logits.
    #[default]
    Discrete,
    /// Beta over [0, 1], rescaled to the non-negative `i64` range.
    ContinuousRescaled,
}

impl HeadKind {
    fn output_width(self, n_choice: i64) -> i64 {
        match self {
            HeadKind::Discrete => n_choice,
            HeadKind::ContinuousRescaled => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActionHeadConfig {
    pub kind: HeadKind,
    /// Device the continuous distribution is evaluated on.
    pub placement: Placement,
}

impl ActionHeadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: HeadKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }
}

/// Everything one call to [`ActionHead::forward`] produces.
/// All tensors have one row per flattened actor.
#[derive(Debug)]
pub struct ActionHeadOutput {
    pub action: Tensor,
    /// Number of actors in each environment.
    pub lengths: Vec<i64>,
    pub logprob: Tensor,
    pub entropy: Tensor,
    /// Normalized logits (discrete) or the (alpha, beta) pair (continuous).
    pub logits: Tensor,
}

/// Intermediate result of one distribution branch.
struct Evaluated {
    action: Tensor,
    logprob: Tensor,
    entropy: Tensor,
    logits: Tensor,
}

/// Projects actor embeddings to a single discrete or rescaled continuous choice.
#[derive(Debug)]
pub struct ActionHead {
    proj: nn::Linear,
    d_model: i64,
    n_choice: i64,
    width: i64,
    config: ActionHeadConfig,
}

impl ActionHead {
    /// Creates a head whose projection is registered under `path / "proj"`.
    pub fn new(
        path: &nn::Path,
        d_model: i64,
        n_choice: i64,
        config: ActionHeadConfig,
    ) -> Result<Self, HeadError> {
        if d_model <= 0 || n_choice <= 0 {
            return Err(HeadError::InvalidConfig(format!(
                "d_model ({d_model}) and n_choice ({n_choice}) must be positive"
            )));
        }
        let width = config.kind.output_width(n_choice);
        let mut proj = nn::linear(path / "proj", d_model, width, Default::default());
        layer_init(&mut proj, 0.01, 0.0);
        Ok(Self {
            proj,
            d_model,
            n_choice,
            width,
            config,
        })
    }

    pub fn n_choice(&self) -> i64 {
        self.n_choice
    }

    /// Width of the logits returned per actor.
    pub fn width(&self) -> i64 {
        self.width
    }

    pub fn kind(&self) -> HeadKind {
        self.config.kind
    }

    /// Samples (or, with `prev_actions`, re-scores) one action per acting actor.
    ///
    /// `index_offsets` holds one item per environment: the row of `x.data`
    /// where that environment's actors start.
    pub fn forward(
        &self,
        x: &RaggedTensor,
        index_offsets: &RaggedBuffer<i64>,
        mask: &VecActionMask,
        prev_actions: Option<&RaggedBuffer<i64>>,
    ) -> Result<ActionHeadOutput, HeadError> {
        let mask = match mask {
            VecActionMask::Categorical(mask) => mask,
            other => {
                return Err(HeadError::UnexpectedMask {
                    expected: "categorical",
                    got: other.kind_name(),
                })
            }
        };

        let device = x.device();
        let lengths = mask.actors.size1();
        if x.lengths.len() != lengths.len() {
            return Err(HeadError::RaggedShape(format!(
                "embeddings cover {} environments, mask covers {}",
                x.lengths.len(),
                lengths.len()
            )));
        }
        if mask.actors.is_empty() {
            tracing::trace!(envs = lengths.len(), "no acting actors");
            return Ok(self.empty_output(lengths, device));
        }

        let num_actors = mask.actors.items();
        tracing::debug!(
            actors = num_actors,
            envs = lengths.len(),
            kind = ?self.config.kind,
            replay = prev_actions.is_some(),
            "action head forward"
        );

        let actors = self.global_actor_indices(mask, index_offsets)?.to_device(device);
        let actor_embeds = x.data.f_index_select(0, &actors)?;
        let embed_width = actor_embeds.size().last().copied().unwrap_or(0);
        if embed_width != self.d_model {
            return Err(HeadError::RaggedShape(format!(
                "embedding width {embed_width} does not match d_model {}",
                self.d_model
            )));
        }
        let logits = actor_embeds.apply(&self.proj);

        let prior = match prev_actions {
            Some(prev) => {
                if prev.features() != 1 {
                    return Err(HeadError::RaggedShape(format!(
                        "prior actions must have width 1, got {}",
                        prev.features()
                    )));
                }
                if prev.as_slice().len() != num_actors {
                    return Err(HeadError::PriorActionCount {
                        expected: num_actors,
                        got: prev.as_slice().len(),
                    });
                }
                Some(Tensor::of_slice(prev.as_slice()))
            }
            None => None,
        };

        let evaluated = match self.config.kind {
            HeadKind::Discrete => self.discrete(logits, mask, prior, device)?,
            HeadKind::ContinuousRescaled => {
                if mask.mask.is_some() {
                    tracing::trace!("legality mask has no choice axis in continuous mode");
                }
                self.continuous(logits, prior, device)
            }
        };

        Ok(ActionHeadOutput {
            action: evaluated.action,
            lengths,
            logprob: evaluated.logprob,
            entropy: evaluated.entropy,
            logits: evaluated.logits,
        })
    }

    fn empty_output(&self, lengths: Vec<i64>, device: Device) -> ActionHeadOutput {
        ActionHeadOutput {
            action: Tensor::zeros(&[0], (Kind::Int64, device)),
            lengths,
            logprob: Tensor::zeros(&[0], (Kind::Float, device)),
            entropy: Tensor::zeros(&[0], (Kind::Float, device)),
            logits: Tensor::zeros(&[0, self.width], (Kind::Float, device)),
        }
    }

    /// Translates every environment's local actor indices into rows of the
    /// flattened embedding tensor.
    fn global_actor_indices(
        &self,
        mask: &VecCategoricalActionMask,
        index_offsets: &RaggedBuffer<i64>,
    ) -> Result<Tensor, HeadError> {
        if mask.actors.features() != 1 {
            return Err(HeadError::RaggedShape(format!(
                "actor indices must have width 1, got {}",
                mask.actors.features()
            )));
        }
        let actors = (&mask.actors + index_offsets)?;
        Ok(Tensor::of_slice(actors.as_slice()))
    }

    fn discrete(
        &self,
        mut logits: Tensor,
        mask: &VecCategoricalActionMask,
        prior: Option<Tensor>,
        device: Device,
    ) -> Result<Evaluated, HeadError> {
        if let Some(legal) = mask.mask.as_ref().filter(|m| m.items() > 0) {
            if legal.features() as i64 != self.n_choice {
                return Err(HeadError::RaggedShape(format!(
                    "legality mask has width {}, expected {} choices",
                    legal.features(),
                    self.n_choice
                )));
            }
            let legal = Tensor::of_slice(legal.as_slice())
                .f_reshape(logits.size().as_slice())?
                .to_device(device);
            let illegal = legal.logical_not().to_kind(Kind::Float);
            logits = logits + illegal * ILLEGAL_LOGIT_BIAS;
        }

        let dist = Categorical::from_logits(&logits);
        let action = match prior {
            Some(prior) => {
                let (min, max) = (prior.min().int64_value(&[]), prior.max().int64_value(&[]));
                if min < 0 || max >= dist.num_events() {
                    return Err(HeadError::PriorActionRange {
                        min,
                        max,
                        n_choice: dist.num_events(),
                    });
                }
                prior.to_device(device)
            }
            None => dist.sample(),
        };
        let logprob = dist.f_log_prob(&action)?;
        let entropy = dist.entropy();
        Ok(Evaluated {
            action,
            logprob,
            entropy,
            logits: dist.logits,
        })
    }

    fn continuous(&self, logits: Tensor, prior: Option<Tensor>, device: Device) -> Evaluated {
        let compute = self.config.placement.resolve(device);
        // x^2 + 1 keeps both concentrations strictly positive
        let params = (&logits * &logits + 1.0).to_device(compute);
        let dist = Beta::new(params.select(1, 0), params.select(1, 1));

        let value = match prior {
            Some(prior) => (prior.to_kind(Kind::Double) / i64::MAX as f64)
                .clamp(0.0, 1.0)
                .to_device(compute),
            None => dist.rsample(),
        };

        let num_actors = value.size()[0];
        let logprob: Vec<Tensor> = (0..num_actors)
            .map(|i| dist.log_prob_row(i, &value.get(i)))
            .collect();
        let logprob = Tensor::stack(&logprob, 0).to_device(device);
        let entropy = dist.entropy().to_device(device);

        let action = (value.to_kind(Kind::Double) * i64::MAX as f64)
            .clamp(0.0, MAX_ENCODABLE)
            .to_kind(Kind::Int64)
            .to_device(device);

        Evaluated {
            action,
            logprob,
            entropy,
            logits: params.to_device(device),
        }
    }
}
