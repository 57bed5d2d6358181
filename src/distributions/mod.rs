//! Torch distributions in Rust.
//! Only the two distributions the action heads need are implemented, following
//! the semantics of `torch.distributions`.

use tch::{Kind, Tensor};

/// Smallest positive normal `f32`. Beta samples and arguments are kept above it.
const TINY: f64 = f32::MIN_POSITIVE as f64;
const EPS: f64 = f32::EPSILON as f64;

pub trait Distribution {
    /// Draws one sample per batch element, without gradient.
    fn sample(&self) -> Tensor;
    fn log_prob(&self, value: &Tensor) -> Tensor;
    fn entropy(&self) -> Tensor;
}

/// Categorical distribution over the last dimension of `logits`.
pub struct Categorical {
    /// Normalized logits, i.e. log probabilities.
    pub logits: Tensor,
    pub probs: Tensor,
    num_events: i64,
    batch_shape: Vec<i64>,
}

impl Categorical {
    /// Builds the distribution from unnormalized scores.
    pub fn from_logits(logits: &Tensor) -> Self {
        let mut batch_shape = logits.size();
        let num_events = batch_shape.pop().unwrap_or(0);
        let logits = logits.log_softmax(-1, Kind::Float);
        let probs = logits.exp();
        Self {
            logits,
            probs,
            num_events,
            batch_shape,
        }
    }

    pub fn num_events(&self) -> i64 {
        self.num_events
    }

    /// Like [`Distribution::log_prob`], but returns an error instead of
    /// panicking when `value` is not a valid choice index.
    pub fn f_log_prob(&self, value: &Tensor) -> Result<Tensor, tch::TchError> {
        let value = value.f_to_kind(Kind::Int64)?.f_unsqueeze(-1)?;
        self.logits.f_gather(-1, &value, false)?.f_squeeze_dim(-1)
    }
}

impl Distribution for Categorical {
    fn sample(&self) -> Tensor {
        tch::no_grad(|| {
            self.probs
                .reshape(&[-1, self.num_events])
                .multinomial(1, true)
                .reshape(self.batch_shape.as_slice())
        })
    }

    fn log_prob(&self, value: &Tensor) -> Tensor {
        let value = value.to_kind(Kind::Int64).unsqueeze(-1);
        self.logits.gather(-1, &value, false).squeeze_dim(-1)
    }

    fn entropy(&self) -> Tensor {
        -(&self.probs * &self.logits).sum_dim_intlist(Some(&[-1i64][..]), false, Kind::Float)
    }
}

/// Beta distribution with one (alpha, beta) pair per batch element.
pub struct Beta {
    pub alpha: Tensor,
    pub beta: Tensor,
}

impl Beta {
    /// Both concentrations must be strictly positive.
    pub fn new(alpha: Tensor, beta: Tensor) -> Self {
        Self { alpha, beta }
    }

    /// Reparameterized sample in (0, 1). Gradients flow back into the
    /// concentrations through the gamma draws.
    pub fn rsample(&self) -> Tensor {
        let x = self.alpha.internal_standard_gamma();
        let y = self.beta.internal_standard_gamma();
        (&x / (&x + &y)).clamp(TINY, 1.0 - EPS)
    }

    /// Log density of `value` under the distribution of row `row` only.
    pub fn log_prob_row(&self, row: i64, value: &Tensor) -> Tensor {
        Beta::new(self.alpha.get(row), self.beta.get(row)).log_prob(value)
    }

    fn log_beta_fn(&self) -> Tensor {
        self.alpha.lgamma() + self.beta.lgamma() - (&self.alpha + &self.beta).lgamma()
    }
}

impl Distribution for Beta {
    fn sample(&self) -> Tensor {
        tch::no_grad(|| self.rsample())
    }

    fn log_prob(&self, value: &Tensor) -> Tensor {
        let x = value.to_kind(Kind::Float).clamp(TINY, 1.0 - EPS);
        (&self.alpha - 1.0) * x.log() + (&self.beta - 1.0) * (1.0f64 - &x).log() - self.log_beta_fn()
    }

    fn entropy(&self) -> Tensor {
        let total = &self.alpha + &self.beta;
        self.log_beta_fn()
            - (&self.alpha - 1.0) * self.alpha.digamma()
            - (&self.beta - 1.0) * self.beta.digamma()
            + (&total - 2.0) * total.digamma()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_categorical_normalizes_logits() {
        let logits = Tensor::of_slice(&[1.0f32, 2.0, 3.0, 4.0, 0.0, 0.0]).reshape(&[2, 3]);
        let dist = Categorical::from_logits(&logits);
        let sums = dist.probs.sum_dim_intlist(Some(&[-1i64][..]), false, Kind::Float);
        assert!(close(sums.double_value(&[0]), 1.0, 1e-5));
        assert!(close(sums.double_value(&[1]), 1.0, 1e-5));
        assert_eq!(dist.num_events(), 3);
    }

    #[test]
    fn test_categorical_sample_in_range() {
        tch::manual_seed(0);
        let logits = Tensor::randn(&[64, 5], (Kind::Float, Device::Cpu));
        let sample = Categorical::from_logits(&logits).sample();
        assert_eq!(sample.size(), vec![64]);
        assert!(sample.min().int64_value(&[]) >= 0);
        assert!(sample.max().int64_value(&[]) < 5);
    }

    #[test]
    fn test_categorical_log_prob() {
        let logits = Tensor::of_slice(&[0.0f32, 0.0, 0.0, 0.0]).reshape(&[1, 4]);
        let dist = Categorical::from_logits(&logits);
        let lp = dist.log_prob(&Tensor::of_slice(&[2i64]));
        assert!(close(lp.double_value(&[0]), (0.25f64).ln(), 1e-5));
        let checked = dist.f_log_prob(&Tensor::of_slice(&[2i64])).unwrap();
        assert!(close(checked.double_value(&[0]), (0.25f64).ln(), 1e-5));
        assert!(dist.f_log_prob(&Tensor::of_slice(&[4i64])).is_err());
    }

    #[test]
    fn test_categorical_entropy() {
        let uniform = Tensor::zeros(&[1, 4], (Kind::Float, Device::Cpu));
        let entropy = Categorical::from_logits(&uniform).entropy();
        assert!(close(entropy.double_value(&[0]), (4.0f64).ln(), 1e-5));

        let peaked = Tensor::of_slice(&[50.0f32, 0.0, 0.0]).reshape(&[1, 3]);
        let entropy = Categorical::from_logits(&peaked).entropy();
        assert!(entropy.double_value(&[0]) >= 0.0);
        assert!(entropy.double_value(&[0]) < 1e-3);
    }

    #[test]
    fn test_beta_uniform() {
        let ones = Tensor::ones(&[2], (Kind::Float, Device::Cpu));
        let dist = Beta::new(ones.copy(), ones);
        let lp = dist.log_prob(&Tensor::of_slice(&[0.3f32, 0.8]));
        assert!(close(lp.double_value(&[0]), 0.0, 1e-5));
        assert!(close(lp.double_value(&[1]), 0.0, 1e-5));
        assert!(close(dist.entropy().double_value(&[0]), 0.0, 1e-5));
    }

    #[test]
    fn test_beta_2_2() {
        let twos = Tensor::of_slice(&[2.0f32]);
        let dist = Beta::new(twos.copy(), twos);
        let lp = dist.log_prob(&Tensor::of_slice(&[0.5f32]));
        assert!(close(lp.double_value(&[0]), (1.5f64).ln(), 1e-4));
        assert!(close(dist.entropy().double_value(&[0]), -0.125_13, 1e-3));
    }

    #[test]
    fn test_beta_log_prob_row() {
        let dist = Beta::new(
            Tensor::of_slice(&[1.0f32, 2.0]),
            Tensor::of_slice(&[1.0f32, 2.0]),
        );
        let row = dist.log_prob_row(1, &Tensor::of_slice(&[0.5f32]).squeeze());
        assert!(close(row.double_value(&[]), (1.5f64).ln(), 1e-4));
    }

    #[test]
    fn test_beta_boundaries_finite() {
        let dist = Beta::new(
            Tensor::of_slice(&[1.0f32, 3.0]),
            Tensor::of_slice(&[2.0f32, 1.0]),
        );
        let lp = dist.log_prob(&Tensor::of_slice(&[0.0f32, 1.0]));
        assert!(lp.double_value(&[0]).is_finite());
        assert!(lp.double_value(&[1]).is_finite());
    }

    #[test]
    fn test_beta_rsample() {
        tch::manual_seed(7);
        let alpha = Tensor::of_slice(&[2.0f32, 0.5, 5.0]).set_requires_grad(true);
        let beta = Tensor::of_slice(&[3.0f32, 0.5, 1.0]);
        let dist = Beta::new(alpha, beta);
        let x = dist.rsample();
        assert!(x.requires_grad());
        assert!(x.min().double_value(&[]) > 0.0);
        assert!(x.max().double_value(&[]) < 1.0);
        assert!(!dist.sample().requires_grad());
    }
}
