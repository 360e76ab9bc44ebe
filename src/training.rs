use std::str::FromStr;
use std::time::Instant;

use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{Optimizer, VarMap, SGD};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Adagrad
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ParamsAdagrad {
    pub lr: f64,
    pub eps: f64,
    pub initial_accumulator_value: f64,
}

impl Default for ParamsAdagrad {
    fn default() -> Self {
        Self {
            lr: 0.01,
            eps: 1e-10,
            initial_accumulator_value: 0.0,
        }
    }
}

struct VarAdagrad {
    var: Var,
    sum: Var,
}

/// Adagrad: `sum += g^2; theta -= lr * g / (sqrt(sum) + eps)`.
pub struct Adagrad {
    vars: Vec<VarAdagrad>,
    params: ParamsAdagrad,
}

impl Optimizer for Adagrad {
    type Config = ParamsAdagrad;

    fn new(vars: Vec<Var>, params: ParamsAdagrad) -> candle_core::Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| -> candle_core::Result<VarAdagrad> {
                let init = (var.zeros_like()? + params.initial_accumulator_value)?;
                let sum = Var::from_tensor(&init)?;
                Ok(VarAdagrad { var, sum })
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { vars, params })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        for v in &self.vars {
            if let Some(g) = grads.get(&v.var) {
                let sum = (v.sum.as_tensor() + g.sqr()?)?;
                let update = (g / (sum.sqrt()? + self.params.eps)?)?;
                let next = v.var.sub(&(update * self.params.lr)?)?;
                v.var.set(&next)?;
                v.sum.set(&sum)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Optimizer selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adagrad,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adagrad" => Ok(Self::Adagrad),
            "sgd" => Ok(Self::Sgd),
            other => Err(ConfigError::UnknownChoice {
                param: "optimizer",
                value: other.to_string(),
                allowed: "adagrad, sgd",
            }),
        }
    }
}

pub enum TrainOptimizer {
    Adagrad(Adagrad),
    Sgd(SGD),
}

impl TrainOptimizer {
    pub fn new(kind: OptimizerKind, vars: Vec<Var>, lr: f64) -> Result<Self> {
        Ok(match kind {
            OptimizerKind::Adagrad => Self::Adagrad(Adagrad::new(
                vars,
                ParamsAdagrad { lr, ..Default::default() },
            )?),
            OptimizerKind::Sgd => Self::Sgd(SGD::new(vars, lr)?),
        })
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            Self::Adagrad(opt) => opt.backward_step(loss)?,
            Self::Sgd(opt) => opt.backward_step(loss)?,
        }
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Adagrad(opt) => opt.learning_rate(),
            Self::Sgd(opt) => opt.learning_rate(),
        }
    }
}

// ---------------------------------------------------------------------------
// Training Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TrainConfig {
    pub optimizer: OptimizerKind,
    pub lr: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Adagrad,
            lr: 0.01,
        }
    }
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

pub struct Trainer {
    pub optimizer: TrainOptimizer,
    pub config: TrainConfig,
    varmap: VarMap,
    step_count: usize,
    timer_start: Instant,
}

impl Trainer {
    pub fn new(varmap: VarMap, config: TrainConfig) -> Result<Self> {
        let optimizer = TrainOptimizer::new(config.optimizer, varmap.all_vars(), config.lr)?;
        Ok(Self {
            optimizer,
            config,
            varmap,
            step_count: 0,
            timer_start: Instant::now(),
        })
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<usize> {
        self.optimizer.backward_step(loss)?;
        self.step_count += 1;
        Ok(self.step_count)
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Total number of trainable scalars.
    pub fn num_params(&self) -> usize {
        self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    pub fn current_lr(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.timer_start.elapsed().as_secs_f64()
    }

    pub fn log_timer(&self, label: &str) {
        let elapsed = self.elapsed_secs();
        info!(
            "{label}: {elapsed:.1}s ({} steps, {:.1} steps/sec)",
            self.step_count,
            self.step_count as f64 / elapsed.max(0.001)
        );
    }
}

// ---------------------------------------------------------------------------
// Loss
// ---------------------------------------------------------------------------

/// Mean cross-entropy of next-token logits (batch, vocab) against u32
/// targets (batch).
pub fn next_token_loss(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    candle_nn::loss::cross_entropy(logits, targets).map_err(Into::into)
}

pub fn perplexity(loss: f32) -> f32 {
    loss.exp()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
