// One experiment run: build the toy corpus, slide over it in batches, train
// the recurrent network to predict the next token, and track how well the
// x-word embeddings recover the gold category structure.

use std::time::Instant;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Params;
use crate::corpus::{CorpusStats, ToyCorpus};
use crate::error::ConfigError;
use crate::eval::{calc_cluster_score, cosine_sim_mat};
use crate::prep::{SlidingPrep, Vocab};
use crate::rnn::{Rnn, RnnConfig};
use crate::training::{next_token_loss, perplexity, Trainer};

/// Performance series of one run, indexed by `steps`.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub params: Params,
    pub corpus: CorpusStats,
    pub metric: String,
    pub num_batches: usize,
    pub steps: Vec<usize>,
    pub pp: Vec<f32>,
    pub scores: Vec<f64>,
    pub timings: Vec<PhaseTiming>,
}

impl RunSummary {
    pub fn final_score(&self) -> Option<f64> {
        self.scores.last().copied()
    }

    pub fn final_pp(&self) -> Option<f32> {
        self.pp.last().copied()
    }
}

/// Wall-clock time of one run phase and the amount of work it covered.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhaseTiming {
    pub phase: &'static str,
    pub secs: f64,
    pub items: usize,
    pub unit: &'static str,
}

impl PhaseTiming {
    pub fn rate(&self) -> f64 {
        self.items as f64 / self.secs.max(1e-3)
    }
}

struct PhaseClock {
    start: Instant,
    timings: Vec<PhaseTiming>,
}

impl PhaseClock {
    fn new() -> Self {
        Self { start: Instant::now(), timings: Vec::new() }
    }

    fn finish(&mut self, phase: &'static str, items: usize, unit: &'static str) {
        let timing = PhaseTiming {
            phase,
            secs: self.start.elapsed().as_secs_f64(),
            items,
            unit,
        };
        info!(
            "{phase}: {:.1}s ({items} {unit}, {:.0} {unit}/sec)",
            timing.secs,
            timing.rate()
        );
        self.timings.push(timing);
        self.start = Instant::now();
    }

    fn total_secs(&self) -> f64 {
        self.timings.iter().map(|t| t.secs).sum()
    }
}

/// Cluster score that stops being recomputed once it reaches 1.0.
#[derive(Debug, Default)]
pub struct ScoreTracker {
    frozen: bool,
    evaluations: usize,
}

impl ScoreTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn update(&mut self, compute: impl FnOnce() -> Result<f64>) -> Result<f64> {
        if self.frozen {
            return Ok(1.0);
        }
        let score = compute()?;
        self.evaluations += 1;
        if score >= 1.0 {
            info!("perfect cluster score reached, freezing further scoring");
            self.frozen = true;
        }
        Ok(score)
    }
}

pub fn run(params: &Params, device: &Device) -> Result<RunSummary> {
    params.validate()?;
    info!(?params, "starting run");
    let mut clock = PhaseClock::new();

    // create toy input
    let corpus = ToyCorpus::new(params.corpus_config(), params.seed)?;
    let doc = corpus.doc();
    clock.finish("corpus", params.doc_size, "tokens");

    let vocab = Vocab::from_types(corpus.types());
    let prep = SlidingPrep::new(
        doc,
        vocab,
        params.context_size,
        params.slide_size,
        params.batch_size,
    )?;
    let xw_ids = corpus
        .xws()
        .iter()
        .map(|xw| prep.vocab.id(xw).ok_or_else(|| ConfigError::UnknownToken(xw.clone())))
        .collect::<Result<Vec<u32>, _>>()?;
    let num_batches = prep.num_batches();
    if num_batches == 0 {
        warn!(
            "document of {} tokens is too short for a single batch of {}",
            prep.token_ids.len(),
            params.batch_size
        );
    }
    if prep.num_windows() > 0 {
        debug!("first window: {}", prep.vocab.decode(prep.window(0)));
    }
    clock.finish("prep", num_batches, "batches");

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let rnn = Rnn::new(
        RnnConfig {
            kind: params.rnn_kind()?,
            vocab_size: prep.vocab.len(),
            hidden_size: params.hidden_size,
        },
        vb,
    )?;
    let mut trainer = Trainer::new(varmap, params.train_config()?)?;
    info!(
        num_params = trainer.num_params(),
        lr = trainer.current_lr(),
        "built {} model",
        params.rnn
    );

    let metric = params.cluster_metric()?;
    let gold = corpus.sim_mat_gold();
    let num_steps = params.max_steps.map_or(num_batches, |m| m.min(num_batches));
    info!(num_batches, num_steps, "training");

    let mut tracker = ScoreTracker::new();
    let mut steps = Vec::new();
    let mut pps = Vec::new();
    let mut scores = Vec::new();

    for (step, batch) in prep.batches().take(num_steps).enumerate() {
        let evaluate = step % params.eval_interval == 0;

        // score the representations before this step's update
        let score = if evaluate {
            Some(tracker.update(|| {
                let xw_reps = rnn.token_reps(&xw_ids)?;
                calc_cluster_score(&cosine_sim_mat(&xw_reps), gold, metric)
            })?)
        } else {
            None
        };

        let inputs = Tensor::from_vec(batch.inputs, (batch.batch_size, batch.context_size), device)?;
        let targets = Tensor::from_vec(batch.targets, batch.batch_size, device)?;
        let logits = rnn.forward(&inputs)?;
        let loss = next_token_loss(&logits, &targets)?;
        let pp = perplexity(loss.to_scalar::<f32>()?);
        trainer.backward_step(&loss)?;

        if let Some(score) = score {
            info!("step={step:>6}: pp={pp:.1} {}={score:.4}", metric.name());
            steps.push(step);
            pps.push(pp);
            scores.push(score);
        }
    }

    trainer.log_timer("train");
    clock.finish("train", trainer.step_count(), "steps");
    info!("total: {:.1}s", clock.total_secs());

    Ok(RunSummary {
        params: params.clone(),
        corpus: corpus.stats().clone(),
        metric: metric.name().to_string(),
        num_batches,
        steps,
        pp: pps,
        scores,
        timings: clock.timings,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_freezes_at_perfect_score() -> Result<()> {
        let mut tracker = ScoreTracker::new();
        assert_eq!(tracker.update(|| Ok(0.7))?, 0.7);
        assert!(!tracker.is_frozen());
        assert_eq!(tracker.update(|| Ok(1.0))?, 1.0);
        assert!(tracker.is_frozen());

        // frozen: the closure is never called again
        let score = tracker.update(|| anyhow::bail!("should not be evaluated"))?;
        assert_eq!(score, 1.0);
        assert_eq!(tracker.evaluations(), 2);
        Ok(())
    }

    #[test]
    fn test_tracker_propagates_errors() {
        let mut tracker = ScoreTracker::new();
        assert!(tracker.update(|| anyhow::bail!("boom")).is_err());
        assert!(!tracker.is_frozen());
    }

    #[test]
    fn test_phase_clock_records_work_per_phase() {
        let mut clock = PhaseClock::new();
        clock.finish("corpus", 2000, "tokens");
        clock.finish("train", 0, "steps");
        let phases: Vec<_> = clock.timings.iter().map(|t| (t.phase, t.items, t.unit)).collect();
        assert_eq!(phases, vec![("corpus", 2000, "tokens"), ("train", 0, "steps")]);
        assert!(clock.timings.iter().all(|t| t.secs >= 0.0 && t.rate().is_finite()));
        assert!(clock.total_secs() >= clock.timings[0].secs);
    }

    #[test]
    fn test_phase_rate_guards_zero_duration() {
        let timing = PhaseTiming { phase: "prep", secs: 0.0, items: 5, unit: "batches" };
        assert!((timing.rate() - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn test_run_rejects_invalid_params_before_training() {
        let params = Params { optimizer: "rmsprop".into(), ..Params::default() };
        let err = run(&params, &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("rmsprop"), "{err}");
    }
}
