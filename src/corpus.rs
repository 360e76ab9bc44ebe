// ToyCorpus: artificial documents of alternating x-words and y-words.
//
// Example document: "x000001 y000005 x000034 y000082 x000093 y000003"
//
// Each x-word is tied to one fragment of the y-vocabulary. Under normal
// sampling an x-word is followed by a y-word from its own fragment, so the
// fragments define the category structure a network has to recover. With
// probability `period_probability` the y-word is instead one of a handful of
// pseudo-periods that may follow any x-word.

use std::collections::HashSet;
use std::sync::OnceLock;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::eval::{gold_sim_mat, SimMatrix};

/// Upper bound on the number of pseudo-periods. Kept small so the joint
/// entropy contributed by periods stays bounded.
pub const MAX_PSEUDO_PERIODS: usize = 8;

/// The first `NUM_PURE_XWS` x-words never receive pseudo-periods.
pub const NUM_PURE_XWS: usize = 2;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorpusConfig {
    pub doc_size: usize,
    pub num_types: usize,
    pub num_xws: usize,
    pub num_fragments: usize,
    pub period_probability: f64,
    pub alpha: f64,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            doc_size: 100_000,
            num_types: 4096,
            num_xws: 512,
            num_fragments: 2,
            period_probability: 0.0,
            alpha: 2.0,
        }
    }
}

impl CorpusConfig {
    pub fn num_yws(&self) -> usize {
        self.num_types.saturating_sub(self.num_xws)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.doc_size == 0 {
            return Err(ConfigError::ZeroDocSize);
        }
        if self.doc_size % 2 != 0 {
            return Err(ConfigError::OddDocSize(self.doc_size));
        }
        if self.num_xws < 2 {
            return Err(ConfigError::TooFewXws(self.num_xws));
        }
        if self.num_xws >= self.num_types {
            return Err(ConfigError::TooManyXws {
                num_xws: self.num_xws,
                num_types: self.num_types,
            });
        }
        let num_yws = self.num_yws();
        if self.num_fragments == 0 {
            return Err(ConfigError::ZeroFragments);
        }
        if self.num_fragments > num_yws {
            return Err(ConfigError::TooManyFragments {
                num_fragments: self.num_fragments,
                num_yws,
            });
        }
        if num_yws % self.num_fragments != 0 {
            return Err(ConfigError::UnevenFragments {
                num_fragments: self.num_fragments,
                num_yws,
            });
        }
        if !(0.0..=1.0).contains(&self.period_probability) {
            return Err(ConfigError::PeriodProbability(self.period_probability));
        }
        if !(self.alpha > 0.0 && self.alpha.is_finite()) {
            return Err(ConfigError::Alpha(self.alpha));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Generation output
// ---------------------------------------------------------------------------

/// Diagnostics collected while generating a document. They do not affect
/// generation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CorpusStats {
    pub num_pairs: usize,
    pub num_period_pairs: usize,
    pub unique_joint_outcomes: usize,
    pub num_possible: f64,
    pub coverage: f64,
}

#[derive(Clone, Debug)]
pub struct GeneratedDoc {
    pub doc: String,
    pub stats: CorpusStats,
}

// ---------------------------------------------------------------------------
// ToyCorpus
// ---------------------------------------------------------------------------

pub struct ToyCorpus {
    config: CorpusConfig,
    seed: u64,
    xws: Vec<String>,
    yws: Vec<String>,
    /// y-word indices per fragment, in global order.
    fragments: Vec<Vec<usize>>,
    /// y-word indices of the pseudo-periods.
    pseudo_periods: Vec<usize>,
    cum_weights: Vec<f64>,
    generated: OnceLock<GeneratedDoc>,
    gold: OnceLock<SimMatrix>,
}

impl ToyCorpus {
    pub fn new(config: CorpusConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let num_yws = config.num_yws();
        let num_fragments = config.num_fragments;

        let xws: Vec<String> = (0..config.num_xws).map(|i| format!("x{i:06}")).collect();
        let yws: Vec<String> = (0..num_yws).map(|i| format!("y{i:06}")).collect();

        // strided slices: fragment k holds yws[k], yws[k + F], yws[k + 2F], ...
        let fragments: Vec<Vec<usize>> = (0..num_fragments)
            .map(|offset| (offset..num_yws).step_by(num_fragments).collect())
            .collect();

        let pseudo_periods = select_pseudo_periods(&fragments);
        let cum_weights = power_cum_weights(pseudo_periods.len(), config.alpha);

        let corpus = Self {
            config,
            seed,
            xws,
            yws,
            fragments,
            pseudo_periods,
            cum_weights,
            generated: OnceLock::new(),
            gold: OnceLock::new(),
        };

        info!(
            num_xws = corpus.config.num_xws,
            num_fragments,
            "Initialized ToyCorpus"
        );
        info!("Lowest theoretical pp ={:>6}", corpus.fragment_size());
        info!("Number of y-word types={:>6}", num_yws);
        Ok(corpus)
    }

    pub fn config(&self) -> &CorpusConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn xws(&self) -> &[String] {
        &self.xws
    }

    pub fn yws(&self) -> &[String] {
        &self.yws
    }

    pub fn num_yws(&self) -> usize {
        self.yws.len()
    }

    /// All token types, x-words first.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.xws.iter().chain(self.yws.iter()).map(String::as_str)
    }

    pub fn fragments(&self) -> &[Vec<usize>] {
        &self.fragments
    }

    pub fn fragment_size(&self) -> usize {
        self.num_yws() / self.config.num_fragments
    }

    /// Fragment index assigned to an x-word (round-robin over fragments).
    pub fn fragment_of(&self, xw_index: usize) -> usize {
        xw_index % self.config.num_fragments
    }

    /// Fragment y-words an x-word may be followed by under normal sampling.
    pub fn xw_fragment(&self, xw_index: usize) -> &[usize] {
        &self.fragments[self.fragment_of(xw_index)]
    }

    /// Number of legal joint outcomes: every x-word times its fragment.
    pub fn num_possible(&self) -> f64 {
        self.config.num_xws as f64 * self.num_yws() as f64 / self.config.num_fragments as f64
    }

    pub fn pseudo_periods(&self) -> &[usize] {
        &self.pseudo_periods
    }

    pub fn pseudo_period_names(&self) -> Vec<&str> {
        self.pseudo_periods.iter().map(|&i| self.yws[i].as_str()).collect()
    }

    pub fn pseudo_period_cum_weights(&self) -> &[f64] {
        &self.cum_weights
    }

    /// Generate a fresh document from the given random source. Not cached.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> GeneratedDoc {
        self.log_pseudo_periods();

        let num_pairs = self.config.doc_size / 2;
        let mut doc = String::with_capacity(num_pairs * 16);
        let mut joint_outcomes: HashSet<(usize, usize)> = HashSet::new();
        let mut num_period_pairs = 0usize;

        for n in 0..num_pairs {
            let xi = rng.gen_range(0..self.xws.len());

            // The first two x-words are exempt: their category is never
            // obscured by pseudo-periods.
            let u: f64 = rng.gen();
            let yi = if u < self.config.period_probability && xi >= NUM_PURE_XWS {
                num_period_pairs += 1;
                self.sample_pseudo_period(rng)
            } else {
                let fragment = self.xw_fragment(xi);
                fragment[rng.gen_range(0..fragment.len())]
            };

            if n > 0 {
                doc.push(' ');
            }
            doc.push_str(&self.xws[xi]);
            doc.push(' ');
            doc.push_str(&self.yws[yi]);
            joint_outcomes.insert((xi, yi));
        }

        let num_possible = self.num_possible();
        let stats = CorpusStats {
            num_pairs,
            num_period_pairs,
            unique_joint_outcomes: joint_outcomes.len(),
            num_possible,
            coverage: joint_outcomes.len() as f64 / num_possible,
        };
        info!(
            "Number of unique joint outcomes={}/{}",
            stats.unique_joint_outcomes, stats.num_possible
        );
        info!("Coverage={:.2}", stats.coverage);

        GeneratedDoc { doc, stats }
    }

    /// The document, generated on first access from this corpus' seed.
    pub fn doc(&self) -> &str {
        &self.generated().doc
    }

    pub fn stats(&self) -> &CorpusStats {
        &self.generated().stats
    }

    /// Gold similarity matrix over x-words, built on first access.
    pub fn sim_mat_gold(&self) -> &SimMatrix {
        self.gold
            .get_or_init(|| gold_sim_mat(self.config.num_xws, self.config.num_fragments))
    }

    fn generated(&self) -> &GeneratedDoc {
        self.generated.get_or_init(|| {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
            self.generate(&mut rng)
        })
    }

    /// Draw a pseudo-period by bisecting the cumulative weights.
    fn sample_pseudo_period<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let u: f64 = rng.gen();
        let idx = self.cum_weights.partition_point(|&w| w <= u);
        self.pseudo_periods[idx.min(self.pseudo_periods.len() - 1)]
    }

    fn log_pseudo_periods(&self) {
        info!("pseudo_periods={:?}", self.pseudo_period_names());
        for xi in 0..NUM_PURE_XWS.min(self.xws.len()) {
            let fragment = self.xw_fragment(xi);
            let shared = self
                .pseudo_periods
                .iter()
                .filter(|pp| fragment.contains(pp))
                .count();
            info!("pseudo_periods in fragment of {}: {}", self.xws[xi], shared);
        }
    }
}

/// Walk the columns of the zipped fragments, taking one y-word per column
/// from fragments in round-robin order. At most `MAX_PSEUDO_PERIODS`.
pub fn select_pseudo_periods(fragments: &[Vec<usize>]) -> Vec<usize> {
    let num_columns = fragments.iter().map(Vec::len).min().unwrap_or(0);
    (0..num_columns.min(MAX_PSEUDO_PERIODS))
        .map(|col| fragments[col % fragments.len()][col])
        .collect()
}

/// Cumulative weights `(i + 1)^alpha`, normalised by the last value.
pub fn power_cum_weights(n: usize, alpha: f64) -> Vec<f64> {
    let logits: Vec<f64> = (0..n).map(|i| ((i + 1) as f64).powf(alpha)).collect();
    match logits.last().copied() {
        Some(last) => logits.iter().map(|l| l / last).collect(),
        None => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
