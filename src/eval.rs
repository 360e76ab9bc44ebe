// Evaluation: similarity matrices over x-words and the cluster score that
// compares a learned similarity structure against the gold categories.

use std::str::FromStr;

use anyhow::{ensure, Result};
use serde::{Serialize, Serializer};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Similarity matrix
// ---------------------------------------------------------------------------

/// Dense square matrix, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct SimMatrix {
    n: usize,
    data: Vec<f32>,
}

impl SimMatrix {
    pub fn zeros(n: usize) -> Self {
        Self { n, data: vec![0.0; n * n] }
    }

    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let n = rows.len();
        let mut data = Vec::with_capacity(n * n);
        for (i, row) in rows.into_iter().enumerate() {
            ensure!(row.len() == n, "row {i} has {} columns, expected {n}", row.len());
            data.extend(row);
        }
        Ok(Self { n, data })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.n + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f32) {
        self.data[i * self.n + j] = value;
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks(self.n.max(1)).take(self.n)
    }

    pub fn is_symmetric(&self) -> bool {
        (0..self.n).all(|i| (i + 1..self.n).all(|j| self.get(i, j) == self.get(j, i)))
    }
}

impl Serialize for SimMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rows())
    }
}

/// Gold similarity over x-words: 1 where two x-words share a fragment
/// (`i % num_fragments == j % num_fragments`), else 0.
pub fn gold_sim_mat(num_xws: usize, num_fragments: usize) -> SimMatrix {
    let mut mat = SimMatrix::zeros(num_xws);
    for row in 0..num_xws {
        let offset = row % num_fragments;
        for col in (offset..num_xws).step_by(num_fragments) {
            mat.set(row, col, 1.0);
        }
    }
    mat
}

/// Pairwise cosine similarity between representations. Zero vectors have
/// similarity 0 with everything.
pub fn cosine_sim_mat(reps: &[Vec<f32>]) -> SimMatrix {
    let n = reps.len();
    let norms: Vec<f32> = reps.iter().map(|r| l2_norm(r)).collect();
    let mut mat = SimMatrix::zeros(n);
    for i in 0..n {
        for j in i..n {
            let denom = norms[i] * norms[j];
            let sim = if denom > 1e-8 { dot(&reps[i], &reps[j]) / denom } else { 0.0 };
            mat.set(i, j, sim);
            mat.set(j, i, sim);
        }
    }
    mat
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

// ---------------------------------------------------------------------------
// Cluster score
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMetric {
    /// Balanced accuracy.
    Ba,
    F1,
    /// Cohen's kappa.
    Ck,
}

impl ClusterMetric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ba => "ba",
            Self::F1 => "f1",
            Self::Ck => "ck",
        }
    }
}

impl FromStr for ClusterMetric {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ba" => Ok(Self::Ba),
            "f1" => Ok(Self::F1),
            "ck" => Ok(Self::Ck),
            other => Err(ConfigError::UnknownChoice {
                param: "metric",
                value: other.to_string(),
                allowed: "ba, f1, ck",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Confusion {
    tp: usize,
    fp: usize,
    tn: usize,
    fn_: usize,
}

impl Confusion {
    fn score(&self, metric: ClusterMetric) -> f64 {
        let tp = self.tp as f64;
        let fp = self.fp as f64;
        let tn = self.tn as f64;
        let fn_ = self.fn_ as f64;
        match metric {
            ClusterMetric::Ba => {
                let tpr = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 1.0 };
                let tnr = if tn + fp > 0.0 { tn / (tn + fp) } else { 1.0 };
                (tpr + tnr) / 2.0
            }
            ClusterMetric::F1 => {
                let denom = 2.0 * tp + fp + fn_;
                if denom > 0.0 { 2.0 * tp / denom } else { 1.0 }
            }
            ClusterMetric::Ck => {
                let n = tp + fp + tn + fn_;
                let po = (tp + tn) / n;
                let pe = ((tp + fp) * (tp + fn_) + (tn + fn_) * (tn + fp)) / (n * n);
                if (1.0 - pe).abs() < 1e-12 {
                    if (po - 1.0).abs() < 1e-12 { 1.0 } else { 0.0 }
                } else {
                    (po - pe) / (1.0 - pe)
                }
            }
        }
    }
}

/// Score how well `sim_mat` separates same-category from different-category
/// pairs in `gold`.
///
/// Uses the strictly upper-triangular pairs. For each candidate threshold `t`
/// (every distinct similarity, plus one below the minimum) pairs with
/// `sim > t` are predicted "same"; the best score over all thresholds is
/// returned. A score of 1.0 means the gold structure is perfectly recovered.
pub fn calc_cluster_score(sim_mat: &SimMatrix, gold: &SimMatrix, metric: ClusterMetric) -> Result<f64> {
    ensure!(
        sim_mat.n() == gold.n(),
        "similarity matrix is {}x{} but gold matrix is {}x{}",
        sim_mat.n(), sim_mat.n(), gold.n(), gold.n()
    );
    let n = gold.n();
    ensure!(n >= 2, "need at least 2 items to score, got {n}");

    let mut pairs: Vec<(f32, bool)> = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push((sim_mat.get(i, j), gold.get(i, j) > 0.0));
        }
    }
    ensure!(
        pairs.iter().all(|(s, _)| !s.is_nan()),
        "similarity matrix contains NaN"
    );
    // descending by similarity; predicted positives are always a prefix
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let num_pos = pairs.iter().filter(|(_, same)| *same).count();
    let num_neg = pairs.len() - num_pos;

    // threshold at the maximum: nothing predicted "same"
    let mut conf = Confusion { tp: 0, fp: 0, tn: num_neg, fn_: num_pos };
    let mut best = conf.score(metric);

    let mut k = 0;
    while k < pairs.len() {
        let value = pairs[k].0;
        while k < pairs.len() && pairs[k].0 == value {
            if pairs[k].1 {
                conf.tp += 1;
                conf.fn_ -= 1;
            } else {
                conf.fp += 1;
                conf.tn -= 1;
            }
            k += 1;
        }
        best = best.max(conf.score(metric));
    }

    Ok(best)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_METRICS: [ClusterMetric; 3] = [ClusterMetric::Ba, ClusterMetric::F1, ClusterMetric::Ck];

    #[test]
    fn test_gold_small_example() {
        let gold = gold_sim_mat(4, 2);
        let expected = vec![
            vec![1.0, 0.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.0, 1.0],
            vec![1.0, 0.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.0, 1.0],
        ];
        assert_eq!(gold, SimMatrix::from_rows(expected).unwrap());
    }

    #[test]
    fn test_gold_one_fragment_all_ones() {
        let gold = gold_sim_mat(5, 1);
        assert!(gold.rows().all(|r| r.iter().all(|&v| v == 1.0)));
    }

    #[test]
    fn test_cosine_sim() {
        let reps = vec![vec![1.0, 0.0], vec![2.0, 0.0], vec![0.0, 3.0], vec![0.0, 0.0]];
        let sim = cosine_sim_mat(&reps);
        assert!((sim.get(0, 1) - 1.0).abs() < 1e-6);
        assert!(sim.get(0, 2).abs() < 1e-6);
        assert_eq!(sim.get(3, 0), 0.0);
        assert!(sim.is_symmetric());
    }

    #[test]
    fn test_gold_against_itself_is_perfect() -> Result<()> {
        let gold = gold_sim_mat(12, 3);
        for metric in ALL_METRICS {
            let score = calc_cluster_score(&gold, &gold, metric)?;
            assert!((score - 1.0).abs() < 1e-12, "{} = {score}", metric.name());
        }
        Ok(())
    }

    #[test]
    fn test_uninformative_similarity_is_chance() -> Result<()> {
        let gold = gold_sim_mat(8, 2);
        let flat = SimMatrix::zeros(8);
        let ba = calc_cluster_score(&flat, &gold, ClusterMetric::Ba)?;
        assert!((ba - 0.5).abs() < 1e-12, "ba = {ba}");
        let ck = calc_cluster_score(&flat, &gold, ClusterMetric::Ck)?;
        assert!(ck.abs() < 1e-12, "ck = {ck}");
        Ok(())
    }

    #[test]
    fn test_partial_recovery() -> Result<()> {
        // items 0,2 share a category, 1,3 share another; sim only gets 0-2 right
        let gold = gold_sim_mat(4, 2);
        let mut sim = SimMatrix::zeros(4);
        sim.set(0, 2, 0.9);
        sim.set(2, 0, 0.9);
        let ba = calc_cluster_score(&sim, &gold, ClusterMetric::Ba)?;
        // best cut predicts only (0,2): tpr = 1/2, tnr = 1
        assert!((ba - 0.75).abs() < 1e-12, "ba = {ba}");
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = calc_cluster_score(&SimMatrix::zeros(3), &gold_sim_mat(4, 2), ClusterMetric::Ba);
        assert!(err.is_err());
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("ba".parse::<ClusterMetric>().unwrap(), ClusterMetric::Ba);
        assert_eq!("f1".parse::<ClusterMetric>().unwrap(), ClusterMetric::F1);
        assert_eq!("ck".parse::<ClusterMetric>().unwrap(), ClusterMetric::Ck);
        assert!(matches!(
            "accuracy".parse::<ClusterMetric>(),
            Err(ConfigError::UnknownChoice { param: "metric", .. })
        ));
    }

    #[test]
    fn test_score_is_deterministic() -> Result<()> {
        let gold = gold_sim_mat(6, 3);
        let reps: Vec<Vec<f32>> = (0..6).map(|i| vec![(i % 3) as f32, 1.0, (i % 2) as f32]).collect();
        let sim = cosine_sim_mat(&reps);
        let a = calc_cluster_score(&sim, &gold, ClusterMetric::Ba)?;
        let b = calc_cluster_score(&sim, &gold, ClusterMetric::Ba)?;
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a));
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_gold_structure(num_xws in 1usize..40, num_fragments in 1usize..10) {
            let gold = gold_sim_mat(num_xws, num_fragments);
            prop_assert!(gold.is_symmetric());
            for i in 0..num_xws {
                prop_assert_eq!(gold.get(i, i), 1.0);
                for j in 0..num_xws {
                    let same = i % num_fragments == j % num_fragments;
                    prop_assert_eq!(gold.get(i, j), if same { 1.0 } else { 0.0 });
                }
            }
        }
    }
}
