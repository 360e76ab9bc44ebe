// Vocabulary and sliding-window batching of a whitespace-tokenized document.
//
// A document "w0 w1 w2 w3 ..." becomes windows of `context_size + 1` ids at
// stride 1; a batch is `batch_size` consecutive windows, and successive
// batches start `slide_size` windows apart.

use std::collections::HashMap;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Vocab
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Vocab {
    pub types: Vec<String>,
    w2id: HashMap<String, u32>,
}

impl Vocab {
    /// Ids follow the given order.
    pub fn from_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Vec::new();
        let mut w2id = HashMap::new();
        for t in types {
            let t: String = t.into();
            if w2id.contains_key(&t) {
                continue;
            }
            w2id.insert(t.clone(), vocab.len() as u32);
            vocab.push(t);
        }
        Self { types: vocab, w2id }
    }

    /// Types ranked by frequency (ties broken by name). Fails if the
    /// document has more than `num_types` distinct tokens.
    pub fn from_doc(doc: &str, num_types: usize) -> Result<Self, ConfigError> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for w in doc.split_whitespace() {
            *counts.entry(w).or_insert(0) += 1;
        }
        if counts.len() > num_types {
            return Err(ConfigError::VocabOverflow {
                found: counts.len(),
                limit: num_types,
            });
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(Self::from_types(ranked.into_iter().map(|(w, _)| w)))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.w2id.get(token).copied()
    }

    fn token(&self, id: u32) -> &str {
        self.types.get(id as usize).map(|s| s.as_str()).unwrap_or("<UNK>")
    }

    pub fn encode(&self, doc: &str) -> Result<Vec<u32>, ConfigError> {
        doc.split_whitespace()
            .map(|w| self.id(w).ok_or_else(|| ConfigError::UnknownToken(w.to_string())))
            .collect()
    }

    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter().map(|&id| self.token(id)).collect::<Vec<_>>().join(" ")
    }
}

// ---------------------------------------------------------------------------
// SlidingPrep
// ---------------------------------------------------------------------------

/// One batch: `inputs` is `batch_size * context_size` ids (row-major),
/// `targets` is the id following each context.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub inputs: Vec<u32>,
    pub targets: Vec<u32>,
    pub batch_size: usize,
    pub context_size: usize,
}

pub struct SlidingPrep {
    pub vocab: Vocab,
    pub token_ids: Vec<u32>,
    pub context_size: usize,
    pub slide_size: usize,
    pub batch_size: usize,
}

impl SlidingPrep {
    pub fn new(
        doc: &str,
        vocab: Vocab,
        context_size: usize,
        slide_size: usize,
        batch_size: usize,
    ) -> Result<Self, ConfigError> {
        if context_size == 0 {
            return Err(ConfigError::ZeroParam("context_size"));
        }
        if slide_size == 0 {
            return Err(ConfigError::ZeroParam("slide_size"));
        }
        if batch_size == 0 {
            return Err(ConfigError::ZeroParam("batch_size"));
        }
        let token_ids = vocab.encode(doc)?;
        Ok(Self {
            vocab,
            token_ids,
            context_size,
            slide_size,
            batch_size,
        })
    }

    pub fn window_size(&self) -> usize {
        self.context_size + 1
    }

    pub fn num_windows(&self) -> usize {
        (self.token_ids.len() + 1).saturating_sub(self.window_size())
    }

    pub fn num_batches(&self) -> usize {
        let num_windows = self.num_windows();
        if num_windows < self.batch_size {
            0
        } else {
            (num_windows - self.batch_size) / self.slide_size + 1
        }
    }

    pub fn window(&self, start: usize) -> &[u32] {
        &self.token_ids[start..start + self.window_size()]
    }

    pub fn batch(&self, index: usize) -> Batch {
        let first = index * self.slide_size;
        let mut inputs = Vec::with_capacity(self.batch_size * self.context_size);
        let mut targets = Vec::with_capacity(self.batch_size);
        for w in first..first + self.batch_size {
            let window = self.window(w);
            inputs.extend_from_slice(&window[..self.context_size]);
            targets.push(window[self.context_size]);
        }
        Batch {
            inputs,
            targets,
            batch_size: self.batch_size,
            context_size: self.context_size,
        }
    }

    pub fn batches(&self) -> impl Iterator<Item = Batch> + '_ {
        (0..self.num_batches()).map(move |i| self.batch(i))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocab_from_types_keeps_order() {
        let vocab = Vocab::from_types(["x0", "x1", "y0", "x1"]);
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.id("x0"), Some(0));
        assert_eq!(vocab.id("y0"), Some(2));
        assert_eq!(vocab.id("y9"), None);
        assert_eq!(vocab.token(1), "x1");
    }

    #[test]
    fn test_vocab_from_doc_ranks_by_frequency() -> anyhow::Result<()> {
        let vocab = Vocab::from_doc("b a b c b a", 3)?;
        assert_eq!(vocab.types, vec!["b", "a", "c"]);
        assert!(matches!(
            Vocab::from_doc("a b c d", 3),
            Err(ConfigError::VocabOverflow { found: 4, limit: 3 })
        ));
        Ok(())
    }

    #[test]
    fn test_encode_decode() -> anyhow::Result<()> {
        let vocab = Vocab::from_types(["x0", "y0"]);
        let ids = vocab.encode("x0 y0 x0")?;
        assert_eq!(ids, vec![0, 1, 0]);
        assert_eq!(vocab.decode(&ids), "x0 y0 x0");
        assert_eq!(vocab.encode("x0 z"), Err(ConfigError::UnknownToken("z".into())));
        Ok(())
    }

    #[test]
    fn test_windows_and_batches() -> anyhow::Result<()> {
        // ids 0..10
        let doc: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        let vocab = Vocab::from_types(doc.iter().cloned());
        let prep = SlidingPrep::new(&doc.join(" "), vocab, 2, 3, 2)?;

        assert_eq!(prep.num_windows(), 8);
        // batch starts at 0, 3, 6
        assert_eq!(prep.num_batches(), 3);

        let b1 = prep.batch(1);
        assert_eq!(b1.inputs, vec![3, 4, 4, 5]);
        assert_eq!(b1.targets, vec![5, 6]);

        let all: Vec<Batch> = prep.batches().collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].targets, vec![8, 9]);
        Ok(())
    }

    #[test]
    fn test_too_short_doc_has_no_batches() -> anyhow::Result<()> {
        let vocab = Vocab::from_types(["a", "b"]);
        let prep = SlidingPrep::new("a b a", vocab, 1, 1, 4)?;
        assert_eq!(prep.num_batches(), 0);
        assert_eq!(prep.batches().count(), 0);
        Ok(())
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let vocab = Vocab::from_types(["a"]);
        assert!(matches!(
            SlidingPrep::new("a a", vocab.clone(), 0, 1, 1),
            Err(ConfigError::ZeroParam("context_size"))
        ));
        assert!(matches!(
            SlidingPrep::new("a a", vocab.clone(), 1, 0, 1),
            Err(ConfigError::ZeroParam("slide_size"))
        ));
        assert!(matches!(
            SlidingPrep::new("a a", vocab, 1, 1, 0),
            Err(ConfigError::ZeroParam("batch_size"))
        ));
    }
}
