// Next-token recurrent network: embedding -> recurrent cell -> projection.
//
// `srn`:  Elman network, h_t = tanh(x_t W_ih + b + h_{t-1} W_hh)
// `lstm`: candle-nn LSTM
//
// Logits are computed from the final hidden state only, so a batch of
// contexts (batch, seq) maps to (batch, vocab).

use std::str::FromStr;

use anyhow::Result;
use candle_core::{DType, IndexOp, Module, Tensor};
use candle_nn::{embedding, linear, linear_no_bias, Embedding, LSTMConfig, Linear, VarBuilder, LSTM, RNN};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RnnKind {
    Srn,
    Lstm,
}

impl FromStr for RnnKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "srn" => Ok(Self::Srn),
            "lstm" => Ok(Self::Lstm),
            other => Err(ConfigError::UnknownChoice {
                param: "rnn",
                value: other.to_string(),
                allowed: "srn, lstm",
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RnnConfig {
    pub kind: RnnKind,
    pub vocab_size: usize,
    pub hidden_size: usize,
}

impl RnnConfig {
    /// Small config for tests.
    pub fn tiny() -> Self {
        Self {
            kind: RnnKind::Srn,
            vocab_size: 16,
            hidden_size: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

struct ElmanCell {
    w_ih: Linear,
    w_hh: Linear,
    hidden_size: usize,
}

impl ElmanCell {
    fn new(hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            w_ih: linear(hidden_size, hidden_size, vb.pp("w_ih"))?,
            w_hh: linear_no_bias(hidden_size, hidden_size, vb.pp("w_hh"))?,
            hidden_size,
        })
    }

    /// x: (batch, seq, hidden) -> final h: (batch, hidden)
    fn last_hidden(&self, x: &Tensor) -> Result<Tensor> {
        let (b, seq, _) = x.dims3()?;
        let mut h = Tensor::zeros((b, self.hidden_size), DType::F32, x.device())?;
        for t in 0..seq {
            let xt = x.i((.., t, ..))?;
            h = (self.w_ih.forward(&xt)? + self.w_hh.forward(&h)?)?.tanh()?;
        }
        Ok(h)
    }
}

enum Cell {
    Srn(ElmanCell),
    Lstm(LSTM),
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

pub struct Rnn {
    embed: Embedding,
    cell: Cell,
    out: Linear,
    pub config: RnnConfig,
}

impl Rnn {
    pub fn new(config: RnnConfig, vb: VarBuilder) -> Result<Self> {
        let h = config.hidden_size;
        let embed = embedding(config.vocab_size, h, vb.pp("embed"))?;
        let cell = match config.kind {
            RnnKind::Srn => Cell::Srn(ElmanCell::new(h, vb.pp("srn"))?),
            RnnKind::Lstm => Cell::Lstm(candle_nn::lstm(h, h, LSTMConfig::default(), vb.pp("lstm"))?),
        };
        let out = linear(h, config.vocab_size, vb.pp("out"))?;
        Ok(Self { embed, cell, out, config })
    }

    /// inputs: (batch, seq) u32 ids -> logits (batch, vocab)
    pub fn forward(&self, inputs: &Tensor) -> Result<Tensor> {
        let x = self.embed.forward(inputs)?;
        let h = match &self.cell {
            Cell::Srn(cell) => cell.last_hidden(&x)?,
            Cell::Lstm(lstm) => {
                let states = lstm.seq(&x)?;
                match states.last() {
                    Some(state) => state.h().clone(),
                    None => anyhow::bail!("empty input sequence"),
                }
            }
        };
        self.out.forward(&h).map_err(Into::into)
    }

    /// Embedding matrix (vocab, hidden).
    pub fn embeddings(&self) -> &Tensor {
        self.embed.embeddings()
    }

    /// Embedding rows for the given token ids.
    pub fn token_reps(&self, ids: &[u32]) -> Result<Vec<Vec<f32>>> {
        let weights = self.embeddings();
        let idx = Tensor::new(ids, weights.device())?;
        weights.index_select(&idx, 0)?.to_vec2::<f32>().map_err(Into::into)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn build(kind: RnnKind) -> Result<(Rnn, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = RnnConfig { kind, ..RnnConfig::tiny() };
        Ok((Rnn::new(config, vb)?, varmap))
    }

    #[test]
    fn test_srn_forward_shape() -> Result<()> {
        let (rnn, varmap) = build(RnnKind::Srn)?;
        let inputs = Tensor::new(&[[1u32, 2, 3], [4, 5, 6]], &Device::Cpu)?;
        let logits = rnn.forward(&inputs)?;
        assert_eq!(logits.dims(), &[2, 16]);
        // embed + w_ih (w, b) + w_hh + out (w, b)
        assert_eq!(varmap.all_vars().len(), 6);
        Ok(())
    }

    #[test]
    fn test_lstm_forward_shape() -> Result<()> {
        let (rnn, _varmap) = build(RnnKind::Lstm)?;
        let inputs = Tensor::new(&[[1u32], [7]], &Device::Cpu)?;
        let logits = rnn.forward(&inputs)?;
        assert_eq!(logits.dims(), &[2, 16]);
        let vals: Vec<Vec<f32>> = logits.to_vec2()?;
        assert!(vals.iter().flatten().all(|v| v.is_finite()));
        Ok(())
    }

    #[test]
    fn test_token_reps_match_embedding_rows() -> Result<()> {
        let (rnn, _varmap) = build(RnnKind::Srn)?;
        let reps = rnn.token_reps(&[3, 0])?;
        assert_eq!(reps.len(), 2);
        assert_eq!(reps[0].len(), 8);
        let all: Vec<Vec<f32>> = rnn.embeddings().to_vec2()?;
        assert_eq!(reps[0], all[3]);
        assert_eq!(reps[1], all[0]);
        Ok(())
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert_eq!("srn".parse::<RnnKind>().unwrap(), RnnKind::Srn);
        assert_eq!("lstm".parse::<RnnKind>().unwrap(), RnnKind::Lstm);
        assert!(matches!(
            "gru".parse::<RnnKind>(),
            Err(ConfigError::UnknownChoice { param: "rnn", .. })
        ));
    }
}
