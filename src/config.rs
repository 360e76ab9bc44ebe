// Run parameters: one combination of a parameter sweep.
//
// Defaults are the standard experiment settings. Enumerated choices are kept as
// strings so an unknown value surfaces as a descriptive ConfigError instead of
// a generic deserialization failure.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::corpus::CorpusConfig;
use crate::error::ConfigError;
use crate::eval::ClusterMetric;
use crate::rnn::RnnKind;
use crate::training::{OptimizerKind, TrainConfig};

/// Keys added by the sweep launcher; they only matter for job submission.
pub const LAUNCHER_KEYS: &[&str] = &["job_name", "param_name", "project_path", "save_path"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Params {
    // rnn
    pub hidden_size: usize,
    pub rnn: String,
    // toy corpus
    pub doc_size: usize,
    pub num_xws: usize,
    pub num_types: usize,
    pub num_fragments: usize,
    pub period_probability: f64,
    pub alpha: f64,
    // training
    pub slide_size: usize,
    pub context_size: usize,
    pub optimizer: String,
    pub batch_size: usize,
    pub lr: f64,
    pub max_steps: Option<usize>,
    // evaluation
    pub metric: String,
    pub eval_interval: usize,
    pub seed: u64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            hidden_size: 128, // 8, 32 are too low
            rnn: "srn".into(),
            doc_size: 400_000,
            num_xws: 512,
            num_types: 1024,
            num_fragments: 4,
            period_probability: 0.0,
            alpha: 2.0,
            slide_size: 64,
            context_size: 1,
            optimizer: "adagrad".into(),
            batch_size: 64,
            lr: 0.01,
            max_steps: None,
            metric: "ba".into(),
            eval_interval: 1,
            seed: 0,
        }
    }
}

impl Params {
    /// Build from a launcher's param2val map, dropping launcher bookkeeping
    /// keys. Missing keys take their defaults; unknown keys are rejected.
    pub fn from_param2val(param2val: Value) -> Result<Self> {
        let Value::Object(mut map) = param2val else {
            anyhow::bail!("param2val must be a JSON object");
        };
        for key in LAUNCHER_KEYS {
            map.remove(*key);
        }
        let params: Self = serde_json::from_value(Value::Object(map)).context("invalid param2val")?;
        Ok(params)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value: Value =
            serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
        Self::from_param2val(value)
    }

    pub fn corpus_config(&self) -> CorpusConfig {
        CorpusConfig {
            doc_size: self.doc_size,
            num_types: self.num_types,
            num_xws: self.num_xws,
            num_fragments: self.num_fragments,
            period_probability: self.period_probability,
            alpha: self.alpha,
        }
    }

    pub fn rnn_kind(&self) -> Result<RnnKind, ConfigError> {
        self.rnn.parse()
    }

    pub fn optimizer_kind(&self) -> Result<OptimizerKind, ConfigError> {
        self.optimizer.parse()
    }

    pub fn cluster_metric(&self) -> Result<ClusterMetric, ConfigError> {
        self.metric.parse()
    }

    pub fn train_config(&self) -> Result<TrainConfig, ConfigError> {
        Ok(TrainConfig {
            optimizer: self.optimizer_kind()?,
            lr: self.lr,
        })
    }

    /// Check every parameter before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.corpus_config().validate()?;
        for (name, value) in [
            ("hidden_size", self.hidden_size),
            ("slide_size", self.slide_size),
            ("context_size", self.context_size),
            ("batch_size", self.batch_size),
            ("eval_interval", self.eval_interval),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroParam(name));
            }
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(ConfigError::ZeroParam("lr"));
        }
        self.rnn_kind()?;
        self.optimizer_kind()?;
        self.cluster_metric()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_valid() {
        let params = Params::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.num_types - params.num_xws, 512);
        assert_eq!(params.optimizer_kind().unwrap(), OptimizerKind::Adagrad);
    }

    #[test]
    fn test_from_param2val_strips_launcher_keys() -> Result<()> {
        let params = Params::from_param2val(json!({
            "job_name": "job_3",
            "param_name": "param_7",
            "project_path": "/tmp/project",
            "save_path": "/tmp/save",
            "num_fragments": 2,
            "period_probability": 0.1,
            "optimizer": "sgd",
        }))?;
        assert_eq!(params.num_fragments, 2);
        assert_eq!(params.period_probability, 0.1);
        assert_eq!(params.optimizer_kind()?, OptimizerKind::Sgd);
        assert_eq!(params.hidden_size, 128);
        Ok(())
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Params::from_param2val(json!({ "num_sentinels": 4 })).unwrap_err();
        assert!(format!("{err:#}").contains("num_sentinels"), "{err:#}");
        assert!(Params::from_param2val(json!([1, 2])).is_err());
    }

    #[test]
    fn test_unknown_choices_rejected() {
        let params = Params { optimizer: "adam".into(), ..Params::default() };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::UnknownChoice { param: "optimizer", .. })
        ));
        let params = Params { rnn: "transformer".into(), ..Params::default() };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::UnknownChoice { param: "rnn", .. })
        ));
        let params = Params { metric: "acc".into(), ..Params::default() };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::UnknownChoice { param: "metric", .. })
        ));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let params = Params { batch_size: 0, ..Params::default() };
        assert_eq!(params.validate(), Err(ConfigError::ZeroParam("batch_size")));
        let params = Params { lr: -1.0, ..Params::default() };
        assert_eq!(params.validate(), Err(ConfigError::ZeroParam("lr")));
        let params = Params { num_fragments: 3, ..Params::default() };
        assert!(matches!(params.validate(), Err(ConfigError::UnevenFragments { .. })));
    }

    #[test]
    fn test_from_json_file() -> Result<()> {
        let path = std::env::temp_dir().join("entropic_params_test.json");
        std::fs::write(&path, r#"{ "doc_size": 1000, "seed": 7 }"#)?;
        let params = Params::from_json_file(&path)?;
        assert_eq!(params.doc_size, 1000);
        assert_eq!(params.seed, 7);
        let _ = std::fs::remove_file(&path);
        Ok(())
    }
}
