//! YAML configuration for [crate::fit::fit] and the command line runner.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pool::PoolConfig;
use crate::validate::ValidationOptions;

/// Schedule of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FitConfig {
    /// Total number of training episodes.
    pub train_episodes: usize,
    /// Log a running mean every this many steps.
    pub log_interval: usize,
    /// Validate every this many steps (and once at the end).
    pub val_interval: usize,
    /// Held-out episodes per validation.
    pub val_episodes: usize,
    pub progress: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            train_episodes: 2000,
            log_interval: 100,
            val_interval: 500,
            val_episodes: 400,
            progress: true,
        }
    }
}

impl FitConfig {
    pub fn validation(&self) -> ValidationOptions {
        ValidationOptions {
            episodes: self.val_episodes,
            progress: self.progress,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.train_episodes == 0 {
            return Err(Error::Config("train_episodes must be positive".into()));
        }
        if self.log_interval == 0 || self.val_interval == 0 {
            return Err(Error::Config(
                "log_interval and val_interval must be positive".into(),
            ));
        }
        if self.val_episodes == 0 {
            return Err(Error::Config("val_episodes must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub lr: f64,
    /// Only used by [OptimizerKind::Sgd].
    pub momentum: Option<f64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            lr: 1e-3,
            momentum: None,
        }
    }
}

/// Geometry of the synthetic class pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub n_way: usize,
    pub n_shot: usize,
    pub n_query: usize,
    /// Total classes; the last `held_out_classes` are kept for validation.
    pub classes: usize,
    pub held_out_classes: usize,
    pub examples_per_class: usize,
    /// Per-pixel noise around each class center.
    pub noise: f32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            n_way: 5,
            n_shot: 5,
            n_query: 15,
            classes: 64,
            held_out_classes: 16,
            examples_per_class: 60,
            noise: 1.0,
        }
    }
}

impl PoolSettings {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            n_way: self.n_way,
            n_shot: self.n_shot,
            n_query: self.n_query,
        }
    }

    /// Class ids reserved for validation.
    pub fn held_out(&self) -> Vec<usize> {
        (self.classes - self.held_out_classes..self.classes).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_way == 0 || self.n_shot == 0 || self.n_query == 0 {
            return Err(Error::Config(
                "n_way, n_shot and n_query must be positive".into(),
            ));
        }
        if self.held_out_classes < self.n_way
            || self.classes < self.held_out_classes + self.n_way
        {
            return Err(Error::Config(format!(
                "{} classes with {} held out cannot fill {}-way episodes on both splits",
                self.classes, self.held_out_classes, self.n_way
            )));
        }
        if self.examples_per_class < self.n_shot + self.n_query {
            return Err(Error::Config(format!(
                "examples_per_class ({}) is smaller than n_shot + n_query ({})",
                self.examples_per_class,
                self.n_shot + self.n_query
            )));
        }
        if !(self.noise.is_finite() && self.noise >= 0.0) {
            return Err(Error::Config("noise must be finite and non-negative".into()));
        }
        Ok(())
    }
}

/// Everything the command line runner needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    pub seed: u64,
    /// Label smoothing epsilon; `0` means plain cross entropy.
    pub label_smoothing: f32,
    pub optimizer: OptimizerConfig,
    pub pool: PoolSettings,
    pub fit: FitConfig,
}

impl ExperimentConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.optimizer.lr.is_finite() && self.optimizer.lr > 0.0) {
            return Err(Error::Config(format!(
                "learning rate must be positive, got {}",
                self.optimizer.lr
            )));
        }
        if !(0.0..1.0).contains(&self.label_smoothing) {
            return Err(Error::Config(format!(
                "label_smoothing must be in [0, 1), got {}",
                self.label_smoothing
            )));
        }
        self.pool.validate()?;
        self.fit.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        ExperimentConfig::default().validate().unwrap();
        assert_eq!(FitConfig::default().validation().episodes, 400);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = ExperimentConfig::from_yaml(
            "seed: 3\noptimizer:\n  kind: sgd\n  lr: 0.01\n  momentum: 0.9\nfit:\n  train_episodes: 10\n",
        )
        .unwrap();
        assert_eq!(config.seed, 3);
        assert_eq!(config.optimizer.kind, OptimizerKind::Sgd);
        // handed to dfdx's optimizer configs unconverted
        let opt = dfdx::optim::SgdConfig {
            lr: config.optimizer.lr,
            momentum: config.optimizer.momentum.map(dfdx::optim::Momentum::Classic),
            weight_decay: None,
        };
        assert_eq!(opt.lr, 0.01);
        assert!(matches!(opt.momentum, Some(dfdx::optim::Momentum::Classic(m)) if m == 0.9));
        assert_eq!(config.fit.train_episodes, 10);
        assert_eq!(config.fit.val_episodes, 400);
        assert_eq!(config.pool, PoolSettings::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            ExperimentConfig::from_yaml("optimizer:\n  lr: 0.0\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ExperimentConfig::from_yaml("fit:\n  val_interval: 0\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ExperimentConfig::from_yaml("pool:\n  classes: 8\n  held_out_classes: 5\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ExperimentConfig::from_yaml("no_such_key: 1\n"),
            Err(Error::Yaml(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let mut config = ExperimentConfig::default();
        config.label_smoothing = 0.1;
        config.pool.held_out_classes = 20;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_yaml().unwrap().as_bytes()).unwrap();
        let loaded = ExperimentConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(loaded, config);

        assert!(matches!(
            ExperimentConfig::from_yaml_file(file.path().with_extension("missing")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_held_out_ids() {
        let pool = PoolSettings {
            classes: 10,
            held_out_classes: 3,
            ..Default::default()
        };
        assert_eq!(pool.held_out(), vec![7, 8, 9]);
    }
}
