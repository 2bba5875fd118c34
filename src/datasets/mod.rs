//! Dataset registry and provider contract.
//!
//! Providers yield fully materialized train/test splits plus an immutable
//! [`DatasetSpec`] describing shape, task kind and recommended
//! hyperparameters. Acquisition and preprocessing beyond the built-in
//! generators is out of scope; everything here is deterministic.

mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::model::optimizer::OptimizerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Classification,
    Regression,
}

/// Recommended training hyperparameters shipped with each dataset. These are
/// the defaults a training request starts from; explicit overrides win.
#[derive(Debug, Clone, Serialize)]
pub struct Hyperparameters {
    pub epochs: usize,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub optimizer: OptimizerKind,
}

/// Immutable description of a registered dataset.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSpec {
    pub id: String,
    pub name: String,
    pub task_kind: TaskKind,
    /// `[features]` for tabular data, `[channels, height, width]` for images.
    pub input_shape: Vec<usize>,
    /// Number of classes for classification, 1 for regression.
    pub output_arity: usize,
    pub num_samples: usize,
    pub num_features: usize,
    pub recommended: Hyperparameters,
}

impl DatasetSpec {
    pub fn is_image(&self) -> bool {
        self.input_shape.len() >= 2
    }
}

/// Materialized train/test arrays. Features are `[samples, features]`
/// row-major (images flattened channel-major); labels are class indices for
/// classification and raw targets for regression.
pub struct DatasetSplit {
    pub x_train: Array2<f32>,
    pub y_train: Array1<f32>,
    pub x_test: Array2<f32>,
    pub y_test: Array1<f32>,
}

impl DatasetSplit {
    /// Restrict the training slice to its first `max` samples. The test
    /// slice keeps the dataset's native fraction.
    pub fn truncate_train(&mut self, max: usize) {
        if max < self.x_train.nrows() {
            self.x_train = self.x_train.slice_axis(Axis(0), (0..max).into()).to_owned();
            self.y_train = self.y_train.slice_axis(Axis(0), (0..max).into()).to_owned();
        }
    }
}

pub trait DatasetProvider: Send + Sync {
    fn spec(&self) -> &DatasetSpec;

    /// Materialize the split. Must be deterministic: repeated calls return
    /// identical arrays.
    fn load(&self) -> DatasetSplit;
}

/// Name → provider table. Registration happens once at startup (plus test
/// fixtures); lookups afterwards are read-only.
pub struct DatasetRegistry {
    providers: HashMap<String, Arc<dyn DatasetProvider>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in datasets.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for provider in builtin::providers() {
            registry.register(provider);
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn DatasetProvider>) {
        self.providers
            .insert(provider.spec().id.clone(), provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn DatasetProvider>> {
        self.providers.get(id).cloned()
    }

    /// All registered specs, sorted by id for stable listings.
    pub fn list(&self) -> Vec<DatasetSpec> {
        let mut specs: Vec<DatasetSpec> = self
            .providers
            .values()
            .map(|p| p.spec().clone())
            .collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Deterministically shuffle rows and carve off a trailing test fraction.
pub(crate) fn shuffle_split(
    x: Array2<f32>,
    y: Array1<f32>,
    test_fraction: f32,
    seed: u64,
) -> DatasetSplit {
    let n = x.nrows();
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_len = ((n as f32) * test_fraction).round() as usize;
    let train_len = n - test_len;
    let (train_idx, test_idx) = indices.split_at(train_len);

    DatasetSplit {
        x_train: x.select(Axis(0), train_idx),
        y_train: y.select(Axis(0), train_idx),
        x_test: x.select(Axis(0), test_idx),
        y_test: y.select(Axis(0), test_idx),
    }
}
