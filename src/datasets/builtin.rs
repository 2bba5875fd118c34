//! Built-in datasets: the classic Iris table plus three deterministic
//! synthetic generators covering binary classification, regression and a
//! small image task for convolutional front-ends.

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{
    shuffle_split, DatasetProvider, DatasetSpec, DatasetSplit, Hyperparameters, TaskKind,
};
use crate::model::optimizer::OptimizerKind;

const TEST_FRACTION: f32 = 0.2;

pub(super) fn providers() -> Vec<Arc<dyn DatasetProvider>> {
    vec![
        Arc::new(IrisProvider::new()),
        Arc::new(MoonsProvider::new()),
        Arc::new(RippleProvider::new()),
        Arc::new(GlyphsProvider::new()),
    ]
}

/// Standard normal draw via Box-Muller; `rand` alone ships only uniform
/// distributions for floats.
fn gaussian(rng: &mut StdRng, sigma: f32) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

// ---------------------------------------------------------------------------
// iris
// ---------------------------------------------------------------------------

struct IrisProvider {
    spec: DatasetSpec,
}

impl IrisProvider {
    fn new() -> Self {
        Self {
            spec: DatasetSpec {
                id: "iris".to_string(),
                name: "Iris flowers".to_string(),
                task_kind: TaskKind::Classification,
                input_shape: vec![4],
                output_arity: 3,
                num_samples: IRIS.len(),
                num_features: 4,
                recommended: Hyperparameters {
                    epochs: 50,
                    learning_rate: 0.01,
                    batch_size: 16,
                    optimizer: OptimizerKind::Adam,
                },
            },
        }
    }
}

impl DatasetProvider for IrisProvider {
    fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    fn load(&self) -> DatasetSplit {
        let n = IRIS.len();
        let mut features = Array2::zeros((n, 4));
        let mut labels = Array1::zeros(n);
        for (i, row) in IRIS.iter().enumerate() {
            for j in 0..4 {
                features[[i, j]] = row[j];
            }
            labels[i] = row[4];
        }

        // Min-max scale each feature to [0, 1].
        for j in 0..4 {
            let col = features.column(j);
            let min = col.iter().copied().fold(f32::INFINITY, f32::min);
            let max = col.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let span = (max - min).max(f32::EPSILON);
            features
                .column_mut(j)
                .mapv_inplace(|v| (v - min) / span);
        }

        shuffle_split(features, labels, TEST_FRACTION, 0x4952_4953)
    }
}

// ---------------------------------------------------------------------------
// moons
// ---------------------------------------------------------------------------

struct MoonsProvider {
    spec: DatasetSpec,
}

impl MoonsProvider {
    const SAMPLES: usize = 1200;

    fn new() -> Self {
        Self {
            spec: DatasetSpec {
                id: "moons".to_string(),
                name: "Two interleaved moons".to_string(),
                task_kind: TaskKind::Classification,
                input_shape: vec![2],
                output_arity: 2,
                num_samples: Self::SAMPLES,
                num_features: 2,
                recommended: Hyperparameters {
                    epochs: 30,
                    learning_rate: 0.01,
                    batch_size: 32,
                    optimizer: OptimizerKind::Adam,
                },
            },
        }
    }
}

impl DatasetProvider for MoonsProvider {
    fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    fn load(&self) -> DatasetSplit {
        let n = Self::SAMPLES;
        let half = n / 2;
        let mut rng = StdRng::seed_from_u64(0x4d4f_4f4e);
        let mut features = Array2::zeros((n, 2));
        let mut labels = Array1::zeros(n);

        for i in 0..half {
            let t = PI * i as f32 / (half - 1) as f32;
            features[[i, 0]] = t.cos() + gaussian(&mut rng, 0.1);
            features[[i, 1]] = t.sin() + gaussian(&mut rng, 0.1);
            labels[i] = 0.0;
        }
        for i in 0..half {
            let t = PI * i as f32 / (half - 1) as f32;
            let row = half + i;
            features[[row, 0]] = 1.0 - t.cos() + gaussian(&mut rng, 0.1);
            features[[row, 1]] = 0.5 - t.sin() + gaussian(&mut rng, 0.1);
            labels[row] = 1.0;
        }

        shuffle_split(features, labels, TEST_FRACTION, 0x4d4f_4f4e)
    }
}

// ---------------------------------------------------------------------------
// ripple (regression)
// ---------------------------------------------------------------------------

struct RippleProvider {
    spec: DatasetSpec,
}

impl RippleProvider {
    const SAMPLES: usize = 1500;

    fn new() -> Self {
        Self {
            spec: DatasetSpec {
                id: "ripple".to_string(),
                name: "Ripple surface".to_string(),
                task_kind: TaskKind::Regression,
                input_shape: vec![2],
                output_arity: 1,
                num_samples: Self::SAMPLES,
                num_features: 2,
                recommended: Hyperparameters {
                    epochs: 40,
                    learning_rate: 0.005,
                    batch_size: 32,
                    optimizer: OptimizerKind::Adam,
                },
            },
        }
    }
}

impl DatasetProvider for RippleProvider {
    fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    fn load(&self) -> DatasetSplit {
        let n = Self::SAMPLES;
        let mut rng = StdRng::seed_from_u64(0x5249_5050);
        let mut features = Array2::zeros((n, 2));
        let mut targets = Array1::zeros(n);

        for i in 0..n {
            let x0 = rng.gen_range(-2.0_f32..2.0);
            let x1 = rng.gen_range(-1.0_f32..1.0);
            features[[i, 0]] = x0;
            features[[i, 1]] = x1;
            targets[i] = (2.0 * x0).sin() + 0.5 * x1 + gaussian(&mut rng, 0.05);
        }

        shuffle_split(features, targets, TEST_FRACTION, 0x5249_5050)
    }
}

// ---------------------------------------------------------------------------
// glyphs (8x8 single-channel images)
// ---------------------------------------------------------------------------

struct GlyphsProvider {
    spec: DatasetSpec,
}

impl GlyphsProvider {
    const SAMPLES: usize = 900;
    const SIDE: usize = 8;

    fn new() -> Self {
        Self {
            spec: DatasetSpec {
                id: "glyphs".to_string(),
                name: "Stroke glyphs 8x8".to_string(),
                task_kind: TaskKind::Classification,
                input_shape: vec![1, Self::SIDE, Self::SIDE],
                output_arity: 3,
                num_samples: Self::SAMPLES,
                num_features: Self::SIDE * Self::SIDE,
                recommended: Hyperparameters {
                    epochs: 15,
                    learning_rate: 0.005,
                    batch_size: 32,
                    optimizer: OptimizerKind::Adam,
                },
            },
        }
    }
}

impl DatasetProvider for GlyphsProvider {
    fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    fn load(&self) -> DatasetSplit {
        let n = Self::SAMPLES;
        let side = Self::SIDE;
        let mut rng = StdRng::seed_from_u64(0x474c_5950);
        let mut features = Array2::zeros((n, side * side));
        let mut labels = Array1::zeros(n);

        for i in 0..n {
            let class = i % 3;
            labels[i] = class as f32;

            // Faint background noise so the strokes are not trivially
            // separable by a single pixel.
            for j in 0..side * side {
                features[[i, j]] = gaussian(&mut rng, 0.05).abs();
            }

            let intensity = 0.8 + 0.2 * rng.gen::<f32>();
            match class {
                // Horizontal stroke.
                0 => {
                    let row = rng.gen_range(1..side - 1);
                    for col in 1..side - 1 {
                        features[[i, row * side + col]] = intensity;
                    }
                }
                // Vertical stroke.
                1 => {
                    let col = rng.gen_range(1..side - 1);
                    for row in 1..side - 1 {
                        features[[i, row * side + col]] = intensity;
                    }
                }
                // Diagonal stroke with a small offset.
                _ => {
                    let offset = rng.gen_range(0..3) as isize - 1;
                    for d in 0..side {
                        let col = d as isize + offset;
                        if (0..side as isize).contains(&col) {
                            features[[i, d * side + col as usize]] = intensity;
                        }
                    }
                }
            }
        }

        shuffle_split(features, labels, TEST_FRACTION, 0x474c_5950)
    }
}

/// Fisher's Iris measurements: sepal length/width, petal length/width, class.
#[rustfmt::skip]
const IRIS: [[f32; 5]; 150] = [
    [5.1, 3.5, 1.4, 0.2, 0.0], [4.9, 3.0, 1.4, 0.2, 0.0], [4.7, 3.2, 1.3, 0.2, 0.0],
    [4.6, 3.1, 1.5, 0.2, 0.0], [5.0, 3.6, 1.4, 0.2, 0.0], [5.4, 3.9, 1.7, 0.4, 0.0],
    [4.6, 3.4, 1.4, 0.3, 0.0], [5.0, 3.4, 1.5, 0.2, 0.0], [4.4, 2.9, 1.4, 0.2, 0.0],
    [4.9, 3.1, 1.5, 0.1, 0.0], [5.4, 3.7, 1.5, 0.2, 0.0], [4.8, 3.4, 1.6, 0.2, 0.0],
    [4.8, 3.0, 1.4, 0.1, 0.0], [4.3, 3.0, 1.1, 0.1, 0.0], [5.8, 4.0, 1.2, 0.2, 0.0],
    [5.7, 4.4, 1.5, 0.4, 0.0], [5.4, 3.9, 1.3, 0.4, 0.0], [5.1, 3.5, 1.4, 0.3, 0.0],
    [5.7, 3.8, 1.7, 0.3, 0.0], [5.1, 3.8, 1.5, 0.3, 0.0], [5.4, 3.4, 1.7, 0.2, 0.0],
    [5.1, 3.7, 1.5, 0.4, 0.0], [4.6, 3.6, 1.0, 0.2, 0.0], [5.1, 3.3, 1.7, 0.5, 0.0],
    [4.8, 3.4, 1.9, 0.2, 0.0], [5.0, 3.0, 1.6, 0.2, 0.0], [5.0, 3.4, 1.6, 0.4, 0.0],
    [5.2, 3.5, 1.5, 0.2, 0.0], [5.2, 3.4, 1.4, 0.2, 0.0], [4.7, 3.2, 1.6, 0.2, 0.0],
    [4.8, 3.1, 1.6, 0.2, 0.0], [5.4, 3.4, 1.5, 0.4, 0.0], [5.2, 4.1, 1.5, 0.1, 0.0],
    [5.5, 4.2, 1.4, 0.2, 0.0], [4.9, 3.1, 1.5, 0.1, 0.0], [5.0, 3.2, 1.2, 0.2, 0.0],
    [5.5, 3.5, 1.3, 0.2, 0.0], [4.9, 3.1, 1.5, 0.1, 0.0], [4.4, 3.0, 1.3, 0.2, 0.0],
    [5.1, 3.4, 1.5, 0.2, 0.0], [5.0, 3.5, 1.3, 0.3, 0.0], [4.5, 2.3, 1.3, 0.3, 0.0],
    [4.4, 3.2, 1.3, 0.2, 0.0], [5.0, 3.5, 1.6, 0.6, 0.0], [5.1, 3.8, 1.9, 0.4, 0.0],
    [4.8, 3.0, 1.4, 0.3, 0.0], [5.1, 3.8, 1.6, 0.2, 0.0], [4.6, 3.2, 1.4, 0.2, 0.0],
    [5.3, 3.7, 1.5, 0.2, 0.0], [5.0, 3.3, 1.4, 0.2, 0.0],
    [7.0, 3.2, 4.7, 1.4, 1.0], [6.4, 3.2, 4.5, 1.5, 1.0], [6.9, 3.1, 4.9, 1.5, 1.0],
    [5.5, 2.3, 4.0, 1.3, 1.0], [6.5, 2.8, 4.6, 1.5, 1.0], [5.7, 2.8, 4.5, 1.3, 1.0],
    [6.3, 3.3, 4.7, 1.6, 1.0], [4.9, 2.4, 3.3, 1.0, 1.0], [6.6, 2.9, 4.6, 1.3, 1.0],
    [5.2, 2.7, 3.9, 1.4, 1.0], [5.0, 2.0, 3.5, 1.0, 1.0], [5.9, 3.0, 4.2, 1.5, 1.0],
    [6.0, 2.2, 4.0, 1.0, 1.0], [6.1, 2.9, 4.7, 1.4, 1.0], [5.6, 2.9, 3.6, 1.3, 1.0],
    [6.7, 3.1, 4.4, 1.4, 1.0], [5.6, 3.0, 4.5, 1.5, 1.0], [5.8, 2.7, 4.1, 1.0, 1.0],
    [6.2, 2.2, 4.5, 1.5, 1.0], [5.6, 2.5, 3.9, 1.1, 1.0], [5.9, 3.2, 4.8, 1.8, 1.0],
    [6.1, 2.8, 4.0, 1.3, 1.0], [6.3, 2.5, 4.9, 1.5, 1.0], [6.1, 2.8, 4.7, 1.2, 1.0],
    [6.4, 2.9, 4.3, 1.3, 1.0], [6.6, 3.0, 4.4, 1.4, 1.0], [6.8, 2.8, 4.8, 1.4, 1.0],
    [6.7, 3.0, 5.0, 1.7, 1.0], [6.0, 2.9, 4.5, 1.5, 1.0], [5.7, 2.6, 3.5, 1.0, 1.0],
    [5.5, 2.4, 3.8, 1.1, 1.0], [5.5, 2.4, 3.7, 1.0, 1.0], [5.8, 2.7, 3.9, 1.2, 1.0],
    [6.0, 2.7, 5.1, 1.6, 1.0], [5.4, 3.0, 4.5, 1.5, 1.0], [6.0, 3.4, 4.5, 1.6, 1.0],
    [6.7, 3.1, 4.7, 1.5, 1.0], [6.3, 2.3, 4.4, 1.3, 1.0], [5.6, 3.0, 4.1, 1.3, 1.0],
    [5.5, 2.5, 4.0, 1.3, 1.0], [5.5, 2.6, 4.4, 1.2, 1.0], [6.1, 3.0, 4.6, 1.4, 1.0],
    [5.8, 2.6, 4.0, 1.2, 1.0], [5.0, 2.3, 3.3, 1.0, 1.0], [5.6, 2.7, 4.2, 1.3, 1.0],
    [5.7, 3.0, 4.2, 1.2, 1.0], [5.7, 2.9, 4.2, 1.3, 1.0], [6.2, 2.9, 4.3, 1.3, 1.0],
    [5.1, 2.5, 3.0, 1.1, 1.0], [5.7, 2.8, 4.1, 1.3, 1.0],
    [6.3, 3.3, 6.0, 2.5, 2.0], [5.8, 2.7, 5.1, 1.9, 2.0], [7.1, 3.0, 5.9, 2.1, 2.0],
    [6.3, 2.9, 5.6, 1.8, 2.0], [6.5, 3.0, 5.8, 2.2, 2.0], [7.6, 3.0, 6.6, 2.1, 2.0],
    [4.9, 2.5, 4.5, 1.7, 2.0], [7.3, 2.9, 6.3, 1.8, 2.0], [6.7, 2.5, 5.8, 1.8, 2.0],
    [7.2, 3.6, 6.1, 2.5, 2.0], [6.5, 3.2, 5.1, 2.0, 2.0], [6.4, 2.7, 5.3, 1.9, 2.0],
    [6.8, 3.0, 5.5, 2.1, 2.0], [5.7, 2.5, 5.0, 2.0, 2.0], [5.8, 2.8, 5.1, 2.4, 2.0],
    [6.4, 3.2, 5.3, 2.3, 2.0], [6.5, 3.0, 5.5, 1.8, 2.0], [7.7, 3.8, 6.7, 2.2, 2.0],
    [7.7, 2.6, 6.9, 2.3, 2.0], [6.0, 2.2, 5.0, 1.5, 2.0], [6.9, 3.2, 5.7, 2.3, 2.0],
    [5.6, 2.8, 4.9, 2.0, 2.0], [7.7, 2.8, 6.7, 2.0, 2.0], [6.3, 2.7, 4.9, 1.8, 2.0],
    [6.7, 3.3, 5.7, 2.1, 2.0], [7.2, 3.2, 6.0, 1.8, 2.0], [6.2, 2.8, 4.8, 1.8, 2.0],
    [6.1, 3.0, 4.9, 1.8, 2.0], [6.4, 2.8, 5.6, 2.1, 2.0], [7.2, 3.0, 5.8, 1.6, 2.0],
    [7.4, 2.8, 6.1, 1.9, 2.0], [7.9, 3.8, 6.4, 2.0, 2.0], [6.4, 2.8, 5.6, 2.2, 2.0],
    [6.3, 2.8, 5.1, 1.5, 2.0], [6.1, 2.6, 5.6, 1.4, 2.0], [7.7, 3.0, 6.1, 2.3, 2.0],
    [6.3, 3.4, 5.6, 2.4, 2.0], [6.4, 3.1, 5.5, 1.8, 2.0], [6.0, 3.0, 4.8, 1.8, 2.0],
    [6.9, 3.1, 5.4, 2.1, 2.0], [6.7, 3.1, 5.6, 2.4, 2.0], [6.9, 3.1, 5.1, 2.3, 2.0],
    [5.8, 2.7, 5.1, 1.9, 2.0], [6.8, 3.2, 5.9, 2.3, 2.0], [6.7, 3.3, 5.7, 2.5, 2.0],
    [6.7, 3.0, 5.2, 2.3, 2.0], [6.3, 2.5, 5.0, 1.9, 2.0], [6.5, 3.0, 5.2, 2.0, 2.0],
    [6.2, 3.4, 5.4, 2.3, 2.0], [5.9, 3.0, 5.1, 1.8, 2.0],
];
