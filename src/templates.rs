//! Prebuilt architecture templates, one or more per built-in dataset.

use serde::Serialize;

use crate::model::{InputSize, LayerSpec};

#[derive(Debug, Clone, Serialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub dataset_id: String,
    pub layers: Vec<LayerSpec>,
}

fn input() -> LayerSpec {
    LayerSpec::Input {
        neurons: None,
        position: None,
        activation: None,
    }
}

fn hidden(neurons: usize, activation: &str) -> LayerSpec {
    LayerSpec::Hidden {
        neurons,
        activation: activation.to_string(),
        position: None,
    }
}

fn output(neurons: usize, activation: &str) -> LayerSpec {
    LayerSpec::Output {
        neurons,
        activation: Some(activation.to_string()),
        position: None,
    }
}

pub fn catalogue() -> Vec<Template> {
    vec![
        Template {
            id: "iris-mlp".to_string(),
            name: "Iris classifier".to_string(),
            dataset_id: "iris".to_string(),
            layers: vec![
                LayerSpec::Input {
                    neurons: Some(InputSize::Units(4)),
                    position: None,
                    activation: None,
                },
                hidden(16, "relu"),
                output(3, "softmax"),
            ],
        },
        Template {
            id: "moons-wide".to_string(),
            name: "Two-moons separator".to_string(),
            dataset_id: "moons".to_string(),
            layers: vec![
                input(),
                hidden(32, "tanh"),
                LayerSpec::Dropout {
                    rate: 0.1,
                    position: None,
                },
                hidden(16, "tanh"),
                output(2, "softmax"),
            ],
        },
        Template {
            id: "ripple-mlp".to_string(),
            name: "Ripple regressor".to_string(),
            dataset_id: "ripple".to_string(),
            layers: vec![
                input(),
                hidden(32, "tanh"),
                hidden(16, "tanh"),
                output(1, "linear"),
            ],
        },
        Template {
            id: "glyphs-cnn".to_string(),
            name: "Glyph convnet".to_string(),
            dataset_id: "glyphs".to_string(),
            layers: vec![
                input(),
                LayerSpec::Conv2d {
                    filters: 8,
                    kernel: 3,
                    activation: "relu".to_string(),
                    position: None,
                },
                LayerSpec::Maxpool2d {
                    pool: 2,
                    position: None,
                },
                LayerSpec::Flatten { position: None },
                hidden(32, "relu"),
                output(3, "softmax"),
            ],
        },
    ]
}

pub fn get(id: &str) -> Option<Template> {
    catalogue().into_iter().find(|t| t.id == id)
}

pub fn for_dataset(dataset_id: Option<&str>) -> Vec<Template> {
    let mut templates = catalogue();
    if let Some(dataset_id) = dataset_id {
        templates.retain(|t| t.dataset_id == dataset_id);
    }
    templates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::DatasetRegistry;
    use crate::model::validate;

    #[test]
    fn every_template_validates_against_its_dataset() {
        let registry = DatasetRegistry::with_builtins();
        for template in catalogue() {
            let provider = registry
                .get(&template.dataset_id)
                .unwrap_or_else(|| panic!("{} references a missing dataset", template.id));
            validate(&template.layers, provider.spec())
                .unwrap_or_else(|e| panic!("template {} is invalid: {e}", template.id));
        }
    }

    #[test]
    fn filtering_by_dataset_narrows_the_catalogue() {
        assert_eq!(for_dataset(Some("iris")).len(), 1);
        assert!(for_dataset(Some("unknown")).is_empty());
        assert_eq!(for_dataset(None).len(), catalogue().len());
        assert!(get("glyphs-cnn").is_some());
        assert!(get("nope").is_none());
    }
}
