pub mod datasets;
pub mod health;
pub mod models;
pub mod templates;
pub mod training;

pub use datasets::{get_dataset, list_datasets, preview_dataset};
pub use health::health_handler;
pub use models::{create_model, get_model, train_model};
pub use templates::{get_template, list_templates};
pub use training::{pause_session, predict, resume_session, session_status, stop_session};
