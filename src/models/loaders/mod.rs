pub mod toml_loader;

pub use toml_loader::{load_model_catalogue, load_request_batch};
