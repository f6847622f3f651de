pub mod batch;
pub mod invocation;
pub mod loaders;
pub mod model;
pub mod registry;

pub use batch::{BatchRequest, RequestBatch};
pub use invocation::{AttemptOutcome, AttemptRecord, Completion, InferenceRequest, InvocationResult};
pub use loaders::{load_model_catalogue, load_request_batch};
pub use model::{InvocationParams, Model};
pub use registry::ModelRegistry;
