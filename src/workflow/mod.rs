pub mod fallback_invoker;

pub use fallback_invoker::{FallbackInvoker, FallbackSettings};
