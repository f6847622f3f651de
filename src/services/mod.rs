pub mod classifier;
pub mod cooldown_tracker;
pub mod llm_service;
pub mod rate_limiter;
pub mod scripted_backend;

pub use cooldown_tracker::{cooldown_for, Availability, CooldownTracker, ThrottleSummary, TrackerStats};
pub use llm_service::{InferenceBackend, LlmService};
pub use rate_limiter::{RateLimiter, RateUsage};
pub use scripted_backend::ScriptedBackend;
