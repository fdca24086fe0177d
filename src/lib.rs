pub mod core;
pub mod main_module;
pub mod pipeline;

pub use crate::core::config::AppConfig;
pub use crate::main_module::{build_router, init_app_state, run_server};
pub use crate::pipeline::{PipelineEngine, PipelineError};
