//! Common types and errors for the Agora execution services.

pub mod error;
pub mod result;
pub mod strategy_type;
pub mod submission;

pub use error::{JudgeError, JudgeResult};
pub use result::*;
pub use strategy_type::ExecutionStrategyType;
pub use submission::*;
