//! Execution strategies for the Agora judge.
//!
//! A strategy turns an [`ExecutionContext`](context::ExecutionContext) into an
//! [`ExecutionResult`](agora_common::ExecutionResult). Most strategies are a
//! single [`PipelineStrategy`](pipeline::PipelineStrategy) configured with a
//! handful of policies; JSDOM, check-only and database strategies have their
//! own drivers but share the judging helpers.

pub mod check_only;
pub mod checker;
pub mod context;
pub mod factory;
pub mod jsdom;
pub mod pipeline;
pub mod process;
pub mod project;
pub mod registry;
pub mod settings;
pub mod sql;
pub mod unittest;

pub use checker::{Checker, CheckerResult, OutputChecker};
pub use context::ExecutionContext;
pub use factory::StrategyFactory;
pub use pipeline::{ExecutionStrategy, SimpleExecution, TestsExecution};
pub use process::{LocalProcessExecutor, ProcessExecutor, ProcessRequest};
pub use registry::StrategyRegistry;
pub use settings::StrategySettings;
