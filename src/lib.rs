//! # Agent Runtime
//!
//! Resilient task-execution core for an automation agent.
//!
//! This library provides:
//! - Complexity analysis of free-text tasks, with an optional LLM classifier
//! - Pattern-based decomposition into dependency-ordered subtask batches
//! - Circuit breakers and retries around every external call
//! - Validation and compression of tool results
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │           TaskPipeline           │
//!        │  (analyze → schedule → execute)  │
//!        └───────┬──────────────────┬───────┘
//!                │                  │
//!                ▼                  ▼
//!    ┌────────────────────┐  ┌─────────────────┐
//!    │ ComplexityAnalyzer │  │   ToolInvoker   │
//!    │  + LLM refiner     │  │  (per subtask)  │
//!    └─────────┬──────────┘  └────────┬────────┘
//!              │                      │
//!              ▼                      ▼
//!    ┌────────────────────────────────────────┐
//!    │  BreakerRegistry + execute_with_retry  │
//!    └────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//! - `agents`: task pipeline and LLM complexity refiner
//! - `resilience`: error classifier, circuit breakers, retry executor
//! - `task`: complexity analysis, decomposition and scheduling
//! - `tools`: tool result contract, validation and compression
//! - `llm`: chat-completion client (OpenRouter)
//! - `config`: environment configuration

pub mod agents;
pub mod config;
pub mod llm;
pub mod resilience;
pub mod task;
pub mod tools;

pub use agents::{PipelineOptions, PipelineReport, TaskPipeline};
pub use config::Config;
pub use resilience::{BreakerRegistry, CircuitBreaker, RetryConfig};
pub use task::{ComplexityAnalysis, ComplexityAnalyzer, Subtask};
