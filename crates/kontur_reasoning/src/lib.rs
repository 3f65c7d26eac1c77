//! Task orchestration for KONTUR.
//!
//! Turns a goal into a verified outcome: plan each step from recalled
//! solutions and a text generator, execute it through an automation backend
//! under a deadline, replan on failure up to a bounded number of attempts,
//! and feed working solutions back into memory.

pub mod llm;
pub mod orchestrator;
pub mod organ;
pub mod planner;
pub mod prompts;
pub mod providers;
pub mod retry;

pub use llm::{GenerationParams, TextGenerator};
pub use orchestrator::{Orchestrator, TaskOutcome, TaskState, TaskStatus};
pub use organ::TaskOrgan;
pub use providers::{MockGenerator, OpenAiGenerator};
