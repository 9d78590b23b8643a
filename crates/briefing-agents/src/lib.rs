//! Weekly intelligence pipeline: everything that talks to the outside world.
//!
//! The deterministic pieces (parser, checkpoint store, formatter) live in
//! `briefing_core`; this crate wires them to HTTP fetchers, an
//! OpenAI-compatible model endpoint and the seven-phase orchestrator.

pub mod config;
pub mod consolidator;
pub mod etl;
pub mod generator;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod summary;
pub mod synthesizer;

pub use config::RunConfig;
pub use orchestrator::{PhaseOrchestrator, PhaseServices, RunContext};
pub use summary::RunSummary;
