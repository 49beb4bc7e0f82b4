// Library crate - exports the analysis engine and its persistence helper

pub mod bars;
pub mod config;
pub mod error;
pub mod analysis;
pub mod state_store;

// Re-export commonly used types
pub use analysis::{analyze, AnalysisInput, AnalysisOutcome, AnalysisReport, EngineState};
pub use bars::{Bar, Timeframe};
pub use config::EngineConfig;
pub use error::{Degradation, EngineError, EngineResult};
pub use state_store::StateStore;
