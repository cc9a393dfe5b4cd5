//! Result artifacts: the staleness-aware store, delimiter extraction for
//! generated text, and read-back reports over a result directory.

pub mod report;
mod store;
pub mod tags;

pub use store::{GenerationRecord, ResultStore, SavedArtifact, render_clean_text};
pub use tags::{MatchPolicy, TagPair};
