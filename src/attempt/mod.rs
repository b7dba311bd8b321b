// src/attempt/mod.rs

//! Timed practice-test attempts: remaining-time arithmetic, scoring,
//! results review, the attempt service and the abandoned-attempt reaper.

pub mod reaper;
pub mod results;
pub mod scorer;
pub mod service;
pub mod timer;

pub use reaper::run_attempt_reaper;
pub use results::{AttemptResults, ReviewFilter, ReviewItem};
pub use service::AttemptService;
