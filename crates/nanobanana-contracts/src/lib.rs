//! Plain data shared by the NanoBanana engine and CLI: generation options and
//! their tag tables, prompt composition, artifact naming and the run event log.

pub mod artifacts;
pub mod events;
pub mod options;
pub mod prompt;
