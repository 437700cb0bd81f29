//! `ideafit`: session control and a terminal front end for an external
//! symbolic-regression search engine.
//!
//! The engine proposes and scores candidate expressions; this crate owns the
//! lifecycle of one long-running fitting job (start, cooperative stop,
//! watchdog, consistent snapshots for a polling UI) and the presentation.

pub mod analysis;
pub mod core;
pub mod engine;
pub mod interface;
pub mod session;
