// Engine orchestration: sessions, download rounds, background cleanup.

pub mod archive;
pub mod bus;
pub mod orchestrator;
pub mod reaper;
pub mod session;
pub mod stats;
