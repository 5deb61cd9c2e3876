// HTTP surface: axum routes over the session store and orchestrator.

pub mod handler;
