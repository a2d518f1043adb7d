pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod lifecycle;
pub mod llm;
pub mod registry;
pub mod scheduler;
pub mod search;
pub mod store;
pub mod terminal;
pub mod vault;
