pub mod cli;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod export;
pub mod inputs;
pub mod models;
pub mod orchestrator;
pub mod postprocess;
pub mod report;
pub mod util;
