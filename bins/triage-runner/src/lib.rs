pub mod classifier;
pub mod config;
pub mod discovery;
pub mod runner;
pub mod scheduler;
