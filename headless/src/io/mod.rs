//! Side-effecting adapters: configuration, child processes, git.

pub mod agent;
pub mod config;
pub mod env;
pub mod git;
pub mod process;
