//! CLI module for taskmgr - command-line interface and subcommands.
//!
//! Hosts an in-process scheduler with the built-in tasks and drives it through
//! the same client facade a remote caller would use.

pub mod commands;

pub use commands::Cli;
