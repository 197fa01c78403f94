//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - tasks: list registered tasks
//! - run: run the scheduler until Ctrl-C
//! - demo: start the wait task and watch it time out

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskmgr::{ParamValue, ParameterSet};

/// taskmgr - cooperative task scheduler
#[derive(Parser, Debug)]
#[command(name = "taskmgr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered tasks
    Tasks,

    /// Run the scheduler until Ctrl-C
    Run {
        /// Task to start once the scheduler is up
        #[arg(short, long)]
        start: Option<String>,

        /// Step period in seconds for the started task
        #[arg(short, long, default_value_t = 0.5)]
        period: f64,

        /// Restart the task each time it completes
        #[arg(short, long)]
        auto_restart: bool,

        /// Task parameter as name=value (repeatable)
        #[arg(short = 'P', long = "param", value_parser = parse_param)]
        params: Vec<(String, ParamValue)>,
    },

    /// Start Test with a 5 second timeout and poll its status for 8 seconds
    Demo,
}

impl Commands {
    /// Collect `--param` pairs into a parameter set
    pub fn param_set(params: &[(String, ParamValue)]) -> ParameterSet {
        params.iter().cloned().collect()
    }
}

/// Parse `name=value`, reading the value as bool, then number, then text
pub fn parse_param(s: &str) -> Result<(String, ParamValue), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty parameter name in '{}'", s));
    }
    let raw = raw.trim();
    let value = if let Ok(b) = raw.parse::<bool>() {
        ParamValue::Bool(b)
    } else if let Ok(n) = raw.parse::<f64>() {
        ParamValue::Number(n)
    } else {
        ParamValue::Text(raw.to_string())
    };
    Ok((name.to_string(), value))
}
