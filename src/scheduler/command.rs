//! Control commands queued by running steps
//!
//! Steps never touch scheduler state directly; they push commands that the
//! tick loop applies at the start of its next tick.

use tokio::sync::mpsc;

use crate::params::ParameterSet;

/// Deferred control request
#[derive(Debug, Clone)]
pub enum Command {
    Start {
        name: String,
        auto_restart: bool,
        period: f64,
        params: ParameterSet,
    },
    Stop {
        name: String,
    },
}

pub type CommandSender = mpsc::UnboundedSender<Command>;
pub type CommandReceiver = mpsc::UnboundedReceiver<Command>;

pub(crate) fn command_channel() -> (CommandSender, CommandReceiver) {
    mpsc::unbounded_channel()
}
