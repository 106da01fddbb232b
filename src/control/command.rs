use crate::observation::TargetDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Inbound message as received from the messaging layer, tagged by its `message` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "lowercase")]
pub enum ControlCommand {
    /// Registers new targets. Duplicate names are rejected one by one.
    Add { targets: Vec<TargetDescriptor> },
    /// Replaces registered targets, dropping their progress.
    Modify { targets: Vec<TargetDescriptor> },
    /// Removes targets by name. Only `target` is read.
    Remove { targets: Vec<TargetDescriptor> },
    /// Parks, runs housekeeping and exits.
    Shutdown,
}

impl ControlCommand {
    /// Decodes one message line.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> { serde_json::from_str(raw) }

    /// Value of the `message` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlCommand::Add { .. } => "add",
            ControlCommand::Modify { .. } => "modify",
            ControlCommand::Remove { .. } => "remove",
            ControlCommand::Shutdown => "shutdown",
        }
    }
}

/// Sending side of the command queue, held by the messaging layer.
pub type CommandSender = mpsc::UnboundedSender<ControlCommand>;

/// Receiving side of the command queue plus commands picked up early during waits.
pub(crate) struct CommandInbox {
    rx: mpsc::UnboundedReceiver<ControlCommand>,
    deferred: VecDeque<ControlCommand>,
}

impl CommandInbox {
    pub(crate) fn new() -> (CommandInbox, CommandSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx, deferred: VecDeque::new() }, tx)
    }

    /// Waits for the next command and keeps it for the next boundary.
    /// Resolves to `false` once every sender is gone.
    pub(crate) async fn wait_and_defer(&mut self) -> bool {
        match self.rx.recv().await {
            Some(cmd) => {
                self.deferred.push_back(cmd);
                true
            }
            None => false,
        }
    }

    /// Everything queued so far, in arrival order.
    pub(crate) fn drain(&mut self) -> Vec<ControlCommand> {
        let mut commands: Vec<ControlCommand> = self.deferred.drain(..).collect();
        while let Ok(cmd) = self.rx.try_recv() {
            commands.push(cmd);
        }
        commands
    }
}
