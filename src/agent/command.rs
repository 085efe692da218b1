//! Commands carried from producers to the agent loop

use crate::connection::{ConnectionHandle, PublishCallback};
use crate::error::AgentResult;
use crate::protocol::{ConnectInfo, PublishInfo, SubscribeInfo};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

/// Invoked exactly once with the outcome of a dequeued command
pub type CommandCallback = Box<dyn FnOnce(AgentResult<()>) + Send>;

/// Box a closure as an optional completion callback
pub fn on_complete<F>(callback: F) -> Option<CommandCallback>
where
    F: FnOnce(AgentResult<()>) + Send + 'static,
{
    Some(Box::new(callback))
}

/// Completion callback paired with a receiver that resolves when it fires
pub fn completion_channel() -> (Option<CommandCallback>, oneshot::Receiver<AgentResult<()>>) {
    let (tx, rx) = oneshot::channel();
    let callback = on_complete(move |result| {
        // Receiver may have been dropped by a caller that stopped waiting
        let _ = tx.send(result);
    });
    (callback, rx)
}

/// Operation executed against one connection
pub enum Operation {
    Subscribe {
        subscription: SubscribeInfo,
        callback: PublishCallback,
    },
    Unsubscribe {
        filter: String,
    },
    Publish(PublishInfo),
    /// Service the connection and keep servicing it until disconnected.
    /// `None` uses the configured default timeout.
    ProcessLoop {
        timeout: Option<Duration>,
    },
    Ping,
    Disconnect,
    Free,
}

/// A queued command
pub enum Command {
    Execute {
        handle: ConnectionHandle,
        operation: Operation,
        callback: Option<CommandCallback>,
    },
    /// CONNECT issued while the loop is running
    Connect {
        handle: ConnectionHandle,
        info: ConnectInfo,
        will: Option<PublishInfo>,
        timeout: Duration,
        reply: oneshot::Sender<AgentResult<bool>>,
    },
    Terminate,
}

/// Discriminant of a command, used for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Connect,
    Subscribe,
    Unsubscribe,
    Publish,
    ProcessLoop,
    Ping,
    Disconnect,
    Free,
    Terminate,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Connect => "connect",
            CommandKind::Subscribe => "subscribe",
            CommandKind::Unsubscribe => "unsubscribe",
            CommandKind::Publish => "publish",
            CommandKind::ProcessLoop => "process_loop",
            CommandKind::Ping => "ping",
            CommandKind::Disconnect => "disconnect",
            CommandKind::Free => "free",
            CommandKind::Terminate => "terminate",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    pub fn kind(&self) -> CommandKind {
        match self {
            Operation::Subscribe { .. } => CommandKind::Subscribe,
            Operation::Unsubscribe { .. } => CommandKind::Unsubscribe,
            Operation::Publish(_) => CommandKind::Publish,
            Operation::ProcessLoop { .. } => CommandKind::ProcessLoop,
            Operation::Ping => CommandKind::Ping,
            Operation::Disconnect => CommandKind::Disconnect,
            Operation::Free => CommandKind::Free,
        }
    }
}

impl Command {
    pub fn execute(
        handle: ConnectionHandle,
        operation: Operation,
        callback: Option<CommandCallback>,
    ) -> Self {
        Command::Execute {
            handle,
            operation,
            callback,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Execute { operation, .. } => operation.kind(),
            Command::Connect { .. } => CommandKind::Connect,
            Command::Terminate => CommandKind::Terminate,
        }
    }

    /// Target connection, `None` for TERMINATE
    pub fn handle(&self) -> Option<ConnectionHandle> {
        match self {
            Command::Execute { handle, .. } | Command::Connect { handle, .. } => Some(*handle),
            Command::Terminate => None,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind())
            .field("handle", &self.handle())
            .finish_non_exhaustive()
    }
}
