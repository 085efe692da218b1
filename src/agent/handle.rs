//! Producer-facing handle to a running agent
//!
//! Every method returns as soon as the command is accepted or rejected. The
//! outcome of an accepted command arrives later through its completion
//! callback, exactly once, unless the loop terminates before reaching it.

use super::command::{Command, CommandCallback, Operation};
use super::queue::CommandSender;
use crate::connection::{ConnectionHandle, PublishCallback};
use crate::error::{AgentError, AgentResult};
use crate::protocol::{ConnectInfo, PublishInfo, SubscribeInfo};
use std::time::Duration;
use tokio::sync::oneshot;

/// Cloneable producer handle
#[derive(Clone)]
pub struct AgentHandle {
    sender: CommandSender,
}

impl AgentHandle {
    pub(crate) fn new(sender: CommandSender) -> Self {
        Self { sender }
    }

    pub async fn subscribe(
        &self,
        handle: ConnectionHandle,
        subscription: SubscribeInfo,
        on_publish: PublishCallback,
        callback: Option<CommandCallback>,
    ) -> AgentResult<()> {
        self.execute(
            handle,
            Operation::Subscribe {
                subscription,
                callback: on_publish,
            },
            callback,
        )
        .await
    }

    pub async fn unsubscribe<S: Into<String>>(
        &self,
        handle: ConnectionHandle,
        filter: S,
        callback: Option<CommandCallback>,
    ) -> AgentResult<()> {
        self.execute(
            handle,
            Operation::Unsubscribe {
                filter: filter.into(),
            },
            callback,
        )
        .await
    }

    pub async fn publish(
        &self,
        handle: ConnectionHandle,
        publish: PublishInfo,
        callback: Option<CommandCallback>,
    ) -> AgentResult<()> {
        self.execute(handle, Operation::Publish(publish), callback)
            .await
    }

    /// Start servicing a connection; `None` uses the configured timeout
    pub async fn process_loop(
        &self,
        handle: ConnectionHandle,
        timeout: Option<Duration>,
        callback: Option<CommandCallback>,
    ) -> AgentResult<()> {
        self.execute(handle, Operation::ProcessLoop { timeout }, callback)
            .await
    }

    pub async fn ping(
        &self,
        handle: ConnectionHandle,
        callback: Option<CommandCallback>,
    ) -> AgentResult<()> {
        self.execute(handle, Operation::Ping, callback).await
    }

    pub async fn disconnect(
        &self,
        handle: ConnectionHandle,
        callback: Option<CommandCallback>,
    ) -> AgentResult<()> {
        self.execute(handle, Operation::Disconnect, callback).await
    }

    /// Release a connection slot. Must be the last command for `handle`.
    pub async fn free(
        &self,
        handle: ConnectionHandle,
        callback: Option<CommandCallback>,
    ) -> AgentResult<()> {
        self.execute(handle, Operation::Free, callback).await
    }

    /// Stop the loop once every command queued ahead of this one has run
    pub async fn terminate(&self) -> AgentResult<()> {
        self.sender.enqueue(Command::Terminate).await
    }

    /// Connect through the queue while the loop is running.
    ///
    /// Resolves with the broker's session-present flag once the connection and
    /// session resumption have completed.
    pub async fn connect(
        &self,
        handle: ConnectionHandle,
        info: ConnectInfo,
        will: Option<PublishInfo>,
        timeout: Duration,
    ) -> AgentResult<bool> {
        let (reply, response) = oneshot::channel();
        self.sender
            .enqueue(Command::Connect {
                handle,
                info,
                will,
                timeout,
                reply,
            })
            .await?;

        response.await.map_err(|_| AgentError::AgentStopped)?
    }

    /// Enqueue a prepared command without waiting for room
    pub fn try_enqueue(&self, command: Command) -> AgentResult<()> {
        self.sender.try_enqueue(command)
    }

    /// Commands accepted but not yet dequeued
    pub fn queue_depth(&self) -> usize {
        self.sender.depth()
    }

    async fn execute(
        &self,
        handle: ConnectionHandle,
        operation: Operation,
        callback: Option<CommandCallback>,
    ) -> AgentResult<()> {
        self.sender
            .enqueue(Command::execute(handle, operation, callback))
            .await
    }
}
