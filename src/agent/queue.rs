//! Bounded FIFO command queue between producers and the agent loop

use super::command::Command;
use crate::config::EnqueuePolicy;
use crate::error::{AgentError, AgentResult};
use crate::observability::metrics::metrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tracing::debug;

/// Producer side of the queue; cheap to clone
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
    depth: Arc<AtomicUsize>,
    policy: EnqueuePolicy,
    block_for: Duration,
}

/// Consumer side, owned by the agent loop
pub struct CommandQueue {
    rx: mpsc::Receiver<Command>,
    depth: Arc<AtomicUsize>,
}

/// Result of waiting on the queue
#[derive(Debug)]
pub enum Dequeued {
    Command(Command),
    TimedOut,
    /// Every sender is gone
    Closed,
}

/// Create a queue holding at most `capacity` commands
pub fn command_queue(
    capacity: usize,
    policy: EnqueuePolicy,
    block_for: Duration,
) -> (CommandSender, CommandQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let depth = Arc::new(AtomicUsize::new(0));

    (
        CommandSender {
            tx,
            depth: depth.clone(),
            policy,
            block_for,
        },
        CommandQueue { rx, depth },
    )
}

impl CommandSender {
    /// Enqueue without waiting, whatever the configured policy
    pub fn try_enqueue(&self, command: Command) -> AgentResult<()> {
        let kind = command.kind();
        self.depth.fetch_add(1, Ordering::SeqCst);

        match self.tx.try_send(command) {
            Ok(()) => {
                metrics().command_enqueued();
                Ok(())
            }
            Err(error) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                metrics().command_rejected();
                debug!(command = %kind, "Command rejected");
                Err(match error {
                    TrySendError::Full(_) => AgentError::QueueFull,
                    TrySendError::Closed(_) => AgentError::AgentStopped,
                })
            }
        }
    }

    /// Enqueue according to the configured policy
    pub async fn enqueue(&self, command: Command) -> AgentResult<()> {
        match self.policy {
            EnqueuePolicy::FailFast => self.try_enqueue(command),
            EnqueuePolicy::Block => self.enqueue_blocking(command).await,
        }
    }

    async fn enqueue_blocking(&self, command: Command) -> AgentResult<()> {
        let kind = command.kind();
        self.depth.fetch_add(1, Ordering::SeqCst);

        match self.tx.send_timeout(command, self.block_for).await {
            Ok(()) => {
                metrics().command_enqueued();
                Ok(())
            }
            Err(error) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                metrics().command_rejected();
                debug!(command = %kind, "Command rejected after waiting for room");
                Err(match error {
                    SendTimeoutError::Timeout(_) => AgentError::QueueFull,
                    SendTimeoutError::Closed(_) => AgentError::AgentStopped,
                })
            }
        }
    }

    /// Commands accepted but not yet taken by the loop
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl CommandQueue {
    /// Wait up to `wait` for the next command
    pub async fn dequeue(&mut self, wait: Duration) -> Dequeued {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(command)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Dequeued::Command(command)
            }
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::TimedOut,
        }
    }

    /// Take the next command if one is ready
    pub fn try_dequeue(&mut self) -> Option<Command> {
        let command = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(command)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::command::Operation;
    use crate::connection::ConnectionHandle;
    use crate::protocol::{PublishInfo, QoS};
    use proptest::prelude::*;

    fn publish_command(n: u16) -> Command {
        Command::execute(
            ConnectionHandle::new(0),
            Operation::Publish(PublishInfo::new(format!("seq/{n}"), QoS::AtMostOnce, "")),
            None,
        )
    }

    fn topic_of(command: Command) -> String {
        match command {
            Command::Execute {
                operation: Operation::Publish(publish),
                ..
            } => publish.topic,
            other => panic!("unexpected command {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn dequeue_order_equals_enqueue_order(count in 1u16..40) {
            let (sender, mut queue) =
                command_queue(64, EnqueuePolicy::FailFast, Duration::from_millis(10));

            for n in 0..count {
                prop_assert!(sender.try_enqueue(publish_command(n)).is_ok());
            }
            prop_assert_eq!(sender.depth(), usize::from(count));

            for n in 0..count {
                let command = queue.try_dequeue().expect("command should be queued");
                prop_assert_eq!(topic_of(command), format!("seq/{n}"));
            }
            prop_assert_eq!(queue.depth(), 0);
        }
    }

    #[test]
    fn test_full_queue_rejects_and_is_unchanged() {
        let (sender, mut queue) = command_queue(3, EnqueuePolicy::FailFast, Duration::ZERO);
        for n in 0..3 {
            sender.try_enqueue(publish_command(n)).unwrap();
        }

        let result = sender.try_enqueue(publish_command(99));
        assert!(matches!(result, Err(AgentError::QueueFull)));
        assert_eq!(sender.depth(), 3);

        let topics: Vec<String> = std::iter::from_fn(|| queue.try_dequeue())
            .map(topic_of)
            .collect();
        assert_eq!(topics, vec!["seq/0", "seq/1", "seq/2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_times_out() {
        let (_sender, mut queue) = command_queue(3, EnqueuePolicy::FailFast, Duration::ZERO);

        let result = queue.dequeue(Duration::from_millis(50)).await;
        assert!(matches!(result, Dequeued::TimedOut));
    }

    #[tokio::test]
    async fn test_dequeue_reports_closed_queue() {
        let (sender, mut queue) = command_queue(3, EnqueuePolicy::FailFast, Duration::ZERO);
        drop(sender);

        let result = queue.dequeue(Duration::from_millis(50)).await;
        assert!(matches!(result, Dequeued::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_policy_waits_for_room() {
        let (sender, mut queue) = command_queue(1, EnqueuePolicy::Block, Duration::from_millis(100));
        sender.enqueue(publish_command(0)).await.unwrap();

        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let first = queue.dequeue(Duration::from_millis(10)).await;
            (first, queue)
        });

        sender.enqueue(publish_command(1)).await.unwrap();
        let (first, mut queue) = consumer.await.unwrap();
        assert!(matches!(first, Dequeued::Command(_)));
        assert_eq!(topic_of(queue.try_dequeue().unwrap()), "seq/1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_policy_gives_up() {
        let (sender, _queue) = command_queue(1, EnqueuePolicy::Block, Duration::from_millis(100));
        sender.enqueue(publish_command(0)).await.unwrap();

        let result = sender.enqueue(publish_command(1)).await;
        assert!(matches!(result, Err(AgentError::QueueFull)));
        assert_eq!(sender.depth(), 1);
    }

    #[test]
    fn test_closed_queue_reports_stopped() {
        let (sender, queue) = command_queue(1, EnqueuePolicy::FailFast, Duration::ZERO);
        drop(queue);

        assert!(matches!(
            sender.try_enqueue(publish_command(0)),
            Err(AgentError::AgentStopped)
        ));
        assert!(sender.is_closed());
    }
}
