use crate::scenario_interface::ControlCommand;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default inbox depth; commands beyond it wait at the producer.
pub const CONTROL_CAPACITY: usize = 32;

/// Producer half, held by whatever reads the observer connection.
pub type ControlSender = mpsc::Sender<ControlCommand>;

/// Operator command inbox polled once per simulation step.
///
/// Dropping every [`ControlSender`] closes the channel, which the streamer
/// treats as a stop request.
#[derive(Debug)]
pub struct ControlChannel {
    receiver: mpsc::Receiver<ControlCommand>,
    closed: bool,
}

impl ControlChannel {
    pub fn new(receiver: mpsc::Receiver<ControlCommand>) -> Self {
        Self {
            receiver,
            closed: false,
        }
    }

    pub fn pair(capacity: usize) -> (ControlSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// Waits at most `timeout` for one command. Timeout is not an error.
    pub async fn try_receive(&mut self, timeout: Duration) -> Option<ControlCommand> {
        if self.closed {
            return None;
        }
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(command)) => Some(command),
            Ok(None) => {
                self.closed = true;
                None
            }
            Err(_) => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_command_is_returned() {
        let (tx, mut channel) = ControlChannel::pair(4);
        tx.send(ControlCommand::new("blockMotorwayLinks", true))
            .await
            .unwrap();
        let command = channel.try_receive(Duration::from_millis(10)).await;
        assert_eq!(command.map(|c| c.key), Some("blockMotorwayLinks".to_string()));
        assert!(!channel.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_inbox_times_out_quietly() {
        let (_tx, mut channel) = ControlChannel::pair(4);
        assert!(channel.try_receive(Duration::from_millis(100)).await.is_none());
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn dropped_sender_marks_channel_closed() {
        let (tx, mut channel) = ControlChannel::pair(4);
        tx.send(ControlCommand::new("blockMotorwayLinks", false))
            .await
            .unwrap();
        drop(tx);
        assert!(channel.try_receive(Duration::from_millis(10)).await.is_some());
        assert!(channel.try_receive(Duration::from_millis(10)).await.is_none());
        assert!(channel.is_closed());
    }
}
