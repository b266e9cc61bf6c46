//! Client side of the signaling channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, info, warn};
use vrcast_common::{Error, Inbound, RelayNotice, Result, SignalMessage};

const INBOUND_CAPACITY: usize = 64;

/// Everything the relay can hand a client, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Signal(SignalMessage),
    Notice(RelayNotice),
    /// The transport is gone. Always the last event.
    Closed,
}

enum Outgoing {
    Signal(SignalMessage),
    Close,
}

/// Sending half of a signaling channel. Cheap to clone.
///
/// Inbound traffic arrives on the receiver returned next to it.
#[derive(Clone)]
pub struct SignalingChannel {
    outbox: mpsc::UnboundedSender<Outgoing>,
    closed: Arc<AtomicBool>,
}

impl SignalingChannel {
    /// Connects to the relay at `url` (`ws://` or `wss://`).
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<ChannelEvent>)> {
        let (ws_stream, _) = connect_async(url).await.map_err(Error::transport)?;
        info!("connected to signaling relay: {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (reader_done_tx, mut reader_done_rx) = oneshot::channel::<()>();
        let closed = Arc::new(AtomicBool::new(false));

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                let outgoing = tokio::select! {
                    outgoing = outbox_rx.recv() => outgoing,
                    _ = &mut reader_done_rx => None,
                };
                let Some(outgoing) = outgoing else { break };

                let msg = match outgoing {
                    Outgoing::Signal(msg) => msg,
                    Outgoing::Close => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break;
                    }
                };
                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("failed to encode {} message: {}", msg.event_name(), err);
                        continue;
                    }
                };
                if let Err(err) = write.send(WsMessage::Text(text)).await {
                    error!("failed to send signaling message: {}", err);
                    break;
                }
            }
            writer_closed.store(true, Ordering::SeqCst);
        });

        let reader_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        let event = match Inbound::decode(&text) {
                            Ok(Inbound::Signal(signal)) => ChannelEvent::Signal(signal),
                            Ok(Inbound::Notice(notice)) => ChannelEvent::Notice(notice),
                            Err(err) => {
                                warn!("discarding signaling frame: {}", err);
                                continue;
                            }
                        };
                        if inbound_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("signaling websocket error: {}", err);
                        break;
                    }
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            drop(reader_done_tx);
            let _ = inbound_tx.send(ChannelEvent::Closed).await;
            debug!("signaling reader stopped");
        });

        Ok((Self { outbox, closed }, inbound_rx))
    }

    /// A channel whose outgoing messages land on the returned receiver. No network.
    pub fn in_memory() -> (Self, mpsc::UnboundedReceiver<SignalMessage>) {
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let task_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(Outgoing::Signal(msg)) = outbox_rx.recv().await {
                if sent_tx.send(msg).is_err() {
                    break;
                }
            }
            task_closed.store(true, Ordering::SeqCst);
        });

        (Self { outbox, closed }, sent_rx)
    }

    /// Two channels wired to each other, as if joined to the same paired session.
    ///
    /// Closing one side delivers `peer-left` to the other.
    pub fn pair() -> (
        (Self, mpsc::Receiver<ChannelEvent>),
        (Self, mpsc::Receiver<ChannelEvent>),
    ) {
        let (a_in_tx, a_in_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (b_in_tx, b_in_rx) = mpsc::channel(INBOUND_CAPACITY);
        let a = Self::bridged(a_in_tx.clone(), b_in_tx.clone());
        let b = Self::bridged(b_in_tx, a_in_tx);
        ((a, a_in_rx), (b, b_in_rx))
    }

    fn bridged(own: mpsc::Sender<ChannelEvent>, peer: mpsc::Sender<ChannelEvent>) -> Self {
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Outgoing>();
        let closed = Arc::new(AtomicBool::new(false));

        let task_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(Outgoing::Signal(msg)) = outbox_rx.recv().await {
                if peer.send(ChannelEvent::Signal(msg)).await.is_err() {
                    break;
                }
            }
            task_closed.store(true, Ordering::SeqCst);
            let _ = peer.send(ChannelEvent::Notice(RelayNotice::PeerLeft)).await;
            let _ = own.send(ChannelEvent::Closed).await;
        });

        Self { outbox, closed }
    }

    /// Queues `message` for the relay. Fire-and-forget: success means queued, not delivered.
    pub fn send(&self, message: &SignalMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        self.outbox
            .send(Outgoing::Signal(message.clone()))
            .map_err(|_| Error::ChannelClosed)
    }

    /// Closes the channel. Later sends fail with [`Error::ChannelClosed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.outbox.send(Outgoing::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.outbox.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrcast_common::SessionDescription;

    fn offer() -> SignalMessage {
        SignalMessage::Offer(SessionDescription::offer("o1"))
    }

    #[tokio::test]
    async fn test_in_memory_send_and_close() {
        let (channel, mut sent) = SignalingChannel::in_memory();
        channel.send(&offer()).unwrap();
        assert_eq!(sent.recv().await, Some(offer()));

        channel.close();
        assert!(matches!(channel.send(&offer()), Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_clones_share_closed_state() {
        let (channel, _sent) = SignalingChannel::in_memory();
        let clone = channel.clone();
        channel.close();
        assert!(clone.is_closed());
        assert!(matches!(clone.send(&offer()), Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_pair_delivers_in_order_and_reports_peer_left() {
        let ((a, mut a_rx), (b, mut b_rx)) = SignalingChannel::pair();
        for n in 0..3 {
            a.send(&SignalMessage::Offer(SessionDescription::offer(format!("o{n}"))))
                .unwrap();
        }
        for n in 0..3 {
            assert_eq!(
                b_rx.recv().await,
                Some(ChannelEvent::Signal(SignalMessage::Offer(
                    SessionDescription::offer(format!("o{n}"))
                )))
            );
        }

        a.close();
        assert_eq!(
            b_rx.recv().await,
            Some(ChannelEvent::Notice(RelayNotice::PeerLeft))
        );
        assert_eq!(a_rx.recv().await, Some(ChannelEvent::Closed));
        assert!(matches!(a.send(&offer()), Err(Error::ChannelClosed)));
        assert!(b.send(&offer()).is_ok());
    }
}
