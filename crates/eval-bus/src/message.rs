use bytes::Bytes;

/// A message observed on a subscribed channel.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Bytes,
}

/// A live subscription: a stream of messages published to one channel,
/// closed when the Bus implementation's background forwarder exits.
pub struct Subscription {
    pub(crate) receiver: tokio::sync::mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}
