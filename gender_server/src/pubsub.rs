//! Named broadcast channels between the data socket and HTTP streams.
use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};

pub type BytesSender = broadcast::Sender<Bytes>;
pub type BytesReceiver = broadcast::Receiver<Bytes>;

/// Frames buffered per channel before slow listeners start lagging.
const CHANNEL_CAPACITY: usize = 20;

/// Channel name of the annotated stream belonging to camera `name`.
pub fn gender_channel(name: &str) -> String {
    format!("gender_{name}")
}

#[derive(Default)]
pub struct NamedPubSub {
    map: Mutex<HashMap<String, BytesSender>>,
}

impl NamedPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_broadcast_sender(&self, name: &str) -> BytesSender {
        let mut map = self.map.lock().await;
        map.entry(name.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub async fn get_broadcast_receiver(&self, name: &str) -> BytesReceiver {
        let mut map = self.map.lock().await;
        match map.get(name) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
                map.insert(name.to_owned(), tx);
                rx
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn sender_reaches_named_receiver() {
        let pubsub = NamedPubSub::new();
        let mut rx = pubsub.get_broadcast_receiver("cam").await;
        let mut other = pubsub.get_broadcast_receiver("other").await;

        let tx = pubsub.get_broadcast_sender("cam").await;
        tx.send(Bytes::from_static(b"frame")).unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn gender_channel_is_separate() {
        let pubsub = NamedPubSub::new();
        let mut raw = pubsub.get_broadcast_receiver("cam").await;
        let mut annotated = pubsub.get_broadcast_receiver(&gender_channel("cam")).await;

        let tx = pubsub.get_broadcast_sender(&gender_channel("cam")).await;
        tx.send(Bytes::from_static(b"annotated")).unwrap();

        assert!(raw.try_recv().is_err());
        assert_eq!(annotated.recv().await.unwrap(), Bytes::from_static(b"annotated"));
    }
}
