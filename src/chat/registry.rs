//! 等待订阅的事件流
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

use crate::pipeline::StreamEvent;

struct PendingStream {
    created_at: Instant,
    receiver: mpsc::UnboundedReceiver<StreamEvent>,
}

/// 以会话标识保存尚未被订阅的事件流。每个流只能被取走一次，超时未订阅的流会被清理。
pub struct StreamRegistry {
    ttl: Duration,
    streams: Mutex<HashMap<String, PendingStream>>,
}

impl StreamRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, session_id: &str, receiver: mpsc::UnboundedReceiver<StreamEvent>) {
        let mut streams = self.streams.lock().await;
        self.purge(&mut streams);
        streams.insert(
            session_id.to_string(),
            PendingStream {
                created_at: Instant::now(),
                receiver,
            },
        );
    }

    pub async fn take(&self, session_id: &str) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        let mut streams = self.streams.lock().await;
        self.purge(&mut streams);
        streams.remove(session_id).map(|s| s.receiver)
    }

    fn purge(&self, streams: &mut HashMap<String, PendingStream>) {
        let before = streams.len();
        streams.retain(|_, s| s.created_at.elapsed() < self.ttl);
        if streams.len() < before {
            tracing::debug!("Purged {} expired streams", before - streams.len());
        }
    }
}
