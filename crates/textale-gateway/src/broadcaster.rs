use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use textale_types::{ChannelName, Message};

use crate::error::{Error, Result};

/// Smallest per-subscriber buffer handed out, whatever the caller asks for.
pub const MIN_SUBSCRIBER_BUFFER: usize = 32;

/// Live fan-out of freshly appended messages, one topic per channel.
///
/// Each subscriber owns a bounded queue. Publishing never waits on a slow
/// subscriber: when its queue is full the message is dropped for that
/// subscriber only and everyone else still gets it.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

struct BroadcasterInner {
    /// live topic name -> subscribers of that channel
    topics: RwLock<HashMap<String, Arc<Mutex<Topic>>>>,

    /// Per-subscriber queue capacity
    buffer: usize,

    /// Cleared by `shutdown`; publish/subscribe fail afterwards
    open: AtomicBool,
}

#[derive(Default)]
struct Topic {
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    dropped: u64,
}

impl Subscriber {
    fn is_gone(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

impl BroadcasterInner {
    /// Sweep departed subscribers from `topic` and forget it once empty.
    ///
    /// Lock order is map then topic, the same as `subscribe`, so a topic is
    /// never removed between a subscriber finding it and registering in it.
    async fn prune(&self, topic: &str) {
        let mut topics = self.topics.write().await;
        let empty = match topics.get(topic) {
            Some(entry) => {
                let mut entry = entry.lock().await;
                entry.subscribers.retain(|s| !s.is_gone());
                entry.subscribers.is_empty()
            }
            None => false,
        };
        if empty {
            topics.remove(topic);
            debug!("Topic {} has no subscribers left, removed", topic);
        }
    }

    /// Non-blocking `prune`. Returns false if either lock was contended.
    fn try_prune(&self, topic: &str) -> bool {
        let Ok(mut topics) = self.topics.try_write() else {
            return false;
        };
        let empty = match topics.get(topic) {
            Some(entry) => {
                let Ok(mut entry) = entry.try_lock() else {
                    return false;
                };
                entry.subscribers.retain(|s| !s.is_gone());
                entry.subscribers.is_empty()
            }
            None => return true,
        };
        if empty {
            topics.remove(topic);
        }
        true
    }

    /// Called when a subscription goes away outside an async context.
    fn release(self: Arc<Self>, topic: String) {
        if self.try_prune(&topic) {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { self.prune(&topic).await });
        }
    }
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                topics: RwLock::new(HashMap::new()),
                buffer: buffer.max(MIN_SUBSCRIBER_BUFFER),
                open: AtomicBool::new(true),
            }),
        }
    }

    pub fn buffer(&self) -> usize {
        self.inner.buffer
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::BrokerUnavailable("broadcaster has shut down".into()))
        }
    }

    /// Open a live feed for `channel`. The returned subscription yields every
    /// message published after this call returns; the handle stops it.
    pub async fn subscribe(&self, channel: &ChannelName) -> Result<(Subscription, CancelHandle)> {
        self.ensure_open()?;

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let cancel = CancellationToken::new();

        let topic_name = channel.live_topic();
        {
            let mut topics = self.inner.topics.write().await;
            // Re-check under the lock so a concurrent shutdown can't leave
            // an orphaned subscriber behind
            self.ensure_open()?;
            let topic = topics.entry(topic_name.clone()).or_default();
            topic.lock().await.subscribers.push(Subscriber {
                id,
                tx,
                cancel: cancel.clone(),
                dropped: 0,
            });
        }

        debug!("Subscriber {} joined #{}", id, channel);

        let subscription = Subscription {
            id,
            channel: channel.clone(),
            rx,
            cancel: cancel.clone(),
            broadcaster: Arc::downgrade(&self.inner),
            topic: topic_name,
        };
        Ok((subscription, CancelHandle { cancel }))
    }

    /// Push a message to every active subscriber of `channel`, in the order
    /// publish calls take the topic lock. Returns how many subscribers got it.
    pub async fn publish(&self, channel: &ChannelName, message: &Message) -> Result<usize> {
        self.ensure_open()?;

        let topic_name = channel.live_topic();
        let topic = {
            let topics = self.inner.topics.read().await;
            match topics.get(&topic_name) {
                Some(topic) => topic.clone(),
                None => return Ok(0),
            }
        };

        let mut topic = topic.lock().await;
        topic.subscribers.retain(|s| !s.is_gone());

        let mut delivered = 0;
        for sub in topic.subscribers.iter_mut() {
            match sub.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.dropped += 1;
                    warn!(
                        "Subscriber {} on #{} is full, dropped message ({} dropped so far)",
                        sub.id, channel, sub.dropped
                    );
                }
                // Receiver went away between retain and send; swept next time
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        let empty = topic.subscribers.is_empty();
        drop(topic);
        if empty {
            self.inner.prune(&topic_name).await;
        }

        Ok(delivered)
    }

    /// Number of live subscribers currently attached to `channel`.
    pub async fn subscriber_count(&self, channel: &ChannelName) -> usize {
        let topic = {
            let topics = self.inner.topics.read().await;
            match topics.get(&channel.live_topic()) {
                Some(topic) => topic.clone(),
                None => return 0,
            }
        };
        let topic = topic.lock().await;
        topic.subscribers.iter().filter(|s| !s.is_gone()).count()
    }

    /// Number of channels with at least one registered subscriber entry.
    pub async fn topic_count(&self) -> usize {
        self.inner.topics.read().await.len()
    }

    /// Close every feed and refuse further publish/subscribe calls.
    pub async fn shutdown(&self) {
        self.inner.open.store(false, Ordering::Release);

        let topics: Vec<_> = self.inner.topics.write().await.drain().collect();
        let mut closed = 0;
        for (_, topic) in topics {
            let mut topic = topic.lock().await;
            closed += topic.subscribers.len();
            // Dropping the senders ends every subscriber's stream
            topic.subscribers.clear();
        }

        info!("Broadcaster shut down ({} live feeds closed)", closed);
    }
}

/// One subscriber's live feed.
pub struct Subscription {
    id: Uuid,
    channel: ChannelName,
    rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    broadcaster: Weak<BroadcasterInner>,
    topic: String,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Next message, or `None` once cancelled or once the broadcaster is gone.
    /// Messages still queued at cancellation are discarded.
    pub async fn recv(&mut self) -> Option<Message> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            message = self.rx.recv() => message,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(inner) = self.broadcaster.upgrade() {
            inner.release(std::mem::take(&mut self.topic));
        }
    }
}

/// Stops a subscription. Cloneable; cancelling twice is a no-op.
#[derive(Clone)]
pub struct CancelHandle {
    cancel: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the subscription is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
