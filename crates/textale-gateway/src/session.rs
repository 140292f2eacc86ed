use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use textale_types::events::{ClientFrame, ServerFrame};
use textale_types::{ChannelName, Message};

use crate::broadcaster::{CancelHandle, MIN_SUBSCRIBER_BUFFER, Subscription};
use crate::error::{Error, Result};
use crate::services::Services;
use crate::store::DEFAULT_HISTORY_LIMIT;

pub const USERNAME_PROMPT: &str = "Welcome! Please enter your username:";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Channel joined when the client has no remembered channel
    pub default_channel: ChannelName,

    /// History window loaded on every join
    pub history_limit: usize,

    /// Capacity of the queue between the live forwarder and the adapter
    pub delivery_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_channel: ChannelName::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            delivery_buffer: MIN_SUBSCRIBER_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingUsername,
    Active,
    Closed,
}

/// Items the live forwarder queues for the adapter. Tagged with the
/// subscription they came from so deliveries from a feed that has since been
/// replaced are recognisable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Message {
        subscription: Uuid,
        channel: ChannelName,
        message: Message,
    },

    /// The broadcaster ended the feed (shutdown); live updates stopped
    FeedClosed {
        subscription: Uuid,
        channel: ChannelName,
    },
}

/// Everything a session reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A submitted input line
    Input(String),

    Resize { width: u16, height: u16 },

    /// Something pulled off the delivery queue
    Incoming(Delivery),

    Quit,
}

impl From<ClientFrame> for SessionEvent {
    fn from(frame: ClientFrame) -> Self {
        match frame {
            ClientFrame::Line { text } => Self::Input(text),
            ClientFrame::Resize { width, height } => Self::Resize { width, height },
            ClientFrame::Quit => Self::Quit,
        }
    }
}

enum Command<'a> {
    Join(&'a str),
    Channels,
    Quit,
}

impl<'a> Command<'a> {
    /// Slash commands. Anything else, unknown commands included, is a message.
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match head {
            "/join" => Some(Self::Join(rest.trim())),
            "/channels" => Some(Self::Channels),
            "/quit" => Some(Self::Quit),
            _ => None,
        }
    }
}

struct LiveFeed {
    subscription: Uuid,
    cancel: CancelHandle,
    forwarder: JoinHandle<()>,
}

/// Per-client state: username capture, then history + live feed for the
/// current channel, and posting.
///
/// The session lives on the adapter's task. Its live feed is drained by a
/// separate forwarder task into a bounded delivery queue, which the adapter
/// selects on alongside input and hands back through `handle`.
pub struct ChannelSession {
    id: Uuid,
    client_addr: String,
    services: Services,
    config: SessionConfig,
    state: SessionState,
    username: Option<String>,
    channel: ChannelName,
    viewport: (u16, u16),
    feed: Option<LiveFeed>,
    deliveries: mpsc::Sender<Delivery>,
}

impl ChannelSession {
    /// Returns the session and the receiving end of its delivery queue.
    pub fn new(
        services: Services,
        config: SessionConfig,
        client_addr: impl Into<String>,
    ) -> (Self, mpsc::Receiver<Delivery>) {
        let (deliveries, rx) = mpsc::channel(config.delivery_buffer.max(MIN_SUBSCRIBER_BUFFER));
        let session = Self {
            id: Uuid::new_v4(),
            client_addr: client_addr.into(),
            channel: config.default_channel.clone(),
            services,
            config,
            state: SessionState::AwaitingUsername,
            username: None,
            viewport: (0, 0),
            feed: None,
            deliveries,
        };
        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn viewport(&self) -> (u16, u16) {
        self.viewport
    }

    /// Whether a live feed is currently attached.
    pub fn is_live(&self) -> bool {
        self.feed.is_some()
    }

    pub fn greeting(&self) -> Vec<ServerFrame> {
        vec![ServerFrame::Prompt {
            text: USERNAME_PROMPT.to_string(),
        }]
    }

    /// Single dispatch point for every event kind.
    pub async fn handle(&mut self, event: SessionEvent) -> Vec<ServerFrame> {
        match event {
            SessionEvent::Input(line) => self.on_input(&line).await,
            SessionEvent::Resize { width, height } => {
                self.viewport = (width, height);
                Vec::new()
            }
            SessionEvent::Incoming(delivery) => self.on_delivery(delivery),
            SessionEvent::Quit => {
                self.close();
                vec![ServerFrame::Closed]
            }
        }
    }

    async fn on_input(&mut self, line: &str) -> Vec<ServerFrame> {
        let line = line.trim_end_matches(['\r', '\n']);

        match self.state {
            SessionState::Closed => Vec::new(),

            SessionState::AwaitingUsername => {
                let name = line.trim();
                if name.is_empty() {
                    return Vec::new();
                }
                self.username = Some(name.to_string());
                self.state = SessionState::Active;
                info!("Session {} ({}) is now {}", self.id, self.client_addr, name);

                let channel = self.initial_channel().await;
                self.enter(channel).await
            }

            SessionState::Active => {
                if line.trim().is_empty() {
                    return Vec::new();
                }

                match Command::parse(line) {
                    Some(Command::Quit) => {
                        self.close();
                        vec![ServerFrame::Closed]
                    }
                    Some(Command::Join(name)) => match ChannelName::parse(name) {
                        Ok(channel) => self.switch_channel(channel).await.unwrap_or_else(|e| {
                            vec![ServerFrame::Error { text: e.to_string() }]
                        }),
                        Err(e) => vec![ServerFrame::Error {
                            text: format!("can't join {:?}: {}", name, e),
                        }],
                    },
                    Some(Command::Channels) => match self.services.list_channels().await {
                        Ok(names) => vec![ServerFrame::Channels { names }],
                        Err(e) => {
                            warn!("Session {}: channel listing failed: {}", self.id, e);
                            vec![ServerFrame::Error { text: e.to_string() }]
                        }
                    },
                    None => match self.post(line).await {
                        // Our own copy comes back through the live feed
                        Ok(_) => Vec::new(),
                        Err(Error::BrokerUnavailable(reason)) => vec![
                            ServerFrame::Notice {
                                text: "message saved to history, but live delivery is unavailable"
                                    .to_string(),
                            },
                            ServerFrame::Degraded {
                                channel: self.channel.to_string(),
                                reason,
                            },
                        ],
                        Err(e) => {
                            warn!("Session {}: message not sent: {}", self.id, e);
                            vec![ServerFrame::Error {
                                text: format!("message not sent: {}", e),
                            }]
                        }
                    },
                }
            }
        }
    }

    fn on_delivery(&mut self, delivery: Delivery) -> Vec<ServerFrame> {
        if self.state != SessionState::Active {
            return Vec::new();
        }
        let current = self.feed.as_ref().map(|feed| feed.subscription);

        match delivery {
            Delivery::Message {
                subscription,
                channel,
                message,
            } if Some(subscription) == current => vec![ServerFrame::Message {
                channel: channel.to_string(),
                message,
            }],
            Delivery::FeedClosed {
                subscription,
                channel,
            } if Some(subscription) == current => {
                self.feed = None;
                warn!("Session {}: live feed for #{} closed", self.id, channel);
                vec![ServerFrame::Degraded {
                    channel: channel.to_string(),
                    reason: "live updates stopped".to_string(),
                }]
            }
            stale => {
                trace!("Session {}: dropping stale delivery {:?}", self.id, stale);
                Vec::new()
            }
        }
    }

    /// Remembered channel for this client, falling back to the default.
    async fn initial_channel(&self) -> ChannelName {
        match self.services.last_channel(&self.client_addr).await {
            Ok(Some(name)) => ChannelName::parse(&name).unwrap_or_else(|e| {
                warn!("Ignoring remembered channel {:?}: {}", name, e);
                self.config.default_channel.clone()
            }),
            Ok(None) => self.config.default_channel.clone(),
            Err(e) => {
                warn!("Session {}: preference lookup failed: {}", self.id, e);
                self.config.default_channel.clone()
            }
        }
    }

    /// Join `channel`: open the live feed, load history, remember the choice.
    ///
    /// The feed is opened before history is read so nothing published in
    /// between is lost. History is returned to the caller directly and the
    /// live feed only reaches it through the delivery queue, so the adapter
    /// always sees history first.
    async fn enter(&mut self, channel: ChannelName) -> Vec<ServerFrame> {
        self.channel = channel.clone();
        let username = self.username.clone().unwrap_or_default();

        let mut frames = vec![ServerFrame::Joined {
            channel: channel.to_string(),
            username: username.clone(),
        }];

        let live = self.services.broadcaster.subscribe(&channel).await;

        match self
            .services
            .store
            .recent_history(&channel, self.config.history_limit)
            .await
        {
            Ok(messages) => frames.push(ServerFrame::History {
                channel: channel.to_string(),
                messages,
            }),
            Err(e) => {
                warn!("Session {}: history for #{} unavailable: {}", self.id, channel, e);
                frames.push(ServerFrame::Error {
                    text: format!("history unavailable: {}", e),
                });
            }
        }

        match live {
            Ok((subscription, cancel)) => self.start_feed(subscription, cancel),
            Err(e) => {
                warn!("Session {}: no live updates for #{}: {}", self.id, channel, e);
                frames.push(ServerFrame::Degraded {
                    channel: channel.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        if let Err(e) = self
            .services
            .save_preference(&self.client_addr, &username, channel.as_str())
            .await
        {
            warn!("Session {}: could not save preference: {}", self.id, e);
        }

        info!("Session {} ({}) joined #{}", self.id, username, channel);
        frames
    }

    fn start_feed(&mut self, subscription: Subscription, cancel: CancelHandle) {
        let id = subscription.id();
        let forwarder = tokio::spawn(forward_live(subscription, self.deliveries.clone()));
        self.feed = Some(LiveFeed {
            subscription: id,
            cancel,
            forwarder,
        });
    }

    fn stop_feed(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.cancel.cancel();
            feed.forwarder.abort();
            debug!("Session {}: live feed {} cancelled", self.id, feed.subscription);
        }
    }

    /// Append then publish a message from this session's user to its current
    /// channel. Nothing is published unless the append succeeded.
    pub async fn post(&mut self, body: &str) -> Result<Message> {
        let author = match self.state {
            SessionState::Active => self.username.clone().ok_or(Error::NotActive)?,
            SessionState::AwaitingUsername => return Err(Error::NotActive),
            SessionState::Closed => return Err(Error::SessionClosed),
        };

        let message = Message::new(author, body);
        let stored = self.services.store.append(&self.channel, message).await?;
        let delivered = self
            .services
            .broadcaster
            .publish(&self.channel, &stored)
            .await?;

        debug!(
            "Session {}: posted to #{} ({} live subscribers)",
            self.id, self.channel, delivered
        );
        Ok(stored)
    }

    /// Leave the current channel and join `channel`. The old feed is
    /// cancelled before the new one is opened.
    pub async fn switch_channel(&mut self, channel: ChannelName) -> Result<Vec<ServerFrame>> {
        match self.state {
            SessionState::Active => {}
            SessionState::AwaitingUsername => return Err(Error::NotActive),
            SessionState::Closed => return Err(Error::SessionClosed),
        }

        if channel == self.channel && self.is_live() {
            return Ok(vec![ServerFrame::Notice {
                text: format!("already in #{}", channel),
            }]);
        }

        self.stop_feed();
        Ok(self.enter(channel).await)
    }

    /// End the session. Cancels the live feed first; never blocks, safe to
    /// call in any state and more than once.
    pub fn close(&mut self) {
        self.stop_feed();
        if self.state != SessionState::Closed {
            self.state = SessionState::Closed;
            info!("Session {} ({}) closed", self.id, self.client_addr);
        }
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.stop_feed();
    }
}

/// Drain a subscription into the delivery queue until it is cancelled or the
/// broadcaster ends it.
async fn forward_live(mut subscription: Subscription, deliveries: mpsc::Sender<Delivery>) {
    let id = subscription.id();
    let channel = subscription.channel().clone();
    let cancel = subscription.cancel_handle();

    while let Some(message) = subscription.recv().await {
        let delivery = Delivery::Message {
            subscription: id,
            channel: channel.clone(),
            message,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = deliveries.send(delivery) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }

    if cancel.is_cancelled() {
        return;
    }

    debug!("Live feed {} for #{} ended by broadcaster", id, channel);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        _ = deliveries.send(Delivery::FeedClosed { subscription: id, channel }) => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use tempfile::TempDir;
    use textale_db::Database;

    fn services() -> (Services, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("textale.db")).unwrap());
        (Services::new(db, 32), dir)
    }

    #[tokio::test]
    async fn starts_awaiting_username() {
        let (services, _dir) = services();
        let (session, _rx) = ChannelSession::new(services, SessionConfig::default(), "10.0.0.1");

        assert_eq!(session.state(), SessionState::AwaitingUsername);
        assert_eq!(
            session.greeting(),
            vec![ServerFrame::Prompt { text: USERNAME_PROMPT.into() }]
        );
        assert!(!session.is_live());
    }

    #[tokio::test]
    async fn blank_lines_do_not_set_username() {
        let (services, _dir) = services();
        let (mut session, _rx) = ChannelSession::new(services, SessionConfig::default(), "10.0.0.1");

        assert!(session.handle(SessionEvent::Input("   ".into())).await.is_empty());
        assert_eq!(session.state(), SessionState::AwaitingUsername);
    }

    #[tokio::test]
    async fn first_line_becomes_username_and_joins() {
        let (services, _dir) = services();
        let (mut session, _rx) = ChannelSession::new(services, SessionConfig::default(), "10.0.0.1");

        let frames = session.handle(SessionEvent::Input("alice\r\n".into())).await;
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.username(), Some("alice"));
        assert!(session.is_live());
        assert_eq!(
            frames,
            vec![
                ServerFrame::Joined { channel: "general".into(), username: "alice".into() },
                ServerFrame::History { channel: "general".into(), messages: vec![] },
            ]
        );
    }

    #[tokio::test]
    async fn remembered_channel_is_rejoined() {
        let (services, _dir) = services();
        services.save_preference("10.0.0.1", "alice", "random").await.unwrap();
        let (mut session, _rx) = ChannelSession::new(services, SessionConfig::default(), "10.0.0.1");

        session.handle(SessionEvent::Input("alice".into())).await;
        assert_eq!(session.channel().as_str(), "random");
    }

    #[tokio::test]
    async fn post_requires_active_session() {
        let (services, _dir) = services();
        let (mut session, _rx) = ChannelSession::new(services, SessionConfig::default(), "10.0.0.1");

        assert!(matches!(session.post("hi").await, Err(Error::NotActive)));
        session.close();
        assert!(matches!(session.post("hi").await, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn close_is_idempotent_before_username() {
        let (services, _dir) = services();
        let (mut session, _rx) = ChannelSession::new(services, SessionConfig::default(), "10.0.0.1");

        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.handle(SessionEvent::Input("alice".into())).await.is_empty());
    }

    #[tokio::test]
    async fn quit_event_closes() {
        let (services, _dir) = services();
        let (mut session, _rx) = ChannelSession::new(services, SessionConfig::default(), "10.0.0.1");
        session.handle(SessionEvent::Input("alice".into())).await;

        assert_eq!(session.handle(SessionEvent::Quit).await, vec![ServerFrame::Closed]);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_live());
    }

    #[tokio::test]
    async fn resize_updates_viewport() {
        let (services, _dir) = services();
        let (mut session, _rx) = ChannelSession::new(services, SessionConfig::default(), "10.0.0.1");

        let frames = session
            .handle(SessionEvent::Resize { width: 120, height: 40 })
            .await;
        assert!(frames.is_empty());
        assert_eq!(session.viewport(), (120, 40));
    }

    #[tokio::test]
    async fn stale_deliveries_are_ignored() {
        let (services, _dir) = services();
        let (mut session, _rx) = ChannelSession::new(services, SessionConfig::default(), "10.0.0.1");
        session.handle(SessionEvent::Input("alice".into())).await;

        let stale = Delivery::Message {
            subscription: Uuid::new_v4(),
            channel: ChannelName::parse("general").unwrap(),
            message: Message::at("bob", "old feed", 1),
        };
        assert!(session.handle(SessionEvent::Incoming(stale)).await.is_empty());
    }

    /// Publish enough that the forwarder fills the delivery queue, blocks on
    /// it, and the subscription queue behind it fills too.
    async fn flood(services: &Services, channel: &ChannelName) {
        let backlog = MIN_SUBSCRIBER_BUFFER + services.broadcaster.buffer() + 8;
        for i in 0..backlog {
            let msg = Message::at("bob", format!("{i}"), i as i64 + 1);
            services.broadcaster.publish(channel, &msg).await.unwrap();
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn close_with_blocked_forwarder_returns() {
        let (services, _dir) = services();
        let general = ChannelName::parse("general").unwrap();
        let (mut session, mut rx) =
            ChannelSession::new(services.clone(), SessionConfig::default(), "10.0.0.1");
        session.handle(SessionEvent::Input("alice".into())).await;

        flood(&services, &general).await;

        tokio::time::timeout(Duration::from_secs(1), async { session.close() })
            .await
            .unwrap();
        assert_eq!(services.broadcaster.subscriber_count(&general).await, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, MIN_SUBSCRIBER_BUFFER);

        // Draining freed room, but the cancelled forwarder must not refill it
        services
            .broadcaster
            .publish(&general, &Message::at("bob", "after close", 9_999))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn switch_with_blocked_forwarder_returns() {
        let (services, _dir) = services();
        let general = ChannelName::parse("general").unwrap();
        let random = ChannelName::parse("random").unwrap();
        let (mut session, mut rx) =
            ChannelSession::new(services.clone(), SessionConfig::default(), "10.0.0.1");
        session.handle(SessionEvent::Input("alice".into())).await;

        flood(&services, &general).await;

        let frames = tokio::time::timeout(Duration::from_secs(1), session.switch_channel(random))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frames[0], ServerFrame::Joined { ref channel, .. } if channel == "random"));
        assert_eq!(services.broadcaster.subscriber_count(&general).await, 0);

        // Whatever the old feed queued is stale now
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(delivery) = rx.try_recv() {
            assert!(session.handle(SessionEvent::Incoming(delivery)).await.is_empty());
        }
    }

    #[tokio::test]
    async fn hopping_channels_does_not_accumulate_topics() {
        let (services, _dir) = services();
        let (mut session, _rx) =
            ChannelSession::new(services.clone(), SessionConfig::default(), "10.0.0.1");
        session.handle(SessionEvent::Input("alice".into())).await;

        for i in 0..50 {
            session.handle(SessionEvent::Input(format!("/join x{i}"))).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.channel().as_str(), "x49");
        assert_eq!(services.broadcaster.topic_count().await, 1);
    }

    #[test]
    fn commands_parse() {
        assert!(matches!(Command::parse("/join random"), Some(Command::Join("random"))));
        assert!(matches!(Command::parse("  /channels "), Some(Command::Channels)));
        assert!(matches!(Command::parse("/quit"), Some(Command::Quit)));
        assert!(Command::parse("/shrug").is_none());
        assert!(Command::parse("hello /join x").is_none());
    }

    #[test]
    fn client_frames_map_to_events() {
        assert_eq!(
            SessionEvent::from(ClientFrame::Line { text: "hi".into() }),
            SessionEvent::Input("hi".into())
        );
        assert_eq!(SessionEvent::from(ClientFrame::Quit), SessionEvent::Quit);
    }
}
