use crate::mission::ObjectId;
use crate::observer::{ClientChannel, EndpointId, OutboundMessage, QueueChannel};
use crate::subscription::protocol::{ClientMessage, ErrorMessage};
use crate::world::MissionRegistry;
use axum::extract::ws::{Message, WebSocket};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// What the connection loop does after reading one frame.
#[derive(Debug)]
pub enum FrameAction {
    Continue,
    Reply(Message),
    Close,
}

/// Manages a single WebSocket connection and the missions it observes
pub struct ConnectionManager {
    endpoint: EndpointId,
    registry: Arc<MissionRegistry>,
    /// Strong handle; missions only hold it weakly
    channel: Arc<QueueChannel>,
    baseline_on_subscribe: bool,
    /// Missions this connection is subscribed to
    subscriptions: HashSet<ObjectId>,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<MissionRegistry>,
        channel: Arc<QueueChannel>,
        baseline_on_subscribe: bool,
    ) -> Self {
        Self {
            endpoint: EndpointId::new(),
            registry,
            channel,
            baseline_on_subscribe,
            subscriptions: HashSet::new(),
        }
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn subscriptions(&self) -> &HashSet<ObjectId> {
        &self.subscriptions
    }

    /// Handle WebSocket connection lifecycle
    pub async fn handle(
        mut self,
        mut socket: WebSocket,
        mut outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    ) {
        info!(endpoint = %self.endpoint, "WebSocket connection established");

        loop {
            tokio::select! {
                // Handle incoming client messages
                frame = socket.recv() => {
                    match self.on_frame(frame) {
                        FrameAction::Continue => {}
                        FrameAction::Reply(reply) => {
                            if let Err(e) = socket.send(reply).await {
                                error!(error = %e, "Failed to send reply");
                                break;
                            }
                        }
                        FrameAction::Close => break,
                    }
                }

                // Forward baselines and deltas queued by missions
                Some(outbound) = outbound_rx.recv() => {
                    if let Err(e) = socket.send(Message::Binary(outbound.payload.to_vec())).await {
                        error!(error = %e, "Failed to send replication message");
                        break;
                    }
                }
            }
        }

        self.release();
        info!(endpoint = %self.endpoint, "WebSocket connection closed");
    }

    /// Decide what to do with one read from the socket. `None` means the
    /// stream ended, with or without a Close frame.
    pub fn on_frame(&mut self, frame: Option<Result<Message, axum::Error>>) -> FrameAction {
        match frame {
            Some(Ok(Message::Text(text))) => match self.handle_client_message(&text) {
                Some(reply) => match serde_json::to_string(&reply) {
                    Ok(json) => FrameAction::Reply(Message::Text(json)),
                    Err(e) => {
                        error!(error = %e, "Failed to serialize error message");
                        FrameAction::Continue
                    }
                },
                None => FrameAction::Continue,
            },
            Some(Ok(Message::Ping(data))) => FrameAction::Reply(Message::Pong(data)),
            Some(Ok(Message::Close(_))) => {
                info!(endpoint = %self.endpoint, "WebSocket client disconnected");
                FrameAction::Close
            }
            Some(Ok(_)) => {
                // Ignore binary, pong messages
                FrameAction::Continue
            }
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket error");
                FrameAction::Close
            }
            None => {
                info!(endpoint = %self.endpoint, "WebSocket stream ended");
                FrameAction::Close
            }
        }
    }

    /// Apply one client text frame. Returns the error to report, if any.
    pub fn handle_client_message(&mut self, text: &str) -> Option<ErrorMessage> {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Invalid client message");
                return Some(ErrorMessage::new(format!("invalid message: {}", e)));
            }
        };

        match msg {
            ClientMessage::Subscribe { object_id } => self.subscribe(object_id).err(),
            ClientMessage::Unsubscribe { object_id } => {
                self.unsubscribe(object_id);
                None
            }
        }
    }

    fn subscribe(&mut self, object_id: ObjectId) -> Result<(), ErrorMessage> {
        let mission = self.registry.get(object_id).ok_or_else(|| {
            ErrorMessage::for_mission(object_id, format!("mission {} not found", object_id))
        })?;

        let channel: Arc<dyn ClientChannel> = self.channel.clone();
        let result = if self.baseline_on_subscribe {
            mission.subscribe(self.endpoint, &channel)
        } else {
            mission.add_observer(self.endpoint, &channel).map(|_| ())
        };
        result.map_err(|e| ErrorMessage::for_mission(object_id, e.to_string()))?;

        self.subscriptions.insert(object_id);
        Ok(())
    }

    fn unsubscribe(&mut self, object_id: ObjectId) {
        if self.subscriptions.remove(&object_id) {
            if let Some(mission) = self.registry.get(object_id) {
                mission.unsubscribe(&self.endpoint);
            }
        }
    }

    /// Drop every subscription this connection holds.
    pub fn release(&mut self) {
        for object_id in self.subscriptions.drain() {
            if let Some(mission) = self.registry.get(object_id) {
                mission.unsubscribe(&self.endpoint);
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.release();
    }
}
