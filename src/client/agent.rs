//! Client-side sync agent
//!
//! The agent is driven by a fixed-tick loop. Network events are only queued
//! by the transport; they are applied at the start of the next [`tick`],
//! so interpolation and targeting never observe a half-applied update.
//!
//! [`tick`]: ClientSyncAgent::tick

use std::fmt;
use std::time::Instant;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::ws::protocol::{
    ClientMsg, InteractionKind, ParticipantId, Profile, Rotation, ServerMsg, Vec3,
};

use super::interpolate::AvatarInterpolator;
use super::mirror::RemoteMirror;
use super::targeting::{InteractionTargeter, TargetChange};
use super::throttle::UpdateThrottle;

/// Events the transport hands to the agent
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Socket open; the agent should join
    Connected,
    /// Socket lost; the transport is retrying
    Disconnected { reason: String },
    /// The transport gave up
    Failed { reason: String },
    Message(ServerMsg),
}

/// Connection status as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Degraded,
    Failed,
}

/// Things the application layer should surface
#[derive(Debug, Clone, PartialEq)]
pub enum AgentNotice {
    ConnectionLost,
    Reconnected,
    ConnectionFailed,
    TargetChanged(TargetChange),
    Emote {
        player_id: ParticipantId,
        emote_id: String,
    },
    Interaction {
        source_player_id: ParticipantId,
        interaction_type: InteractionKind,
        message: Option<String>,
    },
}

impl fmt::Display for AgentNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentNotice::ConnectionLost => write!(f, "Connection lost. Reconnecting..."),
            AgentNotice::Reconnected => write!(f, "Reconnected"),
            AgentNotice::ConnectionFailed => write!(f, "Could not reach the server"),
            AgentNotice::TargetChanged(change) => match change.current {
                Some(id) => write!(f, "Looking at {}", id),
                None => write!(f, "No one in view"),
            },
            AgentNotice::Emote {
                player_id,
                emote_id,
            } => write!(f, "{} played {}", player_id, emote_id),
            AgentNotice::Interaction {
                source_player_id,
                interaction_type,
                message,
            } => match message {
                Some(text) => write!(f, "{} ({:?}): {}", source_player_id, interaction_type, text),
                None => write!(f, "{} ({:?})", source_player_id, interaction_type),
            },
        }
    }
}

/// Local participant pose for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPose {
    pub position: Vec3,
    /// Facing angle about +y, radians
    pub yaw: f32,
}

impl LocalPose {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self { position, yaw }
    }
}

/// Where the agent is in the join handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    /// No socket
    Offline,
    /// `join` sent, waiting for `initialize`
    Joining,
    Joined,
}

pub struct ClientSyncAgent {
    profile: Profile,
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<ClientMsg>,

    status: ConnectionStatus,
    session: Session,
    /// Set once a connection has been lost, so the next join reports a reconnect
    was_lost: bool,

    mirror: RemoteMirror,
    interpolator: AvatarInterpolator,
    targeter: InteractionTargeter,
    throttle: UpdateThrottle,
    notices: Vec<AgentNotice>,
}

impl ClientSyncAgent {
    pub fn new(
        config: &ClientConfig,
        profile: Profile,
        inbound: mpsc::Receiver<Inbound>,
        outbound: mpsc::Sender<ClientMsg>,
    ) -> Self {
        Self {
            profile,
            inbound,
            outbound,
            status: ConnectionStatus::Connecting,
            session: Session::Offline,
            was_lost: false,
            mirror: RemoteMirror::new(),
            interpolator: AvatarInterpolator::new(config.interpolation_damping),
            targeter: InteractionTargeter::new(
                config.interaction_radius,
                config.interaction_threshold,
            ),
            throttle: UpdateThrottle::new(config.update_interval),
            notices: Vec::new(),
        }
    }

    /// One frame: apply queued network events, interpolate, retarget, then
    /// send the local pose if the throttle allows.
    pub fn tick(&mut self, now: Instant, pose: LocalPose) {
        self.drain_inbound();
        self.interpolator.apply(&mut self.mirror);

        if let Some(change) = self.targeter.update(pose.position, pose.yaw, &self.mirror) {
            debug!(previous = ?change.previous, current = ?change.current, "Interaction target changed");
            self.notices.push(AgentNotice::TargetChanged(change));
        }

        self.send_position(now, pose);
    }

    /// Throttled position send. Returns true if an update went out.
    pub fn send_position(&mut self, now: Instant, pose: LocalPose) -> bool {
        if self.session != Session::Joined || !pose.position.is_finite() {
            return false;
        }
        if !self.throttle.try_acquire(now) {
            return false;
        }
        self.push(ClientMsg::UpdatePosition {
            position: pose.position,
            rotation: Rotation::new(pose.yaw),
        })
    }

    /// Address the current target. Nothing is sent without one.
    pub fn interact(&mut self, kind: InteractionKind, message: Option<String>) -> bool {
        let Some(target) = self.targeter.current() else {
            return false;
        };
        if self.session != Session::Joined {
            return false;
        }
        self.push(ClientMsg::SocialInteraction {
            target_player_id: target,
            interaction_type: kind,
            message,
        })
    }

    pub fn emote(&mut self, emote_id: impl Into<String>) -> bool {
        if self.session != Session::Joined {
            return false;
        }
        self.push(ClientMsg::Emote {
            emote_id: emote_id.into(),
        })
    }

    /// Notices produced since the last call
    pub fn drain_notices(&mut self) -> Vec<AgentNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_joined(&self) -> bool {
        self.session == Session::Joined
    }

    pub fn local_id(&self) -> Option<ParticipantId> {
        self.mirror.local_id()
    }

    pub fn mirror(&self) -> &RemoteMirror {
        &self.mirror
    }

    pub fn current_target(&self) -> Option<ParticipantId> {
        self.targeter.current()
    }

    fn drain_inbound(&mut self) {
        loop {
            match self.inbound.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.status != ConnectionStatus::Failed {
                        warn!("Transport stopped");
                        self.fail();
                    }
                    break;
                }
            }
        }
    }

    fn apply(&mut self, event: Inbound) {
        match event {
            Inbound::Connected => {
                info!("Connected, joining");
                self.status = ConnectionStatus::Connected;
                self.session = Session::Joining;
                self.throttle.reset();
                let join = ClientMsg::Join {
                    profile: self.profile.clone(),
                };
                self.push(join);
            }
            Inbound::Disconnected { reason } => {
                warn!(reason = %reason, "Connection lost");
                self.status = ConnectionStatus::Degraded;
                self.session = Session::Offline;
                self.was_lost = true;
                self.notices.push(AgentNotice::ConnectionLost);
            }
            Inbound::Failed { reason } => {
                warn!(reason = %reason, "Giving up on the server");
                self.fail();
            }
            Inbound::Message(msg) => self.apply_message(msg),
        }
    }

    fn apply_message(&mut self, msg: ServerMsg) {
        if self.session == Session::Offline {
            debug!(event = msg.event_name(), "Message while offline, ignored");
            return;
        }

        match msg {
            ServerMsg::Initialize { id, players, .. } => {
                info!(participant_id = %id, players = players.len(), "Joined");
                self.mirror.replace_with(id, players.into_values());
                self.session = Session::Joined;
                if self.was_lost {
                    self.was_lost = false;
                    self.notices.push(AgentNotice::Reconnected);
                }
            }
            other if self.session == Session::Joining => {
                // Anything before the join reply belongs to the previous session
                debug!(event = other.event_name(), "Message before initialize, ignored");
            }
            ServerMsg::PlayerJoined(snapshot) => {
                self.mirror.upsert(snapshot);
            }
            ServerMsg::PlayerMoved {
                id,
                position,
                rotation,
            } => {
                self.mirror.set_target(id, position, rotation);
            }
            ServerMsg::ProximityUpdate { players } => {
                self.mirror.reconcile(players);
            }
            ServerMsg::PlayerLeft { id } => {
                self.mirror.remove(id);
            }
            ServerMsg::PlayerEmote {
                player_id,
                emote_id,
            } => {
                self.notices.push(AgentNotice::Emote {
                    player_id,
                    emote_id,
                });
            }
            ServerMsg::Interaction {
                source_player_id,
                interaction_type,
                message,
            } => {
                if !self.mirror.contains(source_player_id) {
                    debug!(source = %source_player_id, "Interaction from unknown participant, ignored");
                    return;
                }
                self.notices.push(AgentNotice::Interaction {
                    source_player_id,
                    interaction_type,
                    message,
                });
            }
        }
    }

    fn fail(&mut self) {
        self.status = ConnectionStatus::Failed;
        self.session = Session::Offline;
        self.notices.push(AgentNotice::ConnectionFailed);
    }

    /// Most-recent-wins: a full outbound queue drops the message
    fn push(&self, msg: ClientMsg) -> bool {
        match self.outbound.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue full, update dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
