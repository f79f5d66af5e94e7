//! Client-side sync: remote mirror, smoothing, targeting and the
//! reconnecting transport that feeds them

pub mod agent;
pub mod interpolate;
pub mod mirror;
pub mod targeting;
pub mod throttle;
pub mod transport;

pub use agent::{AgentNotice, ClientSyncAgent, ConnectionStatus, Inbound, LocalPose};
pub use interpolate::AvatarInterpolator;
pub use mirror::{RemoteAvatarState, RemoteMirror};
pub use targeting::{InteractionTargeter, TargetChange};
pub use throttle::UpdateThrottle;
pub use transport::{spawn_transport, ReconnectPolicy, TransportError};
