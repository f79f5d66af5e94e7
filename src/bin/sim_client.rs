//! Simulated participant
//!
//! Connects to a Plaza server, walks a circle around the plaza, greets
//! whoever it ends up facing and logs everything it hears.

use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use plaza_server::client::{
    spawn_transport, AgentNotice, ClientSyncAgent, ConnectionStatus, LocalPose, ReconnectPolicy,
};
use plaza_server::config::ClientConfig;
use plaza_server::init_tracing;
use plaza_server::util::time::tick_duration;
use plaza_server::ws::protocol::{InteractionKind, Profile, Vec3};

/// Walkable area is [-WORLD_LIMIT, WORLD_LIMIT] on x and z
const WORLD_LIMIT: f32 = 100.0;
const EYE_HEIGHT: f32 = 1.7;
const WALK_RADIUS: f32 = 80.0;
/// Radians per second along the circle
const WALK_SPEED: f32 = 0.05;
const EMOTE_EVERY: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ClientConfig::from_env()?;
    init_tracing(&config.log_level);

    let name = format!("sim-{:04x}", rand::random::<u16>());
    info!(name = %name, server = %config.server_url, "Starting simulated participant");

    let (inbound_tx, inbound_rx) = mpsc::channel(1024);
    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let transport = spawn_transport(
        config.server_url.clone(),
        ReconnectPolicy::from_config(&config),
        inbound_tx,
        outbound_rx,
    );

    let profile = Profile(json!({ "name": name }));
    let mut agent = ClientSyncAgent::new(&config, profile, inbound_rx, outbound_tx);

    let mut ticker = interval(tick_duration(config.tick_rate));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let start = Instant::now();
    let mut last_emote = start;
    let phase = rand::random::<f32>() * std::f32::consts::TAU;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving");
                break;
            }
        }

        let now = Instant::now();
        let pose = walk(phase + start.elapsed().as_secs_f32() * WALK_SPEED);
        agent.tick(now, pose);

        for notice in agent.drain_notices() {
            if let AgentNotice::TargetChanged(change) = &notice {
                if change.current.is_some() {
                    agent.interact(InteractionKind::Greet, None);
                }
            }
            info!(notice = %notice, "Notice");
        }

        if agent.is_joined() && now.duration_since(last_emote) >= EMOTE_EVERY {
            agent.emote("wave");
            last_emote = now;
        }

        if agent.status() == ConnectionStatus::Failed {
            break;
        }
    }

    info!(
        remote_participants = agent.mirror().len(),
        "Simulated participant stopped"
    );
    drop(agent);
    transport.abort();
    Ok(())
}

/// Point on the walking circle at `angle`, facing along the path
fn walk(angle: f32) -> LocalPose {
    let position = Vec3::new(
        (WALK_RADIUS * angle.cos()).clamp(-WORLD_LIMIT, WORLD_LIMIT),
        EYE_HEIGHT,
        (WALK_RADIUS * angle.sin()).clamp(-WORLD_LIMIT, WORLD_LIMIT),
    );
    // Tangent (-sin, cos) expressed as a yaw where 0 faces +z
    LocalPose::new(position, -angle)
}
