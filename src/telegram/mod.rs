//! Telegram integration: the message handler (request orchestration),
//! delivery with retry, and all user-facing texts.

pub mod handlers;
pub mod messages;
pub mod send;

use crate::download::ChainExecutor;
use crate::gate::FlyerGate;
use crate::routing::RoutingEngine;
use crate::storage::{ArtifactCache, SlotController, Telemetry};

/// Everything a request handler needs, shared across all requests.
#[derive(Clone)]
pub struct AppState {
    pub cache: ArtifactCache,
    pub slots: SlotController,
    pub routing: RoutingEngine,
    pub telemetry: Telemetry,
    pub gate: FlyerGate,
    pub executor: ChainExecutor,
    /// Client for thumbnail fetches during post-processing
    pub http: reqwest::Client,
}

pub use handlers::handle_message;
