//! Gateway shared state.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use callbridge_core::config::{AudioConfig, Config, RecognitionConfig};
use callbridge_core::engine::DecisionEngine;
use callbridge_core::{BridgeError, Result};
use callbridge_media::synth::SynthesisClient;

use crate::registry::SessionRegistry;

/// Shared gateway state: read-only startup configuration plus the session
/// registry. Sessions share nothing else.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub recognition: RecognitionConfig,
    pub audio: AudioConfig,
    pub fillers: Vec<String>,
    pub synthesis: Arc<SynthesisClient>,
    pub registry: Arc<SessionRegistry>,
    pub engine: Arc<dyn DecisionEngine>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        engine: Arc<dyn DecisionEngine>,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Result<Self> {
        let recognition = config
            .recognition
            .clone()
            .ok_or_else(|| BridgeError::Config("no recognition service configured".into()))?;
        let synthesis = config
            .synthesis
            .clone()
            .ok_or_else(|| BridgeError::Config("no synthesis service configured".into()))?;

        Ok(Self {
            recognition,
            audio: config.audio(),
            fillers: config.fillers(),
            synthesis: Arc::new(SynthesisClient::new(synthesis)?),
            registry,
            engine,
            metrics_handle,
            config,
        })
    }
}
