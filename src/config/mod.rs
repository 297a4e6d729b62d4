//! JSON configuration models for the pipeline nodes
//!
//! The acquisition controller and the analyzer share one configuration
//! grammar: a `global` block, a `cards` array identifying the boards, a
//! `channels` array with per-channel analysis settings, and an optional
//! `scripts` array of user hooks. Unknown keys are ignored everywhere;
//! missing optional keys take the documented defaults.
//!
//! Board-specific settings inside each card entry are kept as a raw JSON
//! subtree: the matching digitizer driver parses them in `read_config`,
//! which is the only place that knows the board family's vocabulary.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::error::{PipelineError, PipelineResult};

/// Complete acquisition-controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Settings merged into every card subtree
    #[serde(default)]
    pub global: GlobalConfig,

    /// One entry per physical board
    #[serde(default)]
    pub cards: Vec<CardConfig>,

    /// Per-channel analysis settings (used by the analyzer)
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    /// User hooks keyed by state and phase
    #[serde(default)]
    pub scripts: Vec<ScriptConfig>,
}

impl AcquisitionConfig {
    /// Parse from a JSON string
    pub fn from_json(text: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a file
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse from an already-decoded JSON value (reconfigure commands)
    pub fn from_value(value: Value) -> PipelineResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// The enabled cards, in declaration order
    pub fn enabled_cards(&self) -> impl Iterator<Item = &CardConfig> {
        self.cards.iter().filter(|card| card.enabled)
    }

    /// Board settings for one card: global block merged under the card's
    /// own subtree (card keys win)
    pub fn card_settings(&self, card: &CardConfig) -> Value {
        let mut merged = self.global.extra.clone();
        for (key, value) in &card.settings {
            merged.insert(key.clone(), value.clone());
        }
        Value::Object(merged)
    }
}

/// The `global` block
///
/// Known keys steer the controller's buffering; everything else is
/// forwarded into every card subtree by [`AcquisitionConfig::card_settings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// High-water mark for the outgoing waveform buffer, in records
    #[serde(default = "default_waveforms_buffer_size_max")]
    pub waveforms_buffer_size_max: usize,

    /// Expected samples per record, used to pre-reserve the buffer
    #[serde(default = "default_expected_samples_number")]
    pub expected_samples_number: usize,

    /// Status and forced-publish period, in seconds
    #[serde(default = "default_publish_period")]
    pub publish_period: u64,

    /// Remaining keys, merged into the card subtrees
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            waveforms_buffer_size_max: default_waveforms_buffer_size_max(),
            expected_samples_number: default_expected_samples_number(),
            publish_period: default_publish_period(),
            extra: Map::new(),
        }
    }
}

fn default_waveforms_buffer_size_max() -> usize {
    4096
}

fn default_expected_samples_number() -> usize {
    2048
}

fn default_publish_period() -> u64 {
    3
}

/// One entry of the `cards` array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardConfig {
    /// Board serial name, matched against the discovered boards
    pub serial: String,

    /// Operator-assigned id offsetting this board's channels into the
    /// global channel space
    pub user_id: u8,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Board family (selects the driver), e.g. "FastDAQ"
    #[serde(default)]
    pub model: Option<String>,

    /// Board-specific settings, parsed by the driver's `read_config`
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// One entry of the `channels` array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Global channel id
    pub id: u8,

    #[serde(default = "default_true")]
    pub enable: bool,

    /// Path of the timestamp-analysis library; absent or "Null" selects
    /// the built-in forwarder
    #[serde(default)]
    pub timestamp_library: Option<String>,

    /// Path of the energy-analysis library; absent or "SimplePSD"
    /// selects the built-in integrator
    #[serde(default)]
    pub energy_library: Option<String>,

    /// Free-form object forwarded verbatim to the plugin init functions
    #[serde(default)]
    pub user_config: Value,
}

/// One entry of the `scripts` array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// State id the hook is attached to
    pub state: String,

    /// "pre" or "post"
    pub when: ScriptPhase,

    /// Inline script source
    #[serde(default)]
    pub source: Option<String>,

    /// Script file, read at configuration time
    #[serde(default)]
    pub file: Option<String>,
}

/// Hook phase relative to the state action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptPhase {
    Pre,
    Post,
}

impl AcquisitionConfig {
    /// Collect the scripts into a `(state, phase) → source` map
    ///
    /// Inline sources win over files; unreadable files are reported.
    pub fn scripts_map(&self) -> PipelineResult<HashMap<(String, ScriptPhase), String>> {
        let mut map = HashMap::new();
        for script in &self.scripts {
            let source = match (&script.source, &script.file) {
                (Some(source), _) => source.clone(),
                (None, Some(file)) => std::fs::read_to_string(file).map_err(|e| {
                    PipelineError::config(format!("cannot read script file {file}: {e}"))
                })?,
                (None, None) => {
                    return Err(PipelineError::config(format!(
                        "script for state {} has neither source nor file",
                        script.state
                    )))
                }
            };
            map.insert((script.state.clone(), script.when), source);
        }
        Ok(map)
    }
}

/// Analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Per-channel analysis settings
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    /// Forward the (possibly annotated) waveforms downstream
    #[serde(default = "default_true")]
    pub forward_waveforms: bool,

    /// Keep the additional planes when forwarding waveforms
    #[serde(default = "default_true")]
    pub enable_additional: bool,

    /// Conflate the input subscription: keep only the newest message
    #[serde(default)]
    pub discard_messages: bool,

    /// Status publication period, in seconds
    #[serde(default = "default_publish_period")]
    pub publish_period: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            forward_waveforms: true,
            enable_additional: true,
            discard_messages: false,
            publish_period: default_publish_period(),
        }
    }
}

impl AnalyzerConfig {
    pub fn from_json(text: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_value(value: Value) -> PipelineResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// The enabled channel ids, in declaration order
    pub fn active_channels(&self) -> Vec<u8> {
        self.channels
            .iter()
            .filter(|ch| ch.enable)
            .map(|ch| ch.id)
            .collect()
    }
}
