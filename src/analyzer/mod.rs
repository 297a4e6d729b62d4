//! The online waveform analyzer
//!
//! A separate process consuming the waveform topic. Structurally the
//! same cooperative state machine as the acquisition controller, but
//! instead of hardware it owns the per-channel plugin pairs: a
//! timestamp stage and an energy stage per channel, each free to emit
//! zero, one or many events per waveform and to annotate the waveform
//! with visualization planes. Surviving events and annotated waveforms
//! are republished under fresh message ids.

pub mod builtin;
pub mod plugin;

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::common::envelope::{Command, StatusEnvelope};
use crate::common::error::PipelineResult;
use crate::common::event::{EventPsd, EVENT_PSD_SIZE};
use crate::common::shutdown::TerminationFlag;
use crate::common::topic::{Topic, TOPIC_EVENTS, TOPIC_NOTICES, TOPIC_STATUS, TOPIC_WAVEFORMS};
use crate::common::waveform::WaveformFrames;
use crate::config::{AnalyzerConfig, ChannelConfig};
use crate::transport::{PubSocket, PullSocket, SubSocket};

use builtin::{NullTimestamp, SimplePsd};
use plugin::{AnalysisBuffers, AnalysisStage, ExternalStage, StageKind};

const MODULE_NAME: &str = "wavedaq_analyzer";

/// States of the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    Start,
    CreateContext,
    CreateSockets,
    BindSockets,
    ReadConfig,
    ApplyConfig,
    PublishStatus,
    ReceiveCommands,
    ReadSocket,
    ClearMemory,
    CloseSockets,
    DestroyContext,
    Stop,
    CommunicationError,
    ParseError,
    ConfigureError,
}

impl AnalyzerState {
    pub fn id(&self) -> &'static str {
        match self {
            AnalyzerState::Start => "start",
            AnalyzerState::CreateContext => "create_context",
            AnalyzerState::CreateSockets => "create_sockets",
            AnalyzerState::BindSockets => "bind_sockets",
            AnalyzerState::ReadConfig => "read_config",
            AnalyzerState::ApplyConfig => "apply_config",
            AnalyzerState::PublishStatus => "publish_status",
            AnalyzerState::ReceiveCommands => "receive_commands",
            AnalyzerState::ReadSocket => "read_socket",
            AnalyzerState::ClearMemory => "clear_memory",
            AnalyzerState::CloseSockets => "close_sockets",
            AnalyzerState::DestroyContext => "destroy_context",
            AnalyzerState::Stop => "stop",
            AnalyzerState::CommunicationError => "communication_error",
            AnalyzerState::ParseError => "parse_error",
            AnalyzerState::ConfigureError => "configure_error",
        }
    }

    fn is_closing(&self) -> bool {
        matches!(
            self,
            AnalyzerState::ClearMemory
                | AnalyzerState::CloseSockets
                | AnalyzerState::DestroyContext
                | AnalyzerState::Stop
        )
    }
}

impl std::fmt::Display for AnalyzerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Static settings of one analyzer instance
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub status_address: String,
    pub commands_address: String,
    pub input_address: String,
    pub data_address: String,
    pub config_file: String,
    pub base_period: Duration,
    pub verbosity: u8,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            status_address: "tcp://*:16184".to_string(),
            commands_address: "tcp://*:16186".to_string(),
            input_address: "tcp://127.0.0.1:16181".to_string(),
            data_address: "tcp://*:16185".to_string(),
            config_file: "waan_config.json".to_string(),
            base_period: Duration::from_millis(1),
            verbosity: 0,
        }
    }
}

/// The two analysis stages of one channel
struct ChannelPipeline {
    timestamp: Box<dyn AnalysisStage>,
    energy: Box<dyn AnalysisStage>,
}

fn build_pipeline(channel: &ChannelConfig) -> PipelineResult<ChannelPipeline> {
    let timestamp: Box<dyn AnalysisStage> = match channel.timestamp_library.as_deref() {
        None | Some("Null") => Box::new(NullTimestamp),
        Some(path) => Box::new(ExternalStage::load(
            path,
            StageKind::Timestamp,
            &channel.user_config,
        )?),
    };

    let energy: Box<dyn AnalysisStage> = match channel.energy_library.as_deref() {
        None | Some("SimplePSD") => Box::new(SimplePsd::from_user_config(&channel.user_config)),
        Some(path) => Box::new(ExternalStage::load(
            path,
            StageKind::Energy,
            &channel.user_config,
        )?),
    };

    Ok(ChannelPipeline { timestamp, energy })
}

/// The analyzer engine
pub struct Analyzer {
    settings: AnalyzerSettings,
    terminate: TerminationFlag,

    context: Option<zmq::Context>,
    status_socket: Option<PubSocket>,
    data_socket: Option<PubSocket>,
    input_socket: Option<SubSocket>,
    commands_socket: Option<PullSocket>,

    config: AnalyzerConfig,
    pending_config: Option<Value>,
    pipelines: BTreeMap<u8, ChannelPipeline>,
    disabled_channels: BTreeSet<u8>,

    buffers: AnalysisBuffers,

    partial_counts: BTreeMap<u8, u64>,
    total_counts: BTreeMap<u8, u64>,

    events_msg_id: u64,
    waveforms_msg_id: u64,
    status_msg_id: u64,
    last_publication: Instant,
}

impl Analyzer {
    pub fn new(settings: AnalyzerSettings, terminate: TerminationFlag) -> Self {
        Self {
            settings,
            terminate,
            context: None,
            status_socket: None,
            data_socket: None,
            input_socket: None,
            commands_socket: None,
            config: AnalyzerConfig::default(),
            pending_config: None,
            pipelines: BTreeMap::new(),
            disabled_channels: BTreeSet::new(),
            buffers: AnalysisBuffers::new(),
            partial_counts: BTreeMap::new(),
            total_counts: BTreeMap::new(),
            events_msg_id: 0,
            waveforms_msg_id: 0,
            status_msg_id: 0,
            last_publication: Instant::now(),
        }
    }

    /// Run the state machine until the terminal state
    pub fn run(&mut self) -> PipelineResult<()> {
        let mut current = AnalyzerState::Start;

        loop {
            if self.terminate.is_requested() && !current.is_closing() {
                info!(from = %current, "Termination latched, unwinding");
                current = AnalyzerState::ClearMemory;
            }
            if current == AnalyzerState::Stop {
                break;
            }

            if self.settings.verbosity > 1 {
                debug!(state = %current, "Entering state");
            }

            current = self.step(current);
            std::thread::sleep(self.settings.base_period);
        }

        info!("Analyzer stopped");
        Ok(())
    }

    /// Execute one state action and return the next state
    pub fn step(&mut self, current: AnalyzerState) -> AnalyzerState {
        match current {
            AnalyzerState::Start => AnalyzerState::CreateContext,
            AnalyzerState::CreateContext => {
                self.context = Some(zmq::Context::new());
                AnalyzerState::CreateSockets
            }
            AnalyzerState::CreateSockets => self.create_sockets(),
            AnalyzerState::BindSockets => self.bind_sockets(),
            AnalyzerState::ReadConfig => self.read_config(),
            AnalyzerState::ApplyConfig => self.apply_config(),
            AnalyzerState::PublishStatus => self.publish_status(),
            AnalyzerState::ReceiveCommands => self.receive_commands(),
            AnalyzerState::ReadSocket => self.read_socket(),
            AnalyzerState::ClearMemory => {
                // Closes every plugin pair exactly once
                self.pipelines.clear();
                AnalyzerState::CloseSockets
            }
            AnalyzerState::CloseSockets => {
                self.status_socket = None;
                self.data_socket = None;
                self.input_socket = None;
                self.commands_socket = None;
                AnalyzerState::DestroyContext
            }
            AnalyzerState::DestroyContext => {
                self.context = None;
                AnalyzerState::Stop
            }
            AnalyzerState::Stop => AnalyzerState::Stop,
            AnalyzerState::CommunicationError => AnalyzerState::CloseSockets,
            AnalyzerState::ParseError => AnalyzerState::CloseSockets,
            AnalyzerState::ConfigureError => {
                self.publish_notice_error("Configuration error");
                AnalyzerState::ReceiveCommands
            }
        }
    }

    fn create_sockets(&mut self) -> AnalyzerState {
        let Some(context) = self.context.clone() else {
            return AnalyzerState::CommunicationError;
        };

        // Peek at the configuration early: the conflate option must be
        // set before the input socket connects
        let discard = AnalyzerConfig::load(&self.settings.config_file)
            .map(|c| c.discard_messages)
            .unwrap_or(false);

        let sockets = (
            PubSocket::create(&context),
            PubSocket::create(&context),
            SubSocket::create(&context, discard),
            PullSocket::create(&context),
        );

        match sockets {
            (Ok(status), Ok(data), Ok(input), Ok(commands)) => {
                self.status_socket = Some(status);
                self.data_socket = Some(data);
                self.input_socket = Some(input);
                self.commands_socket = Some(commands);
                AnalyzerState::BindSockets
            }
            _ => AnalyzerState::CommunicationError,
        }
    }

    fn bind_sockets(&mut self) -> AnalyzerState {
        let bind = || -> PipelineResult<()> {
            if let Some(socket) = self.status_socket.as_ref() {
                socket.bind(&self.settings.status_address)?;
            }
            if let Some(socket) = self.data_socket.as_ref() {
                socket.bind(&self.settings.data_address)?;
            }
            if let Some(socket) = self.commands_socket.as_ref() {
                socket.bind(&self.settings.commands_address)?;
            }
            if let Some(socket) = self.input_socket.as_ref() {
                socket.connect(&self.settings.input_address)?;
                socket.subscribe(TOPIC_WAVEFORMS)?;
            }
            Ok(())
        };

        match bind() {
            Ok(()) => {
                info!(
                    input = %self.settings.input_address,
                    data = %self.settings.data_address,
                    "Analyzer sockets ready"
                );
                AnalyzerState::ReadConfig
            }
            Err(e) => {
                warn!(error = %e, "Cannot bind the analyzer sockets");
                AnalyzerState::CommunicationError
            }
        }
    }

    fn read_config(&mut self) -> AnalyzerState {
        match AnalyzerConfig::load(&self.settings.config_file) {
            Ok(config) => {
                info!(file = %self.settings.config_file, "Configuration loaded");
                self.config = config;
                AnalyzerState::ApplyConfig
            }
            Err(e) => {
                warn!(file = %self.settings.config_file, error = %e,
                    "Cannot read the analyzer configuration");
                AnalyzerState::ParseError
            }
        }
    }

    fn apply_config(&mut self) -> AnalyzerState {
        if let Some(pending) = self.pending_config.take() {
            match AnalyzerConfig::from_value(pending) {
                Ok(config) => self.config = config,
                Err(e) => {
                    warn!(error = %e, "Reconfiguration document is invalid");
                    return AnalyzerState::ConfigureError;
                }
            }
        }

        // Dropping the old map closes every init'ed plugin before the
        // libraries go away
        self.pipelines.clear();
        self.disabled_channels.clear();

        for channel in &self.config.channels {
            if !channel.enable {
                continue;
            }
            match build_pipeline(channel) {
                Ok(pipeline) => {
                    self.pipelines.insert(channel.id, pipeline);
                    info!(
                        channel = channel.id,
                        timestamp = channel.timestamp_library.as_deref().unwrap_or("Null"),
                        energy = channel.energy_library.as_deref().unwrap_or("SimplePSD"),
                        "Channel configured"
                    );
                }
                Err(e) => {
                    warn!(channel = channel.id, error = %e,
                        "Plugin load failed, channel disabled");
                }
            }
        }

        // A fresh configuration epoch starts with fresh rate windows
        self.partial_counts.clear();
        self.total_counts.clear();

        self.publish_notice_event("Configuration applied");
        AnalyzerState::PublishStatus
    }

    fn publish_status(&mut self) -> AnalyzerState {
        let elapsed = self.last_publication.elapsed().as_secs_f64().max(1e-9);

        let statuses: Vec<Value> = self
            .pipelines
            .keys()
            .map(|&channel| {
                let partial = self.partial_counts.get(&channel).copied().unwrap_or(0);
                let total = self.total_counts.get(&channel).copied().unwrap_or(0);
                json!({
                    "channel": channel,
                    "rate": partial as f64 / elapsed,
                    "counts": total,
                })
            })
            .collect();

        let active_channels: Vec<u8> = self.pipelines.keys().copied().collect();
        let disabled_channels: Vec<u8> = self.disabled_channels.iter().copied().collect();

        let envelope = StatusEnvelope::new(MODULE_NAME, self.status_msg_id)
            .field("config", serde_json::to_value(&self.config).unwrap_or(Value::Null))
            .field("statuses", json!(statuses))
            .field("active_channels", json!(active_channels))
            .field("disabled_channels", json!(disabled_channels));

        self.send_status(TOPIC_STATUS, envelope);
        self.partial_counts.clear();
        self.last_publication = Instant::now();

        AnalyzerState::ReceiveCommands
    }

    fn receive_commands(&mut self) -> AnalyzerState {
        let message = self
            .commands_socket
            .as_ref()
            .and_then(|socket| socket.recv_command().ok().flatten());

        if let Some(message) = message {
            match message.parse() {
                Ok(Command::Reconfigure { config }) => {
                    self.pending_config = Some(config);
                    self.publish_notice_event("Analyzer reconfiguration");
                    return AnalyzerState::ApplyConfig;
                }
                Ok(Command::Off) | Ok(Command::Quit) => {
                    return AnalyzerState::ClearMemory;
                }
                Ok(other) => {
                    debug!(command = %other, "Command ignored by the analyzer");
                }
                Err(e) => {
                    warn!(error = %e, "Malformed command");
                }
            }
        }

        AnalyzerState::ReadSocket
    }

    fn read_socket(&mut self) -> AnalyzerState {
        let publish_period = Duration::from_secs(self.config.publish_period);

        loop {
            if self.last_publication.elapsed() > publish_period {
                return AnalyzerState::PublishStatus;
            }

            let received = match self.input_socket.as_ref() {
                Some(socket) => socket.recv_nowait(),
                None => return AnalyzerState::CommunicationError,
            };

            match received {
                Ok(Some(message)) if message.topic.has_prefix(TOPIC_WAVEFORMS) => {
                    let started = Instant::now();
                    let (events, waveforms) = self.analyze_payload(&message.payload);
                    self.publish_results(&events, &waveforms);

                    if self.settings.verbosity > 0 {
                        debug!(
                            input_bytes = message.payload.len(),
                            events = events.len(),
                            elapsed_us = started.elapsed().as_micros() as u64,
                            "Message analyzed"
                        );
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => return AnalyzerState::ReadSocket,
                Err(e) => {
                    warn!(error = %e, "Input receive error");
                    return AnalyzerState::ReadSocket;
                }
            }
        }
    }

    /// Walk one waveform payload through the plugin chains
    ///
    /// Returns the surviving events and the encoded forwarded waveforms.
    pub fn analyze_payload(&mut self, payload: &[u8]) -> (Vec<EventPsd>, Vec<u8>) {
        let mut output_events = Vec::with_capacity(payload.len() / EVENT_PSD_SIZE);
        let mut output_waveforms = Vec::with_capacity(if self.config.forward_waveforms {
            payload.len() * 2
        } else {
            0
        });

        for frame in WaveformFrames::new(payload) {
            let view = match frame {
                Ok(view) => view,
                Err(e) => {
                    warn!(error = %e, "Skipping the rest of a truncated payload");
                    break;
                }
            };

            let channel = view.channel;
            let Some(pipeline) = self.pipelines.get_mut(&channel) else {
                self.disabled_channels.insert(channel);
                continue;
            };

            let samples = view.samples();
            let mut waveform = view.to_waveform();

            self.buffers.reset_starter(view.timestamp, channel);
            pipeline
                .timestamp
                .analyze(&samples, &mut waveform, &mut self.buffers);
            if !self.buffers.is_empty() {
                pipeline
                    .energy
                    .analyze(&samples, &mut waveform, &mut self.buffers);
            }

            if self.buffers.is_empty() {
                // The plugins discarded this waveform
                continue;
            }

            let selected = self.buffers.events.len() as u64;
            *self.partial_counts.entry(channel).or_insert(0) += selected;
            *self.total_counts.entry(channel).or_insert(0) += selected;
            output_events.extend_from_slice(&self.buffers.events);

            if self.config.forward_waveforms {
                if !self.config.enable_additional {
                    waveform.clear_additional();
                }
                waveform.encode_into(&mut output_waveforms);
            }
        }

        (output_events, output_waveforms)
    }

    fn publish_results(&mut self, events: &[EventPsd], waveforms: &[u8]) {
        if !waveforms.is_empty() {
            let topic = Topic::numbered(TOPIC_WAVEFORMS, self.waveforms_msg_id, waveforms.len());
            if let Some(socket) = self.data_socket.as_ref() {
                if let Err(e) = socket.send(&topic, waveforms) {
                    warn!(error = %e, "Cannot publish the annotated waveforms");
                }
            }
            self.waveforms_msg_id += 1;
        }

        if !events.is_empty() {
            let payload = crate::common::event::encode_events(events);
            let topic = Topic::numbered(TOPIC_EVENTS, self.events_msg_id, payload.len());
            if let Some(socket) = self.data_socket.as_ref() {
                if let Err(e) = socket.send(&topic, &payload) {
                    warn!(error = %e, "Cannot publish the events");
                }
            }
            self.events_msg_id += 1;
        }
    }

    fn publish_notice_event(&mut self, text: &str) {
        let envelope = StatusEnvelope::event(MODULE_NAME, self.status_msg_id, text);
        self.send_status(TOPIC_NOTICES, envelope);
    }

    fn publish_notice_error(&mut self, text: &str) {
        let envelope = StatusEnvelope::error(MODULE_NAME, self.status_msg_id, text);
        self.send_status(TOPIC_NOTICES, envelope);
    }

    fn send_status(&mut self, topic_prefix: &str, envelope: StatusEnvelope) {
        if let Some(socket) = self.status_socket.as_ref() {
            if let Err(e) =
                socket.send_json(topic_prefix, self.status_msg_id, &envelope.into_value())
            {
                warn!(error = %e, "Cannot publish a status message");
            }
        }
        self.status_msg_id += 1;
    }

    /// Replace the configuration directly (tests and embedding)
    pub fn set_config(&mut self, config: AnalyzerConfig) -> AnalyzerState {
        self.config = config;
        self.apply_config()
    }

    /// The channels with a loaded pipeline, ascending
    pub fn active_channels(&self) -> Vec<u8> {
        self.pipelines.keys().copied().collect()
    }

    /// The channels seen on the input but not configured
    pub fn disabled_channels(&self) -> Vec<u8> {
        self.disabled_channels.iter().copied().collect()
    }

    /// Events counted for `channel` since the last status publication
    pub fn partial_count(&self, channel: u8) -> u64 {
        self.partial_counts.get(&channel).copied().unwrap_or(0)
    }

    /// The current events message id (the `n` suffix of the next topic)
    pub fn events_msg_id(&self) -> u64 {
        self.events_msg_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::waveform::Waveform;
    use crate::config::ChannelConfig;
    use serde_json::json;

    fn analyzer_with_channels(channels: Vec<ChannelConfig>) -> Analyzer {
        let mut analyzer = Analyzer::new(AnalyzerSettings::default(), TerminationFlag::new());
        analyzer.set_config(AnalyzerConfig {
            channels,
            ..Default::default()
        });
        analyzer
    }

    fn channel(id: u8) -> ChannelConfig {
        ChannelConfig {
            id,
            enable: true,
            timestamp_library: None,
            energy_library: None,
            user_config: Value::Null,
        }
    }

    #[test]
    fn default_pipeline_emits_one_event_per_waveform() {
        let mut analyzer = analyzer_with_channels(vec![channel(3)]);

        let mut samples = vec![100i16; 2048];
        for s in samples.iter_mut().skip(110).take(90) {
            *s = 90;
        }
        let waveform = Waveform::new(5555, 3, samples);

        let (events, forwarded) = analyzer.analyze_payload(&waveform.to_bytes());

        assert_eq!(events.len(), 1);
        let event = events[0];
        assert_eq!(event.channel, 3);
        assert_eq!(event.timestamp, 5555);
        assert_eq!(event.qshort, 300);
        assert_eq!(event.qlong, 900);

        // forward_waveforms defaults to on
        assert!(!forwarded.is_empty());
        assert_eq!(analyzer.partial_count(3), 1);
    }

    #[test]
    fn unknown_channel_lands_in_the_disabled_set() {
        let mut analyzer = analyzer_with_channels(vec![channel(0)]);

        let waveform = Waveform::new(1, 9, vec![0; 128]);
        let (events, _) = analyzer.analyze_payload(&waveform.to_bytes());

        assert!(events.is_empty());
        assert_eq!(analyzer.disabled_channels(), vec![9]);
        assert_eq!(analyzer.active_channels(), vec![0]);
    }

    #[test]
    fn truncated_payload_processes_the_complete_prefix() {
        let mut analyzer = analyzer_with_channels(vec![channel(0)]);

        let first = Waveform::new(1, 0, vec![0; 256]);
        let second = Waveform::new(2, 0, vec![0; 256]);
        let mut payload = first.to_bytes();
        payload.extend_from_slice(&second.to_bytes()[..100]);

        let (events, _) = analyzer.analyze_payload(&payload);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, 1);
    }

    #[test]
    fn multiple_records_keep_their_order() {
        let mut analyzer = analyzer_with_channels(vec![channel(0), channel(1)]);

        let mut payload = Vec::new();
        Waveform::new(10, 0, vec![0; 128]).encode_into(&mut payload);
        Waveform::new(20, 1, vec![0; 128]).encode_into(&mut payload);
        Waveform::new(30, 0, vec![0; 128]).encode_into(&mut payload);

        let (events, _) = analyzer.analyze_payload(&payload);
        let timestamps: Vec<u64> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![10, 20, 30]);
    }

    #[test]
    fn reconfigure_resets_the_rate_window() {
        let mut analyzer = analyzer_with_channels(vec![channel(3)]);

        let waveform = Waveform::new(1, 3, vec![0; 128]);
        analyzer.analyze_payload(&waveform.to_bytes());
        assert_eq!(analyzer.partial_count(3), 1);

        // Swapping the channel's plugin pair mid-run keeps the channel
        // active and zeroes its window
        let state = analyzer.set_config(AnalyzerConfig {
            channels: vec![ChannelConfig {
                user_config: json!({"gate_short": 10}),
                ..channel(3)
            }],
            ..Default::default()
        });

        assert_eq!(state, AnalyzerState::PublishStatus);
        assert_eq!(analyzer.active_channels(), vec![3]);
        assert_eq!(analyzer.partial_count(3), 0);
    }

    #[test]
    fn forwarding_can_strip_additional_planes() {
        let mut analyzer = Analyzer::new(AnalyzerSettings::default(), TerminationFlag::new());
        analyzer.set_config(AnalyzerConfig {
            channels: vec![channel(0)],
            enable_additional: false,
            ..Default::default()
        });

        let mut waveform = Waveform::new(1, 0, vec![0; 64]);
        waveform.push_additional(vec![1; 64]).unwrap();

        let (_, forwarded) = analyzer.analyze_payload(&waveform.to_bytes());

        let mut frames = WaveformFrames::new(&forwarded);
        let view = frames.next().unwrap().unwrap();
        assert_eq!(view.additional_waveforms, 0);
    }

    #[test]
    fn forwarding_can_be_disabled() {
        let mut analyzer = Analyzer::new(AnalyzerSettings::default(), TerminationFlag::new());
        analyzer.set_config(AnalyzerConfig {
            channels: vec![channel(0)],
            forward_waveforms: false,
            ..Default::default()
        });

        let waveform = Waveform::new(1, 0, vec![0; 64]);
        let (events, forwarded) = analyzer.analyze_payload(&waveform.to_bytes());
        assert_eq!(events.len(), 1);
        assert!(forwarded.is_empty());
    }
}
