//! The acquisition controller
//!
//! A single-threaded cooperative state machine driven by a ~1 ms base
//! tick and external JSON commands. It owns the digitizer objects and
//! the outgoing waveform buffer, drains the hardware with back-pressure,
//! publishes waveform bursts on the data socket and recovers from
//! transient hardware errors by recreating the digitizers without ever
//! losing the sockets.
//!
//! Around every state action the controller runs the user hooks keyed by
//! `(state id, pre|post)`; a latched termination signal forces the next
//! iteration into `clear_memory`, so shutdown always unwinds through the
//! machine's own cleanup edges.

pub mod state;

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::common::envelope::{Command, StatusEnvelope};
use crate::common::error::{PipelineError, PipelineResult};
use crate::common::shutdown::TerminationFlag;
use crate::common::topic::{Topic, TOPIC_NOTICES, TOPIC_STATUS, TOPIC_WAVEFORMS};
use crate::common::waveform::WAVEFORM_HEADER_SIZE;
use crate::config::{AcquisitionConfig, ScriptPhase};
use crate::digitizer::{BoardProvider, Digitizer, DigitizerImpl};
use crate::scripts::ScriptHooks;
use crate::transport::{PubSocket, PullSocket};

pub use state::State;

const MODULE_NAME: &str = "wavedaq_acquisition";

/// Static settings of one controller instance
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub status_address: String,
    pub data_address: String,
    pub commands_address: String,
    pub config_file: String,
    pub base_period: Duration,
    pub verbosity: u8,
    pub identify_only: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            status_address: "tcp://*:16180".to_string(),
            data_address: "tcp://*:16181".to_string(),
            commands_address: "tcp://*:16182".to_string(),
            config_file: "config.json".to_string(),
            base_period: Duration::from_millis(1),
            verbosity: 0,
            identify_only: false,
        }
    }
}

/// The acquisition controller and all of its owned state
pub struct Controller {
    settings: ControllerSettings,
    terminate: TerminationFlag,
    hooks: ScriptHooks,
    provider: Box<dyn BoardProvider>,

    context: Option<zmq::Context>,
    status_socket: Option<PubSocket>,
    data_socket: Option<PubSocket>,
    commands_socket: Option<PullSocket>,
    control_unit_ready: bool,

    config: AcquisitionConfig,
    pending_config: Option<Value>,

    digitizers: Vec<DigitizerImpl>,
    /// `(digitizer index, user id)` in polling order
    digitizer_user_ids: Vec<(usize, u8)>,
    channels_number: usize,

    counts: Vec<u64>,
    partial_counts: Vec<u64>,
    icr_counts: Vec<u64>,
    partial_icr_counts: Vec<u64>,

    waveforms_buffer: Vec<u8>,
    waveforms_in_buffer: usize,

    status_msg_id: u64,
    data_msg_id: u64,
    last_publication: Instant,
    start_time: Option<Instant>,
}

impl Controller {
    pub fn new(
        settings: ControllerSettings,
        provider: Box<dyn BoardProvider>,
        terminate: TerminationFlag,
    ) -> Self {
        Self {
            settings,
            terminate,
            hooks: ScriptHooks::empty(),
            provider,
            context: None,
            status_socket: None,
            data_socket: None,
            commands_socket: None,
            control_unit_ready: false,
            config: AcquisitionConfig::default(),
            pending_config: None,
            digitizers: Vec::new(),
            digitizer_user_ids: Vec::new(),
            channels_number: 0,
            counts: Vec::new(),
            partial_counts: Vec::new(),
            icr_counts: Vec::new(),
            partial_icr_counts: Vec::new(),
            waveforms_buffer: Vec::new(),
            waveforms_in_buffer: 0,
            status_msg_id: 0,
            data_msg_id: 0,
            last_publication: Instant::now(),
            start_time: None,
        }
    }

    /// Run the state machine until the terminal state
    pub fn run(&mut self) -> PipelineResult<()> {
        let mut current = State::Start;

        loop {
            // A latched termination signal forces the cleanup branch,
            // once: clearing the latch keeps the unwind from looping
            if self.terminate.is_requested() && !current.is_closing() {
                info!(from = %current, "Termination latched, forcing clear_memory");
                current = State::ClearMemory;
            }

            if current == State::Stop {
                break;
            }

            if self.settings.verbosity > 1 {
                debug!(state = %current, "Entering state");
            }

            let id = current.id();
            self.hooks.invoke(id, ScriptPhase::Pre);
            let next = self.step(current);
            self.hooks.invoke(id, ScriptPhase::Post);

            current = next;
            std::thread::sleep(self.settings.base_period);
        }

        info!("Controller stopped");
        Ok(())
    }

    /// Execute one state action and return the next state
    pub fn step(&mut self, current: State) -> State {
        match current {
            State::Start => State::CreateContext,
            State::CreateContext => self.create_context(),
            State::CreateSockets => self.create_sockets(),
            State::BindSockets => self.bind_sockets(),
            State::CreateControlUnit => self.create_control_unit(),
            State::CreateDigitizer => self.create_digitizer(State::ReadConfig),
            State::ReadConfig => self.read_config(),
            State::ConfigureDigitizer => self.configure_digitizer(State::AllocateMemory),
            State::AllocateMemory => self.allocate_memory(State::PublishStatus),
            State::PublishStatus => self.publish_status(),
            State::ReceiveCommands => self.receive_commands(),
            State::StartAcquisition => self.start_acquisition(),
            State::AcquisitionReceiveCommands => self.acquisition_receive_commands(),
            State::ReadData => self.read_data(),
            State::PublishEvents => self.publish_events(),
            State::AcquisitionPublishStatus => self.acquisition_publish_status(),
            State::StopPublishEvents => self.stop_publish_events(),
            State::StopAcquisition => self.stop_acquisition(State::ReceiveCommands),
            State::ClearMemory => self.clear_memory(State::DestroyDigitizer),
            State::DestroyDigitizer => self.destroy_digitizer(State::DestroyControlUnit),
            State::DestroyControlUnit => self.destroy_control_unit(),
            State::CloseSockets => self.close_sockets(),
            State::DestroyContext => self.destroy_context(),
            State::Stop => State::Stop,
            State::RecreateDigitizer => self.create_digitizer(State::ConfigureDigitizer),
            State::ReconfigureClearMemory => {
                self.clear_memory(State::ReconfigureDestroyDigitizer)
            }
            State::ReconfigureDestroyDigitizer => {
                self.destroy_digitizer(State::RecreateDigitizer)
            }
            State::RestartPublishEvents => {
                self.flush_waveforms();
                State::RestartStopAcquisition
            }
            State::RestartStopAcquisition => {
                self.stop_acquisition(State::RestartClearMemory)
            }
            State::RestartClearMemory => self.clear_memory(State::RestartDestroyDigitizer),
            State::RestartDestroyDigitizer => {
                self.destroy_digitizer(State::RestartCreateDigitizer)
            }
            State::RestartCreateDigitizer => {
                self.create_digitizer(State::RestartConfigureDigitizer)
            }
            State::RestartConfigureDigitizer => {
                self.configure_digitizer(State::RestartAllocateMemory)
            }
            State::RestartAllocateMemory => self.allocate_memory(State::StartAcquisition),
            State::AcquisitionError => {
                self.publish_notice_error("Acquisition error, restarting the digitizers");
                State::RestartPublishEvents
            }
            State::CommunicationError => {
                error!("Communication error, closing the session");
                State::CloseSockets
            }
            State::ParseError => {
                self.publish_notice_error("Configuration parse error");
                State::CloseSockets
            }
            State::ConfigureError => {
                self.publish_notice_error("Configuration error, recreating the digitizers");
                State::ReconfigureDestroyDigitizer
            }
            State::DigitizerError => {
                self.publish_notice_error("Digitizer error, rebuilding from scratch");
                State::ReconfigureClearMemory
            }
        }
    }

    // ------------------------------------------------------------------
    // Setup states

    fn create_context(&mut self) -> State {
        self.context = Some(zmq::Context::new());
        State::CreateSockets
    }

    fn create_sockets(&mut self) -> State {
        let Some(context) = self.context.clone() else {
            return State::CommunicationError;
        };

        let status = PubSocket::create(&context);
        let data = PubSocket::create(&context);
        let commands = PullSocket::create(&context);

        match (status, data, commands) {
            (Ok(status), Ok(data), Ok(commands)) => {
                self.status_socket = Some(status);
                self.data_socket = Some(data);
                self.commands_socket = Some(commands);
                State::BindSockets
            }
            _ => {
                error!("Failed to create the sockets");
                State::CommunicationError
            }
        }
    }

    fn bind_sockets(&mut self) -> State {
        let bind = || -> PipelineResult<()> {
            self.status_socket
                .as_ref()
                .ok_or_else(|| PipelineError::other("missing status socket"))?
                .bind(&self.settings.status_address)?;
            self.data_socket
                .as_ref()
                .ok_or_else(|| PipelineError::other("missing data socket"))?
                .bind(&self.settings.data_address)?;
            self.commands_socket
                .as_ref()
                .ok_or_else(|| PipelineError::other("missing commands socket"))?
                .bind(&self.settings.commands_address)?;
            Ok(())
        };

        match bind() {
            Ok(()) => {
                info!(
                    status = %self.settings.status_address,
                    data = %self.settings.data_address,
                    commands = %self.settings.commands_address,
                    "Sockets bound"
                );
                State::CreateControlUnit
            }
            Err(e) => {
                error!(error = %e, "Failed to bind the sockets");
                State::CommunicationError
            }
        }
    }

    fn create_control_unit(&mut self) -> State {
        self.control_unit_ready = true;
        State::CreateDigitizer
    }

    fn create_digitizer(&mut self, on_success: State) -> State {
        let boards = match self.provider.discover() {
            Ok(boards) => boards,
            Err(e) => {
                error!(error = %e, "Board discovery failed");
                return State::DigitizerError;
            }
        };

        self.digitizers.clear();
        for (slot, board) in boards.into_iter().enumerate() {
            let mut digitizer = match DigitizerImpl::from_model(
                &board.model,
                &board.serial,
                board.link,
                self.settings.verbosity,
            ) {
                Ok(digitizer) => digitizer,
                Err(e) => {
                    error!(model = %board.model, serial = %board.serial, error = %e,
                        "Cannot create the digitizer");
                    return State::DigitizerError;
                }
            };

            if let Err(e) = digitizer.initialize(slot) {
                error!(serial = %board.serial, error = %e, "Cannot initialize the digitizer");
                return State::DigitizerError;
            }

            info!(
                slot,
                model = digitizer.model(),
                serial = digitizer.serial(),
                channels = digitizer.channels_number(),
                "Digitizer created"
            );
            self.digitizers.push(digitizer);
        }

        if self.settings.identify_only {
            info!("Identification only, quitting");
            return State::ClearMemory;
        }

        on_success
    }

    fn read_config(&mut self) -> State {
        match AcquisitionConfig::load(&self.settings.config_file) {
            Ok(config) => {
                info!(file = %self.settings.config_file, "Configuration loaded");
                self.config = config;
                State::ConfigureDigitizer
            }
            Err(e) => {
                error!(file = %self.settings.config_file, error = %e,
                    "Cannot read the configuration");
                State::ParseError
            }
        }
    }

    fn configure_digitizer(&mut self, on_success: State) -> State {
        if let Some(pending) = self.pending_config.take() {
            match AcquisitionConfig::from_value(pending) {
                Ok(config) => self.config = config,
                Err(e) => {
                    error!(error = %e, "Reconfiguration document is invalid");
                    return State::ConfigureError;
                }
            }
        }

        // Refresh the user hooks with the new scripts array
        match self.config.scripts_map() {
            Ok(map) => self.hooks.replace(map),
            Err(e) => {
                error!(error = %e, "Cannot load the user scripts");
                return State::ConfigureError;
            }
        }

        self.digitizer_user_ids.clear();
        let mut channels_number = 0usize;

        let cards: Vec<_> = self.config.enabled_cards().cloned().collect();
        for card in &cards {
            let Some(index) = self
                .digitizers
                .iter()
                .position(|d| d.serial() == card.serial)
            else {
                error!(serial = %card.serial, "Configured card not found among the boards");
                return State::ConfigureError;
            };

            let settings = self.config.card_settings(card);
            let digitizer = &mut self.digitizers[index];

            if let Err(e) = digitizer.read_config(&settings) {
                error!(serial = %card.serial, error = %e, "read_config failed");
                return State::ConfigureError;
            }
            if let Err(e) = digitizer.configure() {
                error!(serial = %card.serial, error = %e, "configure failed");
                return State::ConfigureError;
            }

            let per_board = digitizer.channels_number();
            channels_number =
                channels_number.max((card.user_id as usize + 1) * per_board);
            self.digitizer_user_ids.push((index, card.user_id));

            info!(
                serial = %card.serial,
                user_id = card.user_id,
                channels = per_board,
                "Card configured"
            );
        }

        self.channels_number = channels_number;
        self.publish_notice_event("Digitizers configured");

        on_success
    }

    fn allocate_memory(&mut self, on_success: State) -> State {
        let expected_record = WAVEFORM_HEADER_SIZE
            + 2 * self.config.global.expected_samples_number;
        let capacity = self.config.global.waveforms_buffer_size_max * expected_record;

        self.waveforms_buffer.clear();
        self.waveforms_buffer.reserve(capacity);
        self.waveforms_in_buffer = 0;

        debug!(capacity, "Waveform buffer reserved");
        on_success
    }

    // ------------------------------------------------------------------
    // Idle loop

    fn publish_status(&mut self) -> State {
        let envelope = StatusEnvelope::new(MODULE_NAME, self.status_msg_id)
            .field("config", serde_json::to_value(&self.config).unwrap_or(Value::Null))
            .field("acquisition", json!({"running": false}))
            .field("digitizer", self.digitizer_status());

        self.send_status(TOPIC_STATUS, envelope);
        self.reset_partial_counts();
        self.last_publication = Instant::now();

        State::ReceiveCommands
    }

    fn receive_commands(&mut self) -> State {
        if let Some(message) = self.poll_command() {
            match message.parse() {
                Ok(Command::Start) => {
                    info!("### Start!!! ###");
                    return State::StartAcquisition;
                }
                Ok(Command::Reconfigure { config }) => {
                    self.pending_config = Some(config);
                    self.publish_notice_event("Digitizer reconfiguration");
                    return State::ConfigureDigitizer;
                }
                Ok(Command::Specific { arguments }) => {
                    self.route_specific(&arguments);
                }
                Ok(Command::Off) | Ok(Command::Quit) => {
                    return State::ClearMemory;
                }
                Ok(other) => {
                    debug!(command = %other, "Command ignored in the idle loop");
                }
                Err(e) => {
                    warn!(error = %e, "Malformed command");
                }
            }
        }

        if self.publish_period_elapsed() {
            return State::PublishStatus;
        }

        State::ReceiveCommands
    }

    // ------------------------------------------------------------------
    // Acquisition loop

    fn start_acquisition(&mut self) -> State {
        self.publish_notice_event("Start acquisition");

        self.counts = vec![0; self.channels_number];
        self.partial_counts = vec![0; self.channels_number];
        self.icr_counts = vec![0; self.channels_number];
        self.partial_icr_counts = vec![0; self.channels_number];

        for &(index, _) in &self.digitizer_user_ids {
            let digitizer = &mut self.digitizers[index];
            if let Err(e) = digitizer.start() {
                error!(serial = digitizer.serial(), error = %e, "start failed");
                return State::AcquisitionError;
            }
            if let Err(e) = digitizer.rearm() {
                error!(serial = digitizer.serial(), error = %e, "rearm failed");
                return State::AcquisitionError;
            }
        }

        self.start_time = Some(Instant::now());
        State::AcquisitionReceiveCommands
    }

    fn acquisition_receive_commands(&mut self) -> State {
        if let Some(message) = self.poll_command() {
            match message.parse() {
                Ok(Command::Stop) => {
                    info!("### Stop!!! ###");
                    return State::StopPublishEvents;
                }
                Ok(Command::SimulateError) => {
                    self.publish_notice_event("Simulated error");
                    return State::AcquisitionError;
                }
                Ok(other) => {
                    debug!(command = %other, "Command ignored while running");
                }
                Err(e) => {
                    warn!(error = %e, "Malformed command");
                }
            }
        }

        State::ReadData
    }

    fn read_data(&mut self) -> State {
        let mut is_error = false;
        let mut fetched = Vec::new();

        for position in 0..self.digitizer_user_ids.len() {
            let (index, user_id) = self.digitizer_user_ids[position];
            let digitizer = &mut self.digitizers[index];

            if digitizer.data_overflow() {
                let serial = digitizer.serial().to_string();
                let _ = digitizer.reset_overflow();
                self.publish_notice_error(&format!("Data overflow in digitizer: {serial}"));
                continue;
            }

            if !digitizer.acquisition_ready() {
                continue;
            }

            fetched.clear();
            if let Err(e) = digitizer.get_waveforms(&mut fetched) {
                let serial = digitizer.serial().to_string();
                error!(serial = %serial, error = %e, "Waveform fetch failed");
                self.publish_notice_error(&format!("Data fetch failure in digitizer: {serial}"));
                is_error = true;
                continue;
            }

            let per_board = digitizer.channels_number();
            for mut waveform in fetched.drain(..) {
                let global_channel =
                    waveform.channel as usize + user_id as usize * per_board;
                waveform.channel = global_channel as u8;

                if let Some(count) = self.counts.get_mut(global_channel) {
                    *count += 1;
                }
                if let Some(count) = self.partial_counts.get_mut(global_channel) {
                    *count += 1;
                }
                if let Some(count) = self.icr_counts.get_mut(global_channel) {
                    *count += 1;
                }
                if let Some(count) = self.partial_icr_counts.get_mut(global_channel) {
                    *count += 1;
                }

                waveform.encode_into(&mut self.waveforms_buffer);
                self.waveforms_in_buffer += 1;
            }

            let digitizer = &mut self.digitizers[index];
            if let Err(e) = digitizer.rearm() {
                warn!(serial = digitizer.serial(), error = %e, "rearm failed");
            }
        }

        if is_error {
            return State::AcquisitionError;
        }

        if self.waveforms_in_buffer >= self.config.global.waveforms_buffer_size_max
            || self.publish_period_elapsed()
        {
            return State::PublishEvents;
        }

        State::ReadData
    }

    fn publish_events(&mut self) -> State {
        self.flush_waveforms();

        if self.publish_period_elapsed() {
            return State::AcquisitionPublishStatus;
        }
        State::ReadData
    }

    fn acquisition_publish_status(&mut self) -> State {
        let elapsed = self.last_publication.elapsed().as_secs_f64().max(1e-9);
        let runtime = self
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let rates: Vec<f64> = self
            .partial_counts
            .iter()
            .map(|&c| c as f64 / elapsed)
            .collect();
        let icr_rates: Vec<f64> = self
            .partial_icr_counts
            .iter()
            .map(|&c| c as f64 / elapsed)
            .collect();

        let envelope = StatusEnvelope::new(MODULE_NAME, self.status_msg_id)
            .field("config", serde_json::to_value(&self.config).unwrap_or(Value::Null))
            .field(
                "acquisition",
                json!({
                    "running": true,
                    "runtime": runtime,
                    "rates": rates,
                    "ICR_rates": icr_rates,
                    "counts": self.counts,
                    "ICR_counts": self.icr_counts,
                }),
            )
            .field("digitizer", self.digitizer_status());

        self.send_status(TOPIC_STATUS, envelope);
        self.reset_partial_counts();
        self.last_publication = Instant::now();

        State::ReadData
    }

    fn stop_publish_events(&mut self) -> State {
        self.flush_waveforms();
        State::StopAcquisition
    }

    fn stop_acquisition(&mut self, on_success: State) -> State {
        self.publish_notice_event("Stop acquisition");

        for &(index, _) in &self.digitizer_user_ids {
            let digitizer = &mut self.digitizers[index];
            if let Err(e) = digitizer.stop() {
                warn!(serial = digitizer.serial(), error = %e, "stop failed");
            }
        }

        self.start_time = None;
        on_success
    }

    // ------------------------------------------------------------------
    // Teardown states

    fn clear_memory(&mut self, on_success: State) -> State {
        self.waveforms_buffer = Vec::new();
        self.waveforms_in_buffer = 0;
        on_success
    }

    fn destroy_digitizer(&mut self, on_success: State) -> State {
        for digitizer in &mut self.digitizers {
            let _ = digitizer.stop();
        }
        self.digitizers.clear();
        self.digitizer_user_ids.clear();
        on_success
    }

    fn destroy_control_unit(&mut self) -> State {
        self.control_unit_ready = false;
        State::CloseSockets
    }

    fn close_sockets(&mut self) -> State {
        self.status_socket = None;
        self.data_socket = None;
        self.commands_socket = None;
        State::DestroyContext
    }

    fn destroy_context(&mut self) -> State {
        self.context = None;
        State::Stop
    }

    // ------------------------------------------------------------------
    // Helpers

    fn poll_command(&mut self) -> Option<crate::common::envelope::CommandMessage> {
        let socket = self.commands_socket.as_ref()?;
        match socket.recv_command() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Error receiving a command frame");
                None
            }
        }
    }

    fn route_specific(&mut self, arguments: &Value) {
        let serial = arguments
            .get("serial")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some(index) = self
            .digitizers
            .iter()
            .position(|d| d.serial() == serial)
        else {
            warn!(serial = %serial, "Specific command for an unknown card");
            return;
        };

        let description = format!("Specific command to {serial}");
        match self.digitizers[index].specific_command(arguments) {
            Ok(reply) => {
                info!(serial = %serial, reply = %reply, "Specific command done");
                self.publish_notice_event(&description);
            }
            Err(e) => {
                warn!(serial = %serial, error = %e, "Specific command failed");
                self.publish_notice_error(&format!("{description}: {e}"));
            }
        }
    }

    /// Publish the outgoing buffer as one waveform burst
    fn flush_waveforms(&mut self) {
        if self.waveforms_buffer.is_empty() {
            return;
        }

        let topic = Topic::sized(TOPIC_WAVEFORMS, self.waveforms_buffer.len());
        if let Some(socket) = self.data_socket.as_ref() {
            if let Err(e) = socket.send(&topic, &self.waveforms_buffer) {
                error!(error = %e, "Failed to publish the waveform burst");
            } else {
                debug!(
                    waveforms = self.waveforms_in_buffer,
                    bytes = self.waveforms_buffer.len(),
                    "Waveform burst published"
                );
                self.data_msg_id += 1;
            }
        }

        // Keep the capacity, drop the content
        self.waveforms_buffer.clear();
        self.waveforms_in_buffer = 0;
    }

    fn digitizer_status(&self) -> Value {
        let cards: Vec<Value> = self
            .digitizer_user_ids
            .iter()
            .map(|&(index, user_id)| {
                let digitizer = &self.digitizers[index];
                json!({
                    "serial": digitizer.serial(),
                    "model": digitizer.model(),
                    "user_id": user_id,
                    "channels": digitizer.channels_number(),
                })
            })
            .collect();

        json!({
            "valid": !self.digitizers.is_empty(),
            "active": self.start_time.is_some(),
            "control_unit": self.control_unit_ready,
            "cards": cards,
        })
    }

    fn publish_notice_event(&mut self, text: &str) {
        let envelope = StatusEnvelope::event(MODULE_NAME, self.status_msg_id, text);
        self.send_status(TOPIC_NOTICES, envelope);
    }

    fn publish_notice_error(&mut self, text: &str) {
        error!("{text}");
        let envelope = StatusEnvelope::error(MODULE_NAME, self.status_msg_id, text);
        self.send_status(TOPIC_NOTICES, envelope);
    }

    fn send_status(&mut self, topic_prefix: &str, envelope: StatusEnvelope) {
        if let Some(socket) = self.status_socket.as_ref() {
            if let Err(e) =
                socket.send_json(topic_prefix, self.status_msg_id, &envelope.into_value())
            {
                warn!(error = %e, "Failed to publish a status message");
            }
        }
        self.status_msg_id += 1;
    }

    fn reset_partial_counts(&mut self) {
        self.partial_counts.iter_mut().for_each(|c| *c = 0);
        self.partial_icr_counts.iter_mut().for_each(|c| *c = 0);
    }

    fn publish_period_elapsed(&self) -> bool {
        self.last_publication.elapsed()
            > Duration::from_secs(self.config.global.publish_period)
    }

    /// Counters as seen by the status publications (tests)
    pub fn total_counts(&self) -> &[u64] {
        &self.counts
    }

    /// The number of global channels after configuration (tests)
    pub fn channels_number(&self) -> usize {
        self.channels_number
    }
}
