//! Uniform interface over the supported digitizer families
//!
//! Ownership is an enum ([`DigitizerImpl`]), the uniform surface is a
//! trait ([`Digitizer`]); the shared state (name, model, channel flags,
//! verbosity) lives in [`CardCore`], composed inside the generic driver.
//! Hardware itself sits behind the [`link::BoardLink`] seam.

pub mod clock;
pub mod driver;
pub mod link;

use serde_json::Value;
use thiserror::Error;

use crate::common::waveform::Waveform;

pub use clock::TimestampClock;
pub use driver::{CardDriver, FamilyInfo};
pub use link::{BoardLink, BoardProvider, DiscoveredBoard, RawRecord, SimBoardProvider, SimLink};

/// Hardware error kinds
///
/// On [`DigitizerError::Overflow`] the controller issues a
/// `reset_overflow`; any fetch failure escalates to the
/// acquisition-error branch of the state machine.
#[derive(Error, Debug)]
pub enum DigitizerError {
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error("board busy: {0}")]
    Busy(String),
    #[error("data overflow: {0}")]
    Overflow(String),
    #[error("not ready: {0}")]
    NotReady(String),
    #[error("interrupted: {0}")]
    Interrupted(String),
    #[error("I/O failure: {0}")]
    Io(String),
    #[error("external failure: {0}")]
    External(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

/// Shared per-card state
#[derive(Debug, Clone)]
pub struct CardCore {
    pub model: String,
    pub name: String,
    pub channels_number: usize,
    pub channels_enabled: Vec<bool>,
    pub channels_triggering: Vec<bool>,
    pub enabled: bool,
    pub verbosity: u8,
}

impl CardCore {
    pub fn new(model: &str, name: &str, channels_number: usize, verbosity: u8) -> Self {
        Self {
            model: model.to_string(),
            name: name.to_string(),
            channels_number,
            channels_enabled: vec![false; channels_number],
            channels_triggering: vec![false; channels_number],
            enabled: false,
            verbosity,
        }
    }

    pub fn is_channel_enabled(&self, channel: usize) -> bool {
        self.channels_enabled.get(channel).copied().unwrap_or(false)
    }

    pub fn is_channel_triggering(&self, channel: usize) -> bool {
        self.channels_triggering
            .get(channel)
            .copied()
            .unwrap_or(false)
    }
}

/// Clock source of the sampling PLL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    #[default]
    Internal,
    External,
}

/// Trigger source of the acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// Per-channel level trigger
    #[default]
    Level,
    External,
    Software,
    Periodic,
}

/// Trigger edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerSlope {
    #[default]
    Falling,
    Rising,
}

/// Per-channel register settings
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSetup {
    pub enabled: bool,
    pub triggering: bool,
    /// Input range in volts peak-to-peak
    pub input_range: f64,
    /// DC offset in percent of the range
    pub dc_offset: f64,
    /// Digital baseline stabilization
    pub dbs: bool,
}

impl Default for ChannelSetup {
    fn default() -> Self {
        Self {
            enabled: false,
            triggering: false,
            input_range: 2.0,
            dc_offset: 0.0,
            dbs: false,
        }
    }
}

/// Parsed register image of one board
#[derive(Debug, Clone, PartialEq)]
pub struct BoardSetup {
    pub clock_source: ClockSource,
    pub trigger_mode: TriggerMode,
    pub trigger_slope: TriggerSlope,
    pub trigger_level: i32,
    pub channels: Vec<ChannelSetup>,
    pub samples_per_record: u32,
    pub pretrigger: u32,
    pub records_per_buffer: u32,
    pub transfer_buffer_size: usize,
    pub timestamp_shift: u32,
}

impl Default for BoardSetup {
    fn default() -> Self {
        Self {
            clock_source: ClockSource::Internal,
            trigger_mode: TriggerMode::Level,
            trigger_slope: TriggerSlope::Falling,
            trigger_level: -100,
            channels: Vec::new(),
            samples_per_record: 2048,
            pretrigger: 256,
            records_per_buffer: 8,
            transfer_buffer_size: 1 << 20,
            timestamp_shift: 0,
        }
    }
}

impl BoardSetup {
    /// Parse a card's JSON subtree
    ///
    /// Unknown keys are ignored. `channels_triggering` must be an array
    /// of booleans when present; a scalar mask is rejected instead of
    /// silently broadcast.
    pub fn from_json(config: &Value, channels_number: usize) -> Result<Self, DigitizerError> {
        let mut setup = BoardSetup {
            channels: vec![ChannelSetup::default(); channels_number],
            ..Default::default()
        };

        if let Some(text) = config.get("clock_source").and_then(Value::as_str) {
            setup.clock_source = match text {
                "internal" => ClockSource::Internal,
                "external" => ClockSource::External,
                other => {
                    return Err(DigitizerError::Invalid(format!("clock_source: {other}")))
                }
            };
        }

        if let Some(text) = config.get("trigger_mode").and_then(Value::as_str) {
            setup.trigger_mode = match text {
                "level" => TriggerMode::Level,
                "external" => TriggerMode::External,
                "software" => TriggerMode::Software,
                "periodic" => TriggerMode::Periodic,
                other => {
                    return Err(DigitizerError::Invalid(format!("trigger_mode: {other}")))
                }
            };
        }

        if let Some(text) = config.get("trigger_slope").and_then(Value::as_str) {
            setup.trigger_slope = match text {
                "falling" => TriggerSlope::Falling,
                "rising" => TriggerSlope::Rising,
                other => {
                    return Err(DigitizerError::Invalid(format!("trigger_slope: {other}")))
                }
            };
        }

        if let Some(level) = config.get("trigger_level").and_then(Value::as_i64) {
            setup.trigger_level = level as i32;
        }
        if let Some(n) = config.get("samples_per_record").and_then(Value::as_u64) {
            setup.samples_per_record = n as u32;
        }
        if let Some(n) = config.get("pretrigger").and_then(Value::as_u64) {
            setup.pretrigger = n as u32;
        }
        if let Some(n) = config.get("records_per_buffer").and_then(Value::as_u64) {
            setup.records_per_buffer = n as u32;
        }
        if let Some(n) = config.get("transfer_buffer_size").and_then(Value::as_u64) {
            setup.transfer_buffer_size = n as usize;
        }
        if let Some(n) = config.get("timestamp_shift").and_then(Value::as_u64) {
            setup.timestamp_shift = n as u32;
        }

        if let Some(channels) = config.get("channels") {
            let entries = channels.as_array().ok_or_else(|| {
                DigitizerError::Invalid("channels must be an array".to_string())
            })?;
            for entry in entries {
                let id = entry
                    .get("id")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        DigitizerError::Invalid("channel entry without id".to_string())
                    })? as usize;
                let slot = setup.channels.get_mut(id).ok_or_else(|| {
                    DigitizerError::Invalid(format!(
                        "channel id {id} beyond the board's {channels_number} channels"
                    ))
                })?;

                if let Some(enabled) = entry.get("enabled").and_then(Value::as_bool) {
                    slot.enabled = enabled;
                }
                if let Some(triggering) = entry.get("triggering").and_then(Value::as_bool) {
                    slot.triggering = triggering;
                }
                if let Some(range) = entry.get("input_range").and_then(Value::as_f64) {
                    slot.input_range = range;
                }
                if let Some(offset) = entry.get("dc_offset").and_then(Value::as_f64) {
                    slot.dc_offset = offset;
                }
                if let Some(dbs) = entry.get("dbs").and_then(Value::as_bool) {
                    slot.dbs = dbs;
                }
            }
        }

        // Two config dialects disagree here: one writes a per-channel
        // array, one a scalar bitmask. Only the array is accepted.
        if let Some(triggering) = config.get("channels_triggering") {
            let flags = triggering.as_array().ok_or_else(|| {
                DigitizerError::Invalid(
                    "channels_triggering must be an array of booleans, not a scalar mask"
                        .to_string(),
                )
            })?;
            for (id, flag) in flags.iter().enumerate() {
                let value = flag.as_bool().ok_or_else(|| {
                    DigitizerError::Invalid(
                        "channels_triggering entries must be booleans".to_string(),
                    )
                })?;
                if let Some(slot) = setup.channels.get_mut(id) {
                    slot.triggering = value;
                }
            }
        }

        Ok(setup)
    }
}

/// The uniform capability contract of §4.1
pub trait Digitizer {
    /// Bind to a physical board; idempotent if already bound
    fn initialize(&mut self, slot: usize) -> Result<(), DigitizerError>;

    /// Parse the card's JSON subtree; never touches hardware
    fn read_config(&mut self, config: &Value) -> Result<(), DigitizerError>;

    /// Push the parsed fields to hardware
    fn configure(&mut self) -> Result<(), DigitizerError>;

    fn start(&mut self) -> Result<(), DigitizerError>;
    fn rearm(&mut self) -> Result<(), DigitizerError>;
    fn stop(&mut self) -> Result<(), DigitizerError>;
    fn force_software_trigger(&mut self) -> Result<(), DigitizerError>;
    fn reset_overflow(&mut self) -> Result<(), DigitizerError>;

    fn acquisition_ready(&mut self) -> bool;
    fn data_overflow(&mut self) -> bool;

    /// Drain one hardware buffer into timestamp-corrected waveforms;
    /// non-blocking and bounded
    fn get_waveforms(&mut self, out: &mut Vec<Waveform>) -> Result<(), DigitizerError>;

    fn model(&self) -> &str;
    fn serial(&self) -> &str;
    fn channels_number(&self) -> usize;
    fn is_channel_enabled(&self, channel: usize) -> bool;
    fn is_channel_triggering(&self, channel: usize) -> bool;
    fn verbosity(&self) -> u8;

    /// Vendor-specific runtime back door
    fn specific_command(&mut self, arguments: &Value) -> Result<Value, DigitizerError>;
}

/// The supported board families
pub enum DigitizerImpl {
    LegacyFast2ch(CardDriver),
    LegacyFast4ch(CardDriver),
    FastDaq(CardDriver),
    FastPulseDetect(CardDriver),
    WideDaq(CardDriver),
}

impl DigitizerImpl {
    /// Build the driver selected by the configured model name
    pub fn from_model(
        model: &str,
        serial: &str,
        link: Box<dyn BoardLink>,
        verbosity: u8,
    ) -> Result<Self, DigitizerError> {
        match model {
            "LegacyFast2ch" => Ok(Self::LegacyFast2ch(CardDriver::new(
                driver::LEGACY_FAST_2CH,
                serial,
                link,
                verbosity,
            ))),
            "LegacyFast4ch" => Ok(Self::LegacyFast4ch(CardDriver::new(
                driver::LEGACY_FAST_4CH,
                serial,
                link,
                verbosity,
            ))),
            "FastDAQ" => Ok(Self::FastDaq(CardDriver::new(
                driver::FAST_DAQ,
                serial,
                link,
                verbosity,
            ))),
            "FastPulseDetect" => Ok(Self::FastPulseDetect(CardDriver::new(
                driver::FAST_PULSE_DETECT,
                serial,
                link,
                verbosity,
            ))),
            "WideDAQ" => Ok(Self::WideDaq(CardDriver::new(
                driver::WIDE_DAQ,
                serial,
                link,
                verbosity,
            ))),
            other => Err(DigitizerError::Invalid(format!(
                "unknown digitizer model: {other}"
            ))),
        }
    }

    fn inner(&self) -> &CardDriver {
        match self {
            Self::LegacyFast2ch(d)
            | Self::LegacyFast4ch(d)
            | Self::FastDaq(d)
            | Self::FastPulseDetect(d)
            | Self::WideDaq(d) => d,
        }
    }

    fn inner_mut(&mut self) -> &mut CardDriver {
        match self {
            Self::LegacyFast2ch(d)
            | Self::LegacyFast4ch(d)
            | Self::FastDaq(d)
            | Self::FastPulseDetect(d)
            | Self::WideDaq(d) => d,
        }
    }
}

impl Digitizer for DigitizerImpl {
    fn initialize(&mut self, slot: usize) -> Result<(), DigitizerError> {
        self.inner_mut().initialize(slot)
    }

    fn read_config(&mut self, config: &Value) -> Result<(), DigitizerError> {
        self.inner_mut().read_config(config)
    }

    fn configure(&mut self) -> Result<(), DigitizerError> {
        self.inner_mut().configure()
    }

    fn start(&mut self) -> Result<(), DigitizerError> {
        self.inner_mut().start()
    }

    fn rearm(&mut self) -> Result<(), DigitizerError> {
        self.inner_mut().rearm()
    }

    fn stop(&mut self) -> Result<(), DigitizerError> {
        self.inner_mut().stop()
    }

    fn force_software_trigger(&mut self) -> Result<(), DigitizerError> {
        self.inner_mut().force_software_trigger()
    }

    fn reset_overflow(&mut self) -> Result<(), DigitizerError> {
        self.inner_mut().reset_overflow()
    }

    fn acquisition_ready(&mut self) -> bool {
        self.inner_mut().acquisition_ready()
    }

    fn data_overflow(&mut self) -> bool {
        self.inner_mut().data_overflow()
    }

    fn get_waveforms(&mut self, out: &mut Vec<Waveform>) -> Result<(), DigitizerError> {
        self.inner_mut().get_waveforms(out)
    }

    fn model(&self) -> &str {
        &self.inner().core.model
    }

    fn serial(&self) -> &str {
        &self.inner().core.name
    }

    fn channels_number(&self) -> usize {
        self.inner().core.channels_number
    }

    fn is_channel_enabled(&self, channel: usize) -> bool {
        self.inner().core.is_channel_enabled(channel)
    }

    fn is_channel_triggering(&self, channel: usize) -> bool {
        self.inner().core.is_channel_triggering(channel)
    }

    fn verbosity(&self) -> u8 {
        self.inner().core.verbosity
    }

    fn specific_command(&mut self, arguments: &Value) -> Result<Value, DigitizerError> {
        match self {
            // Pulse-detection firmware has its own runtime mode switch
            Self::FastPulseDetect(d) => d.specific_command_pulse_detect(arguments),
            _ => self.inner_mut().specific_command(arguments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setup_defaults() {
        let setup = BoardSetup::from_json(&json!({}), 4).unwrap();
        assert_eq!(setup.channels.len(), 4);
        assert_eq!(setup.samples_per_record, 2048);
        assert_eq!(setup.clock_source, ClockSource::Internal);
        assert_eq!(setup.trigger_slope, TriggerSlope::Falling);
    }

    #[test]
    fn setup_parses_known_keys() {
        let setup = BoardSetup::from_json(
            &json!({
                "clock_source": "external",
                "trigger_mode": "software",
                "trigger_slope": "rising",
                "trigger_level": -250,
                "samples_per_record": 1024,
                "pretrigger": 128,
                "records_per_buffer": 16,
                "timestamp_shift": 3,
                "channels": [
                    {"id": 0, "enabled": true, "triggering": true, "dbs": true},
                    {"id": 2, "enabled": true, "input_range": 0.5, "dc_offset": 25.0}
                ],
                "an_unknown_key": "ignored"
            }),
            4,
        )
        .unwrap();

        assert_eq!(setup.clock_source, ClockSource::External);
        assert_eq!(setup.trigger_mode, TriggerMode::Software);
        assert_eq!(setup.trigger_slope, TriggerSlope::Rising);
        assert_eq!(setup.trigger_level, -250);
        assert_eq!(setup.samples_per_record, 1024);
        assert_eq!(setup.timestamp_shift, 3);
        assert!(setup.channels[0].enabled && setup.channels[0].triggering);
        assert!(setup.channels[0].dbs);
        assert!(setup.channels[2].enabled);
        assert_eq!(setup.channels[2].input_range, 0.5);
        assert!(!setup.channels[1].enabled);
    }

    #[test]
    fn channel_id_out_of_range_rejected() {
        let result = BoardSetup::from_json(
            &json!({"channels": [{"id": 7, "enabled": true}]}),
            4,
        );
        assert!(matches!(result, Err(DigitizerError::Invalid(_))));
    }

    #[test]
    fn triggering_scalar_mask_rejected() {
        let result = BoardSetup::from_json(&json!({"channels_triggering": 3}), 4);
        assert!(matches!(result, Err(DigitizerError::Invalid(_))));
    }

    #[test]
    fn triggering_array_accepted() {
        let setup = BoardSetup::from_json(
            &json!({"channels_triggering": [true, false, true, false]}),
            4,
        )
        .unwrap();
        assert!(setup.channels[0].triggering);
        assert!(!setup.channels[1].triggering);
        assert!(setup.channels[2].triggering);
    }

    #[test]
    fn unknown_model_rejected() {
        let result =
            DigitizerImpl::from_model("Mystery-9000", "SN-0", Box::new(SimLink::new(0)), 0);
        assert!(matches!(result, Err(DigitizerError::Invalid(_))));
    }
}
