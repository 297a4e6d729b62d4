//! The generic card driver behind the family variants
//!
//! The five supported families differ in channel count, counter width
//! and feature set, not in control flow, so one driver parameterized by
//! a [`FamilyInfo`] descriptor serves them all. Family-specific runtime
//! commands live on the [`super::DigitizerImpl`] variants.

use serde_json::Value;
use tracing::{debug, info};

use crate::common::waveform::Waveform;

use super::clock::TimestampClock;
use super::link::{BoardLink, RawRecord};
use super::{BoardSetup, CardCore, DigitizerError};

/// Static description of one board family
#[derive(Debug, Clone, Copy)]
pub struct FamilyInfo {
    pub model: &'static str,
    pub channels_number: usize,
    pub timestamp_bits: u32,
    pub supports_dbs: bool,
    pub max_samples_per_record: u32,
}

pub const LEGACY_FAST_2CH: FamilyInfo = FamilyInfo {
    model: "LegacyFast2ch",
    channels_number: 2,
    timestamp_bits: 42,
    supports_dbs: false,
    max_samples_per_record: 16 * 1024,
};

pub const LEGACY_FAST_4CH: FamilyInfo = FamilyInfo {
    model: "LegacyFast4ch",
    channels_number: 4,
    timestamp_bits: 42,
    supports_dbs: false,
    max_samples_per_record: 16 * 1024,
};

pub const FAST_DAQ: FamilyInfo = FamilyInfo {
    model: "FastDAQ",
    channels_number: 4,
    timestamp_bits: 43,
    supports_dbs: true,
    max_samples_per_record: 64 * 1024,
};

pub const FAST_PULSE_DETECT: FamilyInfo = FamilyInfo {
    model: "FastPulseDetect",
    channels_number: 4,
    timestamp_bits: 43,
    supports_dbs: true,
    max_samples_per_record: 64 * 1024,
};

pub const WIDE_DAQ: FamilyInfo = FamilyInfo {
    model: "WideDAQ",
    channels_number: 2,
    timestamp_bits: 63,
    supports_dbs: true,
    max_samples_per_record: 256 * 1024,
};

/// Driver state shared by every family
pub struct CardDriver {
    pub core: CardCore,
    family: FamilyInfo,
    link: Box<dyn BoardLink>,
    setup: BoardSetup,
    clock: TimestampClock,
    initialized: bool,
    running: bool,
    pulse_detect_enabled: bool,
    fetch_scratch: Vec<RawRecord>,
}

impl CardDriver {
    pub fn new(family: FamilyInfo, serial: &str, link: Box<dyn BoardLink>, verbosity: u8) -> Self {
        Self {
            core: CardCore::new(family.model, serial, family.channels_number, verbosity),
            family,
            link,
            setup: BoardSetup {
                channels: vec![Default::default(); family.channels_number],
                ..Default::default()
            },
            // Counters reset only here: the hardware clock keeps running
            // across start/stop
            clock: TimestampClock::new(family.timestamp_bits, 0),
            initialized: false,
            running: false,
            pulse_detect_enabled: false,
            fetch_scratch: Vec::new(),
        }
    }

    pub fn initialize(&mut self, slot: usize) -> Result<(), DigitizerError> {
        if self.initialized {
            return Ok(());
        }
        self.link.open(slot)?;
        self.initialized = true;
        info!(
            model = self.family.model,
            serial = %self.core.name,
            slot,
            "Digitizer bound"
        );
        Ok(())
    }

    pub fn read_config(&mut self, config: &Value) -> Result<(), DigitizerError> {
        let setup = BoardSetup::from_json(config, self.family.channels_number)?;

        if setup.samples_per_record > self.family.max_samples_per_record {
            return Err(DigitizerError::Invalid(format!(
                "samples_per_record {} exceeds the {} limit of {}",
                setup.samples_per_record, self.family.model, self.family.max_samples_per_record
            )));
        }
        if !self.family.supports_dbs && setup.channels.iter().any(|ch| ch.dbs) {
            return Err(DigitizerError::Unsupported(format!(
                "{} has no digital baseline stabilization",
                self.family.model
            )));
        }

        self.core.channels_enabled = setup.channels.iter().map(|ch| ch.enabled).collect();
        self.core.channels_triggering = setup.channels.iter().map(|ch| ch.triggering).collect();

        // The sub-tick shift changes the counter interpretation but not
        // the accumulated overflow state
        self.clock.set_shift(setup.timestamp_shift);
        self.setup = setup;
        Ok(())
    }

    pub fn configure(&mut self) -> Result<(), DigitizerError> {
        if !self.initialized {
            return Err(DigitizerError::NotReady(
                "configure before initialize".to_string(),
            ));
        }
        self.link.apply(&self.setup)?;
        self.core.enabled = true;
        debug!(
            model = self.family.model,
            serial = %self.core.name,
            samples = self.setup.samples_per_record,
            records = self.setup.records_per_buffer,
            "Digitizer configured"
        );
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), DigitizerError> {
        if !self.core.enabled {
            return Err(DigitizerError::NotReady(
                "start before configure".to_string(),
            ));
        }
        self.link.start()?;
        self.running = true;
        Ok(())
    }

    pub fn rearm(&mut self) -> Result<(), DigitizerError> {
        self.link.rearm()
    }

    pub fn stop(&mut self) -> Result<(), DigitizerError> {
        self.link.stop()?;
        self.running = false;
        Ok(())
    }

    pub fn force_software_trigger(&mut self) -> Result<(), DigitizerError> {
        self.link.force_trigger()
    }

    pub fn reset_overflow(&mut self) -> Result<(), DigitizerError> {
        self.link.clear_overflow();
        Ok(())
    }

    pub fn acquisition_ready(&mut self) -> bool {
        self.running && self.link.ready()
    }

    pub fn data_overflow(&mut self) -> bool {
        self.link.overflow()
    }

    pub fn get_waveforms(&mut self, out: &mut Vec<Waveform>) -> Result<(), DigitizerError> {
        self.fetch_scratch.clear();
        self.link.fetch(&mut self.fetch_scratch)?;

        for record in self.fetch_scratch.drain(..) {
            let timestamp = self.clock.correct(record.raw_timestamp);
            out.push(Waveform::new(timestamp, record.channel, record.samples));
        }
        Ok(())
    }

    pub fn specific_command(&mut self, arguments: &Value) -> Result<Value, DigitizerError> {
        self.link.vendor_command(arguments)
    }

    /// Runtime mode switch of the pulse-detection firmware
    pub fn specific_command_pulse_detect(
        &mut self,
        arguments: &Value,
    ) -> Result<Value, DigitizerError> {
        if let Some(enabled) = arguments
            .get("pulse_detection")
            .and_then(Value::as_bool)
        {
            self.pulse_detect_enabled = enabled;
            info!(
                serial = %self.core.name,
                enabled,
                "Pulse-detection mode switched"
            );
            return Ok(serde_json::json!({"pulse_detection": enabled}));
        }
        self.link.vendor_command(arguments)
    }

    pub fn timestamp_overflows(&self) -> u32 {
        self.clock.overflows()
    }

    pub fn is_pulse_detect_enabled(&self) -> bool {
        self.pulse_detect_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digitizer::{Digitizer, DigitizerImpl, SimLink};
    use serde_json::json;

    fn fastdaq() -> DigitizerImpl {
        DigitizerImpl::from_model("FastDAQ", "SPD-01234", Box::new(SimLink::new(7)), 0)
            .unwrap()
    }

    fn enabled_config() -> Value {
        json!({
            "samples_per_record": 256,
            "records_per_buffer": 2,
            "channels": [
                {"id": 0, "enabled": true, "triggering": true},
                {"id": 1, "enabled": true}
            ]
        })
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut digitizer = fastdaq();
        digitizer.initialize(0).unwrap();
        digitizer.initialize(0).unwrap();
    }

    #[test]
    fn read_config_never_touches_hardware() {
        // Works before initialize: parsing only
        let mut digitizer = fastdaq();
        digitizer.read_config(&enabled_config()).unwrap();
        assert!(digitizer.is_channel_enabled(0));
        assert!(digitizer.is_channel_triggering(0));
        assert!(!digitizer.is_channel_triggering(1));
    }

    #[test]
    fn configure_requires_initialize() {
        let mut digitizer = fastdaq();
        digitizer.read_config(&enabled_config()).unwrap();
        assert!(digitizer.configure().is_err());

        digitizer.initialize(0).unwrap();
        digitizer.configure().unwrap();
    }

    #[test]
    fn full_acquisition_cycle_produces_waveforms() {
        let mut digitizer = fastdaq();
        digitizer.initialize(0).unwrap();
        digitizer.read_config(&enabled_config()).unwrap();
        digitizer.configure().unwrap();
        digitizer.start().unwrap();
        assert!(digitizer.acquisition_ready());

        let mut waveforms = Vec::new();
        digitizer.get_waveforms(&mut waveforms).unwrap();

        // Two channels enabled, two records per buffer
        assert_eq!(waveforms.len(), 4);
        assert!(waveforms.iter().all(|w| w.samples.len() == 256));
        assert!(waveforms.iter().all(|w| w.channel < 2));

        digitizer.rearm().unwrap();
        digitizer.stop().unwrap();
        assert!(!digitizer.acquisition_ready());
    }

    #[test]
    fn dbs_rejected_on_legacy_family() {
        let mut digitizer = DigitizerImpl::from_model(
            "LegacyFast2ch",
            "LEG-1",
            Box::new(SimLink::new(1)),
            0,
        )
        .unwrap();

        let result = digitizer.read_config(&json!({
            "channels": [{"id": 0, "enabled": true, "dbs": true}]
        }));
        assert!(matches!(result, Err(DigitizerError::Unsupported(_))));
    }

    #[test]
    fn oversized_record_rejected() {
        let mut digitizer = fastdaq();
        let result = digitizer.read_config(&json!({"samples_per_record": 1_000_000}));
        assert!(matches!(result, Err(DigitizerError::Invalid(_))));
    }

    #[test]
    fn family_accessors() {
        let digitizer = fastdaq();
        assert_eq!(digitizer.model(), "FastDAQ");
        assert_eq!(digitizer.serial(), "SPD-01234");
        assert_eq!(digitizer.channels_number(), 4);
    }

    #[test]
    fn pulse_detect_specific_command() {
        let mut digitizer = DigitizerImpl::from_model(
            "FastPulseDetect",
            "FPD-2",
            Box::new(SimLink::new(2)),
            0,
        )
        .unwrap();

        let reply = digitizer
            .specific_command(&json!({"pulse_detection": true}))
            .unwrap();
        assert_eq!(reply["pulse_detection"], json!(true));
        if let DigitizerImpl::FastPulseDetect(driver) = &digitizer {
            assert!(driver.is_pulse_detect_enabled());
        } else {
            panic!("expected the pulse-detect variant");
        }

        // Unknown toggles still fall through to the vendor back door
        let reply = digitizer
            .specific_command(&json!({"command": "timestamp_reset"}))
            .unwrap();
        assert_eq!(reply["timestamp_reset"], json!("done"));
    }

    #[test]
    fn wide_daq_has_wide_counter() {
        let mut digitizer =
            DigitizerImpl::from_model("WideDAQ", "WD-3", Box::new(SimLink::new(3)), 0).unwrap();
        digitizer.initialize(0).unwrap();
        digitizer
            .read_config(&json!({
                "samples_per_record": 128,
                "records_per_buffer": 1,
                "channels": [{"id": 0, "enabled": true}]
            }))
            .unwrap();
        digitizer.configure().unwrap();
        digitizer.start().unwrap();

        let mut waveforms = Vec::new();
        digitizer.get_waveforms(&mut waveforms).unwrap();
        assert_eq!(waveforms.len(), 1);
    }
}
