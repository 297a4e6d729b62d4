//! Built-in analysis stages
//!
//! Always available without loading anything: the `Null` timestamp
//! forwarder and the `SimplePSD` gated integrator. Together they emit
//! exactly one event per waveform, which is also the empty-configuration
//! default of every channel.

use serde::Deserialize;
use serde_json::Value;

use crate::common::event::EventPsd;
use crate::common::waveform::Waveform;
use crate::dsp::clamp_u16;

use super::plugin::{AnalysisBuffers, AnalysisStage};

/// Number of fractional bits the timestamp stages may add below the
/// board clock ticks
pub const DEFAULT_FRACTION_BITS: u32 = 10;

/// Compose a fixed-point event timestamp from coarse clock ticks and a
/// sub-tick fraction in `[0, 1)`
pub fn compose_timestamp(coarse: u64, fraction: f64, fraction_bits: u32) -> u64 {
    let scale = (1u64 << fraction_bits) as f64;
    let fine = (fraction.clamp(0.0, 1.0 - f64::EPSILON) * scale) as u64;
    (coarse << fraction_bits) | fine
}

/// Timestamp forwarder: no timing analysis at all
///
/// Keeps the single starter event, leaves the waveform timestamp as the
/// event time and the trigger position at zero. Useful when the energy
/// stage does all the work.
#[derive(Debug, Default)]
pub struct NullTimestamp;

impl AnalysisStage for NullTimestamp {
    fn analyze(
        &mut self,
        _samples: &[i16],
        waveform: &mut Waveform,
        buffers: &mut AnalysisBuffers,
    ) {
        buffers.resize(1);
        if let Some(event) = buffers.events.first_mut() {
            event.timestamp = waveform.timestamp;
            event.channel = waveform.channel;
        }
        if let Some(position) = buffers.trigger_positions.first_mut() {
            *position = 0;
        }
    }
}

/// Configuration of the built-in PSD integrator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimplePsdConfig {
    /// Samples averaged at the record start for the baseline
    pub baseline_samples: u32,
    /// Pulses rise above the baseline instead of below it
    pub pulse_polarity_positive: bool,
    /// First sample of both integration gates
    pub integration_start: u32,
    /// Length of the short gate
    pub gate_short: u32,
    /// Length of the long gate
    pub gate_long: u32,
}

impl Default for SimplePsdConfig {
    fn default() -> Self {
        Self {
            baseline_samples: 64,
            pulse_polarity_positive: false,
            integration_start: 110,
            gate_short: 30,
            gate_long: 90,
        }
    }
}

/// Energy stage: baseline-subtracted short and long gate integrals
///
/// Reduces the event buffer to exactly one event and fills `qshort`,
/// `qlong` and `baseline` from the configured gates.
#[derive(Debug, Default)]
pub struct SimplePsd {
    config: SimplePsdConfig,
}

impl SimplePsd {
    pub fn new(config: SimplePsdConfig) -> Self {
        Self { config }
    }

    /// Build from the channel's `user_config` object; missing keys take
    /// the defaults, a malformed object falls back entirely
    pub fn from_user_config(user_config: &Value) -> Self {
        let config = serde_json::from_value(user_config.clone()).unwrap_or_default();
        Self { config }
    }

    fn integrate(&self, samples: &[i16], baseline: f64, gate: u32) -> f64 {
        let start = self.config.integration_start as usize;
        let end = (start + gate as usize).min(samples.len());
        let mut sum = 0.0;
        for &sample in samples.get(start..end).unwrap_or(&[]) {
            if self.config.pulse_polarity_positive {
                sum += sample as f64 - baseline;
            } else {
                sum += baseline - sample as f64;
            }
        }
        sum
    }
}

impl AnalysisStage for SimplePsd {
    fn analyze(
        &mut self,
        samples: &[i16],
        waveform: &mut Waveform,
        buffers: &mut AnalysisBuffers,
    ) {
        // One event per waveform, discarding whatever the timestamp
        // stage multiplied
        buffers.resize(1);

        let baseline_end = (self.config.baseline_samples as usize).min(samples.len());
        let baseline: f64 = samples[..baseline_end]
            .iter()
            .map(|&s| s as f64)
            .sum::<f64>()
            / self.config.baseline_samples as f64;

        let qshort = self.integrate(samples, baseline, self.config.gate_short);
        let qlong = self.integrate(samples, baseline, self.config.gate_long);

        if let Some(event) = buffers.events.first_mut() {
            *event = EventPsd::new(
                waveform.timestamp,
                clamp_u16(qshort),
                clamp_u16(qlong),
                clamp_u16(baseline),
                waveform.channel,
                0,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run_pair(
        waveform: &mut Waveform,
        energy_config: &Value,
    ) -> AnalysisBuffers {
        let samples = waveform.samples.clone();
        let mut buffers = AnalysisBuffers::new();
        buffers.reset_starter(waveform.timestamp, waveform.channel);

        NullTimestamp.analyze(&samples, waveform, &mut buffers);
        SimplePsd::from_user_config(energy_config).analyze(&samples, waveform, &mut buffers);
        buffers
    }

    #[test]
    fn null_timestamp_keeps_one_event() {
        let mut waveform = Waveform::new(42_000, 3, vec![0; 256]);
        let samples = waveform.samples.clone();
        let mut buffers = AnalysisBuffers::new();
        buffers.reset_starter(waveform.timestamp, waveform.channel);

        NullTimestamp.analyze(&samples, &mut waveform, &mut buffers);

        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers.trigger_positions[0], 0);
        let event = buffers.events[0];
        assert_eq!(event.timestamp, 42_000);
        assert_eq!(event.channel, 3);
    }

    #[test]
    fn simple_psd_negative_pulse_integrals() {
        // Flat baseline at 100, a dip of depth 10 across the whole gate
        let mut samples = vec![100i16; 2048];
        for s in samples.iter_mut().skip(110).take(90) {
            *s = 90;
        }
        let mut waveform = Waveform::new(7, 3, samples);

        let buffers = run_pair(&mut waveform, &json!({}));
        assert_eq!(buffers.len(), 1);

        let event = buffers.events[0];
        assert_eq!(event.channel, 3);
        assert_eq!(event.timestamp, 7);
        assert_eq!(event.baseline, 100);
        // Gates of 30 and 90 samples, 10 counts below baseline each
        assert_eq!(event.qshort, 300);
        assert_eq!(event.qlong, 900);
    }

    #[test]
    fn simple_psd_user_config_overrides() {
        let mut samples = vec![0i16; 64];
        samples[8] = 50;
        samples[9] = 50;
        let mut waveform = Waveform::new(0, 0, samples);

        let buffers = run_pair(
            &mut waveform,
            &json!({
                "baseline_samples": 4,
                "pulse_polarity_positive": true,
                "integration_start": 8,
                "gate_short": 1,
                "gate_long": 2
            }),
        );

        let event = buffers.events[0];
        assert_eq!(event.qshort, 50);
        assert_eq!(event.qlong, 100);
        assert_eq!(event.baseline, 0);
    }

    #[test]
    fn simple_psd_clamps_into_u16() {
        // A huge positive excursion on a negative-polarity setup drives
        // the integrals below zero; clamped to 0
        let mut samples = vec![0i16; 256];
        for s in samples.iter_mut().skip(110).take(90) {
            *s = 30_000;
        }
        let mut waveform = Waveform::new(0, 0, samples);
        let buffers = run_pair(&mut waveform, &json!({}));
        assert_eq!(buffers.events[0].qshort, 0);
        assert_eq!(buffers.events[0].qlong, 0);
    }

    #[test]
    fn gates_truncate_at_the_record_end() {
        let samples = vec![10i16; 120];
        let mut waveform = Waveform::new(0, 0, samples);
        let buffers = run_pair(&mut waveform, &json!({"baseline_samples": 10}));
        // Only ten gate samples fit before the record ends
        let event = buffers.events[0];
        assert_eq!(event.qshort, 0);
        assert_eq!(event.qlong, 0);
        assert_eq!(event.baseline, 10);
    }

    #[test]
    fn compose_timestamp_fixed_point() {
        assert_eq!(compose_timestamp(1, 0.0, 10), 1024);
        assert_eq!(compose_timestamp(1, 0.5, 10), 1024 + 512);
        // The fraction saturates below one full tick
        assert!(compose_timestamp(1, 2.0, 10) < 2048);
    }
}
