//! Stream selector nodes
//!
//! Stateless transformers sitting on the published streams: the PSD
//! polygon selector on the events topic and the waveform selector on
//! the waveforms topic. Both re-frame the surviving records into a new
//! buffer and republish them under their own message ids.

pub mod offline;

use futures::{SinkExt, StreamExt};
use tmq::{publish, subscribe, Context};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::common::error::{PipelineError, PipelineResult};
use crate::common::event::{EventPsd, EVENT_PSD_SIZE};
use crate::common::topic::{Topic, TOPIC_EVENTS, TOPIC_WAVEFORMS};
use crate::common::waveform::{WaveformFrames, WaveformView};
use crate::dsp::polygon::{Point, Polygon};
use crate::transport::{join_frame, split_frame};

/// Addresses of one selector node
#[derive(Debug, Clone)]
pub struct SelectorSettings {
    pub input_address: String,
    pub data_address: String,
}

/// PSD polygon selector
///
/// For each event computes `E = qlong` and
/// `PSD = (qlong − qshort) / qlong` and keeps the event when `(E, PSD)`
/// falls inside the polygon. Events with `qlong == 0` have no defined
/// PSD and are dropped.
pub struct PsdFilter {
    polygon: Polygon,
    pub seen: u64,
    pub kept: u64,
}

impl PsdFilter {
    pub fn new(polygon: Polygon) -> Self {
        Self {
            polygon,
            seen: 0,
            kept: 0,
        }
    }

    /// Load the selection polygon from a JSON file of `[{x, y}, …]`
    pub fn from_file(path: &str) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let points: Vec<Point> = serde_json::from_str(&text)?;
        let polygon = Polygon::new(points).ok_or_else(|| {
            PipelineError::config("a selection polygon needs at least three points")
        })?;
        Ok(Self::new(polygon))
    }

    pub fn selects(&self, event: &EventPsd) -> bool {
        let energy = event.qlong as f64;
        match event.psd() {
            Some(psd) => self.polygon.contains(Point::new(energy, psd)),
            None => false,
        }
    }

    /// Filter one events payload into a fresh buffer
    pub fn filter_payload(&mut self, payload: &[u8]) -> PipelineResult<Vec<u8>> {
        if payload.len() % EVENT_PSD_SIZE != 0 {
            return Err(PipelineError::protocol(format!(
                "events payload length {} is not a multiple of {}",
                payload.len(),
                EVENT_PSD_SIZE
            )));
        }

        let mut out = Vec::with_capacity(payload.len());
        for chunk in payload.chunks_exact(EVENT_PSD_SIZE) {
            let event = EventPsd::from_bytes(chunk)?;
            self.seen += 1;
            if self.selects(&event) {
                self.kept += 1;
                out.extend_from_slice(chunk);
            }
        }
        Ok(out)
    }
}

/// Decides whether one waveform record is forwarded
pub trait WaveformPredicate: Send {
    fn select(&mut self, view: &WaveformView) -> bool;
}

/// The built-in waveform predicate: keep quiet records
///
/// Estimates the baseline over the leading samples and keeps the record
/// when the maximum excursion above it stays below the threshold.
pub struct AmplitudeThreshold {
    pub threshold: f64,
    pub baseline_samples: usize,
}

impl Default for AmplitudeThreshold {
    fn default() -> Self {
        Self {
            threshold: 50.0,
            baseline_samples: 64,
        }
    }
}

impl WaveformPredicate for AmplitudeThreshold {
    fn select(&mut self, view: &WaveformView) -> bool {
        let samples = view.samples();
        if samples.is_empty() {
            return false;
        }

        let end = self.baseline_samples.min(samples.len());
        let baseline: f64 =
            samples[..end].iter().map(|&s| s as f64).sum::<f64>() / end as f64;
        let maximum = samples.iter().copied().max().unwrap_or(0) as f64;

        (maximum - baseline) < self.threshold
    }
}

/// Waveform-stream selector
pub struct WaveformFilter {
    predicate: Box<dyn WaveformPredicate>,
    pub seen: u64,
    pub kept: u64,
}

impl WaveformFilter {
    pub fn new(predicate: Box<dyn WaveformPredicate>) -> Self {
        Self {
            predicate,
            seen: 0,
            kept: 0,
        }
    }

    /// Filter one waveforms payload into a fresh buffer
    pub fn filter_payload(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len());

        for frame in WaveformFrames::new(payload) {
            match frame {
                Ok(view) => {
                    self.seen += 1;
                    if self.predicate.select(&view) {
                        self.kept += 1;
                        view.to_waveform().encode_into(&mut out);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Truncated waveform payload in the selector");
                    break;
                }
            }
        }
        out
    }
}

/// What a selector consumes and produces
enum SelectorKind {
    Psd(PsdFilter),
    Waveform(WaveformFilter),
}

impl SelectorKind {
    fn input_topic(&self) -> &'static str {
        match self {
            SelectorKind::Psd(_) => TOPIC_EVENTS,
            SelectorKind::Waveform(_) => TOPIC_WAVEFORMS,
        }
    }

    fn filter(&mut self, payload: &[u8]) -> PipelineResult<Vec<u8>> {
        match self {
            SelectorKind::Psd(filter) => filter.filter_payload(payload),
            SelectorKind::Waveform(filter) => Ok(filter.filter_payload(payload)),
        }
    }

    fn counters(&self) -> (u64, u64) {
        match self {
            SelectorKind::Psd(filter) => (filter.seen, filter.kept),
            SelectorKind::Waveform(filter) => (filter.seen, filter.kept),
        }
    }
}

async fn run_selector(
    settings: SelectorSettings,
    mut kind: SelectorKind,
    mut shutdown: broadcast::Receiver<()>,
) -> PipelineResult<()> {
    let context = Context::new();

    let mut input = subscribe(&context)
        .connect(&settings.input_address)?
        .subscribe(kind.input_topic().as_bytes())?;
    let mut output = publish(&context).bind(&settings.data_address)?;

    info!(
        input = %settings.input_address,
        output = %settings.data_address,
        topic = kind.input_topic(),
        "Selector running"
    );

    let mut msg_id: u64 = 0;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("Selector received shutdown signal");
                break;
            }

            message = input.next() => {
                let Some(message) = message else { break };
                let mut multipart = message?;

                while let Some(frame) = multipart.pop_front() {
                    let parsed = match split_frame(&frame) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            warn!(error = %e, "Unparsable frame in the selector");
                            continue;
                        }
                    };

                    if !parsed.topic.has_prefix(kind.input_topic()) {
                        continue;
                    }

                    let surviving = match kind.filter(&parsed.payload) {
                        Ok(surviving) => surviving,
                        Err(e) => {
                            warn!(error = %e, "Skipping a malformed payload");
                            continue;
                        }
                    };

                    if surviving.is_empty() {
                        continue;
                    }

                    let topic = Topic::numbered(kind.input_topic(), msg_id, surviving.len());
                    let wire = join_frame(&topic, &surviving);
                    let multipart: tmq::Multipart = vec![tmq::Message::from(wire.as_slice())].into();
                    output.send(multipart).await?;
                    msg_id += 1;

                    let (seen, kept) = kind.counters();
                    debug!(seen, kept, "Selector forwarded a message");
                }
            }
        }
    }

    let (seen, kept) = kind.counters();
    info!(seen, kept, "Selector stopped");
    Ok(())
}

/// Run the PSD polygon selector until shutdown
pub async fn run_psd_filter(
    settings: SelectorSettings,
    filter: PsdFilter,
    shutdown: broadcast::Receiver<()>,
) -> PipelineResult<()> {
    run_selector(settings, SelectorKind::Psd(filter), shutdown).await
}

/// Run the waveform selector until shutdown
pub async fn run_waveform_filter(
    settings: SelectorSettings,
    filter: WaveformFilter,
    shutdown: broadcast::Receiver<()>,
) -> PipelineResult<()> {
    run_selector(settings, SelectorKind::Waveform(filter), shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::event::encode_events;
    use crate::common::waveform::Waveform;

    fn psd_band() -> PsdFilter {
        PsdFilter::new(
            Polygon::new(vec![
                Point::new(0.0, 0.1),
                Point::new(2000.0, 0.1),
                Point::new(2000.0, 0.5),
                Point::new(0.0, 0.5),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn psd_selection_band() {
        let filter = psd_band();

        // PSD = 0.3 at E = 1000: inside
        let inside = EventPsd::new(0, 700, 1000, 0, 0, 0);
        assert!(filter.selects(&inside));

        // PSD = 0.05: below the band
        let below = EventPsd::new(0, 950, 1000, 0, 0, 0);
        assert!(!filter.selects(&below));

        // qlong == 0 has no PSD
        let empty = EventPsd::new(0, 0, 0, 0, 0, 0);
        assert!(!filter.selects(&empty));
    }

    #[test]
    fn psd_payload_is_reframed_unchanged() {
        let mut filter = psd_band();

        let keep = EventPsd::new(11, 700, 1000, 5, 2, 0);
        let drop = EventPsd::new(22, 950, 1000, 5, 2, 0);
        let payload = encode_events(&[keep, drop, keep]);

        let surviving = filter.filter_payload(&payload).unwrap();
        assert_eq!(surviving.len(), 2 * EVENT_PSD_SIZE);
        assert_eq!(filter.seen, 3);
        assert_eq!(filter.kept, 2);

        // Survivors are bit-identical to the input records
        assert_eq!(&surviving[..EVENT_PSD_SIZE], &keep.to_bytes());
        assert_eq!(&surviving[EVENT_PSD_SIZE..], &keep.to_bytes());
    }

    #[test]
    fn ragged_events_payload_rejected() {
        let mut filter = psd_band();
        assert!(filter.filter_payload(&[0u8; 20]).is_err());
    }

    #[test]
    fn amplitude_threshold_keeps_quiet_records() {
        let mut filter = WaveformFilter::new(Box::new(AmplitudeThreshold {
            threshold: 50.0,
            baseline_samples: 4,
        }));

        let quiet = Waveform::new(1, 0, vec![100, 101, 99, 100, 110, 100]);
        let loud = Waveform::new(2, 0, vec![100, 101, 99, 100, 900, 100]);

        let mut payload = Vec::new();
        quiet.encode_into(&mut payload);
        loud.encode_into(&mut payload);

        let surviving = filter.filter_payload(&payload);
        assert_eq!(filter.seen, 2);
        assert_eq!(filter.kept, 1);

        let mut frames = WaveformFrames::new(&surviving);
        let view = frames.next().unwrap().unwrap();
        assert_eq!(view.timestamp, 1);
        assert!(frames.next().is_none());
    }
}
