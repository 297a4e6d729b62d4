//! The variable-length waveform record
//!
//! Wire layout, little-endian:
//!
//! | Offset | Width | Field |
//! |---|---|---|
//! | 0  | 8 | `timestamp` |
//! | 8  | 1 | `channel` |
//! | 9  | 4 | `samples_number` |
//! | 13 | 1 | `additional_waveforms` |
//! | 14 | 2 × N | samples, `i16` |
//! | 14 + 2N | A × N | additional planes, `u8` |
//!
//! A single transport payload concatenates many records with no
//! delimiters; readers resynchronize purely from header arithmetic. The
//! [`WaveformFrames`] iterator is the only sanctioned way to walk such a
//! payload: it yields bounded slice views and reports truncation instead
//! of reading past the buffer end.

use super::error::PipelineError;

/// Size of the fixed waveform header
pub const WAVEFORM_HEADER_SIZE: usize = 14;

/// An owned waveform record
///
/// `additional` holds the visualization overlay planes ("gates",
/// "triggers", filter traces) that analysis plugins may attach; every
/// plane has exactly `samples.len()` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waveform {
    pub timestamp: u64,
    pub channel: u8,
    pub samples: Vec<i16>,
    pub additional: Vec<Vec<u8>>,
}

impl Waveform {
    pub fn new(timestamp: u64, channel: u8, samples: Vec<i16>) -> Self {
        Self {
            timestamp,
            channel,
            samples,
            additional: Vec::new(),
        }
    }

    pub fn samples_number(&self) -> u32 {
        self.samples.len() as u32
    }

    pub fn additional_number(&self) -> u8 {
        self.additional.len() as u8
    }

    /// Attach one overlay plane; the plane must match the sample count
    pub fn push_additional(&mut self, plane: Vec<u8>) -> Result<(), PipelineError> {
        if plane.len() != self.samples.len() {
            return Err(PipelineError::Protocol(format!(
                "additional plane length {} does not match samples number {}",
                plane.len(),
                self.samples.len()
            )));
        }
        if self.additional.len() >= u8::MAX as usize {
            return Err(PipelineError::Protocol(
                "too many additional planes".to_string(),
            ));
        }
        self.additional.push(plane);
        Ok(())
    }

    /// Drop all overlay planes (the analyzer does this when forwarding
    /// with `enable_additional` off)
    pub fn clear_additional(&mut self) {
        self.additional.clear();
    }

    /// Encoded size: `14 + 2 N + A N`
    pub fn encoded_size(&self) -> usize {
        WAVEFORM_HEADER_SIZE
            + 2 * self.samples.len()
            + self.additional.len() * self.samples.len()
    }

    /// Append the wire form to an outgoing buffer
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_size());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.push(self.channel);
        out.extend_from_slice(&self.samples_number().to_le_bytes());
        out.push(self.additional_number());
        for sample in &self.samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        for plane in &self.additional {
            out.extend_from_slice(plane);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_size());
        self.encode_into(&mut out);
        out
    }
}

/// A bounds-checked view over one encoded waveform record
#[derive(Debug, Clone, Copy)]
pub struct WaveformView<'a> {
    pub timestamp: u64,
    pub channel: u8,
    pub samples_number: u32,
    pub additional_waveforms: u8,
    samples_bytes: &'a [u8],
    additional_bytes: &'a [u8],
}

impl<'a> WaveformView<'a> {
    /// Decode the samples payload
    pub fn samples(&self) -> Vec<i16> {
        self.samples_bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// One overlay plane, `None` when the index is out of range
    pub fn additional(&self, index: u8) -> Option<&'a [u8]> {
        if index >= self.additional_waveforms {
            return None;
        }
        let n = self.samples_number as usize;
        let start = index as usize * n;
        Some(&self.additional_bytes[start..start + n])
    }

    /// Materialize an owned record
    pub fn to_waveform(&self) -> Waveform {
        let additional = (0..self.additional_waveforms)
            .filter_map(|i| self.additional(i).map(|plane| plane.to_vec()))
            .collect();
        Waveform {
            timestamp: self.timestamp,
            channel: self.channel,
            samples: self.samples(),
            additional,
        }
    }

    /// Total encoded size of this record
    pub fn encoded_size(&self) -> usize {
        WAVEFORM_HEADER_SIZE + self.samples_bytes.len() + self.additional_bytes.len()
    }
}

/// Iterator over the waveform records of one transport payload
///
/// Yields `Ok(view)` per complete record. A leftover shorter than its
/// header or declared size yields a single `Err` and ends the iteration;
/// an exactly-consumed payload ends with `None`.
pub struct WaveformFrames<'a> {
    payload: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> WaveformFrames<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            payload,
            offset: 0,
            failed: false,
        }
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for WaveformFrames<'a> {
    type Item = Result<WaveformView<'a>, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.payload.len() {
            return None;
        }

        let remaining = &self.payload[self.offset..];
        if remaining.len() < WAVEFORM_HEADER_SIZE {
            self.failed = true;
            return Some(Err(PipelineError::Protocol(format!(
                "truncated waveform header at offset {}: {} bytes left",
                self.offset,
                remaining.len()
            ))));
        }

        let timestamp = u64::from_le_bytes(remaining[0..8].try_into().unwrap());
        let channel = remaining[8];
        let samples_number = u32::from_le_bytes(remaining[9..13].try_into().unwrap());
        let additional_waveforms = remaining[13];

        let n = samples_number as usize;
        let samples_len = 2 * n;
        let additional_len = additional_waveforms as usize * n;
        let record_len = WAVEFORM_HEADER_SIZE + samples_len + additional_len;

        if remaining.len() < record_len {
            self.failed = true;
            return Some(Err(PipelineError::Protocol(format!(
                "incomplete waveform at offset {}: need {} bytes, {} left",
                self.offset,
                record_len,
                remaining.len()
            ))));
        }

        let samples_bytes = &remaining[WAVEFORM_HEADER_SIZE..WAVEFORM_HEADER_SIZE + samples_len];
        let additional_bytes =
            &remaining[WAVEFORM_HEADER_SIZE + samples_len..record_len];

        self.offset += record_len;

        Some(Ok(WaveformView {
            timestamp,
            channel,
            samples_number,
            additional_waveforms,
            samples_bytes,
            additional_bytes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_waveform() -> Waveform {
        let mut waveform = Waveform::new(987_654_321, 7, vec![100, -200, 300, -400]);
        waveform.push_additional(vec![0, 1, 1, 0]).unwrap();
        waveform.push_additional(vec![9, 8, 7, 6]).unwrap();
        waveform
    }

    #[test]
    fn encoded_size_formula() {
        let waveform = sample_waveform();
        assert_eq!(waveform.encoded_size(), 14 + 2 * 4 + 2 * 4);
        assert_eq!(waveform.to_bytes().len(), waveform.encoded_size());
    }

    #[test]
    fn roundtrip_preserves_samples_and_planes() {
        let waveform = sample_waveform();
        let bytes = waveform.to_bytes();

        let mut frames = WaveformFrames::new(&bytes);
        let view = frames.next().unwrap().unwrap();
        assert!(frames.next().is_none());

        assert_eq!(view.timestamp, 987_654_321);
        assert_eq!(view.channel, 7);
        assert_eq!(view.samples(), vec![100, -200, 300, -400]);
        assert_eq!(view.additional(0), Some(&[0u8, 1, 1, 0][..]));
        assert_eq!(view.additional(1), Some(&[9u8, 8, 7, 6][..]));
        assert_eq!(view.additional(2), None);

        assert_eq!(view.to_waveform(), waveform);
    }

    #[test]
    fn concatenated_records_resynchronize() {
        let first = sample_waveform();
        let second = Waveform::new(42, 1, vec![1, 2, 3]);

        let mut payload = Vec::new();
        first.encode_into(&mut payload);
        second.encode_into(&mut payload);

        let views: Vec<_> = WaveformFrames::new(&payload)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].channel, 7);
        assert_eq!(views[1].channel, 1);
        assert_eq!(views[1].samples(), vec![1, 2, 3]);
    }

    #[test]
    fn truncated_header_reported_once() {
        let bytes = sample_waveform().to_bytes();
        let mut frames = WaveformFrames::new(&bytes[..10]);
        assert!(frames.next().unwrap().is_err());
        assert!(frames.next().is_none());
    }

    #[test]
    fn truncated_payload_reported() {
        let bytes = sample_waveform().to_bytes();
        let mut frames = WaveformFrames::new(&bytes[..bytes.len() - 1]);
        assert!(frames.next().unwrap().is_err());
        assert!(frames.next().is_none());
    }

    #[test]
    fn plane_length_mismatch_rejected() {
        let mut waveform = Waveform::new(0, 0, vec![1, 2, 3]);
        assert!(waveform.push_additional(vec![1, 2]).is_err());
    }
}
