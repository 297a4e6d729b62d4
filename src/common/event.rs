//! The fixed-size PSD event record
//!
//! This is the data-plane currency of the whole pipeline: 16 bytes,
//! little-endian, no padding. Files with the `.ade` extension are plain
//! concatenations of these records, and the events topic carries them
//! back to back in a single payload.

use serde::{Deserialize, Serialize};

use super::error::PipelineError;

/// Encoded size of one PSD event record
pub const EVENT_PSD_SIZE: usize = 16;

/// One pulse-shape-discrimination event
///
/// `timestamp` is fixed-point: the upper bits are clock ticks from the
/// board, the lower bits a sub-tick fraction produced by the timestamp
/// analysis (10 fractional bits by default, see the analyzer plugins).
/// `channel` is the global channel id, unique across boards thanks to the
/// `user_id` offset applied by the acquisition controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct EventPsd {
    pub timestamp: u64,
    pub qshort: u16,
    pub qlong: u16,
    pub baseline: u16,
    pub channel: u8,
    pub group_counter: u8,
}

// The wire contract is exactly 16 bytes with no padding
const _: () = assert!(
    std::mem::size_of::<EventPsd>() == EVENT_PSD_SIZE,
    "EventPsd must be 16 bytes"
);

impl EventPsd {
    /// Create a new event with all fields
    pub fn new(
        timestamp: u64,
        qshort: u16,
        qlong: u16,
        baseline: u16,
        channel: u8,
        group_counter: u8,
    ) -> Self {
        Self {
            timestamp,
            qshort,
            qlong,
            baseline,
            channel,
            group_counter,
        }
    }

    /// A zero event carrying only timestamp and channel, the starter the
    /// analyzer hands to the plugin chain
    pub fn starter(timestamp: u64, channel: u8) -> Self {
        Self {
            timestamp,
            qshort: 0,
            qlong: 0,
            baseline: 0,
            channel,
            group_counter: 0,
        }
    }

    /// Encode to the 16-byte little-endian wire form
    pub fn to_bytes(&self) -> [u8; EVENT_PSD_SIZE] {
        let mut buf = [0u8; EVENT_PSD_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..10].copy_from_slice(&self.qshort.to_le_bytes());
        buf[10..12].copy_from_slice(&self.qlong.to_le_bytes());
        buf[12..14].copy_from_slice(&self.baseline.to_le_bytes());
        buf[14] = self.channel;
        buf[15] = self.group_counter;
        buf
    }

    /// Append the wire form to an outgoing buffer
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_bytes());
    }

    /// Decode one record from the first 16 bytes of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PipelineError> {
        if bytes.len() < EVENT_PSD_SIZE {
            return Err(PipelineError::Protocol(format!(
                "short event record: {} bytes, need {}",
                bytes.len(),
                EVENT_PSD_SIZE
            )));
        }

        Ok(Self {
            timestamp: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            qshort: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
            qlong: u16::from_le_bytes(bytes[10..12].try_into().unwrap()),
            baseline: u16::from_le_bytes(bytes[12..14].try_into().unwrap()),
            channel: bytes[14],
            group_counter: bytes[15],
        })
    }

    /// The PSD parameter `(qlong - qshort) / qlong`, `None` when
    /// `qlong == 0`
    pub fn psd(&self) -> Option<f64> {
        let qlong = self.qlong;
        if qlong == 0 {
            None
        } else {
            let qshort = self.qshort;
            Some((qlong as f64 - qshort as f64) / qlong as f64)
        }
    }
}

/// Decode a payload of back-to-back event records
///
/// Rejects payloads whose length is not a multiple of the record size,
/// the same contract the offline tools apply to `.ade` files.
pub fn decode_events(payload: &[u8]) -> Result<Vec<EventPsd>, PipelineError> {
    if payload.len() % EVENT_PSD_SIZE != 0 {
        return Err(PipelineError::Protocol(format!(
            "events payload length {} is not a multiple of {}",
            payload.len(),
            EVENT_PSD_SIZE
        )));
    }

    let mut events = Vec::with_capacity(payload.len() / EVENT_PSD_SIZE);
    for chunk in payload.chunks_exact(EVENT_PSD_SIZE) {
        events.push(EventPsd::from_bytes(chunk)?);
    }
    Ok(events)
}

/// Encode a slice of events into one contiguous payload
pub fn encode_events(events: &[EventPsd]) -> Vec<u8> {
    let mut out = Vec::with_capacity(events.len() * EVENT_PSD_SIZE);
    for event in events {
        event.encode_into(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_size() {
        assert_eq!(std::mem::size_of::<EventPsd>(), 16);
    }

    #[test]
    fn roundtrip_bit_exact() {
        let event = EventPsd::new(0x0123_4567_89ab_cdef, 700, 1000, 8190, 3, 1);
        let bytes = event.to_bytes();
        assert_eq!(bytes.len(), EVENT_PSD_SIZE);

        let decoded = EventPsd::from_bytes(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn little_endian_layout() {
        let event = EventPsd::new(1, 2, 3, 4, 5, 6);
        let bytes = event.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[8], 2);
        assert_eq!(bytes[10], 3);
        assert_eq!(bytes[12], 4);
        assert_eq!(bytes[14], 5);
        assert_eq!(bytes[15], 6);
    }

    #[test]
    fn short_record_rejected() {
        assert!(EventPsd::from_bytes(&[0u8; 15]).is_err());
    }

    #[test]
    fn payload_roundtrip() {
        let events = vec![
            EventPsd::new(10, 1, 2, 3, 0, 0),
            EventPsd::new(20, 4, 5, 6, 1, 0),
            EventPsd::new(30, 7, 8, 9, 2, 1),
        ];
        let payload = encode_events(&events);
        assert_eq!(payload.len(), 48);
        assert_eq!(decode_events(&payload).unwrap(), events);
    }

    #[test]
    fn ragged_payload_rejected() {
        let payload = vec![0u8; 17];
        assert!(decode_events(&payload).is_err());
    }

    #[test]
    fn psd_parameter() {
        let event = EventPsd::new(0, 700, 1000, 0, 0, 0);
        assert!((event.psd().unwrap() - 0.3).abs() < 1e-12);

        let zero = EventPsd::new(0, 0, 0, 0, 0, 0);
        assert!(zero.psd().is_none());
    }
}
