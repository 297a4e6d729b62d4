//! Offline tools over `.ade` event files
//!
//! An `.ade` file is a plain concatenation of 16-byte PSD records.
//! Every tool here rejects files whose length is not a multiple of the
//! record size before touching a single event.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::info;

use crate::common::error::{PipelineError, PipelineResult};
use crate::common::event::{EventPsd, EVENT_PSD_SIZE};

/// Read a whole event file
pub fn read_events(path: impl AsRef<Path>) -> PipelineResult<Vec<EventPsd>> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path)?;
    if metadata.len() % EVENT_PSD_SIZE as u64 != 0 {
        return Err(PipelineError::protocol(format!(
            "{} has {} bytes, not a multiple of {}",
            path.display(),
            metadata.len(),
            EVENT_PSD_SIZE
        )));
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut events = Vec::with_capacity((metadata.len() / EVENT_PSD_SIZE as u64) as usize);
    let mut record = [0u8; EVENT_PSD_SIZE];

    loop {
        match reader.read_exact(&mut record) {
            Ok(()) => events.push(EventPsd::from_bytes(&record)?),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(events)
}

/// Write events to a file, replacing its content
pub fn write_events(path: impl AsRef<Path>, events: &[EventPsd]) -> PipelineResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for event in events {
        writer.write_all(&event.to_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Sort an event file by timestamp, in place
///
/// The sort is stable, so events sharing a timestamp keep their file
/// order. Returns the number of events that moved.
pub fn sort_events_file(path: impl AsRef<Path>) -> PipelineResult<u64> {
    let path = path.as_ref();
    let mut events = read_events(path)?;

    let mut moved = 0u64;
    let before: Vec<u64> = events.iter().map(|e| e.timestamp).collect();
    events.sort_by_key(|event| event.timestamp);
    for (event, original) in events.iter().zip(&before) {
        if event.timestamp != *original {
            moved += 1;
        }
    }

    write_events(path, &events)?;
    info!(file = %path.display(), events = events.len(), moved, "Event file sorted");
    Ok(moved)
}

/// Per-channel totals of one event file
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub total: u64,
    pub per_channel: BTreeMap<u8, u64>,
}

/// Count the events of a file per channel
pub fn count_events(path: impl AsRef<Path>) -> PipelineResult<EventCounts> {
    let events = read_events(path)?;

    let mut counts = EventCounts::default();
    for event in &events {
        counts.total += 1;
        *counts.per_channel.entry(event.channel).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Dump an event file as ASCII, one record per line
///
/// Columns: `timestamp qshort qlong baseline channel group_counter`.
pub fn export_ascii(path: impl AsRef<Path>, out: &mut impl Write) -> PipelineResult<u64> {
    let events = read_events(path)?;

    for event in &events {
        let timestamp = event.timestamp;
        let qshort = event.qshort;
        let qlong = event.qlong;
        let baseline = event.baseline;
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            timestamp, qshort, qlong, baseline, event.channel, event.group_counter
        )?;
    }
    Ok(events.len() as u64)
}

/// Copy the events with `tmin ≤ timestamp < tmax` into a new file
pub fn filter_by_time(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    tmin: u64,
    tmax: u64,
) -> PipelineResult<u64> {
    if tmin >= tmax {
        return Err(PipelineError::config(format!(
            "empty time window: [{tmin}, {tmax})"
        )));
    }

    let events = read_events(input)?;
    let selected: Vec<EventPsd> = events
        .into_iter()
        .filter(|event| {
            let t = event.timestamp;
            tmin <= t && t < tmax
        })
        .collect();

    write_events(output, &selected)?;
    Ok(selected.len() as u64)
}
