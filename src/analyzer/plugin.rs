//! Per-channel analysis plugins
//!
//! Every channel runs two stages, timestamp then energy, over each
//! waveform. A stage is either one of the built-ins or a user library
//! loaded with `libloading`. The dynamic contract is C ABI:
//!
//! ```c
//! void <stage>_init(const char *json_config, void **user_config);  // optional
//! void <stage>_close(void *user_config);                           // optional
//! void <stage>_analysis(struct wa_analysis_call *call);            // required
//! ```
//!
//! where `<stage>` is `timestamp` or `energy` and `wa_analysis_call`
//! mirrors [`CAnalysisCall`]. The engine owns every buffer: plugins
//! resize the event/trigger arrays through the `reallocate` callback
//! and attach visualization planes through `push_additional`, so no
//! allocation ever crosses the boundary. The loaded library is pinned
//! for the life of its `init`/`close` pair and `close` is called
//! exactly once, on reconfiguration or shutdown.

use std::ffi::{c_char, c_void, CString};
use std::sync::Arc;

use libloading::Library;
use serde_json::Value;
use tracing::warn;

use crate::common::error::{PipelineError, PipelineResult};
use crate::common::event::EventPsd;
use crate::common::waveform::Waveform;

/// The trigger/event buffers handed through the plugin chain
///
/// Invariants: both vectors always have the same length, and growing
/// zero-initializes the new trigger positions. Length 0 means the
/// waveform is discarded; there is no stale-pointer state to leak.
#[derive(Debug, Default)]
pub struct AnalysisBuffers {
    pub trigger_positions: Vec<u32>,
    pub events: Vec<EventPsd>,
}

impl AnalysisBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the single starter event the engine allocates per
    /// waveform
    pub fn reset_starter(&mut self, timestamp: u64, channel: u8) {
        self.trigger_positions.clear();
        self.trigger_positions.push(0);
        self.events.clear();
        self.events.push(EventPsd::starter(timestamp, channel));
    }

    /// Resize both buffers; on allocation failure both are emptied and
    /// `false` is returned
    pub fn resize(&mut self, new_len: usize) -> bool {
        let grow_by = new_len.saturating_sub(self.events.len());
        if grow_by > 0
            && (self.trigger_positions.try_reserve(grow_by).is_err()
                || self.events.try_reserve(grow_by).is_err())
        {
            self.trigger_positions.clear();
            self.events.clear();
            return false;
        }

        self.trigger_positions.resize(new_len, 0);
        self.events.resize(new_len, EventPsd::starter(0, 0));
        true
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// One analysis stage of a channel
pub trait AnalysisStage: Send {
    /// Process one waveform
    ///
    /// `samples` is the raw record, `waveform` the outgoing record the
    /// stage may annotate with additional planes, `buffers` the
    /// trigger/event arrays. Leaving `buffers` empty discards the
    /// waveform. A stage must never panic: errors are reported by
    /// emptying the buffers.
    fn analyze(&mut self, samples: &[i16], waveform: &mut Waveform, buffers: &mut AnalysisBuffers);
}

/// Which half of the pair a library provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Timestamp,
    Energy,
}

impl StageKind {
    fn symbol(&self, suffix: &str) -> Vec<u8> {
        let prefix = match self {
            StageKind::Timestamp => "timestamp",
            StageKind::Energy => "energy",
        };
        format!("{prefix}_{suffix}\0").into_bytes()
    }
}

/// The C view of one analysis call
///
/// `trigger_positions` and `events` point into the engine's buffers and
/// are refreshed whenever `reallocate` is invoked; `events_number` is
/// the current length of both.
#[repr(C)]
pub struct CAnalysisCall {
    pub samples: *const i16,
    pub samples_number: u32,
    pub timestamp: u64,
    pub channel: u8,
    pub trigger_positions: *mut u32,
    pub events: *mut EventPsd,
    pub events_number: usize,
    pub engine: *mut c_void,
    pub reallocate: unsafe extern "C" fn(call: *mut CAnalysisCall, new_number: usize) -> bool,
    pub push_additional: unsafe extern "C" fn(call: *mut CAnalysisCall, plane: *const u8) -> bool,
    pub user_config: *mut c_void,
}

type InitFn = unsafe extern "C" fn(*const c_char, *mut *mut c_void);
type CloseFn = unsafe extern "C" fn(*mut c_void);
type AnalysisFn = unsafe extern "C" fn(*mut CAnalysisCall);

/// What the engine callbacks operate on while a plugin call is running
struct CallContext<'a> {
    buffers: &'a mut AnalysisBuffers,
    waveform: &'a mut Waveform,
}

unsafe extern "C" fn reallocate_cb(call: *mut CAnalysisCall, new_number: usize) -> bool {
    let call = &mut *call;
    let context = &mut *(call.engine as *mut CallContext);

    let ok = context.buffers.resize(new_number);

    call.trigger_positions = context.buffers.trigger_positions.as_mut_ptr();
    call.events = context.buffers.events.as_mut_ptr();
    call.events_number = context.buffers.events.len();
    ok
}

unsafe extern "C" fn push_additional_cb(call: *mut CAnalysisCall, plane: *const u8) -> bool {
    let call = &mut *call;
    let context = &mut *(call.engine as *mut CallContext);

    if plane.is_null() {
        return false;
    }
    let n = context.waveform.samples.len();
    let plane = std::slice::from_raw_parts(plane, n).to_vec();
    context.waveform.push_additional(plane).is_ok()
}

/// A stage backed by a dynamically loaded library
pub struct ExternalStage {
    // Pins the code the raw pointers below point into
    _library: Arc<Library>,
    analysis: AnalysisFn,
    close: Option<CloseFn>,
    user_config: *mut c_void,
    path: String,
}

// The engine is single-threaded per process; the stage moves with it.
// The plugin contract requires the library to tolerate being called
// from whichever thread owns the engine.
unsafe impl Send for ExternalStage {}

impl ExternalStage {
    /// Load `path` and bind the `<kind>_init/close/analysis` triple
    ///
    /// A missing `analysis` symbol is an error; missing `init`/`close`
    /// fall back to no-ops (a null user configuration).
    pub fn load(path: &str, kind: StageKind, user_config: &Value) -> PipelineResult<Self> {
        // Safety: loading runs arbitrary library constructors, which is
        // exactly what the user asked for by configuring the path
        let library = unsafe { Library::new(path) }.map_err(|e| {
            PipelineError::plugin(format!("cannot load {path}: {e}"))
        })?;
        let library = Arc::new(library);

        let analysis: AnalysisFn = unsafe {
            let symbol = library
                .get::<AnalysisFn>(&kind.symbol("analysis"))
                .map_err(|e| {
                    PipelineError::plugin(format!("{path} has no analysis symbol: {e}"))
                })?;
            *symbol
        };

        let init: Option<InitFn> =
            unsafe { library.get::<InitFn>(&kind.symbol("init")).ok().map(|s| *s) };
        let close: Option<CloseFn> =
            unsafe { library.get::<CloseFn>(&kind.symbol("close")).ok().map(|s| *s) };

        let mut user_ptr: *mut c_void = std::ptr::null_mut();
        if let Some(init) = init {
            let config_text = CString::new(user_config.to_string())
                .map_err(|_| PipelineError::plugin("user_config contains a NUL byte"))?;
            // Safety: init follows the documented contract
            unsafe { init(config_text.as_ptr(), &mut user_ptr) };
        }

        Ok(Self {
            _library: library,
            analysis,
            close,
            user_config: user_ptr,
            path: path.to_string(),
        })
    }
}

impl AnalysisStage for ExternalStage {
    fn analyze(&mut self, samples: &[i16], waveform: &mut Waveform, buffers: &mut AnalysisBuffers) {
        let timestamp = waveform.timestamp;
        let channel = waveform.channel;

        let reported_number;
        {
            let mut context = CallContext {
                buffers: &mut *buffers,
                waveform: &mut *waveform,
            };

            let mut call = CAnalysisCall {
                samples: samples.as_ptr(),
                samples_number: samples.len() as u32,
                timestamp,
                channel,
                trigger_positions: context.buffers.trigger_positions.as_mut_ptr(),
                events: context.buffers.events.as_mut_ptr(),
                events_number: context.buffers.events.len(),
                engine: &mut context as *mut CallContext as *mut c_void,
                reallocate: reallocate_cb,
                push_additional: push_additional_cb,
                user_config: self.user_config,
            };

            // Safety: the call structure outlives the invocation and the
            // callbacks keep its pointers in sync with the buffers
            unsafe { (self.analysis)(&mut call) };
            reported_number = call.events_number;
        }

        // The plugin may have trimmed the logical length without a
        // reallocation; honor it
        let final_number = reported_number.min(buffers.events.len());
        if final_number != buffers.events.len() {
            buffers.resize(final_number);
        }
    }
}

impl Drop for ExternalStage {
    fn drop(&mut self) {
        if let Some(close) = self.close {
            // Safety: one close per init, on teardown only
            unsafe { close(self.user_config) };
        } else if !self.user_config.is_null() {
            warn!(path = %self.path, "Plugin allocated a state but exports no close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_buffers() {
        let mut buffers = AnalysisBuffers::new();
        buffers.reset_starter(1234, 5);
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers.trigger_positions, vec![0]);
        let event = buffers.events[0];
        assert_eq!(event.timestamp, 1234);
        assert_eq!(event.channel, 5);
        assert_eq!(event.qlong, 0);
    }

    #[test]
    fn growing_zero_initializes_triggers() {
        let mut buffers = AnalysisBuffers::new();
        buffers.reset_starter(0, 0);
        buffers.trigger_positions[0] = 99;

        assert!(buffers.resize(4));
        assert_eq!(buffers.len(), 4);
        assert_eq!(buffers.trigger_positions, vec![99, 0, 0, 0]);
    }

    #[test]
    fn shrink_to_zero_leaves_empty_views() {
        let mut buffers = AnalysisBuffers::new();
        buffers.reset_starter(0, 0);
        assert!(buffers.resize(0));
        assert!(buffers.is_empty());
        assert!(buffers.trigger_positions.is_empty());
    }

    #[test]
    fn reallocate_callback_updates_the_call() {
        let mut buffers = AnalysisBuffers::new();
        buffers.reset_starter(7, 1);
        let mut waveform = Waveform::new(7, 1, vec![0; 8]);

        let mut context = CallContext {
            buffers: &mut buffers,
            waveform: &mut waveform,
        };
        let mut call = CAnalysisCall {
            samples: std::ptr::null(),
            samples_number: 0,
            timestamp: 7,
            channel: 1,
            trigger_positions: context.buffers.trigger_positions.as_mut_ptr(),
            events: context.buffers.events.as_mut_ptr(),
            events_number: context.buffers.events.len(),
            engine: &mut context as *mut CallContext as *mut c_void,
            reallocate: reallocate_cb,
            push_additional: push_additional_cb,
            user_config: std::ptr::null_mut(),
        };

        let ok = unsafe { reallocate_cb(&mut call, 3) };
        assert!(ok);
        assert_eq!(call.events_number, 3);
        assert!(!call.events.is_null());
        drop(context);
        assert_eq!(buffers.len(), 3);
    }

    #[test]
    fn push_additional_callback_appends_planes() {
        let mut buffers = AnalysisBuffers::new();
        let mut waveform = Waveform::new(0, 0, vec![1, 2, 3, 4]);

        let mut context = CallContext {
            buffers: &mut buffers,
            waveform: &mut waveform,
        };
        let mut call = CAnalysisCall {
            samples: std::ptr::null(),
            samples_number: 4,
            timestamp: 0,
            channel: 0,
            trigger_positions: std::ptr::null_mut(),
            events: std::ptr::null_mut(),
            events_number: 0,
            engine: &mut context as *mut CallContext as *mut c_void,
            reallocate: reallocate_cb,
            push_additional: push_additional_cb,
            user_config: std::ptr::null_mut(),
        };

        let plane = [9u8, 8, 7, 6];
        let ok = unsafe { push_additional_cb(&mut call, plane.as_ptr()) };
        assert!(ok);
        let ok = unsafe { push_additional_cb(&mut call, std::ptr::null()) };
        assert!(!ok);

        drop(context);
        assert_eq!(waveform.additional_number(), 1);
        assert_eq!(waveform.additional[0], vec![9, 8, 7, 6]);
    }

    #[test]
    fn loading_a_missing_library_fails() {
        let result = ExternalStage::load(
            "/nonexistent/libNope.so",
            StageKind::Timestamp,
            &Value::Null,
        );
        assert!(result.is_err());
    }
}
