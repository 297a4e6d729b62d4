//! The narrow seam towards the vendor SDK
//!
//! Everything hardware-specific sits behind [`BoardLink`]: register
//! programming, acquisition control and the DMA drain. The in-tree
//! implementation is [`SimLink`], a software board that synthesizes
//! detector pulses so the whole pipeline runs without hardware; a real
//! SDK binding implements the same trait out of tree.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde_json::{json, Value};

use super::{BoardSetup, DigitizerError};

/// One undecoded record out of a hardware buffer
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Raw board timestamp, before shift and overflow correction
    pub raw_timestamp: u64,
    /// Board-local channel index
    pub channel: u8,
    pub samples: Vec<i16>,
}

/// Capability contract of one physical board
///
/// All calls must be non-blocking and bounded; a link that can block is
/// a contract violation the controller handles by escalating to the
/// acquisition-error branch.
pub trait BoardLink: Send {
    /// Bind to the physical board in `slot`; idempotent if already bound
    fn open(&mut self, slot: usize) -> Result<(), DigitizerError>;

    /// Push a parsed register image to the hardware
    fn apply(&mut self, setup: &BoardSetup) -> Result<(), DigitizerError>;

    fn start(&mut self) -> Result<(), DigitizerError>;
    fn stop(&mut self) -> Result<(), DigitizerError>;
    fn rearm(&mut self) -> Result<(), DigitizerError>;
    fn force_trigger(&mut self) -> Result<(), DigitizerError>;

    fn ready(&mut self) -> bool;
    fn overflow(&mut self) -> bool;
    fn clear_overflow(&mut self);

    /// Drain one hardware buffer into `out`
    fn fetch(&mut self, out: &mut Vec<RawRecord>) -> Result<(), DigitizerError>;

    /// Vendor-specific runtime back door
    fn vendor_command(&mut self, arguments: &Value) -> Result<Value, DigitizerError>;
}

/// A discovered physical board, before a driver is attached
pub struct DiscoveredBoard {
    pub serial: String,
    pub model: String,
    pub link: Box<dyn BoardLink>,
}

/// Enumerates the boards reachable from this host
///
/// The control unit of the vendor SDK; the simulated provider hands out
/// [`SimLink`] boards seeded per serial.
pub trait BoardProvider: Send {
    fn discover(&mut self) -> Result<Vec<DiscoveredBoard>, DigitizerError>;
}

/// A provider backed entirely by simulated boards
pub struct SimBoardProvider {
    boards: Vec<(String, String)>,
}

impl SimBoardProvider {
    /// `boards` is a list of `(serial, model)` pairs
    pub fn new(boards: Vec<(String, String)>) -> Self {
        Self { boards }
    }
}

impl BoardProvider for SimBoardProvider {
    fn discover(&mut self) -> Result<Vec<DiscoveredBoard>, DigitizerError> {
        Ok(self
            .boards
            .iter()
            .enumerate()
            .map(|(slot, (serial, model))| DiscoveredBoard {
                serial: serial.clone(),
                model: model.clone(),
                link: Box::new(SimLink::new(slot as u64 + 1)),
            })
            .collect())
    }
}

/// A software board producing synthetic detector pulses
///
/// Pulses are negative exponential decays on a noisy baseline, with
/// Poisson-like arrival gaps, the recipe the pipeline's tests and dry
/// runs rely on.
pub struct SimLink {
    rng: StdRng,
    setup: Option<BoardSetup>,
    opened: bool,
    running: bool,
    armed: bool,
    sim_clock: u64,
    forced_triggers: u32,
    overflow_flag: bool,
    fail_next_fetch: bool,
}

impl SimLink {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            setup: None,
            opened: false,
            running: false,
            armed: false,
            sim_clock: 0,
            forced_triggers: 0,
            overflow_flag: false,
            fail_next_fetch: false,
        }
    }

    /// Flag the next fetch as a hardware failure (test hook)
    pub fn fail_next_fetch(&mut self) {
        self.fail_next_fetch = true;
    }

    /// Raise the overflow flag (test hook)
    pub fn raise_overflow(&mut self) {
        self.overflow_flag = true;
    }

    fn synthesize_record(&mut self, channel: u8, samples_number: usize) -> RawRecord {
        let noise = Normal::new(0.0, 4.0).expect("valid normal distribution");
        let baseline = 8000.0;
        let amplitude: f64 = self.rng.gen_range(200.0..4000.0);
        let trigger = samples_number / 8;
        let tau = 40.0;

        let samples = (0..samples_number)
            .map(|i| {
                let pulse = if i >= trigger {
                    -amplitude * (-((i - trigger) as f64) / tau).exp()
                } else {
                    0.0
                };
                (baseline + pulse + noise.sample(&mut self.rng)).round() as i16
            })
            .collect();

        // Arrival gaps of the order of the record length
        self.sim_clock += self.rng.gen_range(1_000..100_000);

        RawRecord {
            raw_timestamp: self.sim_clock,
            channel,
            samples,
        }
    }
}

impl BoardLink for SimLink {
    fn open(&mut self, _slot: usize) -> Result<(), DigitizerError> {
        self.opened = true;
        Ok(())
    }

    fn apply(&mut self, setup: &BoardSetup) -> Result<(), DigitizerError> {
        if !self.opened {
            return Err(DigitizerError::NotReady(
                "configure before open".to_string(),
            ));
        }
        self.setup = Some(setup.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), DigitizerError> {
        if self.setup.is_none() {
            return Err(DigitizerError::NotReady("start before configure".to_string()));
        }
        self.running = true;
        self.armed = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DigitizerError> {
        self.running = false;
        self.armed = false;
        Ok(())
    }

    fn rearm(&mut self) -> Result<(), DigitizerError> {
        if !self.running {
            return Err(DigitizerError::NotReady("rearm while stopped".to_string()));
        }
        self.armed = true;
        Ok(())
    }

    fn force_trigger(&mut self) -> Result<(), DigitizerError> {
        self.forced_triggers += 1;
        Ok(())
    }

    fn ready(&mut self) -> bool {
        self.running && self.armed
    }

    fn overflow(&mut self) -> bool {
        self.overflow_flag
    }

    fn clear_overflow(&mut self) {
        self.overflow_flag = false;
    }

    fn fetch(&mut self, out: &mut Vec<RawRecord>) -> Result<(), DigitizerError> {
        if self.fail_next_fetch {
            self.fail_next_fetch = false;
            return Err(DigitizerError::Io("simulated DMA failure".to_string()));
        }
        if !self.ready() {
            return Err(DigitizerError::NotReady("fetch while not armed".to_string()));
        }

        let setup = self
            .setup
            .clone()
            .ok_or_else(|| DigitizerError::Internal("fetch without setup".to_string()))?;

        for _ in 0..setup.records_per_buffer {
            for (channel, ch_setup) in setup.channels.iter().enumerate() {
                if ch_setup.enabled {
                    let record =
                        self.synthesize_record(channel as u8, setup.samples_per_record as usize);
                    out.push(record);
                }
            }
        }

        // One fetch per trigger arm
        self.armed = false;
        Ok(())
    }

    fn vendor_command(&mut self, arguments: &Value) -> Result<Value, DigitizerError> {
        match arguments.get("command").and_then(Value::as_str) {
            Some("timestamp_reset") => {
                self.sim_clock = 0;
                Ok(json!({"timestamp_reset": "done"}))
            }
            Some("status") => Ok(json!({
                "running": self.running,
                "forced_triggers": self.forced_triggers,
                "sim_clock": self.sim_clock,
            })),
            Some(other) => Err(DigitizerError::Unsupported(format!(
                "vendor command {other}"
            ))),
            None => Err(DigitizerError::Invalid(
                "specific command without a command field".to_string(),
            )),
        }
    }
}
