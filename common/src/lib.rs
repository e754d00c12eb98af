pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod fans;
pub mod frame;
pub mod hardware;
pub mod heater;
pub mod monitor;
pub mod sampler;
pub mod scheduler;
pub mod types;

pub use command::Command;
pub use config::{ControllerConfig, NetworkConfig, RuntimeConfig, Thresholds};
pub use engine::ChamberEngine;
pub use error::{CommandError, FrameError, SensorError};
pub use frame::{FrameFlags, StateFrame, FRAME_LEN};
pub use hardware::{AnalogChannel, AnalogInput, TemperatureRead, TemperatureSensor};
pub use scheduler::{CycleScheduler, RerunSignal};
pub use types::{ChamberState, ChamberStatus, EngineAction, Output, Targets};
