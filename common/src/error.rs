use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("analog sampling aborted after {faults} faulty samples")]
    Unavailable { faults: u16 },
    #[error("heater resistance {ohms:.0} ohm outside plausible range")]
    OutOfBounds {
        ohms: f32,
        reference_volts: f32,
        heater_volts: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty request")]
    Empty,
    #[error("unknown request code {0:#04x}")]
    UnknownOpcode(u8),
    #[error("invalid request length {actual} for request code {opcode:#04x}, expected {expected}")]
    InvalidLength {
        opcode: u8,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("state frame must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
