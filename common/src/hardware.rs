//! Driver seams consumed by the engine. Platform builds provide the
//! implementations; tests and the host simulation provide fakes.

/// Outcome of one non-blocking poll of the chamber temperature sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemperatureRead {
    /// The driver has no fresh measurement yet. Not a fault.
    NotReady,
    Ok(f32),
    /// Driver-specific error code.
    Error(i32),
}

pub trait TemperatureSensor {
    fn poll(&mut self) -> TemperatureRead;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogChannel {
    /// Supply rail feeding the heater sense divider.
    ReferenceVoltage,
    /// Midpoint between the reference resistor and the heater element.
    HeaterSense,
}

pub trait AnalogInput {
    /// Voltage at the channel's measured node in millivolts, with any
    /// board-level divider already compensated.
    fn read_millivolts(&mut self, channel: AnalogChannel) -> u32;
}
