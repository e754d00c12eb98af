use serde::Serialize;

use crate::config::{Thresholds, DEFAULT_SET_POINT_C};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Output {
    Heater,
    HeaterFan,
    DoorFan,
    AuxFan,
    Light,
}

impl Output {
    pub const ALL: [Output; 5] = [
        Output::Heater,
        Output::HeaterFan,
        Output::DoorFan,
        Output::AuxFan,
        Output::Light,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heater => "heater",
            Self::HeaterFan => "heater fan",
            Self::DoorFan => "door fan",
            Self::AuxFan => "aux fan",
            Self::Light => "light",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    Switch { output: Output, on: bool },
}

impl EngineAction {
    pub fn switch(output: Output, on: bool) -> Self {
        Self::Switch { output, on }
    }
}

/// Measured and actuated state of the chamber. Written only by the control
/// cycle (and the light button).
#[derive(Debug, Clone, PartialEq)]
pub struct ChamberState {
    pub temperature_c: Option<f32>,
    pub temperature_fail_streak: u8,

    pub reference_volts: f32,
    pub heater_volts: f32,
    pub heater_resistance: Option<f32>,

    pub heater_on: bool,
    pub heater_last_on_ms: Option<u64>,
    pub heater_last_off_ms: Option<u64>,
    pub heater_last_duty_cycle: f32,

    pub light_on: bool,
    pub heater_fan_on: bool,
    pub door_fan_on: bool,
    pub aux_fan_on: bool,
}

impl Default for ChamberState {
    fn default() -> Self {
        Self::boot(&Thresholds::default())
    }
}

impl ChamberState {
    /// Power-on state: light on, everything else off, temperature unknown
    /// until the first good read clears the fail streak.
    pub fn boot(thresholds: &Thresholds) -> Self {
        Self {
            temperature_c: None,
            temperature_fail_streak: thresholds.temp_fail_ceiling,
            reference_volts: 0.0,
            heater_volts: 0.0,
            heater_resistance: None,
            heater_on: false,
            heater_last_on_ms: None,
            heater_last_off_ms: None,
            heater_last_duty_cycle: 0.0,
            light_on: true,
            heater_fan_on: false,
            door_fan_on: false,
            aux_fan_on: false,
        }
    }

    pub fn is_on(&self, output: Output) -> bool {
        match output {
            Output::Heater => self.heater_on,
            Output::HeaterFan => self.heater_fan_on,
            Output::DoorFan => self.door_fan_on,
            Output::AuxFan => self.aux_fan_on,
            Output::Light => self.light_on,
        }
    }

    pub(crate) fn set(&mut self, output: Output, on: bool) {
        match output {
            Output::Heater => self.heater_on = on,
            Output::HeaterFan => self.heater_fan_on = on,
            Output::DoorFan => self.door_fan_on = on,
            Output::AuxFan => self.aux_fan_on = on,
            Output::Light => self.light_on = on,
        }
    }
}

/// User-settable targets. Mutated by the request handler between cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub set_point_c: u8,
    pub heater_fan_requested: bool,
    pub door_fan_requested: bool,
    pub aux_fan_requested: bool,
    pub heater_run_until_ms: u64,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            set_point_c: DEFAULT_SET_POINT_C,
            heater_fan_requested: false,
            door_fan_requested: false,
            aux_fan_requested: false,
            heater_run_until_ms: 0,
        }
    }
}

impl Targets {
    pub fn heater_time_left_ms(&self, now_ms: u64) -> u64 {
        self.heater_run_until_ms.saturating_sub(now_ms)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChamberStatus {
    #[serde(rename = "tempDegC")]
    pub temp_deg_c: Option<f32>,
    #[serde(rename = "tempFailStreak")]
    pub temp_fail_streak: u8,
    #[serde(rename = "tempSetDegC")]
    pub temp_set_deg_c: u8,
    #[serde(rename = "heaterTimeLeftSec")]
    pub heater_time_left_sec: u64,
    #[serde(rename = "heaterTimeLeftMins")]
    pub heater_time_left_mins: u64,
    #[serde(rename = "refVoltage")]
    pub ref_voltage: f32,
    #[serde(rename = "heaterVoltage")]
    pub heater_voltage: f32,
    #[serde(rename = "heaterR")]
    pub heater_r: Option<f32>,
    #[serde(rename = "heaterDutyCycle")]
    pub heater_duty_cycle: f32,
    #[serde(rename = "heaterOn")]
    pub heater_on: bool,
    #[serde(rename = "lightOn")]
    pub light_on: bool,
    #[serde(rename = "heaterFanSet")]
    pub heater_fan_set: bool,
    #[serde(rename = "heaterFanOn")]
    pub heater_fan_on: bool,
    #[serde(rename = "doorFanSet")]
    pub door_fan_set: bool,
    #[serde(rename = "doorFanOn")]
    pub door_fan_on: bool,
    #[serde(rename = "auxFanSet")]
    pub aux_fan_set: bool,
    #[serde(rename = "auxFanOn")]
    pub aux_fan_on: bool,
}
