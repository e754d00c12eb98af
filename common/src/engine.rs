use log::{info, warn};

use crate::{
    command::Command,
    config::{Thresholds, HEATER_RUN_MARGIN_MS},
    error::{CommandError, SensorError},
    fans::FanControllers,
    frame::{FrameFlags, StateFrame},
    hardware::{AnalogInput, TemperatureSensor},
    heater::{set_heater, HeaterController},
    monitor::TemperatureMonitor,
    sampler::SensorSampler,
    types::{ChamberState, ChamberStatus, EngineAction, Output, Targets},
};

/// Owned control context: chamber state, targets and the per-cycle
/// components. All decision logic runs through `tick`.
#[derive(Debug, Clone)]
pub struct ChamberEngine {
    heater_run_margin_ms: u64,

    state: ChamberState,
    targets: Targets,

    monitor: TemperatureMonitor,
    sampler: SensorSampler,
    heater: HeaterController,
    fans: FanControllers,
}

impl ChamberEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            monitor: TemperatureMonitor::new(&thresholds),
            sampler: SensorSampler::new(thresholds.clone()),
            heater: HeaterController::new(&thresholds),
            fans: FanControllers::new(&thresholds),
            heater_run_margin_ms: HEATER_RUN_MARGIN_MS,
            state: ChamberState::boot(&thresholds),
            targets: Targets::default(),
        }
    }

    pub fn with_run_margin(mut self, margin_ms: u64) -> Self {
        self.heater_run_margin_ms = margin_ms;
        self
    }

    pub fn state(&self) -> &ChamberState {
        &self.state
    }

    pub fn targets(&self) -> &Targets {
        &self.targets
    }

    /// Switch actions that bring freshly initialised outputs to the boot
    /// state.
    pub fn startup_actions(&self) -> Vec<EngineAction> {
        Output::ALL
            .iter()
            .map(|&output| EngineAction::switch(output, self.state.is_on(output)))
            .collect()
    }

    /// Adopts the levels read back from the outputs. An output whose write
    /// did not take effect keeps its actual level here, so the next cycle
    /// issues the switch again.
    pub fn sync_outputs(&mut self, is_on: impl Fn(Output) -> bool) {
        for output in Output::ALL {
            let actual = is_on(output);
            if self.state.is_on(output) != actual {
                warn!("{} reads {}, expected {}", output.as_str(), on_off(actual), on_off(!actual));
                self.state.set(output, actual);
            }
        }
    }

    /// One control cycle: sensors first, then the heater, then the fans.
    pub fn tick<S, A>(&mut self, now_ms: u64, sensor: &mut S, adc: &mut A) -> Vec<EngineAction>
    where
        S: TemperatureSensor,
        A: AnalogInput,
    {
        let mut actions = Vec::new();

        if self.monitor.tick(&mut self.state, sensor).is_none() {
            actions.extend(set_heater(&mut self.state, false, now_ms));
        }

        match self.sampler.sample(adc) {
            Ok(reading) => {
                self.state.reference_volts = reading.reference_volts;
                self.state.heater_volts = reading.heater_volts;
                self.state.heater_resistance = Some(reading.heater_resistance);
            }
            Err(err) => {
                let (reference_volts, heater_volts) = match err {
                    SensorError::Unavailable { .. } => (0.0, 0.0),
                    SensorError::OutOfBounds {
                        reference_volts,
                        heater_volts,
                        ..
                    } => (reference_volts, heater_volts),
                };
                self.state.reference_volts = reference_volts;
                self.state.heater_volts = heater_volts;
                self.state.heater_resistance = None;
                actions.extend(set_heater(&mut self.state, false, now_ms));
            }
        }

        actions.extend(self.heater.tick(&mut self.state, &self.targets, now_ms));
        actions.extend(self.fans.tick(&mut self.state, &self.targets, now_ms));
        actions
    }

    pub fn apply_command(&mut self, command: Command, now_ms: u64) -> Vec<EngineAction> {
        match command {
            Command::SetTemperature(temp) => {
                info!("setting chamber temp to {temp}");
                self.targets.set_point_c = temp;
            }
            Command::SetHeaterTimeLeft { minutes } => {
                info!("setting heater on time left to {minutes} minutes");
                self.targets.heater_run_until_ms = now_ms
                    .saturating_add(u64::from(minutes) * 60_000)
                    .saturating_add(self.heater_run_margin_ms);
            }
            Command::SetLight(on) => {
                info!("setting light to {}", on_off(on));
                return self.switch_light(on);
            }
            Command::SetHeaterFan(on) => {
                info!("setting heater fan to {}", on_off(on));
                self.targets.heater_fan_requested = on;
            }
            Command::SetDoorFan(on) => {
                info!("setting door fan to {}", on_off(on));
                self.targets.door_fan_requested = on;
            }
            Command::SetAuxFan(on) => {
                info!("setting aux fan to {}", on_off(on));
                self.targets.aux_fan_requested = on;
            }
        }
        Vec::new()
    }

    /// Decodes and applies a raw request. Malformed requests change nothing.
    pub fn handle_request(
        &mut self,
        bytes: &[u8],
        now_ms: u64,
    ) -> Result<Vec<EngineAction>, CommandError> {
        match Command::decode(bytes) {
            Ok(command) => Ok(self.apply_command(command, now_ms)),
            Err(err) => {
                warn!("dropping request: {err}");
                Err(err)
            }
        }
    }

    pub fn toggle_light(&mut self) -> Vec<EngineAction> {
        let on = !self.state.light_on;
        self.switch_light(on)
    }

    fn switch_light(&mut self, on: bool) -> Vec<EngineAction> {
        if self.state.light_on == on {
            return Vec::new();
        }
        self.state.light_on = on;
        vec![EngineAction::switch(Output::Light, on)]
    }

    pub fn frame(&self, now_ms: u64) -> StateFrame {
        let state = &self.state;
        let targets = &self.targets;
        let minutes = self.targets.heater_time_left_ms(now_ms) / 60_000;

        let flags = FrameFlags::empty()
            .with(FrameFlags::HEATER_ON, state.heater_on)
            .with(FrameFlags::LIGHT_ON, state.light_on)
            .with(FrameFlags::HEATER_FAN_SET, targets.heater_fan_requested)
            .with(FrameFlags::HEATER_FAN_ON, state.heater_fan_on)
            .with(FrameFlags::DOOR_FAN_SET, targets.door_fan_requested)
            .with(FrameFlags::DOOR_FAN_ON, state.door_fan_on)
            .with(FrameFlags::AUX_FAN_SET, targets.aux_fan_requested)
            .with(FrameFlags::AUX_FAN_ON, state.aux_fan_on);

        StateFrame {
            temperature_c: state.temperature_c,
            set_point_c: targets.set_point_c,
            heater_minutes_left: u16::try_from(minutes).unwrap_or(u16::MAX),
            heater_resistance: state.heater_resistance,
            duty_cycle: state.heater_last_duty_cycle,
            flags,
        }
    }

    pub fn status(&self, now_ms: u64) -> ChamberStatus {
        let state = &self.state;
        let targets = &self.targets;
        let time_left_ms = targets.heater_time_left_ms(now_ms);

        ChamberStatus {
            temp_deg_c: state.temperature_c,
            temp_fail_streak: state.temperature_fail_streak,
            temp_set_deg_c: targets.set_point_c,
            heater_time_left_sec: time_left_ms / 1_000,
            heater_time_left_mins: time_left_ms / 60_000,
            ref_voltage: state.reference_volts,
            heater_voltage: state.heater_volts,
            heater_r: state.heater_resistance,
            heater_duty_cycle: state.heater_last_duty_cycle,
            heater_on: state.heater_on,
            light_on: state.light_on,
            heater_fan_set: targets.heater_fan_requested,
            heater_fan_on: state.heater_fan_on,
            door_fan_set: targets.door_fan_requested,
            door_fan_on: state.door_fan_on,
            aux_fan_set: targets.aux_fan_requested,
            aux_fan_on: state.aux_fan_on,
        }
    }

    /// Single-line diagnostic summary of the current cycle outcome.
    pub fn cycle_summary(&self, now_ms: u64) -> String {
        let s = self.status(now_ms);
        let temp = s
            .temp_deg_c
            .map(|t| format!("{t:.2}"))
            .unwrap_or_else(|| "unknown".to_string());
        let resistance = s
            .heater_r
            .map(|r| format!("{r:.0}"))
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            "temp: {temp}, set: {}, time left: {}s, vRef: {:.4}, heaterV: {:.4}, heaterR: {resistance}, \
             duty: {:.2}, heater: {}, light: {}, heater fan: {}/{}, door fan: {}/{}, aux fan: {}/{}",
            s.temp_set_deg_c,
            s.heater_time_left_sec,
            s.ref_voltage,
            s.heater_voltage,
            s.heater_duty_cycle,
            u8::from(s.heater_on),
            u8::from(s.light_on),
            u8::from(s.heater_fan_set),
            u8::from(s.heater_fan_on),
            u8::from(s.door_fan_set),
            u8::from(s.door_fan_on),
            u8::from(s.aux_fan_set),
            u8::from(s.aux_fan_on),
        )
    }
}

impl Default for ChamberEngine {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}
