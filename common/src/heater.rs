//! Heater hysteresis state machine.
//!
//! Heater element resistance falls as the element heats up, so the heater
//! switches off below `heater_r_off` and may only switch back on above the
//! higher `heater_r_on`. Chamber temperature, the run-time deadline and
//! sensor validity gate both transitions.

use log::info;

use crate::{
    config::Thresholds,
    types::{ChamberState, EngineAction, Output, Targets},
};

#[derive(Debug, Clone)]
pub struct HeaterController {
    r_on: f32,
    r_off: f32,
    temp_deadband_c: f32,
}

impl HeaterController {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            r_on: thresholds.heater_r_on,
            r_off: thresholds.heater_r_off,
            temp_deadband_c: thresholds.temp_deadband_c,
        }
    }

    pub fn tick(
        &self,
        state: &mut ChamberState,
        targets: &Targets,
        now_ms: u64,
    ) -> Option<EngineAction> {
        let (Some(resistance), Some(temperature)) =
            (state.heater_resistance, state.temperature_c)
        else {
            return set_heater(state, false, now_ms);
        };

        let set_point = f32::from(targets.set_point_c);
        if state.heater_on && (resistance < self.r_off || temperature > set_point) {
            return set_heater(state, false, now_ms);
        }

        let time_left_ms = targets.heater_time_left_ms(now_ms);
        if state.heater_on && time_left_ms == 0 {
            info!("max heater time reached");
            return set_heater(state, false, now_ms);
        }

        if !state.heater_on
            && time_left_ms > 0
            && resistance > self.r_on
            && temperature < set_point - self.temp_deadband_c
        {
            return set_heater(state, true, now_ms);
        }

        None
    }
}

/// Drives the heater to `on`, recording transition timestamps. The duty
/// cycle is only recomputed here, on an on-to-off edge that closes a full
/// off/on period.
pub fn set_heater(state: &mut ChamberState, on: bool, now_ms: u64) -> Option<EngineAction> {
    if state.heater_on == on {
        return None;
    }
    state.heater_on = on;

    if on {
        info!("switching heater ON");
        state.heater_last_on_ms = Some(now_ms);
        return Some(EngineAction::switch(Output::Heater, true));
    }

    info!("switching heater OFF");
    if let (Some(last_off), Some(last_on)) = (state.heater_last_off_ms, state.heater_last_on_ms) {
        if last_on >= last_off {
            let off_period = last_on - last_off;
            let on_period = now_ms.saturating_sub(last_on);
            let total = off_period + on_period;
            if total > 0 {
                state.heater_last_duty_cycle = on_period as f32 / total as f32;
                info!("last duty cycle: {:.3}", state.heater_last_duty_cycle);
            }
        }
    }
    state.heater_last_off_ms = Some(now_ms);

    Some(EngineAction::switch(Output::Heater, false))
}
