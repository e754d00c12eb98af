//! Heater fan, aux fan and door fan rules.
//!
//! Each rule computes the desired state from the current actuator reading,
//! so re-evaluating with unchanged inputs never flips a fan.

use log::info;

use crate::{
    config::Thresholds,
    types::{ChamberState, EngineAction, Output, Targets},
};

#[derive(Debug, Clone)]
pub struct FanControllers {
    r_fan_on: f32,
    r_deadband: f32,
    temp_deadband_c: f32,
    aux_offset_c: f32,
    door_offset_c: f32,
}

impl FanControllers {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            r_fan_on: thresholds.heater_r_fan_on,
            r_deadband: thresholds.heater_r_deadband,
            temp_deadband_c: thresholds.temp_deadband_c,
            aux_offset_c: thresholds.aux_fan_offset_c,
            door_offset_c: thresholds.door_fan_offset_c,
        }
    }

    /// Runs the heater fan, aux fan and door fan rules in that order. The
    /// door fan sees the aux fan state decided in the same pass.
    pub fn tick(&self, state: &mut ChamberState, targets: &Targets, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        let heater_fan = self.heater_fan(state, targets, now_ms);
        actions.extend(switch_fan(state, Output::HeaterFan, heater_fan));

        let aux_fan = self.aux_fan(state, targets);
        actions.extend(switch_fan(state, Output::AuxFan, aux_fan));

        let door_fan = self.door_fan(state, targets);
        actions.extend(switch_fan(state, Output::DoorFan, door_fan));

        actions
    }

    pub fn heater_fan(&self, state: &ChamberState, targets: &Targets, now_ms: u64) -> bool {
        let Some(resistance) = state.heater_resistance else {
            return true;
        };

        let demanded = state.heater_on
            || targets.heater_fan_requested
            || targets.heater_time_left_ms(now_ms) > 0;
        if demanded {
            return true;
        }

        if state.heater_fan_on {
            resistance <= self.r_fan_on + self.r_deadband
        } else {
            resistance < self.r_fan_on
        }
    }

    pub fn aux_fan(&self, state: &ChamberState, targets: &Targets) -> bool {
        let Some(temperature) = state.temperature_c else {
            return true;
        };
        if targets.aux_fan_requested {
            return true;
        }
        self.temperature_rule(state.aux_fan_on, temperature - self.aux_offset_c, targets)
    }

    pub fn door_fan(&self, state: &ChamberState, targets: &Targets) -> bool {
        let Some(temperature) = state.temperature_c else {
            return true;
        };
        if targets.door_fan_requested || state.aux_fan_on {
            return true;
        }
        self.temperature_rule(state.door_fan_on, temperature - self.door_offset_c, targets)
    }

    fn temperature_rule(&self, fan_on: bool, effective_c: f32, targets: &Targets) -> bool {
        let set_point = f32::from(targets.set_point_c);
        if fan_on {
            effective_c >= set_point - self.temp_deadband_c
        } else {
            effective_c > set_point
        }
    }
}

fn switch_fan(state: &mut ChamberState, output: Output, on: bool) -> Option<EngineAction> {
    if state.is_on(output) == on {
        return None;
    }
    info!("switching {} {}", output.as_str(), if on { "ON" } else { "OFF" });
    state.set(output, on);
    Some(EngineAction::switch(output, on))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 500_000;

    fn fans() -> FanControllers {
        FanControllers::new(&Thresholds::default())
    }

    fn idle_state(resistance: f32, temperature: f32) -> ChamberState {
        ChamberState {
            temperature_c: Some(temperature),
            temperature_fail_streak: 0,
            heater_resistance: Some(resistance),
            ..ChamberState::default()
        }
    }

    fn targets(set_point_c: u8) -> Targets {
        Targets {
            set_point_c,
            ..Targets::default()
        }
    }

    #[test]
    fn heater_fan_runs_when_resistance_unknown() {
        let mut state = idle_state(50_000.0, 25.0);
        state.heater_resistance = None;
        assert!(fans().heater_fan(&state, &targets(30), NOW));
    }

    #[test]
    fn heater_fan_follows_heater_request_and_run_time() {
        let fans = fans();
        let cold = idle_state(50_000.0, 25.0);
        assert!(!fans.heater_fan(&cold, &targets(30), NOW));

        let mut heating = cold.clone();
        heating.heater_on = true;
        assert!(fans.heater_fan(&heating, &targets(30), NOW));

        let mut requested = targets(30);
        requested.heater_fan_requested = true;
        assert!(fans.heater_fan(&cold, &requested, NOW));

        let mut running = targets(30);
        running.heater_run_until_ms = NOW + 1;
        assert!(fans.heater_fan(&cold, &running, NOW));
    }

    #[test]
    fn heater_fan_cools_element_with_resistance_hysteresis() {
        let fans = fans();
        let targets = targets(30);

        // Hot element switches the fan on.
        let mut state = idle_state(30_000.0, 25.0);
        assert!(fans.heater_fan(&state, &targets, NOW));
        state.heater_fan_on = true;

        // Inside the deadband it stays on.
        state.heater_resistance = Some(36_500.0);
        assert!(fans.heater_fan(&state, &targets, NOW));

        // Above threshold plus deadband it turns off.
        state.heater_resistance = Some(37_000.0);
        assert!(!fans.heater_fan(&state, &targets, NOW));
        state.heater_fan_on = false;

        // And stays off inside the deadband.
        state.heater_resistance = Some(36_500.0);
        assert!(!fans.heater_fan(&state, &targets, NOW));
    }

    #[test]
    fn aux_fan_hysteresis_around_set_point() {
        let fans = fans();
        let targets = targets(30);

        let mut state = idle_state(50_000.0, 31.0);
        assert!(!fans.aux_fan(&state, &targets));

        state.temperature_c = Some(31.1);
        assert!(fans.aux_fan(&state, &targets));
        state.aux_fan_on = true;

        state.temperature_c = Some(30.8);
        assert!(fans.aux_fan(&state, &targets));

        state.temperature_c = Some(30.6);
        assert!(!fans.aux_fan(&state, &targets));
    }

    #[test]
    fn aux_fan_on_when_requested_or_temperature_unknown() {
        let fans = fans();
        let mut state = idle_state(50_000.0, 20.0);
        state.aux_fan_on = true;

        let mut requested = targets(30);
        requested.aux_fan_requested = true;
        assert!(fans.aux_fan(&state, &requested));

        state.temperature_c = None;
        assert!(fans.aux_fan(&state, &targets(30)));
    }

    #[test]
    fn door_fan_follows_aux_fan_and_its_own_threshold() {
        let fans = fans();
        let targets = targets(30);

        let mut state = idle_state(50_000.0, 30.4);
        assert!(!fans.door_fan(&state, &targets));

        state.temperature_c = Some(30.6);
        assert!(fans.door_fan(&state, &targets));

        state.temperature_c = Some(20.0);
        state.aux_fan_on = true;
        assert!(fans.door_fan(&state, &targets));

        state.aux_fan_on = false;
        state.door_fan_on = true;
        assert!(!fans.door_fan(&state, &targets));
    }

    #[test]
    fn door_fan_request_holds_it_on_in_a_cool_chamber() {
        let fans = fans();
        let mut requested = targets(30);
        requested.door_fan_requested = true;
        let mut state = idle_state(50_000.0, 20.0);

        assert!(fans.door_fan(&state, &requested));

        let actions = fans.tick(&mut state, &requested, NOW);
        assert_eq!(actions, vec![EngineAction::switch(Output::DoorFan, true)]);
        assert!(!state.aux_fan_on);

        // Withdrawing the request lets it fall back to the temperature rule.
        let actions = fans.tick(&mut state, &targets(30), NOW + 2_500);
        assert_eq!(actions, vec![EngineAction::switch(Output::DoorFan, false)]);
    }

    #[test]
    fn unknown_temperature_switches_door_fan_not_aux_pin() {
        let fans = fans();
        let mut state = idle_state(50_000.0, 20.0);
        state.temperature_c = None;
        state.aux_fan_on = true;

        let actions = fans.tick(&mut state, &targets(30), NOW);

        assert_eq!(actions, vec![EngineAction::switch(Output::DoorFan, true)]);
        assert!(state.door_fan_on);
        assert!(state.aux_fan_on);
    }

    #[test]
    fn repeated_evaluation_is_idempotent() {
        let fans = fans();
        let targets = targets(30);
        let mut state = idle_state(20_000.0, 35.0);

        let first = fans.tick(&mut state, &targets, NOW);
        assert_eq!(
            first,
            vec![
                EngineAction::switch(Output::HeaterFan, true),
                EngineAction::switch(Output::AuxFan, true),
                EngineAction::switch(Output::DoorFan, true),
            ]
        );

        let second = fans.tick(&mut state, &targets, NOW + 2_500);
        assert!(second.is_empty());
    }
}
