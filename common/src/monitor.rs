use log::warn;

use crate::{
    config::Thresholds,
    hardware::{TemperatureRead, TemperatureSensor},
    types::ChamberState,
};

/// Tracks the chamber temperature sensor and its failure streak.
#[derive(Debug, Clone)]
pub struct TemperatureMonitor {
    fail_ceiling: u8,
}

impl TemperatureMonitor {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            fail_ceiling: thresholds.temp_fail_ceiling,
        }
    }

    /// Polls the sensor once and folds the result into `state`. Returns the
    /// temperature now in effect.
    pub fn tick<S: TemperatureSensor>(&self, state: &mut ChamberState, sensor: &mut S) -> Option<f32> {
        self.apply(state, sensor.poll())
    }

    pub fn apply(&self, state: &mut ChamberState, read: TemperatureRead) -> Option<f32> {
        match read {
            TemperatureRead::NotReady => {}
            TemperatureRead::Ok(value) if value.is_finite() => {
                state.temperature_fail_streak = 0;
                state.temperature_c = Some(value);
            }
            TemperatureRead::Ok(value) => {
                warn!("chamber temp sensor returned non-finite value {value}");
                self.record_failure(state);
            }
            TemperatureRead::Error(code) => {
                warn!("failed chamber temp read, result: {code}");
                self.record_failure(state);
            }
        }
        state.temperature_c
    }

    fn record_failure(&self, state: &mut ChamberState) {
        state.temperature_fail_streak = state.temperature_fail_streak.saturating_add(1);
        if state.temperature_fail_streak >= self.fail_ceiling && state.temperature_c.is_some() {
            warn!("too many failed chamber temp reads, temperature unknown");
            state.temperature_c = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known_state(temp: f32) -> ChamberState {
        ChamberState {
            temperature_c: Some(temp),
            temperature_fail_streak: 0,
            ..ChamberState::default()
        }
    }

    #[test]
    fn boots_with_unknown_temperature() {
        let state = ChamberState::default();
        assert_eq!(state.temperature_c, None);
    }

    #[test]
    fn successful_read_resets_streak() {
        let monitor = TemperatureMonitor::new(&Thresholds::default());
        let mut state = ChamberState::default();

        assert_eq!(monitor.apply(&mut state, TemperatureRead::Ok(24.5)), Some(24.5));
        assert_eq!(state.temperature_fail_streak, 0);
    }

    #[test]
    fn not_ready_is_neither_fault_nor_update() {
        let monitor = TemperatureMonitor::new(&Thresholds::default());
        let mut state = known_state(21.0);
        state.temperature_fail_streak = 3;

        assert_eq!(monitor.apply(&mut state, TemperatureRead::NotReady), Some(21.0));
        assert_eq!(state.temperature_fail_streak, 3);
    }

    #[test]
    fn fifth_consecutive_error_marks_temperature_unknown() {
        let monitor = TemperatureMonitor::new(&Thresholds::default());
        let mut state = known_state(21.0);

        for streak in 1..=4 {
            assert_eq!(monitor.apply(&mut state, TemperatureRead::Error(-2)), Some(21.0));
            assert_eq!(state.temperature_fail_streak, streak);
        }

        assert_eq!(monitor.apply(&mut state, TemperatureRead::Error(-2)), None);
        assert_eq!(state.temperature_fail_streak, 5);

        assert_eq!(monitor.apply(&mut state, TemperatureRead::Ok(22.0)), Some(22.0));
        assert_eq!(state.temperature_fail_streak, 0);
    }

    #[test]
    fn non_finite_value_counts_as_failure() {
        let monitor = TemperatureMonitor::new(&Thresholds::default());
        let mut state = known_state(21.0);

        monitor.apply(&mut state, TemperatureRead::Ok(f32::NAN));

        assert_eq!(state.temperature_c, Some(21.0));
        assert_eq!(state.temperature_fail_streak, 1);
    }
}
