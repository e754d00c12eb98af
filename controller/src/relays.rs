//! Switched outputs driven by engine actions.

use chamber_common::{ChamberEngine, EngineAction, Output};

/// A single on/off output line.
pub trait Relay {
    fn set(&mut self, on: bool) -> anyhow::Result<()>;
    fn is_on(&self) -> bool;
}

/// One relay per chamber output.
#[derive(Default)]
pub struct RelayBank<R> {
    pub heater: R,
    pub heater_fan: R,
    pub door_fan: R,
    pub aux_fan: R,
    pub light: R,
}

impl<R: Relay> RelayBank<R> {
    fn get(&self, output: Output) -> &R {
        match output {
            Output::Heater => &self.heater,
            Output::HeaterFan => &self.heater_fan,
            Output::DoorFan => &self.door_fan,
            Output::AuxFan => &self.aux_fan,
            Output::Light => &self.light,
        }
    }

    fn get_mut(&mut self, output: Output) -> &mut R {
        match output {
            Output::Heater => &mut self.heater,
            Output::HeaterFan => &mut self.heater_fan,
            Output::DoorFan => &mut self.door_fan,
            Output::AuxFan => &mut self.aux_fan,
            Output::Light => &mut self.light,
        }
    }

    /// Applies actions in order. A failed switch is returned after the
    /// remaining actions have been attempted.
    pub fn execute(&mut self, actions: &[EngineAction]) -> anyhow::Result<()> {
        let mut first_error = None;
        for action in actions {
            let EngineAction::Switch { output, on } = *action;
            if let Err(err) = self.get_mut(output).set(on) {
                let err = err.context(format!("failed to switch {}", output.as_str()));
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn is_on(&self, output: Output) -> bool {
        self.get(output).is_on()
    }

    /// Executes the engine's actions, then hands the levels read back from
    /// every output to the engine. A switch that failed is decided again on
    /// the next cycle.
    pub fn apply(&mut self, engine: &mut ChamberEngine, actions: &[EngineAction]) -> anyhow::Result<()> {
        let result = self.execute(actions);
        engine.sync_outputs(|output| self.is_on(output));
        result
    }
}
