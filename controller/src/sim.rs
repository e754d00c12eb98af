//! Simulated chamber used by host builds in place of real sensors and relays.
//!
//! The heater element is an NTC thermistor in the lower leg of the sense
//! divider, so its resistance falls as it heats. Chamber air is warmed by
//! the element and lost to ambient, faster while the exhaust fans run.

use chamber_common::{AnalogChannel, AnalogInput, TemperatureRead, TemperatureSensor};

use crate::relays::{Relay, RelayBank};

const NTC_R25_OHMS: f32 = 100_000.0;
const NTC_BETA: f32 = 3_950.0;
const KELVIN_25C: f32 = 298.15;
const RAIL_MV: f32 = 5_000.0;
const REFERENCE_OHMS: f32 = 4_700.0;

const STEP_MS: u64 = 100;
const HEATER_RISE_C_PER_S: f32 = 2.5;
const ELEMENT_LOSS: f32 = 0.012;
const ELEMENT_FAN_LOSS: f32 = 0.008;
const AIR_GAIN: f32 = 0.0005;
const AIR_LOSS: f32 = 0.001;
const EXHAUST_FAN_LOSS: f32 = 0.003;

/// Minimum spacing between fresh readings, as on a DHT22.
const THERMOMETER_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Default)]
pub struct SimRelay {
    on: bool,
}

impl Relay for SimRelay {
    fn set(&mut self, on: bool) -> anyhow::Result<()> {
        self.on = on;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

#[derive(Debug, Default)]
pub struct SimThermometer {
    pending: Option<f32>,
}

impl TemperatureSensor for SimThermometer {
    fn poll(&mut self) -> TemperatureRead {
        match self.pending.take() {
            Some(temp) => TemperatureRead::Ok(temp),
            None => TemperatureRead::NotReady,
        }
    }
}

#[derive(Debug)]
pub struct SimAdc {
    heater_mv: u32,
}

impl AnalogInput for SimAdc {
    fn read_millivolts(&mut self, channel: AnalogChannel) -> u32 {
        match channel {
            AnalogChannel::ReferenceVoltage => RAIL_MV as u32,
            AnalogChannel::HeaterSense => self.heater_mv,
        }
    }
}

#[derive(Debug)]
pub struct SimChamber {
    pub thermometer: SimThermometer,
    pub adc: SimAdc,
    ambient_c: f32,
    air_c: f32,
    element_c: f32,
    last_ms: Option<u64>,
    last_reading_ms: Option<u64>,
}

impl SimChamber {
    pub fn new(ambient_c: f32) -> Self {
        let mut chamber = Self {
            thermometer: SimThermometer::default(),
            adc: SimAdc { heater_mv: 0 },
            ambient_c,
            air_c: ambient_c,
            element_c: ambient_c,
            last_ms: None,
            last_reading_ms: None,
        };
        chamber.adc.heater_mv = chamber.heater_millivolts();
        chamber
    }

    pub fn air_c(&self) -> f32 {
        self.air_c
    }

    pub fn element_ohms(&self) -> f32 {
        ntc_resistance(self.element_c)
    }

    /// Integrates the plant up to `now_ms` with the relays as currently set,
    /// then refreshes what the sensors will report.
    pub fn advance<R: Relay>(&mut self, now_ms: u64, relays: &RelayBank<R>) {
        let elapsed = self
            .last_ms
            .map(|last| now_ms.saturating_sub(last))
            .unwrap_or(0);
        self.last_ms = Some(now_ms);

        let mut remaining = elapsed;
        while remaining > 0 {
            let step = remaining.min(STEP_MS);
            self.step(step as f32 / 1_000.0, relays);
            remaining -= step;
        }

        self.adc.heater_mv = self.heater_millivolts();

        let reading_due = self
            .last_reading_ms
            .map(|last| now_ms.saturating_sub(last) >= THERMOMETER_INTERVAL_MS)
            .unwrap_or(true);
        if reading_due {
            self.last_reading_ms = Some(now_ms);
            self.thermometer.pending = Some(self.air_c);
        }
    }

    fn step<R: Relay>(&mut self, dt_s: f32, relays: &RelayBank<R>) {
        let spread = self.element_c - self.air_c;

        let mut element_loss = ELEMENT_LOSS;
        if relays.heater_fan.is_on() {
            element_loss += ELEMENT_FAN_LOSS;
        }
        let mut element_rate = -element_loss * spread;
        if relays.heater.is_on() {
            element_rate += HEATER_RISE_C_PER_S;
        }

        let mut air_loss = AIR_LOSS;
        if relays.door_fan.is_on() {
            air_loss += EXHAUST_FAN_LOSS;
        }
        if relays.aux_fan.is_on() {
            air_loss += EXHAUST_FAN_LOSS;
        }
        let air_rate = AIR_GAIN * spread - air_loss * (self.air_c - self.ambient_c);

        self.element_c += element_rate * dt_s;
        self.air_c += air_rate * dt_s;
    }

    fn heater_millivolts(&self) -> u32 {
        let ohms = self.element_ohms();
        (RAIL_MV * ohms / (ohms + REFERENCE_OHMS)).round() as u32
    }
}

fn ntc_resistance(temp_c: f32) -> f32 {
    let kelvin = temp_c + 273.15;
    NTC_R25_OHMS * (NTC_BETA * (1.0 / kelvin - 1.0 / KELVIN_25C)).exp()
}

#[cfg(test)]
mod tests {
    use chamber_common::{ChamberEngine, Command, FrameFlags, Thresholds};

    use super::*;

    #[test]
    fn thermistor_matches_nominal_at_25c() {
        assert!((ntc_resistance(25.0) - NTC_R25_OHMS).abs() < 1.0);
        assert!(ntc_resistance(120.0) < Thresholds::default().heater_r_on);
    }

    #[test]
    fn heating_drops_element_resistance() {
        let mut chamber = SimChamber::new(22.0);
        let mut relays = RelayBank::<SimRelay>::default();
        let cold_mv = chamber.adc.read_millivolts(AnalogChannel::HeaterSense);

        chamber.advance(0, &relays);
        relays.heater.set(true).unwrap();
        chamber.advance(30_000, &relays);

        assert!(chamber.adc.read_millivolts(AnalogChannel::HeaterSense) < cold_mv);
        assert!(chamber.air_c() > 22.0);
    }

    #[test]
    fn readings_are_spaced_like_a_dht() {
        let mut chamber = SimChamber::new(22.0);
        let relays = RelayBank::<SimRelay>::default();

        chamber.advance(0, &relays);
        assert!(matches!(chamber.thermometer.poll(), TemperatureRead::Ok(_)));
        chamber.advance(500, &relays);
        assert_eq!(chamber.thermometer.poll(), TemperatureRead::NotReady);
        chamber.advance(2_000, &relays);
        assert!(matches!(chamber.thermometer.poll(), TemperatureRead::Ok(_)));
    }

    #[test]
    fn engine_runs_heater_only_inside_the_requested_window() {
        let mut engine = ChamberEngine::default();
        let mut chamber = SimChamber::new(22.0);
        let mut relays = RelayBank::<SimRelay>::default();
        relays.execute(&engine.startup_actions()).unwrap();

        engine.apply_command(Command::SetHeaterTimeLeft { minutes: 1 }, 0);
        let window_end_ms = 70_000;

        let mut heater_seen_on = false;
        for cycle in 0..120_u64 {
            let now_ms = cycle * 2_500;
            chamber.advance(now_ms, &relays);
            let actions = engine.tick(now_ms, &mut chamber.thermometer, &mut chamber.adc);
            relays.apply(&mut engine, &actions).unwrap();

            let heater_on = relays.heater.is_on();
            assert_eq!(heater_on, engine.state().heater_on);
            heater_seen_on |= heater_on;
            if now_ms > window_end_ms {
                assert!(!heater_on, "heater on at {now_ms} ms");
            }
        }

        assert!(heater_seen_on);
        assert!(relays.light.is_on());
        assert!(engine.state().heater_last_duty_cycle >= 0.0);
    }

    /// Relay whose next off write can be made to fail once.
    #[derive(Default)]
    struct SlowReleaseRelay {
        on: bool,
        fail_next_off: bool,
        off_writes: usize,
    }

    impl Relay for SlowReleaseRelay {
        fn set(&mut self, on: bool) -> anyhow::Result<()> {
            if !on {
                self.off_writes += 1;
                if std::mem::take(&mut self.fail_next_off) {
                    anyhow::bail!("relay did not release");
                }
            }
            self.on = on;
            Ok(())
        }

        fn is_on(&self) -> bool {
            self.on
        }
    }

    #[test]
    fn failed_heater_release_is_retried_next_cycle() {
        let mut engine = ChamberEngine::default();
        let mut chamber = SimChamber::new(22.0);
        let mut relays = RelayBank::<SlowReleaseRelay>::default();
        relays.execute(&engine.startup_actions()).unwrap();

        engine.apply_command(Command::SetHeaterTimeLeft { minutes: 1 }, 0);
        let window_end_ms = 70_000;

        let mut armed = false;
        let mut failed_writes = 0;
        for cycle in 0..200_u64 {
            let now_ms = cycle * 2_500;
            chamber.advance(now_ms, &relays);
            let actions = engine.tick(now_ms, &mut chamber.thermometer, &mut chamber.adc);
            if relays.apply(&mut engine, &actions).is_err() {
                failed_writes += 1;
            }

            if relays.heater.is_on() && !armed {
                relays.heater.fail_next_off = true;
                armed = true;
            }
            assert_eq!(relays.heater.is_on(), engine.state().heater_on);
            if now_ms > window_end_ms + 2_500 {
                assert!(!relays.heater.is_on(), "heater still on at {now_ms} ms");
            }
        }

        assert!(armed);
        assert_eq!(failed_writes, 1);
        // Boot write, the failed release and its retry.
        assert!(relays.heater.off_writes >= 3);
        assert!(!engine.frame(500_000).flags.contains(FrameFlags::HEATER_ON));
    }
}
