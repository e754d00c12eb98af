//! Heater resistance estimation from repeated analog samples.
//!
//! Each cycle takes a fixed window of paired readings from the reference
//! rail and the heater sense node. A reading outside its admissible range
//! counts as a fault and is replaced by the nominal default so the window
//! stays full length. Too many faults abort the window early.

use log::warn;

use crate::{
    config::Thresholds,
    error::SensorError,
    hardware::{AnalogChannel, AnalogInput},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaterReading {
    pub reference_volts: f32,
    pub heater_volts: f32,
    pub heater_resistance: f32,
}

#[derive(Debug, Clone)]
pub struct SensorSampler {
    thresholds: Thresholds,
}

impl SensorSampler {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn sample<A: AnalogInput>(&self, adc: &mut A) -> Result<HeaterReading, SensorError> {
        let t = &self.thresholds;
        let mut faults: u16 = 0;
        let mut reference_sum = 0.0_f32;
        let mut heater_sum = 0.0_f32;

        for _ in 0..t.sample_count {
            let reference = volts(adc.read_millivolts(AnalogChannel::ReferenceVoltage));
            if (t.reference_volts_min..=t.reference_volts_max).contains(&reference) {
                reference_sum += reference;
            } else {
                faults += 1;
                reference_sum += t.reference_volts_default;
            }

            let heater = volts(adc.read_millivolts(AnalogChannel::HeaterSense));
            if (t.heater_volts_min..=t.heater_volts_max).contains(&heater) {
                heater_sum += heater;
            } else {
                faults += 1;
                heater_sum += t.heater_volts_default;
            }

            if faults >= t.sample_fault_ceiling {
                warn!("too many ADC read failures ({faults}), heater resistance unknown");
                return Err(SensorError::Unavailable { faults });
            }
        }

        let count = f32::from(t.sample_count.max(1));
        let reference_volts = reference_sum / count;
        let heater_volts = heater_sum / count;
        let heater_resistance = divider_resistance(heater_volts, reference_volts, t.reference_resistor);

        if !(t.heater_r_min..=t.heater_r_max).contains(&heater_resistance) {
            warn!("heater resistance out of bounds: {heater_resistance:.0}");
            return Err(SensorError::OutOfBounds {
                ohms: heater_resistance,
                reference_volts,
                heater_volts,
            });
        }

        Ok(HeaterReading {
            reference_volts,
            heater_volts,
            heater_resistance,
        })
    }
}

fn volts(millivolts: u32) -> f32 {
    millivolts as f32 / 1000.0
}

/// Lower leg of a divider fed from `reference_volts` through `reference_ohms`.
/// Returns infinity when the sense node sits at or above the rail, which the
/// plausibility band rejects.
pub fn divider_resistance(heater_volts: f32, reference_volts: f32, reference_ohms: f32) -> f32 {
    let drop = reference_volts - heater_volts;
    if drop <= 0.0 {
        return f32::INFINITY;
    }
    heater_volts * reference_ohms / drop
}
