use serde::{Deserialize, Serialize};

pub const HEATER_R_ON_OHMS: f32 = 4_410.0; // ~115 degC
pub const HEATER_R_OFF_OHMS: f32 = 3_340.0; // ~125 degC
pub const HEATER_R_FAN_ON_OHMS: f32 = 35_899.0; // ~50 degC
pub const HEATER_R_DEADBAND_OHMS: f32 = 1_000.0;
pub const HEATER_R_MIN_OHMS: f32 = 120.0;
pub const HEATER_R_MAX_OHMS: f32 = 200_000.0;
pub const HEATER_REF_R_OHMS: f32 = 4_700.0;

pub const ANALOG_READ_COUNT: u16 = 100;
pub const ADC_MAX_FAIL_COUNT: u16 = 10;
pub const REF_V_MIN: f32 = 4.8;
pub const REF_V_MAX: f32 = 5.2;
pub const REF_V_DEFAULT: f32 = 5.0;
pub const HEATER_V_MIN: f32 = 0.05;
pub const HEATER_V_MAX: f32 = 4.95;
pub const HEATER_V_DEFAULT: f32 = 2.5;

pub const TEMP_MAX_FAIL_COUNT: u8 = 5;
pub const CHAMBER_TEMP_DEADBAND_C: f32 = 0.3;
pub const AUX_FAN_OFFSET_C: f32 = 1.0;
pub const DOOR_FAN_OFFSET_C: f32 = 0.5;
pub const DEFAULT_SET_POINT_C: u8 = 30;

pub const LOOP_INTERVAL_MS: u64 = 2_500;
pub const HEATER_RUN_MARGIN_MS: u64 = 10_000;
pub const LIGHT_BUTTON_DEBOUNCE_MS: u64 = 250;

/// Fixed control thresholds. Built once from the constants above and never
/// mutated at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub heater_r_on: f32,
    pub heater_r_off: f32,
    pub heater_r_fan_on: f32,
    pub heater_r_deadband: f32,
    pub heater_r_min: f32,
    pub heater_r_max: f32,
    pub reference_resistor: f32,

    pub sample_count: u16,
    pub sample_fault_ceiling: u16,
    pub reference_volts_min: f32,
    pub reference_volts_max: f32,
    pub reference_volts_default: f32,
    pub heater_volts_min: f32,
    pub heater_volts_max: f32,
    pub heater_volts_default: f32,

    pub temp_fail_ceiling: u8,
    pub temp_deadband_c: f32,
    pub aux_fan_offset_c: f32,
    pub door_fan_offset_c: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            heater_r_on: HEATER_R_ON_OHMS,
            heater_r_off: HEATER_R_OFF_OHMS,
            heater_r_fan_on: HEATER_R_FAN_ON_OHMS,
            heater_r_deadband: HEATER_R_DEADBAND_OHMS,
            heater_r_min: HEATER_R_MIN_OHMS,
            heater_r_max: HEATER_R_MAX_OHMS,
            reference_resistor: HEATER_REF_R_OHMS,
            sample_count: ANALOG_READ_COUNT,
            sample_fault_ceiling: ADC_MAX_FAIL_COUNT,
            reference_volts_min: REF_V_MIN,
            reference_volts_max: REF_V_MAX,
            reference_volts_default: REF_V_DEFAULT,
            heater_volts_min: HEATER_V_MIN,
            heater_volts_max: HEATER_V_MAX,
            heater_volts_default: HEATER_V_DEFAULT,
            temp_fail_ceiling: TEMP_MAX_FAIL_COUNT,
            temp_deadband_c: CHAMBER_TEMP_DEADBAND_C,
            aux_fan_offset_c: AUX_FAN_OFFSET_C,
            door_fan_offset_c: DOOR_FAN_OFFSET_C,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub loop_interval_ms: u64,
    pub heater_run_margin_ms: u64,
    pub light_button_debounce_ms: u64,
    /// Web server port. Unset falls back to the build's own default.
    pub http_port: Option<u16>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            loop_interval_ms: LOOP_INTERVAL_MS,
            heater_run_margin_ms: HEATER_RUN_MARGIN_MS,
            light_button_debounce_ms: LIGHT_BUTTON_DEBOUNCE_MS,
            http_port: None,
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.loop_interval_ms = self.loop_interval_ms.clamp(500, 60_000);
        self.heater_run_margin_ms = self.heater_run_margin_ms.min(60_000);
        self.light_button_debounce_ms = self.light_button_debounce_ms.clamp(20, 2_000);
        if self.http_port == Some(0) {
            self.http_port = None;
        }
    }

    pub fn http_port_or(&self, fallback: u16) -> u16 {
        self.http_port.unwrap_or(fallback)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

impl NetworkConfig {
    pub fn has_credentials(&self) -> bool {
        !self.wifi_ssid.is_empty() && !self.wifi_pass.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub controller: ControllerConfig,
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let mut runtime: RuntimeConfig = serde_json::from_slice(raw)?;
        runtime.controller.sanitize();
        Ok(runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_keep_resistance_hysteresis_ordered() {
        let thresholds = Thresholds::default();
        assert!(thresholds.heater_r_on > thresholds.heater_r_off);
        assert!(thresholds.heater_r_fan_on > thresholds.heater_r_on);
        assert!(thresholds.heater_r_min > 0.0);
        assert!(thresholds.aux_fan_offset_c > thresholds.door_fan_offset_c);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let runtime =
            RuntimeConfig::from_json(br#"{"network":{"wifi_ssid":"shed"}}"#).unwrap();

        assert_eq!(runtime.network.wifi_ssid, "shed");
        assert!(!runtime.network.has_credentials());
        assert_eq!(runtime.controller.loop_interval_ms, LOOP_INTERVAL_MS);
        assert_eq!(runtime.controller.heater_run_margin_ms, HEATER_RUN_MARGIN_MS);
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let runtime = RuntimeConfig::from_json(
            br#"{"controller":{"loop_interval_ms":10,"light_button_debounce_ms":0,"http_port":0}}"#,
        )
        .unwrap();

        assert_eq!(runtime.controller.loop_interval_ms, 500);
        assert_eq!(runtime.controller.light_button_debounce_ms, 20);
        assert_eq!(runtime.controller.http_port, None);
        assert_eq!(runtime.controller.http_port_or(80), 80);
    }

    #[test]
    fn configured_http_port_overrides_fallback() {
        let runtime =
            RuntimeConfig::from_json(br#"{"controller":{"http_port":9000}}"#).unwrap();
        assert_eq!(runtime.controller.http_port_or(8080), 9000);

        assert_eq!(RuntimeConfig::default().controller.http_port_or(8080), 8080);
    }
}
