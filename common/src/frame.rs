//! Fixed 9-byte state notification broadcast to observers after every cycle.
//!
//! | byte | field                                                  |
//! |------|--------------------------------------------------------|
//! | 0-1  | temperature, `round((t + 50) * 100)`, u16 LE, 0 = unknown |
//! | 2    | set point, degC                                        |
//! | 3-4  | heater minutes left, u16 LE                            |
//! | 5-6  | heater resistance, ohm, u16 LE saturated, 0 = unknown  |
//! | 7    | last duty cycle, `round(d * 255)`                      |
//! | 8    | flags, see [`FrameFlags`]                              |
//!
//! Multi-byte fields are little-endian. Flag bit 0 is the least
//! significant bit.

use crate::error::FrameError;

pub const FRAME_LEN: usize = 9;
pub const TEMP_OFFSET_C: f32 = 50.0;
pub const TEMP_FACTOR: f32 = 100.0;
pub const DUTY_CYCLE_FACTOR: f32 = 255.0;

const BYTE_TEMP: usize = 0;
const BYTE_SET_POINT: usize = 2;
const BYTE_HEATER_TIME_LEFT: usize = 3;
const BYTE_HEATER_R: usize = 5;
const BYTE_DUTY_CYCLE: usize = 7;
const BYTE_FLAGS: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const HEATER_ON: Self = Self(1 << 0);
    pub const LIGHT_ON: Self = Self(1 << 1);
    pub const HEATER_FAN_SET: Self = Self(1 << 2);
    pub const HEATER_FAN_ON: Self = Self(1 << 3);
    pub const DOOR_FAN_SET: Self = Self(1 << 4);
    pub const DOOR_FAN_ON: Self = Self(1 << 5);
    pub const AUX_FAN_SET: Self = Self(1 << 6);
    pub const AUX_FAN_ON: Self = Self(1 << 7);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    pub fn with(mut self, other: Self, value: bool) -> Self {
        self.set(other, value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateFrame {
    pub temperature_c: Option<f32>,
    pub set_point_c: u8,
    pub heater_minutes_left: u16,
    pub heater_resistance: Option<f32>,
    pub duty_cycle: f32,
    pub flags: FrameFlags,
}

impl StateFrame {
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0_u8; FRAME_LEN];

        let temp_raw = match self.temperature_c {
            Some(temp) => saturate_u16((temp + TEMP_OFFSET_C) * TEMP_FACTOR),
            None => 0,
        };
        frame[BYTE_TEMP..BYTE_TEMP + 2].copy_from_slice(&temp_raw.to_le_bytes());
        frame[BYTE_SET_POINT] = self.set_point_c;
        frame[BYTE_HEATER_TIME_LEFT..BYTE_HEATER_TIME_LEFT + 2]
            .copy_from_slice(&self.heater_minutes_left.to_le_bytes());

        let resistance_raw = self.heater_resistance.map(saturate_u16).unwrap_or(0);
        frame[BYTE_HEATER_R..BYTE_HEATER_R + 2].copy_from_slice(&resistance_raw.to_le_bytes());

        frame[BYTE_DUTY_CYCLE] = (self.duty_cycle.clamp(0.0, 1.0) * DUTY_CYCLE_FACTOR).round() as u8;
        frame[BYTE_FLAGS] = self.flags.bits();
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let frame: &[u8; FRAME_LEN] = bytes.try_into().map_err(|_| FrameError::InvalidLength {
            expected: FRAME_LEN,
            actual: bytes.len(),
        })?;

        let temp_raw = u16::from_le_bytes([frame[BYTE_TEMP], frame[BYTE_TEMP + 1]]);
        let minutes = u16::from_le_bytes([
            frame[BYTE_HEATER_TIME_LEFT],
            frame[BYTE_HEATER_TIME_LEFT + 1],
        ]);
        let resistance_raw = u16::from_le_bytes([frame[BYTE_HEATER_R], frame[BYTE_HEATER_R + 1]]);

        Ok(Self {
            temperature_c: (temp_raw != 0)
                .then(|| f32::from(temp_raw) / TEMP_FACTOR - TEMP_OFFSET_C),
            set_point_c: frame[BYTE_SET_POINT],
            heater_minutes_left: minutes,
            heater_resistance: (resistance_raw != 0).then(|| f32::from(resistance_raw)),
            duty_cycle: f32::from(frame[BYTE_DUTY_CYCLE]) / DUTY_CYCLE_FACTOR,
            flags: FrameFlags::from_bits(frame[BYTE_FLAGS]),
        })
    }
}

fn saturate_u16(value: f32) -> u16 {
    // Float-to-int `as` saturates and maps NaN to 0.
    value.round() as u16
}
