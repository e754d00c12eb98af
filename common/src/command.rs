use crate::error::CommandError;

pub const REQUEST_SET_TEMP: u8 = 0xa1;
pub const REQUEST_SET_HEATER_TIME_LEFT: u8 = 0xa2;
pub const REQUEST_SET_LIGHT: u8 = 0xa3;
pub const REQUEST_SET_HEATER_FAN: u8 = 0xa4;
pub const REQUEST_SET_DOOR_FAN: u8 = 0xa5;
pub const REQUEST_SET_AUX_FAN: u8 = 0xa6;

/// Binary request from an observer, one opcode byte followed by its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetTemperature(u8),
    SetHeaterTimeLeft { minutes: u16 },
    SetLight(bool),
    SetHeaterFan(bool),
    SetDoorFan(bool),
    SetAuxFan(bool),
}

impl Command {
    pub fn decode(bytes: &[u8]) -> Result<Self, CommandError> {
        let (&opcode, payload) = bytes.split_first().ok_or(CommandError::Empty)?;

        let expected = match opcode {
            REQUEST_SET_HEATER_TIME_LEFT => 3,
            REQUEST_SET_TEMP
            | REQUEST_SET_LIGHT
            | REQUEST_SET_HEATER_FAN
            | REQUEST_SET_DOOR_FAN
            | REQUEST_SET_AUX_FAN => 2,
            other => return Err(CommandError::UnknownOpcode(other)),
        };
        if bytes.len() != expected {
            return Err(CommandError::InvalidLength {
                opcode,
                expected,
                actual: bytes.len(),
            });
        }

        let flag = payload[0] == 1;
        Ok(match opcode {
            REQUEST_SET_TEMP => Self::SetTemperature(payload[0]),
            REQUEST_SET_HEATER_TIME_LEFT => Self::SetHeaterTimeLeft {
                minutes: u16::from_le_bytes([payload[0], payload[1]]),
            },
            REQUEST_SET_LIGHT => Self::SetLight(flag),
            REQUEST_SET_HEATER_FAN => Self::SetHeaterFan(flag),
            REQUEST_SET_DOOR_FAN => Self::SetDoorFan(flag),
            _ => Self::SetAuxFan(flag),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Self::SetTemperature(temp) => vec![REQUEST_SET_TEMP, temp],
            Self::SetHeaterTimeLeft { minutes } => {
                let [low, high] = minutes.to_le_bytes();
                vec![REQUEST_SET_HEATER_TIME_LEFT, low, high]
            }
            Self::SetLight(on) => vec![REQUEST_SET_LIGHT, u8::from(on)],
            Self::SetHeaterFan(on) => vec![REQUEST_SET_HEATER_FAN, u8::from(on)],
            Self::SetDoorFan(on) => vec![REQUEST_SET_DOOR_FAN, u8::from(on)],
            Self::SetAuxFan(on) => vec![REQUEST_SET_AUX_FAN, u8::from(on)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_heater_time_left_little_endian() {
        assert_eq!(
            Command::decode(&[0xa2, 0x2c, 0x01]),
            Ok(Command::SetHeaterTimeLeft { minutes: 300 })
        );
    }

    #[test]
    fn boolean_payload_is_on_only_for_one() {
        assert_eq!(Command::decode(&[0xa4, 1]), Ok(Command::SetHeaterFan(true)));
        assert_eq!(Command::decode(&[0xa4, 0]), Ok(Command::SetHeaterFan(false)));
        assert_eq!(Command::decode(&[0xa4, 2]), Ok(Command::SetHeaterFan(false)));
    }

    #[test]
    fn rejects_missing_payload() {
        assert_eq!(
            Command::decode(&[0xa3]),
            Err(CommandError::InvalidLength {
                opcode: 0xa3,
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            Command::decode(&[0xa2, 10]),
            Err(CommandError::InvalidLength {
                opcode: 0xa2,
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn rejects_trailing_bytes_and_unknown_codes() {
        assert!(Command::decode(&[0xa1, 30, 0]).is_err());
        assert_eq!(Command::decode(&[]), Err(CommandError::Empty));
        assert_eq!(Command::decode(&[0x10, 1]), Err(CommandError::UnknownOpcode(0x10)));
    }

    #[test]
    fn encode_produces_decodable_requests() {
        let commands = [
            Command::SetTemperature(45),
            Command::SetHeaterTimeLeft { minutes: 90 },
            Command::SetLight(false),
            Command::SetDoorFan(true),
            Command::SetAuxFan(true),
        ];
        for command in commands {
            assert_eq!(Command::decode(&command.encode()), Ok(command));
        }
    }
}
