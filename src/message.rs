//! Wire framing for the fireplace protocol.
//!
//! A frame is one command/response byte followed by an optional one-byte
//! payload. This module only knows how to turn [`Command`] values into bytes
//! and bytes into [`FireplaceMessage`] values; it has no state of its own.

use crate::error::CodecError;

/// An operation the client may ask a fireplace to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    SearchForFires,
    StatusPlease,
    PowerOn,
    PowerOff,
    FanBoostOn,
    FanBoostOff,
    FlameEffectOn,
    FlameEffectOff,
    /// Payload is the desired temperature in whole degrees Celsius.
    NewSetTemp(u8),
}

impl Command {
    fn opcode(&self) -> u8 {
        match self {
            Command::SearchForFires => 0x01,
            Command::StatusPlease => 0x02,
            Command::PowerOn => 0x03,
            Command::PowerOff => 0x04,
            Command::FanBoostOn => 0x05,
            Command::FanBoostOff => 0x06,
            Command::FlameEffectOn => 0x07,
            Command::FlameEffectOff => 0x08,
            Command::NewSetTemp(_) => 0x09,
        }
    }

    fn payload(&self) -> Option<u8> {
        match self {
            Command::NewSetTemp(degrees) => Some(*degrees),
            _ => None,
        }
    }

    /// The kind of response that a well-behaved fireplace sends back.
    ///
    /// Exhaustively matched on purpose: a new [`Command`] variant must be
    /// given an expected response before this compiles again.
    pub fn expected_response(&self) -> ResponseKind {
        match self {
            Command::SearchForFires => ResponseKind::IAmAFire,
            Command::StatusPlease => ResponseKind::Status,
            Command::PowerOn => ResponseKind::PowerOnAck,
            Command::PowerOff => ResponseKind::PowerOffAck,
            Command::FanBoostOn => ResponseKind::FanBoostOnAck,
            Command::FanBoostOff => ResponseKind::FanBoostOffAck,
            Command::FlameEffectOn => ResponseKind::FlameEffectOnAck,
            Command::FlameEffectOff => ResponseKind::FlameEffectOffAck,
            Command::NewSetTemp(_) => ResponseKind::NewSetTempAck,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self.payload() {
            Some(p) => vec![self.opcode(), p],
            None => vec![self.opcode()],
        }
    }
}

/// The kind of reply a fireplace can send, independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    IAmAFire,
    Status,
    PowerOnAck,
    PowerOffAck,
    FanBoostOnAck,
    FanBoostOffAck,
    FlameEffectOnAck,
    FlameEffectOffAck,
    NewSetTempAck,
}

/// Decoded contents of the device's current operating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPayload {
    pub fire_is_on: bool,
    pub fan_boost_is_on: bool,
    pub flame_effect: bool,
    pub desired_temp: u8,
    pub current_temp: u8,
    pub has_new_timers: bool,
}

/// A decoded incoming datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireplaceMessage {
    IAmAFire { serial_number: String },
    Status(StatusPayload),
    Ack(ResponseKind),
}

impl FireplaceMessage {
    pub fn kind(&self) -> ResponseKind {
        match self {
            FireplaceMessage::IAmAFire { .. } => ResponseKind::IAmAFire,
            FireplaceMessage::Status(_) => ResponseKind::Status,
            FireplaceMessage::Ack(kind) => *kind,
        }
    }
}

const RESP_I_AM_A_FIRE: u8 = 0x81;
const RESP_STATUS: u8 = 0x82;
const RESP_POWER_ON_ACK: u8 = 0x83;
const RESP_POWER_OFF_ACK: u8 = 0x84;
const RESP_FAN_BOOST_ON_ACK: u8 = 0x85;
const RESP_FAN_BOOST_OFF_ACK: u8 = 0x86;
const RESP_FLAME_EFFECT_ON_ACK: u8 = 0x87;
const RESP_FLAME_EFFECT_OFF_ACK: u8 = 0x88;
const RESP_NEW_SET_TEMP_ACK: u8 = 0x89;

const STATUS_FLAG_FIRE_ON: u8 = 0b001;
const STATUS_FLAG_FAN_BOOST: u8 = 0b010;
const STATUS_FLAG_FLAME_EFFECT: u8 = 0b100;
const STATUS_FLAG_NEW_TIMERS: u8 = 0b1000;

/// Decodes a raw UDP payload into a [`FireplaceMessage`].
///
/// Returns [`CodecError::Malformed`] for frames shorter than their kind
/// requires, and [`CodecError::UnknownResponse`] for an unrecognized leading
/// byte. Both are treated as "no usable reply" by the datagram layer.
pub fn decode(bytes: &[u8]) -> Result<FireplaceMessage, CodecError> {
    let &[kind_byte, ref rest @ ..] = bytes else {
        return Err(CodecError::Malformed { len: bytes.len() });
    };

    match kind_byte {
        RESP_I_AM_A_FIRE => {
            if rest.is_empty() {
                return Err(CodecError::Malformed { len: bytes.len() });
            }
            let serial_number = String::from_utf8_lossy(rest).trim_end_matches('\0').to_string();
            Ok(FireplaceMessage::IAmAFire { serial_number })
        }
        RESP_STATUS => {
            let [flags, desired_temp, current_temp] = rest else {
                return Err(CodecError::Malformed { len: bytes.len() });
            };
            Ok(FireplaceMessage::Status(StatusPayload {
                fire_is_on: flags & STATUS_FLAG_FIRE_ON != 0,
                fan_boost_is_on: flags & STATUS_FLAG_FAN_BOOST != 0,
                flame_effect: flags & STATUS_FLAG_FLAME_EFFECT != 0,
                desired_temp: *desired_temp,
                current_temp: *current_temp,
                has_new_timers: flags & STATUS_FLAG_NEW_TIMERS != 0,
            }))
        }
        RESP_POWER_ON_ACK => Ok(FireplaceMessage::Ack(ResponseKind::PowerOnAck)),
        RESP_POWER_OFF_ACK => Ok(FireplaceMessage::Ack(ResponseKind::PowerOffAck)),
        RESP_FAN_BOOST_ON_ACK => Ok(FireplaceMessage::Ack(ResponseKind::FanBoostOnAck)),
        RESP_FAN_BOOST_OFF_ACK => Ok(FireplaceMessage::Ack(ResponseKind::FanBoostOffAck)),
        RESP_FLAME_EFFECT_ON_ACK => Ok(FireplaceMessage::Ack(ResponseKind::FlameEffectOnAck)),
        RESP_FLAME_EFFECT_OFF_ACK => Ok(FireplaceMessage::Ack(ResponseKind::FlameEffectOffAck)),
        RESP_NEW_SET_TEMP_ACK => Ok(FireplaceMessage::Ack(ResponseKind::NewSetTempAck)),
        other => Err(CodecError::UnknownResponse { byte: other }),
    }
}

/// Encodes a [`StatusPayload`] the way a simulated fireplace would, for test doubles.
pub fn encode_status(payload: &StatusPayload) -> Vec<u8> {
    let mut flags = 0u8;
    if payload.fire_is_on {
        flags |= STATUS_FLAG_FIRE_ON;
    }
    if payload.fan_boost_is_on {
        flags |= STATUS_FLAG_FAN_BOOST;
    }
    if payload.flame_effect {
        flags |= STATUS_FLAG_FLAME_EFFECT;
    }
    if payload.has_new_timers {
        flags |= STATUS_FLAG_NEW_TIMERS;
    }
    vec![RESP_STATUS, flags, payload.desired_temp, payload.current_temp]
}

/// Encodes an I_AM_A_FIRE reply, for test doubles.
pub fn encode_i_am_a_fire(serial_number: &str) -> Vec<u8> {
    let mut out = vec![RESP_I_AM_A_FIRE];
    out.extend_from_slice(serial_number.as_bytes());
    out
}

/// Encodes a plain acknowledgement, for test doubles.
pub fn encode_ack(kind: ResponseKind) -> Vec<u8> {
    let byte = match kind {
        ResponseKind::IAmAFire => RESP_I_AM_A_FIRE,
        ResponseKind::Status => RESP_STATUS,
        ResponseKind::PowerOnAck => RESP_POWER_ON_ACK,
        ResponseKind::PowerOffAck => RESP_POWER_OFF_ACK,
        ResponseKind::FanBoostOnAck => RESP_FAN_BOOST_ON_ACK,
        ResponseKind::FanBoostOffAck => RESP_FAN_BOOST_OFF_ACK,
        ResponseKind::FlameEffectOnAck => RESP_FLAME_EFFECT_ON_ACK,
        ResponseKind::FlameEffectOffAck => RESP_FLAME_EFFECT_OFF_ACK,
        ResponseKind::NewSetTempAck => RESP_NEW_SET_TEMP_ACK,
    };
    vec![byte]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_encode_decode() {
        let payload = StatusPayload {
            fire_is_on: true,
            fan_boost_is_on: false,
            flame_effect: true,
            desired_temp: 22,
            current_temp: 19,
            has_new_timers: true,
        };
        let bytes = encode_status(&payload);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, FireplaceMessage::Status(payload));
    }

    #[test]
    fn expected_response_matches_ack_kind() {
        assert_eq!(Command::PowerOn.expected_response(), ResponseKind::PowerOnAck);
        assert_eq!(
            Command::NewSetTemp(21).expected_response(),
            ResponseKind::NewSetTempAck
        );
    }

    #[test]
    fn decode_rejects_empty_frame() {
        assert!(matches!(decode(&[]), Err(CodecError::Malformed { len: 0 })));
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        assert!(matches!(
            decode(&[0xff]),
            Err(CodecError::UnknownResponse { byte: 0xff })
        ));
    }

    #[test]
    fn decode_rejects_short_status_frame() {
        assert!(matches!(
            decode(&[RESP_STATUS, 0x01]),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn i_am_a_fire_round_trips_serial() {
        let bytes = encode_i_am_a_fire("ABC123");
        let decoded = decode(&bytes).unwrap();
        assert_eq!(
            decoded,
            FireplaceMessage::IAmAFire {
                serial_number: "ABC123".to_string()
            }
        );
    }
}
