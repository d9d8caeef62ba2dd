//! Binary packet codec.
//!
//! Every datagram starts with a one-byte [`PacketType`] tag. The rest is the
//! type-specific body, encoded with bincode configured for big-endian,
//! fixed-width integers. Decoding never panics: anything that does not parse
//! comes back as a [`PacketError`] and the caller drops the datagram.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entity::{CharacterClass, EntityId};
use crate::snapshot::{Snapshot, SnapshotWire};

/// Server time in ticks.
pub type Tick = i32;
/// Client command sequence number.
pub type Sequence = i32;

/// Sentinel for "no command acknowledged yet".
pub const NO_ACK: Sequence = -1;

/// Largest datagram either side will produce or accept, tag byte included.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Longest display name the server keeps, in characters. Longer names are
/// cut, so one character's payload always fits comfortably in a packet.
pub const MAX_NAME_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Join = 0,
    Action = 1,
    Disconnect = 2,
    Response = 3,
    Snapshot = 4,
    Gamestate = 5,
}

impl PacketType {
    /// Reads the type tag from the first byte of a datagram.
    pub fn of(data: &[u8]) -> Result<PacketType, PacketError> {
        let tag = *data.first().ok_or(PacketError::Empty)?;
        PacketType::try_from(tag)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(PacketType::Join),
            1 => Ok(PacketType::Action),
            2 => Ok(PacketType::Disconnect),
            3 => Ok(PacketType::Response),
            4 => Ok(PacketType::Snapshot),
            5 => Ok(PacketType::Gamestate),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown packet type tag {0}")]
    UnknownType(u8),
    #[error("{0:?} packet is not valid in this direction")]
    Unexpected(PacketType),
    #[error("malformed {packet_type:?} body: {source}")]
    Malformed {
        packet_type: PacketType,
        #[source]
        source: bincode::Error,
    },
    #[error("unknown join result code {0}")]
    UnknownResultCode(u8),
    #[error("failed to encode {packet_type:?} packet: {source}")]
    Encode {
        packet_type: PacketType,
        #[source]
        source: bincode::Error,
    },
}

pub(crate) fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .with_limit((MAX_PACKET_SIZE - 1) as u64)
}

pub(crate) fn encode_packet<T: Serialize + ?Sized>(
    packet_type: PacketType,
    body: &T,
) -> Result<Vec<u8>, PacketError> {
    let mut bytes = vec![packet_type as u8];
    wire_options()
        .serialize_into(&mut bytes, body)
        .map_err(|source| PacketError::Encode {
            packet_type,
            source,
        })?;
    Ok(bytes)
}

fn decode_body<T: DeserializeOwned>(
    packet_type: PacketType,
    body: &[u8],
) -> Result<T, PacketError> {
    wire_options()
        .deserialize(body)
        .map_err(|source| PacketError::Malformed {
            packet_type,
            source,
        })
}

/// Client → server join request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub name: String,
    pub class: CharacterClass,
    /// Display colour as 0xRRGGBB.
    pub colour: u32,
}

impl JoinRequest {
    /// The requested name cut to at most [`MAX_NAME_LEN`] characters.
    pub fn display_name(&self) -> &str {
        match self.name.char_indices().nth(MAX_NAME_LEN) {
            Some((end, _)) => &self.name[..end],
            None => &self.name,
        }
    }
}

/// What the player wants its character to do.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Idle,
    MoveTo { x: f32, y: f32 },
    Attack { target: EntityId },
    PickUp { item: EntityId },
}

/// Client → server command. `acked_tick` is the newest server tick the client
/// has received, which lets the server prune its backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub sequence: Sequence,
    pub acked_tick: Tick,
    pub action: Action,
}

/// Server → client answer to a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinResponse {
    Accepted { entity_id: EntityId },
    ServerFull,
    NameTaken,
}

impl JoinResponse {
    pub fn code(&self) -> u8 {
        match self {
            JoinResponse::Accepted { .. } => 0,
            JoinResponse::ServerFull => 1,
            JoinResponse::NameTaken => 2,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ResponseBody {
    code: u8,
    entity_id: EntityId,
}

impl From<JoinResponse> for ResponseBody {
    fn from(response: JoinResponse) -> Self {
        let entity_id = match response {
            JoinResponse::Accepted { entity_id } => entity_id,
            _ => 0,
        };
        ResponseBody {
            code: response.code(),
            entity_id,
        }
    }
}

impl TryFrom<ResponseBody> for JoinResponse {
    type Error = PacketError;

    fn try_from(body: ResponseBody) -> Result<Self, Self::Error> {
        match body.code {
            0 => Ok(JoinResponse::Accepted {
                entity_id: body.entity_id,
            }),
            1 => Ok(JoinResponse::ServerFull),
            2 => Ok(JoinResponse::NameTaken),
            other => Err(PacketError::UnknownResultCode(other)),
        }
    }
}

/// Packets a client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    Join(JoinRequest),
    Action(Command),
    Disconnect,
}

impl ClientPacket {
    pub fn packet_type(&self) -> PacketType {
        match self {
            ClientPacket::Join(_) => PacketType::Join,
            ClientPacket::Action(_) => PacketType::Action,
            ClientPacket::Disconnect => PacketType::Disconnect,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        match self {
            ClientPacket::Join(request) => encode_packet(PacketType::Join, request),
            ClientPacket::Action(command) => encode_packet(PacketType::Action, command),
            ClientPacket::Disconnect => encode_packet(PacketType::Disconnect, &()),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        let packet_type = PacketType::of(data)?;
        let body = &data[1..];
        match packet_type {
            PacketType::Join => Ok(ClientPacket::Join(decode_body(packet_type, body)?)),
            PacketType::Action => Ok(ClientPacket::Action(decode_body(packet_type, body)?)),
            PacketType::Disconnect => {
                decode_body::<()>(packet_type, body)?;
                Ok(ClientPacket::Disconnect)
            }
            other => Err(PacketError::Unexpected(other)),
        }
    }
}

/// Packets the server sends to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    Response(JoinResponse),
    Snapshot(Snapshot),
    /// Full world state; the receiver replaces everything it knows.
    Gamestate(Snapshot),
}

impl ServerPacket {
    pub fn packet_type(&self) -> PacketType {
        match self {
            ServerPacket::Response(_) => PacketType::Response,
            ServerPacket::Snapshot(_) => PacketType::Snapshot,
            ServerPacket::Gamestate(_) => PacketType::Gamestate,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        match self {
            ServerPacket::Response(response) => {
                encode_packet(PacketType::Response, &ResponseBody::from(*response))
            }
            ServerPacket::Snapshot(snapshot) => snapshot.serialize(),
            ServerPacket::Gamestate(snapshot) => snapshot.serialize_gamestate(),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        let packet_type = PacketType::of(data)?;
        let body = &data[1..];
        match packet_type {
            PacketType::Response => {
                let body: ResponseBody = decode_body(packet_type, body)?;
                Ok(ServerPacket::Response(JoinResponse::try_from(body)?))
            }
            PacketType::Snapshot => {
                let wire: SnapshotWire = decode_body(packet_type, body)?;
                Ok(ServerPacket::Snapshot(Snapshot::from_wire(wire)))
            }
            PacketType::Gamestate => {
                let wire: SnapshotWire = decode_body(packet_type, body)?;
                Ok(ServerPacket::Gamestate(Snapshot::from_wire(wire)))
            }
            other => Err(PacketError::Unexpected(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CharacterState, EntityState};

    fn join_request() -> JoinRequest {
        JoinRequest {
            name: "Goku".to_string(),
            class: CharacterClass::Warrior,
            colour: 0xFF8800,
        }
    }

    #[test]
    fn test_join_roundtrip() {
        let packet = ClientPacket::Join(join_request());
        let bytes = packet.encode().unwrap();

        assert_eq!(bytes[0], PacketType::Join as u8);
        assert_eq!(ClientPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_action_layout_is_big_endian() {
        let packet = ClientPacket::Action(Command {
            sequence: 7,
            acked_tick: 258,
            action: Action::Idle,
        });
        let bytes = packet.encode().unwrap();

        assert_eq!(bytes[0], PacketType::Action as u8);
        assert_eq!(&bytes[1..5], &[0, 0, 0, 7]);
        assert_eq!(&bytes[5..9], &[0, 0, 1, 2]);
        assert_eq!(ClientPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_action_variants_roundtrip() {
        let actions = [
            Action::Idle,
            Action::MoveTo { x: 10.5, y: -3.25 },
            Action::Attack { target: 9 },
            Action::PickUp { item: 12 },
        ];

        for (i, action) in actions.into_iter().enumerate() {
            let packet = ClientPacket::Action(Command {
                sequence: i as Sequence,
                acked_tick: NO_ACK,
                action,
            });
            let decoded = ClientPacket::decode(&packet.encode().unwrap()).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_disconnect_is_tag_only() {
        let bytes = ClientPacket::Disconnect.encode().unwrap();
        assert_eq!(bytes, vec![PacketType::Disconnect as u8]);
        assert_eq!(
            ClientPacket::decode(&bytes).unwrap(),
            ClientPacket::Disconnect
        );
    }

    #[test]
    fn test_response_codes_on_wire() {
        let cases = [
            (JoinResponse::Accepted { entity_id: 42 }, 0u8),
            (JoinResponse::ServerFull, 1),
            (JoinResponse::NameTaken, 2),
        ];

        for (response, code) in cases {
            let bytes = ServerPacket::Response(response).encode().unwrap();
            assert_eq!(bytes[0], PacketType::Response as u8);
            assert_eq!(bytes[1], code);
            assert_eq!(
                ServerPacket::decode(&bytes).unwrap(),
                ServerPacket::Response(response)
            );
        }
    }

    #[test]
    fn test_unknown_result_code_rejected() {
        let bytes = vec![PacketType::Response as u8, 9, 0, 0, 0, 0];
        assert!(matches!(
            ServerPacket::decode(&bytes),
            Err(PacketError::UnknownResultCode(9))
        ));
    }

    #[test]
    fn test_gamestate_roundtrip() {
        let mut snapshot = Snapshot::new(12, NO_ACK);
        snapshot.add_create(
            1,
            EntityState::Character(CharacterState {
                name: "Vegeta".to_string(),
                class: CharacterClass::Mage,
                colour: 0x0000FF,
                x: 1.0,
                y: 2.0,
                angle: 0.5,
                health: 80,
                max_health: 80,
            }),
        );

        let packet = ServerPacket::Gamestate(snapshot);
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes[0], PacketType::Gamestate as u8);
        assert_eq!(ServerPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_empty_datagram() {
        assert!(matches!(ClientPacket::decode(&[]), Err(PacketError::Empty)));
    }

    #[test]
    fn test_unknown_tag() {
        assert!(matches!(
            ClientPacket::decode(&[0xFF, 1, 2]),
            Err(PacketError::UnknownType(0xFF))
        ));
    }

    #[test]
    fn test_wrong_direction() {
        let bytes = ServerPacket::Response(JoinResponse::ServerFull)
            .encode()
            .unwrap();
        assert!(matches!(
            ClientPacket::decode(&bytes),
            Err(PacketError::Unexpected(PacketType::Response))
        ));

        let join = ClientPacket::Join(join_request()).encode().unwrap();
        assert!(matches!(
            ServerPacket::decode(&join),
            Err(PacketError::Unexpected(PacketType::Join))
        ));
    }

    #[test]
    fn test_truncated_body() {
        let bytes = ClientPacket::Action(Command {
            sequence: 1,
            acked_tick: 1,
            action: Action::MoveTo { x: 1.0, y: 1.0 },
        })
        .encode()
        .unwrap();

        for len in 1..bytes.len() {
            assert!(matches!(
                ClientPacket::decode(&bytes[..len]),
                Err(PacketError::Malformed {
                    packet_type: PacketType::Action,
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut bytes = ClientPacket::Join(join_request()).encode().unwrap();
        bytes.push(0xAB);
        assert!(ClientPacket::decode(&bytes).is_err());
    }

    #[test]
    fn test_oversized_name_length_rejected() {
        // Join with a declared name length far beyond the datagram
        let mut bytes = vec![PacketType::Join as u8];
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(ClientPacket::decode(&bytes).is_err());
    }

    #[test]
    fn test_display_name_is_clamped() {
        let short = join_request();
        assert_eq!(short.display_name(), short.name);

        let long = JoinRequest {
            name: "é".repeat(4000),
            ..join_request()
        };
        assert_eq!(long.display_name().chars().count(), MAX_NAME_LEN);
        assert!(long.display_name().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_body_limit_counts_tag_byte() {
        // 8-byte length prefix + name bytes + class + colour
        let fits = JoinRequest {
            name: "x".repeat(MAX_PACKET_SIZE - 1 - 8 - 4 - 4),
            ..join_request()
        };
        let bytes = ClientPacket::Join(fits).encode().unwrap();
        assert_eq!(bytes.len(), MAX_PACKET_SIZE);

        let too_long = JoinRequest {
            name: "x".repeat(MAX_PACKET_SIZE),
            ..join_request()
        };
        assert!(matches!(
            ClientPacket::Join(too_long).encode(),
            Err(PacketError::Encode { .. })
        ));
    }

    #[test]
    fn test_packet_type_of() {
        assert_eq!(PacketType::of(&[4, 0]).unwrap(), PacketType::Snapshot);
        assert!(PacketType::of(&[6]).is_err());
    }
}
