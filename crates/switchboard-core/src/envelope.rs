use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::DeviceId;

/// Every frame a client sends or receives, decoded once at the boundary.
///
/// Internally tagged on `"type"`. A frame whose tag is recognized but whose
/// required fields are missing fails to decode and is discarded by the
/// caller; a frame with an unrecognized tag decodes to [`Envelope::Unknown`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Claim a device identity for the sending connection.
    #[serde(rename_all = "camelCase")]
    Register {
        device_id: DeviceId,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_name: Option<String>,
    },

    /// Server-originated availability notice. Inbound instances are ignored.
    #[serde(rename_all = "camelCase")]
    Presence {
        device_id: DeviceId,
        is_online: bool,
    },

    PairRequest(Addressed),
    PairAccept(Addressed),
    WebrtcOffer(Addressed),
    WebrtcAnswer(Addressed),
    WebrtcIce(Addressed),

    /// Any unrecognized `"type"` tag. Dropped without closing the connection.
    #[serde(other)]
    Unknown,
}

/// Common shape of the five relayed envelope kinds: a recipient plus an
/// arbitrary negotiation payload the relay never interprets.
///
/// The payload map keeps every field other than `type` and `toDeviceId`, so
/// a decoded envelope loses nothing. Forwarding still sends the original
/// frame text, not a re-serialization: [`serde_json::Map`] orders keys
/// alphabetically and byte-for-byte delivery is part of the contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Addressed {
    pub to_device_id: DeviceId,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Build an availability notice for presence fan-out.
    pub fn presence(device_id: DeviceId, is_online: bool) -> Self {
        Self::Presence {
            device_id,
            is_online,
        }
    }

    /// The wire tag, for logging and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Presence { .. } => "presence",
            Self::PairRequest(_) => "pair_request",
            Self::PairAccept(_) => "pair_accept",
            Self::WebrtcOffer(_) => "webrtc_offer",
            Self::WebrtcAnswer(_) => "webrtc_answer",
            Self::WebrtcIce(_) => "webrtc_ice",
            Self::Unknown => "unknown",
        }
    }
}
