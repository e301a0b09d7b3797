use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const TOUCH_TYPE_GESTURE: &str = "gesture";
pub const TOUCH_TYPE_SWIPE: &str = "gestureSwipe";
pub const TOUCH_TYPE_EVENT_SDK: &str = "eventSdk";

/// Envelope used by every non-gesture control message.
///
/// `content` is itself a JSON document encoded as a string. The remote
/// listener decodes twice, so the nesting must be kept exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub touch_type: String,
    pub content: String,
}

impl Envelope {
    /// Wrap a payload, encoding it into the `content` string.
    pub fn wrap<T: Serialize>(touch_type: &str, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            touch_type: touch_type.to_string(),
            content: serde_json::to_string(payload)?,
        })
    }

    /// Decode the inner `content` string.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.content)
    }
}

/// Touch action codes understood by the remote input injector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum TouchAction {
    Down,
    Up,
    Move,
    /// Second and further fingers landing (Android `ACTION_POINTER_DOWN` variant).
    MultiDown,
}

impl From<TouchAction> for u16 {
    fn from(action: TouchAction) -> Self {
        match action {
            TouchAction::Down => 0,
            TouchAction::Up => 1,
            TouchAction::Move => 2,
            TouchAction::MultiDown => 261,
        }
    }
}

impl TryFrom<u16> for TouchAction {
    type Error = WireError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Down),
            1 => Ok(Self::Up),
            2 => Ok(Self::Move),
            261 => Ok(Self::MultiDown),
            other => Err(WireError::UnknownAction(other)),
        }
    }
}

/// Per-contact pointer properties. `tool_type` 1 = finger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerProperties {
    pub id: u32,
    pub tool_type: u32,
}

impl PointerProperties {
    pub fn finger(id: u32) -> Self {
        Self { id, tool_type: 1 }
    }
}

/// Physical parameters of one contact plus its mapped position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchCoord {
    pub pressure: f64,
    pub size: f64,
    pub touch_major: f64,
    pub touch_minor: f64,
    pub tool_major: f64,
    pub tool_minor: f64,
    pub orientation: f64,
    pub x: f64,
    pub y: f64,
}

/// A `gesture` message. Serialized flat (no envelope), with
/// `touchType: "gesture"` alongside the other fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchConfig {
    pub action: TouchAction,
    pub width_pixels: u32,
    pub height_pixels: u32,
    pub point_count: u32,
    pub touch_type: String,
    pub properties: Vec<PointerProperties>,
    pub coords: Vec<TouchCoord>,
}

impl TouchConfig {
    pub fn new(width_pixels: u32, height_pixels: u32) -> Self {
        Self {
            action: TouchAction::Down,
            width_pixels,
            height_pixels,
            point_count: 1,
            touch_type: TOUCH_TYPE_GESTURE.to_string(),
            properties: Vec::new(),
            coords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwipeCoord {
    pub pressure: f64,
    pub size: f64,
    pub x: f64,
    pub y: f64,
}

/// Wheel scroll, sent as a `gestureSwipe` message. `swipe` is -1 for
/// scrolling down (positive wheel delta) and 1 otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeGesture {
    pub coords: Vec<SwipeCoord>,
    pub width_pixels: u32,
    pub height_pixels: u32,
    pub point_count: u32,
    pub properties: Vec<PointerProperties>,
    pub touch_type: String,
    pub swipe: i8,
}

impl SwipeGesture {
    pub fn at(x: f64, y: f64, width_pixels: u32, height_pixels: u32, delta_y: f64) -> Self {
        Self {
            coords: vec![SwipeCoord {
                pressure: 1.0,
                size: 1.0,
                x,
                y,
            }],
            width_pixels,
            height_pixels,
            point_count: 1,
            properties: vec![PointerProperties::finger(0)],
            touch_type: TOUCH_TYPE_SWIPE.to_string(),
            swipe: if delta_y > 0.0 { -1 } else { 1 },
        }
    }
}

/// Remote encoder profile selection. The ids are an opaque enumeration owned
/// by the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDefinition {
    pub definition_id: u32,
    pub framerate_id: u32,
    pub bitrate_id: u32,
}

pub const DEFINITION_ID_MAX: u32 = 20;
pub const FRAMERATE_ID_MAX: u32 = 10;
pub const BITRATE_ID_MAX: u32 = 20;

impl StreamDefinition {
    pub const fn new(definition_id: u32, framerate_id: u32, bitrate_id: u32) -> Self {
        Self {
            definition_id,
            framerate_id,
            bitrate_id,
        }
    }

    /// Check every id is a positive integer inside its accepted range.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        check_id("definitionId", self.definition_id, DEFINITION_ID_MAX)?;
        check_id("framerateId", self.framerate_id, FRAMERATE_ID_MAX)?;
        check_id("bitrateId", self.bitrate_id, BITRATE_ID_MAX)?;
        Ok(())
    }
}

fn check_id(field: &'static str, value: u32, max: u32) -> Result<(), DefinitionError> {
    if value == 0 || value > max {
        return Err(DefinitionError::OutOfRange { field, value, max });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("{field} must be between 1 and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
}

/// Payloads carried inside an `eventSdk` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SdkEvent {
    /// Ask the remote encoder for an immediate keyframe.
    #[serde(rename = "requestIFrame")]
    RequestIFrame,
    /// Switch the remote encoder profile. The misspelt tag is what the
    /// device listens for.
    #[serde(rename = "definitionUpdata")]
    DefinitionUpdate(StreamDefinition),
    /// Ask the device to resend its UI state.
    UpdateUiH5,
}

/// Every control message this client puts on the message channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Gesture(TouchConfig),
    Swipe(SwipeGesture),
    Sdk(SdkEvent),
}

impl ControlMessage {
    /// Encode to the exact string sent over the message channel.
    pub fn to_wire(&self) -> Result<String, WireError> {
        let text = match self {
            Self::Gesture(config) => serde_json::to_string(config)?,
            Self::Swipe(swipe) => serde_json::to_string(swipe)?,
            Self::Sdk(event) => {
                serde_json::to_string(&Envelope::wrap(TOUCH_TYPE_EVENT_SDK, event)?)?
            }
        };
        Ok(text)
    }

    /// Parse a wire string back, dispatching on `touchType`.
    pub fn from_wire(text: &str) -> Result<Self, WireError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let touch_type = value
            .get("touchType")
            .and_then(|t| t.as_str())
            .ok_or(WireError::MissingTouchType)?
            .to_string();
        match touch_type.as_str() {
            TOUCH_TYPE_GESTURE => Ok(Self::Gesture(serde_json::from_value(value)?)),
            TOUCH_TYPE_SWIPE => Ok(Self::Swipe(serde_json::from_value(value)?)),
            TOUCH_TYPE_EVENT_SDK => {
                let envelope: Envelope = serde_json::from_value(value)?;
                Ok(Self::Sdk(envelope.payload()?))
            }
            _ => Err(WireError::UnknownTouchType(touch_type)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no touchType")]
    MissingTouchType,
    #[error("unknown touchType: {0}")]
    UnknownTouchType(String),
    #[error("unknown touch action code: {0}")]
    UnknownAction(u16),
}

/// ICE candidate type as reported by `RTCPeerConnection.getStats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
    #[serde(other)]
    Unknown,
}

/// One entry of a browser stats report. Only the entries this client reads
/// are typed; everything else collapses into `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StatsEntry {
    RemoteCandidate {
        #[serde(rename = "candidateType")]
        candidate_type: CandidateType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Subscribed video stream counters reported by the RTC engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteVideoStats {
    #[serde(default)]
    pub packets_lost: u64,
    #[serde(default)]
    pub received_kbitrate: f64,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}
