//! Maps local pointer positions into the remote device's pixel space.
//!
//! The local container can be portrait or landscape (`RotateType`) and the
//! remote stream can independently be portrait or landscape. When the two
//! disagree the video is shown rotated and every coordinate has to be
//! rotated back before it is sent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RotateType {
    #[default]
    Portrait,
    Landscape,
}

impl From<RotateType> for u8 {
    fn from(rotate_type: RotateType) -> Self {
        match rotate_type {
            RotateType::Portrait => 0,
            RotateType::Landscape => 1,
        }
    }
}

impl TryFrom<u8> for RotateType {
    type Error = InvalidRotateType;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Portrait),
            1 => Ok(Self::Landscape),
            other => Err(InvalidRotateType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rotate type must be 0 or 1, got {0}")]
pub struct InvalidRotateType(pub u8);

/// Remote stream size. `0x0` means no frame has been seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

/// How the container orientation relates to the remote stream orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// Orientations agree, or the remote size is unknown.
    Aligned,
    /// Landscape container showing a portrait stream.
    PortraitRemoteInLandscape,
    /// Portrait container showing a landscape stream.
    LandscapeRemoteInPortrait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationState {
    pub rotate_type: RotateType,
    pub remote_resolution: Resolution,
}

impl RotationState {
    pub fn new(rotate_type: RotateType, remote_resolution: Resolution) -> Self {
        Self {
            rotate_type,
            remote_resolution,
        }
    }

    /// State after the first decoded frame: the configured rotate type if
    /// any, otherwise whatever orientation the frame has.
    pub fn from_first_frame(configured: Option<RotateType>, width: u32, height: u32) -> Self {
        let remote = Resolution::new(width, height);
        let rotate_type = configured.unwrap_or(if remote.is_landscape() {
            RotateType::Landscape
        } else {
            RotateType::Portrait
        });
        Self::new(rotate_type, remote)
    }

    pub fn alignment(&self) -> Alignment {
        match self.rotate_type {
            RotateType::Landscape if self.remote_resolution.is_portrait() => {
                Alignment::PortraitRemoteInLandscape
            }
            RotateType::Portrait if self.remote_resolution.is_landscape() => {
                Alignment::LandscapeRemoteInPortrait
            }
            _ => Alignment::Aligned,
        }
    }

    /// Derived from the alignment; there is no setter.
    pub fn rotation_angle_deg(&self) -> u16 {
        match self.alignment() {
            Alignment::Aligned => 0,
            Alignment::PortraitRemoteInLandscape => 90,
            Alignment::LandscapeRemoteInPortrait => 270,
        }
    }
}

/// Bounding rectangle of the video element in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewportRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ViewportRect {
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// Everything the transform needs about the element: its rect plus its
/// client size (which excludes borders, so it can differ from the rect).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementGeometry {
    pub rect: ViewportRect,
    pub client_width: u32,
    pub client_height: u32,
}

impl ElementGeometry {
    /// Element at the origin whose rect matches its client size.
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            rect: ViewportRect {
                left: 0.0,
                top: 0.0,
                width: width as f64,
                height: height as f64,
            },
            client_width: width,
            client_height: height,
        }
    }
}

/// Source of a fresh layout measurement. Measuring forces layout, so the
/// result is cached in `GeometryCache`.
pub trait Measure {
    fn measure(&self) -> ElementGeometry;
}

#[derive(Debug, Default)]
pub struct GeometryCache {
    cached: Option<ElementGeometry>,
}

impl GeometryCache {
    /// Cached geometry, measuring only when nothing is cached.
    pub fn get_or_measure(&mut self, source: &dyn Measure) -> ElementGeometry {
        *self.cached.get_or_insert_with(|| source.measure())
    }

    /// Measure now and cache the result. Called at every pointer-down.
    pub fn refresh(&mut self, source: &dyn Measure) -> ElementGeometry {
        let geometry = source.measure();
        self.cached = Some(geometry);
        geometry
    }

    /// Resize notification.
    pub fn update(&mut self, geometry: ElementGeometry) {
        self.cached = Some(geometry);
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn cached(&self) -> Option<ElementGeometry> {
        self.cached
    }
}

/// `(widthPixels, heightPixels)` reported to the remote for a container of
/// the given client size.
pub fn surface_dims(state: &RotationState, client_width: u32, client_height: u32) -> (u32, u32) {
    let big = client_width.max(client_height);
    let small = client_width.min(client_height);
    let remote = state.remote_resolution;
    match state.rotate_type {
        RotateType::Landscape if remote.is_portrait() => (small, big),
        RotateType::Landscape => (big, small),
        RotateType::Portrait if remote.is_landscape() => (big, small),
        RotateType::Portrait => (small, big),
    }
}

/// Map a point given in client coordinates.
pub fn map_client_point(
    state: &RotationState,
    rect: &ViewportRect,
    client_x: f64,
    client_y: f64,
) -> (f64, f64) {
    match state.alignment() {
        Alignment::Aligned => (client_x - rect.left, client_y - rect.top),
        Alignment::PortraitRemoteInLandscape => (rect.bottom() - client_y, client_x - rect.left),
        Alignment::LandscapeRemoteInPortrait => (client_y - rect.top, rect.right() - client_x),
    }
}

/// Map a point, preferring element-relative offset coordinates when the
/// event carries them. Offsets are already in the element's own frame.
pub fn map_point(
    state: &RotationState,
    rect: &ViewportRect,
    offset: Option<(f64, f64)>,
    client_x: f64,
    client_y: f64,
) -> (f64, f64) {
    match offset {
        Some(point) => point,
        None => map_client_point(state, rect, client_x, client_y),
    }
}

/// Rotate a relative pointer movement the same way positions are rotated.
pub fn rotate_movement(state: &RotationState, dx: f64, dy: f64) -> (f64, f64) {
    match state.alignment() {
        Alignment::Aligned => (dx, dy),
        Alignment::PortraitRemoteInLandscape => (-dy, dx),
        Alignment::LandscapeRemoteInPortrait => (dy, -dx),
    }
}

/// Absolute position synthesized from relative motion while the pointer is
/// locked (no absolute coordinates are available then).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LockedCursor {
    pub x: f64,
    pub y: f64,
}

impl LockedCursor {
    pub fn seed(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    pub fn advance(&mut self, state: &RotationState, dx: f64, dy: f64) -> (f64, f64) {
        let (dx, dy) = rotate_movement(state, dx, dy);
        self.x += dx;
        self.y += dy;
        (self.x, self.y)
    }
}
