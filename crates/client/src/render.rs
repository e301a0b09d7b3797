//! Decoded frame ownership and the sinks that consume frames.
//!
//! A decoded frame pins a native (often GPU) buffer. Whoever holds the
//! [`DecodedFrame`] must either close it or hand it to something that will;
//! every path through this module ends in exactly one close.

use std::fmt;

use tracing::{debug, warn};

/// Native buffer behind a decoded frame.
pub trait FrameBuffer: Send {
    fn display_width(&self) -> u32;
    fn display_height(&self) -> u32;
    fn timestamp_us(&self) -> u64;
    /// Release the native buffer. Called exactly once.
    fn close(&mut self);
}

/// Single-owner decoded frame.
pub struct DecodedFrame {
    buffer: Option<Box<dyn FrameBuffer>>,
    width: u32,
    height: u32,
    timestamp_us: u64,
}

impl DecodedFrame {
    pub fn new(buffer: Box<dyn FrameBuffer>) -> Self {
        let width = buffer.display_width();
        let height = buffer.display_height();
        let timestamp_us = buffer.timestamp_us();
        Self {
            buffer: Some(buffer),
            width,
            height,
            timestamp_us,
        }
    }

    pub fn display_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Borrow the native buffer for drawing.
    pub fn buffer(&self) -> Option<&dyn FrameBuffer> {
        self.buffer.as_deref()
    }

    pub fn close(mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            buffer.close();
        }
    }

    /// Transfer the native buffer to a zero-copy consumer, which becomes
    /// responsible for closing it.
    pub fn into_buffer(mut self) -> Option<Box<dyn FrameBuffer>> {
        self.buffer.take()
    }
}

impl Drop for DecodedFrame {
    fn drop(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            warn!(
                timestamp_us = self.timestamp_us,
                "Decoded frame dropped without close"
            );
            buffer.close();
        }
    }
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_us", &self.timestamp_us)
            .field("open", &self.buffer.is_some())
            .finish()
    }
}

/// Zero-copy sink (a generated media track). Takes ownership of each frame.
pub trait TrackWriter {
    fn write(&mut self, frame: DecodedFrame) -> anyhow::Result<()>;
}

/// Drawing surface fallback when no track generator exists.
pub trait CanvasSurface {
    fn size(&self) -> (u32, u32);
    fn resize(&mut self, width: u32, height: u32);
    fn draw(&mut self, frame: &dyn FrameBuffer) -> anyhow::Result<()>;
}

/// Final consumer of decoded frames.
pub enum RenderSink {
    Track(Box<dyn TrackWriter>),
    Canvas(Box<dyn CanvasSurface>),
    Discard,
}

impl RenderSink {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Track(_) => "track",
            Self::Canvas(_) => "canvas",
            Self::Discard => "discard",
        }
    }

    pub fn consume(&mut self, frame: DecodedFrame) {
        match self {
            Self::Track(writer) => {
                if let Err(e) = writer.write(frame) {
                    warn!(error = %e, "Track writer rejected frame");
                }
            }
            Self::Canvas(canvas) => {
                let (width, height) = frame.display_size();
                if canvas.size() != (width, height) {
                    debug!(width, height, "Resizing canvas to frame");
                    canvas.resize(width, height);
                }
                if let Some(buffer) = frame.buffer()
                    && let Err(e) = canvas.draw(buffer)
                {
                    warn!(error = %e, "Canvas draw failed");
                }
                frame.close();
            }
            Self::Discard => frame.close(),
        }
    }
}

pub type FrameCallback = Box<dyn FnMut(DecodedFrame)>;

/// One replaceable, nullable frame consumer.
#[derive(Default)]
pub struct FrameDispatch {
    callback: Option<FrameCallback>,
    delivered: u64,
    closed_unclaimed: u64,
}

impl FrameDispatch {
    pub fn set_callback(&mut self, callback: Option<FrameCallback>) {
        self.callback = callback;
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Route a frame to the callback, or close it when none is set.
    pub fn deliver(&mut self, frame: DecodedFrame) {
        match self.callback.as_mut() {
            Some(callback) => {
                self.delivered += 1;
                callback(frame);
            }
            None => {
                self.closed_unclaimed += 1;
                frame.close();
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn closed_unclaimed(&self) -> u64 {
        self.closed_unclaimed
    }
}

/// Callback that feeds every frame into `sink`.
pub fn sink_callback(mut sink: RenderSink) -> FrameCallback {
    Box::new(move |frame| sink.consume(frame))
}
