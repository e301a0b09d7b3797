//! Gets encoded video chunks out of an RTP receiver.
//!
//! Two strategies:
//! - **tee**: split the receiver's encoded stream. One branch goes back to
//!   the RTC engine untouched, the other feeds our decoder. Both consumers
//!   see every chunk.
//! - **replace**: read the encoded stream ourselves. The engine no longer
//!   gets frames, and if it later asks for the encoded streams itself it
//!   receives `StreamLocked`.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use phonecast_protocol::{EncodedChunk, InterceptStrategy};
use tracing::{debug, info, warn};

/// The readable/writable pair of an RTP receiver's encoded transform.
pub struct EncodedStreams {
    pub readable: Receiver<EncodedChunk>,
    pub writable: Sender<EncodedChunk>,
}

/// An RTP receiver that can expose its encoded frames.
pub trait EncodedReceiver {
    /// Succeeds once per receiver; later calls fail with `StreamLocked`.
    fn create_encoded_streams(&mut self) -> Result<EncodedStreams, InterceptError>;
}

#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    #[error("encoded streams already taken for this receiver")]
    StreamLocked,
    #[error("insertable streams are not supported")]
    Unsupported,
    #[error("failed to spawn tee pump: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What the runtime environment offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Encoded insertable streams can be enabled on the peer connection.
    pub insertable_streams: bool,
    /// The receiver's encoded-streams entrypoint can be wrapped, which is
    /// what lets the tee hand a branch back to the engine.
    pub patchable_entrypoint: bool,
    /// A zero-copy track generator exists for rendering.
    pub track_generator: bool,
    /// An application video decoder exists.
    pub video_decoder: bool,
}

/// Chunks for our decoder, plus the engine's branch when teeing.
pub struct FrameSource {
    pub strategy: InterceptStrategy,
    pub chunks: Receiver<EncodedChunk>,
    /// Handed back to the RTC engine in place of the receiver's own streams.
    pub engine_streams: Option<EncodedStreams>,
    pump: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// Split off the chunk receiver, keeping the pump handle for shutdown.
    pub fn into_parts(self) -> (Receiver<EncodedChunk>, Option<EncodedStreams>, TeePump) {
        (self.chunks, self.engine_streams, TeePump(self.pump))
    }
}

/// Handle to the tee thread, if any. The thread exits once the source stream
/// ends or both branches are gone.
pub struct TeePump(Option<JoinHandle<()>>);

impl TeePump {
    pub fn is_finished(&self) -> bool {
        self.0.as_ref().is_none_or(|handle| handle.is_finished())
    }

    pub fn join(self) {
        if let Some(handle) = self.0
            && handle.join().is_err()
        {
            warn!("Tee pump thread panicked");
        }
    }
}

pub trait FrameInterceptor {
    fn strategy(&self) -> InterceptStrategy;
    fn attach(&self, receiver: &mut dyn EncodedReceiver) -> Result<FrameSource, InterceptError>;
}

/// Exclusive reader. The engine's branch is dropped, so the native element
/// renders nothing.
pub struct ReplaceInterceptor;

impl FrameInterceptor for ReplaceInterceptor {
    fn strategy(&self) -> InterceptStrategy {
        InterceptStrategy::Replace
    }

    fn attach(&self, receiver: &mut dyn EncodedReceiver) -> Result<FrameSource, InterceptError> {
        let streams = receiver.create_encoded_streams()?;
        info!("Encoded stream attached (replace)");
        Ok(FrameSource {
            strategy: InterceptStrategy::Replace,
            chunks: streams.readable,
            engine_streams: None,
            pump: None,
        })
    }
}

pub struct TeeInterceptor;

impl FrameInterceptor for TeeInterceptor {
    fn strategy(&self) -> InterceptStrategy {
        InterceptStrategy::Tee
    }

    fn attach(&self, receiver: &mut dyn EncodedReceiver) -> Result<FrameSource, InterceptError> {
        let EncodedStreams { readable, writable } = receiver.create_encoded_streams()?;
        let (engine_tx, engine_rx) = mpsc::channel();
        let (decoder_tx, decoder_rx) = mpsc::channel();

        let pump = std::thread::Builder::new()
            .name("encoded-tee".to_string())
            .spawn(move || run_tee(readable, engine_tx, decoder_tx))?;

        info!("Encoded stream attached (tee)");
        Ok(FrameSource {
            strategy: InterceptStrategy::Tee,
            chunks: decoder_rx,
            engine_streams: Some(EncodedStreams {
                readable: engine_rx,
                writable,
            }),
            pump: Some(pump),
        })
    }
}

fn run_tee(
    source: Receiver<EncodedChunk>,
    engine: Sender<EncodedChunk>,
    decoder: Sender<EncodedChunk>,
) {
    let mut engine_open = true;
    let mut decoder_open = true;
    let mut forwarded: u64 = 0;
    for chunk in source.iter() {
        // Clones share the payload buffer.
        if engine_open && engine.send(chunk.clone()).is_err() {
            debug!("Engine branch closed");
            engine_open = false;
        }
        if decoder_open && decoder.send(chunk).is_err() {
            debug!("Decoder branch closed");
            decoder_open = false;
        }
        if !engine_open && !decoder_open {
            break;
        }
        forwarded += 1;
    }
    debug!(forwarded, "Tee pump finished");
}

/// Pick a strategy for the given environment.
///
/// `Auto` prefers tee and falls back to replace when the entrypoint cannot
/// be wrapped. A forced tee that cannot be honoured also falls back, with a
/// warning.
pub fn select_interceptor(
    caps: &Capabilities,
    requested: InterceptStrategy,
) -> Result<Box<dyn FrameInterceptor>, InterceptError> {
    if !caps.insertable_streams {
        return Err(InterceptError::Unsupported);
    }
    let interceptor: Box<dyn FrameInterceptor> = match requested {
        InterceptStrategy::Replace => Box::new(ReplaceInterceptor),
        InterceptStrategy::Auto | InterceptStrategy::Tee if caps.patchable_entrypoint => {
            Box::new(TeeInterceptor)
        }
        InterceptStrategy::Tee => {
            warn!("Tee requested but receiver entrypoint is not patchable, using replace");
            Box::new(ReplaceInterceptor)
        }
        InterceptStrategy::Auto => Box::new(ReplaceInterceptor),
    };
    Ok(interceptor)
}
