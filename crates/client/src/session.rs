//! One remote-device session: owns every per-session component and routes
//! events between them.
//!
//! The host drives the session from its event loop: it pushes input
//! snapshots, calls [`Session::pump_worker_events`] and [`Session::tick`]
//! periodically, and forwards remote stats as they arrive.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Context;
use phonecast_protocol::{
    BitrateModel, ClientConfig, ControlMessage, DefinitionError, InterceptStrategy, PipelineConfig,
    RemoteVideoStats, StreamDefinition,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::callbacks::SessionCallbacks;
use crate::control::{ControlChannel, MessageChannel};
use crate::gesture::{GestureEngine, InputQueue, InputSnapshot};
use crate::interceptor::{
    Capabilities, EncodedReceiver, EncodedStreams, InterceptError, TeePump, select_interceptor,
};
use crate::p2p::{self, MediaSender, P2pOptimizer, StatsSource};
use crate::pact::{Pact, PactError, Settler};
use crate::quality::{LossMonitor, PressureSignal, QualityController, QualityDirective};
use crate::render::{
    CanvasSurface, DecodedFrame, FrameCallback, FrameDispatch, RenderSink, TrackWriter, sink_callback,
};
use crate::transform::{Measure, RotateType, RotationState};
use crate::worker::{DecodeError, DecodeWorker, VideoDecoder, WorkerEvent, WorkerSettings, WorkerStats};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Intercept(#[from] InterceptError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A running interception pipeline: the decode worker plus whatever the
/// interceptor set up in front of it.
pub struct Pipeline {
    strategy: InterceptStrategy,
    worker: DecodeWorker,
    pump: TeePump,
    engine_streams: Option<EncodedStreams>,
}

impl Pipeline {
    pub fn strategy(&self) -> InterceptStrategy {
        self.strategy
    }

    /// The branch to hand back to the RTC engine (tee only, once).
    pub fn take_engine_streams(&mut self) -> Option<EncodedStreams> {
        self.engine_streams.take()
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.worker.stats()
    }

    fn shutdown(mut self) {
        self.worker.shutdown();
        self.engine_streams = None;
        if self.pump.is_finished() {
            self.pump.join();
        } else {
            // Blocked on the network side; it exits with the next chunk or
            // when the receiver closes.
            debug!("Leaving tee pump to finish with its source");
        }
    }
}

/// Attach to `receiver` and start decoding. Returns `None` when application
/// decoding is switched off or unavailable, in which case the native element
/// keeps rendering on its own.
pub fn build_pipeline(
    config: &PipelineConfig,
    caps: &Capabilities,
    receiver: &mut dyn EncodedReceiver,
    decoder: Box<dyn VideoDecoder>,
) -> Result<Option<Pipeline>, PipelineError> {
    if !config.use_webcodecs {
        info!("Application decoding disabled, using native rendering");
        return Ok(None);
    }
    if !caps.video_decoder {
        warn!("No video decoder available, using native rendering");
        return Ok(None);
    }

    let interceptor = select_interceptor(caps, config.strategy)?;
    let source = interceptor.attach(receiver)?;
    let strategy = source.strategy;
    let (chunks, engine_streams, pump) = source.into_parts();
    let worker = DecodeWorker::spawn(decoder, chunks, WorkerSettings::from_config(config))?;

    info!(?strategy, "Frame pipeline started");
    Ok(Some(Pipeline {
        strategy,
        worker,
        pump,
        engine_streams,
    }))
}

/// Zero-copy track when the environment has a track generator, GPU canvas
/// otherwise.
pub fn choose_sink(
    caps: &Capabilities,
    track: Option<Box<dyn TrackWriter>>,
    canvas: Box<dyn CanvasSurface>,
) -> RenderSink {
    match track {
        Some(writer) if caps.track_generator => RenderSink::Track(writer),
        _ => RenderSink::Canvas(canvas),
    }
}

struct PendingToken {
    id: u64,
    abort: AbortHandle,
    settler: Settler<String>,
}

pub struct Session {
    id: Uuid,
    config: ClientConfig,
    callbacks: Rc<SessionCallbacks>,
    control: ControlChannel,
    input: InputQueue,
    gestures: GestureEngine<StdRng>,
    configured_rotate: Option<RotateType>,
    rotation: RotationState,
    first_frame_seen: bool,
    frames: FrameDispatch,
    quality: QualityController,
    loss: LossMonitor,
    p2p: Rc<RefCell<P2pOptimizer>>,
    connected_once: bool,
    pipeline: Option<Pipeline>,
    /// In-flight token requests. Each entry removes itself when its pact
    /// settles.
    tokens: Rc<RefCell<Vec<PendingToken>>>,
    next_token: u64,
    stopped: bool,
}

impl Session {
    pub fn new(
        config: ClientConfig,
        callbacks: SessionCallbacks,
        channel: Rc<dyn MessageChannel>,
        measure: Box<dyn Measure>,
    ) -> anyhow::Result<Self> {
        let configured_rotate = config
            .input
            .rotate_type
            .map(RotateType::try_from)
            .transpose()
            .context("Invalid input.rotate_type")?;

        let callbacks = Rc::new(callbacks);
        let idle_timeout = match config.session.auto_recovery_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let control = ControlChannel::new(channel, Rc::clone(&callbacks), idle_timeout);
        let gestures = GestureEngine::new(StdRng::from_entropy(), measure, config.input.disable);
        let quality = QualityController::from_config(&config.quality);
        let p2p = Rc::new(RefCell::new(P2pOptimizer::new(
            config.p2p.enabled,
            config.p2p.direct_max_bitrate,
        )));

        let id = Uuid::new_v4();
        info!(
            session_id = %id,
            rotate_type = ?configured_rotate,
            quality_level = quality.level(),
            "Session created"
        );
        Ok(Self {
            id,
            config,
            callbacks,
            control,
            input: InputQueue::default(),
            gestures,
            configured_rotate,
            rotation: RotationState::new(configured_rotate.unwrap_or_default(), Default::default()),
            first_frame_seen: false,
            frames: FrameDispatch::default(),
            quality,
            loss: LossMonitor::default(),
            p2p,
            connected_once: false,
            pipeline: None,
            tokens: Rc::default(),
            next_token: 0,
            stopped: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    // -- connection --

    /// Called once the peer connection is up. Fires `on_connect_success`
    /// and, on the first connection only, checks for a direct ICE path and
    /// lifts the video bitrate cap if one is found.
    pub fn on_connected(
        &mut self,
        stats: &dyn StatsSource,
        senders: Vec<Rc<dyn MediaSender>>,
    ) -> Pact<bool> {
        (self.callbacks.on_connect_success)();
        self.control.touch_idle(Instant::now());
        self.control.request_ui_refresh();
        if self.connected_once {
            return Pact::resolve(self.p2p.borrow().is_direct());
        }
        self.connected_once = true;

        let optimizer = Rc::clone(&self.p2p);
        p2p::detect(&self.p2p, stats).map(move |direct| {
            if direct {
                let refs: Vec<&dyn MediaSender> = senders.iter().map(|s| s.as_ref()).collect();
                optimizer.borrow().optimize(&refs);
            }
            direct
        })
    }

    /// Transient connection or signaling failure.
    pub fn on_connect_failed(&self, error: &anyhow::Error) {
        warn!(session_id = %self.id, error = %error, "Connection attempt failed");
        (self.callbacks.on_connect_fail)(error);
    }

    /// Error text pushed by the remote side.
    pub fn on_remote_error(&self, message: &str) {
        warn!(session_id = %self.id, %message, "Remote reported an error");
        (self.callbacks.on_error_message)(message);
    }

    /// Fetch a signaling token. The request is aborted by [`Session::stop`]
    /// and fails after `session.token_timeout_ms`. Must run inside a tokio
    /// `LocalSet`.
    pub fn request_token<F>(&mut self, request: F) -> Pact<String>
    where
        F: Future<Output = anyhow::Result<String>> + 'static,
    {
        let (pact, settler) = Pact::deferred();
        if self.stopped {
            settler.reject(PactError::msg("session stopped"));
            return pact;
        }

        let timeout = Duration::from_millis(self.config.session.token_timeout_ms);
        let task_settler = settler.clone();
        let handle = tokio::task::spawn_local(async move {
            match tokio::time::timeout(timeout, request).await {
                Ok(Ok(token)) => task_settler.resolve(token),
                Ok(Err(e)) => task_settler.reject(e.context("Token request failed")),
                Err(_) => task_settler.reject(PactError::msg(format!(
                    "token request timed out after {}ms",
                    timeout.as_millis()
                ))),
            }
        });
        let id = self.next_token;
        self.next_token += 1;
        let tokens = Rc::clone(&self.tokens);
        pact.on_settled(move |_| tokens.borrow_mut().retain(|token| token.id != id));

        let mut pending = self.tokens.borrow_mut();
        pending.push(PendingToken {
            id,
            abort: handle.abort_handle(),
            settler,
        });
        debug!(session_id = %self.id, in_flight = pending.len(), "Token request started");
        drop(pending);
        pact
    }

    // -- media --

    /// Take over a started pipeline and route its frames into `sink`.
    pub fn attach_pipeline(&mut self, pipeline: Pipeline, sink: RenderSink) {
        info!(
            session_id = %self.id,
            strategy = ?pipeline.strategy(),
            sink = sink.kind(),
            "Pipeline attached"
        );
        self.frames.set_callback(Some(sink_callback(sink)));
        if let Some(previous) = self.pipeline.replace(pipeline) {
            previous.shutdown();
        }
    }

    pub fn pipeline_mut(&mut self) -> Option<&mut Pipeline> {
        self.pipeline.as_mut()
    }

    /// Replace (or with `None`, clear) the frame consumer. Frames that
    /// arrive without a consumer are closed at once.
    pub fn set_frame_callback(&mut self, callback: Option<FrameCallback>) {
        self.frames.set_callback(callback);
    }

    pub fn frame_dispatch(&self) -> &FrameDispatch {
        &self.frames
    }

    /// Drain whatever the decode worker produced since the last call.
    pub fn pump_worker_events(&mut self, now: Instant) -> usize {
        let events: Vec<WorkerEvent> = match &self.pipeline {
            Some(pipeline) => pipeline.worker.try_events().collect(),
            None => return 0,
        };
        let count = events.len();
        for event in events {
            self.handle_worker_event(event, now);
        }
        count
    }

    pub fn handle_worker_event(&mut self, event: WorkerEvent, now: Instant) {
        match event {
            WorkerEvent::Frame(frame) => self.on_decoded_frame(frame),
            WorkerEvent::Stress { queue_depth } => {
                debug!(queue_depth, "Worker reported stress");
                self.apply_pressure(PressureSignal::Stress, now);
            }
            WorkerEvent::Idle => {
                self.apply_pressure(PressureSignal::Idle, now);
            }
        }
    }

    fn on_decoded_frame(&mut self, frame: DecodedFrame) {
        if !self.first_frame_seen {
            self.first_frame_seen = true;
            let (width, height) = frame.display_size();
            self.rotation = RotationState::from_first_frame(self.configured_rotate, width, height);
            info!(
                session_id = %self.id,
                width,
                height,
                angle = self.rotation.rotation_angle_deg(),
                "First frame rendered"
            );
            (self.callbacks.on_rotation_changed)(&self.rotation);
            (self.callbacks.on_rendered_first_frame)();
        }
        self.frames.deliver(frame);
    }

    /// Run a pressure signal through the quality controller and push the
    /// resulting level to the remote.
    pub fn apply_pressure(&mut self, signal: PressureSignal, now: Instant) -> Option<QualityDirective> {
        let directive = self.quality.on_signal(signal, now)?;
        if let Err(e) = self.control.set_stream_definition(directive.definition) {
            warn!(error = %e, level = directive.level, "Quality level has an invalid definition");
        }
        self.control.change_bitrate_model(directive.bitrate_model);
        Some(directive)
    }

    pub fn quality_level(&self) -> usize {
        self.quality.level()
    }

    /// Stats for the subscribed remote video stream. Any loss asks for a
    /// keyframe.
    pub fn on_remote_stats(&mut self, stats: &RemoteVideoStats) {
        if self.loss.observe(stats) {
            self.control.request_keyframe();
        }
        (self.callbacks.on_run_information)(stats);
    }

    // -- input --

    /// Queue an input snapshot; nothing is sent until [`Session::process_input`].
    pub fn enqueue_input(&self, snapshot: InputSnapshot) {
        self.input.push(snapshot);
    }

    /// Feed queued input to the gesture engine in order and send whatever it
    /// produces. Returns the number of messages sent.
    pub fn process_input(&mut self) -> usize {
        if self.stopped {
            return 0;
        }
        let rotation = self.rotation;
        let mut sent = 0;
        self.input.drain(|snapshot| {
            if let Some(message) = self.gestures.handle(&snapshot, &rotation) {
                self.control.send(&message);
                sent += 1;
            }
        });
        sent
    }

    pub fn set_input_disabled(&mut self, disabled: bool) {
        self.gestures.set_disabled(disabled);
    }

    pub fn rotation(&self) -> RotationState {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: RotationState) {
        if rotation == self.rotation {
            return;
        }
        self.rotation = rotation;
        info!(
            session_id = %self.id,
            rotate_type = ?rotation.rotate_type,
            angle = rotation.rotation_angle_deg(),
            "Rotation changed"
        );
        (self.callbacks.on_rotation_changed)(&self.rotation);
    }

    // -- control passthrough --

    pub fn send(&self, message: &ControlMessage) -> Pact<()> {
        self.control.send(message)
    }

    pub fn send_raw(&self, text: impl Into<String>) -> Pact<()> {
        self.control.send_raw(text)
    }

    pub fn request_keyframe(&self) -> Pact<()> {
        self.control.request_keyframe()
    }

    pub fn set_stream_definition(
        &self,
        definition: StreamDefinition,
    ) -> Result<Pact<()>, DefinitionError> {
        self.control.set_stream_definition(definition)
    }

    /// Inject a raw bitrate model opcode; only the low byte is sent.
    pub fn change_bitrate_model(&self, mode: u32) -> Pact<()> {
        self.control.change_bitrate_model(BitrateModel::from_raw(mode))
    }

    // -- lifecycle --

    /// Check the inactivity deadline. On expiry the session stops and
    /// `on_auto_recovery_time` fires. Returns `true` in that case.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.stopped || !self.control.idle_expired(now) {
            return false;
        }
        warn!(session_id = %self.id, "No user input before the deadline, stopping for recovery");
        self.stop();
        (self.callbacks.on_auto_recovery_time)();
        true
    }

    /// Abort token requests, stop the decode worker, then release the
    /// frame consumer. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        // Taken out first: rejecting runs the entries' own removal handlers.
        let pending = std::mem::take(&mut *self.tokens.borrow_mut());
        let aborted = pending.len();
        for token in pending {
            token.abort.abort();
            token.settler.reject(PactError::msg("session stopped"));
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown();
        }
        self.frames.set_callback(None);
        self.control.disarm_idle();
        self.p2p.borrow_mut().reset();
        info!(session_id = %self.id, aborted_tokens = aborted, "Session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
