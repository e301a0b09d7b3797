//! Dedicated decode thread.
//!
//! The worker owns the video decoder outright. Encoded chunks come in over a
//! channel, decoded frames and back-pressure telemetry go out over another,
//! and the session talks to it only through [`WorkerCommand`]s.
//!
//! Back-pressure: when the decoder's queue reaches the stress depth the
//! decoder is reset, `Stress` is reported, and every chunk up to the next
//! keyframe is dropped (a delta frame cannot be decoded without its
//! reference). A long run of polls with an empty queue reports `Idle`.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use phonecast_protocol::{ChunkKind, EncodedChunk, PipelineConfig};
use tracing::{debug, error, info, warn};

use crate::render::DecodedFrame;

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub codec: String,
    pub prefer_hardware: bool,
}

impl DecoderConfig {
    pub fn hardware_acceleration(&self) -> &'static str {
        if self.prefer_hardware {
            "prefer-hardware"
        } else {
            "no-preference"
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("decoder rejected configuration {codec}: {reason}")]
    Configure { codec: String, reason: String },
    #[error("failed to decode chunk at {timestamp_us}us: {reason}")]
    Decode { timestamp_us: u64, reason: String },
    #[error("failed to spawn decode thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Application video decoder, driven from the worker thread only.
pub trait VideoDecoder: Send {
    fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError>;
    fn decode(&mut self, chunk: &EncodedChunk) -> Result<(), DecodeError>;
    /// Chunks accepted but not yet output.
    fn queue_size(&self) -> usize;
    /// Next decoded frame, in presentation order.
    fn take_output(&mut self) -> Option<DecodedFrame>;
    /// Drop all queued work. The decoder must be configured again.
    fn reset(&mut self);
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub decoder: DecoderConfig,
    pub stress_queue_depth: usize,
    pub idle_polls: u32,
    pub poll_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            decoder: DecoderConfig {
                codec: config.codec.clone(),
                prefer_hardware: config.prefer_hardware,
            },
            stress_queue_depth: config.stress_queue_depth,
            idle_polls: config.idle_polls,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

#[derive(Debug)]
pub enum WorkerEvent {
    Frame(DecodedFrame),
    /// Decoder fell behind; a resync was started.
    Stress { queue_depth: usize },
    /// Decoder has been keeping up for a while.
    Idle,
}

pub enum WorkerCommand {
    Shutdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub submitted: u64,
    pub decoded: u64,
    pub dropped_awaiting_key: u64,
    pub skipped_empty: u64,
    pub resyncs: u64,
    pub errors: u64,
    pub stress_events: u64,
    pub idle_events: u64,
}

struct DecodeLoop {
    decoder: Box<dyn VideoDecoder>,
    settings: WorkerSettings,
    events: Sender<WorkerEvent>,
    awaiting_key: bool,
    empty_polls: u32,
    stats: WorkerStats,
}

impl DecodeLoop {
    fn new(
        mut decoder: Box<dyn VideoDecoder>,
        settings: WorkerSettings,
        events: Sender<WorkerEvent>,
    ) -> Result<Self, DecodeError> {
        decoder.configure(&settings.decoder)?;
        Ok(Self {
            decoder,
            settings,
            events,
            // Nothing can be decoded before the first keyframe.
            awaiting_key: true,
            empty_polls: 0,
            stats: WorkerStats::default(),
        })
    }

    fn handle_chunk(&mut self, chunk: EncodedChunk) {
        if chunk.kind == ChunkKind::Empty {
            self.stats.skipped_empty += 1;
            return;
        }
        if let Err(e) = chunk.validate() {
            warn!(error = %e, "Skipping malformed chunk");
            return;
        }

        let depth = self.decoder.queue_size();
        if depth >= self.settings.stress_queue_depth {
            warn!(
                depth,
                threshold = self.settings.stress_queue_depth,
                "Decode queue backed up, resyncing on next keyframe"
            );
            self.resync();
            self.stats.stress_events += 1;
            self.emit(WorkerEvent::Stress { queue_depth: depth });
        }

        if self.awaiting_key {
            if !chunk.is_key() {
                self.stats.dropped_awaiting_key += 1;
                return;
            }
            debug!(timestamp_us = chunk.timestamp_us, "Keyframe received, decoding");
            self.awaiting_key = false;
        }

        match self.decoder.decode(&chunk) {
            Ok(()) => self.stats.submitted += 1,
            Err(e) => {
                warn!(error = %e, "Decode error, resetting decoder");
                self.stats.errors += 1;
                self.resync();
            }
        }
    }

    fn resync(&mut self) {
        self.decoder.reset();
        if let Err(e) = self.decoder.configure(&self.settings.decoder) {
            error!(error = %e, "Decoder reconfigure failed after reset");
        }
        self.awaiting_key = true;
        self.stats.resyncs += 1;
    }

    fn pump_outputs(&mut self) {
        while let Some(frame) = self.decoder.take_output() {
            self.stats.decoded += 1;
            self.emit(WorkerEvent::Frame(frame));
        }
    }

    fn poll_idle(&mut self) {
        if self.decoder.queue_size() > 0 {
            self.empty_polls = 0;
            return;
        }
        self.empty_polls += 1;
        if self.empty_polls > self.settings.idle_polls {
            self.empty_polls = 0;
            self.stats.idle_events += 1;
            self.emit(WorkerEvent::Idle);
        }
    }

    fn emit(&self, event: WorkerEvent) {
        if let Err(mpsc::SendError(event)) = self.events.send(event)
            && let WorkerEvent::Frame(frame) = event
        {
            frame.close();
        }
    }

    fn run(
        mut self,
        chunks: Receiver<EncodedChunk>,
        commands: Receiver<WorkerCommand>,
        shared: Arc<Mutex<WorkerStats>>,
    ) {
        let mut last_log = Instant::now();
        loop {
            match commands.try_recv() {
                Ok(WorkerCommand::Shutdown) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }
            match chunks.recv_timeout(self.settings.poll_interval) {
                Ok(chunk) => self.handle_chunk(chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Encoded stream ended");
                    break;
                }
            }
            self.pump_outputs();
            self.poll_idle();

            if let Ok(mut stats) = shared.lock() {
                *stats = self.stats;
            }
            if last_log.elapsed() >= STATS_LOG_INTERVAL {
                debug!(
                    submitted = self.stats.submitted,
                    decoded = self.stats.decoded,
                    dropped = self.stats.dropped_awaiting_key,
                    resyncs = self.stats.resyncs,
                    errors = self.stats.errors,
                    "Decode worker stats"
                );
                last_log = Instant::now();
            }
        }

        // Nobody will render what is still queued.
        self.decoder.reset();
        while let Some(frame) = self.decoder.take_output() {
            frame.close();
        }
        if let Ok(mut stats) = shared.lock() {
            *stats = self.stats;
        }
        info!(decoded = self.stats.decoded, "Decode worker stopped");
    }
}

/// Handle to the decode thread.
pub struct DecodeWorker {
    commands: Sender<WorkerCommand>,
    events: Receiver<WorkerEvent>,
    stats: Arc<Mutex<WorkerStats>>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    pub fn spawn(
        decoder: Box<dyn VideoDecoder>,
        chunks: Receiver<EncodedChunk>,
        settings: WorkerSettings,
    ) -> Result<Self, DecodeError> {
        let (event_tx, event_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        info!(
            codec = %settings.decoder.codec,
            acceleration = settings.decoder.hardware_acceleration(),
            stress_queue_depth = settings.stress_queue_depth,
            idle_polls = settings.idle_polls,
            "Starting decode worker"
        );
        let decode_loop = DecodeLoop::new(decoder, settings, event_tx)?;
        let shared = stats.clone();
        let handle = std::thread::Builder::new()
            .name("decode-worker".to_string())
            .spawn(move || decode_loop.run(chunks, command_rx, shared))?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            stats,
            handle: Some(handle),
        })
    }

    /// Events produced since the last call, without blocking.
    pub fn try_events(&self) -> mpsc::TryIter<'_, WorkerEvent> {
        self.events.try_iter()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    pub fn stats(&self) -> WorkerStats {
        match self.stats.lock() {
            Ok(stats) => *stats,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Stop the thread and wait for it. Frames still in flight are closed.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if handle.join().is_err() {
            error!("Decode worker panicked");
        }
        for event in self.events.try_iter() {
            if let WorkerEvent::Frame(frame) = event {
                frame.close();
            }
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::render::tests::CloseLedger;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Decoder with a controllable backlog. With `instant` set every chunk
    /// produces a frame right away; otherwise chunks pile up until `flush`.
    pub(crate) struct ScriptedDecoder {
        pub ledger: CloseLedger,
        pub instant: bool,
        pub fail_at: Option<u64>,
        pub resets: Arc<AtomicU32>,
        pub configures: Arc<AtomicU32>,
        pending: VecDeque<EncodedChunk>,
        outputs: VecDeque<DecodedFrame>,
    }

    impl ScriptedDecoder {
        pub fn new(ledger: CloseLedger, instant: bool) -> Self {
            Self {
                ledger,
                instant,
                fail_at: None,
                resets: Arc::new(AtomicU32::new(0)),
                configures: Arc::new(AtomicU32::new(0)),
                pending: VecDeque::new(),
                outputs: VecDeque::new(),
            }
        }

        fn frame_for(&self, chunk: &EncodedChunk) -> DecodedFrame {
            self.ledger.frame(1280, 720, chunk.timestamp_us)
        }
    }

    impl VideoDecoder for ScriptedDecoder {
        fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError> {
            assert_eq!(config.codec, "avc1.42E01F");
            self.configures.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn decode(&mut self, chunk: &EncodedChunk) -> Result<(), DecodeError> {
            if self.fail_at == Some(chunk.timestamp_us) {
                return Err(DecodeError::Decode {
                    timestamp_us: chunk.timestamp_us,
                    reason: "corrupt slice".to_string(),
                });
            }
            if self.instant {
                let frame = self.frame_for(chunk);
                self.outputs.push_back(frame);
            } else {
                self.pending.push_back(chunk.clone());
            }
            Ok(())
        }

        fn queue_size(&self) -> usize {
            self.pending.len()
        }

        fn take_output(&mut self) -> Option<DecodedFrame> {
            self.outputs.pop_front()
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
            self.pending.clear();
            for frame in self.outputs.drain(..) {
                frame.close();
            }
        }
    }

    fn settings(stress: usize, idle: u32) -> WorkerSettings {
        WorkerSettings {
            decoder: DecoderConfig {
                codec: "avc1.42E01F".to_string(),
                prefer_hardware: true,
            },
            stress_queue_depth: stress,
            idle_polls: idle,
            poll_interval: Duration::from_millis(5),
        }
    }

    fn decode_loop(decoder: ScriptedDecoder, stress: usize, idle: u32) -> (DecodeLoop, Receiver<WorkerEvent>) {
        let (tx, rx) = mpsc::channel();
        (
            DecodeLoop::new(Box::new(decoder), settings(stress, idle), tx).unwrap(),
            rx,
        )
    }

    #[test]
    fn deltas_before_first_keyframe_are_dropped() {
        let ledger = CloseLedger::default();
        let (mut lp, events) = decode_loop(ScriptedDecoder::new(ledger.clone(), true), 15, 30);
        lp.handle_chunk(EncodedChunk::delta(1, vec![1]));
        lp.handle_chunk(EncodedChunk::key(2, vec![2]));
        lp.handle_chunk(EncodedChunk::delta(3, vec![3]));
        lp.pump_outputs();
        let timestamps: Vec<u64> = events
            .try_iter()
            .map(|e| match e {
                WorkerEvent::Frame(f) => {
                    let ts = f.timestamp_us();
                    f.close();
                    ts
                }
                other => panic!("expected frame, got {:?}", other),
            })
            .collect();
        assert_eq!(timestamps, vec![2, 3]);
        assert_eq!(lp.stats.dropped_awaiting_key, 1);
        assert_eq!(ledger.closed(), 2);
    }

    #[test]
    fn backlog_triggers_stress_and_keyframe_resync() {
        let ledger = CloseLedger::default();
        let decoder = ScriptedDecoder::new(ledger, false);
        let resets = decoder.resets.clone();
        let configures = decoder.configures.clone();
        let (mut lp, events) = decode_loop(decoder, 3, 30);

        lp.handle_chunk(EncodedChunk::key(0, vec![0]));
        lp.handle_chunk(EncodedChunk::delta(1, vec![1]));
        lp.handle_chunk(EncodedChunk::delta(2, vec![2]));
        // Queue is at 3: this delta trips the resync and is dropped.
        lp.handle_chunk(EncodedChunk::delta(3, vec![3]));
        assert!(matches!(
            events.try_recv(),
            Ok(WorkerEvent::Stress { queue_depth: 3 })
        ));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(configures.load(Ordering::SeqCst), 2);
        assert_eq!(lp.decoder.queue_size(), 0);

        lp.handle_chunk(EncodedChunk::delta(4, vec![4]));
        assert_eq!(lp.decoder.queue_size(), 0);
        lp.handle_chunk(EncodedChunk::key(5, vec![5]));
        assert_eq!(lp.decoder.queue_size(), 1);
        assert_eq!(lp.stats.dropped_awaiting_key, 2);
        assert_eq!(lp.stats.stress_events, 1);
    }

    #[test]
    fn decode_error_resets_and_waits_for_keyframe() {
        let ledger = CloseLedger::default();
        let mut decoder = ScriptedDecoder::new(ledger, true);
        decoder.fail_at = Some(2);
        let resets = decoder.resets.clone();
        let (mut lp, events) = decode_loop(decoder, 15, 30);
        lp.handle_chunk(EncodedChunk::key(1, vec![1]));
        lp.handle_chunk(EncodedChunk::delta(2, vec![2]));
        lp.handle_chunk(EncodedChunk::delta(3, vec![3]));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(lp.stats.errors, 1);
        assert_eq!(lp.stats.dropped_awaiting_key, 1);
        // The frame for ts 1 was discarded by the reset; no stress reported.
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn idle_reported_after_threshold_and_count_restarts() {
        let ledger = CloseLedger::default();
        let (mut lp, events) = decode_loop(ScriptedDecoder::new(ledger, true), 15, 3);
        for _ in 0..3 {
            lp.poll_idle();
        }
        assert!(events.try_recv().is_err());
        lp.poll_idle();
        assert!(matches!(events.try_recv(), Ok(WorkerEvent::Idle)));
        for _ in 0..3 {
            lp.poll_idle();
        }
        assert!(events.try_recv().is_err());
        lp.poll_idle();
        assert!(matches!(events.try_recv(), Ok(WorkerEvent::Idle)));
    }

    #[test]
    fn busy_queue_restarts_idle_count() {
        let ledger = CloseLedger::default();
        let (mut lp, events) = decode_loop(ScriptedDecoder::new(ledger, false), 15, 2);
        lp.poll_idle();
        lp.poll_idle();
        lp.handle_chunk(EncodedChunk::key(1, vec![1]));
        lp.poll_idle();
        assert_eq!(lp.empty_polls, 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn empty_chunks_never_reach_decoder() {
        let ledger = CloseLedger::default();
        let (mut lp, _events) = decode_loop(ScriptedDecoder::new(ledger, false), 15, 30);
        lp.handle_chunk(EncodedChunk::key(0, vec![0]));
        lp.handle_chunk(EncodedChunk::new(ChunkKind::Empty, 1, Vec::new()));
        assert_eq!(lp.decoder.queue_size(), 1);
        assert_eq!(lp.stats.skipped_empty, 1);
    }

    #[test]
    fn threaded_worker_delivers_fifo_and_closes_on_shutdown() {
        let ledger = CloseLedger::default();
        let (chunk_tx, chunk_rx) = mpsc::channel();
        let mut worker = DecodeWorker::spawn(
            Box::new(ScriptedDecoder::new(ledger.clone(), true)),
            chunk_rx,
            settings(15, 1000),
        )
        .unwrap();

        chunk_tx.send(EncodedChunk::key(10, vec![1])).unwrap();
        chunk_tx.send(EncodedChunk::delta(11, vec![2])).unwrap();
        chunk_tx.send(EncodedChunk::delta(12, vec![3])).unwrap();

        let mut received = Vec::new();
        while received.len() < 3 {
            match worker.recv_event_timeout(Duration::from_secs(2)) {
                Some(WorkerEvent::Frame(frame)) => {
                    received.push(frame.timestamp_us());
                    frame.close();
                }
                Some(_) => {}
                None => panic!("worker produced only {:?}", received),
            }
        }
        assert_eq!(received, vec![10, 11, 12]);

        worker.shutdown();
        assert_eq!(worker.stats().decoded, 3);
        assert_eq!(ledger.closed(), 3);
    }
}
