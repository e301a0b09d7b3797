//! Discrete quality levels driven by decoder back-pressure.
//!
//! Level 0 is the best profile. `Stress` from the decode worker steps one
//! level worse, `Idle` steps one level better. Changes are spaced at least
//! `min_adjust_interval_ms` apart so the remote encoder can settle; a
//! refused or no-op signal leaves the window where it was.

use std::time::{Duration, Instant};

use phonecast_protocol::{BitrateModel, QualityConfig, RemoteVideoStats, StreamDefinition};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureSignal {
    Stress,
    Idle,
}

/// What to push to the remote after a level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityDirective {
    pub level: usize,
    pub definition: StreamDefinition,
    pub bitrate_model: BitrateModel,
}

pub struct QualityController {
    enabled: bool,
    levels: Vec<StreamDefinition>,
    level: usize,
    min_interval: Duration,
    last_adjustment: Option<Instant>,
    stress_model: BitrateModel,
    idle_model: BitrateModel,
}

impl QualityController {
    pub fn from_config(config: &QualityConfig) -> Self {
        let worst = config.levels.len().saturating_sub(1);
        Self {
            enabled: config.enabled,
            levels: config.levels.clone(),
            level: config.initial_level.min(worst),
            min_interval: Duration::from_millis(config.min_adjust_interval_ms),
            last_adjustment: None,
            stress_model: BitrateModel(config.stress_opcode),
            idle_model: BitrateModel(config.idle_opcode),
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn current(&self) -> Option<StreamDefinition> {
        self.levels.get(self.level).copied()
    }

    /// Feed one worker signal. Returns the directive to apply when the level
    /// actually changed.
    pub fn on_signal(&mut self, signal: PressureSignal, now: Instant) -> Option<QualityDirective> {
        if !self.enabled || self.levels.is_empty() {
            return None;
        }
        if let Some(last) = self.last_adjustment
            && now.saturating_duration_since(last) < self.min_interval
        {
            debug!(?signal, level = self.level, "Quality change rate limited");
            return None;
        }

        let worst = self.levels.len() - 1;
        let (next, model) = match signal {
            PressureSignal::Stress if self.level < worst => (self.level + 1, self.stress_model),
            PressureSignal::Idle if self.level > 0 => (self.level - 1, self.idle_model),
            _ => return None,
        };

        let previous = self.level;
        self.level = next;
        self.last_adjustment = Some(now);
        let definition = self.levels[next];
        match signal {
            PressureSignal::Stress => warn!(
                old = previous,
                new = next,
                definition_id = definition.definition_id,
                "Decoder under pressure, lowering quality"
            ),
            PressureSignal::Idle => info!(
                old = previous,
                new = next,
                definition_id = definition.definition_id,
                "Decoder idle, raising quality"
            ),
        }
        Some(QualityDirective {
            level: next,
            definition,
            bitrate_model: model,
        })
    }
}

/// Requests a keyframe whenever the subscribed stream reports loss.
#[derive(Debug, Default)]
pub struct LossMonitor {
    requests: u64,
}

impl LossMonitor {
    /// Returns `true` when a keyframe should be requested.
    pub fn observe(&mut self, stats: &RemoteVideoStats) -> bool {
        if stats.packets_lost == 0 {
            return false;
        }
        self.requests += 1;
        debug!(
            packets_lost = stats.packets_lost,
            requests = self.requests,
            "Packet loss on remote video, requesting keyframe"
        );
        true
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }
}
