use serde::{Deserialize, Serialize};

use crate::StreamDefinition;

/// Top-level client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub p2p: P2pConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Suppress all local input (view-only session)
    #[serde(default)]
    pub disable: bool,
    /// Container orientation: 0 = portrait, 1 = landscape.
    /// Absent = derived from the first decoded frame.
    pub rotate_type: Option<u8>,
}

/// Frame interception strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptStrategy {
    /// Pick tee when the receiver entrypoint can be wrapped, else replace
    #[default]
    Auto,
    /// Tee the encoded stream; the RTC engine keeps its own branch
    Tee,
    /// Read the encoded stream exclusively (engine loses access)
    Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Decode through the application decoder instead of the native element
    #[serde(default = "default_true")]
    pub use_webcodecs: bool,
    #[serde(default)]
    pub strategy: InterceptStrategy,
    /// Codec string handed to the decoder
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_true")]
    pub prefer_hardware: bool,
    /// Decode queue depth at which the decoder is reset and resynced
    #[serde(default = "default_stress_queue_depth")]
    pub stress_queue_depth: usize,
    /// Consecutive empty-queue polls before reporting the decoder idle
    #[serde(default = "default_idle_polls")]
    pub idle_polls: u32,
    /// Worker poll interval in milliseconds when no chunk arrives
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Enable automatic level stepping
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum time between two level changes, in milliseconds
    #[serde(default = "default_min_adjust_interval_ms")]
    pub min_adjust_interval_ms: u64,
    #[serde(default)]
    pub initial_level: usize,
    /// Level table, best first
    #[serde(default = "default_levels")]
    pub levels: Vec<StreamDefinition>,
    /// Opcode sent when stepping down
    #[serde(default = "default_stress_opcode")]
    pub stress_opcode: u8,
    /// Opcode sent when stepping up
    #[serde(default = "default_idle_opcode")]
    pub idle_opcode: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sender max bitrate once a direct path is found, in bps
    #[serde(default = "default_direct_max_bitrate")]
    pub direct_max_bitrate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Stop the session after this many seconds without input (0 = disabled)
    #[serde(default = "default_auto_recovery_secs")]
    pub auto_recovery_secs: u64,
    /// Token exchange timeout in milliseconds
    #[serde(default = "default_token_timeout_ms")]
    pub token_timeout_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            disable: false,
            rotate_type: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            use_webcodecs: true,
            strategy: InterceptStrategy::Auto,
            codec: default_codec(),
            prefer_hardware: true,
            stress_queue_depth: default_stress_queue_depth(),
            idle_polls: default_idle_polls(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_adjust_interval_ms: default_min_adjust_interval_ms(),
            initial_level: 0,
            levels: default_levels(),
            stress_opcode: default_stress_opcode(),
            idle_opcode: default_idle_opcode(),
        }
    }
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            direct_max_bitrate: default_direct_max_bitrate(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_recovery_secs: default_auto_recovery_secs(),
            token_timeout_ms: default_token_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration, returning a list of issues found.
    ///
    /// Issues are prefixed with "ERROR:" (fatal, session should not start) or
    /// "WARNING:" (advisory, the session can start but the config is likely wrong).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        // --- Rotation ---
        if let Some(rotate_type) = self.input.rotate_type
            && rotate_type > 1
        {
            issues.push(format!(
                "ERROR: input.rotate_type must be 0 (portrait) or 1 (landscape), got {}.",
                rotate_type
            ));
        }

        // --- Decoder back-pressure ---
        if self.pipeline.stress_queue_depth == 0 {
            issues.push(
                "ERROR: pipeline.stress_queue_depth must be >= 1. \
                 A depth of 0 would reset the decoder on every chunk."
                    .to_string(),
            );
        } else if self.pipeline.stress_queue_depth > 120 {
            issues.push(format!(
                "WARNING: pipeline.stress_queue_depth is {} -- at 60fps that is {:.1}s of \
                 queued video before a resync. Typical values: 8-30.",
                self.pipeline.stress_queue_depth,
                self.pipeline.stress_queue_depth as f64 / 60.0
            ));
        }
        if self.pipeline.idle_polls == 0 {
            issues.push("ERROR: pipeline.idle_polls must be >= 1.".to_string());
        }
        if self.pipeline.poll_interval_ms == 0 || self.pipeline.poll_interval_ms > 1000 {
            issues.push(format!(
                "ERROR: pipeline.poll_interval_ms must be between 1 and 1000, got {}.",
                self.pipeline.poll_interval_ms
            ));
        }
        if self.pipeline.codec.trim().is_empty() {
            issues.push("ERROR: pipeline.codec must not be empty.".to_string());
        }

        // --- Quality levels ---
        if self.quality.levels.is_empty() {
            issues.push("ERROR: quality.levels must contain at least one level.".to_string());
        }
        for (index, level) in self.quality.levels.iter().enumerate() {
            if let Err(e) = level.validate() {
                issues.push(format!("ERROR: quality.levels[{}]: {}.", index, e));
            }
        }
        if !self.quality.levels.is_empty() && self.quality.initial_level >= self.quality.levels.len()
        {
            issues.push(format!(
                "ERROR: quality.initial_level {} is out of range (0..={}).",
                self.quality.initial_level,
                self.quality.levels.len() - 1
            ));
        }
        if self.quality.min_adjust_interval_ms < 500 {
            issues.push(format!(
                "WARNING: quality.min_adjust_interval_ms is {}ms -- levels may oscillate. \
                 The remote encoder needs ~2s to settle after a profile change.",
                self.quality.min_adjust_interval_ms
            ));
        }
        if self.quality.stress_opcode == self.quality.idle_opcode {
            issues.push(format!(
                "WARNING: quality.stress_opcode and quality.idle_opcode are both 0x{:02X}; \
                 the remote bitrate model will never change.",
                self.quality.stress_opcode
            ));
        }

        // --- P2P ---
        if self.p2p.enabled && self.p2p.direct_max_bitrate < 100_000 {
            issues.push(format!(
                "ERROR: p2p.direct_max_bitrate must be at least 100000 bps, got {}.",
                self.p2p.direct_max_bitrate
            ));
        }

        // --- Session ---
        if self.session.auto_recovery_secs > 0 && self.session.auto_recovery_secs < 30 {
            issues.push(format!(
                "ERROR: session.auto_recovery_secs must be 0 (disabled) or at least 30 seconds, \
                 got {}.",
                self.session.auto_recovery_secs
            ));
        }
        if self.session.token_timeout_ms == 0 {
            issues.push("ERROR: session.token_timeout_ms must be >= 1.".to_string());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_codec() -> String {
    "avc1.42E01F".to_string() // H.264 Constrained Baseline
}
fn default_stress_queue_depth() -> usize {
    15
}
fn default_idle_polls() -> u32 {
    30
}
fn default_poll_interval_ms() -> u64 {
    16
}
fn default_min_adjust_interval_ms() -> u64 {
    2000
}
fn default_levels() -> Vec<StreamDefinition> {
    vec![
        StreamDefinition::new(15, 4, 7),  // 720p, 60fps, 4Mbps
        StreamDefinition::new(12, 3, 5),  // 540p, 30fps, 3Mbps
        StreamDefinition::new(10, 1, 1),  // 360p, 20fps, 1Mbps
        StreamDefinition::new(8, 8, 14), // 216p, 15fps, 400kbps
    ]
}
fn default_stress_opcode() -> u8 {
    0x05
}
fn default_idle_opcode() -> u8 {
    0x01
}
fn default_direct_max_bitrate() -> u32 {
    8_000_000
}
fn default_auto_recovery_secs() -> u64 {
    300
}
fn default_token_timeout_ms() -> u64 {
    10_000
}
