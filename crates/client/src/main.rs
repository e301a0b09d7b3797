mod cli;

use std::io::{BufRead, BufReader, Write};

use anyhow::{Context, Result};
use phonecast_client::config::{load_config, report_issues};
use phonecast_client::gesture::{GestureEngine, InputQueue, InputSnapshot};
use phonecast_client::transform::{ElementGeometry, Measure, Resolution, RotateType, RotationState};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing_subscriber::EnvFilter;

/// The replayed element never moves; its geometry comes from `--viewport`.
struct FixedViewport(ElementGeometry);

impl Measure for FixedViewport {
    fn measure(&self) -> ElementGeometry {
        self.0
    }
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only wire messages.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::parse_args()?;

    let mut config = load_config(&args.config)?;
    if let Some(rotate_type) = args.rotate_type {
        config.input.rotate_type = Some(rotate_type);
    }
    if !report_issues(&config) {
        anyhow::bail!("Configuration has errors, see log above");
    }

    let rotate_type = match config.input.rotate_type {
        Some(raw) => RotateType::try_from(raw).context("Invalid rotate type")?,
        None => RotateType::default(),
    };
    let (remote_width, remote_height) = args.remote.unwrap_or((0, 0));
    let rotation = RotationState::new(rotate_type, Resolution::new(remote_width, remote_height));
    let (viewport_width, viewport_height) = args.viewport;

    let mut engine = GestureEngine::new(
        StdRng::seed_from_u64(args.seed),
        Box::new(FixedViewport(ElementGeometry::sized(viewport_width, viewport_height))),
        config.input.disable,
    );

    let file = std::fs::File::open(&args.trace)
        .with_context(|| format!("Failed to open trace: {}", args.trace.display()))?;
    let queue = InputQueue::default();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read trace line {}", index + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let snapshot: InputSnapshot = serde_json::from_str(line)
            .with_context(|| format!("Invalid input snapshot on line {}", index + 1))?;
        queue.push(snapshot);
    }

    tracing::info!(
        events = queue.len(),
        ?rotate_type,
        angle = rotation.rotation_angle_deg(),
        seed = args.seed,
        "Replaying trace"
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut sent = 0usize;
    let mut failure = None;
    queue.drain(|snapshot| {
        if failure.is_some() {
            return;
        }
        let Some(message) = engine.handle(&snapshot, &rotation) else {
            return;
        };
        let written = message
            .to_wire()
            .context("Failed to serialize message")
            .and_then(|wire| writeln!(out, "{wire}").context("Failed to write to stdout"));
        match written {
            Ok(()) => sent += 1,
            Err(e) => failure = Some(e),
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }

    tracing::info!(messages = sent, "Replay finished");
    Ok(())
}
