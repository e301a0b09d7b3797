use std::path::PathBuf;

use anyhow::Context;

pub(crate) const DEFAULT_CONFIG_PATH: &str = "./config/phonecast.toml";
pub(crate) const DEFAULT_VIEWPORT: (u32, u32) = (720, 1280);

pub(crate) struct Args {
    pub config: PathBuf,
    pub trace: PathBuf,
    pub rotate_type: Option<u8>,
    pub remote: Option<(u32, u32)>,
    pub viewport: (u32, u32),
    pub seed: u64,
}

/// Parse `WIDTHxHEIGHT`.
pub(crate) fn parse_size(value: &str) -> anyhow::Result<(u32, u32)> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .with_context(|| format!("Expected WIDTHxHEIGHT, got '{value}'"))?;
    let width = width.trim().parse().context("Invalid width")?;
    let height = height.trim().parse().context("Invalid height")?;
    Ok((width, height))
}

pub(crate) fn parse_args() -> anyhow::Result<Args> {
    parse_from(std::env::args().collect())
}

fn parse_from(args: Vec<String>) -> anyhow::Result<Args> {
    let mut config = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut trace = None;
    let mut rotate_type = None;
    let mut remote = None;
    let mut viewport = DEFAULT_VIEWPORT;
    let mut seed: u64 = 0;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-V" | "--version" => {
                println!("phonecast-replay {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                println!("phonecast-replay - replay recorded input through the gesture engine");
                println!();
                println!("USAGE:");
                println!("    phonecast-replay --trace <PATH> [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    --config <PATH>          Client config TOML [default: {DEFAULT_CONFIG_PATH}]");
                println!("    --trace <PATH>           JSON-lines input trace (required)");
                println!("    --rotate-type <0|1>      Container orientation, overrides config");
                println!("    --remote <WxH>           Remote stream size [default: unknown]");
                println!("    --viewport <WxH>         Video element size [default: 720x1280]");
                println!("    --seed <N>               Touch synthesizer seed [default: 0]");
                println!("    -V, --version            Print version and exit");
                println!("    -h, --help               Print this help and exit");
                std::process::exit(0);
            }
            "--config" | "-c" => {
                i += 1;
                config = PathBuf::from(args.get(i).context("Missing --config value")?);
            }
            "--trace" => {
                i += 1;
                trace = Some(PathBuf::from(args.get(i).context("Missing --trace value")?));
            }
            "--rotate-type" => {
                i += 1;
                rotate_type = Some(
                    args.get(i)
                        .context("Missing --rotate-type value")?
                        .parse()
                        .context("Invalid --rotate-type value")?,
                );
            }
            "--remote" => {
                i += 1;
                remote = Some(
                    parse_size(args.get(i).context("Missing --remote value")?)
                        .context("Invalid --remote value")?,
                );
            }
            "--viewport" => {
                i += 1;
                viewport = parse_size(args.get(i).context("Missing --viewport value")?)
                    .context("Invalid --viewport value")?;
            }
            "--seed" => {
                i += 1;
                seed = args
                    .get(i)
                    .context("Missing --seed value")?
                    .parse()
                    .context("Invalid --seed value")?;
            }
            other => anyhow::bail!("Unknown argument: {other}"),
        }
        i += 1;
    }

    Ok(Args {
        config,
        trace: trace.context("--trace is required")?,
        rotate_type,
        remote,
        viewport,
        seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("phonecast-replay")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn sizes_parse_either_separator() {
        assert_eq!(parse_size("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_size("720X1280").unwrap(), (720, 1280));
        assert!(parse_size("1280").is_err());
        assert!(parse_size("wide x tall").is_err());
    }

    #[test]
    fn full_argument_set() {
        let parsed = parse_from(args(&[
            "--config",
            "client.toml",
            "--trace",
            "input.jsonl",
            "--rotate-type",
            "1",
            "--remote",
            "720x1280",
            "--viewport",
            "1280x720",
            "--seed",
            "42",
        ]))
        .unwrap();
        assert_eq!(parsed.config, PathBuf::from("client.toml"));
        assert_eq!(parsed.trace, PathBuf::from("input.jsonl"));
        assert_eq!(parsed.rotate_type, Some(1));
        assert_eq!(parsed.remote, Some((720, 1280)));
        assert_eq!(parsed.viewport, (1280, 720));
        assert_eq!(parsed.seed, 42);
    }

    #[test]
    fn defaults_and_required_trace() {
        let parsed = parse_from(args(&["--trace", "t.jsonl"])).unwrap();
        assert_eq!(parsed.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(parsed.viewport, DEFAULT_VIEWPORT);
        assert!(parsed.remote.is_none());

        let missing = parse_from(args(&[])).err().unwrap();
        assert!(missing.to_string().contains("--trace is required"));
    }

    #[test]
    fn bad_values_are_reported() {
        let err = parse_from(args(&["--trace", "t", "--seed", "x"])).err().unwrap();
        assert_eq!(err.to_string(), "Invalid --seed value");
        let err = parse_from(args(&["--bogus"])).err().unwrap();
        assert_eq!(err.to_string(), "Unknown argument: --bogus");
        let err = parse_from(args(&["--trace"])).err().unwrap();
        assert_eq!(err.to_string(), "Missing --trace value");
    }
}
