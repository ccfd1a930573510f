//! Command-line parsing.

use std::path::PathBuf;

use anyhow::{Context, bail};
use imgrot_transform::Angle;

pub const USAGE: &str = "\
usage:
  imgrot local  <input_dir> <output_dir> <workers> <angle> [--config FILE]
  imgrot serve  [--config FILE]
  imgrot client <input_dir> <output_dir> <angle> [--config FILE]

<angle> is 180 or 270.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Rotate a directory with an in-process worker pool.
    Local {
        input_dir: PathBuf,
        output_dir: PathBuf,
        workers: usize,
        angle: Angle,
    },
    /// Run the rotation server.
    Serve,
    /// Send a directory to a rotation server.
    Client {
        input_dir: PathBuf,
        output_dir: PathBuf,
        angle: Angle,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub command: Command,
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Parses arguments, excluding the program name.
    pub fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut positional = Vec::new();
        let mut config = None;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().context("--config needs a file argument")?;
                    config = Some(PathBuf::from(path));
                }
                flag if flag.starts_with("--") => bail!("unknown option {flag}"),
                _ => positional.push(arg),
            }
        }

        let Some((mode, rest)) = positional.split_first() else {
            bail!("missing mode");
        };

        let command = match (mode.as_str(), rest) {
            ("local", [input, output, workers, angle]) => Command::Local {
                input_dir: input.into(),
                output_dir: output.into(),
                workers: parse_workers(workers)?,
                angle: parse_angle(angle)?,
            },
            ("serve", []) => Command::Serve,
            ("client", [input, output, angle]) => Command::Client {
                input_dir: input.into(),
                output_dir: output.into(),
                angle: parse_angle(angle)?,
            },
            ("local" | "serve" | "client", _) => bail!("wrong number of arguments for {mode}"),
            _ => bail!("unknown mode {mode}"),
        };

        Ok(Self { command, config })
    }
}

fn parse_workers(arg: &str) -> anyhow::Result<usize> {
    let workers: usize = arg
        .parse()
        .with_context(|| format!("invalid worker count {arg:?}"))?;
    if workers == 0 {
        bail!("worker count must be at least 1");
    }
    Ok(workers)
}

fn parse_angle(arg: &str) -> anyhow::Result<Angle> {
    Ok(arg.parse::<Angle>()?)
}
