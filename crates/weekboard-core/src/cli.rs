use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::categorize::Bucket;
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

/// `all` or a comma separated list of buckets.
#[derive(Debug, Clone)]
pub struct BucketList(pub Vec<Bucket>);

impl std::str::FromStr for BucketList {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self(Bucket::ALL.to_vec()));
        }
        let buckets = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| part.parse::<Bucket>())
            .collect::<anyhow::Result<Vec<Bucket>>>()?;
        Ok(Self(buckets))
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "weekboard",
    version,
    about = "Weekboard: monday.com boards bucketed by deadline week",
    disable_help_subcommand = true,
    arg_required_else_help = false
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rc-file")]
    pub rc_file: Option<PathBuf>,

    /// API token; overrides api.token and MONDAY_API_TOKEN
    #[arg(long = "token", env = "WEEKBOARD_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Reference instant for the week window (default: now)
    #[arg(long = "now")]
    pub now: Option<String>,

    /// Panels to expand: past,current,upcoming,undated or all
    #[arg(
        long = "open",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<BucketList>())
    )]
    pub open: Option<BucketList>,

    /// Show subitems under their parent rows
    #[arg(long = "subitems")]
    pub subitems: bool,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

impl GlobalCli {
    pub fn open_buckets(&self) -> Vec<Bucket> {
        self.open.clone().map(|list| list.0).unwrap_or_default()
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                rest.split_once(':')
                    .map(|(k, v)| (format!("rc.{k}"), v.to_string()))
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub command_args: Vec<String>,
}

impl Invocation {
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let tokens: Vec<String> = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();

        let Some((first, args)) = tokens.split_first() else {
            let cmd = cfg
                .get("default.command")
                .unwrap_or_else(|| "boards".to_string());
            debug!(command = %cmd, "no explicit command, using default");
            return Ok(Self {
                command: cmd,
                command_args: vec![],
            });
        };

        let known = crate::commands::known_command_names();
        if let Some(full) = crate::commands::expand_command_abbrev(first, &known) {
            debug!(token = %first, expanded = %full, "resolved command token");
            return Ok(Self {
                command: full.to_string(),
                command_args: args.to_vec(),
            });
        }

        // A bare board id shows that board's tasks.
        if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
            debug!(token = %first, "numeric token interpreted as board id");
            return Ok(Self {
                command: "tasks".to_string(),
                command_args: tokens.clone(),
            });
        }

        Err(anyhow!("unknown command: {first}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&os(&["weekboard", "rc.color=off", "boards", "rc.time.zone:UTC"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["weekboard", "boards"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.time.zone".to_string(), "UTC".to_string()),
            ]
        );
    }

    #[test]
    fn invocation_expands_abbreviations_and_board_ids() {
        let cfg = Config::defaults();
        let inv = Invocation::parse(&cfg, os(&["ta", "123"])).expect("parse");
        assert_eq!(inv.command, "tasks");
        assert_eq!(inv.command_args, vec!["123".to_string()]);

        let inv = Invocation::parse(&cfg, os(&["4567"])).expect("parse");
        assert_eq!(inv.command, "tasks");
        assert_eq!(inv.command_args, vec!["4567".to_string()]);

        let inv = Invocation::parse(&cfg, vec![]).expect("parse");
        assert_eq!(inv.command, "boards");

        assert!(Invocation::parse(&cfg, os(&["frobnicate"])).is_err());
    }

    #[test]
    fn bucket_list_parses_all_and_lists() {
        let all: BucketList = "all".parse().expect("all");
        assert_eq!(all.0.len(), 4);
        let some: BucketList = "past, upcoming".parse().expect("list");
        assert_eq!(some.0, vec![Bucket::Past, Bucket::Upcoming]);
        assert!("past,later".parse::<BucketList>().is_err());
    }

    #[test]
    fn global_flags_parse() {
        let cli = GlobalCli::parse_from(os(&[
            "weekboard", "-vv", "--open", "current", "--subitems", "tasks", "42",
        ]));
        assert_eq!(cli.verbose, 2);
        assert!(cli.subitems);
        assert_eq!(cli.open_buckets(), vec![Bucket::Current]);
        assert_eq!(cli.rest, os(&["tasks", "42"]));
    }
}
