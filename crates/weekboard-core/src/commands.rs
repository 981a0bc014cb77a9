use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, instrument, warn};

use crate::api::{BoardApi, MondayClient};
use crate::categorize::Bucket;
use crate::cli::Invocation;
use crate::config::Config;
use crate::dashboard::{Applied, DashboardState, FETCH_ERROR_MESSAGE};
use crate::datetime::{DateRange, compute_date_range, parse_reference_instant, resolve_timezone};
use crate::loader::{self, BoardLoader, FetchPolicy};
use crate::render::Renderer;

pub fn known_command_names() -> Vec<&'static str> {
    vec!["boards", "owners", "tasks", "range", "watch", "help", "version"]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Flags that shape what gets shown, independent of the command.
#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
    pub token: Option<String>,
    pub now: Option<String>,
    pub open: Vec<Bucket>,
    pub subitems: bool,
}

/// Everything a command needs to talk to the platform and print.
pub struct Session {
    pub api: Arc<dyn BoardApi>,
    pub policy: FetchPolicy,
    pub zone: Tz,
    pub renderer: Renderer,
    pub reference: Option<DateTime<Utc>>,
    pub open: Vec<Bucket>,
    pub subitems: bool,
}

impl Session {
    /// Range for one render pass. A fixed reference instant pins it,
    /// otherwise it follows the wall clock.
    pub fn range(&self) -> DateRange {
        self.reference
            .map_or_else(DateRange::current, compute_date_range)
    }
}

#[instrument(skip(cfg, renderer, inv, view))]
pub fn dispatch(
    cfg: &Config,
    renderer: Renderer,
    inv: Invocation,
    view: ViewOptions,
) -> anyhow::Result<()> {
    let zone = resolve_timezone(cfg.get("time.zone").as_deref());
    let reference = view
        .now
        .as_deref()
        .map(|raw| parse_reference_instant(raw, &zone))
        .transpose()?;
    let command = inv.command.as_str();

    debug!(command, args = ?inv.command_args, "dispatching command");

    match command {
        "range" => {
            let range = reference.map_or_else(DateRange::current, compute_date_range);
            renderer.write_range(io::stdout().lock(), &range, &zone)
        }
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "boards" | "owners" | "tasks" | "watch" => {
            let session = Session {
                api: connect(cfg, view.token.as_deref())?,
                policy: FetchPolicy::from_config(cfg)?,
                zone,
                renderer,
                reference,
                open: view.open,
                subitems: view.subitems,
            };
            let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
            runtime.block_on(run_network_command(&session, command, &inv.command_args))
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn connect(cfg: &Config, token_override: Option<&str>) -> anyhow::Result<Arc<dyn BoardApi>> {
    let mut cfg = cfg.clone();
    if let Some(token) = token_override {
        cfg.apply_overrides([("api.token".to_string(), token.to_string())]);
    }
    let settings = cfg.client_settings()?;
    let client = MondayClient::new(&settings).context("failed to build platform client")?;
    info!(api_url = %settings.api_url, api_version = %settings.api_version, "platform client ready");
    Ok(Arc::new(client))
}

async fn run_network_command(session: &Session, command: &str, args: &[String]) -> anyhow::Result<()> {
    match command {
        "boards" => cmd_boards(session, io::stdout().lock()).await,
        "owners" => cmd_owners(session, args, io::stdout().lock()).await,
        "tasks" => cmd_tasks(session, args, io::stdout().lock()).await,
        "watch" => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            run_watch(session, stdin, io::stdout()).await
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn board_arg(args: &[String], command: &str) -> anyhow::Result<String> {
    args.first()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("{command} requires a board id"))
}

#[instrument(skip(session, out))]
pub async fn cmd_boards<W: Write>(session: &Session, mut out: W) -> anyhow::Result<()> {
    info!("command boards");
    let boards = loader::load_boards(session.api.as_ref(), &session.policy)
        .await
        .map_err(|err| {
            warn!(error = %err, "failed to fetch boards");
            anyhow!(FETCH_ERROR_MESSAGE)
        })?;
    session.renderer.write_boards(&mut out, &boards)
}

#[instrument(skip(session, args, out))]
pub async fn cmd_owners<W: Write>(session: &Session, args: &[String], mut out: W) -> anyhow::Result<()> {
    info!("command owners");
    let board_id = board_arg(args, "owners")?;
    let owners = loader::load_owners(session.api.as_ref(), &session.policy, &board_id)
        .await
        .map_err(|err| {
            warn!(board_id = %board_id, error = %err, "failed to fetch owners");
            anyhow!(FETCH_ERROR_MESSAGE)
        })?;
    session.renderer.write_owners(&mut out, &owners)
}

#[instrument(skip(session, args, out))]
pub async fn cmd_tasks<W: Write>(session: &Session, args: &[String], mut out: W) -> anyhow::Result<()> {
    info!("command tasks");
    let board_id = board_arg(args, "tasks")?;

    let mut state = DashboardState::new(session.open.iter().copied(), session.subitems);
    state.begin_selection(&board_id, 1);
    let data = loader::load_board(session.api.as_ref(), &session.policy, &board_id)
        .await
        .map_err(|err| {
            warn!(board_id = %board_id, error = %err, "failed to load board");
            anyhow!(FETCH_ERROR_MESSAGE)
        })?;
    state.apply(loader::LoadEvent {
        generation: 1,
        board_id,
        outcome: Ok(data),
    });

    let range = session.range();
    session.renderer.write_dashboard(&mut out, &mut state, &range, &session.zone)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCommand {
    Select(String),
    Open(Vec<Bucket>),
    Close(Vec<Bucket>),
    Toggle(Bucket),
    Subitems(bool),
    Refresh,
    Boards,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_watch_command(line: &str) -> Option<WatchCommand> {
    let mut words = line.split_whitespace();
    let head = words.next()?;
    let rest: Vec<&str> = words.collect();

    let buckets = |rest: &[&str]| -> Option<Vec<Bucket>> {
        if rest.len() == 1 && rest[0].eq_ignore_ascii_case("all") {
            return Some(Bucket::ALL.to_vec());
        }
        rest.iter()
            .map(|word| word.trim_matches(',').parse::<Bucket>().ok())
            .collect::<Option<Vec<_>>>()
            .filter(|list| !list.is_empty())
    };

    let cmd = match head.to_ascii_lowercase().as_str() {
        "q" | "quit" | "exit" => WatchCommand::Quit,
        "r" | "refresh" => WatchCommand::Refresh,
        "b" | "boards" => WatchCommand::Boards,
        "h" | "help" | "?" => WatchCommand::Help,
        "open" => buckets(rest.as_slice()).map_or_else(|| WatchCommand::Unknown(line.trim().to_string()), WatchCommand::Open),
        "close" => buckets(rest.as_slice()).map_or_else(|| WatchCommand::Unknown(line.trim().to_string()), WatchCommand::Close),
        "toggle" | "t" => match rest.as_slice() {
            [one] => one
                .parse::<Bucket>()
                .map_or_else(|_| WatchCommand::Unknown(line.trim().to_string()), WatchCommand::Toggle),
            _ => WatchCommand::Unknown(line.trim().to_string()),
        },
        "subitems" => match rest.as_slice() {
            ["on"] | [] => WatchCommand::Subitems(true),
            ["off"] => WatchCommand::Subitems(false),
            _ => WatchCommand::Unknown(line.trim().to_string()),
        },
        "select" | "s" if !rest.is_empty() => WatchCommand::Select(rest.join(" ")),
        _ => WatchCommand::Select(line.trim().to_string()),
    };
    Some(cmd)
}

/// Resolves a selection by board id, else by case-insensitive board name.
fn resolve_board(state: &DashboardState, needle: &str) -> Option<String> {
    state
        .boards()
        .iter()
        .find(|b| b.id == needle)
        .or_else(|| state.boards().iter().find(|b| b.name.eq_ignore_ascii_case(needle)))
        .map(|b| b.id.clone())
        .or_else(|| needle.chars().all(|c| c.is_ascii_digit()).then(|| needle.to_string()))
}

fn render_watch<W: Write>(session: &Session, out: &mut W, state: &mut DashboardState) -> anyhow::Result<()> {
    let range = session.range();
    writeln!(out)?;
    session.renderer.write_dashboard(&mut *out, state, &range, &session.zone)?;
    out.flush()?;
    Ok(())
}

const WATCH_HELP: &str = "\
commands:
  <board id|name>        select a board
  open <bucket..|all>    expand panels (past, current, upcoming, undated)
  close <bucket..|all>   collapse panels
  toggle <bucket>        flip one panel
  subitems [on|off]      show subitems under their parent
  refresh                reload the selected board
  boards                 reload and list boards
  quit";

/// Interactive dashboard. Reads commands line by line; a newer selection
/// supersedes a load still in flight. At end of input it waits for the
/// current load before returning.
#[instrument(skip_all)]
pub async fn run_watch<R, W>(session: &Session, input: R, mut out: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    info!("command watch");
    let (mut board_loader, mut events) = BoardLoader::new(Arc::clone(&session.api), session.policy);
    let mut state = DashboardState::new(session.open.iter().copied(), session.subitems);

    state.set_boards(loader::load_boards(board_loader.api(), board_loader.policy()).await);
    if let Some(message) = state.boards_error() {
        writeln!(out, "{message}")?;
    } else {
        session.renderer.write_boards(&mut out, state.boards())?;
    }
    writeln!(out, "Select a board (id or name), 'help' for commands.")?;
    out.flush()?;

    let mut lines = input.lines();
    let mut input_open = true;

    loop {
        if !input_open && !state.is_loading() {
            break;
        }

        tokio::select! {
            line = lines.next_line(), if input_open => {
                let Some(line) = line.context("failed reading input")? else {
                    debug!("input closed");
                    input_open = false;
                    continue;
                };
                let Some(cmd) = parse_watch_command(&line) else {
                    continue;
                };
                debug!(?cmd, "watch command");

                match cmd {
                    WatchCommand::Quit => break,
                    WatchCommand::Help => {
                        writeln!(out, "{WATCH_HELP}")?;
                    }
                    WatchCommand::Boards => {
                        state.set_boards(loader::load_boards(board_loader.api(), board_loader.policy()).await);
                        match state.boards_error() {
                            Some(message) => writeln!(out, "{message}")?,
                            None => session.renderer.write_boards(&mut out, state.boards())?,
                        }
                    }
                    WatchCommand::Refresh => {
                        if let Some(id) = state.selected().map(str::to_string) {
                            let generation = board_loader.select(&id);
                            state.begin_selection(&id, generation);
                        } else {
                            writeln!(out, "No board selected.")?;
                        }
                    }
                    WatchCommand::Select(needle) => match resolve_board(&state, &needle) {
                        Some(id) => {
                            let generation = board_loader.select(&id);
                            state.begin_selection(&id, generation);
                            render_watch(session, &mut out, &mut state)?;
                        }
                        None => writeln!(out, "Unknown board or command: {needle}")?,
                    },
                    WatchCommand::Open(buckets) => {
                        buckets.into_iter().for_each(|b| state.set_open(b, true));
                        render_watch(session, &mut out, &mut state)?;
                    }
                    WatchCommand::Close(buckets) => {
                        buckets.into_iter().for_each(|b| state.set_open(b, false));
                        render_watch(session, &mut out, &mut state)?;
                    }
                    WatchCommand::Toggle(bucket) => {
                        state.toggle(bucket);
                        render_watch(session, &mut out, &mut state)?;
                    }
                    WatchCommand::Subitems(show) => {
                        state.set_show_subitems(show);
                        render_watch(session, &mut out, &mut state)?;
                    }
                    WatchCommand::Unknown(text) => {
                        writeln!(out, "Unknown command: {text}")?;
                    }
                }
                out.flush()?;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                if state.apply(event) == Applied::Updated {
                    render_watch(session, &mut out, &mut state)?;
                }
            }
        }
    }

    board_loader.cancel();
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(
        out,
        "usage: weekboard [flags] <command> [args]

commands:
  boards            list boards
  owners <board>    list owners of a board
  tasks <board>     show the board's tasks bucketed by deadline week
  range             print the week window around --now
  watch             interactive board picker
  version           print version

flags:
  --open <buckets>  expand panels: past,current,upcoming,undated or all
  --subitems        show subitems under their parent
  --now <instant>   reference instant (RFC 3339 or YYYY-MM-DD[ HH:MM])
  --token <token>   platform API token
  --rc KEY=VALUE    override a config key
  -v / -q           more / less logging"
    )?;
    Ok(())
}
