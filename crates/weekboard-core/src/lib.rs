pub mod api;
pub mod categorize;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod datetime;
pub mod loader;
pub mod render;
pub mod task;

use std::ffi::OsString;

use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting weekboard CLI"
  );
  debug!(
    count = pre.rc_overrides.len(),
    "preprocessed rc overrides"
  );

  let mut cfg = config::Config::load(
    cli.rc_file.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .iter()
        .map(|kv| {
          (
            kv.key.clone(),
            kv.value.clone()
          )
        })
    )
  );

  let view = commands::ViewOptions {
    open:     cli.open_buckets(),
    token:    cli.token,
    now:      cli.now,
    subitems: cli.subitems
  };

  let renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  commands::dispatch(
    &cfg, renderer, inv, view
  )?;

  info!("done");
  Ok(())
}
