//! Fetch sequencing: board list first, then owners and tasks of whichever
//! board is selected. A newer selection supersedes any load still in flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiError, BoardApi};
use crate::config::Config;
use crate::task::{Board, Owner, Task};

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RETRIES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
        }
    }
}

impl FetchPolicy {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let mut policy = Self::default();
        if let Some(raw) = cfg.get("fetch.timeout_secs") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid fetch.timeout_secs {raw:?}: {e}"))?;
            policy.timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(raw) = cfg.get("fetch.retries") {
            policy.retries = raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid fetch.retries {raw:?}: {e}"))?;
        }
        Ok(policy)
    }

    /// Runs `op` under the timeout, retrying transient failures up to
    /// `retries` extra times.
    pub async fn run<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0_u32;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(what, attempt, error = %err, "transient fetch failure; retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardData {
    pub owners: Vec<Owner>,
    pub tasks: Vec<Task>,
}

#[derive(Debug)]
pub struct LoadEvent {
    pub generation: u64,
    pub board_id: String,
    pub outcome: Result<BoardData, ApiError>,
}

/// Every board page in order, each fetched under `policy`.
#[instrument(skip(api, policy))]
pub async fn load_boards(
    api: &dyn BoardApi,
    policy: &FetchPolicy,
) -> Result<Vec<Board>, ApiError> {
    let mut boards = Vec::new();
    let mut page = 1_u32;
    loop {
        let batch = policy.run("boards", || api.boards_page(page)).await?;
        if batch.is_empty() {
            break;
        }
        debug!(page, count = batch.len(), "fetched board page");
        boards.extend(batch);
        page += 1;
    }
    Ok(boards)
}

#[instrument(skip(api, policy))]
pub async fn load_owners(
    api: &dyn BoardApi,
    policy: &FetchPolicy,
    board_id: &str,
) -> Result<Vec<Owner>, ApiError> {
    policy.run("owners", || api.board_owners(board_id)).await
}

/// Every item of the board, following the page cursor until it runs out.
#[instrument(skip(api, policy))]
pub async fn load_tasks(
    api: &dyn BoardApi,
    policy: &FetchPolicy,
    board_id: &str,
) -> Result<Vec<Task>, ApiError> {
    let mut tasks = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let current = cursor.as_deref();
        let page = policy
            .run("tasks", || api.tasks_page(board_id, current))
            .await?;
        tasks.extend(page.tasks);

        match page.cursor.filter(|next| !next.is_empty()) {
            None => break,
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                warn!(cursor = %next, "item cursor did not advance; stopping");
                break;
            }
            Some(next) => cursor = Some(next),
        }
    }
    Ok(tasks)
}

/// Owners and tasks of one board, fetched concurrently. Either failure
/// fails the whole load.
#[instrument(skip(api, policy))]
pub async fn load_board(
    api: &dyn BoardApi,
    policy: &FetchPolicy,
    board_id: &str,
) -> Result<BoardData, ApiError> {
    let (owners, tasks) = tokio::join!(
        load_owners(api, policy, board_id),
        load_tasks(api, policy, board_id),
    );
    let data = BoardData {
        owners: owners?,
        tasks: tasks?,
    };
    debug!(
        owners = data.owners.len(),
        tasks = data.tasks.len(),
        "loaded board"
    );
    Ok(data)
}

/// Spawns board loads and reports them on a channel, tagged with the
/// selection generation that started them.
pub struct BoardLoader {
    api: Arc<dyn BoardApi>,
    policy: FetchPolicy,
    generation: u64,
    inflight: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<LoadEvent>,
}

impl BoardLoader {
    pub fn new(
        api: Arc<dyn BoardApi>,
        policy: FetchPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<LoadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                api,
                policy,
                generation: 0,
                inflight: None,
                tx,
            },
            rx,
        )
    }

    pub fn api(&self) -> &dyn BoardApi {
        self.api.as_ref()
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Starts loading `board_id`, aborting the previous load. Returns the
    /// generation that the resulting event will carry.
    #[instrument(skip(self))]
    pub fn select(&mut self, board_id: &str) -> u64 {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;

        let api = Arc::clone(&self.api);
        let policy = self.policy;
        let tx = self.tx.clone();
        let board_id = board_id.to_string();

        info!(generation, board_id = %board_id, "loading board");
        self.inflight = Some(tokio::spawn(async move {
            let outcome = load_board(api.as_ref(), &policy, &board_id).await;
            if tx
                .send(LoadEvent {
                    generation,
                    board_id,
                    outcome,
                })
                .is_err()
            {
                debug!(generation, "load receiver dropped");
            }
        }));
        generation
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.inflight.take()
            && !handle.is_finished()
        {
            debug!(generation = self.generation, "superseding in-flight load");
            handle.abort();
        }
    }
}

impl Drop for BoardLoader {
    fn drop(&mut self) {
        self.cancel();
    }
}
