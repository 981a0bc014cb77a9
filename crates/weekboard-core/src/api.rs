//! GraphQL client for the monday.com platform API.
//!
//! The rest of the crate only sees the [`BoardApi`] capability, so a stub
//! implementation can stand in for the network in tests.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::task::{Board, Owner, Task};

pub const DEFAULT_API_URL: &str = "https://api.monday.com/v2";
pub const DEFAULT_API_VERSION: &str = "2024-10";
pub const DEFAULT_BOARD_LIMIT: u32 = 100;
const ITEMS_PAGE_LIMIT: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("platform returned status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("GraphQL errors: {}", .0.join(", "))]
    GraphQl(Vec<String>),

    #[error("response carried no data")]
    MissingData,

    #[error("board {0} not found")]
    BoardNotFound(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// Failures worth one more attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Transport(err) => !err.is_decode() && !err.is_builder(),
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// One page of a board's items and the cursor of the page after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskPage {
    #[serde(default)]
    pub cursor: Option<String>,

    #[serde(default, rename = "items")]
    pub tasks: Vec<Task>,
}

/// Read access to boards, owners and tasks on the platform. Listings are
/// paged; the loader walks the pages.
#[async_trait]
pub trait BoardApi: Send + Sync {
    /// Board listing page, numbered from 1. An empty page is the end.
    async fn boards_page(&self, page: u32) -> Result<Vec<Board>, ApiError>;

    async fn board_owners(&self, board_id: &str) -> Result<Vec<Owner>, ApiError>;

    /// First item page of the board when `cursor` is `None`, otherwise the
    /// page the cursor points at.
    async fn tasks_page(
        &self,
        board_id: &str,
        cursor: Option<&str>,
    ) -> Result<TaskPage, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: String,
    pub api_version: String,
    pub token: String,
    pub board_limit: u32,
}

impl ClientSettings {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            token: token.into(),
            board_limit: DEFAULT_BOARD_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MondayClient {
    client: reqwest::Client,
    api_url: String,
    board_limit: u32,
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a, V: Serialize> {
    query: &'a str,
    variables: V,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<GraphQlErrorEntry>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

#[derive(Debug, Deserialize)]
struct BoardsData<B> {
    boards: Vec<B>,
}

const BOARDS_QUERY: &str = r"
    query ($limit: Int!, $page: Int!) {
        boards(limit: $limit, page: $page) {
            id
            name
        }
    }
";

const OWNERS_QUERY: &str = r"
    query ($ids: [ID!]) {
        boards(ids: $ids) {
            id
            owners {
                id
                name
            }
        }
    }
";

macro_rules! item_fragment {
    () => {
        r"
    fragment ItemFields on Item {
        id
        name
        column_values {
            text
            value
            column { title }
        }
        subitems {
            id
            name
            column_values {
                text
                value
                column { title }
            }
        }
    }
"
    };
}

const TASKS_QUERY: &str = concat!(
    r"
    query ($ids: [ID!], $limit: Int!) {
        boards(ids: $ids) {
            items_page(limit: $limit) {
                cursor
                items { ...ItemFields }
            }
        }
    }
",
    item_fragment!()
);

const NEXT_TASKS_QUERY: &str = concat!(
    r"
    query ($cursor: String!, $limit: Int!) {
        next_items_page(cursor: $cursor, limit: $limit) {
            cursor
            items { ...ItemFields }
        }
    }
",
    item_fragment!()
);

impl MondayClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, ApiError> {
        let token = settings.token.trim();
        if token.is_empty() {
            return Err(ApiError::Config("api token is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(token)
                .map_err(|_| ApiError::Config("api token is not a valid header".to_string()))?,
        );
        headers.insert(
            "api-version",
            HeaderValue::from_str(&settings.api_version)
                .map_err(|_| ApiError::Config("invalid api version".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url: settings.api_url.clone(),
            board_limit: settings.board_limit,
        })
    }

    async fn execute<V: Serialize, R: DeserializeOwned>(
        &self,
        query: &str,
        variables: V,
    ) -> Result<R, ApiError> {
        let request = GraphQlRequest { query, variables };

        let response = self.client.post(&self.api_url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        let gql: GraphQlResponse<R> = response.json().await?;

        if let Some(errors) = gql.errors
            && !errors.is_empty()
        {
            return Err(ApiError::GraphQl(
                errors.into_iter().map(|e| e.message).collect(),
            ));
        }

        gql.data.ok_or(ApiError::MissingData)
    }
}

fn single_board<B>(data: BoardsData<B>, board_id: &str) -> Result<B, ApiError> {
    let mut boards = data.boards;
    if boards.len() != 1 {
        return Err(ApiError::BoardNotFound(board_id.to_string()));
    }
    boards.pop().ok_or_else(|| ApiError::BoardNotFound(board_id.to_string()))
}

#[async_trait]
impl BoardApi for MondayClient {
    #[instrument(skip(self))]
    async fn boards_page(&self, page: u32) -> Result<Vec<Board>, ApiError> {
        #[derive(Serialize)]
        struct Variables {
            limit: u32,
            page: u32,
        }

        let data: BoardsData<Board> = self
            .execute(
                BOARDS_QUERY,
                Variables {
                    limit: self.board_limit,
                    page,
                },
            )
            .await?;
        debug!(count = data.boards.len(), "fetched boards");
        Ok(data.boards)
    }

    #[instrument(skip(self))]
    async fn board_owners(&self, board_id: &str) -> Result<Vec<Owner>, ApiError> {
        #[derive(Serialize)]
        struct Variables<'a> {
            ids: [&'a str; 1],
        }

        #[derive(Deserialize)]
        struct OwnersNode {
            #[serde(default)]
            owners: Vec<Owner>,
        }

        let data: BoardsData<OwnersNode> = self
            .execute(OWNERS_QUERY, Variables { ids: [board_id] })
            .await?;
        let owners = single_board(data, board_id)?.owners;
        debug!(count = owners.len(), "fetched board owners");
        Ok(owners)
    }

    #[instrument(skip(self))]
    async fn tasks_page(
        &self,
        board_id: &str,
        cursor: Option<&str>,
    ) -> Result<TaskPage, ApiError> {
        let page = match cursor {
            None => {
                #[derive(Serialize)]
                struct Variables<'a> {
                    ids: [&'a str; 1],
                    limit: u32,
                }

                #[derive(Deserialize)]
                struct ItemsNode {
                    items_page: TaskPage,
                }

                let data: BoardsData<ItemsNode> = self
                    .execute(
                        TASKS_QUERY,
                        Variables {
                            ids: [board_id],
                            limit: ITEMS_PAGE_LIMIT,
                        },
                    )
                    .await?;
                single_board(data, board_id)?.items_page
            }
            Some(cursor) => {
                #[derive(Serialize)]
                struct Variables<'a> {
                    cursor: &'a str,
                    limit: u32,
                }

                #[derive(Deserialize)]
                struct NextData {
                    next_items_page: TaskPage,
                }

                let data: NextData = self
                    .execute(
                        NEXT_TASKS_QUERY,
                        Variables {
                            cursor,
                            limit: ITEMS_PAGE_LIMIT,
                        },
                    )
                    .await?;
                data.next_items_page
            }
        };
        debug!(
            count = page.tasks.len(),
            more = page.cursor.is_some(),
            "fetched item page"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ApiError::Timeout.is_transient());
        assert!(
            ApiError::Status {
                status: StatusCode::BAD_GATEWAY,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            ApiError::Status {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !ApiError::Status {
                status: StatusCode::UNAUTHORIZED,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!ApiError::GraphQl(vec!["bad".into()]).is_transient());
        assert!(!ApiError::BoardNotFound("1".into()).is_transient());
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = MondayClient::new(&ClientSettings::new("  ")).expect_err("empty token");
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn task_page_reads_cursor_and_items() {
        let page: TaskPage = serde_json::from_value(serde_json::json!({
            "cursor": "MSw5NzI4MDA5MDAsaV9YcmxJb0p1VEdYc1VWeGlxeF9kLDg4MiwzNXw0MTQ1NzU1MTE5",
            "items": [{ "id": "1", "name": "Kickoff" }]
        }))
        .expect("page");
        assert!(page.cursor.is_some());
        assert_eq!(page.tasks[0].name, "Kickoff");

        let last: TaskPage =
            serde_json::from_value(serde_json::json!({ "cursor": null, "items": [] }))
                .expect("last page");
        assert_eq!(last, TaskPage::default());
    }

    #[test]
    fn single_board_requires_exactly_one() {
        let none: BoardsData<u8> = BoardsData { boards: vec![] };
        assert!(matches!(single_board(none, "9"), Err(ApiError::BoardNotFound(id)) if id == "9"));
        let one = BoardsData { boards: vec![7u8] };
        assert_eq!(single_board(one, "9").ok(), Some(7));
    }
}
