use serde_json::json;
use weekboard_core::api::{ApiError, BoardApi, ClientSettings, MondayClient};
use weekboard_core::loader::{FetchPolicy, load_boards, load_tasks};
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> MondayClient {
    let mut settings = ClientSettings::new("secret-token");
    settings.api_url = server.uri();
    MondayClient::new(&settings).expect("client")
}

#[tokio::test]
async fn lists_boards_with_auth_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "secret-token"))
        .and(header("api-version", "2024-10"))
        .and(body_partial_json(json!({ "variables": { "limit": 100, "page": 1 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "boards": [
                    { "id": "11", "name": "Roadmap" },
                    { "id": "12", "name": "Hiring" }
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let boards = client_for(&server).boards_page(1).await.expect("boards");
    assert_eq!(boards.len(), 2);
    assert_eq!(boards[0].id, "11");
    assert_eq!(boards[1].name, "Hiring");
}

#[tokio::test]
async fn reads_tasks_with_nested_column_titles() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "ids": ["11"] } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "boards": [{
                    "items_page": {
                        "cursor": null,
                        "items": [
                            {
                                "id": "100",
                                "name": "Ship v2",
                                "column_values": [
                                    { "text": "Working on it", "value": "{\"index\":0}", "column": { "title": "Status" } },
                                    { "text": "2024-06-10", "value": "{\"date\":\"2024-06-10\"}", "column": { "title": "Deadline" } }
                                ],
                                "subitems": [
                                    {
                                        "id": "101",
                                        "name": "Write notes",
                                        "column_values": [
                                            { "text": "", "value": null, "column": { "title": "Deadline" } }
                                        ]
                                    }
                                ]
                            },
                            {
                                "id": "200",
                                "name": "Backlog grooming",
                                "column_values": null,
                                "subitems": null
                            }
                        ]
                    }
                }]
            }
        })))
        .mount(&server)
        .await;

    let page = client_for(&server)
        .tasks_page("11", None)
        .await
        .expect("tasks");
    assert_eq!(page.cursor, None);
    let tasks = page.tasks;
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].deadline_text(), Some("2024-06-10"));
    assert_eq!(tasks[0].subitems[0].name, "Write notes");
    assert_eq!(
        tasks[0]
            .column("Deadline")
            .and_then(|c| c.structured_value())
            .and_then(|v| v.get("date").cloned()),
        Some(json!("2024-06-10"))
    );
    assert!(tasks[1].column_values.is_empty());
    assert_eq!(tasks[1].deadline_text(), None);
}

#[tokio::test]
async fn owners_of_unknown_board_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "boards": [] } })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .board_owners("404")
        .await
        .expect_err("missing board");
    assert!(matches!(err, ApiError::BoardNotFound(id) if id == "404"));
}

#[tokio::test]
async fn graphql_errors_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{ "message": "Not Authenticated" }]
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).boards_page(1).await.expect_err("errors");
    assert!(!err.is_transient());
    match err {
        ApiError::GraphQl(messages) => assert_eq!(messages, ["Not Authenticated"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn server_error_is_retried_by_policy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "page": 1 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "boards": [{ "id": "7", "name": "Ops" }] }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "page": 2 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "boards": [] } })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let boards = load_boards(&client, &FetchPolicy::default())
        .await
        .expect("second attempt succeeds");
    assert_eq!(boards[0].name, "Ops");

    let without_retry = FetchPolicy {
        retries: 0,
        ..FetchPolicy::default()
    };
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let err = load_boards(&client_for(&server), &without_retry)
        .await
        .expect_err("500 without retry");
    assert!(matches!(err, ApiError::Status { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn follows_item_cursor_across_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "ids": ["9"] } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "boards": [{
                    "items_page": {
                        "cursor": "MORE",
                        "items": [{ "id": "1", "name": "First page", "column_values": [] }]
                    }
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "cursor": "MORE", "limit": 500 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "next_items_page": {
                    "cursor": null,
                    "items": [{ "id": "2", "name": "Second page", "column_values": [] }]
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tasks = load_tasks(&client_for(&server), &FetchPolicy::default(), "9")
        .await
        .expect("all pages");
    let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["First page", "Second page"]);
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(2));
}

#[tokio::test]
async fn lists_boards_across_pages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "page": 1 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "boards": [{ "id": "1", "name": "Roadmap" }, { "id": "2", "name": "Hiring" }] }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "page": 2 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "boards": [{ "id": "3", "name": "Support" }] }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "page": 3 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "boards": [] } })))
        .expect(1)
        .mount(&server)
        .await;

    let boards = load_boards(&client_for(&server), &FetchPolicy::default())
        .await
        .expect("boards");
    assert_eq!(boards.len(), 3);
    assert_eq!(boards[2].name, "Support");
}
