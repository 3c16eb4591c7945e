//! HTTP behaviour of the Notion store against a scripted local server.
//!
//! The server answers each connection with the next canned response and
//! records what the client sent.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use testsync_state::{
    HeaderUpdate, NotionConfig, NotionTestStore, RecordId, RecordPatch, StorageError, TestStore,
};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    body: Value,
}

struct FakeNotion {
    base: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeNotion {
    async fn serve(responses: Vec<(u16, Value)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = requests.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                log.lock().unwrap().push(request);
                write_response(&mut stream, status, &body).await;
            }
        });

        Self { base, requests }
    }

    fn store(&self) -> NotionTestStore {
        NotionTestStore::new(self.config()).unwrap()
    }

    fn config(&self) -> NotionConfig {
        let mut config = NotionConfig::new("secret", "db1").with_api_base(&self.base);
        config.retry_delay = Duration::from_millis(10);
        config
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request(stream: &mut TcpStream) -> Recorded {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed mid-body");
        buf.extend_from_slice(&chunk[..n]);
    }

    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let body = &buf[header_end..header_end + content_length];

    Recorded {
        method,
        path,
        body: serde_json::from_slice(body).unwrap_or(Value::Null),
    }
}

async fn write_response(stream: &mut TcpStream, status: u16, body: &Value) {
    let body = body.to_string();
    let reason = if status < 300 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();
}

fn page(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "url": format!("https://www.notion.so/{id}"),
        "last_edited_time": "2024-03-01T10:00:00.000Z",
        "properties": {
            "Name": { "title": [{ "plain_text": title }] },
            "Project": { "select": { "name": "web" } },
            "Tag": { "select": { "name": "root" } },
            "File": { "select": { "name": "arith" } },
            "Status": { "status": { "name": "PASS" } },
            "Archived": { "checkbox": false },
            "Active": { "checkbox": true }
        }
    })
}

fn valid_database() -> Value {
    json!({
        "title": [{ "type": "text", "text": { "content": "Tests" } }],
        "properties": {
            "Name": { "type": "title" },
            "Project": { "type": "select" },
            "Tag": { "type": "select" },
            "File": { "type": "select" },
            "Assigned": { "type": "people" },
            "Importance": { "type": "select" },
            "Status": { "type": "status" },
            "Archived": { "type": "checkbox" },
            "Active": { "type": "checkbox" }
        }
    })
}

// ===========================================================================
// Queries
// ===========================================================================

#[tokio::test]
async fn query_follows_next_cursor() {
    let notion = FakeNotion::serve(vec![
        (
            200,
            json!({ "results": [page("p1", "adds")], "has_more": true, "next_cursor": "c2" }),
        ),
        (
            200,
            json!({ "results": [page("p2", "subtracts")], "has_more": false, "next_cursor": null }),
        ),
    ])
    .await;

    let records = notion.store().query("web").await.unwrap();

    let ids: Vec<_> = records.iter().map(|r| r.id.0.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2"]);

    let requests = notion.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/v1/databases/db1/query");
    assert!(requests[0].body.get("start_cursor").is_none());
    assert_eq!(requests[1].body["start_cursor"], "c2");
    assert_eq!(requests[1].body["filter"]["select"]["equals"], "web");
}

#[tokio::test]
async fn server_error_is_retried_once() {
    let notion = FakeNotion::serve(vec![
        (500, json!({ "message": "internal" })),
        (200, json!({ "results": [page("p1", "adds")], "has_more": false })),
    ])
    .await;

    let records = notion.store().query("web").await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(notion.requests().len(), 2);
}

#[tokio::test]
async fn second_failure_is_returned() {
    let notion = FakeNotion::serve(vec![
        (500, json!({ "message": "internal" })),
        (502, json!({ "message": "bad gateway" })),
    ])
    .await;

    let err = notion.store().query("web").await.unwrap_err();

    assert!(matches!(err, StorageError::Http { status: 502, .. }));
    assert_eq!(notion.requests().len(), 2);
}

// ===========================================================================
// Updates
// ===========================================================================

#[tokio::test]
async fn update_of_missing_page_is_record_not_found() {
    let notion = FakeNotion::serve(vec![
        (404, json!({ "code": "object_not_found" })),
        (404, json!({ "code": "object_not_found" })),
    ])
    .await;

    let id = RecordId("gone".to_string());
    let err = notion
        .store()
        .update(&id, &RecordPatch::archive())
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::RecordNotFound { ref id } if id == "gone"));
    let requests = notion.requests();
    assert_eq!(requests[0].method, "PATCH");
    assert_eq!(requests[0].path, "/v1/pages/gone");
    assert_eq!(requests[0].body["properties"]["Archived"]["checkbox"], true);
}

// ===========================================================================
// Header
// ===========================================================================

#[tokio::test]
async fn header_without_counter_only_sends_icon() {
    let database = json!({
        "title": [
            {
                "type": "text",
                "text": { "content": "Team tests", "link": { "url": "https://example.com" } },
                "annotations": { "bold": true },
                "plain_text": "Team tests"
            },
            { "type": "mention", "mention": { "type": "user", "user": { "id": "u1" } } }
        ]
    });
    let notion = FakeNotion::serve(vec![(200, database), (200, json!({}))]).await;

    notion
        .store()
        .update_header(&HeaderUpdate {
            counter: Some("1/2".to_string()),
            icon: Some("list_red".to_string()),
        })
        .await
        .unwrap();

    let requests = notion.requests();
    assert_eq!(requests.len(), 2);
    let patch = &requests[1];
    assert_eq!(patch.method, "PATCH");
    assert_eq!(patch.path, "/v1/databases/db1");
    assert!(patch.body.get("title").is_none());
    assert_eq!(
        patch.body["icon"]["external"]["url"],
        "https://www.notion.so/icons/list_red.svg"
    );
}

#[tokio::test]
async fn header_counter_keeps_title_formatting() {
    let database = json!({
        "title": [
            {
                "type": "text",
                "text": { "content": "Team tests ", "link": { "url": "https://example.com" } },
                "annotations": { "bold": true },
                "plain_text": "Team tests "
            },
            { "type": "mention", "mention": { "type": "user", "user": { "id": "u1" } } },
            { "type": "text", "text": { "content": " 0/0" }, "plain_text": " 0/0" }
        ]
    });
    let notion = FakeNotion::serve(vec![(200, database), (200, json!({}))]).await;

    notion
        .store()
        .update_header(&HeaderUpdate {
            counter: Some("1/2".to_string()),
            icon: None,
        })
        .await
        .unwrap();

    let title = notion.requests()[1].body["title"].clone();
    assert_eq!(title[0]["text"]["link"]["url"], "https://example.com");
    assert_eq!(title[0]["annotations"]["bold"], true);
    assert_eq!(title[1]["mention"]["user"]["id"], "u1");
    assert_eq!(title[2]["text"]["content"], " 1/2");
}

// ===========================================================================
// Schema
// ===========================================================================

#[tokio::test]
async fn connect_checks_schema() {
    let notion = FakeNotion::serve(vec![(200, valid_database())]).await;

    NotionTestStore::connect(notion.config()).await.unwrap();

    let requests = notion.requests();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/v1/databases/db1");
}

#[tokio::test]
async fn connect_rejects_mistyped_columns() {
    let mut database = valid_database();
    database["properties"]["Archived"] = json!({ "type": "rich_text" });
    database["properties"]
        .as_object_mut()
        .unwrap()
        .remove("Active");
    let notion = FakeNotion::serve(vec![(200, database)]).await;

    let err = NotionTestStore::connect(notion.config()).await.err().unwrap();

    match err {
        StorageError::Schema { issues } => {
            assert_eq!(issues.len(), 2);
            assert!(issues[0].contains("'Archived'"));
            assert!(issues[1].contains("Missing property 'Active'"));
        }
        other => panic!("expected schema error, got {other:?}"),
    }
}
