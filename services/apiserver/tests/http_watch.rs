mod common;

use axum::http::StatusCode;
use common::{app, read_json, registered_storage};
use apiserver::store::StoreConfig;
use futures::StreamExt;
use http_helpers::{get_request, json_request};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

const CONFIG_MAPS: &str = "/clusters/east/api/v1/namespaces/default/ConfigMap";

/// Reads newline-delimited JSON events off a streaming body.
struct EventReader {
    body: axum::body::BodyDataStream,
    buffer: Vec<u8>,
}

impl EventReader {
    fn new(response: axum::response::Response) -> Self {
        Self {
            body: response.into_body().into_data_stream(),
            buffer: Vec::new(),
        }
    }

    async fn next(&mut self) -> Option<Value> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                return Some(serde_json::from_slice(&line).expect("event json"));
            }
            let chunk = tokio::time::timeout(Duration::from_secs(3), self.body.next())
                .await
                .expect("event in time")?;
            self.buffer.extend_from_slice(&chunk.expect("chunk"));
        }
    }
}

fn config_map(name: &str) -> Value {
    json!({"metadata": {"name": name}, "data": {}})
}

#[tokio::test]
async fn list_then_watch_sees_exactly_the_next_write() {
    let app = app(registered_storage(StoreConfig::default()).await);
    for name in ["a", "b"] {
        let response = app
            .clone()
            .oneshot(json_request("POST", CONFIG_MAPS, config_map(name)))
            .await
            .expect("create");
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    let list = read_json(
        app.clone()
            .oneshot(get_request(CONFIG_MAPS))
            .await
            .expect("list"),
    )
    .await;
    let rv = list["metadata"]["resourceVersion"]
        .as_str()
        .expect("list rv")
        .to_string();
    assert_eq!(rv, "2");

    let response = app
        .clone()
        .oneshot(get_request(&format!(
            "{CONFIG_MAPS}?watch=true&resourceVersion={rv}"
        )))
        .await
        .expect("watch");
    assert_eq!(response.status(), StatusCode::OK);
    let mut events = EventReader::new(response);

    let response = app
        .clone()
        .oneshot(json_request("POST", CONFIG_MAPS, config_map("c")))
        .await
        .expect("create c");
    assert_eq!(response.status(), StatusCode::CREATED);

    let event = events.next().await.expect("first event");
    assert_eq!(event["type"], "ADDED");
    assert_eq!(event["object"]["metadata"]["name"], "c");
    assert_eq!(event["object"]["metadata"]["resourceVersion"], "3");

    let response = app
        .oneshot(json_request("DELETE", &format!("{CONFIG_MAPS}/a"), json!({})))
        .await
        .expect("delete a");
    assert_eq!(response.status(), StatusCode::OK);
    let event = events.next().await.expect("second event");
    assert_eq!(event["type"], "DELETED");
    assert_eq!(event["object"]["metadata"]["name"], "a");
    assert_eq!(event["object"]["metadata"]["resourceVersion"], "4");
}

#[tokio::test]
async fn watch_without_version_replays_current_state() {
    let app = app(registered_storage(StoreConfig::default()).await);
    for name in ["a", "b"] {
        app.clone()
            .oneshot(json_request("POST", CONFIG_MAPS, config_map(name)))
            .await
            .expect("create");
    }
    let response = app
        .oneshot(get_request(&format!("{CONFIG_MAPS}?watch=true")))
        .await
        .expect("watch");
    let mut events = EventReader::new(response);
    let mut names = Vec::new();
    for _ in 0..2 {
        let event = events.next().await.expect("replayed event");
        assert_eq!(event["type"], "ADDED");
        names.push(event["object"]["metadata"]["name"].as_str().expect("name").to_string());
    }
    names.sort();
    assert_eq!(names, vec!["a", "b"]);
}

#[tokio::test]
async fn watch_from_compacted_version_ends_with_gone() {
    let app = app(
        registered_storage(StoreConfig {
            changes_limit: 2,
            change_retention_max_rows: Some(2),
            change_retention_max_age: None,
        })
        .await,
    );
    for name in ["a", "b", "c", "d", "e"] {
        app.clone()
            .oneshot(json_request("POST", CONFIG_MAPS, config_map(name)))
            .await
            .expect("create");
    }

    let response = app
        .oneshot(get_request(&format!(
            "{CONFIG_MAPS}?watch=true&resourceVersion=1"
        )))
        .await
        .expect("watch");
    assert_eq!(response.status(), StatusCode::OK);
    let mut events = EventReader::new(response);
    let event = events.next().await.expect("error event");
    assert_eq!(event["type"], "ERROR");
    assert_eq!(event["object"]["kind"], "Status");
    assert_eq!(event["object"]["code"], 410);
    assert_eq!(event["object"]["reason"], "Expired");
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn bookmarks_are_sent_when_requested() {
    let app = app(registered_storage(StoreConfig::default()).await);
    app.clone()
        .oneshot(json_request("POST", CONFIG_MAPS, config_map("a")))
        .await
        .expect("create");
    let response = app
        .oneshot(get_request(&format!(
            "{CONFIG_MAPS}?watch=true&resourceVersion=1&allowWatchBookmarks=true"
        )))
        .await
        .expect("watch");
    let mut events = EventReader::new(response);
    let event = events.next().await.expect("bookmark");
    assert_eq!(event["type"], "BOOKMARK");
    assert_eq!(event["object"]["kind"], "ConfigMap");
    assert_eq!(event["object"]["metadata"]["resourceVersion"], "1");
}

#[tokio::test]
async fn watch_of_unsynchronized_kind_is_rejected_up_front() {
    let app = app(registered_storage(StoreConfig::default()).await);
    let response = app
        .oneshot(get_request(
            "/clusters/east/apis/batch/v1/namespaces/default/Job?watch=true",
        ))
        .await
        .expect("watch");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
