//! HTTP REST client against a mock room server

use chrono::{TimeZone, Utc};
use coedit_sdk::{ChatPost, ChatRecord, ClientConfig, DocUpdate, HttpRest, RestApi, RestError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> HttpRest {
    let config = ClientConfig::builder()
        .api_url(server.uri())
        .request_timeout(2000)
        .build();
    HttpRest::new(config).unwrap()
}

#[tokio::test]
async fn test_get_doc_returns_body_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/doc/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = client(&server).get_doc("r1").await.unwrap().unwrap();
    assert_eq!(snapshot.text, "hello");
    assert_eq!(snapshot.timestamp, None);
}

#[tokio::test]
async fn test_room_code_is_escaped_in_the_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/doc/a%23x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("room x"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/doc/a%23y"))
        .respond_with(ResponseTemplate::new(200).set_body_string("room y"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/chat/team%2Fnotes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let rest = client(&server);
    assert_eq!(rest.get_doc("a#x").await.unwrap().unwrap().text, "room x");
    assert_eq!(rest.get_doc("a#y").await.unwrap().unwrap().text, "room y");
    assert_eq!(rest.get_chat("team/notes").await, Ok(vec![]));
}

#[tokio::test]
async fn test_missing_doc_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/doc/new-room"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/doc/blank"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let rest = client(&server);
    assert_eq!(rest.get_doc("new-room").await, Ok(None));
    assert_eq!(rest.get_doc("blank").await, Ok(None));
}

#[tokio::test]
async fn test_server_error_maps_to_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/doc/r1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert_eq!(client(&server).get_doc("r1").await, Err(RestError::Status(500)));
}

#[tokio::test]
async fn test_post_update_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/update"))
        .and(body_partial_json(json!({
            "room": "r1",
            "content": "hello",
            "timestamp": "2024-05-01T12:00:00Z"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let update = DocUpdate {
        room: "r1".to_string(),
        content: "hello".to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    };
    assert_eq!(client(&server).post_update(&update).await, Ok(()));
}

#[tokio::test]
async fn test_chat_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"userName": "alice", "message": "hi"},
            {"userName": "bob", "message": "hey"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "roomId": "r1",
            "userId": "u-1",
            "userName": "carol",
            "message": "hello all"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let rest = client(&server);
    let history = rest.get_chat("r1").await.unwrap();
    assert_eq!(
        history,
        vec![
            ChatRecord {
                user_name: "alice".into(),
                message: "hi".into()
            },
            ChatRecord {
                user_name: "bob".into(),
                message: "hey".into()
            },
        ]
    );

    let post = ChatPost {
        room_id: "r1".into(),
        user_id: "u-1".into(),
        user_name: "carol".into(),
        message: "hello all".into(),
    };
    assert_eq!(rest.post_chat(&post).await, Ok(()));
}

#[tokio::test]
async fn test_unparseable_chat_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    assert!(matches!(
        client(&server).get_chat("r1").await,
        Err(RestError::Decode(_))
    ));
}

#[tokio::test]
async fn test_unreachable_server() {
    let config = ClientConfig::builder()
        .api_url("http://127.0.0.1:9")
        .request_timeout(500)
        .build();
    let rest = HttpRest::new(config).unwrap();
    assert!(matches!(rest.get_doc("r1").await, Err(RestError::Network(_))));
}
