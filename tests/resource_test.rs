//! Tests for Resource against a scripted local server.

mod common;

use common::{json_response, MockServer, Reply};
use couchnet::resource::{urljoin, Resource};
use couchnet::NetError;
use http::{HeaderMap, StatusCode};
use serde_json::json;

#[tokio::test]
async fn test_get_json_child_path() {
    let server = MockServer::start(|_| {
        Reply::Send(json_response("200 OK", r#"{"_id":"a/b","_rev":"1-x"}"#, ""))
    })
    .await;
    let db = Resource::new(&server.url("/db"), None).unwrap();

    let (status, _, value) = db.get_json(&["a/b"], HeaderMap::new(), &[]).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["_rev"], "1-x");
    assert_eq!(server.requests()[0].path(), "/db/a%2fb");
}

#[tokio::test]
async fn test_query_encoding_on_the_wire() {
    let server =
        MockServer::start(|_| Reply::Send(json_response("200 OK", r#"{"rows":[]}"#, ""))).await;
    let db = Resource::new(&server.url("/db"), None).unwrap();

    db.get_json(
        &["_all_docs"],
        HeaderMap::new(),
        &[("include_docs", json!(true)), ("limit", json!(2)), ("skip", serde_json::Value::Null)],
    )
    .await
    .unwrap();
    assert_eq!(server.requests()[0].path(), "/db/_all_docs?include_docs=true&limit=2");
}

#[tokio::test]
async fn test_put_json_sends_body_and_credentials() {
    let server = MockServer::start(|_| {
        Reply::Send(json_response("201 Created", r#"{"ok":true}"#, ""))
    })
    .await;
    let url = server.base_url.replace("http://", "http://joe:secret@") + "/db";
    let db = Resource::new(&url, None).unwrap();

    let (status, _, value) = db
        .child(&["doc"])
        .put_json(&[], json!({"type": "note"}), HeaderMap::new(), &[])
        .await
        .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(value, json!({"ok": true}));

    let req = &server.requests()[0];
    assert_eq!(req.method(), "put");
    assert_eq!(req.path(), "/db/doc");
    assert_eq!(req.body, br#"{"type":"note"}"#);
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert!(req.header("authorization").unwrap().starts_with("basic "));
}

#[tokio::test]
async fn test_missing_document() {
    let server = MockServer::start(|_| {
        Reply::Send(json_response(
            "404 Object Not Found",
            r#"{"error":"not_found","reason":"deleted"}"#,
            "",
        ))
    })
    .await;
    let db = Resource::new(&server.url("/db"), None).unwrap();

    let err = db.get_json(&["gone"], HeaderMap::new(), &[]).await.unwrap_err();
    assert!(matches!(err, NetError::ResourceNotFound(_)));
    assert_eq!(err.detail().unwrap().reason.as_deref(), Some("deleted"));
}

#[tokio::test]
async fn test_head_json_has_no_body() {
    let server = MockServer::start(|_| {
        Reply::Send(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
              Content-Length: 13\r\nETag: \"1-x\"\r\n\r\n"
                .to_vec(),
        )
    })
    .await;
    let db = Resource::new(&server.url("/db"), None).unwrap();

    let (status, headers, value) = db.head_json(&["doc"], HeaderMap::new(), &[]).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[http::header::ETAG], "\"1-x\"");
    assert!(value.is_null());
}

#[test]
fn test_urljoin_strips_trailing_slash() {
    assert_eq!(
        urljoin("http://localhost:5984/", &["_all_dbs"], &[]),
        "http://localhost:5984/_all_dbs"
    );
}
