//! JSON and plain-text calls against the mock server

use super::mock_server::{multipart_field, multipart_has, MockServerFixture, API_KEY};
use mockito::Matcher;
use polygon_api::{CallDescriptor, CancelHandle, Error, ParamValue, PolygonSession};
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;

#[derive(Debug, Deserialize, PartialEq)]
struct ProblemRef {
    id: u64,
}

#[tokio::test]
async fn test_ok_envelope_returns_result_after_one_attempt() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx.mock_json("problem.info", r#"{"status":"OK","result":{"id":5}}"#, 1).await;

    let session = fx.session();
    let (result, stats) = session
        .call_with_stats::<ProblemRef>(&CallDescriptor::new("problem.info").param("problemId", 5), None)
        .await
        .unwrap();

    assert_eq!(result, ProblemRef { id: 5 });
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.backoff_ms, 0);
    assert_eq!(stats.http_status, Some(200));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_failed_envelope_is_rejected_without_retry() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .mock_json(
            "problem.info",
            r#"{"status":"FAILED","comment":"problem not found"}"#,
            1,
        )
        .await;

    let err = fx
        .session()
        .call::<serde_json::Value>(&CallDescriptor::new("problem.info").param("problemId", 404))
        .await
        .unwrap_err();

    assert_eq!(err.comment(), Some("problem not found"));
    let shown = err.to_string();
    assert!(shown.contains("problem not found"));
    assert!(shown.contains("problem.info"));
    assert!(!shown.contains(API_KEY));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_undecodable_bodies_are_retried_until_ok() {
    let mut fx = MockServerFixture::new().await;
    let html = fx.mock_html("problems.list", 2).await;
    let ok = fx.mock_json("problems.list", r#"{"status":"OK","result":[]}"#, 1).await;

    let (result, stats) = fx
        .session()
        .call_with_stats::<Vec<ProblemRef>>(&CallDescriptor::new("problems.list"), None)
        .await
        .unwrap();

    assert!(result.is_empty());
    assert_eq!(stats.attempts, 3);
    // 1 ms then 2 ms
    assert_eq!(stats.backoff_ms, 3);
    html.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn test_retries_exhaust_into_service_unavailable() {
    let mut fx = MockServerFixture::new().await;
    let html = fx.mock_html("problem.info", 6).await;

    let err = fx
        .session()
        .call::<serde_json::Value>(&CallDescriptor::new("problem.info").param("problemId", 1))
        .await
        .unwrap_err();

    match err {
        Error::ServiceUnavailable {
            attempts,
            waited_ms,
            ..
        } => {
            assert_eq!(attempts, 6);
            assert_eq!(waited_ms, 1 + 2 + 4 + 8 + 16);
        }
        other => panic!("expected ServiceUnavailable, got {other:?}"),
    }
    html.assert_async().await;
}

#[tokio::test]
async fn test_cumulative_wait_bounds_retries() {
    let mut fx = MockServerFixture::new().await;
    let html = fx.mock_html("problem.info", 3).await;

    let session = PolygonSession::builder()
        .base_url(&fx.base_url)
        .api_key(API_KEY)
        .api_secret("s")
        .start_wait(Duration::from_millis(4))
        .max_cumulative_wait(Duration::from_millis(10))
        .max_retries(10)
        .use_keyring(false)
        .use_environment(false)
        .build()
        .unwrap();

    let err = session
        .call::<serde_json::Value>(&CallDescriptor::new("problem.info"))
        .await
        .unwrap_err();
    // waits 4 and min(8, 6)
    assert!(matches!(
        err,
        Error::ServiceUnavailable {
            attempts: 3,
            waited_ms: 10,
            ..
        }
    ));
    html.assert_async().await;
}

#[tokio::test]
async fn test_request_carries_marshalled_and_signing_fields() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .server
        .mock("POST", "/problem.saveFile")
        .match_body(Matcher::AllOf(vec![
            multipart_field("problemId", "77"),
            multipart_field("type", "source"),
            multipart_field("name", "gen.cpp"),
            multipart_field("file", "int main() {}\n"),
            multipart_field("apiKey", API_KEY),
            multipart_field("pin", "1111"),
            multipart_has("time"),
            Matcher::Regex(r#"(?s)name="apiSig".*?\r\n\r\n[a-z]{6}[0-9a-f]{128}\r\n"#.into()),
        ]))
        .with_status(200)
        .with_body(r#"{"status":"OK"}"#)
        .expect(1)
        .create_async()
        .await;

    let mut source = tempfile::NamedTempFile::new().unwrap();
    write!(source, "int main() {{}}\n").unwrap();

    let session = fx.session();
    session.set_pin(Some("1111".into()));
    let call = CallDescriptor::new("problem.saveFile")
        .param("problemId", 77)
        .param("type", "source")
        .param("name", "gen.cpp")
        .param("file", ParamValue::file(source.path()))
        .param("sourceType", None::<String>);
    session.call::<()>(&call).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_absent_parameters_are_not_sent() {
    let mut fx = MockServerFixture::new().await;
    // Preferred while unmatched, so a leaked parameter turns the call into a rejection.
    let _leak = fx
        .server
        .mock("POST", "/problem.files")
        .match_body(multipart_has("checkExisting"))
        .with_body(r#"{"status":"FAILED","comment":"checkExisting was sent"}"#)
        .create_async()
        .await;
    let ok = fx.mock_json("problem.files", r#"{"status":"OK","result":{}}"#, 1).await;

    fx.session()
        .call::<serde_json::Value>(
            &CallDescriptor::new("problem.files")
                .param("problemId", 3)
                .param("checkExisting", None::<bool>),
        )
        .await
        .unwrap();
    ok.assert_async().await;
}

#[tokio::test]
async fn test_unreadable_file_parameter_fails_before_sending() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx.mock_json("problem.saveFile", r#"{"status":"OK"}"#, 0).await;

    let err = fx
        .session()
        .call::<()>(
            &CallDescriptor::new("problem.saveFile")
                .param("file", ParamValue::file("/definitely/not/here.cpp")),
        )
        .await
        .unwrap_err();
    match err {
        Error::Marshalling { parameter, path, .. } => {
            assert_eq!(parameter, "file");
            assert!(path.ends_with("here.cpp"));
        }
        other => panic!("expected Marshalling, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_connection_refused_is_a_transport_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let session = PolygonSession::builder()
        .base_url(format!("http://127.0.0.1:{port}/api"))
        .api_key(API_KEY)
        .api_secret("s")
        .use_keyring(false)
        .use_environment(false)
        .build()
        .unwrap();

    let err = session
        .call::<serde_json::Value>(&CallDescriptor::new("problem.info").param("problemId", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
    let ctx = err.context().unwrap();
    assert_eq!(
        ctx.url.as_deref(),
        Some(format!("http://127.0.0.1:{port}/api/problem.info").as_str())
    );
    assert!(!err.to_string().contains(API_KEY));
}

#[tokio::test]
async fn test_text_endpoint_returns_raw_body() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .server
        .mock("POST", "/problem.testInput")
        .match_body(multipart_field("testIndex", "2"))
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("3\n1 2 3\n")
        .expect(1)
        .create_async()
        .await;

    let body = fx
        .session()
        .call_text(
            &CallDescriptor::new("problem.testInput")
                .param("problemId", 1)
                .param("testset", "tests")
                .param("testIndex", 2),
        )
        .await
        .unwrap();
    assert_eq!(body, "3\n1 2 3\n");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_text_endpoint_failed_envelope_is_rejected() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .mock_json(
            "problem.viewFile",
            r#"{"status":"FAILED","comment":"name: File not found"}"#,
            1,
        )
        .await;

    let err = fx
        .session()
        .call_text(&CallDescriptor::new("problem.viewFile").param("name", "nope.txt"))
        .await
        .unwrap_err();
    assert_eq!(err.comment(), Some("name: File not found"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_text_endpoint_does_not_retry_html() {
    let mut fx = MockServerFixture::new().await;
    let html = fx.mock_html("problem.script", 1).await;

    let body = fx
        .session()
        .call_text(&CallDescriptor::new("problem.script").param("testset", "tests"))
        .await
        .unwrap();
    assert!(body.contains("502 Bad Gateway"));
    html.assert_async().await;
}

#[tokio::test]
async fn test_cancel_during_backoff_ends_call() {
    let mut fx = MockServerFixture::new().await;
    let html = fx.mock_html("problem.info", 1).await;

    let session = PolygonSession::builder()
        .base_url(&fx.base_url)
        .api_key(API_KEY)
        .api_secret("s")
        .start_wait(Duration::from_secs(30))
        .use_keyring(false)
        .use_environment(false)
        .build()
        .unwrap();

    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = session
        .call_with_cancel::<serde_json::Value>(
            &CallDescriptor::new("problem.info").param("problemId", 1),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
    html.assert_async().await;
}

#[tokio::test]
async fn test_cancelled_text_call_is_not_sent() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx.mock_json("problem.viewFile", r#"{"status":"OK"}"#, 0).await;

    let cancel = CancelHandle::new();
    cancel.cancel();
    let err = fx
        .session()
        .call_text_with_cancel(&CallDescriptor::new("problem.viewFile").param("name", "a.txt"), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_slow_text_body_hits_request_timeout() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .server
        .mock("POST", "/problem.testInput")
        .with_status(200)
        .with_chunked_body(|w| {
            w.write_all(b"1 2\n")?;
            w.flush()?;
            std::thread::sleep(Duration::from_millis(1500));
            w.write_all(b"3 4\n")
        })
        .create_async()
        .await;

    let session = PolygonSession::builder()
        .base_url(&fx.base_url)
        .api_key(API_KEY)
        .api_secret("s")
        .http_timeout(Duration::from_millis(300))
        .use_keyring(false)
        .use_environment(false)
        .build()
        .unwrap();

    let err = session
        .call_text(&CallDescriptor::new("problem.testInput").param("testIndex", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
    assert!(err.is_timeout());
}
