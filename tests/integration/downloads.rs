//! Binary endpoints and login-authenticated downloads

use super::mock_server::{multipart_field, MockServerFixture, API_KEY};
use mockito::Matcher;
use polygon_api::{CallDescriptor, CancelHandle, Error, NoopProgress, PolygonSession, WebDownloader};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

fn archive(len: usize) -> Vec<u8> {
    let mut body = b"PK\x03\x04".to_vec();
    body.extend((0..len).map(|i| (i % 251) as u8));
    body
}

#[tokio::test]
async fn test_package_streams_to_file() {
    let mut fx = MockServerFixture::new().await;
    let payload = archive(300 * 1024);
    let mock = fx
        .server
        .mock("POST", "/problem.package")
        .match_body(multipart_field("packageId", "9"))
        .with_status(200)
        .with_header("content-type", "application/zip")
        .with_body(&payload)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("package.zip");
    let last = AtomicU64::new(0);
    let progress = |done: u64, _total: Option<u64>| last.store(done, Ordering::SeqCst);

    let transfer = fx
        .session()
        .download_to_path(
            &CallDescriptor::new("problem.package")
                .param("problemId", 1)
                .param("packageId", 9),
            &dest,
            &progress,
        )
        .await
        .unwrap();

    assert_eq!(transfer.bytes, payload.len() as u64);
    assert_eq!(last.load(Ordering::SeqCst), payload.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), payload);
    assert!(!dir.path().join("package.zip.part").exists());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_package_failed_envelope_writes_nothing() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .mock_json(
            "problem.package",
            r#"{"status":"FAILED","comment":"packageId: Package not found"}"#,
            1,
        )
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("package.zip");
    let err = fx
        .session()
        .download_to_path(
            &CallDescriptor::new("problem.package").param("packageId", 1),
            &dest,
            &NoopProgress,
        )
        .await
        .unwrap_err();

    assert_eq!(err.comment(), Some("packageId: Package not found"));
    assert!(!dest.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_package_into_memory_sink() {
    let mut fx = MockServerFixture::new().await;
    let payload = archive(1000);
    let mock = fx
        .server
        .mock("POST", "/problem.package")
        .with_body(&payload)
        .create_async()
        .await;

    let mut sink = Vec::new();
    let transfer = fx
        .session()
        .download(
            &CallDescriptor::new("problem.package").param("packageId", 2),
            &mut sink,
            &NoopProgress,
        )
        .await
        .unwrap();
    assert_eq!(transfer.bytes, payload.len() as u64);
    assert_eq!(sink, payload);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_package_error_status_is_a_transport_error() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .server
        .mock("POST", "/problem.package")
        .with_status(503)
        .with_body("Service Unavailable")
        .create_async()
        .await;

    let mut sink = Vec::new();
    let err = fx
        .session()
        .download(&CallDescriptor::new("problem.package"), &mut sink, &NoopProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_web_problem_package_uses_login_query() {
    let mut fx = MockServerFixture::new().await;
    let payload = archive(2048);
    let mock = fx
        .server
        .mock("GET", "/p/jury/a-plus-b")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("login".into(), "jury".into()),
            Matcher::UrlEncoded("password".into(), "s3cret".into()),
            Matcher::UrlEncoded("revision".into(), "7".into()),
            Matcher::UrlEncoded("type".into(), "linux".into()),
        ]))
        .with_body(&payload)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a-plus-b.zip");
    let problem_url = format!("{}/p/jury/a-plus-b", fx.base_url);
    let transfer = fx
        .web()
        .download_problem_package(&problem_url, Some(7), Some("linux"), None, &dest, &NoopProgress)
        .await
        .unwrap();

    assert_eq!(transfer.bytes, payload.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), payload);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_web_descriptors() {
    let mut fx = MockServerFixture::new().await;
    let problem_xml = fx
        .server
        .mock("GET", "/p/jury/a-plus-b/problem.xml")
        .match_query(Matcher::UrlEncoded("pin".into(), "1234".into()))
        .with_body("<problem/>")
        .expect(1)
        .create_async()
        .await;
    let contest_xml = fx
        .server
        .mock("GET", "/c/abcdef/contest.xml")
        .match_query(Matcher::UrlEncoded("login".into(), "jury".into()))
        .with_body("<contest/>")
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let web = fx.web();
    web.download_problem_descriptor(
        &format!("{}/p/jury/a-plus-b", fx.base_url),
        None,
        Some("1234"),
        dir.path().join("problem.xml"),
        &NoopProgress,
    )
    .await
    .unwrap();
    web.download_contest_descriptor("abcdef", None, dir.path().join("contest.xml"), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("problem.xml")).unwrap(),
        "<problem/>"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("contest.xml")).unwrap(),
        "<contest/>"
    );
    problem_xml.assert_async().await;
    contest_xml.assert_async().await;
}

#[tokio::test]
async fn test_web_refusal_hides_password() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .server
        .mock("GET", "/c/zzz/contest.xml")
        .match_query(Matcher::Any)
        .with_status(403)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("contest.xml");
    let err = fx
        .web()
        .download_contest_descriptor("zzz", None, &dest, &NoopProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport { .. }));
    let shown = err.to_string();
    assert!(shown.contains("403"));
    assert!(!shown.contains("s3cret"));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_cancelled_download_leaves_no_file() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .server
        .mock("POST", "/problem.package")
        .with_status(200)
        .with_chunked_body(|w| {
            w.write_all(b"PK\x03\x04first")?;
            w.flush()?;
            std::thread::sleep(Duration::from_secs(3));
            w.write_all(b"second")
        })
        .create_async()
        .await;

    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("package.zip");
    let err = fx
        .session()
        .download_to_path_with_cancel(
            &CallDescriptor::new("problem.package").param("packageId", 4),
            &dest,
            &NoopProgress,
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(!dest.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_slow_download_is_not_cut_by_request_timeout() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .server
        .mock("POST", "/problem.package")
        .with_status(200)
        .with_chunked_body(|w| {
            w.write_all(b"PK\x03\x04first")?;
            w.flush()?;
            std::thread::sleep(Duration::from_millis(1000));
            w.write_all(b"second")
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

    let mut sink = Vec::new();
    let transfer = session
        .download(&CallDescriptor::new("problem.package"), &mut sink, &NoopProgress)
        .await
        .unwrap();
    assert_eq!(transfer.bytes, 15);
    assert_eq!(sink, b"PK\x03\x04firstsecond");
}

#[tokio::test]
async fn test_web_connection_failure_hides_password() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let web = WebDownloader::new("jury", "hunter2-secret")
        .unwrap()
        .with_base_url(&format!("http://127.0.0.1:{port}"))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("contest.xml");
    let err = web
        .download_contest_descriptor("abc", None, &dest, &NoopProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport { .. }));
    let shown = err.to_string();
    assert!(!shown.contains("hunter2-secret"));
    assert!(shown.contains("\"password\": \"<hidden>\""));
    assert!(!dest.exists());
}
