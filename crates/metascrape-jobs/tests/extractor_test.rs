//! HttpExtractor against a mock HTTP server.

use std::time::Duration;

use metascrape_core::MetadataExtractor;
use metascrape_jobs::{ExtractorConfig, HttpExtractor};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn extractor_with_timeout(timeout: Duration) -> HttpExtractor {
    HttpExtractor::new(ExtractorConfig::default().with_timeout(timeout))
        .expect("Failed to create extractor")
}

#[tokio::test]
async fn test_title_without_meta() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Example</title></head></html>"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/", mock_server.uri());
    let result = extractor_with_timeout(Duration::from_secs(5))
        .extract(&url)
        .await;

    assert_eq!(result.url, url);
    assert_eq!(result.title, "Example");
    assert_eq!(result.description, "");
    assert_eq!(result.keywords, "");
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_meta_description_and_keywords() {
    let mock_server = MockServer::start().await;
    let body = r#"<!doctype html><html><head>
        <title>Docs</title>
        <meta name="description" content="Reference manual">
        <meta name="keywords" content="docs,manual">
    </head><body><p>hello</p></body></html>"#;
    Mock::given(method("GET"))
        .and(path("/docs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let result = extractor_with_timeout(Duration::from_secs(5))
        .extract(&format!("{}/docs", mock_server.uri()))
        .await;

    assert!(result.is_success(), "unexpected error: {:?}", result.error);
    assert_eq!(result.title, "Docs");
    assert_eq!(result.description, "Reference manual");
    assert_eq!(result.keywords, "docs,manual");
}

#[tokio::test]
async fn test_error_status_page_is_still_parsed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(
            ResponseTemplate::new(404).set_body_string("<title>404 Not Found</title>"),
        )
        .mount(&mock_server)
        .await;

    let result = extractor_with_timeout(Duration::from_secs(5))
        .extract(&format!("{}/missing", mock_server.uri()))
        .await;

    assert!(result.is_success());
    assert_eq!(result.title, "404 Not Found");
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<title>Too late</title>")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let result = extractor_with_timeout(Duration::from_millis(200))
        .extract(&format!("{}/slow", mock_server.uri()))
        .await;

    let error = result.error.expect("timeout should be reported");
    assert!(error.contains("timed out"), "unexpected error: {error}");
    assert_eq!(result.title, "");
    assert_eq!(result.description, "");
    assert_eq!(result.keywords, "");
}

#[tokio::test]
async fn test_connection_refused_is_reported() {
    // Bind then release a port so nothing is listening on it.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = extractor_with_timeout(Duration::from_secs(5))
        .extract(&format!("http://{addr}/"))
        .await;

    assert!(result.error.is_some());
    assert_eq!(result.title, "");
}

#[tokio::test]
async fn test_unparseable_url_is_reported() {
    let result = extractor_with_timeout(Duration::from_secs(5))
        .extract("not a url")
        .await;

    assert!(result.error.is_some());
    assert_eq!(result.url, "not a url");
}
