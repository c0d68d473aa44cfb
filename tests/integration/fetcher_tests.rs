use std::time::Duration;

use price_drop_watcher::config::FetcherConfig;
use price_drop_watcher::utils::error::FetchFailureKind;
use price_drop_watcher::{HttpFetcher, PageFetcher};
use url::Url;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::get_test_config;

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(&get_test_config().fetcher).unwrap()
}

fn url_for(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
}

#[tokio::test]
async fn test_retries_up_to_ceiling_on_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let failure = fetcher().fetch(&url_for(&server, "/busy")).await.unwrap_err();
    assert_eq!(failure.kind, FetchFailureKind::NetworkError);
    assert_eq!(failure.attempts_made, 3);
}

#[tokio::test]
async fn test_blocked_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let failure = fetcher().fetch(&url_for(&server, "/p/1")).await.unwrap_err();
    assert_eq!(failure.kind, FetchFailureKind::Blocked);
    assert_eq!(failure.attempts_made, 1);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let failure = fetcher().fetch(&url_for(&server, "/gone")).await.unwrap_err();
    assert_eq!(failure.kind, FetchFailureKind::NotFound);
    assert_eq!(failure.attempts_made, 1);
}

#[tokio::test]
async fn test_other_server_errors_fail_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let failure = fetcher().fetch(&url_for(&server, "/boom")).await.unwrap_err();
    assert_eq!(failure.kind, FetchFailureKind::NetworkError);
    assert_eq!(failure.attempts_made, 1);
}

#[tokio::test]
async fn test_captcha_page_is_blocked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><head><title>Robot Check</title></head><body>Enter the characters you see below</body></html>",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let failure = fetcher().fetch(&url_for(&server, "/dp/B0C1234567")).await.unwrap_err();
    assert_eq!(failure.kind, FetchFailureKind::Blocked);
}

#[tokio::test]
async fn test_rate_limit_then_success_sends_referer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("referer", "https://www.google.com/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>ok</body></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let page = fetcher().fetch(&url_for(&server, "/p/2")).await.unwrap();
    assert_eq!(page.status, 200);
    assert!(page.text().contains("ok"));
}

#[tokio::test]
async fn test_browser_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_exists("user-agent"))
        .and(header_exists("accept-language"))
        .and(header("x-test", "yes"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = get_test_config().fetcher;
    config.headers.insert("x-test".to_string(), "yes".to_string());
    let page = HttpFetcher::new(&config).unwrap().fetch(&url_for(&server, "/")).await.unwrap();
    assert_eq!(page.status, 200);
}

#[tokio::test]
async fn test_slow_responses_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let config = FetcherConfig {
        request_timeout_secs: 1,
        retry_attempts: 2,
        ..get_test_config().fetcher
    };
    let failure = HttpFetcher::new(&config)
        .unwrap()
        .fetch(&url_for(&server, "/slow"))
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FetchFailureKind::Timeout);
    assert_eq!(failure.attempts_made, 2);
}

#[tokio::test]
async fn test_redirects_report_final_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>moved</html>"))
        .mount(&server)
        .await;

    let page = fetcher().fetch(&url_for(&server, "/old")).await.unwrap();
    assert_eq!(page.final_url.path(), "/new");
}

#[tokio::test]
async fn test_connection_refused_is_retried_then_network_error() -> anyhow::Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let config = get_test_config().fetcher;
    let url = Url::parse(&format!("http://127.0.0.1:{}/p/closed", port))?;
    let failure = HttpFetcher::new(&config)?.fetch(&url).await.unwrap_err();
    assert_eq!(failure.kind, FetchFailureKind::NetworkError);
    assert_eq!(failure.attempts_made, config.retry_attempts);

    println!("✓ Refused connection retried {} times", failure.attempts_made);
    Ok(())
}
