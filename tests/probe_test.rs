use std::collections::HashSet;

use httpmock::{Method::GET, MockServer};
use reqwest::Client;
use watchtower_core::model::{Service, Status};
use watchtower_core::probe;

fn make_service(url: String) -> Service {
    let mut svc = Service {
        id: 1,
        name: "svc".into(),
        url,
        interval_secs: 10,
        active: true,
        timeout_ms: 500,
        retries: 0,
        retry_backoff_ms: 20,
        expected_status: 200,
        contains: None,
        tags: HashSet::new(),
        slo_target: 99.9,
    };
    svc.normalize();
    svc
}

#[tokio::test]
async fn it_marks_matching_status_as_ok() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/ok");
            then.status(200).body("ok");
        })
        .await;

    let client = Client::new();
    let svc = make_service(format!("{}/ok", server.base_url()));
    let result = probe::check(&client, &svc).await;
    m.assert_async().await;

    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.service_id, 1);
    assert_eq!(result.url, svc.url);
}

#[tokio::test]
async fn it_marks_unexpected_status_as_fail() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/err");
            then.status(500);
        })
        .await;

    let client = Client::new();
    let svc = make_service(format!("{}/err", server.base_url()));
    let result = probe::check(&client, &svc).await;
    m.assert_async().await;

    assert_eq!(result.status, Status::Fail);
}

#[tokio::test]
async fn it_retries_the_configured_number_of_times_before_failing() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/flaky");
            then.status(500);
        })
        .await;

    let client = Client::new();
    let mut svc = make_service(format!("{}/flaky", server.base_url()));
    svc.retries = 2;
    let result = probe::check(&client, &svc).await;

    // total attempts = retries + 1
    m.assert_hits_async(3).await;
    assert_eq!(result.status, Status::Fail);
}

#[tokio::test]
async fn it_requires_the_body_substring_when_contains_is_set() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/body");
            then.status(200).body("status: healthy");
        })
        .await;

    let client = Client::new();
    let mut svc = make_service(format!("{}/body", server.base_url()));
    svc.contains = Some("healthy".to_string());
    let result = probe::check(&client, &svc).await;
    m.assert_async().await;
    assert_eq!(result.status, Status::Ok);

    let mut svc2 = make_service(format!("{}/body", server.base_url()));
    svc2.contains = Some("degraded".to_string());
    let result2 = probe::check(&client, &svc2).await;
    assert_eq!(result2.status, Status::Fail);
}

#[tokio::test]
async fn it_fails_when_the_request_times_out() {
    let server = MockServer::start_async().await;
    let _m = server
        .mock_async(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(std::time::Duration::from_millis(600));
        })
        .await;

    let client = Client::new();
    let svc = make_service(format!("{}/slow", server.base_url()));
    let result = probe::check(&client, &svc).await;

    assert_eq!(result.status, Status::Fail);
    assert!(result.response_ms < 2000);
}

#[tokio::test]
async fn it_fails_on_connection_refused() {
    let client = Client::new();
    let svc = make_service("http://127.0.0.1:1".to_string());
    let result = probe::check(&client, &svc).await;
    assert_eq!(result.status, Status::Fail);
}
