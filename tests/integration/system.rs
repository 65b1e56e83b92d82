use rocket::http::{Header, Status};

use crate::common::test_client;

#[test]
fn health_reports_ok_without_touching_the_database() {
    let client = test_client();
    let res = client.get("/api/v1/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "fleetctl");
}

#[test]
fn ready_confirms_the_database_is_reachable() {
    let client = test_client();
    let res = client.get("/api/v1/ready").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ready");
}

#[test]
fn metrics_defaults_to_json() {
    let client = test_client();
    let res = client.get("/api/v1/metrics").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body.is_object());
}

#[test]
fn metrics_serves_prometheus_text_when_requested() {
    let client = test_client();
    let res = client
        .get("/api/v1/metrics")
        .header(Header::new("Accept", "text/plain"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let content_type = res.content_type().unwrap();
    assert!(content_type.is_plain());
}

#[test]
fn unknown_route_returns_the_json_404_catcher() {
    let client = test_client();
    let res = client.get("/api/v1/does-not-exist").dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "not found");
}
