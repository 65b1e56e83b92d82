use rocket::http::{ContentType, Status};

use crate::common::{auth_header, setup_and_login, test_client};

fn create_host(client: &rocket::local::blocking::Client, token: &str, name: &str) -> serde_json::Value {
    let res = client
        .post("/api/v1/hosts")
        .header(ContentType::JSON)
        .header(auth_header(token))
        .body(format!(
            r#"{{"name": "{name}", "host": "127.0.0.1", "port": 1, "username": "ops", "ssh_password": "hunter2"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

#[test]
fn create_and_fetch_a_host() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");
    let host = create_host(&client, &token, "web1");
    let id = host["id"].as_i64().unwrap();
    assert_eq!(host["name"], "web1");
    assert!(host.get("ssh_password_wrapped").is_none());

    let res = client
        .get(format!("/api/v1/hosts/{id}"))
        .header(auth_header(&token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let fetched: serde_json::Value = res.into_json().unwrap();
    assert_eq!(fetched["id"], id);
}

#[test]
fn create_host_rejects_an_invalid_hostname() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");
    let res = client
        .post("/api/v1/hosts")
        .header(ContentType::JSON)
        .header(auth_header(&token))
        .body(r#"{"name": "bad", "host": "-not-valid-.com", "username": "ops", "ssh_password": "x"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn create_host_requires_authentication() {
    let client = test_client();
    let res = client
        .post("/api/v1/hosts")
        .header(ContentType::JSON)
        .body(r#"{"name": "web1", "host": "10.0.0.5", "username": "ops", "ssh_password": "x"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn list_hosts_reflects_creations_and_deletions() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");
    create_host(&client, &token, "alpha");
    create_host(&client, &token, "beta");

    let res = client.get("/api/v1/hosts").header(auth_header(&token)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let hosts: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(hosts.len(), 2);

    let id = hosts[0]["id"].as_i64().unwrap();
    let res = client
        .delete(format!("/api/v1/hosts/{id}"))
        .header(auth_header(&token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/api/v1/hosts").header(auth_header(&token)).dispatch();
    let hosts: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(hosts.len(), 1);
}

#[test]
fn get_host_not_found_returns_404() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");
    let res = client
        .get("/api/v1/hosts/999999")
        .header(auth_header(&token))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn inventory_collect_fails_gateway_against_an_unreachable_host() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");
    let host = create_host(&client, &token, "unreachable");
    let id = host["id"].as_i64().unwrap();

    let res = client
        .post(format!("/api/v1/hosts/{id}/inventory/collect"))
        .header(auth_header(&token))
        .dispatch();
    assert_eq!(res.status(), Status::BadGateway);
}

#[test]
fn inventory_for_a_host_with_no_snapshot_yet_is_not_found() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");
    let host = create_host(&client, &token, "fresh");
    let id = host["id"].as_i64().unwrap();

    let res = client
        .get(format!("/api/v1/hosts/{id}/inventory"))
        .header(auth_header(&token))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
