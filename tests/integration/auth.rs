use rocket::http::{ContentType, Status};

use crate::common::{auth_header, setup_and_login, test_client};

#[test]
fn setup_creates_admin_and_refuses_a_second_run() {
    let client = test_client();
    let res = client
        .post("/api/v1/setup")
        .header(ContentType::JSON)
        .body(r#"{"username": "root", "password": "correct-horse-battery"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["username"], "root");
    assert_eq!(body["role"], "admin");

    let res = client
        .post("/api/v1/setup")
        .header(ContentType::JSON)
        .body(r#"{"username": "someone-else", "password": "correct-horse-battery"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn setup_rejects_short_passwords() {
    let client = test_client();
    let res = client
        .post("/api/v1/setup")
        .header(ContentType::JSON)
        .body(r#"{"username": "root", "password": "short"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn login_returns_a_bearer_token_for_a_valid_admin() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");
    assert!(!token.is_empty());
}

#[test]
fn login_rejects_wrong_password() {
    let client = test_client();
    client
        .post("/api/v1/setup")
        .header(ContentType::JSON)
        .body(r#"{"username": "root", "password": "correct-horse-battery"}"#)
        .dispatch();

    let res = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(r#"{"username": "root", "password": "wrong-password"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn me_returns_the_caller_identity_and_permissions() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");

    let res = client.get("/api/v1/auth/me").header(auth_header(&token)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["username"], "root");
    assert_eq!(body["role"], "admin");
    assert_eq!(body["permissions"], serde_json::json!(["*"]));
}

#[test]
fn me_without_a_bearer_token_is_unauthorized() {
    let client = test_client();
    let res = client.get("/api/v1/auth/me").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn repeated_failed_logins_block_the_caller_ip() {
    let client = test_client();
    client
        .post("/api/v1/setup")
        .header(ContentType::JSON)
        .body(r#"{"username": "root", "password": "correct-horse-battery"}"#)
        .dispatch();

    for _ in 0..11 {
        client
            .post("/api/v1/auth/login")
            .header(ContentType::JSON)
            .body(r#"{"username": "root", "password": "wrong-password"}"#)
            .dispatch();
    }

    let res = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(r#"{"username": "root", "password": "correct-horse-battery"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::TooManyRequests);
}
