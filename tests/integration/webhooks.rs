use rocket::http::{ContentType, Status};

use crate::common::{auth_header, setup_and_login, test_client};

#[test]
fn create_webhook_rejects_an_invalid_url() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");

    let res = client
        .post("/api/v1/webhooks")
        .header(ContentType::JSON)
        .header(auth_header(&token))
        .body(r#"{"name": "bad", "url": "not a url"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn create_list_update_and_delete_a_webhook() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");

    let res = client
        .post("/api/v1/webhooks")
        .header(ContentType::JSON)
        .header(auth_header(&token))
        .body(r#"{"name": "on-task-complete", "url": "https://example.com/hook", "event_types": ["task.completed"]}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let created: serde_json::Value = res.into_json().unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["enabled"], true);

    let res = client.get("/api/v1/webhooks").header(auth_header(&token)).dispatch();
    let webhooks: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(webhooks.len(), 1);

    let res = client
        .put(format!("/api/v1/webhooks/{id}"))
        .header(ContentType::JSON)
        .header(auth_header(&token))
        .body(r#"{"name": "on-task-complete", "url": "https://example.com/hook2", "enabled": false}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let updated: serde_json::Value = res.into_json().unwrap();
    assert_eq!(updated["url"], "https://example.com/hook2");
    assert_eq!(updated["enabled"], false);

    let res = client
        .delete(format!("/api/v1/webhooks/{id}"))
        .header(auth_header(&token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/api/v1/webhooks").header(auth_header(&token)).dispatch();
    let webhooks: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(webhooks.is_empty());
}

#[test]
fn list_deliveries_for_a_fresh_webhook_is_empty() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");

    let res = client
        .post("/api/v1/webhooks")
        .header(ContentType::JSON)
        .header(auth_header(&token))
        .body(r#"{"name": "quiet-hook", "url": "https://example.com/hook"}"#)
        .dispatch();
    let created: serde_json::Value = res.into_json().unwrap();
    let id = created["id"].as_str().unwrap();

    let res = client
        .get(format!("/api/v1/webhooks/{id}/deliveries"))
        .header(auth_header(&token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let deliveries: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(deliveries.is_empty());
}
