use rocket::http::{ContentType, Status};

use crate::common::{auth_header, setup_and_login, test_client};

fn create_host(client: &rocket::local::blocking::Client, token: &str) -> i64 {
    let res = client
        .post("/api/v1/hosts")
        .header(ContentType::JSON)
        .header(auth_header(token))
        .body(r#"{"name": "taskhost", "host": "127.0.0.1", "port": 1, "username": "ops", "ssh_password": "hunter2"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let host: serde_json::Value = res.into_json().unwrap();
    host["id"].as_i64().unwrap()
}

#[test]
fn submitting_a_task_queues_it_for_the_host() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");
    let host_id = create_host(&client, &token);

    let res = client
        .post(format!("/api/v1/hosts/{host_id}/tasks"))
        .header(ContentType::JSON)
        .header(auth_header(&token))
        .body(r#"{"command": "uptime"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let task_id = body["task_id"].as_str().unwrap();

    let res = client
        .get(format!("/api/v1/tasks/{task_id}"))
        .header(auth_header(&token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let task: serde_json::Value = res.into_json().unwrap();
    assert_eq!(task["command"], "uptime");
    assert!(["queued", "running", "failed"].contains(&task["status"].as_str().unwrap()));
}

#[test]
fn submitting_an_empty_command_is_rejected() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");
    let host_id = create_host(&client, &token);

    let res = client
        .post(format!("/api/v1/hosts/{host_id}/tasks"))
        .header(ContentType::JSON)
        .header(auth_header(&token))
        .body(r#"{"command": "   "}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn submitting_against_a_nonexistent_host_is_not_found() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");

    let res = client
        .post("/api/v1/hosts/999999/tasks")
        .header(ContentType::JSON)
        .header(auth_header(&token))
        .body(r#"{"command": "uptime"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn listing_tasks_for_a_host_returns_what_was_submitted() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");
    let host_id = create_host(&client, &token);

    client
        .post(format!("/api/v1/hosts/{host_id}/tasks"))
        .header(ContentType::JSON)
        .header(auth_header(&token))
        .body(r#"{"command": "whoami"}"#)
        .dispatch();

    let res = client
        .get(format!("/api/v1/hosts/{host_id}/tasks"))
        .header(auth_header(&token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let tasks: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["command"], "whoami");
}

#[test]
fn cancelling_ones_own_task_succeeds() {
    let client = test_client();
    let token = setup_and_login(&client, "root", "correct-horse-battery");
    let host_id = create_host(&client, &token);

    let res = client
        .post(format!("/api/v1/hosts/{host_id}/tasks"))
        .header(ContentType::JSON)
        .header(auth_header(&token))
        .body(r#"{"command": "sleep 5"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let task_id = body["task_id"].as_str().unwrap();

    let res = client
        .post(format!("/api/v1/tasks/{task_id}/cancel"))
        .header(auth_header(&token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}
