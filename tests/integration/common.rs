use rocket::local::blocking::Client;

use fleetctl::config::Config;

/// Wrapper around Client that deletes the temp SQLite file (and its
/// WAL/SHM siblings) on drop, so each test's database is cleaned up
/// regardless of how the test exits.
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
    _runtime: tokio::runtime::Runtime,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

fn test_config() -> Config {
    let mut cfg = Config::from_env();
    cfg.db_path = format!("/tmp/fleetctl_test_{}.db", uuid::Uuid::new_v4());
    cfg.jwt_secret = "test-jwt-secret-not-for-production".into();
    cfg.webhook_allow_local = true;
    cfg
}

pub fn test_client() -> TestClient {
    let config = test_config();
    let db_path = config.db_path.clone();
    let runtime = tokio::runtime::Runtime::new().expect("create tokio runtime");
    let app = runtime.block_on(async { fleetctl::build(config) });
    let client = Client::tracked(app.rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
        _runtime: runtime,
    }
}

/// Runs `/api/v1/setup` then `/api/v1/auth/login` and returns the bearer
/// token for the freshly created admin account.
pub fn setup_and_login(client: &Client, username: &str, password: &str) -> String {
    use rocket::http::{ContentType, Status};

    let res = client
        .post("/api/v1/setup")
        .header(ContentType::JSON)
        .body(format!(r#"{{"username": "{username}", "password": "{password}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(format!(r#"{{"username": "{username}", "password": "{password}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["token"].as_str().unwrap().to_string()
}

pub fn auth_header(token: &str) -> rocket::http::Header<'static> {
    rocket::http::Header::new("Authorization", format!("Bearer {token}"))
}
