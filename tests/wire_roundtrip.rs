use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use venued::auth::StaffDirectory;
use venued::engine::Engine;
use venued::notify::NotifyHub;
use venued::wire;

const HOUR: i64 = 3_600_000;
const DAY: i64 = 1_700_000_000_000;

fn at(hour: i64) -> i64 {
    DAY + hour * HOUR
}

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("venued_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(dir.join("venue.wal"), notify).unwrap());
    let directory =
        Arc::new(StaffDirectory::from_spec("ana:s3cret:admin,kiosk:lobby:viewer").unwrap());

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            let directory = directory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, directory, None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, user: &str, password: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("venue")
        .user(user)
        .password(password);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Collect the data rows of a simple query.
fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<tokio_postgres::SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn seed_client(client: &tokio_postgres::Client) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO clients (id, name) VALUES ('{id}', 'María López')"
        ))
        .await
        .unwrap();
    id
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_list_roundtrip() {
    let addr = start_test_server().await;
    let client = connect(addr, "ana", "s3cret").await;

    let client_id = seed_client(&client).await;
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO reservations (id, client_id, date, start, "end", status, attendees, total)
               VALUES ('{rid}', '{client_id}', {d}, {s}, {e}, 'HELD', 120, 3500000)"#,
            d = at(0),
            s = at(17),
            e = at(22),
        ))
        .await
        .unwrap();

    let rows = data_rows(client.simple_query("SELECT * FROM reservations").await.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some(rid.to_string().as_str()));
    assert_eq!(rows[0].get(5), Some("HELD"));
    assert_eq!(rows[0].get(6), Some("120"));
    assert_eq!(rows[0].get(7), Some("3500000"));
}

#[tokio::test]
async fn overlap_rejected_over_the_wire() {
    let addr = start_test_server().await;
    let client = connect(addr, "ana", "s3cret").await;

    let client_id = seed_client(&client).await;
    client
        .batch_execute(&format!(
            r#"INSERT INTO reservations (id, client_id, date, start, "end")
               VALUES ('{}', '{client_id}', {d}, {s}, {e})"#,
            Ulid::new(),
            d = at(0),
            s = at(18),
            e = at(19),
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!(
            r#"INSERT INTO reservations (id, client_id, date, start, "end")
               VALUES ('{}', '{client_id}', {d}, {s}, {e})"#,
            Ulid::new(),
            d = at(0),
            s = at(17),
            e = at(22),
        ))
        .await
        .unwrap_err();
    let db_err = err.as_db_error().expect("expected db error");
    assert_eq!(db_err.code(), &SqlState::EXCLUSION_VIOLATION);
}

#[tokio::test]
async fn update_merges_and_clears_fields() {
    let addr = start_test_server().await;
    let client = connect(addr, "ana", "s3cret").await;

    let client_id = seed_client(&client).await;
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO reservations (id, client_id, date, start, "end", status, attendees, total, deposit, package_id, notes)
               VALUES ('{rid}', '{client_id}', {d}, {s}, {e}, 'HELD', 80, 1000, 0, NULL, 'long tables')"#,
            d = at(0),
            s = at(17),
            e = at(22),
        ))
        .await
        .unwrap();

    // Confirm and clear the notes; attendees is untouched.
    client
        .batch_execute(&format!(
            "UPDATE reservations SET status = 'CONFIRMED', notes = NULL WHERE id = '{rid}'"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM reservations WHERE id = '{rid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(5), Some("CONFIRMED"));
    assert_eq!(rows[0].get(6), Some("80"));
    assert_eq!(rows[0].get(10), None); // notes cleared
}

#[tokio::test]
async fn get_by_id_carries_nested_dependents() {
    let addr = start_test_server().await;
    let client = connect(addr, "ana", "s3cret").await;

    let client_id = seed_client(&client).await;
    let service_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO services (id, name) VALUES ('{service_id}', 'DJ & Audio')"
        ))
        .await
        .unwrap();

    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO reservations (id, client_id, date, start, "end")
               VALUES ('{rid}', '{client_id}', {d}, {s}, {e})"#,
            d = at(0),
            s = at(17),
            e = at(22),
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO service_lines (reservation_id, service_id, quantity) VALUES ('{rid}', '{service_id}', 2)"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO payments (reservation_id, amount, method, reference) VALUES ('{rid}', 500000, 'TRANSFER', 'DEP-0001')"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM reservations WHERE id = '{rid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    let lines_json: serde_json::Value =
        serde_json::from_str(rows[0].get(13).unwrap()).unwrap();
    let payments_json: serde_json::Value =
        serde_json::from_str(rows[0].get(14).unwrap()).unwrap();
    assert_eq!(lines_json.as_array().unwrap().len(), 1);
    assert_eq!(lines_json[0]["quantity"], 2);
    assert_eq!(payments_json[0]["amount"], 500000);
    assert_eq!(payments_json[0]["reference"], "DEP-0001");
}

#[tokio::test]
async fn delete_then_select_is_empty() {
    let addr = start_test_server().await;
    let client = connect(addr, "ana", "s3cret").await;

    let client_id = seed_client(&client).await;
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO reservations (id, client_id, date, start, "end")
               VALUES ('{rid}', '{client_id}', {d}, {s}, {e})"#,
            d = at(0),
            s = at(10),
            e = at(12),
        ))
        .await
        .unwrap();

    client
        .batch_execute(&format!("DELETE FROM reservations WHERE id = '{rid}'"))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM reservations WHERE id = '{rid}'"))
            .await
            .unwrap(),
    );
    assert!(rows.is_empty());

    let err = client
        .batch_execute(&format!("DELETE FROM reservations WHERE id = '{rid}'"))
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code(), &SqlState::NO_DATA_FOUND);
}

#[tokio::test]
async fn window_query_includes_boundary_straddlers() {
    let addr = start_test_server().await;
    let client = connect(addr, "ana", "s3cret").await;

    let client_id = seed_client(&client).await;
    for (s, e) in [(at(9), at(11)), (at(12), at(13)), (at(20), at(22))] {
        client
            .batch_execute(&format!(
                r#"INSERT INTO reservations (id, client_id, date, start, "end")
                   VALUES ('{}', '{client_id}', {s}, {s}, {e})"#,
                Ulid::new(),
            ))
            .await
            .unwrap();
    }

    let rows = data_rows(
        client
            .simple_query(&format!(
                r#"SELECT * FROM reservations WHERE start >= {} AND "end" <= {}"#,
                at(10),
                at(14)
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn viewer_is_read_only() {
    let addr = start_test_server().await;
    let admin = connect(addr, "ana", "s3cret").await;
    let viewer = connect(addr, "kiosk", "lobby").await;

    let client_id = seed_client(&admin).await;

    let err = viewer
        .batch_execute(&format!(
            r#"INSERT INTO reservations (id, client_id, date, start, "end")
               VALUES ('{}', '{client_id}', {d}, {s}, {e})"#,
            Ulid::new(),
            d = at(0),
            s = at(10),
            e = at(12),
        ))
        .await
        .unwrap_err();
    assert_eq!(
        err.as_db_error().unwrap().code(),
        &SqlState::INSUFFICIENT_PRIVILEGE
    );

    // Reads still work.
    let rows = data_rows(viewer.simple_query("SELECT * FROM clients").await.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(1), Some("María López"));
}

#[tokio::test]
async fn listen_is_accepted() {
    let addr = start_test_server().await;
    let client = connect(addr, "ana", "s3cret").await;
    client.batch_execute("LISTEN calendar").await.unwrap();
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let addr = start_test_server().await;
    let client = connect(addr, "ana", "s3cret").await;

    let id = Ulid::new().to_string();
    client
        .execute(
            "INSERT INTO clients (id, name) VALUES ($1, $2)",
            &[&id.as_str(), &"Carlos Pérez"],
        )
        .await
        .unwrap();

    let rows = data_rows(client.simple_query("SELECT * FROM clients").await.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some(id.as_str()));
}
