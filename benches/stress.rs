use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

use venued::auth::StaffDirectory;
use venued::engine::Engine;
use venued::notify::NotifyHub;
use venued::wire;

const HOUR: i64 = 3_600_000;
const DAY: i64 = 1_700_000_000_000;

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("venued_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(dir.join("venue.wal"), notify).unwrap());
    let directory = Arc::new(StaffDirectory::single_admin("venued".into()));

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

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("venue")
        .user("admin")
        .password("venued");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn seed_client(client: &tokio_postgres::Client) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO clients (id, name) VALUES ('{id}', 'bench client')"
        ))
        .await
        .unwrap();
    id
}

/// Phase 1: sequential creates on disjoint slots.
async fn phase1_sequential(addr: SocketAddr, client_id: Ulid, n: usize) {
    let client = connect(addr).await;
    let mut latencies = Vec::with_capacity(n);

    for i in 0..n {
        let start = DAY + (i as i64) * 2 * HOUR;
        let end = start + HOUR;
        let sql = format!(
            r#"INSERT INTO reservations (id, client_id, date, start, "end")
               VALUES ('{}', '{client_id}', {start}, {start}, {end})"#,
            Ulid::new(),
        );
        let t = Instant::now();
        client.batch_execute(&sql).await.unwrap();
        latencies.push(t.elapsed());
    }

    print_latency("sequential create", &mut latencies);
}

/// Phase 2: concurrent creates all targeting the same slot — exactly one
/// must win, the rest get slot conflicts.
async fn phase2_contention(addr: SocketAddr, client_id: Ulid, tasks: usize) {
    let slot_start = DAY + 10_000 * HOUR;
    let slot_end = slot_start + HOUR;

    let mut handles = Vec::with_capacity(tasks);
    for _ in 0..tasks {
        let handle = tokio::spawn({
            let sql = format!(
                r#"INSERT INTO reservations (id, client_id, date, start, "end")
                   VALUES ('{}', '{client_id}', {slot_start}, {slot_start}, {slot_end})"#,
                Ulid::new(),
            );
            async move {
                let client = connect(addr).await;
                let t = Instant::now();
                let result = client.batch_execute(&sql).await;
                (result.is_ok(), t.elapsed())
            }
        });
        handles.push(handle);
    }

    let mut winners = 0usize;
    let mut latencies = Vec::with_capacity(tasks);
    for handle in handles {
        let (won, latency) = handle.await.unwrap();
        if won {
            winners += 1;
        }
        latencies.push(latency);
    }

    assert_eq!(winners, 1, "exactly one concurrent create must win");
    println!("  contention: {tasks} tasks, 1 winner, {} conflicts", tasks - 1);
    print_latency("contended create", &mut latencies);
}

/// Phase 3: windowed list queries over the populated calendar.
async fn phase3_list(addr: SocketAddr, n: usize) {
    let client = connect(addr).await;
    let mut latencies = Vec::with_capacity(n);

    for i in 0..n {
        let start = DAY + (i as i64 % 100) * 20 * HOUR;
        let end = start + 50 * HOUR;
        let sql = format!(r#"SELECT * FROM reservations WHERE start >= {start} AND "end" <= {end}"#);
        let t = Instant::now();
        client.simple_query(&sql).await.unwrap();
        latencies.push(t.elapsed());
    }

    print_latency("windowed list", &mut latencies);
}

#[tokio::main]
async fn main() {
    let addr = start_server().await;
    let client = connect(addr).await;
    let client_id = seed_client(&client).await;

    println!("phase 1: sequential creates");
    phase1_sequential(addr, client_id, 500).await;

    println!("phase 2: contended creates");
    phase2_contention(addr, client_id, 32).await;

    println!("phase 3: windowed lists");
    phase3_list(addr, 200).await;
}
