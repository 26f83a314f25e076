use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use timetabled::model::ResourceKey;
use timetabled::notify::NoticeKind;
use timetabled::tenant::TenantManager;
use timetabled::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("timetabled_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "timetabled".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user(user)
        .password("timetabled");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn setup_school(client: &tokio_postgres::Client) {
    for sql in [
        "INSERT INTO rooms (id, name, capacity) VALUES (1, 'B204', 30)",
        "INSERT INTO rooms (id, name, capacity) VALUES (2, 'B205', 30)",
        "INSERT INTO teachers (id, name) VALUES (1, 'Durand')",
        "INSERT INTO groups (id, name, capacity) VALUES (1, 'L2 info', 24)",
    ] {
        client.batch_execute(sql).await.unwrap();
    }
}

fn insert_booking(id: Ulid, room: i64, start: &str, end: &str) -> String {
    format!(
        r#"INSERT INTO bookings (id, subject_id, room_id, teacher_id, group_id, date, start, "end") VALUES ('{id}', 12, {room}, 1, 1, '2025-03-03', '{start}', '{end}')"#
    )
}

// ── Tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn commit_and_read_back() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "planner").await;
    setup_school(&client).await;

    let id = Ulid::new();
    client
        .batch_execute(&insert_booking(id, 1, "08:00", "10:00"))
        .await
        .unwrap();

    let found = rows(&client, &format!("SELECT * FROM bookings WHERE id = '{id}'")).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("status"), Some("scheduled"));
    assert_eq!(found[0].get("start"), Some("08:00"));
    assert_eq!(found[0].get("end"), Some("10:00"));

    let timetable = rows(
        &client,
        "SELECT * FROM bookings WHERE teacher_id = 1 AND date = '2025-03-03'",
    )
    .await;
    assert_eq!(timetable.len(), 1);

    let resources = rows(&client, "SELECT * FROM resources WHERE kind = 'room'").await;
    assert_eq!(resources.len(), 2);
    assert_eq!(resources[0].get("name"), Some("B204"));
    assert_eq!(resources[0].get("scheduled"), Some("1"));
}

#[tokio::test]
async fn conflict_is_an_exclusion_violation() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "planner").await;
    setup_school(&client).await;

    client
        .batch_execute(&insert_booking(Ulid::new(), 1, "08:00", "10:00"))
        .await
        .unwrap();

    // Different room, same teacher and group
    let err = client
        .batch_execute(&insert_booking(Ulid::new(), 2, "09:00", "11:00"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::EXCLUSION_VIOLATION));

    // Adjacent slot is fine
    client
        .batch_execute(&insert_booking(Ulid::new(), 1, "10:00", "12:00"))
        .await
        .unwrap();

    let conflicts = rows(
        &client,
        r#"SELECT * FROM conflicts WHERE room_id = 2 AND teacher_id = 1 AND group_id = 1 AND date = '2025-03-03' AND start = '09:00' AND "end" = '11:00'"#,
    )
    .await;
    assert!(!conflicts.is_empty());
    assert_eq!(conflicts[0].get("kind"), Some("teacher"));
}

#[tokio::test]
async fn parse_and_slot_errors_have_their_own_codes() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "planner").await;
    setup_school(&client).await;

    let err = client
        .batch_execute(&insert_booking(Ulid::new(), 1, "10:00", "08:00"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::INVALID_DATETIME_FORMAT));

    let err = client
        .batch_execute(&insert_booking(Ulid::new(), 9, "08:00", "10:00"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::FOREIGN_KEY_VIOLATION));

    let err = client
        .batch_execute("INSERT INTO timetables VALUES (1)")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::SYNTAX_ERROR));
}

#[tokio::test]
async fn reschedule_returns_replacement_and_records_author() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "planner").await;
    setup_school(&client).await;

    let id = Ulid::new();
    client
        .batch_execute(&insert_booking(id, 1, "08:00", "10:00"))
        .await
        .unwrap();

    let moved = rows(
        &client,
        &format!(
            r#"UPDATE bookings SET start = '14:00', "end" = '16:00', reason = 'jury' WHERE id = '{id}'"#
        ),
    )
    .await;
    assert_eq!(moved.len(), 1);
    let new_id = moved[0].get("id").unwrap().to_string();
    assert_ne!(new_id, id.to_string());
    assert_eq!(moved[0].get("supersedes"), Some(id.to_string().as_str()));

    let old = rows(&client, &format!("SELECT * FROM bookings WHERE id = '{id}'")).await;
    assert_eq!(old[0].get("status"), Some("superseded"));
    let new = rows(&client, &format!("SELECT * FROM bookings WHERE id = '{new_id}'")).await;
    assert_eq!(new[0].get("status"), Some("scheduled"));
    assert_eq!(new[0].get("start"), Some("14:00"));

    let history = rows(
        &client,
        &format!("SELECT * FROM adjustments WHERE booking_id = '{id}'"),
    )
    .await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].get("kind"), Some("reschedule"));
    assert_eq!(history[0].get("author"), Some("planner"));
    assert_eq!(history[0].get("reason"), Some("jury"));

    let by_author = rows(&client, "SELECT * FROM adjustments WHERE author = 'planner'").await;
    assert_eq!(by_author.len(), 1);

    // The old slot is free again
    client
        .batch_execute(&insert_booking(Ulid::new(), 1, "08:00", "10:00"))
        .await
        .unwrap();
}

#[tokio::test]
async fn availability_subtracts_bookings() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "planner").await;
    setup_school(&client).await;

    client
        .batch_execute(&insert_booking(Ulid::new(), 1, "10:00", "12:00"))
        .await
        .unwrap();

    let free = rows(
        &client,
        r#"SELECT * FROM availability WHERE room_id = 1 AND date = '2025-03-03' AND start >= '08:00' AND "end" <= '18:00'"#,
    )
    .await;
    let ranges: Vec<(&str, &str)> = free
        .iter()
        .map(|r| (r.get("start").unwrap(), r.get("end").unwrap()))
        .collect();
    assert_eq!(ranges, vec![("08:00", "10:00"), ("12:00", "18:00")]);
    assert_eq!(free[0].get("minutes"), Some("120"));
}

#[tokio::test]
async fn cancel_notifies_listeners_and_listen_checks_channel() {
    let (addr, tm) = start_test_server().await;
    let client = connect(addr, "planner").await;
    setup_school(&client).await;

    client.batch_execute("LISTEN room_1").await.unwrap();
    let err = client.batch_execute("LISTEN room_99").await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::FOREIGN_KEY_VIOLATION));

    let id = Ulid::new();
    client
        .batch_execute(&insert_booking(id, 1, "08:00", "10:00"))
        .await
        .unwrap();

    let mut rx = tm.notify_hub("test").unwrap().subscribe(ResourceKey::room(1));
    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'cancelled', reason = 'greve' WHERE id = '{id}'"
        ))
        .await
        .unwrap();

    let notice = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.kind, NoticeKind::BookingCancelled);
    assert_eq!(notice.booking_id, id);

    // Cancelling twice is a state error
    let err = client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::OBJECT_NOT_IN_PREREQUISITE_STATE));
}
