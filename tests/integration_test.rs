use std::sync::Arc;
use std::time::Duration;

use livedb::{Config, Connection, Database, Message, PathSegment};
use serde_json::json;

/// Long enough for a re-run sub-query to deliver its rows.
const TIMEOUT: Duration = Duration::from_secs(5);

fn blog_db() -> Arc<Database> {
    let db = Database::open(Config::default()).unwrap();
    for statement in [
        "CREATE TABLE blog_posts (id string PRIMARY KEY, title string)",
        "CREATE TABLE comments (id string PRIMARY KEY, post_id string REFERENCES blog_posts, body string)",
        "INSERT INTO blog_posts {id: \"0\", title: \"hello\"}",
        "INSERT INTO blog_posts {id: \"1\", title: \"world\"}",
        "INSERT INTO comments {id: \"0\", post_id: \"0\", body: \"first\"}",
        "INSERT INTO comments {id: \"1\", post_id: \"1\", body: \"second\"}",
        "INSERT INTO comments {id: \"2\", post_id: \"1\", body: \"third\"}",
    ] {
        if let Err(e) = db.execute(statement) {
            panic!("{statement}: {e:#}");
        }
    }
    db
}

fn recv(conn: &Connection) -> Message {
    match conn.messages().recv_timeout(TIMEOUT) {
        Ok(m) => m,
        Err(e) => panic!("no message: {e}"),
    }
}

/// Waits for every table actor to catch up, then checks nothing more was sent.
fn assert_no_message(db: &Database, conn: &Connection) {
    db.sync().unwrap();
    if let Ok(m) = conn.messages().recv_timeout(Duration::from_millis(100)) {
        panic!("unexpected message {m:?}");
    }
}

fn live(conn: &mut Connection, query: &str) -> u64 {
    let channel = conn.execute(query);
    match recv(conn) {
        Message::Result { channel: c, .. } if c == channel => channel,
        m => panic!("expected the result of {query}, got {m:?}"),
    }
}

#[test]
fn test_nested_query() {
    let db = blog_db();
    let result = db
        .execute("MANY blog_posts { id, title, comments: MANY comments { id, body } }")
        .unwrap();
    assert_eq!(
        result,
        json!([
            {"id": "0", "title": "hello", "comments": [{"id": "0", "body": "first"}]},
            {"id": "1", "title": "world", "comments": [
                {"id": "1", "body": "second"},
                {"id": "2", "body": "third"},
            ]},
        ])
    );
    assert_eq!(
        db.execute("MANY comments WHERE post_id = \"1\" { body, post: ONE blog_posts { title } }")
            .unwrap(),
        json!([
            {"body": "second", "post": {"title": "world"}},
            {"body": "third", "post": {"title": "world"}},
        ])
    );
}

#[test]
fn test_insert_notifies_whole_table_listener() {
    let db = blog_db();
    let mut conn = db.connect();
    let channel = live(&mut conn, "LIVE MANY blog_posts { id, title }");
    db.execute("INSERT INTO blog_posts {id: \"2\", title: \"new\"}").unwrap();
    assert_eq!(
        recv(&conn),
        Message::TableUpdate {
            channel,
            path: vec![],
            data: json!({"id": "2", "title": "new"}),
        }
    );
    assert_no_message(&db, &conn);
}

#[test]
fn test_insert_not_matching_filter_is_ignored() {
    let db = blog_db();
    let mut conn = db.connect();
    let channel = live(&mut conn, "LIVE MANY blog_posts WHERE title = \"x\" { id }");
    db.execute("INSERT INTO blog_posts {id: \"2\", title: \"y\"}").unwrap();
    assert_no_message(&db, &conn);
    db.execute("INSERT INTO blog_posts {id: \"3\", title: \"x\"}").unwrap();
    assert_eq!(
        recv(&conn),
        Message::TableUpdate {
            channel,
            path: vec![],
            data: json!({"id": "3"}),
        }
    );
}

#[test]
fn test_delete_sends_nothing_and_keeps_listeners() {
    let db = blog_db();
    let mut conn = db.connect();
    let channel = live(&mut conn, "LIVE MANY blog_posts { id, title }");
    assert_eq!(
        db.execute("DELETE FROM blog_posts WHERE id = \"1\"").unwrap(),
        json!({"deleted": 1})
    );
    assert_no_message(&db, &conn);
    db.execute("INSERT INTO blog_posts {id: \"2\", title: \"after\"}").unwrap();
    assert_eq!(
        recv(&conn),
        Message::TableUpdate {
            channel,
            path: vec![],
            data: json!({"id": "2", "title": "after"}),
        }
    );
    db.execute("UPDATE blog_posts SET title = \"still here\" WHERE id = \"0\"").unwrap();
    assert!(matches!(recv(&conn), Message::RecordUpdate { channel: c, .. } if c == channel));
    assert_no_message(&db, &conn);
}

#[test]
fn test_update_notifies_record_listener() {
    let db = blog_db();
    let mut conn = db.connect();
    let channel = live(&mut conn, "LIVE MANY blog_posts WHERE id = \"0\" { id, title }");
    db.execute("UPDATE blog_posts SET title = \"changed\" WHERE id = \"1\"").unwrap();
    assert_no_message(&db, &conn);
    db.execute("UPDATE blog_posts SET title = \"changed\" WHERE id = \"0\"").unwrap();
    assert_eq!(
        recv(&conn),
        Message::RecordUpdate {
            channel,
            path: vec![PathSegment::Row(json!("0"))],
            old: json!({"id": "0", "title": "hello"}),
            new: json!({"id": "0", "title": "changed"}),
        }
    );
    assert_no_message(&db, &conn);
}

#[test]
fn test_nested_insert_reaches_nested_path() {
    let db = blog_db();
    let mut conn = db.connect();
    let channel = live(&mut conn, "LIVE MANY blog_posts { id, comments: MANY comments { id, body } }");
    db.execute("INSERT INTO comments {id: \"3\", post_id: \"0\", body: \"late\"}").unwrap();
    let m = recv(&conn);
    assert_eq!(
        m,
        Message::TableUpdate {
            channel,
            path: vec![
                PathSegment::Row(json!("0")),
                PathSegment::Selection("comments".to_string()),
            ],
            data: json!({"id": "3", "body": "late"}),
        }
    );
    assert_eq!(
        serde_json::to_value(&m).unwrap(),
        json!({
            "type": "table_update",
            "channel": channel,
            "path": [{"row": "0"}, {"selection": "comments"}],
            "data": {"id": "3", "body": "late"},
        })
    );
    assert_no_message(&db, &conn);

    // The new comment is watched like the ones the query first returned.
    db.execute("UPDATE comments SET body = \"edited\" WHERE id = \"3\"").unwrap();
    match recv(&conn) {
        Message::RecordUpdate { path, new, .. } => {
            assert_eq!(
                path,
                vec![
                    PathSegment::Row(json!("0")),
                    PathSegment::Selection("comments".to_string()),
                    PathSegment::Row(json!("3")),
                ]
            );
            assert_eq!(new["body"], json!("edited"));
        }
        m => panic!("unexpected message {m:?}"),
    }
}

#[test]
fn test_dropping_connection_removes_listeners() {
    let db = blog_db();
    let mut conn = db.connect();
    live(&mut conn, "LIVE MANY blog_posts { id, comments: MANY comments { id } }");
    db.sync().unwrap();
    assert!(db.listener_count("blog_posts") > 0);
    assert!(db.listener_count("comments") > 0);
    drop(conn);
    db.sync().unwrap();
    assert_eq!(db.listener_count("blog_posts"), 0);
    assert_eq!(db.listener_count("comments"), 0);
}

#[test]
fn test_closing_channel_stops_updates() {
    let db = blog_db();
    let mut conn = db.connect();
    let closed = live(&mut conn, "LIVE MANY blog_posts { id }");
    let open = live(&mut conn, "LIVE MANY blog_posts { title }");
    conn.close_channel(closed);
    db.execute("INSERT INTO blog_posts {id: \"2\", title: \"new\"}").unwrap();
    assert_eq!(
        recv(&conn),
        Message::TableUpdate {
            channel: open,
            path: vec![],
            data: json!({"title": "new"}),
        }
    );
    assert_no_message(&db, &conn);
}

#[test]
fn test_parse_error_is_reported_on_its_channel() {
    let db = blog_db();
    let mut conn = db.connect();
    let bad = conn.execute("LIVE MANY blog_posts {");
    match recv(&conn) {
        Message::Error { channel, message } => {
            assert_eq!(channel, bad);
            assert!(message.contains("Syntax error"), "{message}");
        }
        m => panic!("unexpected message {m:?}"),
    }
    let good = conn.execute("ONE blog_posts WHERE id = \"1\" { title }");
    assert_eq!(
        recv(&conn),
        Message::Result {
            channel: good,
            data: json!({"title": "world"}),
        }
    );
    let missing = conn.execute("MANY nope { id }");
    assert!(matches!(recv(&conn), Message::Error { channel, .. } if channel == missing));
}

#[test]
fn test_catalog_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        path: Some(dir.path().join("blog.redb")),
        ..Config::default()
    };
    {
        let db = Database::open(config.clone()).unwrap();
        db.execute("CREATE TABLE users (id int PRIMARY KEY, name string)").unwrap();
        db.execute("INSERT INTO users {id: 1, name: \"ann\"}").unwrap();
    }
    let db = Database::open(config).unwrap();
    assert_eq!(db.execute("MANY users { id, name }").unwrap(), json!([{"id": 1, "name": "ann"}]));
    assert!(db
        .execute("CREATE TABLE users (id int PRIMARY KEY)")
        .is_err());
}
