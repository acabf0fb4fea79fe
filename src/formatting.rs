//! formatting prints out results nicely.
//!
//! An array of flat objects prints as a table with one column per key.  Anything else prints as
//! JSON.

use itertools::Itertools;
use serde_json::Value as JsonValue;

use crate::live::{Message, PathSegment};

/// Width every table cell is padded to.
const CELL_WIDTH: usize = 15;

pub fn format_message(m: &Message) -> String {
    match m {
        Message::Result { channel, data } => format!("[{channel}] result\n{}", format_data(data)),
        Message::TableUpdate {
            channel,
            path,
            data,
        } => format!(
            "[{channel}] table_update at {}\n{}",
            format_path(path),
            format_data(data)
        ),
        Message::RecordUpdate {
            channel,
            path,
            old,
            new,
        } => format!(
            "[{channel}] record_update at {}\n  old: {old}\n  new: {new}",
            format_path(path)
        ),
        Message::Error { channel, message } => format!("[{channel}] error: {message}"),
    }
}

pub fn format_path(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.iter()
        .map(|s| match s {
            PathSegment::Selection(name) => format!("/{name}"),
            PathSegment::Row(JsonValue::String(key)) => format!("/[{key}]"),
            PathSegment::Row(key) => format!("/[{key}]"),
        })
        .join("")
}

/// formats rows as a table when every row is an object with the same keys and no nested
/// values.
pub fn format_data(data: &JsonValue) -> String {
    match as_table(data) {
        Some((columns, rows)) => format_table(&columns, &rows),
        None => serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string()),
    }
}

fn as_table(data: &JsonValue) -> Option<(Vec<&str>, Vec<Vec<&JsonValue>>)> {
    let rows = data.as_array()?;
    let first = rows.first()?.as_object()?;
    let columns: Vec<&str> = first.keys().map(|k| k.as_str()).collect();
    let mut out = vec![];
    for row in rows {
        let row = row.as_object()?;
        if row.len() != columns.len() {
            return None;
        }
        let cells = columns
            .iter()
            .map(|c| row.get(*c).filter(|v| !v.is_array() && !v.is_object()))
            .collect::<Option<Vec<_>>>()?;
        out.push(cells);
    }
    Some((columns, out))
}

fn format_table(columns: &[&str], rows: &[Vec<&JsonValue>]) -> String {
    let mut lines = vec![format!(
        "| {} |",
        columns.iter().map(|c| format!("{:width$}", c, width = CELL_WIDTH)).join(" | ")
    )];
    for row in rows {
        lines.push(format!(
            "| {} |",
            row.iter().map(|v| format!("{:width$}", cell(v), width = CELL_WIDTH)).join(" | ")
        ));
    }
    lines.join("\n")
}

fn cell(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        v => v.to_string(),
    }
}

#[test]
fn test_format_data() {
    use serde_json::json;
    struct Case {
        data: JsonValue,
        expected: &'static str,
    }
    let cases = vec![
        Case {
            data: json!([{"id": "0", "n": 1}, {"id": "1", "n": 22}]),
            expected: "| id              | n               |\n| 0               | 1               |\n| 1               | 22              |",
        },
        Case {
            data: json!([{"id": "0", "c": []}]),
            expected: "[\n  {\n    \"c\": [],\n    \"id\": \"0\"\n  }\n]",
        },
        Case {
            data: json!([]),
            expected: "[]",
        },
        Case {
            data: json!(3),
            expected: "3",
        },
    ];
    for case in cases {
        println!("Case: {}", case.data);
        assert_eq!(format_data(&case.data), case.expected);
    }
}

#[test]
fn test_format_message() {
    use serde_json::json;
    let m = Message::RecordUpdate {
        channel: 2,
        path: vec![
            PathSegment::Row(json!("0")),
            PathSegment::Selection("comments".to_string()),
            PathSegment::Row(json!(5)),
        ],
        old: json!({"id": 5}),
        new: json!({"id": 6}),
    };
    assert_eq!(
        format_message(&m),
        "[2] record_update at /[0]/comments/[5]\n  old: {\"id\":5}\n  new: {\"id\":6}"
    );
    let m = Message::Error {
        channel: 1,
        message: "no such table: t".to_string(),
    };
    assert_eq!(format_message(&m), "[1] error: no such table: t");
}
