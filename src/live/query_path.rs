//! Addresses of positions within a nested query result.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    /// A named nested selection of the enclosing row.
    Selection(String),
    /// A row, identified by its primary key.
    Row(JsonValue),
}

#[derive(Debug)]
struct Node {
    segment: PathSegment,
    parent: QueryPath,
}

/// A path from the root of a result, stored leaf first so that extending it shares the
/// parent.
#[derive(Debug, Clone, Default)]
pub struct QueryPath(Option<Arc<Node>>);

impl QueryPath {
    pub fn root() -> Self {
        QueryPath(None)
    }

    fn push(&self, segment: PathSegment) -> Self {
        QueryPath(Some(Arc::new(Node {
            segment,
            parent: self.clone(),
        })))
    }

    pub fn selection(&self, name: &str) -> Self {
        self.push(PathSegment::Selection(name.to_string()))
    }

    pub fn row(&self, key: JsonValue) -> Self {
        self.push(PathSegment::Row(key))
    }

    /// returns the segments from the root to the leaf.
    pub fn flatten(&self) -> Vec<PathSegment> {
        let mut out = vec![];
        let mut cur = &self.0;
        while let Some(node) = cur {
            out.push(node.segment.clone());
            cur = &node.parent.0;
        }
        out.reverse();
        out
    }
}

#[test]
fn test_flatten() {
    let root = QueryPath::root();
    assert!(root.flatten().is_empty());
    let comments = root.row(JsonValue::from("0")).selection("comments");
    let a = comments.row(JsonValue::from("a"));
    let b = comments.row(JsonValue::from("b"));
    assert_eq!(
        a.flatten(),
        vec![
            PathSegment::Row(JsonValue::from("0")),
            PathSegment::Selection("comments".to_string()),
            PathSegment::Row(JsonValue::from("a")),
        ]
    );
    assert_eq!(b.flatten().len(), 3);
    assert_eq!(comments.flatten().len(), 2);
}

#[test]
fn test_serialize_segments() {
    let path = QueryPath::root().row(JsonValue::from(1)).selection("comments");
    assert_eq!(
        serde_json::to_value(path.flatten()).unwrap(),
        serde_json::json!([{"row": 1}, {"selection": "comments"}])
    );
}
