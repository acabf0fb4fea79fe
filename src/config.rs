//! Settings for opening a database.

use std::path::PathBuf;

use anyhow::Context;

/// Inbox capacity of each table actor when none is configured.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The database file.  `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// How many messages a table actor's inbox holds before senders block.
    pub inbox_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            path: None,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

impl Config {
    /// reads `LIVEDB_PATH` and `LIVEDB_INBOX_CAPACITY`, using defaults for unset variables.
    pub fn from_env() -> anyhow::Result<Config> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let mut config = Config::default();
        if let Some(path) = var("LIVEDB_PATH").filter(|p| !p.is_empty()) {
            config.path = Some(PathBuf::from(path));
        }
        if let Some(capacity) = var("LIVEDB_INBOX_CAPACITY") {
            config.inbox_capacity = capacity
                .parse()
                .with_context(|| format!("LIVEDB_INBOX_CAPACITY must be a number, not {capacity:?}"))?;
            anyhow::ensure!(config.inbox_capacity > 0, "LIVEDB_INBOX_CAPACITY must be positive");
        }
        Ok(config)
    }
}

#[test]
fn test_config_from_vars() {
    struct Case {
        vars: Vec<(&'static str, &'static str)>,
        expected: Option<Config>,
    }
    let cases = vec![
        Case {
            vars: vec![],
            expected: Some(Config::default()),
        },
        Case {
            vars: vec![("LIVEDB_PATH", "/tmp/x.redb"), ("LIVEDB_INBOX_CAPACITY", "8")],
            expected: Some(Config {
                path: Some(PathBuf::from("/tmp/x.redb")),
                inbox_capacity: 8,
            }),
        },
        Case {
            vars: vec![("LIVEDB_PATH", "")],
            expected: Some(Config::default()),
        },
        Case {
            vars: vec![("LIVEDB_INBOX_CAPACITY", "many")],
            expected: None,
        },
        Case {
            vars: vec![("LIVEDB_INBOX_CAPACITY", "0")],
            expected: None,
        },
    ];
    for case in cases {
        println!("Case: {:?}", case.vars);
        let vars = case.vars.clone();
        let lookup = move |name: &str| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        };
        assert_eq!(Config::from_vars(lookup).ok(), case.expected);
    }
}
