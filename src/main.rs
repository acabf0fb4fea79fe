//! A line-at-a-time shell over an embedded database.
//!
//! Each line is one statement.  Results and live updates are printed as they arrive.

use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use livedb::formatting::format_message;
use livedb::{Config, Database};
use tracing_subscriber::EnvFilter;

/// How long to wait for updates triggered by a statement before reading the next one.
const SETTLE: Duration = Duration::from_millis(50);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    let db = Database::open(config.clone()).context("opening the database")?;
    match &config.path {
        Some(path) => println!("livedb: {}", path.display()),
        None => println!("livedb: in memory"),
    }
    let mut conn = db.connect();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        conn.execute(line);
        while let Ok(m) = conn.messages().recv_timeout(SETTLE) {
            println!("{}", format_message(&m));
        }
    }
    Ok(())
}
