pub mod migrations;
pub mod queries;

use std::time::Duration;

use anyhow::Context;
use rusqlite::Connection;

/// Opens (or creates) the booking database and brings its schema up to date.
/// `:memory:` gives a private throwaway database, which the tests rely on.
pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = match path {
        ":memory:" => Connection::open_in_memory(),
        _ => Connection::open(path),
    }
    .with_context(|| format!("failed to open database at {path}"))?;

    conn.busy_timeout(Duration::from_secs(5))
        .context("failed to set busy timeout")?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}
