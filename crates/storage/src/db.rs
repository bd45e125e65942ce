use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tally_core::{next_category_color, UserId, DEFAULT_CATEGORIES};
use tracing::debug;

pub type DbPool = Pool<Sqlite>;

/// Opens (creating if needed) the database file at `path` and migrates it.
pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = open(options).await?;
    debug!(path = %path.display(), "Opened database");
    Ok(pool)
}

/// A private in-memory database. Lives as long as the pool's single connection.
pub async fn create_in_memory() -> Result<DbPool, sqlx::Error> {
    open(SqliteConnectOptions::from_str("sqlite::memory:")?).await
}

async fn open(options: SqliteConnectOptions) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

pub(crate) async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expense_categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            color TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (user_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS income_sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (user_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            transaction_type TEXT NOT NULL,
            description TEXT NOT NULL,
            merchant TEXT,
            category_id INTEGER,
            income_source_id INTEGER,
            fingerprint TEXT,
            raw_category TEXT,
            account_name TEXT,
            account_number TEXT,
            institution_name TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (user_id, fingerprint),
            FOREIGN KEY (category_id) REFERENCES expense_categories(id) ON DELETE SET NULL,
            FOREIGN KEY (income_source_id) REFERENCES income_sources(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transaction_splits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id INTEGER NOT NULL,
            amount_cents INTEGER NOT NULL,
            category_id INTEGER,
            memo TEXT,
            FOREIGN KEY (transaction_id) REFERENCES transactions(id) ON DELETE CASCADE,
            FOREIGN KEY (category_id) REFERENCES expense_categories(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categorization_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            pattern TEXT NOT NULL,
            match_type TEXT NOT NULL,
            applies_to TEXT NOT NULL,
            category_id INTEGER,
            income_source_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (category_id) REFERENCES expense_categories(id) ON DELETE CASCADE,
            FOREIGN KEY (income_source_id) REFERENCES income_sources(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rules_lookup ON categorization_rules (user_id, match_type, pattern)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Gives a user the starter category set. Existing names are left alone.
pub async fn seed_default_categories(pool: &DbPool, user_id: UserId) -> Result<(), sqlx::Error> {
    let mut used: Vec<String> = sqlx::query_scalar(
        "SELECT color FROM expense_categories WHERE user_id = ? AND color IS NOT NULL",
    )
    .bind(user_id.0)
    .fetch_all(pool)
    .await?;

    for name in DEFAULT_CATEGORIES {
        let color = next_category_color(used.iter().map(String::as_str));
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO expense_categories (user_id, name, color) VALUES (?, ?, ?)",
        )
        .bind(user_id.0)
        .bind(*name)
        .bind(color)
        .execute(pool)
        .await?;

        if inserted.rows_affected() > 0 {
            used.push(color.to_string());
        }
    }

    Ok(())
}
