use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use walkworthy_scan::Scanner;
use walkworthy_scan::config::ScanConfig;
use walkworthy_scan::secrets::PgSecretStore;
use walkworthy_scan::store::{PgKvStore, ScanRepository};

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    let rendered = serde_json::to_string_pretty(&err).unwrap_or_else(|_| err.to_string());
    eprintln!("{rendered}");
    std::process::exit(1);
}

/// Pretty JSON on stdout. Returns the process exit code.
pub fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(body) => {
            println!("{body}");
            0
        }
        Err(e) => exit_error(&format!("Failed to render output: {e}"), None),
    }
}

pub async fn connect(database_url: &str) -> PgPool {
    let pool = match PgPoolOptions::new()
        .max_connections(4)
        .connect(database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => exit_error(
            &format!("Failed to connect to database: {e}"),
            Some("Set --database-url or DATABASE_URL"),
        ),
    };
    if let Err(e) = sqlx::migrate!("../migrations").run(&pool).await {
        exit_error(&format!("Failed to run migrations: {e}"), None);
    }
    pool
}

pub fn repository(pool: &PgPool) -> ScanRepository {
    ScanRepository::new(Arc::new(PgKvStore::new(pool.clone())))
}

pub async fn scanner(pool: &PgPool) -> Scanner {
    let config = match ScanConfig::from_env() {
        Ok(config) => config,
        Err(e) => exit_error(&format!("Invalid scan configuration: {e}"), None),
    };
    match Scanner::from_config(
        &config,
        Arc::new(PgKvStore::new(pool.clone())),
        Arc::new(PgSecretStore::new(pool.clone())),
        reqwest::Client::new(),
    )
    .await
    {
        Ok(scanner) => scanner,
        Err(e) => exit_error(
            &format!("Failed to build scan pipeline: {e}"),
            Some("Check OPENAI_API_KEY or OPENAI_API_KEY_SECRET_REF"),
        ),
    }
}
