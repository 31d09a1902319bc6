// Runtime configuration
// Read from the process environment, with a `.env` file loaded first when present.

use std::env;
use std::path::PathBuf;

pub const DEFAULT_DATABASE_PATH: &str = "budget.db";
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Bind address for the HTTP API (server feature only)
    pub server_addr: String,
}

impl Config {
    /// Load `.env` (if any) and build the config from environment variables.
    ///
    /// - `DATABASE_URL`: path to the SQLite file, `sqlite://` prefix accepted
    /// - `BUDGET_SERVER_ADDR`: host:port for the API server
    pub fn from_env() -> Self {
        // Missing .env is the normal case in production
        let _ = dotenv::dotenv();

        Self::from_vars(
            env::var("DATABASE_URL").ok(),
            env::var("BUDGET_SERVER_ADDR").ok(),
        )
    }

    fn from_vars(database_url: Option<String>, server_addr: Option<String>) -> Self {
        let database_path = database_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .map(|url| database_path_from_url(&url))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));

        let server_addr = server_addr
            .map(|addr| addr.trim().to_string())
            .filter(|addr| !addr.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string());

        Config {
            database_path,
            server_addr,
        }
    }

    /// Override the database path (CLI `--db` flag)
    pub fn with_database_path(mut self, path: PathBuf) -> Self {
        self.database_path = path;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_vars(None, None)
    }
}

fn database_path_from_url(url: &str) -> PathBuf {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    PathBuf::from(path)
}
