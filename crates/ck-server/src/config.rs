use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use ck_types::models::DEFAULT_FOUNDERS;

const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

#[derive(Parser, Debug)]
#[command(author, version, about = "Club membership and presence server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Re-hash stored passwords that are not Argon2 hashes yet
    HashPasswords,
    /// Print a user's id, status and explicit roles
    CheckAdmin {
        username: String,
    },
    /// Open the database and print table counts
    CheckDb,
}

/// Every setting can come from the command line, the environment or `.env`.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "CK_HOST", default_value = "0.0.0.0", global = true)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "CK_PORT", default_value_t = 3000, global = true)]
    pub port: u16,

    /// SQLite database path
    #[arg(long, env = "CK_DB_PATH", default_value = "ck.db", global = true)]
    pub db_path: PathBuf,

    /// Directory for uploaded attachments
    #[arg(long, env = "CK_UPLOAD_DIR", default_value = "./uploads", global = true)]
    pub upload_dir: PathBuf,

    /// Usernames allowed to register as founders (comma separated)
    #[arg(
        long,
        env = "CK_FOUNDERS",
        value_delimiter = ',',
        default_values_t = DEFAULT_FOUNDERS.map(String::from),
        global = true
    )]
    pub founders: Vec<String>,

    /// Username granted the super-admin role at startup
    #[arg(long, env = "CK_SUPERADMIN", global = true)]
    pub superadmin: Option<String>,

    /// How long a user stays online after their last ping
    #[arg(
        long,
        env = "CK_PRESENCE_TIMEOUT_MS",
        default_value_t = 45_000,
        value_parser = clap::value_parser!(u32).range(1..),
        global = true
    )]
    pub presence_timeout_ms: u32,

    /// Absolute lifetime of a login session, at most a year
    #[arg(
        long,
        env = "CK_SESSION_TTL_HOURS",
        default_value_t = 24,
        value_parser = clap::value_parser!(u32).range(1..=MAX_SESSION_TTL_HOURS),
        global = true
    )]
    pub session_ttl_hours: u32,

    /// Browser origins allowed to call the API with credentials (comma separated)
    #[arg(
        long,
        env = "CK_CORS_ORIGINS",
        value_delimiter = ',',
        default_values_t = [
            "http://localhost:3000".to_string(),
            "http://localhost:5173".to_string(),
            "http://127.0.0.1:5173".to_string(),
        ],
        global = true
    )]
    pub cors_origins: Vec<String>,

    /// Only send the session cookie over HTTPS
    #[arg(long, env = "CK_SECURE_COOKIES", global = true)]
    pub secure_cookies: bool,
}

impl Config {
    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn presence_timeout_ms(&self) -> i64 {
        i64::from(self.presence_timeout_ms)
    }

    pub fn session_ttl_ms(&self) -> i64 {
        i64::from(self.session_ttl_hours) * 60 * 60 * 1000
    }

    /// Founders list with blanks dropped and whitespace trimmed.
    pub fn founders(&self) -> Vec<String> {
        self.founders
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["ck"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config.port, 3000);
        assert_eq!(
            cli.config.presence_timeout_ms(),
            ck_presence::tracker::DEFAULT_PRESENCE_TIMEOUT_MS
        );
        assert_eq!(cli.config.session_ttl_ms(), 86_400_000);
        assert_eq!(cli.config.founders(), vec!["Simon Gábor", "Nagy Márk a. Burschazam"]);
    }

    #[test]
    fn subcommands_and_lists() {
        let cli = Cli::try_parse_from([
            "ck",
            "check-admin",
            "root",
            "--founders",
            "A, B ,",
            "--port",
            "8080",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Some(Command::CheckAdmin {
                username: "root".into()
            })
        );
        assert_eq!(cli.config.founders(), vec!["A", "B"]);
        assert_eq!(cli.config.addr().unwrap().port(), 8080);
    }

    #[test]
    fn durations_must_be_positive_and_bounded() {
        for args in [
            ["ck", "--presence-timeout-ms", "-5"],
            ["ck", "--presence-timeout-ms", "0"],
            ["ck", "--session-ttl-hours", "0"],
            ["ck", "--session-ttl-hours", "-1"],
            ["ck", "--session-ttl-hours", "100000"],
        ] {
            assert!(Cli::try_parse_from(args).is_err(), "{:?}", args);
        }

        let cli = Cli::try_parse_from(["ck", "--session-ttl-hours", "8760"]).unwrap();
        assert_eq!(cli.config.session_ttl_ms(), 8760 * 3_600_000);
    }
}
