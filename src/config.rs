use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const DEFAULT_MAX_BODY_BYTES: u64 = 5 * 1024 * 1024 * 1024;
/// Ten years.
const MAX_DURATION_SECS: u64 = 10 * 365 * 86_400;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root directory holding one subdirectory per pool.
    pub storage_dir: String,
    pub database_url: String,
    /// Live multipart sessions older than this are aborted by the GC.
    pub upload_ttl_secs: u64,
    pub gc_interval_secs: u64,
    /// Replaced blobs stay readable this long before the GC deletes them.
    pub blob_grace_secs: u64,
    /// Largest object or part body accepted.
    pub max_body_bytes: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Object storage gateway")]
pub struct Args {
    /// Host to bind to (overrides RGW_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RGW_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding the backend pools (overrides RGW_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides RGW_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Multipart session TTL in seconds (overrides RGW_UPLOAD_TTL_SECS)
    #[arg(long)]
    pub upload_ttl_secs: Option<u64>,

    /// Seconds between GC sweeps (overrides RGW_GC_INTERVAL_SECS)
    #[arg(long)]
    pub gc_interval_secs: Option<u64>,

    /// Seconds a replaced blob is kept for in-flight reads (overrides RGW_BLOB_GRACE_SECS)
    #[arg(long)]
    pub blob_grace_secs: Option<u64>,

    /// Request body limit in bytes (overrides RGW_MAX_BODY_BYTES)
    #[arg(long)]
    pub max_body_bytes: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over the environment, which wins over defaults.
    fn merge(args: Args) -> Result<Self> {
        let max_body_bytes = match args.max_body_bytes {
            Some(value) => value,
            None => env_or("RGW_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
        };

        let cfg = Self {
            host: args.host.unwrap_or_else(|| env_string("RGW_HOST", "0.0.0.0")),
            port: match args.port {
                Some(port) => port,
                None => env_or("RGW_PORT", 8080)?,
            },
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_string("RGW_STORAGE_DIR", "./data/pools")),
            database_url: args
                .database_url
                .unwrap_or_else(|| env_string("RGW_DATABASE_URL", "sqlite://./data/meta/rgw.db")),
            upload_ttl_secs: match args.upload_ttl_secs {
                Some(secs) => secs,
                None => env_or("RGW_UPLOAD_TTL_SECS", 86_400)?,
            },
            gc_interval_secs: match args.gc_interval_secs {
                Some(secs) => secs,
                None => env_or("RGW_GC_INTERVAL_SECS", 300)?,
            },
            blob_grace_secs: match args.blob_grace_secs {
                Some(secs) => secs,
                None => env_or("RGW_BLOB_GRACE_SECS", 300)?,
            },
            max_body_bytes,
        };

        if cfg.gc_interval_secs == 0 {
            anyhow::bail!("gc interval must be at least one second");
        }
        if cfg.upload_ttl_secs > MAX_DURATION_SECS {
            anyhow::bail!(
                "upload ttl of {}s exceeds the {MAX_DURATION_SECS}s maximum",
                cfg.upload_ttl_secs
            );
        }
        if cfg.blob_grace_secs > MAX_DURATION_SECS {
            anyhow::bail!(
                "blob grace of {}s exceeds the {MAX_DURATION_SECS}s maximum",
                cfg.blob_grace_secs
            );
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upload_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.upload_ttl_secs.min(MAX_DURATION_SECS) as i64)
    }

    pub fn blob_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.blob_grace_secs.min(MAX_DURATION_SECS) as i64)
    }

    /// Body limit for buffered request extractors.
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_body_bytes).unwrap_or(usize::MAX)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {key} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {key}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_win() {
        let args = Args::parse_from([
            "rgw-gateway",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--upload-ttl-secs",
            "60",
            "--gc-interval-secs",
            "5",
            "--max-body-bytes",
            "1024",
            "--blob-grace-secs",
            "30",
        ]);
        let cfg = AppConfig::merge(args).unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.upload_ttl(), chrono::Duration::seconds(60));
        assert_eq!(cfg.gc_interval(), Duration::from_secs(5));
        assert_eq!(cfg.max_body_bytes, 1024);
        assert_eq!(cfg.body_limit(), 1024);
        assert_eq!(cfg.blob_grace(), chrono::Duration::seconds(30));
    }

    #[test]
    fn zero_gc_interval_is_rejected() {
        let args = Args::parse_from(["rgw-gateway", "--gc-interval-secs", "0"]);
        assert!(AppConfig::merge(args).is_err());
    }

    #[test]
    fn migrate_flag_parses() {
        let args = Args::parse_from(["rgw-gateway", "--migrate"]);
        assert!(args.migrate);
    }
}
