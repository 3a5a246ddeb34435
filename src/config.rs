//! Server configuration: CLI flags via `clap`, optionally layered with a
//! directive-style config file in the same line-oriented format the original
//! server used (`keyword arg [arg ...]`, `#` comments, blank lines skipped).

use std::fs;
use std::path::PathBuf;

use clap::Parser;

use crate::error::{RedisError, RedisResult};

#[derive(Debug, Parser)]
#[command(name = "redberry-server", about = "A RESP-compatible in-memory data server")]
pub struct Cli {
    /// Path to a directive-style config file. Unrecognized directives are
    /// ignored with a warning, never a hard failure.
    pub config_file: Option<PathBuf>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub bind: Option<String>,

    #[arg(long)]
    pub databases: Option<usize>,

    #[arg(long)]
    pub requirepass: Option<String>,

    #[arg(long, value_enum)]
    pub loglevel: Option<LogLevel>,

    #[arg(long)]
    pub logfile: Option<String>,

    #[arg(long)]
    pub maxclients: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub databases: usize,
    pub requirepass: Option<String>,
    pub loglevel: LogLevel,
    pub logfile: Option<String>,
    pub maxclients: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 6379,
            bind: "127.0.0.1".to_string(),
            databases: 16,
            requirepass: None,
            loglevel: LogLevel::Info,
            logfile: None,
            maxclients: 10_000,
        }
    }
}

impl Config {
    pub fn from_cli(cli: Cli) -> RedisResult<Config> {
        let mut cfg = Config::default();
        if let Some(path) = &cli.config_file {
            cfg.apply_file(path)?;
        }
        if let Some(v) = cli.port {
            cfg.port = v;
        }
        if let Some(v) = cli.bind {
            cfg.bind = v;
        }
        if let Some(v) = cli.databases {
            cfg.databases = v;
        }
        if let Some(v) = cli.requirepass {
            cfg.requirepass = Some(v);
        }
        if let Some(v) = cli.loglevel {
            cfg.loglevel = v;
        }
        if let Some(v) = cli.logfile {
            cfg.logfile = Some(v);
        }
        if let Some(v) = cli.maxclients {
            cfg.maxclients = v;
        }
        Ok(cfg)
    }

    fn apply_file(&mut self, path: &PathBuf) -> RedisResult<()> {
        let contents = fs::read_to_string(path)
            .map_err(|e| RedisError::Other(format!("can't open config file '{}': {}", path.display(), e)))?;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(directive) = parts.next() else { continue };
            let args: Vec<&str> = parts.collect();
            self.apply_directive(&directive.to_lowercase(), &args);
        }
        Ok(())
    }

    fn apply_directive(&mut self, directive: &str, args: &[&str]) {
        match directive {
            "port" => {
                if let Some(Ok(p)) = args.first().map(|a| a.parse()) {
                    self.port = p;
                }
            }
            "bind" => {
                if let Some(b) = args.first() {
                    self.bind = b.to_string();
                }
            }
            "databases" => {
                if let Some(Ok(n)) = args.first().map(|a| a.parse()) {
                    self.databases = n;
                }
            }
            "requirepass" => {
                self.requirepass = args.first().map(|s| s.to_string()).filter(|s| !s.is_empty());
            }
            "loglevel" => match args.first().copied() {
                Some("debug") => self.loglevel = LogLevel::Debug,
                Some("notice") | Some("info") => self.loglevel = LogLevel::Info,
                Some("warning") | Some("warn") => self.loglevel = LogLevel::Warn,
                Some("error") => self.loglevel = LogLevel::Error,
                _ => {}
            },
            "logfile" => {
                self.logfile = args.first().map(|s| s.to_string()).filter(|s| !s.is_empty());
            }
            "maxclients" => {
                if let Some(Ok(n)) = args.first().map(|a| a.parse()) {
                    self.maxclients = n;
                }
            }
            _ => {
                tracing::warn!(directive, "ignoring unrecognized config directive");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_directives_apply_before_cli_overrides() {
        let mut f = tempfile_with(b"port 7000\nbind 0.0.0.0\n# comment\n\nloglevel debug\n");
        let cli = Cli {
            config_file: Some(f.path().into()),
            port: Some(9999),
            bind: None,
            databases: None,
            requirepass: None,
            loglevel: None,
            logfile: None,
            maxclients: None,
        };
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.bind, "0.0.0.0");
        assert_eq!(cfg.loglevel, LogLevel::Debug);
        f.flush().ok();
    }

    fn tempfile_with(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        f
    }
}
