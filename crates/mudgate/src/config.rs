use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use mudio::ansi::AnsiMode;
use mudio::decoder::DecoderConfig;

pub fn usage_and_exit() -> ! {
    eprintln!(
        "mudgate (session gateway)\n\n\
USAGE:\n  mudgate [--bind HOST:PORT] [--accounts PATH] [--ansi raw|interpret|strip|mono]\n\n\
ENV:\n  MUDGATE_BIND                default 0.0.0.0:4000\n  MUDGATE_ACCOUNTS_PATH       default accounts.json\n  MUDGATE_ANSI_MODE           default interpret (raw | interpret | strip | mono)\n  MUDGATE_MAX_PENDING_BYTES   default 64 (longest escape/negotiation sequence kept)\n  MUDGATE_MAX_LINE_BYTES      default 4096\n  MUDGATE_HISTORY_LINES       default 50\n  MUDGATE_MAX_LOGIN_ATTEMPTS  default 3\n  MUDGATE_SHUTDOWN_DEFAULT_S  default 60 (@shutdown without an argument)\n  RUST_LOG                    default info,mudgate=info\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind: SocketAddr,
    // Accounts DB (stores only password hashes, never raw passwords).
    pub accounts_path: PathBuf,
    pub ansi: AnsiMode,
    pub max_pending_bytes: usize,
    pub max_line_bytes: usize,
    pub history_lines: usize,
    pub max_login_attempts: u32,
    pub shutdown_default: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 4000)),
            accounts_path: PathBuf::from("accounts.json"),
            ansi: AnsiMode::default(),
            max_pending_bytes: 64,
            max_line_bytes: 4 * 1024,
            history_lines: 50,
            max_login_attempts: 3,
            shutdown_default: Duration::from_secs(60),
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, String> {
    match env(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| format!("invalid {key}: {v:?}")),
    }
}

fn positive(key: &str, v: usize) -> Result<usize, String> {
    if v == 0 {
        return Err(format!("{key} must be at least 1"));
    }
    Ok(v)
}

impl Config {
    /// Environment first, then command-line flags on top.
    pub fn from_sources(
        env: impl Fn(&str) -> Option<String>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, String> {
        let d = Self::default();
        let mut cfg = Self {
            bind: parse_env(&env, "MUDGATE_BIND", d.bind)?,
            accounts_path: env("MUDGATE_ACCOUNTS_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(d.accounts_path),
            ansi: parse_env(&env, "MUDGATE_ANSI_MODE", d.ansi)?,
            max_pending_bytes: positive(
                "MUDGATE_MAX_PENDING_BYTES",
                parse_env(&env, "MUDGATE_MAX_PENDING_BYTES", d.max_pending_bytes)?,
            )?,
            max_line_bytes: positive(
                "MUDGATE_MAX_LINE_BYTES",
                parse_env(&env, "MUDGATE_MAX_LINE_BYTES", d.max_line_bytes)?,
            )?,
            history_lines: positive(
                "MUDGATE_HISTORY_LINES",
                parse_env(&env, "MUDGATE_HISTORY_LINES", d.history_lines)?,
            )?,
            max_login_attempts: parse_env(
                &env,
                "MUDGATE_MAX_LOGIN_ATTEMPTS",
                d.max_login_attempts,
            )?
            .max(1),
            shutdown_default: Duration::from_secs(parse_env(
                &env,
                "MUDGATE_SHUTDOWN_DEFAULT_S",
                d.shutdown_default.as_secs(),
            )?),
        };

        let mut it = args.into_iter();
        while let Some(arg) = it.next() {
            let mut value = |flag: &str| it.next().ok_or_else(|| format!("{flag} needs a value"));
            match arg.as_str() {
                "--bind" => {
                    let v = value("--bind")?;
                    cfg.bind = v.parse().map_err(|_| format!("invalid --bind: {v:?}"))?;
                }
                "--accounts" => cfg.accounts_path = value("--accounts")?.into(),
                "--ansi" => {
                    let v = value("--ansi")?;
                    cfg.ansi = v.parse().map_err(|_| format!("invalid --ansi: {v:?}"))?;
                }
                "-h" | "--help" => return Err(String::new()),
                other => return Err(format!("unknown argument: {other}")),
            }
        }
        Ok(cfg)
    }

    pub fn decoder(&self) -> DecoderConfig {
        DecoderConfig {
            ansi: self.ansi,
            max_pending: self.max_pending_bytes,
            max_line: self.max_line_bytes,
        }
    }
}

pub fn parse_args() -> Config {
    Config::from_sources(|k| std::env::var(k).ok(), std::env::args().skip(1)).unwrap_or_else(
        |e| {
            if !e.is_empty() {
                eprintln!("{e}\n");
            }
            usage_and_exit()
        },
    )
}
