use std::net::SocketAddr;
use std::time::Duration;

use hearth_store::StoreConfig;

pub fn usage_and_exit() -> ! {
    eprintln!(
        "hearth (world engine)\n\n\
USAGE:\n  hearth [--bind HOST:PORT] [--db-url URL]\n\n\
ENV:\n  HEARTH_BIND                 default 0.0.0.0:4000\n  HEARTH_DB_URL               default http://127.0.0.1:8529\n  HEARTH_DB_NAME              default hearth\n  HEARTH_DB_USER              default root\n  HEARTH_DB_PASSWORD          default empty\n  HEARTH_TICK_HZ              default 10\n  HEARTH_TOKEN_MARGIN_S       default 120 (reconnect this long before token expiry)\n  HEARTH_TOKEN_POLL_S         default 5\n  HEARTH_SESSION_INPUT_MS     default 100\n  HEARTH_SIMULATION_MS        default 250\n  HEARTH_INPUT_MODE           default direct (direct | queued)\n  HEARTH_CONSOLE_MIN_LEVEL    default 4 (developer)\n  HEARTH_CURSOR_BATCH         default 100\n  NODE_ID                     optional (for logs only)\n"
    );
    std::process::exit(2);
}

/// Where typed lines go first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    /// Straight into the connection's parser stack.
    Direct,
    /// Appended to the session document's `input`; the session-input task
    /// drains it and routes it back to the connection.
    Queued,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind: SocketAddr,
    pub db_url: String,
    pub store: StoreConfig,
    pub tick_hz: u32,
    pub session_input_interval: Duration,
    pub simulation_interval: Duration,
    pub input_mode: InputMode,
    pub console_min_level: i64,
    pub node_id: Option<String>,
}

fn parsed<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, String> {
    match env(key) {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| format!("{key}: cannot parse {v:?}")),
    }
}

impl Config {
    pub fn from_sources(
        env: impl Fn(&str) -> Option<String>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, String> {
        let mut bind: SocketAddr = parsed(&env, "HEARTH_BIND", SocketAddr::from(([0, 0, 0, 0], 4000)))?;
        let mut db_url = env("HEARTH_DB_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "http://127.0.0.1:8529".to_string());

        let mut store = StoreConfig::default();
        if let Some(v) = env("HEARTH_DB_NAME").filter(|v| !v.trim().is_empty()) {
            store.database = v;
        }
        if let Some(v) = env("HEARTH_DB_USER").filter(|v| !v.trim().is_empty()) {
            store.username = v;
        }
        store.password = env("HEARTH_DB_PASSWORD").unwrap_or_default();
        store.token_margin = Duration::from_secs(parsed(&env, "HEARTH_TOKEN_MARGIN_S", 120)?);
        store.token_poll = Duration::from_secs(parsed(&env, "HEARTH_TOKEN_POLL_S", 5u64)?.max(1));
        store.cursor_batch = parsed(&env, "HEARTH_CURSOR_BATCH", 100usize)?.max(1);

        let tick_hz: u32 = parsed(&env, "HEARTH_TICK_HZ", 10)?;
        if tick_hz == 0 {
            return Err("HEARTH_TICK_HZ must be positive".to_string());
        }
        let session_input_interval =
            Duration::from_millis(parsed(&env, "HEARTH_SESSION_INPUT_MS", 100u64)?.max(1));
        let simulation_interval =
            Duration::from_millis(parsed(&env, "HEARTH_SIMULATION_MS", 250u64)?.max(1));

        let input_mode = match env("HEARTH_INPUT_MODE")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("direct") => InputMode::Direct,
            Some("queued") => InputMode::Queued,
            Some(other) => return Err(format!("HEARTH_INPUT_MODE: unknown mode {other:?}")),
        };
        let console_min_level = parsed(&env, "HEARTH_CONSOLE_MIN_LEVEL", 4i64)?;
        let node_id = env("NODE_ID").filter(|v| !v.trim().is_empty());

        let mut it = args.into_iter();
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--bind" => {
                    let v = it.next().ok_or("--bind needs a value")?;
                    bind = v.parse().map_err(|_| format!("--bind: bad address {v:?}"))?;
                }
                "--db-url" => {
                    db_url = it.next().ok_or("--db-url needs a value")?;
                }
                "-h" | "--help" => return Err("help".to_string()),
                other => return Err(format!("unknown argument {other:?}")),
            }
        }

        Ok(Self {
            bind,
            db_url,
            store,
            tick_hz,
            session_input_interval,
            simulation_interval,
            input_mode,
            console_min_level,
            node_id,
        })
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz))
    }
}

pub fn parse_args() -> Config {
    Config::from_sources(|k| std::env::var(k).ok(), std::env::args().skip(1)).unwrap_or_else(|e| {
        if e != "help" {
            eprintln!("error: {e}\n");
        }
        usage_and_exit()
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{Config, InputMode};

    fn cfg(env: &[(&str, &str)], args: &[&str]) -> Result<Config, String> {
        let env = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        Config::from_sources(
            move |k| env.get(k).cloned(),
            args.iter().map(|s| s.to_string()),
        )
    }

    #[test]
    fn defaults() {
        let c = cfg(&[], &[]).unwrap();
        assert_eq!(c.bind.to_string(), "0.0.0.0:4000");
        assert_eq!(c.db_url, "http://127.0.0.1:8529");
        assert_eq!(c.store.database, "hearth");
        assert_eq!(c.store.username, "root");
        assert_eq!(c.store.password, "");
        assert_eq!(c.store.token_margin, Duration::from_secs(120));
        assert_eq!(c.store.token_poll, Duration::from_secs(5));
        assert_eq!(c.store.cursor_batch, 100);
        assert_eq!(c.tick_period(), Duration::from_millis(100));
        assert_eq!(c.session_input_interval, Duration::from_millis(100));
        assert_eq!(c.simulation_interval, Duration::from_millis(250));
        assert_eq!(c.input_mode, InputMode::Direct);
        assert_eq!(c.console_min_level, 4);
        assert!(c.node_id.is_none());
    }

    #[test]
    fn env_and_flags_override() {
        let c = cfg(
            &[
                ("HEARTH_BIND", "127.0.0.1:5000"),
                ("HEARTH_DB_NAME", "world"),
                ("HEARTH_TICK_HZ", "20"),
                ("HEARTH_INPUT_MODE", "Queued"),
                ("NODE_ID", "n1"),
            ],
            &["--bind", "127.0.0.1:6000", "--db-url", "http://db:8529"],
        )
        .unwrap();
        assert_eq!(c.bind.to_string(), "127.0.0.1:6000");
        assert_eq!(c.db_url, "http://db:8529");
        assert_eq!(c.store.database, "world");
        assert_eq!(c.tick_period(), Duration::from_millis(50));
        assert_eq!(c.input_mode, InputMode::Queued);
        assert_eq!(c.node_id.as_deref(), Some("n1"));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(cfg(&[("HEARTH_TICK_HZ", "0")], &[]).is_err());
        assert!(cfg(&[("HEARTH_TICK_HZ", "fast")], &[]).is_err());
        assert!(cfg(&[("HEARTH_INPUT_MODE", "carrier-pigeon")], &[]).is_err());
        assert!(cfg(&[], &["--bind"]).is_err());
        assert!(cfg(&[], &["--frobnicate"]).is_err());
        assert_eq!(cfg(&[], &["-h"]).unwrap_err(), "help");
    }
}
