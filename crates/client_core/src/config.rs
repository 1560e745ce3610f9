use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Base URL of the chat server; the websocket endpoint is derived from it.
    pub api_url: String,
    pub ws_path: String,
    pub reconnect_delay: Duration,
    pub heartbeat_outgoing: Duration,
    pub heartbeat_incoming: Duration,
    pub connect_timeout: Duration,
    pub title: String,
    pub title_blink_interval: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".into(),
            ws_path: "/ws".into(),
            reconnect_delay: Duration::from_millis(5000),
            heartbeat_outgoing: Duration::from_millis(4000),
            heartbeat_incoming: Duration::from_millis(4000),
            connect_timeout: Duration::from_millis(10_000),
            title: "1:1 Chat".into(),
            title_blink_interval: Duration::from_millis(1000),
        }
    }
}

impl ClientSettings {
    /// `http(s)://host` becomes `ws(s)://host<ws_path>`.
    pub fn ws_endpoint(&self) -> Result<Url, ConfigError> {
        let base = self.api_url.trim().trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            base.to_string()
        } else {
            return Err(ConfigError::UnsupportedScheme(self.api_url.clone()));
        };

        let path = self.ws_path.trim();
        let raw = if path.is_empty() || path.starts_with('/') {
            format!("{ws_base}{path}")
        } else {
            format!("{ws_base}/{path}")
        };

        Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { url: raw, source })
    }

    fn apply(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("api_url") {
            self.api_url = v;
        }
        if let Some(v) = lookup("ws_path") {
            self.ws_path = v;
        }
        if let Some(v) = lookup("title") {
            self.title = v;
        }
        set_millis(&mut self.reconnect_delay, lookup("reconnect_delay_ms"));
        set_millis(&mut self.heartbeat_outgoing, lookup("heartbeat_outgoing_ms"));
        set_millis(&mut self.heartbeat_incoming, lookup("heartbeat_incoming_ms"));
        set_millis(&mut self.connect_timeout, lookup("connect_timeout_ms"));
        set_millis(
            &mut self.title_blink_interval,
            lookup("title_blink_interval_ms"),
        );
    }

    fn apply_file_table(&mut self, table: &toml::Table) {
        self.apply(|key| match table.get(key)? {
            toml::Value::String(value) => Some(value.clone()),
            other => Some(other.to_string()),
        });
    }

    fn apply_env_with(&mut self, env: impl Fn(&str) -> Option<String>) {
        // The unprefixed name mirrors the web client's build-time variable.
        if let Some(v) = env("CHAT_API_URL") {
            self.api_url = v;
        }
        self.apply(|key| env(&format!("APP__{}", key.to_ascii_uppercase())));
    }
}

fn set_millis(target: &mut Duration, raw: Option<String>) {
    if let Some(ms) = raw.and_then(|v| v.trim().parse::<u64>().ok()) {
        *target = Duration::from_millis(ms);
    }
}

/// Defaults, then `client.toml` in the working directory if present, then
/// environment overrides.
pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(DEFAULT_SETTINGS_FILE) {
        if let Ok(table) = raw.parse::<toml::Table>() {
            settings.apply_file_table(&table);
        }
    }

    settings.apply_env_with(|key| std::env::var(key).ok());
    settings
}

/// Like [`load_settings`], but an explicitly named file must exist and parse.
pub fn load_settings_from(path: &Path) -> Result<ClientSettings, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: PathBuf::from(path),
        source,
    })?;
    let table = raw
        .parse::<toml::Table>()
        .map_err(|source| ConfigError::Parse {
            path: PathBuf::from(path),
            source,
        })?;

    let mut settings = ClientSettings::default();
    settings.apply_file_table(&table);
    settings.apply_env_with(|key| std::env::var(key).ok());
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    #[test]
    fn derives_ws_endpoint_from_http_base() {
        let settings = ClientSettings::default();
        assert_eq!(
            settings.ws_endpoint().expect("endpoint").as_str(),
            "ws://localhost:8080/ws"
        );
    }

    #[test]
    fn derives_wss_endpoint_and_strips_trailing_slash() {
        let settings = ClientSettings {
            api_url: "https://chat.example.com/".into(),
            ws_path: "ws/websocket".into(),
            ..ClientSettings::default()
        };
        assert_eq!(
            settings.ws_endpoint().expect("endpoint").as_str(),
            "wss://chat.example.com/ws/websocket"
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        let settings = ClientSettings {
            api_url: "ftp://example.com".into(),
            ..ClientSettings::default()
        };
        assert!(matches!(
            settings.ws_endpoint(),
            Err(ConfigError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut settings = ClientSettings::default();
        let table: toml::Table = r#"
            api_url = "http://file:1"
            reconnect_delay_ms = 250
            heartbeat_incoming_ms = "not-a-number"
        "#
        .parse()
        .expect("toml");
        settings.apply_file_table(&table);
        assert_eq!(settings.api_url, "http://file:1");
        assert_eq!(settings.reconnect_delay, Duration::from_millis(250));
        assert_eq!(settings.heartbeat_incoming, Duration::from_millis(4000));

        settings.apply_env_with(|key| match key {
            "APP__API_URL" => Some("http://env:2".to_string()),
            "APP__TITLE" => Some("Chat".to_string()),
            _ => None,
        });
        assert_eq!(settings.api_url, "http://env:2");
        assert_eq!(settings.title, "Chat");
    }

    #[test]
    fn legacy_api_url_variable_is_honoured() {
        let mut settings = ClientSettings::default();
        settings.apply_env_with(|key| (key == "CHAT_API_URL").then(|| "http://legacy:3".to_string()));
        assert_eq!(settings.api_url, "http://legacy:3");
    }

    #[test]
    fn explicit_settings_file_is_loaded() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("dm_chat_settings_{suffix}.toml"));
        fs::write(&path, "ws_path = \"/ws/websocket\"\ntitle = \"Inbox\"\n").expect("write");

        let settings = load_settings_from(&path).expect("load");
        assert_eq!(settings.ws_path, "/ws/websocket");
        assert_eq!(settings.title, "Inbox");

        fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn missing_settings_file_is_an_error() {
        let err = load_settings_from(Path::new("/definitely/not/here.toml")).expect_err("missing");
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
