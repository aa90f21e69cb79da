use std::{collections::HashMap, fs};

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub database_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000/api".into(),
            database_url: "sqlite://./data/session.db".into(),
        }
    }
}

/// File values first, then environment, then CLI flags in `main`.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("console.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply_file_settings(&mut settings, &file_cfg);
        }
    }

    if let Ok(v) = std::env::var("DASHBOARD_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("DASHBOARD_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }

    settings.server_url = normalize_server_url(&settings.server_url);
    settings
}

pub fn apply_file_settings(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("server_url") {
        settings.server_url = v.clone();
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
}

/// The gateway joins paths by plain concatenation, so the configured base
/// must not end in a slash and must carry a scheme.
pub fn normalize_server_url(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
