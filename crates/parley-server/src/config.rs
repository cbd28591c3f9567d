use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "changeme",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub photo_dir: PathBuf,
    pub default_photo: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = var("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port = match var("PARLEY_PORT") {
            Some(v) => v.parse().with_context(|| format!("invalid PARLEY_PORT {:?}", v))?,
            None => 3000,
        };
        let token_ttl_days = match var("PARLEY_TOKEN_TTL_DAYS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("invalid PARLEY_TOKEN_TTL_DAYS {:?}", v))?,
            None => 30,
        };
        if token_ttl_days <= 0 {
            bail!("PARLEY_TOKEN_TTL_DAYS must be positive");
        }

        Ok(Self {
            host: var("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            jwt_secret,
            token_ttl_days,
            photo_dir: var("PARLEY_PHOTO_DIR").unwrap_or_else(|| "./photos".into()).into(),
            default_photo: var("PARLEY_DEFAULT_PHOTO")
                .unwrap_or_else(|| "./photos/default.png".into())
                .into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = load(&[("PARLEY_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert_eq!(config.token_ttl_days, 30);
        assert_eq!(config.photo_dir, PathBuf::from("./photos"));
        assert_eq!(config.default_photo, PathBuf::from("./photos/default.png"));
    }

    #[test]
    fn missing_or_placeholder_secret_is_fatal() {
        assert!(load(&[]).is_err());
        assert!(load(&[("PARLEY_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("PARLEY_JWT_SECRET", "a-real-secret"),
            ("PARLEY_PORT", "8080"),
            ("PARLEY_TOKEN_TTL_DAYS", "7"),
            ("PARLEY_PHOTO_DIR", "/srv/photos"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.token_ttl_days, 7);
        assert_eq!(config.photo_dir, PathBuf::from("/srv/photos"));

        assert!(load(&[("PARLEY_JWT_SECRET", "a-real-secret"), ("PARLEY_PORT", "http")]).is_err());
        assert!(load(&[("PARLEY_JWT_SECRET", "a-real-secret"), ("PARLEY_TOKEN_TTL_DAYS", "0")]).is_err());
    }
}
