use std::{env, fmt::Display, str::FromStr};

use anyhow::Context;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: String,
    pub public_base_url: String,
    pub esp_steps_per_session: i32,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .context("DATABASE_URL must be set to a Postgres instance")?;

        let esp_steps_per_session: i32 = try_load(&lookup, "ESP_STEPS_PER_SESSION", "4")?;
        if esp_steps_per_session < 1 {
            anyhow::bail!("ESP_STEPS_PER_SESSION must be at least 1");
        }

        Ok(Self {
            database_url,
            max_connections: try_load(&lookup, "DATABASE_MAX_CONNECTIONS", "5")?,
            bind_addr: try_load(&lookup, "BIND_ADDR", "0.0.0.0:3000")?,
            public_base_url: try_load::<String>(&lookup, "PUBLIC_BASE_URL", "http://localhost:3000")?
                .trim_end_matches('/')
                .to_string(),
            esp_steps_per_session,
        })
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid {key} value {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/plant")])).unwrap();

        assert_eq!(config.max_connections, 5);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.public_base_url, "http://localhost:3000");
        assert_eq!(config.esp_steps_per_session, 4);
    }

    #[test]
    fn database_url_is_required() {
        assert!(Config::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn malformed_values_are_errors() {
        let lookup = lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/plant"),
            ("DATABASE_MAX_CONNECTIONS", "many"),
        ]);
        assert!(Config::from_lookup(lookup).is_err());

        let lookup = lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/plant"),
            ("ESP_STEPS_PER_SESSION", "0"),
        ]);
        assert!(Config::from_lookup(lookup).is_err());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let lookup = lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/plant"),
            ("PUBLIC_BASE_URL", "https://plant.example.com/"),
        ]);
        assert_eq!(
            Config::from_lookup(lookup).unwrap().public_base_url,
            "https://plant.example.com"
        );
    }
}
