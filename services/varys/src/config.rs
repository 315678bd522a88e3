use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

// Engine configuration sourced from environment variables, with an
// optional YAML override file named by VARYS_CONFIG.
#[derive(Debug, Clone)]
pub struct VarysConfig {
    // Bind address for the HTTP API.
    pub bind_address: SocketAddr,
    pub database: DatabaseConfig,
    pub credential: CredentialConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    // Path to the embedded store file.
    pub path: PathBuf,
    pub encryption: EncryptionConfig,
}

#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    // Root passphrase the at-rest encryption key is derived from.
    pub key: String,
    // Accepted for compatibility; rotation is the storage layer's concern.
    pub key_rotation_hours: u64,
}

#[derive(Debug, Clone)]
pub struct CredentialConfig {
    // Root key credentials are derived from. Not the storage key.
    pub root_key: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub auth_type: String,
    pub basic: BasicAuthConfig,
}

#[derive(Debug, Clone)]
pub struct BasicAuthConfig {
    pub users: Vec<StaticUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VarysConfigOverride {
    bind_address: Option<String>,
    database_path: Option<PathBuf>,
    encryption_key: Option<String>,
    encryption_key_rotation_hours: Option<u64>,
    root_key: Option<String>,
    auth_type: Option<String>,
    basic_users: Option<Vec<StaticUser>>,
}

impl VarysConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let bind_address = std::env::var("VARYS_BIND")
            .unwrap_or_else(|_| "127.0.0.1:3456".to_string())
            .parse()
            .with_context(|| "parse VARYS_BIND")?;
        let path =
            PathBuf::from(std::env::var("VARYS_DB_PATH").unwrap_or_else(|_| "db.varys".to_string()));
        let encryption_key = std::env::var("VARYS_DB_ENCRYPTION_KEY").unwrap_or_default();
        let key_rotation_hours = std::env::var("VARYS_DB_ENCRYPTION_KEY_ROTATION_HOURS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .with_context(|| "parse VARYS_DB_ENCRYPTION_KEY_ROTATION_HOURS")?;
        let root_key = std::env::var("VARYS_ROOT_KEY").unwrap_or_default();
        let auth_type = std::env::var("VARYS_AUTH_TYPE").unwrap_or_else(|_| "basic".to_string());

        let username =
            std::env::var("VARYS_BASIC_USERNAME").unwrap_or_else(|_| "badadmin".to_string());
        let password =
            std::env::var("VARYS_BASIC_PASSWORD").unwrap_or_else(|_| "badadmin".to_string());
        let groups = std::env::var("VARYS_BASIC_GROUPS")
            .unwrap_or_else(|_| "admin:varys".to_string())
            .split(',')
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            bind_address,
            database: DatabaseConfig {
                path,
                encryption: EncryptionConfig {
                    key: encryption_key,
                    key_rotation_hours,
                },
            },
            credential: CredentialConfig { root_key },
            auth: AuthConfig {
                auth_type,
                basic: BasicAuthConfig {
                    users: vec![StaticUser {
                        username,
                        password,
                        groups,
                    }],
                },
            },
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("VARYS_CONFIG") {
            // YAML overrides allow ops-friendly config files.
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read VARYS_CONFIG: {path}"))?;
            let override_cfg: VarysConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse varys config yaml")?;
            if let Some(value) = override_cfg.bind_address {
                config.bind_address = value.parse().with_context(|| "parse bind_address")?;
            }
            if let Some(value) = override_cfg.database_path {
                config.database.path = value;
            }
            if let Some(value) = override_cfg.encryption_key {
                config.database.encryption.key = value;
            }
            if let Some(value) = override_cfg.encryption_key_rotation_hours {
                config.database.encryption.key_rotation_hours = value;
            }
            if let Some(value) = override_cfg.root_key {
                config.credential.root_key = value;
            }
            if let Some(value) = override_cfg.auth_type {
                config.auth.auth_type = value;
            }
            if let Some(value) = override_cfg.basic_users {
                config.auth.basic.users = value;
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Only basic authentication is supported today.
        if self.auth.auth_type != "basic" {
            bail!("unsupported auth type: {}", self.auth.auth_type);
        }
        if self.auth.basic.users.is_empty() {
            bail!("at least one basic auth user is required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    // Helper to clear all varys env vars
    fn clear_varys_env() {
        for (key, _) in env::vars() {
            if key.starts_with("VARYS_") {
                unsafe {
                    env::remove_var(key);
                }
            }
        }
    }

    #[serial]
    #[test]
    fn from_env_uses_defaults() {
        clear_varys_env();
        let config = VarysConfig::from_env().expect("from_env");
        assert_eq!(config.bind_address.to_string(), "127.0.0.1:3456");
        assert_eq!(config.database.path, PathBuf::from("db.varys"));
        assert_eq!(config.database.encryption.key_rotation_hours, 120);
        assert_eq!(config.auth.auth_type, "basic");
        assert_eq!(config.auth.basic.users.len(), 1);
        assert_eq!(config.auth.basic.users[0].username, "badadmin");
        assert_eq!(config.auth.basic.users[0].groups, ["admin:varys"]);
    }

    #[serial]
    #[test]
    fn from_env_respects_env_vars() {
        clear_varys_env();
        unsafe {
            env::set_var("VARYS_BIND", "127.0.0.1:9456");
            env::set_var("VARYS_DB_PATH", "/tmp/varys.db");
            env::set_var("VARYS_ROOT_KEY", "root-secret");
            env::set_var("VARYS_BASIC_GROUPS", "admin:varys, read:varys");
        }

        let config = VarysConfig::from_env().expect("from_env");
        assert_eq!(config.bind_address.to_string(), "127.0.0.1:9456");
        assert_eq!(config.database.path, PathBuf::from("/tmp/varys.db"));
        assert_eq!(config.credential.root_key, "root-secret");
        assert_eq!(
            config.auth.basic.users[0].groups,
            ["admin:varys", "read:varys"]
        );

        clear_varys_env();
    }

    #[serial]
    #[test]
    fn from_env_rejects_invalid_bind_address() {
        clear_varys_env();
        unsafe {
            env::set_var("VARYS_BIND", "not-a-valid-address");
        }
        assert!(VarysConfig::from_env().is_err());
        clear_varys_env();
    }

    #[serial]
    #[test]
    fn from_env_or_yaml_overrides_with_valid_yaml() {
        clear_varys_env();
        let tmpdir = TempDir::new().unwrap();
        let config_path = tmpdir.path().join("config.yml");
        fs::write(
            &config_path,
            r#"
bind_address: "127.0.0.1:7456"
root_key: "yaml-root"
basic_users:
  - username: alice
    password: secret
    groups: ["admin:varys"]
"#,
        )
        .unwrap();
        unsafe {
            env::set_var("VARYS_CONFIG", config_path.to_str().unwrap());
        }

        let config = VarysConfig::from_env_or_yaml().expect("from_env_or_yaml");
        assert_eq!(config.bind_address.to_string(), "127.0.0.1:7456");
        assert_eq!(config.credential.root_key, "yaml-root");
        assert_eq!(config.auth.basic.users[0].username, "alice");

        clear_varys_env();
    }

    #[serial]
    #[test]
    fn from_env_or_yaml_file_not_found_fails() {
        clear_varys_env();
        let tmpdir = TempDir::new().unwrap();
        let nonexistent = tmpdir.path().join("nonexistent.yml");
        unsafe {
            env::set_var("VARYS_CONFIG", nonexistent.to_str().unwrap());
        }
        assert!(VarysConfig::from_env_or_yaml().is_err());
        clear_varys_env();
    }

    #[serial]
    #[test]
    fn unsupported_auth_type_fails_validation() {
        clear_varys_env();
        unsafe {
            env::set_var("VARYS_AUTH_TYPE", "oidc");
        }
        assert!(VarysConfig::from_env_or_yaml().is_err());
        clear_varys_env();
    }
}
