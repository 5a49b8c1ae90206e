//! Configuration management for the chunked upload server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::upload::{DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_CHUNKS, DEFAULT_SESSION_TTL};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    /// Base URL handed out in download links (defaults to `endpoint`)
    pub public_url: Option<String>,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_chunks: u32,
    pub max_body_bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                backend: StorageBackend::S3,
                endpoint: "http://localhost:9000".to_string(),
                bucket: "uploads".to_string(),
                access_key: "minioadmin".to_string(),
                secret_key: "minioadmin".to_string(),
                region: Some("us-east-1".to_string()),
                public_url: None,
                local_path: PathBuf::from("./data"),
            },
            upload: UploadConfig::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            session_ttl_secs: DEFAULT_SESSION_TTL.as_secs(),
            sweep_interval_secs: 5 * 60,
            max_chunks: DEFAULT_MAX_CHUNKS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "s3".to_string())
            .to_lowercase()
            .as_str()
        {
            "s3" | "minio" => StorageBackend::S3,
            "local" => StorageBackend::Local,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    var: "STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let defaults = Config::default();
        let s3_required = backend == StorageBackend::S3;

        let storage = StorageConfig {
            backend,
            endpoint: match s3_endpoint()? {
                Some(endpoint) => endpoint,
                None if s3_required => return Err(ConfigError::Missing("S3_ENDPOINT")),
                None => defaults.storage.endpoint,
            },
            bucket: var_or_fallback("S3_BUCKET", "BUCKET_NAME")
                .unwrap_or(defaults.storage.bucket),
            access_key: match var_or_fallback("S3_ACCESS_KEY", "MINIO_ACCESS_KEY") {
                Some(key) => key,
                None if s3_required => return Err(ConfigError::Missing("S3_ACCESS_KEY")),
                None => defaults.storage.access_key,
            },
            secret_key: match var_or_fallback("S3_SECRET_KEY", "MINIO_SECRET_KEY") {
                Some(key) => key,
                None if s3_required => return Err(ConfigError::Missing("S3_SECRET_KEY")),
                None => defaults.storage.secret_key,
            },
            region: env::var("S3_REGION").ok().or(defaults.storage.region),
            public_url: env::var("S3_PUBLIC_URL").ok(),
            local_path: env::var("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.local_path),
        };

        let upload = UploadConfig {
            session_ttl_secs: parse_or("UPLOAD_SESSION_TTL_SECS", defaults.upload.session_ttl_secs)?,
            sweep_interval_secs: parse_or(
                "UPLOAD_SWEEP_INTERVAL_SECS",
                defaults.upload.sweep_interval_secs,
            )?,
            max_chunks: parse_or("UPLOAD_MAX_CHUNKS", defaults.upload.max_chunks)?,
            max_body_bytes: parse_or("UPLOAD_MAX_BODY_BYTES", defaults.upload.max_body_bytes)?,
        };

        let port = match var_or_fallback("SERVER_PORT", "PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: "SERVER_PORT",
                value,
            })?,
            None => defaults.server.port,
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port,
            },
            storage,
            upload,
        })
    }
}

impl StorageConfig {
    /// Region used for signing and bucket creation
    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or("us-east-1")
    }

    /// Public download URL for a finished object
    ///
    /// S3 objects are linked directly on the object store; the local and
    /// in-memory backends are served through `/files/`.
    pub fn download_url(&self, object_name: &str) -> String {
        let key = object_name
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        match self.backend {
            StorageBackend::S3 => {
                let base = self.public_url.as_deref().unwrap_or(&self.endpoint);
                format!("{}/{}/{}", base.trim_end_matches('/'), self.bucket, key)
            }
            StorageBackend::Local | StorageBackend::Memory => format!("/files/{}", key),
        }
    }
}

impl UploadConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Build the S3 endpoint, accepting the MinIO host/port/TLS triple as a fallback
fn s3_endpoint() -> Result<Option<String>, ConfigError> {
    if let Ok(endpoint) = env::var("S3_ENDPOINT") {
        return Ok(Some(endpoint));
    }

    let Ok(host) = env::var("MINIO_ENDPOINT") else {
        return Ok(None);
    };

    let scheme = match env::var("MINIO_USE_SSL").as_deref() {
        Ok("true") => "https",
        _ => "http",
    };

    match env::var("MINIO_PORT") {
        Ok(port) => {
            let port: u16 = port.parse().map_err(|_| ConfigError::Invalid {
                var: "MINIO_PORT",
                value: port.clone(),
            })?;
            Ok(Some(format!("{}://{}:{}", scheme, host, port)))
        }
        Err(_) => Ok(Some(format!("{}://{}", scheme, host))),
    }
}

fn var_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).or_else(|_| env::var(fallback)).ok()
}

fn parse_or<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_download_url() {
        let mut storage = Config::default().storage;
        storage.endpoint = "http://minio:9000/".to_string();

        assert_eq!(
            storage.download_url("1700000000000_my file.bin"),
            "http://minio:9000/uploads/1700000000000_my%20file.bin"
        );

        storage.public_url = Some("https://cdn.example.com".to_string());
        assert_eq!(
            storage.download_url("dir/a.bin"),
            "https://cdn.example.com/uploads/dir/a.bin"
        );
    }

    #[test]
    fn test_local_download_url() {
        let mut storage = Config::default().storage;
        storage.backend = StorageBackend::Local;

        assert_eq!(storage.download_url("1_a b.txt"), "/files/1_a%20b.txt");
    }

    #[test]
    fn test_upload_defaults() {
        let upload = UploadConfig::default();
        assert_eq!(upload.session_ttl(), Duration::from_secs(86_400));
        assert_eq!(upload.sweep_interval(), Duration::from_secs(300));
        assert_eq!(upload.max_chunks, 10_000);
    }
}
