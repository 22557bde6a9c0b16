//! Configuration loaded from environment variables.

use anyhow::{Context, Result, bail};
use dotenvy::dotenv;
use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use crate::storage::{CloudinaryConfig, SignatureAlgorithm};
use crate::upload::UploadConstraints;

const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
/// Plain text (`txt`) is not in the default list; set `ALLOWED_FORMATS` to include it, or `*`.
const DEFAULT_ALLOWED_FORMATS: &str = "jpg,jpeg,png,gif,pdf,doc,docx,xls,xlsx,mp4,mov";

#[derive(Debug, Clone)]
pub enum StorageKind {
    Memory,
    Local {
        root: PathBuf,
        /// URL prefix the stored files are served under.
        public_url: String,
    },
    Cloudinary(CloudinaryConfig),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageKind,
    /// Namespace every stored file lives in.
    pub folder: String,
    pub max_file_size: Option<usize>,
    pub allowed_formats: Option<Vec<String>>,
    pub backend_timeout: Duration,
    pub static_dir: PathBuf,
    pub index_page: String,
    /// Extra paths that also serve the index page.
    pub index_aliases: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("{key} must be set"))
        };

        let folder = var("UPLOAD_FOLDER", "sap-uploads");
        if folder.is_empty() || folder.contains("..") {
            bail!("UPLOAD_FOLDER must be a non-empty relative name");
        }

        let storage = match var("STORAGE_TYPE", "local").as_str() {
            "memory" => StorageKind::Memory,
            "local" => {
                let public_url = var("UPLOADS_URL", "/uploads");
                if !public_url.starts_with('/') || public_url == "/" {
                    bail!("UPLOADS_URL must be an absolute path below /");
                }
                StorageKind::Local {
                    root: PathBuf::from(var("STORAGE_PATH", "./uploads")),
                    public_url: public_url.trim_end_matches('/').to_string(),
                }
            }
            "cloudinary" => StorageKind::Cloudinary(CloudinaryConfig {
                cloud_name: required("CLOUDINARY_CLOUD_NAME")?,
                api_key: required("CLOUDINARY_API_KEY")?,
                api_secret: required("CLOUDINARY_API_SECRET")?,
                folder: folder.clone(),
                api_base_url: var("CLOUDINARY_API_BASE_URL", "https://api.cloudinary.com"),
                signature_algorithm: var("CLOUDINARY_SIGNATURE_ALGORITHM", "sha1")
                    .parse::<SignatureAlgorithm>()
                    .map_err(anyhow::Error::msg)
                    .context("CLOUDINARY_SIGNATURE_ALGORITHM must be sha1 or sha256")?,
            }),
            other => bail!("unknown STORAGE_TYPE `{other}` (expected local, cloudinary or memory)"),
        };

        let port = var("PORT", "3000")
            .parse()
            .context("PORT must be a valid u16")?;

        let max_file_size = parse_size_limit(lookup("MAX_FILE_SIZE").as_deref())?;
        let allowed_formats =
            parse_formats(&var("ALLOWED_FORMATS", DEFAULT_ALLOWED_FORMATS));

        let index_aliases = parse_aliases(&var("INDEX_ALIASES", "/SAP-Customer"))?;

        let timeout_secs: u64 = var("BACKEND_TIMEOUT_SECS", "30")
            .parse()
            .context("BACKEND_TIMEOUT_SECS must be a whole number of seconds")?;
        if timeout_secs == 0 {
            bail!("BACKEND_TIMEOUT_SECS must be greater than zero");
        }

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            port,
            storage,
            folder,
            max_file_size,
            allowed_formats,
            backend_timeout: Duration::from_secs(timeout_secs),
            static_dir: PathBuf::from(var("STATIC_DIR", "./public")),
            index_page: var("INDEX_PAGE", "index.html"),
            index_aliases,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn upload_constraints(&self) -> UploadConstraints {
        UploadConstraints {
            max_bytes: self.max_file_size,
            allowed_extensions: self.allowed_formats.clone(),
        }
    }
}

/// `None`/unset gives the default; `0` or `unlimited` lifts the limit.
fn parse_size_limit(raw: Option<&str>) -> Result<Option<usize>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Some(DEFAULT_MAX_FILE_SIZE)),
        Some("0") | Some("unlimited") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .with_context(|| format!("MAX_FILE_SIZE must be a byte count, got `{value}`")),
    }
}

/// Comma-separated extensions, normalised to lowercase without dots; `*` allows everything.
fn parse_formats(raw: &str) -> Option<Vec<String>> {
    if raw.trim() == "*" {
        return None;
    }
    Some(
        raw.split(',')
            .map(|f| f.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|f| !f.is_empty())
            .collect(),
    )
}

/// Comma-separated absolute paths; an empty value disables aliases.
fn parse_aliases(raw: &str) -> Result<Vec<String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|alias| !alias.is_empty())
        .map(|alias| {
            if !alias.starts_with('/') || alias == "/" {
                bail!("INDEX_ALIASES entries must be absolute paths below /, got `{alias}`");
            }
            Ok(alias.trim_end_matches('/').to_string())
        })
        .collect()
}
