//! Hosted media backend speaking the Cloudinary upload and admin APIs.
//!
//! Uploads and deletions are signed upload-API requests; listing goes through
//! the admin API with HTTP basic auth. Every object lives under `{folder}/` and
//! that prefix is the only part of the account this backend will list or delete.

use super::*;
use chrono::Utc;
use reqwest::{Client, Response, multipart};
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Resource classes queried, in listing order.
const RESOURCE_TYPES: [&str; 3] = ["image", "video", "raw"];

/// Context key under which the client's filename is kept.
const ORIGINAL_NAME_KEY: &str = "original_name";

/// Hash used for request signatures; must match the product environment's setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl std::str::FromStr for SignatureAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            other => Err(format!("unknown signature algorithm `{other}`")),
        }
    }
}

#[derive(Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    /// Folder every upload lands in; also the listing prefix.
    pub folder: String,
    /// Base URL for the API (e.g. `https://api.cloudinary.com`).
    pub api_base_url: String,
    pub signature_algorithm: SignatureAlgorithm,
}

impl fmt::Debug for CloudinaryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudinaryConfig")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("folder", &self.folder)
            .field("api_base_url", &self.api_base_url)
            .field("signature_algorithm", &self.signature_algorithm)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Resource {
    public_id: String,
    secure_url: String,
    resource_type: Option<String>,
    format: Option<String>,
    bytes: Option<u64>,
    original_filename: Option<String>,
    context: Option<ResourceContext>,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceContext {
    #[serde(default)]
    custom: HashMap<String, String>,
}

impl Resource {
    fn display_name(&self) -> String {
        if let Some(name) = self
            .context
            .as_ref()
            .and_then(|ctx| ctx.custom.get(ORIGINAL_NAME_KEY))
        {
            return name.clone();
        }
        match (&self.original_filename, &self.format) {
            (Some(name), Some(format)) if !format.is_empty() => format!("{name}.{format}"),
            (Some(name), _) => name.clone(),
            (None, _) => self.public_id.clone(),
        }
    }

    fn into_stored_file(self) -> StoredFile {
        StoredFile {
            original_name: self.display_name(),
            url: self.secure_url,
            public_id: self.public_id,
            resource_type: self.resource_type,
            content_type: None,
            size_bytes: self.bytes,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct DestroyResult {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

pub struct CloudinaryStorage {
    config: CloudinaryConfig,
    client: Client,
}

impl CloudinaryStorage {
    pub fn new(config: CloudinaryConfig) -> Result<Self, StorageError> {
        let client = Client::builder().build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/v1_1/{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.cloud_name,
            path
        )
    }

    fn prefix(&self) -> String {
        format!("{}/", self.config.folder)
    }

    async fn list_type(
        &self,
        resource_type: &str,
        limit: usize,
    ) -> Result<Vec<Resource>, StorageError> {
        let response = self
            .client
            .get(self.endpoint(&format!("resources/{resource_type}/upload")))
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .query(&[
                ("prefix", self.prefix()),
                ("max_results", limit.to_string()),
                ("context", "true".to_string()),
            ])
            .send()
            .await?;

        let list: ResourceList = ensure_success(response).await?.json().await?;
        Ok(list.resources)
    }

    fn sign(&self, params: &[(&str, &str)]) -> String {
        sign(params, &self.config.api_secret, self.config.signature_algorithm)
    }

    /// Upload-API destroy; answers `false` when the id is unknown for this resource type.
    async fn destroy(&self, resource_type: &str, public_id: &str) -> Result<bool, StorageError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[("public_id", public_id), ("timestamp", &timestamp)]);

        let response = self
            .client
            .post(self.endpoint(&format!("{resource_type}/destroy")))
            .form(&[
                ("public_id", public_id),
                ("timestamp", timestamp.as_str()),
                ("api_key", self.config.api_key.as_str()),
                ("signature", signature.as_str()),
            ])
            .send()
            .await?;

        let destroyed: DestroyResult = ensure_success(response).await?.json().await?;
        match destroyed.result.as_str() {
            "ok" => Ok(true),
            "not found" => Ok(false),
            other => Err(StorageError::Api {
                status: 200,
                message: format!("unexpected destroy result `{other}`"),
            }),
        }
    }
}

/// Signs request parameters: `k=v` pairs sorted by key, joined with `&`,
/// followed by the API secret, hashed with the configured algorithm.
fn sign(params: &[(&str, &str)], api_secret: &str, algorithm: SignatureAlgorithm) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by_key(|(key, _)| *key);

    let joined = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    match algorithm {
        SignatureAlgorithm::Sha1 => digest::<Sha1>(&joined, api_secret),
        SignatureAlgorithm::Sha256 => digest::<Sha256>(&joined, api_secret),
    }
}

fn digest<D: Digest>(payload: &str, api_secret: &str) -> String {
    let mut hasher = D::new();
    hasher.update(payload.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Context values use `=` and `|` as separators.
fn escape_context(value: &str) -> String {
    value.replace('=', "\\=").replace('|', "\\|")
}

async fn ensure_success(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);
    Err(StorageError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl Storage for CloudinaryStorage {
    async fn store(&self, file_data: FileData) -> Result<StoredFile, StorageError> {
        let timestamp = Utc::now().timestamp().to_string();
        let context = format!("{ORIGINAL_NAME_KEY}={}", escape_context(&file_data.filename));
        let signature = self.sign(&[
            ("context", context.as_str()),
            ("folder", self.config.folder.as_str()),
            ("timestamp", timestamp.as_str()),
        ]);

        let content_type = file_data.content_type.map(|m| m.to_string());
        let size = file_data.bytes.len() as u64;
        let mut part = multipart::Part::bytes(file_data.bytes).file_name(file_data.filename.clone());
        if let Some(ct) = &content_type {
            part = part.mime_str(ct)?;
        }

        let form = multipart::Form::new()
            .text("api_key", self.config.api_key.clone())
            .text("timestamp", timestamp)
            .text("folder", self.config.folder.clone())
            .text("context", context)
            .text("signature", signature)
            .part("file", part);

        let response = self
            .client
            .post(self.endpoint("auto/upload"))
            .multipart(form)
            .send()
            .await?;

        let resource: Resource = ensure_success(response).await?.json().await?;
        debug!(public_id = %resource.public_id, "uploaded to cloudinary");

        Ok(StoredFile {
            original_name: file_data.filename,
            url: resource.secure_url,
            public_id: resource.public_id,
            resource_type: resource.resource_type,
            content_type,
            size_bytes: resource.bytes.or(Some(size)),
        })
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredFile>, StorageError> {
        let mut files = Vec::new();
        for resource_type in RESOURCE_TYPES {
            if files.len() >= limit {
                break;
            }
            let resources = self.list_type(resource_type, limit - files.len()).await?;
            files.extend(resources.into_iter().map(Resource::into_stored_file));
        }
        files.truncate(limit);
        Ok(files)
    }

    async fn delete(&self, public_id: &str) -> Result<bool, StorageError> {
        if !public_id.starts_with(&self.prefix()) {
            warn!(public_id = %public_id, "delete outside upload folder refused");
            return Ok(false);
        }

        for resource_type in RESOURCE_TYPES {
            if self.destroy(resource_type, public_id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
