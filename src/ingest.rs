use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::config::Config;
use crate::error::{ERR_INCORRECT_DATA, ERR_NO_SINGLE_FILE, Error, Result};
use crate::naming::{Allocation, NameAllocator};
use crate::preview::{PreviewCache, decode_blocking};
use crate::remote;
use crate::rollback::Rollback;

/// The comma of a data URI can't come earlier than in `data:image/png;base64,`.
pub const BASE64_MIN_COMMA_INDEX: usize = 21;

/// Form field that carries the uploaded image.
pub const FILE_FIELD: &str = "file";

/// One part of a parsed multipart body.
#[derive(Clone, Debug)]
pub struct FormFile {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Clone, Debug, Default)]
pub struct MultipartForm {
    parts: Vec<FormFile>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, part: FormFile) {
        self.parts.push(part);
    }

    pub fn files<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FormFile> + 'a {
        self.parts.iter().filter(move |part| part.field == field)
    }
}

impl FromIterator<FormFile> for MultipartForm {
    fn from_iter<I: IntoIterator<Item = FormFile>>(iter: I) -> Self {
        Self {
            parts: iter.into_iter().collect(),
        }
    }
}

/// An image to ingest, by source.
#[derive(Clone, Debug)]
pub enum UploadRequest {
    MultiPart(MultipartForm),
    Url(String),
    Base64 { data: String, name: String },
}

/// The original as it was written to disk.
#[derive(Clone, Debug, Serialize)]
pub struct StoredOriginal {
    /// Path relative to the original root, `/`-separated.
    pub name: String,
    pub extension: String,
    pub size: u64,
    /// Hex encoded SHA-256 of the stored bytes.
    pub checksum: String,
}

/// Stores uploaded images as originals and derives their previews.
#[derive(Clone, Debug)]
pub struct Ingestor {
    config: Config,
    allocator: NameAllocator,
    previews: PreviewCache,
    client: reqwest::Client,
}

impl Ingestor {
    pub fn new(config: Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|err| Error::storage(format!("http client setup failed: {err}")))?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: Config, client: reqwest::Client) -> Self {
        Self {
            allocator: NameAllocator::new(&config.original_root, config.random_name),
            previews: PreviewCache::new(&config),
            config,
            client,
        }
    }

    pub async fn ingest(&self, request: UploadRequest) -> Result<StoredOriginal> {
        match request {
            UploadRequest::MultiPart(form) => self.multipart(&form).await,
            UploadRequest::Url(url) => self.url(&url).await,
            UploadRequest::Base64 { data, name } => self.base64(&data, &name).await,
        }
    }

    /// Stores the single file sent under the `file` field.
    #[tracing::instrument(skip_all)]
    pub async fn multipart(&self, form: &MultipartForm) -> Result<StoredOriginal> {
        let mut files = form.files(FILE_FIELD);
        let file = match (files.next(), files.next()) {
            (Some(file), None) => file,
            _ => return Err(Error::bad_request(ERR_NO_SINGLE_FILE)),
        };

        let content_type = file.content_type.as_deref().unwrap_or_default();
        let file_name = file.file_name.as_deref().unwrap_or_default();
        self.save(file.data.as_ref(), content_type, file_name).await
    }

    /// Downloads and stores the image at `url`.
    #[tracing::instrument(skip(self))]
    pub async fn url(&self, url: &str) -> Result<StoredOriginal> {
        let url = remote::validate_http_url(url, &self.config.allowed_hosts)?;
        let download = remote::open(&self.client, url, self.config.download_limit).await?;
        self.save(download.body, &download.content_type, &download.file_name)
            .await
    }

    /// Stores an image sent as a `data:<content-type>;base64,<payload>` URI.
    #[tracing::instrument(skip(self, data))]
    pub async fn base64(&self, data: &str, name: &str) -> Result<StoredOriginal> {
        let comma = data
            .find(',')
            .filter(|index| *index >= BASE64_MIN_COMMA_INDEX)
            .ok_or_else(|| Error::bad_request(ERR_INCORRECT_DATA))?;
        let header = data[..comma]
            .strip_prefix("data:")
            .ok_or_else(|| Error::bad_request(ERR_INCORRECT_DATA))?;
        let content_type = header.strip_suffix(";base64").unwrap_or(header);

        let payload = base64::engine::general_purpose::STANDARD
            .decode(data[comma + 1..].trim())
            .map_err(|err| Error::bad_request(format!("{ERR_INCORRECT_DATA}: {err}")))?;
        self.save(payload.as_slice(), content_type, name).await
    }

    /// Writes `src` as a new original and derives its preview.
    ///
    /// Anything that stops the original from being a decodable image removes
    /// it again. A failing preview only logs: the original stays and the
    /// preview is produced on its first lookup.
    async fn save<R>(
        &self,
        mut src: R,
        content_type: &str,
        file_name: &str,
    ) -> Result<StoredOriginal>
    where
        R: AsyncRead + Unpin,
    {
        let Allocation {
            mut file,
            path,
            name,
            extension,
            collision_dir,
        } = self.allocator.allocate(content_type, file_name).await?;

        let mut rollback = Rollback::new();
        if let Some(dir) = &collision_dir {
            rollback.dir(dir);
        }
        rollback.file(&path);

        let written = async {
            let copied = tokio::io::copy(&mut src, &mut file).await?;
            file.flush().await?;
            drop(file);

            let bytes = fs::read(&path).await?;
            let checksum = hex::encode(Sha256::digest(&bytes));
            let decoded = decode_blocking(bytes).await?;
            Ok::<_, Error>((decoded, copied, checksum))
        }
        .await;

        let (decoded, size, checksum) = match written {
            Ok(written) => written,
            Err(err) => {
                rollback.unwind().await;
                return Err(err);
            }
        };
        rollback.commit();
        tracing::info!(size, path = %path.display(), "stored original");

        if let Err(err) = self.previews.store(&name, decoded).await {
            tracing::warn!(%name, error = %err, "preview generation failed, deferring to lookup");
        }

        Ok(StoredOriginal {
            name,
            extension,
            size,
            checksum,
        })
    }
}
