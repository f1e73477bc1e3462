use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ERR_BAD_LOOKUP_NAME, Error, Result};
use crate::imaging::{self, Decoded};
use crate::rollback::Rollback;

/// Lazily derived previews, keyed by the relative name of their original.
///
/// Previews are written once and never invalidated: originals are immutable,
/// so a preview that exists is always current.
#[derive(Clone, Debug)]
pub struct PreviewCache {
    original_root: PathBuf,
    preview_root: PathBuf,
    width: u32,
    height: u32,
}

impl PreviewCache {
    pub fn new(config: &Config) -> Self {
        Self {
            original_root: config.original_root.clone(),
            preview_root: config.preview_root.clone(),
            width: config.preview_width,
            height: config.preview_height,
        }
    }

    pub fn original_path(&self, name: &str) -> PathBuf {
        self.original_root.join(name)
    }

    pub fn preview_path(&self, name: &str) -> PathBuf {
        self.preview_root.join(name)
    }

    /// Returns the absolute path of the preview for `name`, generating it
    /// first if this is the first request.
    #[tracing::instrument(skip(self))]
    pub async fn lookup(&self, name: &str) -> Result<PathBuf> {
        if !is_valid_name(name) {
            return Err(Error::bad_request(ERR_BAD_LOOKUP_NAME));
        }

        let original = self.original_path(name);
        if !is_file(&original).await? {
            return Err(Error::not_found(format!("image '{name}' not found")));
        }

        let preview = self.preview_path(name);
        if is_file(&preview).await? {
            tracing::debug!("preview cache hit");
            return Ok(std::path::absolute(preview)?);
        }

        tracing::debug!("preview cache miss");
        let bytes = match fs::read(&original).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::not_found(format!("image '{name}' not found")));
            }
            Err(err) => return Err(err.into()),
        };
        let decoded = decode_blocking(bytes).await?;
        let preview = self.store(name, decoded).await?;
        Ok(std::path::absolute(preview)?)
    }

    /// Resizes `decoded` and persists it as the preview of `name`.
    ///
    /// A subdirectory created for the preview is removed again if writing
    /// fails. The file itself is written to a temporary name and renamed into
    /// place, so concurrent writers of the same preview both succeed and
    /// readers never see a partial file.
    pub(crate) async fn store(&self, name: &str, decoded: Decoded) -> Result<PathBuf> {
        let path = self.preview_path(name);
        let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();

        fs::create_dir_all(&self.preview_root).await?;
        let mut rollback = Rollback::new();
        if let Some(parent) = path.parent().filter(|parent| *parent != self.preview_root) {
            match fs::create_dir(parent).await {
                Ok(()) => rollback.dir(parent),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
        }

        let (width, height) = (self.width, self.height);
        let extension = extension.to_string();
        let rendered = tokio::task::spawn_blocking(move || {
            imaging::render_preview(decoded, &extension, width, height)
        })
        .await
        .map_err(|err| Error::storage(format!("preview task failed: {err}")));

        let result = match rendered {
            Ok(Ok(bytes)) => persist(&path, &bytes).await,
            Ok(Err(err)) | Err(err) => Err(err),
        };
        match result {
            Ok(()) => {
                rollback.commit();
                tracing::info!(path = %path.display(), "stored preview");
                Ok(path)
            }
            Err(err) => {
                rollback.unwind().await;
                Err(err)
            }
        }
    }
}

/// Decodes on the blocking pool.
pub(crate) async fn decode_blocking(bytes: Vec<u8>) -> Result<Decoded> {
    tokio::task::spawn_blocking(move || imaging::decode(&bytes))
        .await
        .map_err(|err| Error::storage(format!("decode task failed: {err}")))?
}

/// Writes `bytes` next to `path` under a temporary name, then renames it over
/// `path`.
async fn persist(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::storage("preview path has no parent"))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let mut rollback = Rollback::new();
    rollback.file(&tmp);
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    rollback.commit();
    Ok(())
}

async fn is_file(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Accepts `stem.ext` or `dir/stem.ext` where every part is made of ASCII
/// letters, digits and underscores.
pub fn is_valid_name(name: &str) -> bool {
    let file = match name.split_once('/') {
        Some((dir, file)) if is_word(dir) => file,
        Some(_) => return false,
        None => name,
    };
    match file.split_once('.') {
        Some((stem, ext)) => is_word(stem) && is_word(ext),
        None => false,
    }
}

fn is_word(part: &str) -> bool {
    !part.is_empty()
        && part
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
