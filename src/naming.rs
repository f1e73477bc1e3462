use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::media;
use crate::rollback::Rollback;

const MAX_ATTEMPTS: usize = 16;

/// A freshly created, empty file reserved for an incoming original.
#[derive(Debug)]
pub struct Allocation {
    pub file: File,
    /// Location on disk, under the allocator root.
    pub path: PathBuf,
    /// `path` relative to the root, `/`-separated.
    pub name: String,
    pub extension: String,
    /// Set when the name was taken and a new subdirectory had to be created.
    pub collision_dir: Option<PathBuf>,
}

/// Hands out unique paths under a root directory without ever overwriting an
/// existing file.
#[derive(Clone, Debug)]
pub struct NameAllocator {
    root: PathBuf,
    random_name: bool,
}

impl NameAllocator {
    pub fn new(root: impl Into<PathBuf>, random_name: bool) -> Self {
        Self {
            root: root.into(),
            random_name,
        }
    }

    /// Creates a new file for `file_name`, taking the extension from the name
    /// or else from `content_type`.
    ///
    /// Keeps the (normalised) name when possible. If it is taken the file goes
    /// into a new uniquely named subdirectory instead.
    pub async fn allocate(&self, content_type: &str, file_name: &str) -> Result<Allocation> {
        fs::create_dir_all(&self.root).await?;

        let (stem, extension) = split_name(file_name);
        let extension = match extension {
            Some(ext) => ext,
            None => media::extension_for(content_type)?.to_string(),
        };

        if self.random_name || stem.is_empty() {
            return self.allocate_random(extension).await;
        }

        let file_name = format!("{stem}.{extension}");
        let path = self.root.join(&file_name);
        match create_new(&path).await {
            Ok(file) => Ok(Allocation {
                file,
                path,
                name: file_name,
                extension,
                collision_dir: None,
            }),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!(%file_name, "name in use, allocating collision directory");
                self.allocate_in_new_dir(file_name, extension).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn allocate_random(&self, extension: String) -> Result<Allocation> {
        for _ in 0..MAX_ATTEMPTS {
            let file_name = format!("{}.{extension}", random_stem());
            let path = self.root.join(&file_name);
            match create_new(&path).await {
                Ok(file) => {
                    return Ok(Allocation {
                        file,
                        path,
                        name: file_name,
                        extension,
                        collision_dir: None,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(Error::storage("could not allocate a unique file name"))
    }

    async fn allocate_in_new_dir(
        &self,
        file_name: String,
        extension: String,
    ) -> Result<Allocation> {
        for _ in 0..MAX_ATTEMPTS {
            let dir_name = random_stem();
            let dir = self.root.join(&dir_name);
            match fs::create_dir(&dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }

            let mut rollback = Rollback::new();
            rollback.dir(&dir);
            let path = dir.join(&file_name);
            let file = create_new(&path).await?;
            rollback.commit();

            return Ok(Allocation {
                file,
                path,
                name: format!("{dir_name}/{file_name}"),
                extension,
                collision_dir: Some(dir),
            });
        }
        Err(Error::storage("could not allocate a collision directory"))
    }
}

async fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path).await
}

fn random_stem() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Splits a client supplied name into a normalised stem and optional
/// extension.
///
/// Only the last path component is kept and every character outside
/// `[A-Za-z0-9_]` becomes `_`, so stored names always match the lookup
/// pattern.
pub fn split_name(file_name: &str) -> (String, Option<String>) {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let (stem, extension) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };
    let stem = if stem.chars().all(|c| c == '.') {
        String::new()
    } else {
        sanitize(stem)
    };
    (stem, extension.map(sanitize))
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    fn parts(stem: &str, ext: Option<&str>) -> (String, Option<String>) {
        (stem.to_string(), ext.map(str::to_string))
    }

    #[test]
    fn split_name_normalises() {
        assert_eq!(split_name("pic.jpg"), parts("pic", Some("jpg")));
        assert_eq!(split_name("../../etc/passwd"), parts("passwd", None));
        assert_eq!(split_name("C:\\tmp\\my pic.v2.png"), parts("my_pic_v2", Some("png")));
        assert_eq!(split_name("build"), parts("build", None));
        assert_eq!(split_name(""), parts("", None));
        assert_eq!(split_name(".."), parts("", None));
        assert_eq!(split_name(".hidden"), parts("_hidden", None));
    }

    #[tokio::test]
    async fn keeps_name_and_creates_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested/img");
        let allocator = NameAllocator::new(&root, false);

        let allocation = allocator.allocate("image/png", "file.png").await.unwrap();

        assert_eq!(allocation.name, "file.png");
        assert_eq!(allocation.path, root.join("file.png"));
        assert_eq!(allocation.extension, "png");
        assert!(allocation.collision_dir.is_none());
    }

    #[tokio::test]
    async fn extension_comes_from_content_type() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = NameAllocator::new(tmp.path(), false);

        let allocation = allocator.allocate("image/jpeg", "build").await.unwrap();
        assert_eq!(allocation.name, "build.jpg");

        let err = allocator.allocate("text/plain", "build").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedMediaType(_)));
    }

    #[tokio::test]
    async fn collision_goes_to_new_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = NameAllocator::new(tmp.path(), false);

        let mut first = allocator.allocate("image/png", "file.png").await.unwrap();
        first.file.write_all(b"first").await.unwrap();
        first.file.flush().await.unwrap();

        let second = allocator.allocate("image/png", "file.png").await.unwrap();
        let dir = second.collision_dir.clone().unwrap();

        assert_ne!(first.path, second.path);
        assert_eq!(second.path, dir.join("file.png"));
        let (dir_name, file_name) = second.name.split_once('/').unwrap();
        assert_eq!(file_name, "file.png");
        assert_eq!(tmp.path().join(dir_name), dir);
        assert_eq!(fs::read(&first.path).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn random_mode_ignores_stem() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = NameAllocator::new(tmp.path(), true);

        let first = allocator.allocate("image/png", "file.png").await.unwrap();
        let second = allocator.allocate("image/png", "file.png").await.unwrap();

        assert_ne!(first.name, "file.png");
        assert_ne!(first.name, second.name);
        assert!(first.name.ends_with(".png"));
        assert!(first.collision_dir.is_none() && second.collision_dir.is_none());
    }

    #[tokio::test]
    async fn empty_name_gets_random_stem() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = NameAllocator::new(tmp.path(), false);

        let allocation = allocator.allocate("image/gif", "").await.unwrap();

        assert!(allocation.name.ends_with(".gif"));
        assert!(allocation.name.len() > ".gif".len());
        assert!(!allocation.name.contains('/'));
    }
}
