//! Local cache of model code pushed by the controller.
//!
//! Layout: `<work_dir>/model_cache/<model_id>/...`. An archive is unpacked
//! into a hidden staging directory next to its final location and renamed
//! into place only after every entry was checked and written, so a model
//! directory is either absent or complete.

use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flotilla_protocol::MODEL_CACHE_DIR;
use tar::EntryType;

use crate::error::ArtifactError;

const STAGING_PREFIX: &str = ".staging-";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone)]
pub struct ModelCache {
    root: PathBuf,
}

impl ModelCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache rooted under an agent work directory.
    pub fn under(work_dir: &Path) -> Self {
        Self::new(work_dir.join(MODEL_CACHE_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cached directory for `model_id`, if one has been installed.
    pub fn resolve(&self, model_id: &str) -> Option<PathBuf> {
        validate_model_id(model_id).ok()?;
        let dir = self.root.join(model_id);
        dir.is_dir().then_some(dir)
    }

    /// Ids of every installed model, sorted.
    pub fn list_models(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut models: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect();
        models.sort();
        models
    }

    /// Unpack `archive` (tar, optionally gzip-compressed) as the code for
    /// `model_id`, replacing any previous install.
    pub fn install(&self, model_id: &str, archive: &[u8]) -> Result<PathBuf, ArtifactError> {
        validate_model_id(model_id)?;
        fs::create_dir_all(&self.root)?;

        let staging = self.root.join(format!(
            "{STAGING_PREFIX}{model_id}-{}",
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir(&staging)?;

        let target = self.root.join(model_id);
        let result = unpack_checked(archive, &staging).and_then(|()| {
            if target.exists() {
                fs::remove_dir_all(&target)?;
            }
            fs::rename(&staging, &target)?;
            Ok(())
        });
        if let Err(e) = result {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        Ok(target)
    }
}

/// A model id must be a single, non-hidden path segment.
pub fn validate_model_id(model_id: &str) -> Result<(), ArtifactError> {
    let invalid = model_id.is_empty()
        || model_id.len() > 255
        || model_id.starts_with('.')
        || model_id.contains(['/', '\\', '\0'])
        || model_id.contains(['+', '#']);
    if invalid {
        return Err(ArtifactError::InvalidModelId(model_id.to_string()));
    }
    Ok(())
}

/// Map an archive path to a path relative to the extraction root.
/// `None` means the entry names the root itself.
fn contained_path(raw: &Path) -> Result<Option<PathBuf>, ArtifactError> {
    let mut relative = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArtifactError::UnsafeEntry(raw.display().to_string()));
            }
        }
    }
    Ok((!relative.as_os_str().is_empty()).then_some(relative))
}

fn unpack_checked(archive: &[u8], dest: &Path) -> Result<(), ArtifactError> {
    let reader: Box<dyn Read + '_> = if archive.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(archive))
    } else {
        Box::new(archive)
    };
    let mut tar = tar::Archive::new(reader);

    for entry in tar.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.into_owned();
        let entry_type = entry.header().entry_type();

        // Metadata records carry no file content.
        if matches!(
            entry_type,
            EntryType::XHeader
                | EntryType::XGlobalHeader
                | EntryType::GNULongName
                | EntryType::GNULongLink
        ) {
            continue;
        }

        let Some(relative) = contained_path(&raw)? else {
            continue;
        };
        let target = dest.join(&relative);

        if entry_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry_type.is_file() || entry_type == EntryType::Continuous {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&target)?;
        } else {
            return Err(ArtifactError::UnsupportedEntry {
                path: raw.display().to_string(),
                kind: format!("{entry_type:?}"),
            });
        }
    }
    Ok(())
}
