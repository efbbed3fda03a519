//! Naming and discovery of staged images.
//!
//! The staging directory is the only state carried from the extraction phase
//! to the deployment phase. Each file holds one flash region and is named
//! `<offset>_<name>.bin`, with [`ENCRYPTED_SUFFIX`] appended once encrypted,
//! e.g. `0x10000_app.bin.CRYPT`. The offset in the name is the only place
//! the deployment phase learns where a file goes.
use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;

use crate::error::{Error, Result};
use crate::tool::hex;

/// Appended to the name of an encrypted image.
pub const ENCRYPTED_SUFFIX: &str = ".CRYPT";

/// Glob matching every staged file name, plain or encrypted.
pub const STAGED_PATTERN: &str = "0x*_*.bin*";

/// A flash region stored in the staging directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedImage {
    pub offset: u32,
    pub name: String,
    pub encrypted: bool,
}

impl StagedImage {
    pub fn plain(offset: u32, name: impl Into<String>) -> Self {
        Self {
            offset,
            name: name.into(),
            encrypted: false,
        }
    }

    /// The same region after encryption.
    pub fn to_encrypted(&self) -> Self {
        Self {
            encrypted: true,
            ..self.clone()
        }
    }

    pub fn file_name(&self) -> String {
        let suffix = if self.encrypted { ENCRYPTED_SUFFIX } else { "" };
        format!("{}_{}.bin{}", hex(self.offset), self.name, suffix)
    }

    /// Recovers a staged image from its file name.
    ///
    /// Accepts anything matching [`STAGED_PATTERN`] whose prefix before the
    /// first `_` is a hexadecimal offset, so files renamed by hand still
    /// deploy to the right place.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        if !staged_pattern().matches(file_name) {
            return None;
        }

        let (offset, rest) = file_name.split_once('_')?;
        let offset = u32::from_str_radix(offset.strip_prefix("0x")?, 16).ok()?;
        let encrypted = rest.ends_with(ENCRYPTED_SUFFIX);
        let stem = rest.strip_suffix(ENCRYPTED_SUFFIX).unwrap_or(rest);
        let name = stem.strip_suffix(".bin").unwrap_or(stem);

        Some(Self {
            offset,
            name: name.to_string(),
            encrypted,
        })
    }
}

fn staged_pattern() -> Pattern {
    Pattern::new(STAGED_PATTERN).expect("staged file pattern is valid")
}

/// A staged image found on disk.
#[derive(Clone, Debug)]
pub struct StagedFile {
    pub image: StagedImage,
    pub path: PathBuf,
}

impl StagedFile {
    /// The file name as found on disk.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.image.file_name())
    }
}

/// Lists the staged images in `dir`, lowest flash offset first.
pub fn discover(dir: &Path) -> Result<Vec<StagedFile>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::file_access(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::file_access(dir, e))?;
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };
        if !entry.path().is_file() {
            continue;
        }
        if let Some(image) = StagedImage::from_file_name(&file_name) {
            files.push(StagedFile {
                image,
                path: entry.path(),
            });
        }
    }

    files.sort_by(|a, b| {
        a.image
            .offset
            .cmp(&b.image.offset)
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(files)
}

/// Removes a staged file once its contents are no longer needed.
pub(crate) fn remove(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| Error::file_access(path, e))?;
    log::debug!("removed {}", path.display());
    Ok(())
}
