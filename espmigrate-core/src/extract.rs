//! Contains the logic for reading images off the source board.
//!
//! The source board has flash encryption disabled, so everything read from it
//! is plaintext. Regions the destination board will decrypt on access are
//! encrypted locally before being staged:
//! 1.  The bootloader is read and encrypted.
//! 2.  The partition table is read and parsed.
//! 3.  Each partition is read; app partitions are encrypted, data partitions
//!     are staged as plaintext.
//! 4.  The partition table itself is encrypted.
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::partition;
use crate::staging::{self, StagedImage};
use crate::tool::Toolchain;

/// Name under which the bootloader is staged.
pub const BOOTLOADER_NAME: &str = "bootloader";
/// Name under which the partition table is staged.
pub const PARTITION_TABLE_NAME: &str = "partition_table";

/// A single tool step of a pipeline, reported before it runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Reading a region into the named staged file.
    Read(String),
    /// Encrypting into the named staged file.
    Encrypt(String),
    /// Writing the named staged file to the board.
    Write(String),
}

impl Step {
    pub fn artifact(&self) -> &str {
        match self {
            Step::Read(name) | Step::Encrypt(name) | Step::Write(name) => name,
        }
    }
}

/// Reads every image off the source board into the staging directory.
///
/// This function performs a sequence of blocking tool runs. Each one must
/// succeed before the next starts; the first failure stops the pipeline and
/// leaves whatever was already staged in place.
///
/// # Arguments
///
/// * `tools` - The delegated tools, bound to the source board's port.
/// * `on_step` - A closure that is called before every tool run with the
///   step about to be performed.
///
/// # Returns
///
/// The images that were staged, in the order they were produced.
///
/// # Errors
///
/// This function will return an error if:
/// - A tool cannot be started or exits with a non-zero status.
/// - The partition table file cannot be read, is shorter than the configured
///   table length, or ends in the middle of a record.
/// - A plaintext file cannot be removed after encryption.
pub fn run<F>(tools: &Toolchain<'_>, mut on_step: F) -> Result<Vec<StagedImage>>
where
    F: FnMut(&Step),
{
    let layout = tools.config().layout;
    let mut staged = Vec::new();

    // Bootloader
    let bootloader = StagedImage::plain(layout.bootloader_offset, BOOTLOADER_NAME);
    read_region(tools, &bootloader, layout.bootloader_len, &mut on_step)?;
    staged.push(encrypt(tools, &bootloader, &mut on_step)?);

    // Partition table
    let table_image = StagedImage::plain(layout.partition_table_offset, PARTITION_TABLE_NAME);
    read_region(tools, &table_image, layout.partition_table_len, &mut on_step)?;
    let table_path = tools.config().staged_path(&table_image.file_name());
    let table = load_table(&table_path, layout.partition_table_len as usize)?;

    for record in partition::parse(&table) {
        let record = record?;
        log::info!(
            "partition {} type {:#04x} at {:#x} ({:#x} bytes)",
            record.name,
            record.ty,
            record.offset,
            record.size
        );

        let image = StagedImage::plain(record.offset, record.name.as_str());
        read_region(tools, &image, record.size, &mut on_step)?;
        if record.is_app() {
            staged.push(encrypt(tools, &image, &mut on_step)?);
        } else {
            staged.push(image);
        }
    }

    staged.push(encrypt(tools, &table_image, &mut on_step)?);
    Ok(staged)
}

fn read_region<F>(
    tools: &Toolchain<'_>,
    image: &StagedImage,
    len: u32,
    on_step: &mut F,
) -> Result<()>
where
    F: FnMut(&Step),
{
    let file_name = image.file_name();
    on_step(&Step::Read(file_name.clone()));
    tools.read_flash(image.offset, len, &tools.config().staged_path(&file_name))
}

/// Encrypts a staged plaintext image and removes the plaintext.
fn encrypt<F>(tools: &Toolchain<'_>, plain: &StagedImage, on_step: &mut F) -> Result<StagedImage>
where
    F: FnMut(&Step),
{
    let encrypted = plain.to_encrypted();
    let input = tools.config().staged_path(&plain.file_name());
    let output = tools.config().staged_path(&encrypted.file_name());

    on_step(&Step::Encrypt(encrypted.file_name()));
    tools.encrypt_flash_data(plain.offset, &input, &output)?;
    staging::remove(&input)?;
    Ok(encrypted)
}

fn load_table(path: &Path, expected: usize) -> Result<Vec<u8>> {
    let mut buf = fs::read(path).map_err(|e| Error::file_access(path, e))?;
    if buf.len() < expected {
        return Err(Error::PartitionTableTooShort {
            path: path.to_path_buf(),
            len: buf.len(),
            expected,
        });
    }
    buf.truncate(expected);
    Ok(buf)
}
