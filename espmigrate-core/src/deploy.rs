//! Contains the logic for writing staged images to the destination board.
//!
//! Every staged file carries its flash offset in its name, so the partition
//! table is not consulted here. Files are written one at a time and each is
//! deleted only after its write succeeded. After an interrupted deployment
//! the files that remain are exactly the ones still to be written; they have
//! to be flashed by hand, since a new migration refuses to start while staged
//! images are present.
use crate::error::Result;
use crate::extract::Step;
use crate::staging;
use crate::tool::Toolchain;

/// Writes every staged image to the destination board.
///
/// # Arguments
///
/// * `tools` - The delegated tools, bound to the destination board's port.
/// * `on_start` - A closure that is called once with the number of staged
///   files that will be written.
/// * `on_step` - A closure that is called before every write.
///
/// # Returns
///
/// The number of files written.
///
/// # Errors
///
/// This function will return an error if:
/// - The staging directory cannot be listed.
/// - A write fails. Files written before it are already on the board and
///   removed locally; the failing file and every later one stay on disk.
/// - A written file cannot be removed.
pub fn run<F>(tools: &Toolchain<'_>, on_start: impl FnOnce(usize), mut on_step: F) -> Result<usize>
where
    F: FnMut(&Step),
{
    let files = staging::discover(&tools.config().staging_dir)?;
    on_start(files.len());
    if files.is_empty() {
        log::warn!(
            "no staged images found in {}",
            tools.config().staging_dir.display()
        );
    }

    for file in &files {
        let name = file.file_name();
        on_step(&Step::Write(name.clone()));
        tools.write_flash(file.image.offset, &file.path)?;
        staging::remove(&file.path)?;
        log::info!("wrote {name} at {:#x}", file.image.offset);
    }

    Ok(files.len())
}
