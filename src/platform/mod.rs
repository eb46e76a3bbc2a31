//! Platform-specific stuff

use std::fs::Metadata;

use cfg_if::cfg_if;

use crate::zip_archive_parts::file::ZipEntry;
#[cfg(not(any(unix, target_os = "windows")))]
use crate::zip_archive_parts::file::{DOS_DIRECTORY, DOS_READ_ONLY};

pub(crate) const DEFAULT_UNIX_FILE_ATTRS: u32 = 0o100644;
pub(crate) const DEFAULT_UNIX_DIR_ATTRS: u32 = 0o040755;

/// Copies the permission information the filesystem provides for `metadata` into `entry`.
///
/// On Unix this is the full mode, which makes the entry a Unix entry. Elsewhere only the
/// MS-DOS attribute byte is filled in.
pub(crate) fn apply_fs_attributes(entry: &mut ZipEntry, metadata: &Metadata) {
    cfg_if! {
        if #[cfg(unix)] {
            use std::os::unix::fs::PermissionsExt;
            entry.set_unix_mode(metadata.permissions().mode());
        } else if #[cfg(target_os = "windows")] {
            use std::os::windows::fs::MetadataExt;
            entry.set_external_attributes(metadata.file_attributes() & 0xFF);
        } else {
            let mut attrs = 0;
            if metadata.permissions().readonly() {
                attrs |= DOS_READ_ONLY;
            }
            if metadata.is_dir() {
                attrs |= DOS_DIRECTORY;
            }
            entry.set_external_attributes(attrs);
        }
    }
}
