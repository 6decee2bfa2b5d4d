//! Extension allow-list and folder classification for uploads.

use std::fmt;

/// Extensions accepted by the upload endpoint, lower-case with leading dot.
pub const ALLOWED_EXTENSIONS: [&str; 10] = [
    ".jpg", ".jpeg", ".png", ".gif", ".mp4", ".avi", ".mov", ".pdf", ".zip", ".rar",
];

/// Logical folder an upload is filed under, below the root prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folder {
    Images,
    Videos,
    Documents,
    CompressedArchives,
    Other,
}

impl Folder {
    /// Map a lower-cased extension (with leading dot) to its folder.
    pub fn for_extension(extension: &str) -> Self {
        match extension {
            ".jpg" | ".jpeg" | ".png" | ".gif" => Folder::Images,
            ".mp4" | ".avi" | ".mov" => Folder::Videos,
            ".pdf" => Folder::Documents,
            ".zip" | ".rar" => Folder::CompressedArchives,
            _ => Folder::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Folder::Images => "Images",
            Folder::Videos => "Videos",
            Folder::Documents => "Documents",
            Folder::CompressedArchives => "CompressedArchives",
            Folder::Other => "Other",
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-cased extension of `file_name`, including the dot.
///
/// Only the final path segment is considered; a trailing dot or a name with
/// no dot yields `None`.
pub fn extension_of(file_name: &str) -> Option<String> {
    let name = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let dot = name.rfind('.')?;
    if dot + 1 == name.len() {
        return None;
    }
    Some(name[dot..].to_lowercase())
}

/// Folder for an allowed file name, `None` when the extension is missing or
/// not on the allow-list.
pub fn classify(file_name: &str) -> Option<Folder> {
    let extension = extension_of(file_name)?;
    ALLOWED_EXTENSIONS
        .contains(&extension.as_str())
        .then(|| Folder::for_extension(&extension))
}
