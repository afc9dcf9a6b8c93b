//! Download naming for received attachments.
//!
//! Given an [`Attachment`], pick the local filename and content type for
//! saving it. The kind to extension mapping is a table; kinds without an entry
//! keep their original name and are saved as an octet stream.

use quadchat_proto::{Attachment, AttachmentKind};

/// Content type for kinds without a table entry.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Name used when the attachment carries no usable filename.
const FALLBACK_STEM: &str = "attachment";

/// Kind → (extension, content type).
const DOWNLOAD_TABLE: &[(AttachmentKind, &str, &str)] = &[
    (AttachmentKind::Pdf, "pdf", "application/pdf"),
    (
        AttachmentKind::Word,
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (
        AttachmentKind::Excel,
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (AttachmentKind::Image, "jpg", "image/jpeg"),
    (AttachmentKind::Video, "mp4", "video/mp4"),
];

/// Where and how to save a downloaded attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// Local filename, no directory components.
    pub filename: String,
    /// Content type to record for the saved bytes.
    pub content_type: &'static str,
}

/// Resolve the download target for `attachment`.
pub fn download_target(attachment: &Attachment) -> DownloadTarget {
    let original = base_name(attachment);

    match DOWNLOAD_TABLE.iter().find(|(kind, _, _)| *kind == attachment.kind) {
        Some((_, extension, content_type)) => DownloadTarget {
            filename: format!("{}.{extension}", stem(&original)),
            content_type,
        },
        None => DownloadTarget { filename: original, content_type: OCTET_STREAM },
    }
}

/// Filename from the attachment, else the last URL path segment.
fn base_name(attachment: &Attachment) -> String {
    let candidate = if attachment.filename.trim().is_empty() {
        attachment.url.split(['?', '#']).next().unwrap_or_default()
    } else {
        attachment.filename.as_str()
    };

    let name = candidate.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        FALLBACK_STEM.to_string()
    } else {
        name.to_string()
    }
}

fn stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}
