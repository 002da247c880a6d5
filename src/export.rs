//! Saving finished recordings for download
//!
//! Files are named `{label}_recording.{ext}` where every character of the
//! device label outside `[A-Za-z0-9]` becomes `_`.

use crate::error::CaptureError;
use crate::models::{Artifact, EncodingFormat};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_FILE_EXTENSION: &str = "webm";

/// File extension for an encoding mime type
pub fn extension_for_mime(mime: &str) -> &'static str {
    match EncodingFormat::from_mime_type(mime) {
        Some(EncodingFormat::Webm) => "webm",
        Some(EncodingFormat::Mp4) => "m4a",
        Some(EncodingFormat::Ogg) => "ogg",
        Some(EncodingFormat::Wav) => "wav",
        None => DEFAULT_FILE_EXTENSION,
    }
}

pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn artifact_file_name(label: &str, mime: &str) -> String {
    format!(
        "{}_recording.{}",
        sanitize_label(label),
        extension_for_mime(mime)
    )
}

/// Directory downloads go to when none is configured
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Write an artifact's bytes into `dir`
///
/// Returns the path of the written file
pub fn save_artifact(
    artifact: &Artifact,
    label: &str,
    dir: impl AsRef<Path>,
) -> Result<PathBuf, CaptureError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let path = dir.join(artifact_file_name(label, artifact.mime_type()));
    fs::write(&path, artifact.bytes())?;

    info!(
        "Saved {} recording to {:?} ({} bytes)",
        artifact.channel,
        path,
        artifact.bytes().len()
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, EncodingFormat};

    #[test]
    fn test_extension_mapping() {
        assert_eq!(extension_for_mime("audio/webm"), "webm");
        assert_eq!(extension_for_mime("audio/mp4"), "m4a");
        assert_eq!(extension_for_mime("audio/ogg"), "ogg");
        assert_eq!(extension_for_mime("audio/wav"), "wav");
        assert_eq!(extension_for_mime("audio/x-unknown"), "webm");
    }

    #[test]
    fn test_file_name_sanitizes_label() {
        assert_eq!(
            artifact_file_name("Blue Yeti (USB) #2", "audio/ogg"),
            "Blue_Yeti__USB___2_recording.ogg"
        );
        assert_eq!(sanitize_label("Micro ü"), "Micro__");
    }

    #[test]
    fn test_save_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact::new(Channel::B, EncodingFormat::Wav, 8000, 2, vec![9, 8, 7]);

        let path = save_artifact(&artifact, "USB Mic", dir.path().join("downloads")).unwrap();

        assert_eq!(path.file_name().unwrap(), "USB_Mic_recording.wav");
        assert_eq!(fs::read(&path).unwrap(), vec![9, 8, 7]);
    }
}
