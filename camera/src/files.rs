use std::path::{Path, PathBuf};

use picam_common::config::{Config, Mode, StorageConfig};
use tracing::{debug, info};

/// Builds output paths for stills and clips.
///
/// Stills: `<image_dir>/<prefix><label><suffix><extension>`, where the label
/// is either free text ("test") or a zero-padded sequence number.
/// Clips: `<video_dir>/<video_prefix><sequence><suffix>.h264`.
#[derive(Debug, Clone)]
pub struct FileNamer {
    image_dir: PathBuf,
    video_dir: PathBuf,
    prefix: String,
    suffix: String,
    extension: &'static str,
    sequence_size: usize,
    video_prefix: String,
}

impl FileNamer {
    pub fn from_config(config: &Config) -> Self {
        Self {
            image_dir: config.storage.image_dir.clone(),
            video_dir: config.storage.video_dir.clone(),
            prefix: config.image.prefix.clone(),
            suffix: config.image.suffix.clone(),
            extension: config.image.format.extension(),
            sequence_size: config.image.sequence_size,
            video_prefix: config.video.prefix.clone(),
        }
    }

    pub fn image(&self, label: &str) -> PathBuf {
        self.image_dir.join(format!(
            "{}{}{}{}",
            self.prefix, label, self.suffix, self.extension
        ))
    }

    pub fn sequenced_image(&self, sequence: u64) -> PathBuf {
        self.image(&self.sequence_label(sequence))
    }

    pub fn video(&self, sequence: u64) -> PathBuf {
        self.video_dir.join(format!(
            "{}{}{}.h264",
            self.video_prefix,
            self.sequence_label(sequence),
            self.suffix
        ))
    }

    fn sequence_label(&self, sequence: u64) -> String {
        format!("{sequence:0width$}", width = self.sequence_size)
    }
}

/// Create the output directories the selected mode writes into.
pub fn ensure_directories(mode: Mode, storage: &StorageConfig) -> Result<(), DirectoryError> {
    info!(mode = %mode, "checking output folders");
    if mode.writes_images() {
        ensure_dir(&storage.image_dir)?;
    }
    if mode.writes_videos() {
        ensure_dir(&storage.video_dir)?;
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<(), DirectoryError> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "creating folder");
        std::fs::create_dir_all(dir).map_err(|e| DirectoryError(dir.display().to_string(), e))?;
    }
    debug!(dir = %dir.display(), "folder ready");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
#[error("failed to create directory {0}: {1}")]
pub struct DirectoryError(pub String, pub std::io::Error);

#[cfg(test)]
mod tests {
    use super::*;

    fn namer(toml: &str) -> FileNamer {
        FileNamer::from_config(&Config::parse(toml).unwrap())
    }

    #[test]
    fn timelapse_image_name() {
        let files = namer("[storage]\nimage_dir = \"/mnt/images\"\n");
        assert_eq!(
            files.sequenced_image(1),
            PathBuf::from("/mnt/images/img0000001.jpg")
        );
        assert_eq!(
            files.sequenced_image(1234567),
            PathBuf::from("/mnt/images/img1234567.jpg")
        );
    }

    #[test]
    fn sequence_wider_than_padding_is_kept() {
        let files = namer("[image]\nsequence_size = 2\n");
        assert_eq!(files.sequenced_image(123), PathBuf::from("./images/img123.jpg"));
    }

    #[test]
    fn labelled_image_uses_prefix_suffix_and_format() {
        let files = namer("[image]\nprefix = \"cam-\"\nsuffix = \"-a\"\nformat = \"bmp\"\n");
        assert_eq!(files.image("test"), PathBuf::from("./images/cam-test-a.bmp"));
    }

    #[test]
    fn video_name() {
        let files = namer("[storage]\nvideo_dir = \"/mnt/video\"\n[image]\nsuffix = \"_door\"\n");
        assert_eq!(
            files.video(3),
            PathBuf::from("/mnt/video/mov0000003_door.h264")
        );
    }

    #[test]
    fn creates_only_directories_the_mode_needs() {
        let root = std::env::temp_dir().join(format!("picam-dirs-{}", std::process::id()));
        let storage = StorageConfig {
            image_dir: root.join("images"),
            video_dir: root.join("video"),
            datetime_format: String::new(),
        };

        ensure_directories(Mode::Timelapse, &storage).unwrap();
        assert!(storage.image_dir.is_dir());
        assert!(!storage.video_dir.exists());

        ensure_directories(Mode::MotionVideo, &storage).unwrap();
        assert!(storage.video_dir.is_dir());

        // already present
        ensure_directories(Mode::MotionVideo, &storage).unwrap();

        std::fs::remove_dir_all(&root).unwrap();
    }
}
