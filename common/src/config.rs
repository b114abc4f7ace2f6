use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub timelapse: TimelapseConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub pir: PirConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Raw mode string; parsed into [`Mode`] at dispatch time.
    #[serde(default = "default_mode")]
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    #[serde(default = "default_video_dir")]
    pub video_dir: PathBuf,
    /// strftime pattern used for annotation text.
    #[serde(default = "default_datetime_format")]
    pub datetime_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Degrees; one of 0, 90, 180, 270.
    #[serde(default)]
    pub rotation: u32,
    #[serde(default)]
    pub vflip: bool,
    #[serde(default)]
    pub hflip: bool,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    /// `true` selects automatic exposure, `false` night exposure.
    #[serde(default = "default_true")]
    pub day: bool,
    #[serde(default)]
    pub led: bool,
    /// Stamp the capture time onto stills.
    #[serde(default)]
    pub annotate: bool,
    #[serde(default = "default_annotate_text_size")]
    pub annotate_text_size: u32,
    #[serde(default = "default_annotate_foreground")]
    pub annotate_foreground: Color,
    #[serde(default = "default_annotate_background")]
    pub annotate_background: Color,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    /// Zero-padded width of the sequence number in filenames.
    #[serde(default = "default_sequence_size")]
    pub sequence_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelapseConfig {
    #[serde(default = "default_sequence_start")]
    pub sequence_start: u64,
    #[serde(default = "default_total_images")]
    pub total_images: u64,
    #[serde(default = "default_time_between_secs")]
    pub time_between_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Cooldown after a still capture, and the polling period of the motion loops.
    #[serde(default = "default_minimum_still_secs")]
    pub minimum_still_secs: f64,
    /// Per-macroblock magnitude a vector must exceed to count.
    #[serde(default = "default_magnitude")]
    pub magnitude: u8,
    /// Motion is declared when strictly more than this many macroblocks count.
    #[serde(default = "default_occurrences")]
    pub occurrences: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f64,
    #[serde(default = "default_video_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PirConfig {
    #[serde(default = "default_sensor_pin")]
    pub sensor_pin: u8,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            video_dir: default_video_dir(),
            datetime_format: default_datetime_format(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            rotation: 0,
            vflip: false,
            hflip: false,
            framerate: default_framerate(),
            day: true,
            led: false,
            annotate: false,
            annotate_text_size: default_annotate_text_size(),
            annotate_foreground: default_annotate_foreground(),
            annotate_background: default_annotate_background(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            format: ImageFormat::default(),
            prefix: default_prefix(),
            suffix: String::new(),
            sequence_size: default_sequence_size(),
        }
    }
}

impl Default for TimelapseConfig {
    fn default() -> Self {
        Self {
            sequence_start: default_sequence_start(),
            total_images: default_total_images(),
            time_between_secs: default_time_between_secs(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            minimum_still_secs: default_minimum_still_secs(),
            magnitude: default_magnitude(),
            occurrences: default_occurrences(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            prefix: default_video_prefix(),
        }
    }
}

impl Default for PirConfig {
    fn default() -> Self {
        Self {
            sensor_pin: default_sensor_pin(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cam = &self.camera;
        if !matches!(cam.rotation, 0 | 90 | 180 | 270) {
            return Err(ConfigError::Invalid(format!(
                "camera.rotation must be 0, 90, 180 or 270, got {}",
                cam.rotation
            )));
        }
        if cam.width == 0 || cam.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera resolution must be non-zero, got {}x{}",
                cam.width, cam.height
            )));
        }
        if cam.framerate == 0 {
            return Err(ConfigError::Invalid("camera.framerate must be non-zero".into()));
        }
        if self.image.sequence_size == 0 {
            return Err(ConfigError::Invalid("image.sequence_size must be non-zero".into()));
        }
        check_secs("motion.minimum_still_secs", self.motion.minimum_still_secs)?;
        check_secs("video.duration_secs", self.video.duration_secs)?;
        check_secs("timelapse.time_between_secs", self.timelapse.time_between_secs)?;
        if self.timelapse.time_between_secs == 0.0 {
            return Err(ConfigError::Invalid(
                "timelapse.time_between_secs must be greater than zero".into(),
            ));
        }
        if self.pir.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("pir.poll_interval_ms must be non-zero".into()));
        }
        Ok(())
    }
}

/// Seconds must convert to a `Duration`, which also rules out negative,
/// non-finite and overflowing values.
fn check_secs(field: &str, value: f64) -> Result<(), ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|e| {
        ConfigError::Invalid(format!("{field} must be a valid number of seconds, got {value}: {e}"))
    })?;
    Ok(())
}

impl TimelapseConfig {
    pub fn time_between(&self) -> Duration {
        Duration::from_secs_f64(self.time_between_secs)
    }
}

impl MotionConfig {
    pub fn minimum_still(&self) -> Duration {
        Duration::from_secs_f64(self.minimum_still_secs)
    }
}

impl VideoConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs)
    }
}

impl PirConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// -- Mode ---------------------------------------------------------------------

/// Capture strategy selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    TestImage,
    Timelapse,
    MotionImage,
    MotionVideo,
    PirImage,
    PirVideo,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::TestImage,
        Mode::Timelapse,
        Mode::MotionImage,
        Mode::MotionVideo,
        Mode::PirImage,
        Mode::PirVideo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::TestImage => "TESTIMAGE",
            Mode::Timelapse => "TIMELAPSE",
            Mode::MotionImage => "MOTIONIMAGE",
            Mode::MotionVideo => "MOTIONVIDEO",
            Mode::PirImage => "PIRIMAGE",
            Mode::PirVideo => "PIRVIDEO",
        }
    }

    /// Whether this mode writes stills into the image directory.
    pub fn writes_images(&self) -> bool {
        matches!(
            self,
            Mode::TestImage | Mode::Timelapse | Mode::MotionImage | Mode::PirImage
        )
    }

    /// Whether this mode writes clips into the video directory.
    pub fn writes_videos(&self) -> bool {
        matches!(self, Mode::MotionVideo | Mode::PirVideo)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown mode '{0}', expected one of TESTIMAGE, TIMELAPSE, MOTIONIMAGE, MOTIONVIDEO, PIRIMAGE, PIRVIDEO")]
pub struct UnknownMode(pub String);

// -- Image format -------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Bmp,
    Gif,
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Filename extension including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Bmp => ".bmp",
            ImageFormat::Gif => ".gif",
            ImageFormat::Jpeg => ".jpg",
            ImageFormat::Png => ".png",
        }
    }

    /// Encoding name understood by the still-capture tool.
    pub fn encoding(&self) -> &'static str {
        match self {
            ImageFormat::Bmp => "bmp",
            ImageFormat::Gif => "gif",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

// -- Annotation colour ----------------------------------------------------------

/// RGB colour written as `#rrggbb` in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Encode as the `0xVVUUYY` value the camera firmware expects for
    /// annotation colours (BT.601 full range).
    pub fn to_yuv_hex(&self) -> String {
        let (r, g, b) = (self.r as f64, self.g as f64, self.b as f64);
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        let u = -0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0;
        let v = 0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0;
        let q = |c: f64| c.round().clamp(0.0, 255.0) as u8;
        format!("0x{:02x}{:02x}{:02x}", q(v), q(u), q(y))
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let hex = value.strip_prefix('#').unwrap_or(&value);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("expected colour as #rrggbb, got '{value}'"));
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }
}

// Default value functions
fn default_mode() -> String {
    Mode::TestImage.as_str().into()
}
fn default_image_dir() -> PathBuf {
    PathBuf::from("./images")
}
fn default_video_dir() -> PathBuf {
    PathBuf::from("./video")
}
fn default_datetime_format() -> String {
    "%Y-%m-%d %H:%M:%S".into()
}
fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}
fn default_framerate() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_annotate_text_size() -> u32 {
    32
}
fn default_annotate_foreground() -> Color {
    Color::rgb(0xff, 0xff, 0xff)
}
fn default_annotate_background() -> Color {
    Color::rgb(0, 0, 0)
}
fn default_prefix() -> String {
    "img".into()
}
fn default_sequence_size() -> usize {
    7
}
fn default_sequence_start() -> u64 {
    1
}
fn default_total_images() -> u64 {
    5000
}
fn default_time_between_secs() -> f64 {
    10.0
}
fn default_minimum_still_secs() -> f64 {
    1.0
}
fn default_magnitude() -> u8 {
    80
}
fn default_occurrences() -> usize {
    10
}
fn default_duration_secs() -> f64 {
    30.0
}
fn default_video_prefix() -> String {
    "mov".into()
}
fn default_sensor_pin() -> u8 {
    11
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".into()
}
