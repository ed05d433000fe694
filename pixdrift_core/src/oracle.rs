use crate::config::ConfigError;
use crate::format::FormatTag;
use crate::mutator::MutationMode;
use image::{ImageError, ImageFormat, ImageReader, Limits};
use serde::Deserialize;
use std::any::Any;
use std::fmt;
use std::io::Cursor;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Pixel count above which a candidate is treated as a decompression bomb.
const DEFAULT_MAX_PIXELS: u64 = 89_478_485;
const DEFAULT_MAX_DIMENSION: u32 = u16::MAX as u32;
const DEFAULT_MAX_ALLOC: u64 = 512 * 1024 * 1024;

/// Why a candidate failed the oracle. None of these ever escape a campaign as an
/// error; they only explain a `Verdict::Fail`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The candidate file is absent or could not be read.
    #[error("candidate unreadable: {0}")]
    Unreadable(String),
    /// The decoder found the bytes structurally invalid.
    #[error("decode rejected: {0}")]
    DecodeRejected(String),
    /// A size guard tripped before or during decoding.
    #[error("decode unsafe: {0}")]
    DecodeUnsafe(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(OracleError),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl From<Result<(), OracleError>> for Verdict {
    fn from(result: Result<(), OracleError>) -> Self {
        match result {
            Ok(()) => Verdict::Pass,
            Err(e) => Verdict::Fail(e),
        }
    }
}

/// Size guards applied to every decode.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields, default)]
pub struct DecodeLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub max_pixels: u64,
    /// Upper bound on decoder allocations, in bytes.
    pub max_alloc: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
            max_pixels: DEFAULT_MAX_PIXELS,
            max_alloc: DEFAULT_MAX_ALLOC,
        }
    }
}

impl DecodeLimits {
    fn image_limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_width);
        limits.max_image_height = Some(self.max_height);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<(), OracleError> {
        if width > self.max_width || height > self.max_height {
            return Err(OracleError::DecodeUnsafe(format!(
                "dimensions {width}x{height} exceed {}x{}",
                self.max_width, self.max_height
            )));
        }
        let pixels = u64::from(width) * u64::from(height);
        if pixels > self.max_pixels {
            return Err(OracleError::DecodeUnsafe(format!(
                "{pixels} pixels exceed the limit of {}, could be a decompression bomb",
                self.max_pixels
            )));
        }
        Ok(())
    }
}

/// An `Oracle` decides whether a candidate is still a valid instance of the
/// campaign's format.
///
/// Implementations judge raw bytes in [`Oracle::examine`]; [`Oracle::test`] wraps
/// that with the file read so that a missing or unreadable candidate is a failing
/// verdict rather than an error.
pub trait Oracle: Send + Sync {
    fn name(&self) -> &'static str;

    /// Judges a candidate's bytes. Must not panic on any input.
    fn examine(&self, data: &[u8]) -> Result<(), OracleError>;

    /// Reads the candidate at `path` and judges it.
    fn test(&self, path: &Path) -> Verdict {
        match std::fs::read(path) {
            Ok(data) => self.examine(&data).into(),
            Err(e) => Verdict::Fail(OracleError::Unreadable(format!("{}: {e}", path.display()))),
        }
    }
}

impl<T: Oracle + ?Sized> Oracle for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn examine(&self, data: &[u8]) -> Result<(), OracleError> {
        (**self).examine(data)
    }
}

/// Strength of the pass criterion, selected by configuration. When nothing
/// selects one, [`OracleStrength::for_mode`] picks it from the mutation mode.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OracleStrength {
    /// The header parses and the declared dimensions are within limits.
    Open,
    /// `Open`, plus the whole pixel plane decodes.
    Verify,
}

impl OracleStrength {
    /// The strength used when neither the command line nor the configuration
    /// names one: byte edits are checked with a full decode, bit flips only
    /// with the header check.
    pub fn for_mode(mode: MutationMode) -> Self {
        match mode {
            MutationMode::Bit => OracleStrength::Open,
            MutationMode::Byte => OracleStrength::Verify,
        }
    }

    /// Boxes the oracle for `format` that this strength stands for.
    pub fn build(self, format: FormatTag, limits: DecodeLimits) -> Box<dyn Oracle> {
        match self {
            OracleStrength::Open => Box::new(OpenOracle::new(format, limits)),
            OracleStrength::Verify => Box::new(VerifyOracle::new(format, limits)),
        }
    }
}

impl FromStr for OracleStrength {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(OracleStrength::Open),
            "verify" => Ok(OracleStrength::Verify),
            _ => Err(ConfigError::UnknownOracle(s.to_string())),
        }
    }
}

impl fmt::Display for OracleStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleStrength::Open => f.write_str("open"),
            OracleStrength::Verify => f.write_str("verify"),
        }
    }
}

fn classify(err: ImageError) -> OracleError {
    match err {
        ImageError::Limits(e) => OracleError::DecodeUnsafe(e.to_string()),
        other => OracleError::DecodeRejected(other.to_string()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic type".to_string()
    }
}

/// Runs a decoder step, turning a decoder panic into a rejection.
fn guarded<T>(f: impl FnOnce() -> Result<T, OracleError>) -> Result<T, OracleError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(OracleError::DecodeRejected(format!(
            "decoder panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn reader<'a>(
    data: &'a [u8],
    format: ImageFormat,
    limits: &DecodeLimits,
) -> ImageReader<Cursor<&'a [u8]>> {
    let mut reader = ImageReader::new(Cursor::new(data));
    reader.set_format(format);
    reader.limits(limits.image_limits());
    reader
}

fn open_check(data: &[u8], format: ImageFormat, limits: &DecodeLimits) -> Result<(), OracleError> {
    guarded(|| {
        let (width, height) = reader(data, format, limits)
            .into_dimensions()
            .map_err(classify)?;
        limits.check_dimensions(width, height)
    })
}

/// Passes candidates whose header decodes as the target format.
#[derive(Debug, Clone)]
pub struct OpenOracle {
    format: FormatTag,
    limits: DecodeLimits,
}

impl OpenOracle {
    /// # Arguments
    /// * `format`: the only format a candidate may decode as.
    /// * `limits`: bounds on the declared dimensions.
    pub fn new(format: FormatTag, limits: DecodeLimits) -> Self {
        Self { format, limits }
    }
}

impl Oracle for OpenOracle {
    fn name(&self) -> &'static str {
        "OpenOracle"
    }

    fn examine(&self, data: &[u8]) -> Result<(), OracleError> {
        open_check(data, self.format.image_format(), &self.limits)
    }
}

/// Passes candidates that open and also decode to a full pixel buffer.
#[derive(Debug, Clone)]
pub struct VerifyOracle {
    format: FormatTag,
    limits: DecodeLimits,
}

impl VerifyOracle {
    /// Same arguments as [`OpenOracle::new`]; `limits.max_alloc` additionally
    /// caps the decoded pixel buffer.
    pub fn new(format: FormatTag, limits: DecodeLimits) -> Self {
        Self { format, limits }
    }
}

impl Oracle for VerifyOracle {
    fn name(&self) -> &'static str {
        "VerifyOracle"
    }

    fn examine(&self, data: &[u8]) -> Result<(), OracleError> {
        let format = self.format.image_format();
        open_check(data, format, &self.limits)?;
        guarded(|| {
            reader(data, format, &self.limits)
                .decode()
                .map(|_| ())
                .map_err(classify)
        })
    }
}
