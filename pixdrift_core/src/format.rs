use crate::config::ConfigError;
use image::ImageFormat;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Image formats a campaign can target. The tag fixes the file extension of every
/// population member and the decoder the oracle uses.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FormatTag {
    Png,
    Bmp,
}

impl FormatTag {
    /// Lowercase extension without the dot, as used in member file names.
    pub fn extension(&self) -> &'static str {
        match self {
            FormatTag::Png => "png",
            FormatTag::Bmp => "bmp",
        }
    }

    /// The decoder `image` should use for this format.
    pub fn image_format(&self) -> ImageFormat {
        match self {
            FormatTag::Png => ImageFormat::Png,
            FormatTag::Bmp => ImageFormat::Bmp,
        }
    }

    /// Derives the format from a file's extension, e.g. a seed handed to `fuzz`.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| ConfigError::MissingExtension(path.to_path_buf()))?;
        extension.parse()
    }
}

impl FromStr for FormatTag {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Ok(FormatTag::Png),
            "bmp" => Ok(FormatTag::Bmp),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
