use crate::config::ConfigError;
use crate::format::FormatTag;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use rand::Rng;
use rand_core::RngCore;
use std::fs;
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Largest width or height a generated seed may have. Keeps every header field
/// and scanline buffer of both formats well inside `u32`.
pub const MAX_SEED_DIMENSION: u32 = 4096;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
const PNG_BIT_DEPTH: u8 = 8;
const PNG_COLOR_TYPE_RGB: u8 = 2;

const BMP_FILE_HEADER_LEN: u32 = 14;
const BMP_INFO_HEADER_LEN: u32 = 40;
const BMP_BITS_PER_PIXEL: u16 = 24;
/// 72 DPI expressed in pixels per metre.
const BMP_PIXELS_PER_METRE: u32 = 2835;
/// Red, green, blue, white, black, in BGR byte order.
const BMP_PALETTE: [[u8; 3]; 5] = [
    [0x00, 0x00, 0xFF],
    [0x00, 0xFF, 0x00],
    [0xFF, 0x00, 0x00],
    [0xFF, 0xFF, 0xFF],
    [0x00, 0x00, 0x00],
];

#[derive(Error, Debug)]
pub enum SeedError {
    #[error(transparent)]
    Constraints(#[from] ConfigError),
    #[error("Failed to compress image data: {0}")]
    Compression(std::io::Error),
    #[error("Failed to write seed file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Dimension ranges a generated seed is drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedConstraints {
    pub width: RangeInclusive<u32>,
    pub height: RangeInclusive<u32>,
}

impl SeedConstraints {
    /// Default ranges: 5 to 20 pixels per axis for PNG, 1 to 100 for BMP.
    pub fn for_format(format: FormatTag) -> Self {
        match format {
            FormatTag::Png => Self {
                width: 5..=20,
                height: 5..=20,
            },
            FormatTag::Bmp => Self {
                width: 1..=100,
                height: 1..=100,
            },
        }
    }

    /// Checks `1 <= min <= max <= MAX_SEED_DIMENSION` for both axes, width first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (what, range) in [("width", &self.width), ("height", &self.height)] {
            if *range.start() == 0
                || range.start() > range.end()
                || *range.end() > MAX_SEED_DIMENSION
            {
                return Err(ConfigError::InvalidRange {
                    what,
                    min: *range.start(),
                    max: *range.end(),
                });
            }
        }
        Ok(())
    }

    fn draw(&self, rng: &mut dyn RngCore) -> Result<(u32, u32), ConfigError> {
        self.validate()?;
        let width = rng.random_range(self.width.clone());
        let height = rng.random_range(self.height.clone());
        Ok((width, height))
    }
}

/// A freshly generated, structurally valid image.
#[derive(Debug, Clone)]
pub struct Seed {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Produces known-valid images used to start a population.
pub trait SeedProvider {
    fn format(&self) -> FormatTag;

    /// Draws dimensions from `constraints`, then pixel data, all from `rng`.
    ///
    /// # Errors
    /// `SeedError::Constraints` when the ranges are invalid; nothing is drawn then.
    fn produce_seed(
        &self,
        constraints: &SeedConstraints,
        rng: &mut dyn RngCore,
    ) -> Result<Seed, SeedError>;
}

/// The provider generating seeds of `format`.
pub fn provider_for(format: FormatTag) -> Box<dyn SeedProvider> {
    match format {
        FormatTag::Png => Box::new(PngSeedProvider),
        FormatTag::Bmp => Box::new(BmpSeedProvider),
    }
}

/// 8-bit RGB, non-interlaced PNG with a single IDAT chunk of random pixels.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngSeedProvider;

impl PngSeedProvider {
    fn chunk(out: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(chunk_type);
        hasher.update(data);
        // The chunk length field is 31 bits; seed dimensions keep data far below it.
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(chunk_type);
        out.extend_from_slice(data);
        out.extend_from_slice(&hasher.finalize().to_be_bytes());
    }
}

impl SeedProvider for PngSeedProvider {
    fn format(&self) -> FormatTag {
        FormatTag::Png
    }

    fn produce_seed(
        &self,
        constraints: &SeedConstraints,
        rng: &mut dyn RngCore,
    ) -> Result<Seed, SeedError> {
        let (width, height) = constraints.draw(rng)?;

        let mut ihdr = Vec::with_capacity(13);
        ihdr.extend_from_slice(&width.to_be_bytes());
        ihdr.extend_from_slice(&height.to_be_bytes());
        // bit depth, colour type, compression, filter, interlace
        ihdr.extend_from_slice(&[PNG_BIT_DEPTH, PNG_COLOR_TYPE_RGB, 0, 0, 0]);

        let row_len = 1 + 3 * width as usize;
        let mut scanlines = Vec::with_capacity(row_len * height as usize);
        for _ in 0..height {
            scanlines.push(0); // filter type None
            for _ in 0..width * 3 {
                scanlines.push(rng.random::<u8>());
            }
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&scanlines)
            .map_err(SeedError::Compression)?;
        let idat = encoder.finish().map_err(SeedError::Compression)?;

        let mut bytes = PNG_SIGNATURE.to_vec();
        Self::chunk(&mut bytes, b"IHDR", &ihdr);
        Self::chunk(&mut bytes, b"IDAT", &idat);
        Self::chunk(&mut bytes, b"IEND", &[]);
        Ok(Seed {
            bytes,
            width,
            height,
        })
    }
}

/// 24 bpp uncompressed bottom-up BMP whose pixels come from a five-colour palette.
#[derive(Debug, Default, Clone, Copy)]
pub struct BmpSeedProvider;

impl SeedProvider for BmpSeedProvider {
    fn format(&self) -> FormatTag {
        FormatTag::Bmp
    }

    fn produce_seed(
        &self,
        constraints: &SeedConstraints,
        rng: &mut dyn RngCore,
    ) -> Result<Seed, SeedError> {
        let (width, height) = constraints.draw(rng)?;
        let row_size = (width * 3 + 3) & !3;
        let pixel_data_size = row_size * height;
        let data_offset = BMP_FILE_HEADER_LEN + BMP_INFO_HEADER_LEN;
        let file_size = data_offset + pixel_data_size;

        let mut bytes = Vec::with_capacity(file_size as usize);
        bytes.extend_from_slice(b"BM");
        bytes.extend_from_slice(&file_size.to_le_bytes());
        bytes.extend_from_slice(&[0; 4]); // reserved
        bytes.extend_from_slice(&data_offset.to_le_bytes());

        bytes.extend_from_slice(&BMP_INFO_HEADER_LEN.to_le_bytes());
        bytes.extend_from_slice(&width.to_le_bytes());
        bytes.extend_from_slice(&height.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // planes
        bytes.extend_from_slice(&BMP_BITS_PER_PIXEL.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // BI_RGB
        bytes.extend_from_slice(&pixel_data_size.to_le_bytes());
        bytes.extend_from_slice(&BMP_PIXELS_PER_METRE.to_le_bytes());
        bytes.extend_from_slice(&BMP_PIXELS_PER_METRE.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // colours used
        bytes.extend_from_slice(&0u32.to_le_bytes()); // important colours

        let padding = (row_size - width * 3) as usize;
        for _ in 0..height {
            for _ in 0..width {
                let colour = BMP_PALETTE[rng.random_range(0..BMP_PALETTE.len())];
                bytes.extend_from_slice(&colour);
            }
            bytes.extend(std::iter::repeat_n(0u8, padding));
        }
        Ok(Seed {
            bytes,
            width,
            height,
        })
    }
}

/// Writes `count` seeds named `image_<n>.<ext>` (n from 1) into `dir`, creating it
/// if needed. Returns the paths in generation order.
pub fn write_seed_files(
    provider: &dyn SeedProvider,
    constraints: &SeedConstraints,
    count: usize,
    dir: &Path,
    rng: &mut dyn RngCore,
) -> Result<Vec<PathBuf>, SeedError> {
    fs::create_dir_all(dir).map_err(|source| SeedError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let extension = provider.format().extension();
    let mut paths = Vec::with_capacity(count);
    for i in 1..=count {
        let seed = provider.produce_seed(constraints, rng)?;
        let path = dir.join(format!("image_{i}.{extension}"));
        fs::write(&path, &seed.bytes).map_err(|source| SeedError::Io {
            path: path.clone(),
            source,
        })?;
        info!(
            "Generated: {} with dimensions {}x{}",
            path.display(),
            seed.width,
            seed.height
        );
        paths.push(path);
    }
    Ok(paths)
}
