use image::{imageops::FilterType, DynamicImage, ImageReader};
use ndarray::Array4;
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::debug;

use crate::error::{EngineError, Result};

const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];
const DEFAULT_SIZE: u32 = 224;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum SizeSpec {
    Square(u32),
    Exact { height: u32, width: u32 },
    ShortestEdge { shortest_edge: u32 },
}

/// Subset of `preprocessor_config.json` the vision models need.
#[derive(Debug, Default, Deserialize)]
struct PreprocessorConfig {
    do_resize: Option<bool>,
    size: Option<SizeSpec>,
    do_center_crop: Option<bool>,
    crop_size: Option<SizeSpec>,
    do_rescale: Option<bool>,
    rescale_factor: Option<f32>,
    do_normalize: Option<bool>,
    image_mean: Option<Vec<f32>>,
    image_std: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Resize {
    ShortestEdge(u32),
    Exact { width: u32, height: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePreprocessor {
    resize: Option<Resize>,
    /// `(width, height)`
    crop: (u32, u32),
    rescale: f32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self {
            resize: Some(Resize::ShortestEdge(DEFAULT_SIZE)),
            crop: (DEFAULT_SIZE, DEFAULT_SIZE),
            rescale: 1.0 / 255.0,
            mean: CLIP_MEAN,
            std: CLIP_STD,
        }
    }
}

impl ImagePreprocessor {
    /// Settings from `preprocessor_config.json` when present, CLIP defaults otherwise.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join("preprocessor_config.json");
        let config = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<PreprocessorConfig>(&text)
                .map_err(|e| EngineError::corrupt(&path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "No preprocessor_config.json, using CLIP defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(EngineError::corrupt(&path, e)),
        };
        Self::from_config(config).map_err(|reason| EngineError::corrupt(&path, reason))
    }

    fn from_config(config: PreprocessorConfig) -> std::result::Result<Self, String> {
        let resize = match (config.do_resize.unwrap_or(true), config.size) {
            (false, _) => None,
            (true, Some(SizeSpec::Exact { height, width })) => {
                Some(Resize::Exact { width, height })
            }
            (true, Some(SizeSpec::Square(n)))
            | (true, Some(SizeSpec::ShortestEdge { shortest_edge: n })) => {
                Some(Resize::ShortestEdge(n))
            }
            (true, None) => Some(Resize::ShortestEdge(DEFAULT_SIZE)),
        };

        // Batches must stack, so there is always a final fixed size.
        let crop = match (config.do_center_crop.unwrap_or(true), config.crop_size, resize) {
            (true, Some(SizeSpec::Square(n)), _) => (n, n),
            (true, Some(SizeSpec::Exact { height, width }), _) => (width, height),
            (true, Some(SizeSpec::ShortestEdge { shortest_edge: n }), _) => (n, n),
            (_, _, Some(Resize::Exact { width, height })) => (width, height),
            (_, _, Some(Resize::ShortestEdge(n))) => (n, n),
            (_, _, None) => (DEFAULT_SIZE, DEFAULT_SIZE),
        };
        if crop.0 == 0 || crop.1 == 0 {
            return Err("image size must be non-zero".to_string());
        }

        let rescale = if config.do_rescale.unwrap_or(true) {
            config.rescale_factor.unwrap_or(1.0 / 255.0)
        } else {
            1.0
        };

        let (mean, std) = if config.do_normalize.unwrap_or(true) {
            (
                channel_triplet(config.image_mean, CLIP_MEAN, "image_mean")?,
                channel_triplet(config.image_std, CLIP_STD, "image_std")?,
            )
        } else {
            ([0.0; 3], [1.0; 3])
        };
        if std.iter().any(|s| *s == 0.0) {
            return Err("image_std must be non-zero".to_string());
        }

        Ok(Self {
            resize,
            crop,
            rescale,
            mean,
            std,
        })
    }

    /// `(height, width)` of every prepared image.
    pub fn output_size(&self) -> (u32, u32) {
        (self.crop.1, self.crop.0)
    }

    /// Decode and normalise a batch into `[batch, 3, height, width]`.
    /// Indices in errors are positions within `paths`.
    pub fn prepare<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Array4<f32>> {
        let (height, width) = self.output_size();
        let mut out = Array4::<f32>::zeros((paths.len(), 3, height as usize, width as usize));

        for (index, path) in paths.iter().enumerate() {
            let path = path.as_ref();
            let img = load_image(index, path)?;
            let rgb = self.transform(img).to_rgb8();
            for (x, y, pixel) in rgb.enumerate_pixels() {
                for c in 0..3 {
                    let v = pixel[c] as f32 * self.rescale;
                    out[[index, c, y as usize, x as usize]] = (v - self.mean[c]) / self.std[c];
                }
            }
        }
        Ok(out)
    }

    fn transform(&self, img: DynamicImage) -> DynamicImage {
        let img = match self.resize {
            Some(Resize::ShortestEdge(edge)) => {
                let (w, h) = (img.width().max(1), img.height().max(1));
                let (nw, nh) = if w <= h {
                    (edge, scale(h, edge, w))
                } else {
                    (scale(w, edge, h), edge)
                };
                img.resize_exact(nw, nh, FilterType::CatmullRom)
            }
            Some(Resize::Exact { width, height }) => {
                img.resize_exact(width, height, FilterType::CatmullRom)
            }
            None => img,
        };

        let (cw, ch) = self.crop;
        if img.width() < cw || img.height() < ch {
            return img.resize_exact(cw, ch, FilterType::CatmullRom);
        }
        let left = (img.width() - cw) / 2;
        let top = (img.height() - ch) / 2;
        img.crop_imm(left, top, cw, ch)
    }
}

fn scale(long: u32, edge: u32, short: u32) -> u32 {
    ((long as f64 * edge as f64 / short as f64).round() as u32).max(edge)
}

fn channel_triplet(
    value: Option<Vec<f32>>,
    default: [f32; 3],
    name: &str,
) -> std::result::Result<[f32; 3], String> {
    match value.as_deref() {
        None => Ok(default),
        Some(&[a, b, c]) => Ok([a, b, c]),
        Some(&[a]) => Ok([a, a, a]),
        Some(other) => Err(format!("{name} must have 1 or 3 values, got {}", other.len())),
    }
}

fn load_image(index: usize, path: &Path) -> Result<DynamicImage> {
    if !path.is_file() {
        return Err(EngineError::FileNotFound {
            index,
            path: path.to_path_buf(),
        });
    }
    let decode_err = |reason: String| EngineError::ImageDecode {
        index,
        path: path.to_path_buf(),
        reason,
    };
    ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| decode_err(e.to_string()))?
        .decode()
        .map_err(|e| decode_err(e.to_string()))
}
