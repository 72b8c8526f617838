//! Upload pipeline: sniffing, decoding, thumbnails and re-encoding.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::domain::resource::FileFormat;
use crate::error::MediaError;
use crate::infra::config::MediaConfig;

pub mod metadata;

pub use metadata::Stamp;

/// Identifies the format from the leading bytes, if it is allowed.
pub fn sniff(bytes: &[u8], allowed: &[FileFormat]) -> Option<FileFormat> {
    let format = match image::guess_format(bytes).ok()? {
        ImageFormat::Jpeg => FileFormat::Jpeg,
        ImageFormat::Png => FileFormat::Png,
        _ => return None,
    };
    allowed.contains(&format).then_some(format)
}

fn image_format(format: FileFormat) -> ImageFormat {
    match format {
        FileFormat::Jpeg => ImageFormat::Jpeg,
        FileFormat::Png => ImageFormat::Png,
    }
}

pub fn decode(bytes: &[u8], format: FileFormat) -> Result<DynamicImage, MediaError> {
    Ok(image::load_from_memory_with_format(bytes, image_format(format))?)
}

/// Width over height.
pub fn aspect(img: &DynamicImage) -> f64 {
    let h = img.height().max(1);
    img.width() as f64 / h as f64
}

/// Scales the image so its longest edge is `edge`, keeping the aspect
/// ratio. Images already within bounds are returned as they are.
pub fn thumbnail(img: &DynamicImage, edge: u32) -> DynamicImage {
    if img.width().max(img.height()) <= edge {
        return img.clone();
    }
    img.resize(edge, edge, FilterType::CatmullRom)
}

pub fn encode(img: &DynamicImage, format: FileFormat, jpeg_quality: u8) -> Result<Vec<u8>, MediaError> {
    let mut buf = Vec::new();
    match format {
        FileFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, jpeg_quality);
            rgb.write_with_encoder(encoder)?;
        }
        FileFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        }
    }
    Ok(buf)
}

/// A full image and its thumbnail, stamped and ready for disk.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub format: FileFormat,
    pub full: Vec<u8>,
    pub thumb: Vec<u8>,
    pub aspect: f64,
}

/// Turns an upload into its stored form.
///
/// JPEG payloads keep their original scan data. PNG payloads are tried as a
/// JPEG at `reencode_png_quality` and stored as whichever is smaller.
pub fn prepare(bytes: &[u8], format: FileFormat, stamp: &Stamp, cfg: &MediaConfig) -> Result<Prepared, MediaError> {
    let img = decode(bytes, format)?;

    let (format, full) = match format {
        FileFormat::Jpeg => (FileFormat::Jpeg, bytes.to_vec()),
        FileFormat::Png => {
            let as_jpeg = encode(&img, FileFormat::Jpeg, cfg.reencode_png_quality)?;
            if as_jpeg.len() < bytes.len() {
                (FileFormat::Jpeg, as_jpeg)
            } else {
                (FileFormat::Png, bytes.to_vec())
            }
        }
    };

    let thumb = encode(&thumbnail(&img, cfg.thumb_edge), format, cfg.thumb_jpeg_quality)?;

    Ok(Prepared {
        format,
        full: metadata::replace(&full, format, Some(stamp))?,
        thumb: metadata::replace(&thumb, format, Some(stamp))?,
        aspect: aspect(&img),
    })
}

/// Plain file uploads: original encoding kept, metadata stripped.
pub fn prepare_plain(bytes: &[u8], format: FileFormat, cfg: &MediaConfig) -> Result<Prepared, MediaError> {
    let img = decode(bytes, format)?;
    let thumb = encode(&thumbnail(&img, cfg.thumb_edge), format, cfg.thumb_jpeg_quality)?;
    Ok(Prepared {
        format,
        full: metadata::replace(bytes, format, None)?,
        thumb: metadata::replace(&thumb, format, None)?,
        aspect: aspect(&img),
    })
}
