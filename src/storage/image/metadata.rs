//! Descriptive metadata in encoded PNG and JPEG streams.
//!
//! Both rewriters drop every existing text-bearing block first, so uploads
//! never leak the uploader's camera or editor metadata, and then add the
//! stamp when one is given.

use crate::domain::resource::FileFormat;
use crate::error::MediaError;

/// Title, author and copyright written into every stored image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub title: String,
    pub author: String,
    pub copyright: String,
}

pub fn replace(bytes: &[u8], format: FileFormat, stamp: Option<&Stamp>) -> Result<Vec<u8>, MediaError> {
    match format {
        FileFormat::Jpeg => replace_jpeg(bytes, stamp),
        FileFormat::Png => replace_png(bytes, stamp),
    }
}

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

fn malformed(format: &'static str, reason: impl Into<String>) -> MediaError {
    MediaError::Malformed {
        format,
        reason: reason.into(),
    }
}

pub fn replace_png(bytes: &[u8], stamp: Option<&Stamp>) -> Result<Vec<u8>, MediaError> {
    if !bytes.starts_with(PNG_SIGNATURE) {
        return Err(malformed("png", "missing signature"));
    }
    let mut out = Vec::with_capacity(bytes.len() + 256);
    out.extend_from_slice(PNG_SIGNATURE);

    let mut pos = PNG_SIGNATURE.len();
    let mut seen_ihdr = false;
    while pos < bytes.len() {
        if pos + 12 > bytes.len() {
            return Err(malformed("png", "truncated chunk header"));
        }
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize;
        let end = pos + 12 + len;
        if end > bytes.len() {
            return Err(malformed("png", "chunk overruns stream"));
        }
        let kind = &bytes[pos + 4..pos + 8];
        let chunk = &bytes[pos..end];
        pos = end;

        match kind {
            b"tEXt" | b"zTXt" | b"iTXt" => continue,
            b"IHDR" => {
                out.extend_from_slice(chunk);
                seen_ihdr = true;
                if let Some(s) = stamp {
                    for (key, text) in [("Title", &s.title), ("Author", &s.author), ("Copyright", &s.copyright)] {
                        write_text_chunk(&mut out, key, text);
                    }
                }
            }
            b"IEND" => {
                out.extend_from_slice(chunk);
                break;
            }
            _ => out.extend_from_slice(chunk),
        }
    }
    if !seen_ihdr {
        return Err(malformed("png", "no IHDR chunk"));
    }
    Ok(out)
}

fn write_text_chunk(out: &mut Vec<u8>, key: &str, text: &str) {
    let mut data = Vec::with_capacity(key.len() + text.len() + 5);
    data.extend_from_slice(key.as_bytes());
    data.push(0);
    let kind: &[u8; 4] = if text.is_ascii() {
        data.extend_from_slice(text.as_bytes());
        b"tEXt"
    } else {
        // Uncompressed, no language tag, no translated keyword.
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(text.as_bytes());
        b"iTXt"
    };
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(&data);
    out.extend_from_slice(kind);
    out.extend_from_slice(&data);
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
}

const SOI: u8 = 0xD8;
const SOS: u8 = 0xDA;
const EOI: u8 = 0xD9;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const APP13: u8 = 0xED;
const COM: u8 = 0xFE;

pub fn replace_jpeg(bytes: &[u8], stamp: Option<&Stamp>) -> Result<Vec<u8>, MediaError> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != SOI {
        return Err(malformed("jpeg", "missing SOI marker"));
    }
    let exif = match stamp {
        Some(s) => Some(exif_segment(s)?),
        None => None,
    };

    let mut out = Vec::with_capacity(bytes.len() + 256);
    out.extend_from_slice(&[0xFF, SOI]);
    let mut pos = 2;
    let mut stamped = exif.is_none();

    loop {
        if pos + 2 > bytes.len() {
            return Err(malformed("jpeg", "stream ends before scan data"));
        }
        if bytes[pos] != 0xFF {
            return Err(malformed("jpeg", format!("expected marker at offset {pos}")));
        }
        let marker = bytes[pos + 1];
        if marker == 0xFF {
            // Fill byte.
            pos += 1;
            continue;
        }
        if marker == EOI {
            return Err(malformed("jpeg", "no scan data"));
        }
        if pos + 4 > bytes.len() {
            return Err(malformed("jpeg", "truncated segment header"));
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > bytes.len() {
            return Err(malformed("jpeg", "segment overruns stream"));
        }
        let segment = &bytes[pos..pos + 2 + len];

        if !stamped && marker != APP0 {
            if let Some(e) = &exif {
                out.extend_from_slice(e);
            }
            stamped = true;
        }

        if marker == SOS {
            // Entropy-coded data and everything after it is kept verbatim.
            out.extend_from_slice(&bytes[pos..]);
            return Ok(out);
        }
        if !matches!(marker, APP1 | APP13 | COM) {
            out.extend_from_slice(segment);
        }
        pos += 2 + len;
    }
}

/// APP1 segment carrying a big-endian TIFF IFD0 with ImageDescription,
/// Artist and Copyright.
fn exif_segment(stamp: &Stamp) -> Result<Vec<u8>, MediaError> {
    const IMAGE_DESCRIPTION: u16 = 0x010E;
    const ARTIST: u16 = 0x013B;
    const COPYRIGHT: u16 = 0x8298;
    const ASCII: u16 = 2;

    let entries = [
        (IMAGE_DESCRIPTION, stamp.title.as_str()),
        (ARTIST, stamp.author.as_str()),
        (COPYRIGHT, stamp.copyright.as_str()),
    ];

    let ifd_len = 2 + entries.len() * 12 + 4;
    let mut data_offset = 8 + ifd_len;
    let mut ifd = Vec::with_capacity(ifd_len);
    let mut data = Vec::new();

    ifd.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    for (tag, text) in entries {
        let mut value = text.as_bytes().to_vec();
        value.push(0);
        ifd.extend_from_slice(&tag.to_be_bytes());
        ifd.extend_from_slice(&ASCII.to_be_bytes());
        ifd.extend_from_slice(&(value.len() as u32).to_be_bytes());
        if value.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..value.len()].copy_from_slice(&value);
            ifd.extend_from_slice(&inline);
        } else {
            ifd.extend_from_slice(&(data_offset as u32).to_be_bytes());
            data_offset += value.len();
            data.extend_from_slice(&value);
        }
    }
    ifd.extend_from_slice(&0u32.to_be_bytes());

    let mut payload = Vec::with_capacity(6 + 8 + ifd.len() + data.len());
    payload.extend_from_slice(b"Exif\0\0");
    payload.extend_from_slice(b"MM\0\x2a\0\0\0\x08");
    payload.extend_from_slice(&ifd);
    payload.extend_from_slice(&data);

    let len = payload.len() + 2;
    if len > u16::MAX as usize {
        return Err(malformed("jpeg", "metadata does not fit in one APP1 segment"));
    }
    let mut segment = Vec::with_capacity(len + 2);
    segment.extend_from_slice(&[0xFF, APP1]);
    segment.extend_from_slice(&(len as u16).to_be_bytes());
    segment.extend_from_slice(&payload);
    Ok(segment)
}
