//! Image source resolution shared by layout (decode probe) and the PDF
//! serializer (embedding). Sources are opaque strings: `data:` URIs or
//! filesystem paths.

use base64::Engine;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::GenericImageView;
use std::io::Write;
use std::path::Path;

/// An image decoded into serializer-ready streams.
#[derive(Debug, Clone)]
pub(crate) struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub bits_per_component: u8,
    pub filter: &'static str,
    pub data: Vec<u8>,
    pub alpha: Option<AlphaChannel>,
}

#[derive(Debug, Clone)]
pub(crate) struct AlphaChannel {
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u8,
    pub data: Vec<u8>,
}

pub(crate) fn load_image_source(source: &str) -> Option<DecodedImage> {
    if let Some((mime, data)) = parse_data_uri(source) {
        return decode_image_bytes(&data, Some(&mime));
    }
    let bytes = std::fs::read(Path::new(source)).ok()?;
    decode_image_bytes(&bytes, None)
}

/// Cheap validity check used by layout before committing a slot to an
/// image: can the payload be decoded at all?
pub(crate) fn probe_image_source(source: &str) -> bool {
    let bytes = if let Some((_mime, data)) = parse_data_uri(source) {
        data
    } else {
        match std::fs::read(Path::new(source)) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        }
    };
    image::load_from_memory(&bytes).is_ok()
}

fn decode_image_bytes(data: &[u8], mime: Option<&str>) -> Option<DecodedImage> {
    let format = if let Some(mime) = mime {
        if mime.contains("png") {
            Some(image::ImageFormat::Png)
        } else if mime.contains("jpeg") || mime.contains("jpg") {
            Some(image::ImageFormat::Jpeg)
        } else {
            None
        }
    } else {
        image::guess_format(data).ok()
    };

    let decoded = image::load_from_memory(data).ok()?;
    let (width, height) = decoded.dimensions();

    // JPEG payloads pass through untouched as DCTDecode streams.
    if matches!(format, Some(image::ImageFormat::Jpeg)) {
        let color_space = match decoded.color() {
            image::ColorType::L8 | image::ColorType::La8 => "/DeviceGray",
            _ => "/DeviceRGB",
        };
        return Some(DecodedImage {
            width,
            height,
            color_space,
            bits_per_component: 8,
            filter: "/DCTDecode",
            data: data.to_vec(),
            alpha: None,
        });
    }

    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    let mut has_alpha = false;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a != 255 {
            has_alpha = true;
        }
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }

    let alpha = if has_alpha {
        Some(AlphaChannel {
            width,
            height,
            bits_per_component: 8,
            data: zlib_compress(&alpha),
        })
    } else {
        None
    };
    Some(DecodedImage {
        width,
        height,
        color_space: "/DeviceRGB",
        bits_per_component: 8,
        filter: "/FlateDecode",
        data: zlib_compress(&rgb),
        alpha,
    })
}

pub(crate) fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains("base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}

pub(crate) fn png_data_uri(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

pub(crate) fn zlib_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}
