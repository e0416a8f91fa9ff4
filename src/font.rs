//! Font registration and text measurement.
//!
//! The registry never feeds the PDF serializer: fonts exist purely so the
//! rasterizer can measure and draw glyphs. Measurement has two paths: a
//! basic-latin advance table, and a shaped path for everything else (the
//! shaped path is what keeps Vietnamese diacritic widths honest).

use crate::error::ShotPressError;
use crate::types::Pt;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct WidthKey {
    font_index: usize,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct WidthCache {
    map: HashMap<WidthKey, Pt>,
    order: VecDeque<WidthKey>,
    max_entries: usize,
}

impl WidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&mut self, key: &WidthKey) -> Option<Pt> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: WidthKey, value: Pt) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            if let Some(old) = self.order.pop_front() {
                self.map.remove(&old);
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct RegisteredFont {
    pub(crate) name: String,
    pub(crate) data: Vec<u8>,
    pub(crate) metrics: FontMetrics,
}

/// Advance and vertical metrics in thousandths of an em.
#[derive(Debug)]
pub(crate) struct FontMetrics {
    first_char: u8,
    last_char: u8,
    widths: Vec<u16>,
    missing_width: u16,
    ascent: i16,
    descent: i16,
    line_gap: i16,
}

impl FontMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let first_char = 32u8;
        let last_char = 255u8;

        let mut widths = Vec::with_capacity((last_char - first_char + 1) as usize);
        for code in first_char..=last_char {
            let advance = char::from_u32(code as u32)
                .and_then(|ch| face.glyph_index(ch))
                .and_then(|gid| face.glyph_hor_advance(gid))
                .unwrap_or(0);
            let scaled = (advance as f32 * scale).round() as i32;
            widths.push(scaled.clamp(0, u16::MAX as i32) as u16);
        }
        let missing_width = widths
            .get((b' ' - first_char) as usize)
            .copied()
            .unwrap_or(0);

        Self {
            first_char,
            last_char,
            widths,
            missing_width,
            ascent: scale_i16(face.ascender(), scale),
            descent: scale_i16(face.descender(), scale),
            line_gap: scale_i16(face.line_gap(), scale),
        }
    }

    fn advance_for_char(&self, ch: char) -> u16 {
        let code = ch as u32;
        let first = self.first_char as u32;
        let last = self.last_char as u32;
        if code < first || code > last {
            return self.missing_width;
        }
        self.widths
            .get((code - first) as usize)
            .copied()
            .unwrap_or(self.missing_width)
    }

    fn measure_text_width(&self, font_size: Pt, text: &str) -> Pt {
        let mut total_units: i32 = 0;
        for ch in text.chars() {
            total_units = total_units.saturating_add(self.advance_for_char(ch) as i32);
        }
        if total_units <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(total_units, 1000)
    }

    fn is_within_basic_latin(&self, text: &str) -> bool {
        let first = self.first_char as u32;
        let last = self.last_char as u32;
        text.chars().all(|ch| {
            let code = ch as u32;
            code >= first && code <= last
        })
    }

    fn line_height(&self, font_size: Pt) -> Pt {
        let height_1000 = self.ascent as i32 - self.descent as i32 + self.line_gap as i32;
        if height_1000 <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(height_1000, 1000)
    }

    fn ascent(&self, font_size: Pt) -> Pt {
        if self.ascent <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(self.ascent as i32, 1000)
    }
}

#[derive(Debug)]
pub(crate) struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, usize>,
    width_cache: Mutex<WidthCache>,
}

impl FontRegistry {
    pub(crate) fn new() -> Self {
        Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
            width_cache: Mutex::new(WidthCache::new(20_000)),
        }
    }

    pub(crate) fn register_dir(&mut self, path: impl AsRef<Path>) {
        let Ok(entries) = fs::read_dir(path.as_ref()) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                self.register_file(path);
            }
        }
    }

    pub(crate) fn register_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
            return;
        };
        let ext = ext.to_ascii_lowercase();
        if ext != "ttf" && ext != "otf" {
            return;
        }
        let Ok(data) = fs::read(path) else {
            return;
        };
        let _ = self.register_parsed(data, path);
    }

    pub(crate) fn register_bytes(
        &mut self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<String, ShotPressError> {
        let source = source_name.unwrap_or("EmbeddedFont");
        self.register_parsed(data, Path::new(source))
            .ok_or_else(|| {
                ShotPressError::InvalidConfiguration(format!("invalid font data for {source}"))
            })
    }

    fn register_parsed(&mut self, data: Vec<u8>, source: &Path) -> Option<String> {
        let face = ttf_parser::Face::parse(&data, 0).ok()?;
        let (name, aliases) = font_names(&face, source);
        let metrics = FontMetrics::from_face(&face);
        let index = self.fonts.len();
        self.fonts.push(RegisteredFont {
            name: name.clone(),
            data,
            metrics,
        });

        for alias in std::iter::once(name.clone()).chain(aliases) {
            let key = normalize_name(&alias);
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
        Some(name)
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<&RegisteredFont> {
        self.lookup
            .get(&normalize_name(name))
            .and_then(|index| self.fonts.get(*index))
    }

    pub(crate) fn registered_names(&self) -> impl Iterator<Item = &str> {
        self.fonts.iter().map(|font| font.name.as_str())
    }

    pub(crate) fn measure_text_width(&self, name: &str, font_size: Pt, text: &str) -> Pt {
        let Some(index) = self.lookup.get(&normalize_name(name)).copied() else {
            return fallback_width(font_size, text);
        };
        let cache_key = WidthKey {
            font_index: index,
            size_milli: font_size.to_milli_i64(),
            text: text.to_string(),
        };
        if let Ok(mut cache) = self.width_cache.lock() {
            if let Some(value) = cache.get(&cache_key) {
                return value;
            }
        }
        let Some(font) = self.fonts.get(index) else {
            return fallback_width(font_size, text);
        };
        let value = if font.metrics.is_within_basic_latin(text) {
            font.metrics.measure_text_width(font_size, text)
        } else {
            measure_text_width_shaped(font, font_size, text)
                .unwrap_or_else(|| font.metrics.measure_text_width(font_size, text))
        };
        if let Ok(mut cache) = self.width_cache.lock() {
            cache.insert(cache_key, value);
        }
        value
    }

    pub(crate) fn line_height(&self, name: &str, font_size: Pt, fallback: Pt) -> Pt {
        let Some(font) = self.resolve(name) else {
            return fallback;
        };
        font.metrics.line_height(font_size).max(fallback)
    }

    pub(crate) fn ascent(&self, name: &str, font_size: Pt, fallback: Pt) -> Pt {
        let Some(font) = self.resolve(name) else {
            return fallback;
        };
        let value = font.metrics.ascent(font_size);
        if value <= Pt::ZERO { fallback } else { value }
    }
}

/// Deterministic stand-in metrics for unregistered fonts. Geometry stays
/// exact without any font on disk; only glyph painting needs real data.
fn fallback_width(font_size: Pt, text: &str) -> Pt {
    let char_width = font_size.mul_ratio(3, 5).max(Pt::from_f32(1.0));
    char_width * (text.chars().count() as i32)
}

fn measure_text_width_shaped(font: &RegisteredFont, font_size: Pt, text: &str) -> Option<Pt> {
    let face = HbFace::from_slice(&font.data, 0)?;
    let units_per_em = face.units_per_em().max(1) as i64;

    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let positions = output.glyph_positions();
    if positions.is_empty() {
        return None;
    }
    let mut total_units: i32 = 0;
    for pos in positions {
        let adv = (((pos.x_advance as i64) * 1000 + (units_per_em / 2)) / units_per_em) as i32;
        total_units = total_units.saturating_add(adv);
    }
    if total_units <= 0 {
        return Some(Pt::ZERO);
    }
    Some(font_size.mul_ratio(total_units, 1000))
}

pub(crate) fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn font_names(face: &ttf_parser::Face<'_>, path: &Path) -> (String, Vec<String>) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;

    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                if family.is_none() {
                    family = Some(name);
                }
            }
            name_id::FULL_NAME => {
                if full.is_none() {
                    full = Some(name);
                }
            }
            name_id::POST_SCRIPT_NAME => {
                if post.is_none() {
                    post = Some(name);
                }
            }
            _ => {}
        }
    }

    let stem = path
        .file_stem()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string());
    let primary = post
        .clone()
        .or_else(|| full.clone())
        .or_else(|| family.clone())
        .or_else(|| stem.clone())
        .unwrap_or_else(|| "EmbeddedFont".to_string());

    let mut aliases = Vec::new();
    for candidate in [family, full, post, stem].into_iter().flatten() {
        if candidate != primary {
            aliases.push(candidate);
        }
    }

    (primary, aliases)
}

/// Case-, space- and dash-insensitive lookup key, so "Inter Bold",
/// "inter-bold" and "Inter-Bold" all resolve to the same face.
fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '-' && *ch != '_')
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}
