//! Streaming PDF 1.7 serializer for the canvas command set.
//!
//! The writer emits objects as soon as they are complete and keeps only
//! offsets and resource tables in memory. Output is byte-deterministic:
//! coordinates are formatted from milli-point integers, resource names are
//! allocated in first-use order, and nothing derived from clocks or
//! randomness is ever written. There are no font objects; the canvas has
//! no text primitive to serialize.

use crate::assets::{AlphaChannel, DecodedImage, load_image_source};
use crate::canvas::{Command, Document, Page};
use crate::types::{Pt, Size};
use fixed::types::I32F32;
use std::collections::HashMap;
use std::io::{self, Write};

#[derive(Debug, Clone, Default)]
pub(crate) struct PdfOptions {
    pub document_title: Option<String>,
}

const PDF_CATALOG_ID: usize = 1;
const PDF_PAGES_ID: usize = 2;
const PDF_RESOURCES_ID: usize = 3;

// Keep the page tree shallow but avoid huge /Kids arrays for large outputs.
const PDF_PAGE_NODE_MAX_KIDS: usize = 256;

struct PdfPageNode {
    id: usize,
    kids: Vec<usize>,
}

pub(crate) struct PdfStreamWriter<'a, W: Write> {
    writer: &'a mut W,
    offset: usize,
    offsets: Vec<usize>, // indexed by object id; 0 is the free object.
    next_id: usize,
    page_size: Size,
    options: PdfOptions,

    image_resources: Vec<(String, usize)>,
    image_name_map: HashMap<String, String>,
    image_content_map: HashMap<u64, String>,
    next_image_index: usize,

    page_nodes: Vec<PdfPageNode>,
    current_node: Option<PdfPageNode>,
}

impl<'a, W: Write> PdfStreamWriter<'a, W> {
    pub(crate) fn new(
        writer: &'a mut W,
        page_size: Size,
        options: PdfOptions,
    ) -> io::Result<Self> {
        let mut offset = 0usize;
        write_bytes(writer, b"%PDF-1.7\n", &mut offset)?;
        write_bytes(writer, b"%\xE2\xE3\xCF\xD3\n", &mut offset)?;

        Ok(Self {
            writer,
            offset,
            offsets: vec![0; PDF_RESOURCES_ID + 1],
            next_id: PDF_RESOURCES_ID + 1,
            page_size,
            options,
            image_resources: Vec::new(),
            image_name_map: HashMap::new(),
            image_content_map: HashMap::new(),
            next_image_index: 1,
            page_nodes: Vec::new(),
            current_node: None,
        })
    }

    pub(crate) fn add_document(&mut self, document: &Document) -> io::Result<()> {
        if (document.page_size.width - self.page_size.width).abs() > Pt::from_f32(0.01)
            || (document.page_size.height - self.page_size.height).abs() > Pt::from_f32(0.01)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "mixed page sizes are not supported in a single PDF stream",
            ));
        }
        for page in &document.pages {
            self.add_page(page)?;
        }
        Ok(())
    }

    fn add_page(&mut self, page: &Page) -> io::Result<()> {
        let parent_id = self.ensure_page_node();
        let start = self.alloc_ids(2);
        let content_id = start;
        let page_id = start + 1;

        if let Some(node) = self.current_node.as_mut() {
            node.kids.push(page_id);
        }

        let content_stream = self.render_commands(&page.commands, self.page_size.height)?;
        self.write_object(content_id, &stream_object(&content_stream))?;

        let page_obj = format!(
            "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] /Resources {} 0 R /Contents {} 0 R >>",
            parent_id,
            fmt_pt(self.page_size.width),
            fmt_pt(self.page_size.height),
            PDF_RESOURCES_ID,
            content_id
        );
        self.write_object(page_id, &page_obj)
    }

    fn render_commands(&mut self, commands: &[Command], page_height: Pt) -> io::Result<String> {
        let mut out = String::new();

        for cmd in commands {
            match cmd {
                Command::Meta { .. } => {}
                Command::SetFillColor(color) => {
                    out.push_str(&format!(
                        "{} {} {} rg\n",
                        fmt(color.r),
                        fmt(color.g),
                        fmt(color.b)
                    ));
                }
                Command::SetStrokeColor(color) => {
                    out.push_str(&format!(
                        "{} {} {} RG\n",
                        fmt(color.r),
                        fmt(color.g),
                        fmt(color.b)
                    ));
                }
                Command::SetLineWidth(width) => {
                    out.push_str(&format!("{} w\n", fmt_pt(*width)));
                }
                Command::DrawRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    let draw_y = page_height - *y - *height;
                    out.push_str(&format!(
                        "{} {} {} {} re\nf\n",
                        fmt_pt(*x),
                        fmt_pt(draw_y),
                        fmt_pt(*width),
                        fmt_pt(*height)
                    ));
                }
                Command::StrokeRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    let draw_y = page_height - *y - *height;
                    out.push_str(&format!(
                        "{} {} {} {} re\nS\n",
                        fmt_pt(*x),
                        fmt_pt(draw_y),
                        fmt_pt(*width),
                        fmt_pt(*height)
                    ));
                }
                Command::DrawImage {
                    x,
                    y,
                    width,
                    height,
                    resource_id,
                } => {
                    let draw_y = page_height - *y - *height;
                    if let Some(name) = self.ensure_image(resource_id)? {
                        out.push_str("q\n");
                        out.push_str(&format!(
                            "{} 0 0 {} {} {} cm\n",
                            fmt_pt(*width),
                            fmt_pt(*height),
                            fmt_pt(*x),
                            fmt_pt(draw_y)
                        ));
                        out.push_str(&format!("/{} Do\n", name));
                        out.push_str("Q\n");
                    } else {
                        // Undecodable at embed time: keep the slot visible as
                        // a flat block in the current fill color.
                        out.push_str(&format!(
                            "{} {} {} {} re\nf\n",
                            fmt_pt(*x),
                            fmt_pt(draw_y),
                            fmt_pt(*width),
                            fmt_pt(*height)
                        ));
                    }
                }
            }
        }
        Ok(out)
    }

    fn ensure_image(&mut self, source: &str) -> io::Result<Option<String>> {
        if let Some(name) = self.image_name_map.get(source) {
            return Ok(Some(name.clone()));
        }
        let Some(image) = load_image_source(source) else {
            return Ok(None);
        };

        // Identical payloads collapse onto one XObject, so repeated stills
        // and repeated raster blocks cost one stream each.
        let hash = hash_image(&image);
        if let Some(name) = self.image_content_map.get(&hash) {
            let name = name.clone();
            self.image_name_map.insert(source.to_string(), name.clone());
            return Ok(Some(name));
        }

        let smask_id = image.alpha.as_ref().map(|_| self.alloc_ids(1));
        let obj_id = self.alloc_ids(1);
        let name = format!("Im{}", self.next_image_index);
        self.next_image_index += 1;

        if let (Some(alpha), Some(mask_id)) = (image.alpha.as_ref(), smask_id) {
            self.write_object(mask_id, &image_smask_object(alpha))?;
        }
        self.write_object(obj_id, &image_object(&image, smask_id))?;
        self.image_resources.push((name.clone(), obj_id));
        self.image_name_map.insert(source.to_string(), name.clone());
        self.image_content_map.insert(hash, name.clone());
        Ok(Some(name))
    }

    pub(crate) fn finish(&mut self) -> io::Result<usize> {
        if let Some(node) = self.current_node.take() {
            self.page_nodes.push(node);
        }

        // Resources dictionary shared by every page.
        let resources = if self.image_resources.is_empty() {
            "<< >>".to_string()
        } else {
            let entries = self
                .image_resources
                .iter()
                .map(|(name, id)| format!("/{} {} 0 R", name, id))
                .collect::<Vec<_>>()
                .join(" ");
            format!("<< /XObject << {} >> >>", entries)
        };
        self.write_object(PDF_RESOURCES_ID, &resources)?;

        // Page tree nodes + root.
        let page_nodes = std::mem::take(&mut self.page_nodes);
        for node in &page_nodes {
            self.write_object(
                node.id,
                &format!(
                    "<< /Type /Pages /Parent {} 0 R /Count {} /Kids [{}] >>",
                    PDF_PAGES_ID,
                    node.kids.len(),
                    node.kids
                        .iter()
                        .map(|id| format!("{} 0 R", id))
                        .collect::<Vec<_>>()
                        .join(" ")
                ),
            )?;
        }
        let total_pages: usize = page_nodes.iter().map(|n| n.kids.len()).sum();
        let kids = page_nodes
            .iter()
            .map(|n| format!("{} 0 R", n.id))
            .collect::<Vec<_>>()
            .join(" ");
        self.write_object(
            PDF_PAGES_ID,
            &format!("<< /Type /Pages /Count {} /Kids [{}] >>", total_pages, kids),
        )?;

        // Info + catalog.
        let info_id = self.alloc_ids(1);
        self.write_object(info_id, &info_object(self.options.document_title.as_deref()))?;

        let mut catalog = format!("<< /Type /Catalog /Pages {} 0 R", PDF_PAGES_ID);
        if self.options.document_title.is_some() {
            catalog.push_str(" /ViewerPreferences << /DisplayDocTitle true >>");
        }
        catalog.push_str(" >>");
        self.write_object(PDF_CATALOG_ID, &catalog)?;

        // XRef + trailer.
        let total_objects = self.next_id.saturating_sub(1);
        let xref_start = self.offset;
        write_str(
            self.writer,
            &format!("xref\n0 {}\n", total_objects + 1),
            &mut self.offset,
        )?;
        write_bytes(self.writer, b"0000000000 65535 f \n", &mut self.offset)?;
        for id in 1..=total_objects {
            let obj_offset = self.offsets.get(id).copied().unwrap_or(0);
            write_str(
                self.writer,
                &format!("{:010} 00000 n \n", obj_offset),
                &mut self.offset,
            )?;
        }
        let trailer = format!(
            "trailer\n<< /Size {} /Root {} 0 R /Info {} 0 R >>\nstartxref\n{}\n%%EOF",
            total_objects + 1,
            PDF_CATALOG_ID,
            info_id,
            xref_start
        );
        write_str(self.writer, &trailer, &mut self.offset)?;
        Ok(self.offset)
    }

    fn ensure_page_node(&mut self) -> usize {
        let needs_new = self
            .current_node
            .as_ref()
            .map(|n| n.kids.len() >= PDF_PAGE_NODE_MAX_KIDS)
            .unwrap_or(true);
        if needs_new {
            if let Some(node) = self.current_node.take() {
                self.page_nodes.push(node);
            }
            let id = self.alloc_ids(1);
            self.current_node = Some(PdfPageNode {
                id,
                kids: Vec::with_capacity(PDF_PAGE_NODE_MAX_KIDS),
            });
        }
        self.current_node
            .as_ref()
            .map(|n| n.id)
            .unwrap_or(PDF_PAGES_ID)
    }

    fn alloc_ids(&mut self, count: usize) -> usize {
        let start = self.next_id;
        self.next_id = self.next_id.saturating_add(count);
        if self.offsets.len() < self.next_id {
            self.offsets.resize(self.next_id, 0);
        }
        start
    }

    fn write_object(&mut self, obj_id: usize, body: &str) -> io::Result<()> {
        if let Some(slot) = self.offsets.get_mut(obj_id) {
            *slot = self.offset;
        }
        write_str(self.writer, &format!("{} 0 obj\n", obj_id), &mut self.offset)?;
        write_bytes(self.writer, body.as_bytes(), &mut self.offset)?;
        write_bytes(self.writer, b"\nendobj\n", &mut self.offset)
    }
}

/// Serialize one canvas document into a standalone PDF byte vector.
pub(crate) fn document_to_pdf(
    document: &Document,
    options: &PdfOptions,
) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut writer = PdfStreamWriter::new(&mut out, document.page_size, options.clone())?;
    writer.add_document(document)?;
    writer.finish()?;
    Ok(out)
}

fn stream_object(content: &str) -> String {
    format!(
        "<< /Length {} >>\nstream\n{}\nendstream",
        content.as_bytes().len(),
        content
    )
}

fn info_object(title: Option<&str>) -> String {
    let mut entries = vec!["/Producer (shotpress)".to_string()];
    if let Some(title) = title {
        entries.push(format!("/Title ({})", escape_pdf_string(title)));
    }
    format!("<< {} >>", entries.join(" "))
}

fn image_object(image: &DecodedImage, smask_id: Option<usize>) -> String {
    let stream_data = encode_stream_data(&image.data);
    let filters = match image.filter {
        "/DCTDecode" => "[/ASCIIHexDecode /DCTDecode]",
        _ => "[/ASCIIHexDecode /FlateDecode]",
    };
    let smask = smask_id
        .map(|id| format!(" /SMask {} 0 R", id))
        .unwrap_or_default();
    format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace {} /BitsPerComponent {} /Length {} /Filter {}{} >>
stream
{}
endstream",
        image.width,
        image.height,
        image.color_space,
        image.bits_per_component,
        stream_data.as_bytes().len(),
        filters,
        smask,
        stream_data
    )
}

fn image_smask_object(alpha: &AlphaChannel) -> String {
    let stream_data = encode_stream_data(&alpha.data);
    format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceGray /BitsPerComponent {} /Length {} /Filter [/ASCIIHexDecode /FlateDecode] >>
stream
{}
endstream",
        alpha.width,
        alpha.height,
        alpha.bits_per_component,
        stream_data.as_bytes().len(),
        stream_data
    )
}

fn encode_stream_data(data: &[u8]) -> String {
    let mut hex = ascii_hex_encode(data);
    hex.push('>');
    hex
}

fn ascii_hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push_str(&format!("{:02X}", byte));
    }
    out
}

fn hash_image(image: &DecodedImage) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    image.data.hash(&mut hasher);
    if let Some(alpha) = &image.alpha {
        alpha.data.hash(&mut hasher);
    }
    hasher.finish()
}

fn escape_pdf_string(input: &str) -> String {
    let mut out = String::new();
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

fn write_bytes<W: Write>(writer: &mut W, data: &[u8], offset: &mut usize) -> io::Result<()> {
    writer.write_all(data)?;
    *offset += data.len();
    Ok(())
}

fn write_str<W: Write>(writer: &mut W, data: &str, offset: &mut usize) -> io::Result<()> {
    write_bytes(writer, data.as_bytes(), offset)
}

fn fmt(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let fixed = I32F32::from_num(value);
    let scaled = (fixed * I32F32::from_num(1000)).round();
    let milli: i64 = scaled.to_num();
    format_milli(milli)
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli_i64())
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let mut s = format!("{}{}.{:03}", sign, int_part, frac_part);
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        s
    }
}
