//! Renders a [`SummaryResult`] as a downloadable PDF report.
//!
//! The report is laid out as a flat list of [`Block`]s which are word-wrapped
//! onto US Letter pages using the standard Helvetica faces, so no font files
//! need to be embedded.

use lopdf::{
    Dictionary, Document, Object, Stream, StringFormat,
    content::{Content, Operation},
};
use thiserror::Error;

use crate::models::SummaryResult;

pub const REPORT_TITLE: &str = "Legal Document Summary";

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 40.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;

const BULLET_INDENT: f32 = 10.0;
const ITEM_INDENT: f32 = 20.0;
const NUMBER_ITEM_INDENT: f32 = 28.0;

/// WinAnsiEncoding code for the bullet glyph.
const BULLET: u8 = 0x95;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to encode page content: {0}")]
    Encode(String),

    #[error("Failed to write PDF: {0}")]
    Save(String),

    #[error("Report task failed: {0}")]
    Join(String),
}

/// One unit of report content.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Title(String),
    Heading(String),
    Paragraph(String),
    Bullet(String),
    Numbered(usize, String),
    Spacer(f32),
}

/// The fixed report structure for a summary.
pub fn summary_blocks(summary: &SummaryResult) -> Vec<Block> {
    let mut blocks = vec![
        Block::Title(REPORT_TITLE.to_string()),
        Block::Spacer(18.0),
        Block::Heading("Elevator Summary".to_string()),
        Block::Paragraph(summary.summary_elevator.clone()),
        Block::Spacer(14.0),
        Block::Heading("Key Points".to_string()),
    ];
    blocks.extend(summary.summary_bullets.iter().cloned().map(Block::Bullet));
    blocks.push(Block::Spacer(14.0));

    blocks.push(Block::Heading("Missing Information".to_string()));
    blocks.extend(summary.missing_info.iter().cloned().map(Block::Bullet));
    blocks.push(Block::Spacer(14.0));

    blocks.push(Block::Heading("Next Steps".to_string()));
    blocks.extend(
        summary
            .next_steps
            .iter()
            .enumerate()
            .map(|(i, step)| Block::Numbered(i + 1, step.clone())),
    );
    blocks.push(Block::Spacer(14.0));

    blocks.push(Block::Heading(format!("Confidence: {}%", summary.confidence)));
    blocks
}

pub fn render_summary_pdf(summary: &SummaryResult) -> Result<Vec<u8>, ReportError> {
    render_blocks(&summary_blocks(summary))
}

/// Same as [`render_summary_pdf`], run on the blocking pool.
pub async fn render_summary_blocking(summary: SummaryResult) -> Result<Vec<u8>, ReportError> {
    tokio::task::spawn_blocking(move || render_summary_pdf(&summary))
        .await
        .map_err(|e| ReportError::Join(e.to_string()))?
}

/// Lay out `blocks` and serialize the resulting pages as a PDF.
pub fn render_blocks(blocks: &[Block]) -> Result<Vec<u8>, ReportError> {
    let mut layout = Layout::new();
    for block in blocks {
        layout.place(block);
    }
    write_pages(layout.finish())
}

/// One PDF page per operation list, sharing the two Helvetica faces.
fn write_pages(pages: Vec<Vec<Operation>>) -> Result<Vec<u8>, ReportError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(font_dictionary("Helvetica"));
    let bold_id = doc.add_object(font_dictionary("Helvetica-Bold"));
    let fonts = Dictionary::from_iter(vec![
        (Face::Regular.resource_name(), Object::Reference(regular_id)),
        (Face::Bold.resource_name(), Object::Reference(bold_id)),
    ]);
    let resources_id = doc.add_object(Dictionary::from_iter(vec![(
        "Font",
        Object::Dictionary(fonts),
    )]));

    let mut page_ids = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations }
            .encode()
            .map_err(|e| ReportError::Encode(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

        let page = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(PAGE_WIDTH as i64),
                    Object::Integer(PAGE_HEIGHT as i64),
                ]),
            ),
            ("Resources", Object::Reference(resources_id)),
            ("Contents", Object::Reference(content_id)),
        ]);
        page_ids.push(doc.add_object(page));
    }

    let pages_dict = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Count", Object::Integer(page_ids.len() as i64)),
        (
            "Kids",
            Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
        ),
    ]);
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| ReportError::Save(e.to_string()))?;
    Ok(buffer)
}

fn font_dictionary(base_font: &str) -> Dictionary {
    Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(base_font.as_bytes().to_vec())),
        ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
    ])
}

#[derive(Debug, Clone, Copy)]
enum Face {
    Regular,
    Bold,
}

impl Face {
    fn resource_name(self) -> &'static str {
        match self {
            Face::Regular => "F1",
            Face::Bold => "F2",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Style {
    face: Face,
    size: f32,
    leading: f32,
    space_before: f32,
    space_after: f32,
}

const TITLE: Style = Style {
    face: Face::Bold,
    size: 20.0,
    leading: 24.0,
    space_before: 0.0,
    space_after: 6.0,
};

const HEADING: Style = Style {
    face: Face::Bold,
    size: 14.0,
    leading: 18.0,
    space_before: 12.0,
    space_after: 6.0,
};

const BODY: Style = Style {
    face: Face::Regular,
    size: 11.0,
    leading: 14.0,
    space_before: 5.0,
    space_after: 5.0,
};

const ITEM: Style = Style {
    space_before: 2.0,
    space_after: 2.0,
    ..BODY
};

/// Cursor-based page filler. `y` is the top of the free space on the
/// current page, measured from the bottom edge.
struct Layout {
    pages: Vec<Vec<Operation>>,
    ops: Vec<Operation>,
    y: f32,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            ops: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn place(&mut self, block: &Block) {
        match block {
            Block::Title(text) => self.paragraph(TITLE, text, MARGIN, CONTENT_WIDTH, true),
            Block::Heading(text) => self.paragraph(HEADING, text, MARGIN, CONTENT_WIDTH, false),
            Block::Paragraph(text) => self.paragraph(BODY, text, MARGIN, CONTENT_WIDTH, false),
            Block::Bullet(text) => self.list_item(vec![BULLET], ITEM_INDENT, text),
            Block::Numbered(n, text) => {
                self.list_item(format!("{n}.").into_bytes(), NUMBER_ITEM_INDENT, text)
            }
            Block::Spacer(height) => self.advance(*height),
        }
    }

    fn paragraph(&mut self, style: Style, text: &str, x: f32, width: f32, centered: bool) {
        self.advance(style.space_before);
        for line in wrap(text, style, width) {
            let line_x = if centered {
                MARGIN + ((CONTENT_WIDTH - text_width(&line, style)) / 2.0).max(0.0)
            } else {
                x
            };
            self.line(style, line_x, line);
        }
        self.advance(style.space_after);
    }

    fn list_item(&mut self, label: Vec<u8>, indent: f32, text: &str) {
        self.advance(ITEM.space_before);
        let lines = wrap(text, ITEM, CONTENT_WIDTH - indent);
        for (i, line) in lines.into_iter().enumerate() {
            self.reserve(ITEM.leading);
            if i == 0 {
                self.draw(ITEM, MARGIN + BULLET_INDENT, self.y - ITEM.leading, label.clone());
            }
            self.line(ITEM, MARGIN + indent, line);
        }
        self.advance(ITEM.space_after);
    }

    fn line(&mut self, style: Style, x: f32, text: Vec<u8>) {
        self.reserve(style.leading);
        self.y -= style.leading;
        self.draw(style, x, self.y, text);
    }

    fn draw(&mut self, style: Style, x: f32, baseline: f32, text: Vec<u8>) {
        self.ops.extend([
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![
                    Object::Name(style.face.resource_name().as_bytes().to_vec()),
                    Object::Integer(style.size.round() as i64),
                ],
            ),
            Operation::new(
                "Td",
                vec![
                    Object::Integer(x.round() as i64),
                    Object::Integer(baseline.round() as i64),
                ],
            ),
            Operation::new("Tj", vec![Object::String(text, StringFormat::Hexadecimal)]),
            Operation::new("ET", vec![]),
        ]);
    }

    /// Start a new page unless `height` still fits on this one. A fresh page
    /// always accepts content, however tall.
    fn reserve(&mut self, height: f32) {
        let page_is_fresh = self.y >= PAGE_HEIGHT - MARGIN;
        if !page_is_fresh && self.y - height < MARGIN {
            self.break_page();
        }
    }

    fn advance(&mut self, height: f32) {
        self.y -= height;
        if self.y < MARGIN {
            self.break_page();
        }
    }

    fn break_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.ops));
        self.y = PAGE_HEIGHT - MARGIN;
    }

    fn finish(mut self) -> Vec<Vec<Operation>> {
        if !self.ops.is_empty() || self.pages.is_empty() {
            self.pages.push(self.ops);
        }
        self.pages
    }
}

/// Greedy word wrap. Words wider than the line are split by character.
fn wrap(text: &str, style: Style, width: f32) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    let mut current: Vec<u8> = Vec::new();

    for word in text.split_whitespace().map(encode_win_ansi) {
        let candidate_width = if current.is_empty() {
            text_width(&word, style)
        } else {
            text_width(&current, style) + text_width(b" ", style) + text_width(&word, style)
        };

        if candidate_width <= width {
            if !current.is_empty() {
                current.push(b' ');
            }
            current.extend_from_slice(&word);
            continue;
        }

        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        for byte in word {
            let mut next = current.clone();
            next.push(byte);
            if !current.is_empty() && text_width(&next, style) > width {
                lines.push(std::mem::replace(&mut current, vec![byte]));
            } else {
                current = next;
            }
        }
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn text_width(text: &[u8], style: Style) -> f32 {
    let units: u32 = text.iter().map(|&b| u32::from(glyph_width(b))).sum();
    let width = units as f32 * style.size / 1000.0;
    match style.face {
        // Helvetica-Bold runs roughly 8% wider than the regular face
        Face::Bold => width * 1.08,
        Face::Regular => width,
    }
}

/// Helvetica advance widths for printable ASCII, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
    334, 260, 334, 584, // '{'..'~'
];

fn glyph_width(byte: u8) -> u16 {
    match byte {
        0x20..=0x7E => HELVETICA_WIDTHS[usize::from(byte - 0x20)],
        BULLET => 350,
        0x85 => 1000,
        0x96 => 556,
        0x97 => 1000,
        0x91 | 0x92 => 222,
        0x93 | 0x94 => 333,
        _ => 556,
    }
}

/// Map text onto WinAnsiEncoding, replacing anything it cannot represent.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .filter_map(|c| match c {
            '\u{20}'..='\u{7E}' => Some(c as u8),
            '\u{A0}'..='\u{FF}' => Some(c as u32 as u8),
            '\t' => Some(b' '),
            c if c.is_control() => None,
            '\u{20AC}' => Some(0x80),
            '\u{2026}' => Some(0x85),
            '\u{2018}' => Some(0x91),
            '\u{2019}' => Some(0x92),
            '\u{201C}' => Some(0x93),
            '\u{201D}' => Some(0x94),
            '\u{2022}' => Some(BULLET),
            '\u{2013}' => Some(0x96),
            '\u{2014}' => Some(0x97),
            '\u{2122}' => Some(0x99),
            _ => Some(b'?'),
        })
        .collect()
}
