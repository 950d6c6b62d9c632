use std::io::Write as _;
use std::path::{Path, PathBuf};

use colorbook_contracts::book::{Book, Page};
use colorbook_contracts::error::AssemblyError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use pdf_writer::{Content, Filter, Finish, Name, Pdf, Rect, Ref, Str, TextStr};

use crate::layout::{
    centered_x, encode_win_ansi, fit_caption, place_image, Font, CAPTION_OFFSET, COVER_LINE_GAP,
    MARGIN, PAGE_HEIGHT, PAGE_WIDTH,
};

pub const COVER_TITLE: &str = "Coloring Adventures!";

const COVER_BORDER_RGB: (f32, f32, f32) = (100.0 / 255.0, 100.0 / 255.0, 200.0 / 255.0);
const CONTENT_GREY: f32 = 100.0 / 255.0;
const CAPTION_SIZE: f32 = 14.0;

/// A finished coloring book, ready to be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

impl Document {
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, AssemblyError> {
        let path = dir.join(&self.file_name);
        std::fs::create_dir_all(dir).map_err(|source| AssemblyError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
        std::fs::write(&path, &self.bytes).map_err(|source| AssemblyError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

pub fn document_file_name(child_name: &str, theme: &str) -> String {
    let raw = format!("{child_name}-{theme}-coloring-book.pdf");
    raw.chars()
        .map(|ch| {
            if ch == '/' || ch == '\\' || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect()
}

/// Turns a fully generated book into a PDF: a cover followed by one page per
/// coloring page in slot order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentAssembler;

impl DocumentAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(&self, book: &Book) -> Result<Document, AssemblyError> {
        if !book.is_complete() {
            return Err(AssemblyError::Incomplete {
                not_ready: book.not_ready(),
            });
        }

        // Decode everything up front so a bad page aborts before any output.
        let images = book
            .pages()
            .iter()
            .map(decode_page)
            .collect::<Result<Vec<DecodedImage>, AssemblyError>>()?;

        let mut refs = RefAllocator::default();
        let catalog_id = refs.next();
        let page_tree_id = refs.next();
        let regular_font_id = refs.next();
        let bold_font_id = refs.next();
        let info_id = refs.next();

        let mut pdf = Pdf::new();
        pdf.catalog(catalog_id).pages(page_tree_id);
        pdf.document_info(info_id)
            .title(TextStr(&format!(
                "{} coloring book for {}",
                book.theme(),
                book.child_name()
            )))
            .creator(TextStr("colorbook"));
        pdf.type1_font(regular_font_id)
            .base_font(Name(Font::Helvetica.base_font()))
            .encoding_predefined(Name(b"WinAnsiEncoding"));
        pdf.type1_font(bold_font_id)
            .base_font(Name(Font::HelveticaBold.base_font()))
            .encoding_predefined(Name(b"WinAnsiEncoding"));

        let fonts = [
            (Font::Helvetica, regular_font_id),
            (Font::HelveticaBold, bold_font_id),
        ];
        let mut page_ids = Vec::with_capacity(images.len() + 1);

        let cover_id = refs.next();
        let cover_content_id = refs.next();
        write_page(
            &mut pdf,
            cover_id,
            page_tree_id,
            cover_content_id,
            &fonts,
            None,
        );
        pdf.stream(cover_content_id, &cover_content(book));
        page_ids.push(cover_id);

        for (page, image) in book.pages().iter().zip(images) {
            let page_id = refs.next();
            let content_id = refs.next();
            let image_id = refs.next();

            let compressed = deflate(&image.rgb)?;
            let mut xobject = pdf.image_xobject(image_id, &compressed);
            xobject.filter(Filter::FlateDecode);
            xobject.width(image.width as i32);
            xobject.height(image.height as i32);
            xobject.color_space().device_rgb();
            xobject.bits_per_component(8);
            xobject.finish();

            write_page(
                &mut pdf,
                page_id,
                page_tree_id,
                content_id,
                &fonts,
                Some(image_id),
            );
            pdf.stream(content_id, &content_page(page, &image));
            page_ids.push(page_id);
        }

        let page_count = page_ids.len();
        pdf.pages(page_tree_id)
            .kids(page_ids.iter().copied())
            .count(page_count as i32);

        tracing::info!(
            book_id = %book.id(),
            pages = page_count,
            "coloring book assembled"
        );
        Ok(Document {
            file_name: document_file_name(book.child_name(), book.theme()),
            bytes: pdf.finish(),
            page_count,
        })
    }
}

#[derive(Default)]
struct RefAllocator(i32);

impl RefAllocator {
    fn next(&mut self) -> Ref {
        self.0 += 1;
        Ref::new(self.0)
    }
}

struct DecodedImage {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

const IMAGE_RESOURCE: &[u8] = b"Im1";

fn decode_page(page: &Page) -> Result<DecodedImage, AssemblyError> {
    let Some(payload) = page.image() else {
        return Err(AssemblyError::ImageDecode {
            page_id: page.id().to_string(),
            message: "page has no image".to_string(),
        });
    };
    let decoded =
        image::load_from_memory(&payload.bytes).map_err(|err| AssemblyError::ImageDecode {
            page_id: page.id().to_string(),
            message: err.to_string(),
        })?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(AssemblyError::ImageDecode {
            page_id: page.id().to_string(),
            message: "image has no pixels".to_string(),
        });
    }

    // Transparent areas become white paper.
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for pixel in rgba.pixels() {
        let alpha = pixel[3] as u32;
        for channel in &pixel.0[..3] {
            let blended = (*channel as u32 * alpha + 255 * (255 - alpha) + 127) / 255;
            rgb.push(blended as u8);
        }
    }
    Ok(DecodedImage { width, height, rgb })
}

fn deflate(bytes: &[u8]) -> Result<Vec<u8>, AssemblyError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|err| AssemblyError::Encode(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| AssemblyError::Encode(err.to_string()))
}

fn write_page(
    pdf: &mut Pdf,
    page_id: Ref,
    parent: Ref,
    content_id: Ref,
    fonts: &[(Font, Ref)],
    image: Option<Ref>,
) {
    let mut page = pdf.page(page_id);
    page.media_box(Rect::new(0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT));
    page.parent(parent);
    page.contents(content_id);
    let mut resources = page.resources();
    {
        let mut font_dict = resources.fonts();
        for (font, font_ref) in fonts {
            font_dict.pair(Name(font.resource_name()), *font_ref);
        }
    }
    if let Some(image_ref) = image {
        resources.x_objects().pair(Name(IMAGE_RESOURCE), image_ref);
    }
    resources.finish();
    page.finish();
}

fn show_centered(content: &mut Content, text: &str, font: Font, size: f32, baseline: f32) {
    content.begin_text();
    content.set_font(Name(font.resource_name()), size);
    content.next_line(centered_x(text, font, size), baseline);
    content.show(Str(&encode_win_ansi(text)));
    content.end_text();
}

fn cover_content(book: &Book) -> Vec<u8> {
    let mut content = Content::new();
    let (r, g, b) = COVER_BORDER_RGB;
    content.set_stroke_rgb(r, g, b);
    content.set_line_width(2.0);
    content.rect(
        MARGIN,
        MARGIN,
        PAGE_WIDTH - 2.0 * MARGIN,
        PAGE_HEIGHT - 2.0 * MARGIN,
    );
    content.stroke();

    content.set_fill_rgb(0.0, 0.0, 0.0);
    show_centered(
        &mut content,
        COVER_TITLE,
        Font::HelveticaBold,
        48.0,
        PAGE_HEIGHT - PAGE_HEIGHT / 3.0,
    );
    let middle = PAGE_HEIGHT / 2.0;
    show_centered(
        &mut content,
        &format!("for {}", book.child_name()),
        Font::Helvetica,
        24.0,
        middle,
    );
    show_centered(
        &mut content,
        &format!("Theme: {}", book.theme()),
        Font::Helvetica,
        24.0,
        middle - COVER_LINE_GAP,
    );
    content.finish()
}

fn content_page(page: &Page, image: &DecodedImage) -> Vec<u8> {
    let mut content = Content::new();
    content.set_stroke_rgb(CONTENT_GREY, CONTENT_GREY, CONTENT_GREY);
    content.set_line_width(0.5);
    content.rect(
        MARGIN,
        MARGIN,
        PAGE_WIDTH - 2.0 * MARGIN,
        PAGE_HEIGHT - 2.0 * MARGIN,
    );
    content.stroke();

    let (caption, size) = fit_caption(
        page.prompt(),
        CAPTION_SIZE,
        PAGE_WIDTH - 4.0 * MARGIN,
    );
    content.set_fill_rgb(CONTENT_GREY, CONTENT_GREY, CONTENT_GREY);
    show_centered(
        &mut content,
        &caption,
        Font::Helvetica,
        size,
        PAGE_HEIGHT - MARGIN - CAPTION_OFFSET,
    );

    let placement = place_image(image.width, image.height);
    content.save_state();
    content.transform([
        placement.width,
        0.0,
        0.0,
        placement.height,
        placement.x,
        placement.y,
    ]);
    content.x_object(Name(IMAGE_RESOURCE));
    content.restore_state();
    content.finish()
}
