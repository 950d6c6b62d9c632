//! Page geometry and text metrics for the exported PDF.
//!
//! All values are PDF points with the origin at the bottom-left corner,
//! except where a name says `_from_top`.

pub const PAGE_WIDTH: f32 = 595.28;
pub const PAGE_HEIGHT: f32 = 841.89;

pub const MARGIN: f32 = 10.0 * POINTS_PER_MM;
pub const CAPTION_RESERVE: f32 = 20.0 * POINTS_PER_MM;
pub const CAPTION_OFFSET: f32 = 5.0 * POINTS_PER_MM;
pub const IMAGE_SHIFT: f32 = 10.0 * POINTS_PER_MM;
pub const COVER_LINE_GAP: f32 = 15.0 * POINTS_PER_MM;

const POINTS_PER_MM: f32 = 72.0 / 25.4;
const MIN_CAPTION_SIZE: f32 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Scales to the box width first and falls back to the box height when the
/// result would be too tall. Aspect ratio is always preserved.
pub fn fit_within(width: f32, height: f32, box_width: f32, box_height: f32) -> Size {
    if width <= 0.0 || height <= 0.0 {
        return Size {
            width: 0.0,
            height: 0.0,
        };
    }
    let mut fitted = Size {
        width: box_width,
        height: box_width * height / width,
    };
    if fitted.height > box_height {
        fitted.height = box_height;
        fitted.width = box_height * width / height;
    }
    fitted
}

/// Where a page image of the given pixel size lands on a content page.
pub fn place_image(pixel_width: u32, pixel_height: u32) -> Placement {
    let content_width = PAGE_WIDTH - 2.0 * MARGIN;
    let content_height = PAGE_HEIGHT - 2.0 * MARGIN;
    let size = fit_within(
        pixel_width as f32,
        pixel_height as f32,
        content_width,
        content_height - CAPTION_RESERVE,
    );

    let x = (PAGE_WIDTH - size.width) / 2.0;
    let top_from_top = ((PAGE_HEIGHT - size.height) / 2.0 + IMAGE_SHIFT)
        .min(PAGE_HEIGHT - MARGIN - size.height)
        .max(MARGIN + CAPTION_RESERVE);
    Placement {
        x,
        y: PAGE_HEIGHT - top_from_top - size.height,
        width: size.width,
        height: size.height,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Helvetica,
    HelveticaBold,
}

impl Font {
    pub fn resource_name(self) -> &'static [u8] {
        match self {
            Self::Helvetica => b"F1",
            Self::HelveticaBold => b"F2",
        }
    }

    pub fn base_font(self) -> &'static [u8] {
        match self {
            Self::Helvetica => b"Helvetica",
            Self::HelveticaBold => b"Helvetica-Bold",
        }
    }

    fn widths(self) -> &'static [u16; 95] {
        match self {
            Self::Helvetica => &HELVETICA_WIDTHS,
            Self::HelveticaBold => &HELVETICA_BOLD_WIDTHS,
        }
    }
}

// Glyph advances in 1/1000 em for codes 32..=126.
#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

const FALLBACK_WIDTH: u16 = 556;

/// Width of `text` once encoded for the page, in points.
pub fn text_width(text: &str, font: Font, size: f32) -> f32 {
    let widths = font.widths();
    let units: u32 = encode_win_ansi(text)
        .into_iter()
        .map(|byte| {
            u32::from(match byte {
                32..=126 => widths[(byte - 32) as usize],
                _ => FALLBACK_WIDTH,
            })
        })
        .sum();
    units as f32 * size / 1000.0
}

pub fn centered_x(text: &str, font: Font, size: f32) -> f32 {
    (PAGE_WIDTH - text_width(text, font, size)) / 2.0
}

/// Shrinks the caption until it fits `max_width`; past the minimum size the
/// text itself is shortened with an ellipsis.
pub fn fit_caption(text: &str, preferred: f32, max_width: f32) -> (String, f32) {
    let font = Font::Helvetica;
    let natural = text_width(text, font, preferred);
    if natural <= max_width {
        return (text.to_string(), preferred);
    }
    let size = (preferred * max_width / natural).max(MIN_CAPTION_SIZE);
    if text_width(text, font, size) <= max_width {
        return (text.to_string(), size);
    }
    let mut shortened: String = text.to_string();
    while !shortened.is_empty() && text_width(&format!("{shortened}..."), font, size) > max_width {
        shortened.pop();
    }
    (format!("{}...", shortened.trim_end()), size)
}

/// Encodes text for the standard 14 fonts. Characters outside Latin-1 become
/// `?` and control characters become spaces.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch as u32 {
            0x20..=0x7E | 0xA0..=0xFF => ch as u32 as u8,
            0x00..=0x1F | 0x7F..=0x9F => b' ',
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(left: f32, right: f32) -> bool {
        (left - right).abs() < 0.01
    }

    #[test]
    fn fit_within_prefers_full_width() {
        let size = fit_within(1024.0, 512.0, 500.0, 700.0);
        assert!(close(size.width, 500.0));
        assert!(close(size.height, 250.0));
    }

    #[test]
    fn fit_within_falls_back_to_height_for_tall_images() {
        let size = fit_within(500.0, 2000.0, 500.0, 700.0);
        assert!(close(size.height, 700.0));
        assert!(close(size.width, 175.0));
        assert!(close(size.width / size.height, 500.0 / 2000.0));
    }

    #[test]
    fn square_image_fills_content_width() {
        let placement = place_image(1024, 1024);
        let content_width = PAGE_WIDTH - 2.0 * MARGIN;
        assert!(close(placement.width, content_width));
        assert!(close(placement.height, content_width));
        assert!(close(placement.x, MARGIN));
        assert!(placement.y >= MARGIN - 0.01);
        let top_from_top = PAGE_HEIGHT - placement.y - placement.height;
        assert!(top_from_top >= MARGIN + CAPTION_RESERVE - 0.01);
    }

    #[test]
    fn tall_image_stays_below_caption_reservation() {
        let placement = place_image(300, 3000);
        let top_from_top = PAGE_HEIGHT - placement.y - placement.height;
        assert!(close(top_from_top, MARGIN + CAPTION_RESERVE));
        assert!(close(placement.y, MARGIN));
    }

    const PIXEL_SIZES: [(u32, u32); 9] = [
        (4000, 10),
        (10, 4000),
        (1, 1),
        (3, 2),
        (2, 3),
        (1024, 1024),
        (1536, 1024),
        (20000, 20000),
        (1, 5000),
    ];

    fn same_ratio(width: f32, height: f32, pixel_width: u32, pixel_height: u32) -> bool {
        let expected = pixel_width as f32 / pixel_height as f32;
        ((width / height) - expected).abs() <= expected * 1e-3
    }

    #[test]
    fn fit_within_stays_inside_box_for_any_shape() {
        let box_width = PAGE_WIDTH - 2.0 * MARGIN;
        let box_height = PAGE_HEIGHT - 2.0 * MARGIN - CAPTION_RESERVE;
        for (w, h) in PIXEL_SIZES {
            let size = fit_within(w as f32, h as f32, box_width, box_height);
            assert!(size.width <= box_width + 0.01, "{w}x{h}: {size:?}");
            assert!(size.height <= box_height + 0.01, "{w}x{h}: {size:?}");
            assert!(same_ratio(size.width, size.height, w, h), "{w}x{h}: {size:?}");
            assert!(
                close(size.width, box_width) || close(size.height, box_height),
                "{w}x{h}: {size:?}"
            );
        }
    }

    #[test]
    fn placed_image_stays_inside_content_area_for_any_shape() {
        for (w, h) in PIXEL_SIZES {
            let placement = place_image(w, h);
            let top_from_top = PAGE_HEIGHT - placement.y - placement.height;
            assert!(placement.x >= MARGIN - 0.01, "{w}x{h}: {placement:?}");
            assert!(
                placement.x + placement.width <= PAGE_WIDTH - MARGIN + 0.01,
                "{w}x{h}: {placement:?}"
            );
            assert!(placement.y >= MARGIN - 0.01, "{w}x{h}: {placement:?}");
            assert!(
                top_from_top >= MARGIN + CAPTION_RESERVE - 0.01,
                "{w}x{h}: {placement:?}"
            );
            assert!(
                same_ratio(placement.width, placement.height, w, h),
                "{w}x{h}: {placement:?}"
            );
        }
    }

    #[test]
    fn text_width_uses_glyph_metrics() {
        assert!(close(text_width("A", Font::Helvetica, 10.0), 6.67));
        assert!(close(text_width("ii", Font::Helvetica, 10.0), 4.44));
        assert!(
            text_width("Coloring", Font::HelveticaBold, 48.0)
                > text_width("Coloring", Font::Helvetica, 48.0)
        );
    }

    #[test]
    fn long_caption_shrinks_then_truncates() {
        let short = "A robot waving";
        assert_eq!(fit_caption(short, 14.0, 500.0), (short.to_string(), 14.0));

        let long = "A group of cute space dinosaurs characters, for Ava to color ".repeat(2);
        let (text, size) = fit_caption(&long, 14.0, 500.0);
        assert!(size < 14.0);
        assert!(text_width(&text, Font::Helvetica, size) <= 500.0);

        let huge = "x".repeat(400);
        let (text, size) = fit_caption(&huge, 14.0, 500.0);
        assert!(close(size, MIN_CAPTION_SIZE));
        assert!(text.ends_with("..."));
        assert!(text_width(&text, Font::Helvetica, size) <= 500.0);
    }

    #[test]
    fn win_ansi_keeps_latin1_and_replaces_the_rest() {
        assert_eq!(encode_win_ansi("Zoë"), vec![b'Z', b'o', 0xEB]);
        assert_eq!(encode_win_ansi("🦕 ok"), b"? ok".to_vec());
        assert_eq!(encode_win_ansi("a\tb"), b"a b".to_vec());
    }
}
