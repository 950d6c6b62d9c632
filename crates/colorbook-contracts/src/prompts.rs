use crate::error::ValidationError;

pub const DEFAULT_PAGE_COUNT: usize = 5;
pub const MAX_PAGE_COUNT: usize = 12;

pub const COLORING_STYLE_SUFFIX: &str =
    "black and white, thick lines, coloring book style, simple, clear, no shading";

/// Slot templates, `{theme}` and `{name}` are substituted per book.
const SLOT_TEMPLATES: &[&str] = &[
    "A {theme} character waving, for {name} to color",
    "A fun scene with a {theme} creature playing, for {name} to color",
    "A simple landscape featuring {theme} elements, for {name} to color",
    "A vehicle or object related to {theme}, for {name} to color",
    "A group of cute {theme} characters, for {name} to color",
];

pub fn validate_book_request(
    theme: &str,
    child_name: &str,
    page_count: usize,
) -> Result<(), ValidationError> {
    if theme.trim().is_empty() || child_name.trim().is_empty() {
        return Err(ValidationError::MissingBookInput);
    }
    if page_count == 0 || page_count > MAX_PAGE_COUNT {
        return Err(ValidationError::PageCount {
            requested: page_count,
            max: MAX_PAGE_COUNT,
        });
    }
    Ok(())
}

/// Slots past the last template wrap around to the first one.
pub fn build_prompts(child_name: &str, theme: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|slot| {
            SLOT_TEMPLATES[slot % SLOT_TEMPLATES.len()]
                .replace("{theme}", theme)
                .replace("{name}", child_name)
        })
        .collect()
}

/// Prompt text as sent to the image provider.
pub fn styled_prompt(prompt: &str) -> String {
    format!("{}, {}", prompt.trim(), COLORING_STYLE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_prompts_follows_slot_templates() {
        let prompts = build_prompts("Ava", "space dinosaurs", 5);
        assert_eq!(prompts.len(), 5);
        assert_eq!(
            prompts[0],
            "A space dinosaurs character waving, for Ava to color"
        );
        assert_eq!(
            prompts[4],
            "A group of cute space dinosaurs characters, for Ava to color"
        );
    }

    #[test]
    fn build_prompts_wraps_past_template_count() {
        let prompts = build_prompts("Leo", "pirates", 7);
        assert_eq!(prompts[5], prompts[0]);
        assert_eq!(prompts[6], prompts[1]);
    }

    #[test]
    fn styled_prompt_appends_coloring_style() {
        assert_eq!(
            styled_prompt("A cat "),
            "A cat, black and white, thick lines, coloring book style, simple, clear, no shading"
        );
    }

    #[test]
    fn validate_rejects_out_of_range_counts() {
        assert_eq!(
            validate_book_request("cats", "Ava", 0),
            Err(ValidationError::PageCount {
                requested: 0,
                max: MAX_PAGE_COUNT
            })
        );
        assert!(validate_book_request("cats", "Ava", MAX_PAGE_COUNT).is_ok());
        assert!(validate_book_request("cats", "Ava", MAX_PAGE_COUNT + 1).is_err());
    }
}
