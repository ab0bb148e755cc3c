use crate::models::PipelineResult;
use printpdf::{BuiltinFont, Mm, PdfDocument};
use std::io::BufWriter;

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const LINE_CHARS: usize = 90;

/// Text-only storyboard: a cover page, one page per panel description, and the generation trace.
pub fn generate_pdf(result: &PipelineResult) -> Result<Vec<u8>, printpdf::Error> {
    let (doc, cover, layer) = PdfDocument::new(
        format!("Comic: {}", truncate(&result.prompt, 48)),
        PAGE_WIDTH,
        PAGE_HEIGHT,
        "Cover",
    );
    let font = doc.add_builtin_font(BuiltinFont::Helvetica)?;

    let cover_layer = doc.get_page(cover).get_layer(layer);
    cover_layer.use_text("Prompt-to-Comic Storyboard", 20.0, Mm(15.0), Mm(275.0), &font);
    let mut y = 260.0;
    for line in wrap(&result.prompt, LINE_CHARS).iter().take(6) {
        cover_layer.use_text(line.as_str(), 11.0, Mm(15.0), Mm(y), &font);
        y -= 6.0;
    }
    cover_layer.use_text(format!("Style: {}   Panels: {}", result.style, result.panels), 10.0, Mm(15.0), Mm(y - 4.0), &font);
    cover_layer.use_text(format!("Job ID: {}", result.job_id), 8.0, Mm(15.0), Mm(y - 12.0), &font);

    for (i, description) in result.panel_descriptions.iter().enumerate() {
        let (page, layer) = doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, format!("Panel {}", i + 1));
        let layer_ref = doc.get_page(page).get_layer(layer);
        layer_ref.use_text(format!("Panel {}", i + 1), 16.0, Mm(15.0), Mm(275.0), &font);
        let mut y = 262.0;
        for line in wrap(description, LINE_CHARS).iter().take(40) {
            layer_ref.use_text(line.as_str(), 10.0, Mm(15.0), Mm(y), &font);
            y -= 5.5;
        }
    }

    if !result.messages.is_empty() {
        let (page, layer) = doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, "Trace");
        let layer_ref = doc.get_page(page).get_layer(layer);
        layer_ref.use_text("Generation trace", 14.0, Mm(15.0), Mm(275.0), &font);
        let mut y = 262.0;
        for (i, message) in result.messages.iter().enumerate() {
            layer_ref.use_text(format!("{}. {}", i + 1, truncate(message, LINE_CHARS)), 9.0, Mm(15.0), Mm(y), &font);
            y -= 5.0;
        }
    }

    let mut buf: Vec<u8> = Vec::new();
    {
        let mut writer = BufWriter::new(&mut buf);
        doc.save(&mut writer)?;
    }
    Ok(buf)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Greedy word wrap; builtin PDF fonts cannot measure text, so width is counted in characters.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArtStyle;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn wrap_respects_width() {
        let lines = wrap("one two three four five", 9);
        assert_eq!(lines, vec!["one two", "three", "four five"]);
        assert!(wrap("   ", 10).is_empty());
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("abcdef", 3), "abc…");
        assert_eq!(truncate("abc", 3), "abc");
    }

    #[test]
    fn renders_pdf_bytes() {
        let result = PipelineResult {
            job_id: Uuid::new_v4(),
            prompt: "Two kids in a spaceship arguing about pizza".into(),
            style: ArtStyle::Manga,
            panels: 2,
            scene: None,
            panel_descriptions: vec!["Panel 1: kids".into(), "Panel 2: kids".into()],
            images: vec![],
            comic_data: None,
            messages: vec!["Parsed scene".into()],
            message: "Parsed scene".into(),
            error: None,
        };
        let bytes = generate_pdf(&result).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
