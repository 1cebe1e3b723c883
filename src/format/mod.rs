use std::{
    collections::HashMap,
    path::Path,
};

use log::warn;
use pulldown_cmark::{
    html,
    Options,
    Parser,
};
use regex::{
    Captures,
    Regex,
};

use crate::core::NoteRecord;

const MATH_REPLACE: &str = "OBSTOANKIMATH";
const INLINE_CODE_REPLACE: &str = "OBSTOANKICODEINLINE";
const DISPLAY_CODE_REPLACE: &str = "OBSTOANKICODEDISPLAY";

const PARA_OPEN: &str = "<p>";
const PARA_CLOSE: &str = "</p>";

const IMAGE_EXTS: [&str; 8] = ["png", "jpg", "jpeg", "gif", "bmp", "svg", "tiff", "webp"];
const AUDIO_EXTS: [&str; 8] = ["wav", "m4a", "flac", "mp3", "wma", "aac", "webm", "ogg"];

/// Converts raw field text into Anki's HTML flavor: math and code spans are
/// protected, curly braces become cloze deletions, embeds and wiki links
/// resolve to store-native tags, the rest renders as markdown.
///
/// One converter is built per document; media referenced by any field of the
/// document accumulates in `detected_media`.
pub struct FormatConverter {
    vault_name: String,
    detected_media: HashMap<String, String>,

    display_math_regexp: Regex,
    inline_math_candidate: Regex,
    inline_code_candidate: Regex,
    display_code_regexp: Regex,
    anki_math_regexp: Regex,
    anki_cloze_regexp: Regex,
    cloze_regexp: Regex,
    highlight_regexp: Regex,
    embed_regexp: Regex,
    link_regexp: Regex,
    image_regexp: Regex,
    sound_regexp: Regex,
}

impl FormatConverter {
    pub fn new(vault_name: &str) -> Self {
        FormatConverter {
            vault_name: vault_name.to_string(),
            detected_media: HashMap::new(),
            display_math_regexp: Regex::new(r"\$\$[\s\S]*?\$\$").unwrap(),
            inline_math_candidate: Regex::new(r"\$[^$]+\$").unwrap(),
            inline_code_candidate: Regex::new(r"`[^`]+`").unwrap(),
            display_code_regexp: Regex::new(r"```[\s\S]*?```").unwrap(),
            anki_math_regexp: Regex::new(r"(\\\[[\s\S]*?\\\])|(\\\([\s\S]*?\\\))").unwrap(),
            anki_cloze_regexp: Regex::new(r"\{\{c\d+::[\s\S]+?\}\}").unwrap(),
            cloze_regexp: Regex::new(r"\{(?:c?(\d+)[:|])?((?:[^\n][\n]?)+?)\}").unwrap(),
            highlight_regexp: Regex::new(r"==(.+?)==").unwrap(),
            embed_regexp: Regex::new(r"!\[\[(.*?)\]\]").unwrap(),
            link_regexp: Regex::new(r"\[\[(.*?)\]\]").unwrap(),
            image_regexp: Regex::new(r#"<img src="(.*?)""#).unwrap(),
            sound_regexp: Regex::new(r"\[sound:(.+)\]").unwrap(),
        }
    }

    /// Media files referenced so far: file name -> path as written in the
    /// document (possibly relative, resolved by the caller).
    pub fn detected_media(&self) -> &HashMap<String, String> {
        &self.detected_media
    }

    pub fn take_detected_media(&mut self) -> HashMap<String, String> {
        std::mem::take(&mut self.detected_media)
    }

    /// Spans of `$...$` inline math. The regex crate has no look-around, so
    /// the original boundary conditions (no `$` before the opener, content
    /// neither starting nor ending in whitespace) are checked by hand on
    /// each candidate.
    pub fn inline_math_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let bytes = text.as_bytes();
        let mut spans = Vec::new();
        let mut search = 0;
        while let Some(found) = self.inline_math_candidate.find_at(text, search) {
            let (start, end) = (found.start(), found.end());
            let content = &text[start + 1..end - 1];
            let prev_ok = start == 0 || bytes[start - 1] != b'$';
            let edges_ok = content.chars().next().is_some_and(|c| !c.is_whitespace())
                && content.chars().last().is_some_and(|c| !c.is_whitespace());
            if prev_ok && edges_ok {
                spans.push((start, end));
                search = end;
            } else {
                search = start + 1;
            }
        }
        spans
    }

    /// Spans of `` `...` `` inline code (opening backtick not preceded by
    /// another backtick).
    pub fn inline_code_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let bytes = text.as_bytes();
        let mut spans = Vec::new();
        let mut search = 0;
        while let Some(found) = self.inline_code_candidate.find_at(text, search) {
            let (start, end) = (found.start(), found.end());
            if start == 0 || bytes[start - 1] != b'`' {
                spans.push((start, end));
                search = end;
            } else {
                search = start + 1;
            }
        }
        spans
    }

    pub fn display_math_spans(&self, text: &str) -> Vec<(usize, usize)> {
        self.display_math_regexp.find_iter(text).map(|m| (m.start(), m.end())).collect()
    }

    pub fn display_code_spans(&self, text: &str) -> Vec<(usize, usize)> {
        self.display_code_regexp.find_iter(text).map(|m| (m.start(), m.end())).collect()
    }

    fn obsidian_to_anki_math(&self, note_text: &str) -> String {
        let text = self.display_math_regexp.replace_all(note_text, |caps: &Captures| {
            let found = &caps[0];
            format!(r"\[{}\]", &found[2..found.len() - 2])
        });
        let spans = self.inline_math_spans(&text);
        replace_spans(&text, &spans, |span| format!(r"\({}\)", &span[1..span.len() - 1]))
    }

    /// Change `{text}` / `{n:text}` / `{cn:text}` to Anki's numbered cloze
    /// syntax. Explicit numbers are honored; unnumbered occurrences take an
    /// auto-incrementing counter local to this call.
    pub fn curly_to_cloze(&self, text: &str) -> String {
        let bytes = text.as_bytes();
        let mut unset_num: u32 = 1;
        let mut out = String::with_capacity(text.len() + 16);
        let mut last = 0;
        let mut search = 0;
        while let Some(caps) = self.cloze_regexp.captures_at(text, search) {
            let whole = caps.get(0).unwrap();
            let (start, end) = (whole.start(), whole.end());
            let content = caps.get(2).unwrap();
            // Emulated look-arounds: brace pairs belonging to `{{cN::..}}`
            // syntax must never re-match.
            let prev_ok = start == 0 || bytes[start - 1] != b'{';
            let next_ok = end == bytes.len() || bytes[end] != b'}';
            let open_ok = bytes[content.start()] != b'{';
            let close_ok = bytes[end - 2] != b'}';
            if prev_ok && next_ok && open_ok && close_ok {
                out.push_str(&text[last..start]);
                match caps.get(1) {
                    Some(num) => {
                        out.push_str(&format!("{{{{c{}::{}}}}}", num.as_str(), content.as_str()))
                    }
                    None => {
                        out.push_str(&format!("{{{{c{}::{}}}}}", unset_num, content.as_str()));
                        unset_num += 1;
                    }
                }
                last = end;
                search = end;
            } else {
                search = start + 1;
            }
        }
        out.push_str(&text[last..]);
        out
    }

    /// `![[file.ext]]` embeds become `<img>` or `[sound:...]` tags and are
    /// recorded as detected media. Unsupported extensions are left in place.
    fn resolve_embeds(&mut self, text: &str) -> String {
        let embed_regexp = self.embed_regexp.clone();
        embed_regexp
            .replace_all(text, |caps: &Captures| {
                let target = caps[1].split('|').next().unwrap_or(&caps[1]).trim();
                let decoded = decode_path(target);
                let filename = basename(&decoded);
                let ext = extension(&filename);
                if IMAGE_EXTS.contains(&ext.as_str()) {
                    self.detected_media.entry(filename.clone()).or_insert(decoded);
                    format!(r#"<img src="{}">"#, filename)
                } else if AUDIO_EXTS.contains(&ext.as_str()) {
                    self.detected_media.entry(filename.clone()).or_insert(decoded);
                    format!("[sound:{}]", filename)
                } else {
                    warn!("Unsupported media embed, leaving untouched: {}", target);
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// `[[target]]` / `[[target|alias]]` wiki links become deep-link anchors
    /// into the vault. Embeds (`![[..]]`) that survived the media pass stay
    /// untouched.
    fn resolve_links(&self, text: &str) -> String {
        let vault = urlencoding::encode(&self.vault_name).into_owned();
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut search = 0;
        while let Some(caps) = self.link_regexp.captures_at(text, search) {
            let whole = caps.get(0).unwrap();
            let (start, end) = (whole.start(), whole.end());
            if start > 0 && bytes[start - 1] == b'!' {
                search = start + 1;
                continue;
            }
            let inner = caps.get(1).unwrap().as_str();
            let mut parts = inner.splitn(2, '|');
            let target = parts.next().unwrap_or(inner);
            let alias = parts.next().unwrap_or(target);
            out.push_str(&text[last..start]);
            out.push_str(&format!(
                r#"<a href="obsidian://open?vault={}&file={}">{}</a>"#,
                vault,
                urlencoding::encode(target),
                alias
            ));
            last = end;
            search = end;
        }
        out.push_str(&text[last..]);
        out
    }

    fn is_url(text: &str) -> bool {
        text.starts_with("http://") || text.starts_with("https://")
    }

    /// Rewrite rendered `<img>` srcs to their base name (Anki media files
    /// are flat) and record them for upload. Web URLs are left alone.
    fn fix_image_src(&mut self, html_text: &str) -> String {
        let image_regexp = self.image_regexp.clone();
        image_regexp
            .replace_all(html_text, |caps: &Captures| {
                let path = &caps[1];
                if Self::is_url(path) || path.is_empty() {
                    return caps[0].to_string();
                }
                let decoded = decode_path(path);
                let filename = basename(&decoded);
                self.detected_media.entry(filename.clone()).or_insert(decoded);
                caps[0].replace(path, &filename)
            })
            .into_owned()
    }

    fn fix_audio_src(&mut self, html_text: &str) -> String {
        let sound_regexp = self.sound_regexp.clone();
        sound_regexp
            .replace_all(html_text, |caps: &Captures| {
                let path = &caps[1];
                let decoded = decode_path(path);
                let filename = basename(&decoded);
                self.detected_media.entry(filename.clone()).or_insert(decoded);
                caps[0].replace(path, &filename)
            })
            .into_owned()
    }

    /// Apply the whole conversion pipeline to one field's raw text.
    pub fn format(&mut self, note_text: &str, cloze: bool, highlights_to_cloze: bool) -> String {
        let mut text = self.obsidian_to_anki_math(note_text);

        // Censor spans the later passes must not touch, in occurrence order.
        let (censored, math_matches) = censor(&text, &self.anki_math_regexp, MATH_REPLACE);
        text = censored;
        let inline_code = self.inline_code_spans(&text);
        let (censored, inline_code_matches) =
            censor_spans(&text, &inline_code, INLINE_CODE_REPLACE);
        text = censored;
        let (censored, display_code_matches) =
            censor(&text, &self.display_code_regexp, DISPLAY_CODE_REPLACE);
        text = censored;

        if cloze {
            if highlights_to_cloze {
                text = self.highlight_regexp.replace_all(&text, "{$1}").into_owned();
            }
            text = self.curly_to_cloze(&text);
        }

        text = self.resolve_embeds(&text);
        text = self.resolve_links(&text);

        text = decensor(text, INLINE_CODE_REPLACE, &inline_code_matches);
        text = decensor(text, DISPLAY_CODE_REPLACE, &display_code_matches);
        text = markdown_to_html(&text);
        text = decensor(text, MATH_REPLACE, &math_matches);

        text = self.fix_image_src(&text);
        text = self.fix_audio_src(&text);

        let trimmed = text.trim();
        // A single wrapping paragraph tag is noise in a card field.
        if trimmed.starts_with(PARA_OPEN) && trimmed.ends_with(PARA_CLOSE) {
            let inner = &trimmed[PARA_OPEN.len()..trimmed.len() - PARA_CLOSE.len()];
            if !inner.contains(PARA_OPEN) {
                return inner.to_string();
            }
        }
        trimmed.to_string()
    }

    pub fn has_clozes(&self, text: &str) -> bool {
        self.anki_cloze_regexp.is_match(text)
    }

    pub fn note_has_clozes(&self, note: &NoteRecord) -> bool {
        note.fields.values().any(|field| self.has_clozes(field))
    }
}

fn decode_path(path: &str) -> String {
    urlencoding::decode(path).map(|decoded| decoded.into_owned()).unwrap_or_else(|_| path.to_string())
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn replace_spans(
    text: &str,
    spans: &[(usize, usize)],
    mut replacement: impl FnMut(&str) -> String,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for &(start, end) in spans {
        out.push_str(&text[last..start]);
        out.push_str(&replacement(&text[start..end]));
        last = end;
    }
    out.push_str(&text[last..]);
    out
}

/// Replace every match of `regexp` with `mask`, returning the censored text
/// and the original spans in occurrence order.
fn censor(text: &str, regexp: &Regex, mask: &str) -> (String, Vec<String>) {
    let matches: Vec<String> = regexp.find_iter(text).map(|m| m.as_str().to_string()).collect();
    (regexp.replace_all(text, mask).into_owned(), matches)
}

fn censor_spans(text: &str, spans: &[(usize, usize)], mask: &str) -> (String, Vec<String>) {
    let matches = spans.iter().map(|&(start, end)| text[start..end].to_string()).collect();
    (replace_spans(text, spans, |_| mask.to_string()), matches)
}

/// Put censored spans back, one occurrence of `mask` per recorded original.
fn decensor(mut text: String, mask: &str, replacements: &[String]) -> String {
    for replacement in replacements {
        text = text.replacen(mask, replacement, 1);
    }
    text
}

fn markdown_to_html(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(text, options);
    let mut html_out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut html_out, parser);
    html_out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn math_delimiters_are_rewritten() {
        let converter = FormatConverter::new("vault");
        let text = converter.obsidian_to_anki_math("display $$x^2$$ and inline $y$ done");
        assert_eq!(text, r"display \[x^2\] and inline \(y\) done");
    }

    #[test]
    fn inline_math_requires_tight_delimiters() {
        let converter = FormatConverter::new("vault");
        assert!(converter.inline_math_spans("costs $5 and $10 dollars").is_empty());
        assert_eq!(converter.inline_math_spans("so $a+b$ holds"), vec![(3, 8)]);
    }

    #[test]
    fn cloze_numbering_honors_explicit_and_auto_counts() {
        let converter = FormatConverter::new("vault");
        let out = converter.curly_to_cloze("{fact} and {c2:other}");
        assert_eq!(out, "{{c1::fact}} and {{c2::other}}");
        // The counter is local to the call: a second conversion restarts at 1.
        let out = converter.curly_to_cloze("{another}");
        assert_eq!(out, "{{c1::another}}");
    }

    #[test]
    fn cloze_conversion_skips_existing_anki_clozes() {
        let converter = FormatConverter::new("vault");
        let out = converter.curly_to_cloze("{{c1::done}} but {fresh}");
        assert_eq!(out, "{{c1::done}} but {{c1::fresh}}");
    }

    #[test]
    fn code_spans_survive_cloze_formatting_byte_identical() {
        let mut converter = FormatConverter::new("vault");
        let out = converter.format("`code {with braces}`", true, false);
        assert!(out.contains("code {with braces}"));
        assert!(!out.contains("{{c"));
    }

    #[test]
    fn format_renders_markdown_and_unwraps_single_paragraph() {
        let mut converter = FormatConverter::new("vault");
        let out = converter.format("Some **bold** text", false, false);
        assert_eq!(out, "Some <strong>bold</strong> text");
    }

    #[test]
    fn format_keeps_multiple_paragraphs_wrapped() {
        let mut converter = FormatConverter::new("vault");
        let out = converter.format("first\n\nsecond", false, false);
        assert!(out.starts_with(PARA_OPEN));
        assert!(out.contains("<p>second</p>"));
    }

    #[test]
    fn highlights_become_clozes_when_enabled() {
        let mut converter = FormatConverter::new("vault");
        let out = converter.format("remember ==this bit==", true, true);
        assert!(out.contains("{{c1::this bit}}"));
    }

    #[test]
    fn image_embeds_resolve_and_register_media() {
        let mut converter = FormatConverter::new("vault");
        let out = converter.format("look at ![[diagrams/cell.png]]", false, false);
        assert!(out.contains(r#"<img src="cell.png">"#));
        assert_eq!(converter.detected_media().get("cell.png").unwrap(), "diagrams/cell.png");
    }

    #[test]
    fn audio_embeds_resolve_to_sound_tags() {
        let mut converter = FormatConverter::new("vault");
        let out = converter.format("![[clips/hello.mp3]]", false, false);
        assert!(out.contains("[sound:hello.mp3]"));
    }

    #[test]
    fn unsupported_embeds_are_left_untouched() {
        let mut converter = FormatConverter::new("vault");
        let out = converter.format("![[notes.xyz]]", false, false);
        assert!(out.contains("![[notes.xyz]]"));
        assert!(converter.detected_media().is_empty());
    }

    #[test]
    fn wiki_links_become_deep_link_anchors() {
        let mut converter = FormatConverter::new("my vault");
        let out = converter.format("see [[Other Note|that note]]", false, false);
        assert!(out.contains(r#"href="obsidian://open?vault=my%20vault&file=Other%20Note""#));
        assert!(out.contains(">that note</a>"));
    }

    #[test]
    fn markdown_images_are_flattened_to_basenames() {
        let mut converter = FormatConverter::new("vault");
        let out = converter.format("![a graph](plots/graph.png)", false, false);
        assert!(out.contains(r#"src="graph.png""#));
        assert_eq!(converter.detected_media().get("graph.png").unwrap(), "plots/graph.png");
    }

    #[test]
    fn web_images_are_not_rewritten() {
        let mut converter = FormatConverter::new("vault");
        let out = converter.format("![x](https://example.com/a/b.png)", false, false);
        assert!(out.contains("https://example.com/a/b.png"));
        assert!(converter.detected_media().is_empty());
    }

    #[test]
    fn math_content_is_protected_from_markdown() {
        let mut converter = FormatConverter::new("vault");
        let out = converter.format("value $a_1 * b_2$ here", false, false);
        assert!(out.contains(r"\(a_1 * b_2\)"));
        assert!(!out.contains("<em>"));
    }
}
