//! Markup preparation for the rendering engine.
//!
//! Feed content arrives as anything from a full page to a bare fragment.
//! [`HtmlDocument`] turns it into a complete, printable page through a fixed
//! sequence of steps, each a pure `HtmlDocument -> HtmlDocument` function.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

const META_TAGS: &str = concat!(
    r#"<meta charset="UTF-8">"#,
    r#"<meta name="viewport" content="width=device-width, initial-scale=1.0">"#,
);

const BASE_STYLE: &str = r#"<style>
@font-face { font-family: 'SimSun'; src: local('SimSun'); }
@font-face { font-family: 'Microsoft YaHei'; src: local('Microsoft YaHei'); }
body {
    font-family: 'Microsoft YaHei', 'SimSun', Arial, sans-serif;
    margin: 20px;
    font-size: 16px;
    line-height: 1.8;
    text-align: justify;
    word-wrap: break-word;
    word-break: normal;
}
img { max-width: 100%; height: auto; }
p {
    line-height: 1.8;
    margin-bottom: 15px;
    text-align: justify;
    word-wrap: break-word;
    word-break: normal;
}
h1, h2, h3 { margin-top: 20px; }
* { max-width: 100%; box-sizing: border-box; }
</style>"#;

const TEXT_BLOCK_STYLE: &str = "word-wrap: break-word; word-break: normal; text-align: justify;";

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex is valid"))
}

fn doctype_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)^\s*<!doctype[^>]*>\s*")
}

fn html_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)<html\b[^>]*>")
}

fn head_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)<head\b[^>]*>")
}

fn head_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)</head\s*>")
}

fn body_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)<body\b[^>]*>")
}

fn html_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)</html\s*>")
}

fn img_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?is)<img\b[^>]*>")
}

fn src_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r#"(?is)(\ssrc\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#,
    )
}

fn text_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?is)<(p|div|span)(\s[^>]*?)?(/?)>")
}

fn style_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"(?is)(\sstyle\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
}

/// An `<img>` reference found in a document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Position among all `<img>` tags, counting those without a source.
    pub index: usize,
    /// Decoded `src` value.
    pub src: String,
}

/// Title block placed at the top of the body.
#[derive(Debug, Clone, Default)]
pub struct Header<'a> {
    pub title: &'a str,
    pub author: Option<&'a str>,
    pub published: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlDocument {
    markup: String,
}

impl HtmlDocument {
    pub fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.markup
    }

    pub fn into_string(self) -> String {
        self.markup
    }

    /// Runs every markup step that does not need the network.
    pub fn sanitize(self) -> Self {
        self.ensure_shell()
            .normalize_image_sources()
            .inject_meta()
            .inject_style()
            .wrap_text_blocks()
    }

    /// Guarantees a doctype plus `html`, `head` and `body` elements.
    pub fn ensure_shell(self) -> Self {
        let (doctype, mut markup) = match doctype_re().find(&self.markup) {
            Some(m) => (
                m.as_str().trim_start().to_string(),
                self.markup[m.end()..].to_string(),
            ),
            None => ("<!DOCTYPE html>\n".to_string(), self.markup),
        };

        if !html_open_re().is_match(&markup) {
            markup = format!("<html>{markup}</html>");
        }

        if !head_open_re().is_match(&markup) {
            if let Some(pos) = html_open_re().find(&markup).map(|m| m.end()) {
                markup.insert_str(pos, "<head></head>");
            }
        }

        if !body_open_re().is_match(&markup) {
            let start = head_close_re()
                .find(&markup)
                .or_else(|| html_open_re().find(&markup))
                .map_or(0, |m| m.end());
            let end = html_close_re()
                .find_iter(&markup)
                .last()
                .map(|m| m.start())
                .filter(|&end| end >= start)
                .unwrap_or(markup.len());
            markup.insert_str(end, "</body>");
            markup.insert_str(start, "<body>");
        }

        Self {
            markup: format!("{doctype}{markup}"),
        }
    }

    /// Rewrites protocol-relative image sources (`//cdn.host/...`), as served
    /// by image CDNs, into absolute `https://` URLs.
    pub fn normalize_image_sources(self) -> Self {
        self.map_image_sources(|_, src| {
            src.starts_with("//").then(|| format!("https:{src}"))
        })
    }

    /// Adds charset and viewport declarations at the top of `<head>`.
    pub fn inject_meta(self) -> Self {
        self.insert_after_open(head_open_re(), META_TAGS)
    }

    /// Appends the baseline layout stylesheet to `<head>`.
    pub fn inject_style(mut self) -> Self {
        match head_close_re().find(&self.markup).map(|m| m.start()) {
            Some(pos) => {
                self.markup.insert_str(pos, BASE_STYLE);
                self
            }
            None => self.insert_after_open(head_open_re(), BASE_STYLE),
        }
    }

    /// Adds wrapping rules inline on text containers so long words and URLs
    /// do not overflow the page.
    pub fn wrap_text_blocks(self) -> Self {
        let markup = text_block_re()
            .replace_all(&self.markup, |caps: &Captures| {
                let tag = &caps[1];
                let attrs = caps.get(2).map_or("", |m| m.as_str());
                let self_closing = &caps[3];

                let attrs = match style_attr_re().captures(attrs) {
                    Some(style) => {
                        let existing = style
                            .get(2)
                            .or_else(|| style.get(3))
                            .map_or("", |m| m.as_str())
                            .trim_end()
                            .trim_end_matches(';');
                        let whole = style.get(0).map_or(0..0, |m| m.range());
                        let merged = if existing.is_empty() {
                            TEXT_BLOCK_STYLE.to_string()
                        } else {
                            format!("{existing}; {TEXT_BLOCK_STYLE}")
                        };
                        format!(
                            "{}{}\"{}\"{}",
                            &attrs[..whole.start],
                            &style[1],
                            merged.replace('"', "'"),
                            &attrs[whole.end..]
                        )
                    }
                    None => format!("{attrs} style=\"{TEXT_BLOCK_STYLE}\""),
                };
                format!("<{tag}{attrs}{self_closing}>")
            })
            .into_owned();
        Self { markup }
    }

    /// Every `<img>` with a non-empty source, in document order.
    pub fn image_refs(&self) -> Vec<ImageRef> {
        img_tag_re()
            .find_iter(&self.markup)
            .enumerate()
            .filter_map(|(index, tag)| {
                let src = image_src(tag.as_str())?;
                (!src.is_empty()).then_some(ImageRef { index, src })
            })
            .collect()
    }

    /// Replaces the sources of the images whose index is in `sources`.
    pub fn with_image_sources(self, sources: &HashMap<usize, String>) -> Self {
        if sources.is_empty() {
            return self;
        }
        self.map_image_sources(|index, _| sources.get(&index).cloned())
    }

    /// Places the title block and a divider at the start of `<body>`.
    pub fn inject_header(self, header: &Header<'_>) -> Self {
        self.insert_after_open(body_open_re(), &header_html(header))
    }

    fn insert_after_open(mut self, open_tag: &Regex, fragment: &str) -> Self {
        if let Some(pos) = open_tag.find(&self.markup).map(|m| m.end()) {
            self.markup.insert_str(pos, fragment);
        }
        self
    }

    fn map_image_sources<F>(self, mut rewrite: F) -> Self
    where
        F: FnMut(usize, &str) -> Option<String>,
    {
        let mut index = 0;
        let markup = img_tag_re()
            .replace_all(&self.markup, |tag: &Captures| {
                let current = index;
                index += 1;
                let tag = &tag[0];

                let Some(src) = src_attr_re().captures(tag) else {
                    return tag.to_string();
                };
                let decoded = decode_entities(src_value(&src));
                match rewrite(current, &decoded) {
                    Some(new_src) => {
                        let whole = src.get(0).map_or(0..0, |m| m.range());
                        format!(
                            "{}{}\"{}\"{}",
                            &tag[..whole.start],
                            &src[1],
                            escape_html(&new_src),
                            &tag[whole.end..]
                        )
                    }
                    None => tag.to_string(),
                }
            })
            .into_owned();
        Self { markup }
    }
}

fn src_value<'t>(caps: &Captures<'t>) -> &'t str {
    caps.get(2)
        .or_else(|| caps.get(3))
        .or_else(|| caps.get(4))
        .map_or("", |m| m.as_str())
}

fn image_src(tag: &str) -> Option<String> {
    let caps = src_attr_re().captures(tag)?;
    Some(decode_entities(src_value(&caps).trim()))
}

fn header_html(header: &Header<'_>) -> String {
    let author = header
        .author
        .filter(|a| !a.trim().is_empty())
        .map(|a| format!("Author: {}", escape_html(a)))
        .unwrap_or_default();
    let published = header
        .published
        .filter(|p| !p.trim().is_empty())
        .map(|p| format!("Published: {}", escape_html(p)))
        .unwrap_or_default();

    format!(
        r#"
<div style="text-align: center; margin-bottom: 30px; max-width: 100%; padding: 0 20px;">
    <h1 style="font-size: 24px; margin-bottom: 15px; word-wrap: break-word; line-height: 1.4;">{title}</h1>
    <div style="font-size: 16px; color: #666; margin-bottom: 8px; word-wrap: break-word;">{author}</div>
    <div style="font-size: 14px; color: #999; word-wrap: break-word;">{published}</div>
</div>
<hr style="margin-bottom: 25px; border: 0; border-top: 1px solid #ddd;">
"#,
        title = escape_html(header.title),
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Decodes the entities that show up in attribute values (`&amp;` in CDN
/// query strings, mostly).
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(doc: &HtmlDocument, needle: &str) -> usize {
        doc.as_str()
            .find(needle)
            .unwrap_or_else(|| panic!("{needle} missing from {}", doc.as_str()))
    }

    #[test]
    fn test_fragment_gets_full_shell() {
        let doc = HtmlDocument::new("<p>hi</p>").ensure_shell();
        assert_eq!(
            doc.as_str(),
            "<!DOCTYPE html>\n<html><head></head><body><p>hi</p></body></html>"
        );
    }

    #[test]
    fn test_missing_head_and_body_are_added() {
        let doc = HtmlDocument::new("<html><p>hi</p></html>").ensure_shell();
        assert_eq!(
            doc.as_str(),
            "<!DOCTYPE html>\n<html><head></head><body><p>hi</p></body></html>"
        );
    }

    #[test]
    fn test_complete_document_is_untouched_by_shell() {
        let page = "<!doctype html><html><head><title>t</title></head><body>x</body></html>";
        assert_eq!(HtmlDocument::new(page).ensure_shell().as_str(), page);
    }

    #[test]
    fn test_meta_goes_first_and_style_last_in_head() {
        let doc = HtmlDocument::new("<html><head><title>t</title></head><body></body></html>")
            .inject_meta()
            .inject_style();

        let head = position(&doc, "<head>");
        let charset = position(&doc, r#"<meta charset="UTF-8">"#);
        let title = position(&doc, "<title>");
        let style = position(&doc, "<style>");
        let head_end = position(&doc, "</head>");
        assert_eq!(charset, head + "<head>".len());
        assert!(title < style && style < head_end);
        assert!(doc.as_str().contains("max-width: 100%"));
    }

    #[test]
    fn test_protocol_relative_images_become_https() {
        let doc = HtmlDocument::new(
            r#"<img src="//mmbiz.qpic.cn/a.png"><img src='https://x/b.png'><img data-src="c">"#,
        )
        .normalize_image_sources();

        assert!(doc.as_str().contains(r#"src="https://mmbiz.qpic.cn/a.png""#));
        assert!(doc.as_str().contains("src='https://x/b.png'"));
    }

    #[test]
    fn test_image_refs_keep_document_positions() {
        let doc = HtmlDocument::new(
            r#"<img src="https://x/a.png?w=1&amp;h=2"><IMG alt="none"><img class="c" src=https://x/c.gif />"#,
        );
        let refs = doc.image_refs();

        assert_eq!(
            refs,
            vec![
                ImageRef {
                    index: 0,
                    src: "https://x/a.png?w=1&h=2".into()
                },
                ImageRef {
                    index: 2,
                    src: "https://x/c.gif".into()
                },
            ]
        );
    }

    #[test]
    fn test_with_image_sources_rewrites_selected_tags() {
        let doc = HtmlDocument::new(r#"<img src="https://x/a.png" alt="a"><img src="https://x/b.png">"#);
        let sources = HashMap::from([(1, "/archive/images_1/img_1.png".to_string())]);
        let doc = doc.with_image_sources(&sources);

        assert_eq!(
            doc.as_str(),
            r#"<img src="https://x/a.png" alt="a"><img src="/archive/images_1/img_1.png">"#
        );
    }

    #[test]
    fn test_text_blocks_get_wrap_style() {
        let doc = HtmlDocument::new(
            r#"<p>a</p><div style="color: red;">b</div><span class="s">c</span><pre>d</pre>"#,
        )
        .wrap_text_blocks();

        assert!(doc.as_str().contains(&format!(r#"<p style="{TEXT_BLOCK_STYLE}">"#)));
        assert!(doc
            .as_str()
            .contains(&format!(r#"<div style="color: red; {TEXT_BLOCK_STYLE}">"#)));
        assert!(doc
            .as_str()
            .contains(&format!(r#"<span class="s" style="{TEXT_BLOCK_STYLE}">"#)));
        assert!(doc.as_str().contains("<pre>d</pre>"));
    }

    #[test]
    fn test_header_is_first_inside_body_and_escaped() {
        let doc = HtmlDocument::new("<p>hi</p>")
            .sanitize()
            .inject_header(&Header {
                title: "Tom & <Jerry>",
                author: Some("Ana"),
                published: Some("2024-01-01 00:00:00"),
            });

        let body = position(&doc, "<body>");
        let header = position(&doc, "<div style=\"text-align: center;");
        let rule = position(&doc, "<hr");
        let content = position(&doc, ">hi</p>");
        assert!(body < header && header < rule && rule < content);
        assert!(doc.as_str().contains("Tom &amp; &lt;Jerry&gt;"));
        assert!(doc.as_str().contains("Author: Ana"));
        assert!(doc.as_str().contains("Published: 2024-01-01 00:00:00"));
    }

    #[test]
    fn test_header_omits_missing_author() {
        let doc = HtmlDocument::new("<body></body>").inject_header(&Header {
            title: "T",
            author: None,
            published: None,
        });
        assert!(!doc.as_str().contains("Author:"));
        assert!(!doc.as_str().contains("Published:"));
    }
}
