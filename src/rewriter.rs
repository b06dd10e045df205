// src/rewriter.rs
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::config::LinkSettings;
use crate::models::ImageReference;
use crate::scanner::IMAGE_TAG;

static SRC_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\ssrc[ ]*=[ ]*")([^"]*)""#).expect("src pattern is valid")
});

static WIDTH_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| dimension_attribute("width"));
static HEIGHT_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| dimension_attribute("height"));

fn dimension_attribute(name: &str) -> Regex {
    Regex::new(&format!(r#"(?i)\s({}[ ]*=[ ]*(?:"[^"]*"|'[^']*'|[0-9]+%?))"#, name))
        .expect("dimension attribute pattern is valid")
}

#[derive(Debug, Clone)]
pub struct Rewrite<'a> {
    pub reference: &'a ImageReference,
    pub src: String,
    pub width: u32,
    pub height: u32,
    pub link_href: Option<String>,
}

impl Rewrite<'_> {
    pub fn render(&self, link: &LinkSettings) -> String {
        let tag = self.render_tag();
        let tag = match &self.link_href {
            Some(href) if !self.reference.has_link() => wrap_in_link(&tag, href, link),
            _ => tag,
        };
        format!("{}{}", self.reference.anchor.as_deref().unwrap_or(""), tag)
    }

    /// Edits the original `<img>` tag in place: the `src` value and the `width`/`height`
    /// attributes change, everything else stays byte for byte.
    pub fn render_tag(&self) -> String {
        let original = &self.reference.img_tag;
        let src = escape_attribute(&self.src);
        let mut tag = match SRC_VALUE.captures(original) {
            Some(caps) => {
                let value = caps.get(2).map(|m| m.range()).unwrap_or(0..0);
                format!("{}{}{}", &original[..value.start], src, &original[value.end..])
            }
            None => {
                let raw = match &self.reference.src_query {
                    Some(query) => format!("\"{}?{}\"", self.reference.src, query),
                    None => format!("\"{}\"", self.reference.src),
                };
                original.replacen(&raw, &format!("\"{}\"", src), 1)
            }
        };
        set_dimension(&mut tag, &WIDTH_ATTRIBUTE, "width", self.width);
        set_dimension(&mut tag, &HEIGHT_ATTRIBUTE, "height", self.height);
        tag
    }
}

fn set_dimension(tag: &mut String, pattern: &Regex, name: &str, value: u32) {
    let attribute = format!("{}=\"{}\"", name, value);
    if let Some(found) = pattern.captures(tag).and_then(|caps| caps.get(1)) {
        tag.replace_range(found.range(), &attribute);
        return;
    }
    let body_end = if tag.ends_with("/>") {
        tag.len() - 2
    } else {
        tag.len() - 1
    };
    let insert_at = tag[..body_end].trim_end().len();
    tag.insert_str(insert_at, &format!(" {}", attribute));
}

fn push_attribute(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(value);
    out.push('"');
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn wrap_in_link(tag: &str, href: &str, link: &LinkSettings) -> String {
    let mut anchor = String::from("<a");
    push_attribute(&mut anchor, "href", &escape_attribute(href));
    if let Some(class) = link.class.as_deref().filter(|c| !c.is_empty()) {
        push_attribute(&mut anchor, "class", &escape_attribute(class));
    }
    if let Some(rel) = link.rel.as_deref().filter(|r| !r.is_empty()) {
        push_attribute(&mut anchor, "rel", &escape_attribute(rel));
    }
    format!("{}>{}</a>", anchor, tag)
}

pub fn apply(text: &str, replacements: &HashMap<String, String>) -> String {
    if replacements.is_empty() {
        return text.to_string();
    }
    IMAGE_TAG
        .replace_all(text, |caps: &Captures<'_>| {
            replacements
                .get(&caps[0])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
