// src/scanner.rs
use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::models::{Attribute, Dimension, ImageReference};

/// Optional anchor plus whitespace, then an image tag carrying a double-quoted `src`.
pub(crate) static IMAGE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)((<a [^>]*>)[ ]*)?(<img[^>]*?src[ ]*=[ ]*"([^"]+)"[^>]*>)"#)
        .expect("image tag pattern is valid")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([\w\-]+)[ ]*=[ ]*"([^"]*)""#).expect("attribute pattern is valid")
});

static WIDTH: LazyLock<Regex> = LazyLock::new(|| dimension_pattern("width"));
static HEIGHT: LazyLock<Regex> = LazyLock::new(|| dimension_pattern("height"));

fn dimension_pattern(property: &str) -> Regex {
    // Matches both `width="50"` and `style="width: 50px"`, but not `max-width`.
    Regex::new(&format!(
        r#"(?i)[ '";]{}[ ]*([=:])[ ]*"?([0-9]+)(%?)"?"#,
        property
    ))
    .expect("dimension pattern is valid")
}

pub struct MarkupScanner<'t> {
    text: &'t str,
}

impl<'t> MarkupScanner<'t> {
    pub fn new(text: &'t str) -> Self {
        Self { text }
    }

    pub fn references(&self) -> impl Iterator<Item = ImageReference> + 't {
        IMAGE_TAG
            .captures_iter(self.text)
            .filter_map(|caps| reference_from_captures(&caps))
    }
}

pub(crate) fn reference_from_captures(caps: &Captures<'_>) -> Option<ImageReference> {
    let matched = caps.get(0)?.as_str();
    let img_tag = caps.get(3)?.as_str();
    let raw_src = caps.get(4)?.as_str().trim();
    if raw_src.is_empty() {
        return None;
    }

    let (src, src_query) = match raw_src.split_once('?') {
        Some((path, query)) if !query.is_empty() => (path.to_string(), Some(query.to_string())),
        Some((path, _)) => (path.to_string(), None),
        None => (raw_src.to_string(), None),
    };

    let attributes = ATTRIBUTE
        .captures_iter(img_tag)
        .map(|a| Attribute {
            name: a[1].to_string(),
            value: a[2].to_string(),
        })
        .collect();

    Some(ImageReference {
        matched: matched.to_string(),
        anchor: caps.get(1).map(|m| m.as_str().to_string()),
        img_tag: img_tag.to_string(),
        src,
        src_query,
        attributes,
        width: declared_dimension(&WIDTH, img_tag),
        height: declared_dimension(&HEIGHT, img_tag),
    })
}

/// The style declaration wins over the attribute. Any percentage wins outright.
fn declared_dimension(pattern: &Regex, img_tag: &str) -> Option<Dimension> {
    let mut first = None;
    let mut from_style = None;
    for caps in pattern.captures_iter(img_tag) {
        let value: u32 = caps[2].parse().unwrap_or(0);
        if &caps[3] == "%" {
            return Some(Dimension::Percent(value));
        }
        let dimension = Dimension::Pixels(value);
        if first.is_none() {
            first = Some(dimension);
        }
        if from_style.is_none() && &caps[1] == ":" {
            from_style = Some(dimension);
        }
    }
    from_style.or(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> Vec<ImageReference> {
        MarkupScanner::new(text).references().collect()
    }

    #[test]
    fn test_extracts_src_and_dimensions() {
        let refs = scan(r#"<p>Hi <img src="/files/pic.png" width="50" height="25" alt="A pic"></p>"#);
        assert_eq!(refs.len(), 1);
        let r = &refs[0];
        assert_eq!(r.src, "/files/pic.png");
        assert_eq!(r.width, Some(Dimension::Pixels(50)));
        assert_eq!(r.height, Some(Dimension::Pixels(25)));
        assert_eq!(r.attribute("alt"), Some("A pic"));
        assert!(!r.has_link());
        assert_eq!(r.img_tag, r.matched);
    }

    #[test]
    fn test_separates_anchor_wrapper() {
        let refs = scan(r#"<a href="/big.png" class="x">  <img src="/files/a.png" /></a>"#);
        assert_eq!(refs.len(), 1);
        assert_eq!(
            refs[0].anchor.as_deref(),
            Some(r#"<a href="/big.png" class="x">  "#)
        );
        assert_eq!(refs[0].img_tag, r#"<img src="/files/a.png" />"#);
        assert!(refs[0].has_link());
    }

    #[test]
    fn test_style_wins_over_attribute() {
        let refs = scan(r#"<img width="10" src="/a.png" style="width: 40px; height:20px">"#);
        assert_eq!(refs[0].width, Some(Dimension::Pixels(40)));
        assert_eq!(refs[0].height, Some(Dimension::Pixels(20)));
    }

    #[test]
    fn test_percentage_detected() {
        let refs = scan(r#"<img src="/a.png" style="width:50%" height="30">"#);
        assert_eq!(refs[0].width, Some(Dimension::Percent(50)));
        assert!(refs[0].uses_percentage());
    }

    #[test]
    fn test_ignores_prefixed_properties() {
        let refs = scan(r#"<img src="/a.png" style="max-width:300px" data-height="9">"#);
        assert_eq!(refs[0].width, None);
        assert_eq!(refs[0].height, None);
    }

    #[test]
    fn test_query_string_split() {
        let refs = scan(r#"<img src="/files/a.png?itok=abc">"#);
        assert_eq!(refs[0].src, "/files/a.png");
        assert_eq!(refs[0].src_query.as_deref(), Some("itok=abc"));
    }

    #[test]
    fn test_malformed_tags_are_skipped() {
        let text = r#"<img alt="no src"> <img src='/single.png'> <img src="" > <IMG SRC="/ok.gif">"#;
        let refs = scan(text);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].src, "/ok.gif");
    }

    #[test]
    fn test_references_restart() {
        let text = r#"<img src="/a.png"><img src="/b.png">"#;
        let scanner = MarkupScanner::new(text);
        let first: Vec<_> = scanner.references().map(|r| r.src).collect();
        let second: Vec<_> = scanner.references().map(|r| r.src).collect();
        assert_eq!(first, vec!["/a.png", "/b.png"]);
        assert_eq!(first, second);
    }
}
