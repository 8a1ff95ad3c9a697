//! Minimal tag and attribute extraction for build manifests and coverage
//! reports (pom.xml, JaCoCo HTML, Cobertura XML).

/// Content of the first `<tag>` element in `xml`, trimmed and unescaped.
///
/// The tag name must match exactly, so `<version>` never matches
/// `<versionRange>`.
pub fn tag_content(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search_from = 0;
    while let Some(rel_pos) = xml[search_from..].find(&open) {
        let start_pos = search_from + rel_pos;
        let after_open = &xml[start_pos + open.len()..];
        if let Some(ch) = after_open.chars().next() {
            if ch != '>' && !ch.is_ascii_whitespace() {
                search_from = start_pos + open.len();
                continue;
            }
        }
        let content_start = after_open.find('>')? + 1;
        let content = &after_open[content_start..];
        let end_pos = content.find(&close)?;
        return Some(unescape(content[..end_pos].trim()));
    }
    None
}

/// Bodies of every `<tag>...</tag>` block, in document order.
pub fn blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(pos) = rest.find(&open) {
        let after = &rest[pos + open.len()..];
        match after.chars().next() {
            Some('>') | Some(' ') | Some('\t') | Some('\n') | Some('\r') => {}
            _ => {
                rest = after;
                continue;
            }
        }
        let Some(body_start) = after.find('>') else {
            break;
        };
        let body = &after[body_start + 1..];
        let Some(end) = body.find(&close) else {
            break;
        };
        out.push(&body[..end]);
        rest = &body[end + close.len()..];
    }
    out
}

/// Value of `attr` inside the opening tag of the first `<tag ...>`.
pub fn attribute(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let start_pos = xml.find(&open)?;
    let after_tag = &xml[start_pos + open.len()..];
    let tag_end = after_tag.find('>')?;
    attr_from_fragment(&after_tag[..tag_end], attr)
}

fn attr_from_fragment(s: &str, attr: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let pattern = format!(" {}={}", attr, quote);
        let padded = format!(" {}", s);
        if let Some(pos) = padded.find(&pattern) {
            let after = &padded[pos + pattern.len()..];
            let end = after.find(quote)?;
            return Some(after[..end].to_string());
        }
    }
    None
}

/// Strip every `<...>` tag, leaving text content.
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    unescape(out.trim())
}

/// Unescape standard XML entities.
pub fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
