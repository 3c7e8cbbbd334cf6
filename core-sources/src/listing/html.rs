//! Incremental `<a ...>...</a>` extraction from HTML index pages.
//!
//! Bytes are fed in arbitrary chunks. An anchor is yielded as soon as its
//! closing `</a>` is in the buffer; everything before it is discarded, so
//! memory stays bounded by the longest single anchor.

/// Anchor with its raw `href` and rendered label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Anchor {
    pub href: String,
    pub text: String,
}

/// An unterminated anchor longer than this is skipped.
const MAX_PENDING: usize = 64 * 1024;

#[derive(Debug, Default)]
pub(crate) struct AnchorScanner {
    buf: Vec<u8>,
}

impl AnchorScanner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk and collect every anchor it completes.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Anchor> {
        self.buf.extend_from_slice(chunk);
        let mut anchors = Vec::new();

        loop {
            let Some(start) = find_open(&self.buf, 0) else {
                // Keep a tail that could be the start of a split "<a".
                let keep_from = self.buf.len().saturating_sub(2);
                self.buf.drain(..keep_from);
                break;
            };

            let Some(end) = find_close(&self.buf, start) else {
                self.buf.drain(..start);
                if self.buf.len() > MAX_PENDING {
                    self.buf.drain(..2);
                    continue;
                }
                break;
            };

            if let Some(anchor) = parse_anchor(&self.buf[start..end.inner_end], end.text_start) {
                anchors.push(anchor);
            }
            self.buf.drain(..end.tag_end);
        }
        anchors
    }
}

struct AnchorEnd {
    /// Offset of the label, relative to the anchor start
    text_start: usize,
    /// Offset of `</a`
    inner_end: usize,
    /// Offset just past the closing `>`
    tag_end: usize,
}

/// Offset of the next `<a` followed by whitespace or `>`.
fn find_open(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 2 < buf.len() {
        if buf[i] == b'<'
            && buf[i + 1].eq_ignore_ascii_case(&b'a')
            && (buf[i + 2].is_ascii_whitespace() || buf[i + 2] == b'>')
        {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn find_close(buf: &[u8], start: usize) -> Option<AnchorEnd> {
    let open_end = end_of_tag(buf, start)?;
    let mut i = open_end + 1;
    while i + 3 <= buf.len() {
        if buf[i] == b'<' && buf[i + 1] == b'/' && buf[i + 2].eq_ignore_ascii_case(&b'a') {
            // `</abbr>` and friends are not the closing tag.
            match buf.get(i + 3) {
                None => return None,
                Some(b) if *b != b'>' && !b.is_ascii_whitespace() => {
                    i += 1;
                    continue;
                }
                Some(_) => {}
            }
            let gt = buf[i + 3..].iter().position(|&b| b == b'>')? + i + 3;
            return Some(AnchorEnd {
                text_start: open_end + 1 - start,
                inner_end: i,
                tag_end: gt + 1,
            });
        }
        i += 1;
    }
    None
}

/// Offset of the `>` closing the tag opened at `start`, ignoring quoted `>`.
fn end_of_tag(buf: &[u8], start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (offset, &b) in buf[start..].iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(start + offset),
            None => {}
        }
    }
    None
}

fn parse_anchor(raw: &[u8], text_start: usize) -> Option<Anchor> {
    let tag = String::from_utf8_lossy(&raw[2..text_start.saturating_sub(1).max(2)]);
    let href = extract_href(&tag)?;
    let inner = String::from_utf8_lossy(&raw[text_start.min(raw.len())..]);
    Some(Anchor {
        href: decode_entities(&href),
        text: collapse_whitespace(&decode_entities(&strip_tags(&inner))),
    })
}

fn extract_href(attrs: &str) -> Option<String> {
    let lower = attrs.to_ascii_lowercase();
    let mut search = 0;
    while let Some(found) = lower[search..].find("href") {
        let at = search + found;
        search = at + 4;
        let boundary = at == 0 || lower.as_bytes()[at - 1].is_ascii_whitespace();
        if !boundary {
            continue;
        }
        let rest = attrs[at + 4..].trim_start();
        let Some(value) = rest.strip_prefix('=') else {
            continue;
        };
        let value = value.trim_start();
        return Some(match value.chars().next() {
            Some(q @ ('"' | '\'')) => value[1..].split(q).next().unwrap_or("").to_string(),
            _ => value
                .split(|c: char| c.is_whitespace() || c == '>')
                .next()
                .unwrap_or("")
                .to_string(),
        });
    }
    None
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode the named entities index pages use plus numeric references.
pub(crate) fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp..];
        let decoded = after.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let entity = &after[1..semi];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => {
                    let code = if let Some(hex) = entity
                        .strip_prefix("#x")
                        .or_else(|| entity.strip_prefix("#X"))
                    {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        entity.strip_prefix('#').and_then(|dec| dec.parse().ok())
                    };
                    code.and_then(char::from_u32)
                }
            };
            c.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(html: &str, chunk: usize) -> Vec<Anchor> {
        let mut scanner = AnchorScanner::new();
        let mut out = Vec::new();
        for piece in html.as_bytes().chunks(chunk) {
            out.extend(scanner.push(piece));
        }
        out
    }

    #[test]
    fn test_extracts_across_chunk_boundaries() {
        let html = r#"<html><body><A HREF="a%20b.mp3">a b.mp3</A>
            <a class='x' href='sub/'><img src="d.gif"> Sub/ </a><abbr>no</abbr>
            <a href=plain.ogg>plain</a></body></html>"#;

        for chunk in [1, 3, 7, 4096] {
            let anchors = scan_all(html, chunk);
            assert_eq!(
                anchors,
                vec![
                    Anchor {
                        href: "a%20b.mp3".into(),
                        text: "a b.mp3".into()
                    },
                    Anchor {
                        href: "sub/".into(),
                        text: "Sub/".into()
                    },
                    Anchor {
                        href: "plain.ogg".into(),
                        text: "plain".into()
                    },
                ],
                "chunk size {}",
                chunk
            );
        }
    }

    #[test]
    fn test_quoted_gt_and_entities() {
        let anchors = scan_all(
            r#"<a title="a > b" href="x&amp;y.mp3">Tom &amp; Jerry&#39;s &#x263A;</a>"#,
            5,
        );
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].href, "x&y.mp3");
        assert_eq!(anchors[0].text, "Tom & Jerry's \u{263A}");
    }

    #[test]
    fn test_anchor_without_href_is_skipped() {
        assert!(scan_all(r#"<a name="top">Top</a>"#, 64).is_empty());
    }

    #[test]
    fn test_unterminated_anchor_is_bounded() {
        let mut scanner = AnchorScanner::new();
        scanner.push(b"<a href=\"x\">");
        for _ in 0..100 {
            scanner.push(&[b'z'; 1024]);
        }
        assert!(scanner.buf.len() <= MAX_PENDING + 1024);
        let anchors = scanner.push(b"<a href=\"y\">y</a>");
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].href, "y");
    }

    #[test]
    fn test_decode_entities_leaves_unknown() {
        assert_eq!(decode_entities("a &bogus; b & c"), "a &bogus; b & c");
    }
}
