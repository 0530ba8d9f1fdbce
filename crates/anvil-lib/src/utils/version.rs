//! Ordering for Minecraft and loader version strings.
//!
//! Releases compare numerically with missing components read as zero, so
//! `1.21` and `1.21.0` are the same version. Anything after the first `-` or
//! space is a pre-release tag and sorts below the plain release. Weekly
//! snapshots (`23w31a`) have no release to anchor to and only order loosely.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    Number(u64),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Version {
    release: Vec<Segment>,
    tag: Option<Vec<Segment>>,
}

impl Version {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match text.find(['-', ' ']) {
            Some(idx) => Self {
                release: segments(&text[..idx]),
                tag: Some(segments(&text[idx + 1..])),
            },
            None => Self {
                release: segments(text),
                tag: None,
            },
        }
    }

    pub fn is_prerelease(&self) -> bool {
        self.tag.is_some()
    }
}

/// Splits on separators and on digit/letter boundaries: `pre10` is `pre`, `10`.
fn segments(text: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut numeric = false;
    for c in text.chars() {
        if matches!(c, '.' | '-' | '_' | '+' | ' ') {
            flush(&mut buf, numeric, &mut out);
            continue;
        }
        let digit = c.is_ascii_digit();
        if !buf.is_empty() && digit != numeric {
            flush(&mut buf, numeric, &mut out);
        }
        numeric = digit;
        buf.push(c);
    }
    flush(&mut buf, numeric, &mut out);
    out
}

fn flush(buf: &mut String, numeric: bool, out: &mut Vec<Segment>) {
    if buf.is_empty() {
        return;
    }
    let segment = match (numeric, buf.parse::<u64>()) {
        (true, Ok(n)) => Segment::Number(n),
        _ => Segment::Text(buf.to_ascii_lowercase()),
    };
    out.push(segment);
    buf.clear();
}

fn compare_padded(a: &[Segment], b: &[Segment]) -> Ordering {
    let zero = Segment::Number(0);
    (0..a.len().max(b.len()))
        .map(|i| a.get(i).unwrap_or(&zero).cmp(b.get(i).unwrap_or(&zero)))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_padded(&self.release, &other.release).then_with(|| match (&self.tag, &other.tag) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => compare_padded(a, b),
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    Version::parse(a).cmp(&Version::parse(b))
}

/// `true` when `version >= minimum`.
pub fn is_at_least(version: &str, minimum: &str) -> bool {
    compare_versions(version, minimum) != Ordering::Less
}
