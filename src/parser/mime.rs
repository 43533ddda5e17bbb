//! MIME structure: IMAP-style part numbering, raw section lookup, and
//! content-transfer-encoding decoding.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use mail_parser::{MessageParser, MimeHeaders, PartType};
use tracing::warn;

use crate::parser::header::{decode_base64_lenient, hex_byte};

/// Maximum depth for recursive multipart descent (to prevent stack overflow on adversarial input).
const MAX_DEPTH: usize = 10;

/// An IMAP body section number such as `1` or `1.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartPath(Vec<u32>);

impl PartPath {
    /// Section `1`: the whole body of a single-part message, or the first
    /// child of a multipart one.
    pub fn top() -> Self {
        Self(vec![1])
    }

    /// The `n`-th (1-based) child of this section.
    pub fn child(&self, n: u32) -> Self {
        let mut segments = self.0.clone();
        segments.push(n);
        Self(segments)
    }

    /// Section number of the `i`-th (0-based) child of a multipart root.
    fn top_level(i: usize) -> Self {
        Self(vec![u32::try_from(i + 1).unwrap_or(u32::MAX)])
    }

    pub fn segments(&self) -> &[u32] {
        &self.0
    }
}

impl fmt::Display for PartPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl FromStr for PartPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = s
            .split('.')
            .map(|seg| match seg.parse::<u32>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(format!("invalid section number '{s}'")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(segments))
    }
}

/// Declared `Content-Transfer-Encoding` of a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
    UuEncode,
    /// Unknown encodings pass through unchanged.
    Other(String),
}

impl TransferEncoding {
    /// Parse a header value. A missing header means `7bit`.
    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::SevenBit;
        };
        match value.trim().to_lowercase().as_str() {
            "" | "7bit" => Self::SevenBit,
            "8bit" => Self::EightBit,
            "binary" => Self::Binary,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "x-uuencode" | "uuencode" | "x-uue" => Self::UuEncode,
            other => Self::Other(other.to_string()),
        }
    }

    /// Decode raw section bytes. Malformed input is returned unchanged.
    pub fn decode(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::SevenBit | Self::EightBit | Self::Binary | Self::Other(_) => data.to_vec(),
            Self::Base64 => {
                let text = String::from_utf8_lossy(data);
                decode_base64_lenient(&text).unwrap_or_else(|| {
                    warn!("Invalid base64 body, passing through");
                    data.to_vec()
                })
            }
            Self::QuotedPrintable => decode_quoted_printable(data),
            Self::UuEncode => decode_uuencode(data).unwrap_or_else(|| data.to_vec()),
        }
    }
}

/// One node of a message's MIME tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PartInfo {
    pub path: PartPath,
    /// Lowercase `type/subtype`, e.g. `text/html` or `multipart/alternative`.
    pub content_type: String,
    pub charset: Option<String>,
    pub encoding: TransferEncoding,
}

/// Flattened MIME tree in depth-first order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyStructure {
    pub parts: Vec<PartInfo>,
}

impl BodyStructure {
    /// First part (depth-first) with the given content type.
    pub fn find(&self, content_type: &str) -> Option<&PartInfo> {
        self.parts
            .iter()
            .find(|p| p.content_type.eq_ignore_ascii_case(content_type))
    }

    /// The part at `path`, if it exists.
    pub fn get(&self, path: &PartPath) -> Option<&PartInfo> {
        self.parts.iter().find(|p| &p.path == path)
    }

    /// Sections to read when the wanted part is missing or empty: the
    /// `text/*` leaves inside section `1` when it is a container, then
    /// section `1` itself.
    pub fn fallback_sections(&self) -> Vec<PartPath> {
        let top = PartPath::top();
        let mut sections = Vec::new();
        if self
            .get(&top)
            .is_some_and(|p| p.content_type.starts_with("multipart/"))
        {
            sections.extend(
                self.parts
                    .iter()
                    .filter(|p| {
                        p.path.segments().len() > 1
                            && p.path.segments().starts_with(top.segments())
                            && p.content_type.starts_with("text/")
                    })
                    .map(|p| p.path.clone()),
            );
        }
        sections.push(top);
        sections
    }
}

/// A parsed message: its structure plus the byte range of every section body.
#[derive(Debug, Clone)]
pub struct MimeIndex {
    structure: BodyStructure,
    ranges: Vec<Range<usize>>,
}

impl MimeIndex {
    /// Parse a complete raw message (headers + body).
    ///
    /// Returns `None` if `mail-parser` cannot make sense of the input.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let message = MessageParser::default().parse(raw)?;
        let mut index = MimeIndex {
            structure: BodyStructure::default(),
            ranges: Vec::new(),
        };

        let root = message.parts.first()?;
        match &root.body {
            PartType::Multipart(children) => {
                for (i, child) in children.iter().enumerate() {
                    index.walk(&message, *child, PartPath::top_level(i), 1, raw.len());
                }
            }
            _ => index.walk(&message, 0, PartPath::top(), 1, raw.len()),
        }

        Some(index)
    }

    pub fn structure(&self) -> &BodyStructure {
        &self.structure
    }

    /// Raw (still transfer-encoded) bytes of the section at `path`.
    pub fn section<'a>(&self, raw: &'a [u8], path: &PartPath) -> Option<&'a [u8]> {
        let pos = self.structure.parts.iter().position(|p| &p.path == path)?;
        raw.get(self.ranges[pos].clone())
    }

    fn walk(
        &mut self,
        message: &mail_parser::Message<'_>,
        part_id: usize,
        path: PartPath,
        depth: usize,
        raw_len: usize,
    ) {
        let Some(part) = message.parts.get(part_id) else {
            return;
        };

        let content_type = part
            .content_type()
            .map(|ct| {
                let main = ct.ctype();
                match ct.subtype() {
                    Some(sub) => format!("{main}/{sub}"),
                    None => main.to_string(),
                }
            })
            .unwrap_or_else(|| "text/plain".to_string())
            .to_lowercase();

        let charset = part
            .content_type()
            .and_then(|ct| ct.attribute("charset"))
            .map(str::to_string);

        let start = (part.offset_body as usize).min(raw_len);
        let end = (part.offset_end as usize).clamp(start, raw_len);

        self.structure.parts.push(PartInfo {
            path: path.clone(),
            content_type,
            charset,
            encoding: TransferEncoding::parse(part.content_transfer_encoding()),
        });
        self.ranges.push(start..end);

        if let PartType::Multipart(children) = &part.body {
            if depth >= MAX_DEPTH {
                warn!(path = %path, "Multipart nesting too deep, not descending");
                return;
            }
            for (i, child) in children.iter().enumerate() {
                let n = u32::try_from(i + 1).unwrap_or(u32::MAX);
                self.walk(message, *child, path.child(n), depth + 1, raw_len);
            }
        }
    }
}

/// Decode quoted-printable (RFC 2045): soft line breaks and `=XX` escapes.
fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] != b'=' {
            result.push(data[i]);
            i += 1;
            continue;
        }
        // Soft line break: "=\r\n" or "=\n"
        if data.get(i + 1) == Some(&b'\r') && data.get(i + 2) == Some(&b'\n') {
            i += 3;
        } else if data.get(i + 1) == Some(&b'\n') {
            i += 2;
        } else if let Some(byte) = data
            .get(i + 1)
            .zip(data.get(i + 2))
            .and_then(|(hi, lo)| hex_byte(*hi, *lo))
        {
            result.push(byte);
            i += 3;
        } else {
            result.push(b'=');
            i += 1;
        }
    }
    result
}

/// Decode a uuencoded block (`begin … end`). Returns `None` without a `begin` line.
fn decode_uuencode(data: &[u8]) -> Option<Vec<u8>> {
    let text = String::from_utf8_lossy(data);
    let mut lines = text.lines().skip_while(|l| !l.starts_with("begin "));
    lines.next()?;

    let mut result = Vec::new();
    for line in lines {
        if line.trim_end() == "end" {
            break;
        }
        let bytes = line.as_bytes();
        let Some(&len_char) = bytes.first() else {
            continue;
        };
        let expected = usize::from(len_char.wrapping_sub(b' ') & 0x3F);
        if expected == 0 {
            continue;
        }

        let mut decoded = Vec::with_capacity(expected + 2);
        for chunk in bytes[1..].chunks(4) {
            let mut v = [0u8; 4];
            for (slot, c) in v.iter_mut().zip(chunk) {
                *slot = c.wrapping_sub(b' ') & 0x3F;
            }
            decoded.push((v[0] << 2) | (v[1] >> 4));
            decoded.push((v[1] << 4) | (v[2] >> 2));
            decoded.push((v[2] << 6) | v[3]);
        }
        decoded.truncate(expected);
        result.extend_from_slice(&decoded);
    }
    Some(result)
}
