//! HTML escaping for a response charset
//!
//! The five HTML-significant characters are always encoded. Characters the
//! charset cannot represent become numeric character references, so the
//! output stays valid in whatever encoding the response declares.

/// Character sets the escaper knows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    /// ISO-8859-1
    Latin1,
    /// US-ASCII
    Ascii,
}

impl Charset {
    /// Look a charset up by its IANA name or a common alias
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Some(Charset::Utf8),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" => Some(Charset::Latin1),
            "US-ASCII" | "ASCII" => Some(Charset::Ascii),
            _ => None,
        }
    }

    /// Highest code point the charset can carry as-is
    fn max_code_point(self) -> u32 {
        match self {
            Charset::Utf8 => u32::MAX,
            Charset::Latin1 => 0xFF,
            Charset::Ascii => 0x7F,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Ascii => "US-ASCII",
        }
    }
}

/// Encode `text` for use in HTML text and quoted attributes
pub fn escape_html(text: &str, charset: Charset) -> String {
    let limit = charset.max_code_point();
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '&' => out.push_str("&amp;"),
            c if (c as u32) > limit => out.push_str(&format!("&#{};", c as u32)),
            c => out.push(c),
        }
    }
    out
}
