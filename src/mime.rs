//! Hand-built MIME multipart/mixed message composition.
//!
//! Output is deterministic byte-for-byte for a fixed Date: headers are
//! written in a fixed order, the multipart boundary is a fixed token, and
//! every encoder below is line-stable. BCC addresses never reach any header
//! field; they live only in the delivery envelope.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};

/// Multipart boundary token. Fixed so composed output is reproducible.
pub const BOUNDARY: &str = "BOUNDARY";

/// Maximum content chars per quoted-printable line, excluding the
/// soft-break `=`.
const QP_MAX_LINE: usize = 75;

/// Encoded chars per base64 line.
const BASE64_LINE: usize = 76;

/// A fully rendered message for one (document, rule) pair. Ephemeral:
/// produced by the renderer, consumed by composition and delivery.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment: Vec<u8>,
    /// To header + envelope recipients.
    pub recipients: Vec<String>,
    /// Envelope-only recipients.
    pub bcc: Vec<String>,
}

/// Quoted-printable encode body text (RFC 2045). Existing line breaks pass
/// through as hard CRLF breaks; lines are soft-wrapped with `=` before they
/// exceed 76 characters; whitespace at a line end is escaped.
pub fn quoted_printable(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut line_len = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];

        if b == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
            out.push_str("\r\n");
            line_len = 0;
            i += 2;
            continue;
        }
        if b == b'\n' {
            out.push_str("\r\n");
            line_len = 0;
            i += 1;
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let at_line_end = match next {
            None | Some(b'\n') => true,
            Some(b'\r') => bytes.get(i + 2) == Some(&b'\n'),
            _ => false,
        };
        let literal = ((33..=126).contains(&b) && b != b'=')
            || ((b == b' ' || b == b'\t') && !at_line_end);

        if literal {
            if line_len + 1 > QP_MAX_LINE {
                out.push_str("=\r\n");
                line_len = 0;
            }
            out.push(b as char);
            line_len += 1;
        } else {
            if line_len + 3 > QP_MAX_LINE {
                out.push_str("=\r\n");
                line_len = 0;
            }
            push_hex(&mut out, b);
            line_len += 3;
        }
        i += 1;
    }
    out
}

/// Header-safe quoted-printable: like [`quoted_printable`] but with no hard
/// breaks, and with space, `?`, `_` and `=` always escaped so the result can
/// be embedded in RFC 2047 encoded words and decoded losslessly.
pub fn quoted_printable_header(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut line_len = 0usize;
    for &b in input.as_bytes() {
        let literal = (33..=126).contains(&b) && b != b'=' && b != b'?' && b != b'_';
        let width = if literal { 1 } else { 3 };
        if line_len + width > QP_MAX_LINE {
            out.push_str("=\r\n");
            line_len = 0;
        }
        if literal {
            out.push(b as char);
        } else {
            push_hex(&mut out, b);
        }
        line_len += width;
    }
    out
}

fn push_hex(out: &mut String, b: u8) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    out.push('=');
    out.push(HEX[(b >> 4) as usize] as char);
    out.push(HEX[(b & 0x0F) as usize] as char);
}

/// Encode a Subject value as RFC 2047 encoded words. A subject whose
/// quoted-printable form soft-wraps becomes consecutive encoded-word atoms
/// folded with CRLF + space; adjacent encoded words decode with the folding
/// whitespace removed, so the original text survives losslessly.
pub fn encode_subject(subject: &str) -> String {
    quoted_printable_header(subject)
        .split("=\r\n")
        .map(|chunk| format!("=?UTF-8?Q?{chunk}?="))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

/// Re-wrap raw base64 output with a CRLF after every 76 encoded characters.
/// This is a second pass over the encoder's output, independent of any
/// encoder-internal chunking.
pub fn wrap_base64(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len() + encoded.len() / (BASE64_LINE / 2));
    for (i, ch) in encoded.chars().enumerate() {
        out.push(ch);
        if (i + 1) % BASE64_LINE == 0 {
            out.push_str("\r\n");
        }
    }
    out
}

/// Build the complete multipart/mixed message: fixed-order headers, a
/// quoted-printable HTML part and a base64 PDF attachment part under the
/// fixed boundary. `date` is injected so composition stays reproducible.
pub fn compose(sender: &str, message: &RenderedMessage, date: DateTime<Utc>) -> Vec<u8> {
    let mut buf = String::new();

    // Header block, deterministic order. The BCC list is deliberately not
    // consulted here; it is envelope-only.
    buf.push_str(&format!("From: {sender}\r\n"));
    buf.push_str(&format!("To: {}\r\n", message.recipients.join(",")));
    buf.push_str(&format!("Subject: {}\r\n", encode_subject(&message.subject)));
    buf.push_str("MIME-Version: 1.0\r\n");
    buf.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{BOUNDARY}\"\r\n"
    ));
    buf.push_str(&format!("Date: {}\r\n", date.to_rfc2822()));

    // Body part
    buf.push_str(&format!("\r\n--{BOUNDARY}\r\n"));
    buf.push_str("Content-Type: text/html; charset=UTF-8\r\n");
    buf.push_str("Content-Transfer-Encoding: quoted-printable\r\n\r\n");
    buf.push_str(&quoted_printable(&message.body));

    // Attachment part
    buf.push_str(&format!("\r\n--{BOUNDARY}\r\n"));
    buf.push_str(&format!(
        "Content-Type: application/pdf; name=\"{}\"\r\n",
        message.attachment_name
    ));
    buf.push_str("Content-Transfer-Encoding: base64\r\n");
    buf.push_str(&format!(
        "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
        message.attachment_name
    ));
    buf.push_str(&wrap_base64(&BASE64.encode(&message.attachment)));

    buf.push_str(&format!("\r\n--{BOUNDARY}--"));

    buf.into_bytes()
}
