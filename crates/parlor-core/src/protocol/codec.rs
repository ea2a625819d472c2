//! Line codec for session envelopes.
//!
//! Wire format (one envelope per line):
//! ```text
//! <version>:<KIND>:<sender>:<payload>\n
//! ```
//! The payload is everything after the third `:` and may itself contain
//! colons.  To keep the encoding total, `%`, CR and LF are percent-escaped in
//! every field, and `:` is additionally escaped in the kind and sender fields.

use thiserror::Error;

use crate::protocol::messages::{Envelope, MessageKind, PROTOCOL_VERSION};

/// Errors that can occur while decoding a wire line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line contained nothing but whitespace.
    #[error("empty line")]
    Empty,

    /// A required `:`-separated field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The leading version token is not one this build speaks.
    #[error("unsupported protocol version: {0:?}")]
    UnsupportedVersion(String),

    /// The sender or peer name is empty.
    #[error("empty name field")]
    EmptyName,

    /// A `%` was not followed by a recognised two-character escape.
    #[error("invalid escape sequence in {0:?}")]
    InvalidEscape(String),

    /// A numeric field did not parse.
    #[error("invalid number in field {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// A discovery line started with an unrecognised tag.
    #[error("unknown discovery tag: {0:?}")]
    UnknownTag(String),

    /// A JSON line could not be parsed or produced.
    #[error("malformed JSON line: {0}")]
    Json(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`Envelope`] into a single newline-terminated line.
///
/// # Errors
///
/// Returns [`ProtocolError::EmptyName`] if the sender is empty, and
/// [`ProtocolError::MissingField`] for an empty unknown kind token; neither
/// could be decoded on the other side.
///
/// # Examples
///
/// ```rust
/// use parlor_core::protocol::{decode_envelope, encode_envelope, Envelope};
///
/// let env = Envelope::chat("ana", "hi: there");
/// let line = encode_envelope(&env).unwrap();
/// assert_eq!(line, "1:CHAT:ana:hi: there\n");
/// assert_eq!(decode_envelope(&line).unwrap(), env);
/// ```
pub fn encode_envelope(envelope: &Envelope) -> Result<String, ProtocolError> {
    if envelope.sender().is_empty() {
        return Err(ProtocolError::EmptyName);
    }
    let kind = envelope.kind().as_wire();
    if kind.is_empty() {
        return Err(ProtocolError::MissingField("kind"));
    }

    let mut line = String::with_capacity(
        kind.len() + envelope.sender().len() + envelope.payload().len() + 8,
    );
    line.push_str(&PROTOCOL_VERSION.to_string());
    line.push(':');
    line.push_str(&escape_token(kind));
    line.push(':');
    line.push_str(&escape_token(envelope.sender()));
    line.push(':');
    line.push_str(&escape_text(envelope.payload()));
    line.push('\n');
    Ok(line)
}

/// Decodes one envelope from a single line.
///
/// A trailing `\n` (or `\r\n`) is tolerated.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the line is not a well-formed envelope.  An
/// unrecognised kind is **not** an error; it decodes as
/// [`MessageKind::Unknown`].
pub fn decode_envelope(line: &str) -> Result<Envelope, ProtocolError> {
    let line = strip_line_ending(line);
    if line.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }

    let mut fields = line.splitn(4, ':');
    let version = fields.next().ok_or(ProtocolError::MissingField("version"))?;
    let kind = fields.next().ok_or(ProtocolError::MissingField("kind"))?;
    let sender = fields.next().ok_or(ProtocolError::MissingField("sender"))?;
    let payload = fields.next().ok_or(ProtocolError::MissingField("payload"))?;

    if version.parse::<u8>().ok() != Some(PROTOCOL_VERSION) {
        return Err(ProtocolError::UnsupportedVersion(version.to_string()));
    }

    let kind = unescape(kind)?;
    if kind.is_empty() {
        return Err(ProtocolError::MissingField("kind"));
    }
    let sender = unescape(sender)?;
    if sender.is_empty() {
        return Err(ProtocolError::EmptyName);
    }

    Ok(Envelope::new(
        MessageKind::from_wire(&kind),
        sender,
        unescape(payload)?,
    ))
}

// ── Field escaping (shared with the discovery codec) ─────────────────────────

/// Escapes a field that sits between `:` delimiters.
pub(crate) fn escape_token(raw: &str) -> String {
    escape(raw, true)
}

/// Escapes a trailing free-text field, which may keep its colons.
pub(crate) fn escape_text(raw: &str) -> String {
    escape(raw, false)
}

fn escape(raw: &str, colons: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            ':' if colons => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`escape_token`] / [`escape_text`].
pub(crate) fn unescape(field: &str) -> Result<String, ProtocolError> {
    if !field.contains('%') {
        return Ok(field.to_string());
    }

    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let code = rest
            .get(idx + 1..idx + 3)
            .ok_or_else(|| ProtocolError::InvalidEscape(field.to_string()))?;
        out.push(match code {
            "25" => '%',
            "3A" | "3a" => ':',
            "0A" | "0a" => '\n',
            "0D" | "0d" => '\r',
            _ => return Err(ProtocolError::InvalidEscape(field.to_string())),
        });
        rest = &rest[idx + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

pub(crate) fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::MovePayload;

    #[test]
    fn test_encode_move_uses_documented_layout() {
        // Arrange
        let env = Envelope::game_move(
            "ana",
            MovePayload {
                player_id: 1,
                piece_id: 2,
                die: 6,
            },
        );

        // Act
        let line = encode_envelope(&env).unwrap();

        // Assert
        assert_eq!(line, "1:MOVE:ana:player:1,piece:2,die:6\n");
    }

    #[test]
    fn test_encode_rejects_empty_sender() {
        let env = Envelope::chat("", "hi");
        assert_eq!(encode_envelope(&env), Err(ProtocolError::EmptyName));
    }

    #[test]
    fn test_sender_with_colon_survives_round_trip() {
        let env = Envelope::greeting("host:alpha");
        let line = encode_envelope(&env).unwrap();
        assert_eq!(line, "1:GREETING:host%3Aalpha:\n");
        assert_eq!(decode_envelope(&line).unwrap(), env);
    }

    #[test]
    fn test_chat_with_newline_and_percent_stays_on_one_line() {
        let env = Envelope::chat("ana", "100%\nsure\r");
        let line = encode_envelope(&env).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode_envelope(&line).unwrap(), env);
    }

    #[test]
    fn test_decode_accepts_crlf_line_ending() {
        let env = decode_envelope("1:DICE_ROLL:bo:4\r\n").unwrap();
        assert_eq!(env, Envelope::dice_roll("bo", 4));
    }

    #[test]
    fn test_decode_unknown_kind_is_not_an_error() {
        let env = decode_envelope("1:EMOTE:bo:wave\n").unwrap();
        assert_eq!(env.kind(), &MessageKind::Unknown("EMOTE".to_string()));
        assert_eq!(env.payload(), "wave");
    }

    #[test]
    fn test_unknown_kind_re_encodes_verbatim() {
        let line = "1:EMOTE:bo:wave\n";
        let env = decode_envelope(line).unwrap();
        assert_eq!(encode_envelope(&env).unwrap(), line);
    }

    #[test]
    fn test_decode_rejects_empty_line() {
        assert_eq!(decode_envelope("\n"), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_decode_rejects_missing_payload_field() {
        assert_eq!(
            decode_envelope("1:CHAT:ana"),
            Err(ProtocolError::MissingField("payload"))
        );
    }

    #[test]
    fn test_decode_rejects_future_version() {
        assert_eq!(
            decode_envelope("2:CHAT:ana:hi"),
            Err(ProtocolError::UnsupportedVersion("2".to_string()))
        );
    }

    #[test]
    fn test_decode_rejects_empty_sender() {
        assert_eq!(decode_envelope("1:CHAT::hi"), Err(ProtocolError::EmptyName));
    }

    #[test]
    fn test_decode_rejects_dangling_percent() {
        assert!(matches!(
            decode_envelope("1:CHAT:ana:50%"),
            Err(ProtocolError::InvalidEscape(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_escape_code() {
        assert!(matches!(
            decode_envelope("1:CHAT:ana:%41"),
            Err(ProtocolError::InvalidEscape(_))
        ));
    }

    #[test]
    fn test_decode_keeps_malformed_move_payload_as_text() {
        // Payload grammar is checked later, not by the codec.
        let env = decode_envelope("1:MOVE:ana:player:abc\n").unwrap();
        assert_eq!(env.kind(), &MessageKind::Move);
        assert_eq!(env.payload(), "player:abc");
    }
}
