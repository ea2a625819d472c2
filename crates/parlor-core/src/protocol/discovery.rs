//! LAN discovery messages.
//!
//! Two families share one text grammar (`:`-separated, names escaped like
//! envelope senders):
//!
//! ```text
//! PING:<name>:<p2pPort>:<timestamp>               subnet scan probe (TCP line)
//! PONG:<name>:<p2pPort>:<timestamp>               subnet scan reply
//! SEARCH:<name>:<listenPort>[:<p2pPort>:<timestamp>]   broadcast probe (UDP)
//! AVAILABLE:<name>:<p2pPort>[:<timestamp>]        broadcast reply
//! ```
//!
//! Timestamps are milliseconds since the Unix epoch at which the sender's
//! discovery session was created.

use std::fmt;
use std::str::FromStr;

use crate::protocol::codec::{escape_token, strip_line_ending, unescape, ProtocolError};

/// Identity a searcher may attach to a SEARCH so listeners can record it too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Advertisement {
    pub p2p_port: u16,
    pub timestamp: u64,
}

/// One discovery datagram or line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    Ping {
        name: String,
        p2p_port: u16,
        timestamp: u64,
    },
    Pong {
        name: String,
        p2p_port: u16,
        timestamp: u64,
    },
    Search {
        name: String,
        /// UDP port the searcher receives AVAILABLE replies on.
        listen_port: u16,
        advert: Option<Advertisement>,
    },
    Available {
        name: String,
        p2p_port: u16,
        timestamp: Option<u64>,
    },
}

impl DiscoveryMessage {
    /// Display name of the peer that produced this message.
    pub fn name(&self) -> &str {
        match self {
            DiscoveryMessage::Ping { name, .. }
            | DiscoveryMessage::Pong { name, .. }
            | DiscoveryMessage::Search { name, .. }
            | DiscoveryMessage::Available { name, .. } => name,
        }
    }

    /// Encodes the message without a line terminator.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decodes one message; a trailing `\n` or `\r\n` is tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for unknown tags, wrong field counts, bad
    /// numbers, or an empty name.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        line.parse()
    }
}

impl fmt::Display for DiscoveryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryMessage::Ping {
                name,
                p2p_port,
                timestamp,
            } => write!(f, "PING:{}:{p2p_port}:{timestamp}", escape_token(name)),
            DiscoveryMessage::Pong {
                name,
                p2p_port,
                timestamp,
            } => write!(f, "PONG:{}:{p2p_port}:{timestamp}", escape_token(name)),
            DiscoveryMessage::Search {
                name,
                listen_port,
                advert,
            } => {
                write!(f, "SEARCH:{}:{listen_port}", escape_token(name))?;
                if let Some(a) = advert {
                    write!(f, ":{}:{}", a.p2p_port, a.timestamp)?;
                }
                Ok(())
            }
            DiscoveryMessage::Available {
                name,
                p2p_port,
                timestamp,
            } => {
                write!(f, "AVAILABLE:{}:{p2p_port}", escape_token(name))?;
                if let Some(ts) = timestamp {
                    write!(f, ":{ts}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for DiscoveryMessage {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = strip_line_ending(line);
        if line.trim().is_empty() {
            return Err(ProtocolError::Empty);
        }

        let fields: Vec<&str> = line.split(':').collect();
        let tag = fields[0];
        let name = match fields.get(1) {
            Some(raw) => unescape(raw)?,
            None => return Err(ProtocolError::MissingField("name")),
        };
        if name.is_empty() {
            return Err(ProtocolError::EmptyName);
        }

        match (tag, fields.len()) {
            ("PING", 4) => Ok(DiscoveryMessage::Ping {
                name,
                p2p_port: number("p2pPort", fields[2])?,
                timestamp: number("timestamp", fields[3])?,
            }),
            ("PONG", 4) => Ok(DiscoveryMessage::Pong {
                name,
                p2p_port: number("p2pPort", fields[2])?,
                timestamp: number("timestamp", fields[3])?,
            }),
            ("SEARCH", 3) => Ok(DiscoveryMessage::Search {
                name,
                listen_port: number("listenPort", fields[2])?,
                advert: None,
            }),
            ("SEARCH", 5) => Ok(DiscoveryMessage::Search {
                name,
                listen_port: number("listenPort", fields[2])?,
                advert: Some(Advertisement {
                    p2p_port: number("p2pPort", fields[3])?,
                    timestamp: number("timestamp", fields[4])?,
                }),
            }),
            ("AVAILABLE", 3) => Ok(DiscoveryMessage::Available {
                name,
                p2p_port: number("p2pPort", fields[2])?,
                timestamp: None,
            }),
            ("AVAILABLE", 4) => Ok(DiscoveryMessage::Available {
                name,
                p2p_port: number("p2pPort", fields[2])?,
                timestamp: Some(number("timestamp", fields[3])?),
            }),
            ("PING" | "PONG" | "SEARCH" | "AVAILABLE", _) => {
                Err(ProtocolError::MissingField("discovery field"))
            }
            (other, _) => Err(ProtocolError::UnknownTag(other.to_string())),
        }
    }
}

fn number<T: FromStr>(field: &'static str, value: &str) -> Result<T, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_encodes_documented_layout() {
        let msg = DiscoveryMessage::Ping {
            name: "ana".to_string(),
            p2p_port: 5000,
            timestamp: 1_700_000_000_000,
        };
        assert_eq!(msg.encode(), "PING:ana:5000:1700000000000");
    }

    #[test]
    fn test_pong_decodes_with_trailing_newline() {
        let msg = DiscoveryMessage::decode("PONG:bo:5001:42\n").unwrap();
        assert_eq!(
            msg,
            DiscoveryMessage::Pong {
                name: "bo".to_string(),
                p2p_port: 5001,
                timestamp: 42
            }
        );
    }

    #[test]
    fn test_search_without_advert_decodes() {
        let msg = DiscoveryMessage::decode("SEARCH:ana:9999").unwrap();
        assert_eq!(
            msg,
            DiscoveryMessage::Search {
                name: "ana".to_string(),
                listen_port: 9999,
                advert: None
            }
        );
    }

    #[test]
    fn test_search_with_advert_decodes() {
        let msg = DiscoveryMessage::decode("SEARCH:ana:9999:5000:77").unwrap();
        assert!(matches!(
            msg,
            DiscoveryMessage::Search {
                advert: Some(Advertisement {
                    p2p_port: 5000,
                    timestamp: 77
                }),
                ..
            }
        ));
    }

    #[test]
    fn test_available_with_and_without_timestamp() {
        let short = DiscoveryMessage::decode("AVAILABLE:bo:5001").unwrap();
        let long = DiscoveryMessage::decode("AVAILABLE:bo:5001:12").unwrap();
        assert!(matches!(short, DiscoveryMessage::Available { timestamp: None, .. }));
        assert!(matches!(long, DiscoveryMessage::Available { timestamp: Some(12), .. }));
    }

    #[test]
    fn test_name_with_colon_is_escaped() {
        let msg = DiscoveryMessage::Available {
            name: "a:b".to_string(),
            p2p_port: 1,
            timestamp: None,
        };
        let line = msg.encode();
        assert_eq!(line, "AVAILABLE:a%3Ab:1");
        assert_eq!(DiscoveryMessage::decode(&line).unwrap(), msg);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        assert_eq!(
            DiscoveryMessage::decode("HELLO:ana:1"),
            Err(ProtocolError::UnknownTag("HELLO".to_string()))
        );
    }

    #[test]
    fn test_wrong_field_count_is_rejected() {
        assert!(DiscoveryMessage::decode("PING:ana:5000").is_err());
        assert!(DiscoveryMessage::decode("SEARCH:ana:9999:5000").is_err());
    }

    #[test]
    fn test_non_numeric_port_is_rejected() {
        assert!(matches!(
            DiscoveryMessage::decode("PONG:bo:http:1"),
            Err(ProtocolError::InvalidNumber { field: "p2pPort", .. })
        ));
    }

    #[test]
    fn test_empty_name_is_rejected() {
        assert_eq!(
            DiscoveryMessage::decode("PING::5000:1"),
            Err(ProtocolError::EmptyName)
        );
    }
}
