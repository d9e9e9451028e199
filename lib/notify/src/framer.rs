use std::io::{BufRead, BufReader, Read};
use wire::{ServerError, ServerResult};

/// Hard caps on a single command line and a single payload body, per the wire contract.
/// `max_message_length` from the server configuration further restricts the payload cap
/// on top of this (it can only tighten it, never loosen it).
pub const MAX_LINE_LEN: usize = 4 * 1024;
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// One parsed inbound command. Replaces a string-keyed verb lookup with a tagged variant
/// the dispatcher can exhaustively match over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ver { tid: u32, versions: Vec<String> },
    Cvr { tid: u32, fields: Vec<String> },
    UsrAuthI { tid: u32, identity: String },
    UsrAuthS { tid: u32, identity: String, digest: String },
    Syn { tid: u32, last_change: String },
    Chg { tid: u32, state: String, client_id: Option<String>, msn_obj: Option<String> },
    Add { tid: u32, list: String, identity: String, nickname: String },
    Rem { tid: u32, list: String, identity: String },
    Msg { tid: u32, ack: String, payload: Vec<u8> },
    Out,
    Png,
    Xfr { tid: u32 },
    Cal { tid: u32, identity: String },
    Ans { tid: u32 },
    Unknown { verb: String, tid: Option<u32> },
}

/// Reads line-framed commands off a byte stream, transparently absorbing the
/// length-prefixed payload body that follows a `MSG` line.
pub struct Framer<R> {
    reader: BufReader<R>,
    max_payload_len: usize,
}

impl<R: Read> Framer<R> {
    pub fn new(stream: R) -> Framer<R> {
        Framer { reader: BufReader::new(stream), max_payload_len: MAX_PAYLOAD_LEN }
    }

    /// Builds a framer whose `MSG` payload cap is the configured `max_message_length`,
    /// clamped to the wire-level hard cap `MAX_PAYLOAD_LEN`.
    pub fn with_max_payload(stream: R, max_message_length: usize) -> Framer<R> {
        Framer {
            reader: BufReader::new(stream),
            max_payload_len: max_message_length.min(MAX_PAYLOAD_LEN),
        }
    }

    /// Reads the next command, or `Ok(None)` on clean EOF before any bytes of a new line
    /// were read.
    pub fn next_command(&mut self) -> ServerResult<Option<Command>> {
        let line = match self.read_line()? {
            Some(line) => line,
            None => return Ok(None),
        };

        if line.is_empty() {
            return Ok(Some(Command::Unknown { verb: String::new(), tid: None }));
        }

        let tokens: Vec<&str> = line.split(' ').collect();
        let verb = tokens[0];

        Ok(Some(self.parse(verb, &tokens)?))
    }

    fn parse(&mut self, verb: &str, tokens: &[&str]) -> ServerResult<Command> {
        match verb {
            "VER" => {
                let tid = parse_tid(tokens.get(1))?;
                Ok(Command::Ver { tid, versions: tokens[2..].iter().map(|s| s.to_string()).collect() })
            }
            "CVR" => {
                let tid = parse_tid(tokens.get(1))?;
                Ok(Command::Cvr { tid, fields: tokens[2..].iter().map(|s| s.to_string()).collect() })
            }
            "USR" => self.parse_usr(tokens),
            "SYN" => {
                let tid = parse_tid(tokens.get(1))?;
                let last_change = tokens.get(2).unwrap_or(&"0").to_string();
                Ok(Command::Syn { tid, last_change })
            }
            "CHG" => {
                let tid = parse_tid(tokens.get(1))?;
                let state = tokens.get(2).ok_or(ServerError::InvalidParameter)?.to_string();
                let client_id = tokens.get(3).map(|s| s.to_string());
                let msn_obj = tokens.get(4).map(|s| s.to_string());
                Ok(Command::Chg { tid, state, client_id, msn_obj })
            }
            "ADD" => {
                let tid = parse_tid(tokens.get(1))?;
                let list = tokens.get(2).ok_or(ServerError::InvalidParameter)?.to_string();
                let identity = tokens.get(3).ok_or(ServerError::InvalidParameter)?.to_string();
                let nickname = tokens.get(4).unwrap_or(&tokens[3]).to_string();
                Ok(Command::Add { tid, list, identity, nickname })
            }
            "REM" => {
                let tid = parse_tid(tokens.get(1))?;
                let list = tokens.get(2).ok_or(ServerError::InvalidParameter)?.to_string();
                let identity = tokens.get(3).ok_or(ServerError::InvalidParameter)?.to_string();
                Ok(Command::Rem { tid, list, identity })
            }
            "MSG" => self.parse_msg(tokens),
            "OUT" => Ok(Command::Out),
            "PNG" => Ok(Command::Png),
            "XFR" => Ok(Command::Xfr { tid: parse_tid(tokens.get(1))? }),
            "CAL" => {
                let tid = parse_tid(tokens.get(1))?;
                let identity = tokens.get(2).ok_or(ServerError::InvalidParameter)?.to_string();
                Ok(Command::Cal { tid, identity })
            }
            "ANS" => Ok(Command::Ans { tid: parse_tid(tokens.get(1))? }),
            other => Ok(Command::Unknown {
                verb: other.to_string(),
                tid: tokens.get(1).and_then(|t| t.parse().ok()),
            }),
        }
    }

    fn parse_usr(&mut self, tokens: &[&str]) -> ServerResult<Command> {
        let tid = parse_tid(tokens.get(1))?;
        let phase = tokens.get(2).ok_or(ServerError::InvalidParameter)?;

        match *phase {
            "I" => {
                let identity = tokens.get(3).ok_or(ServerError::InvalidParameter)?.to_string();
                Ok(Command::UsrAuthI { tid, identity })
            }
            "S" => {
                let identity = tokens.get(3).ok_or(ServerError::InvalidParameter)?.to_string();
                let digest = tokens.get(4).ok_or(ServerError::InvalidParameter)?.to_string();
                Ok(Command::UsrAuthS { tid, identity, digest })
            }
            _ => Err(ServerError::InvalidParameter),
        }
    }

    fn parse_msg(&mut self, tokens: &[&str]) -> ServerResult<Command> {
        let tid = parse_tid(tokens.get(1))?;
        let ack = tokens.get(2).ok_or(ServerError::InvalidParameter)?.to_string();
        let len: usize = tokens
            .get(3)
            .ok_or(ServerError::InvalidParameter)?
            .parse()
            .map_err(|_| ServerError::InvalidParameter)?;

        if len > self.max_payload_len {
            return Err(ServerError::PayloadTooLong);
        }

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;

        Ok(Command::Msg { tid, ack, payload })
    }

    /// Reads one `\r\n`-terminated line, trimming the terminator. Returns `Ok(None)` at a
    /// clean EOF on a line boundary.
    fn read_line(&mut self) -> ServerResult<Option<String>> {
        let mut buf = Vec::new();
        let read = self.reader.read_until(b'\n', &mut buf)?;

        if read == 0 {
            return Ok(None);
        }

        if buf.len() > MAX_LINE_LEN {
            return Err(ServerError::LineTooLong);
        }

        while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
            buf.pop();
        }

        String::from_utf8(buf).map(Some).map_err(|_| ServerError::Malformed("invalid utf-8".to_string()))
    }
}

fn parse_tid(token: Option<&&str>) -> ServerResult<u32> {
    token
        .ok_or(ServerError::InvalidParameter)?
        .parse()
        .map_err(|_| ServerError::InvalidParameter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_ver_and_out_roundtrip() {
        let input = b"VER 1 MSNP8\r\nOUT\r\n".to_vec();
        let mut framer = Framer::new(Cursor::new(input));

        assert_eq!(
            framer.next_command().unwrap(),
            Some(Command::Ver { tid: 1, versions: vec!["MSNP8".to_string()] })
        );
        assert_eq!(framer.next_command().unwrap(), Some(Command::Out));
        assert_eq!(framer.next_command().unwrap(), None);
    }

    #[test]
    fn parses_msg_with_payload() {
        let input = b"MSG 6 U 5\r\nhello".to_vec();
        let mut framer = Framer::new(Cursor::new(input));

        assert_eq!(
            framer.next_command().unwrap(),
            Some(Command::Msg { tid: 6, ack: "U".to_string(), payload: b"hello".to_vec() })
        );
    }

    #[test]
    fn rejects_oversized_line() {
        let mut input = b"VER 1 ".to_vec();
        input.extend(std::iter::repeat(b'A').take(MAX_LINE_LEN));
        input.extend_from_slice(b"\r\n");
        let mut framer = Framer::new(Cursor::new(input));

        assert!(matches!(framer.next_command(), Err(ServerError::LineTooLong)));
    }
}
