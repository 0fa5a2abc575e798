//! LAN chat wire protocol: control tags, chat payloads and local commands.

/// Prefix shared by every control payload.
pub const CONTROL_PREFIX: &str = "auth: ";
/// Solicit: "can I reach you / can you reach me".
pub const AUTH_CAN: &str = "auth: CAN";
/// Confirm: "yes, I can".
pub const AUTH_OFC: &str = "auth: OFC";

/// Local command that ends the chat loop.
pub const CMD_END: &str = "am-end";
/// Local command that runs one discovery round.
pub const CMD_FIND: &str = "am-find";

/// Longest display name accepted.
pub const MAX_NAME_LEN: usize = 10;

/// One decoded frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Discovery request, sent to a broadcast or multicast target.
    Solicit,
    /// Discovery answer, sent back to the solicitor.
    Confirm,
    /// Chat line, `"<name>: <text>"`, carried verbatim.
    Chat(String),
}

impl Message {
    /// Classify a payload. Control tags are matched by prefix.
    pub fn parse(payload: &[u8]) -> Result<Message, ProtocolError> {
        if payload.starts_with(AUTH_CAN.as_bytes()) {
            return Ok(Message::Solicit);
        }
        if payload.starts_with(AUTH_OFC.as_bytes()) {
            return Ok(Message::Confirm);
        }
        if payload.starts_with(CONTROL_PREFIX.as_bytes()) {
            return Err(ProtocolError::UnknownControl(
                String::from_utf8_lossy(payload).into_owned(),
            ));
        }
        Ok(Message::Chat(String::from_utf8_lossy(payload).into_owned()))
    }

    /// Payload bytes to hand to the frame encoder.
    pub fn to_payload(&self) -> Vec<u8> {
        match self {
            Message::Solicit => AUTH_CAN.as_bytes().to_vec(),
            Message::Confirm => AUTH_OFC.as_bytes().to_vec(),
            Message::Chat(line) => line.as_bytes().to_vec(),
        }
    }
}

/// Payload that decoded as a frame but makes no sense to the protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unexpected control tag: {0:?}")]
    UnknownControl(String),
}

/// One line of local input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    End,
    Find,
    /// Chat text, newline already stripped.
    Say(String),
}

impl Command {
    pub fn parse(line: &str) -> Command {
        let line = chomp(line);
        if line.starts_with(CMD_END) {
            Command::End
        } else if line.starts_with(CMD_FIND) {
            Command::Find
        } else {
            Command::Say(line.to_string())
        }
    }
}

/// Strip one trailing `\n` or `\r\n`.
pub fn chomp(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Chat payload as sent on the wire.
pub fn format_chat(name: &str, text: &str) -> String {
    format!("{}: {}", name, text)
}

/// Check a display name against the length limit.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().count() <= MAX_NAME_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_tags_match_by_prefix() {
        assert_eq!(Message::parse(b"auth: CAN").unwrap(), Message::Solicit);
        assert_eq!(Message::parse(b"auth: OFC").unwrap(), Message::Confirm);
        // Older peers pad the tag.
        assert_eq!(Message::parse(b"auth: CAN\0\0").unwrap(), Message::Solicit);
    }

    #[test]
    fn unknown_control_rejected() {
        assert!(matches!(
            Message::parse(b"auth: NOPE"),
            Err(ProtocolError::UnknownControl(_))
        ));
    }

    #[test]
    fn chat_is_verbatim() {
        assert_eq!(
            Message::parse(b"alice: auth: CAN").unwrap(),
            Message::Chat("alice: auth: CAN".into())
        );
        let msg = Message::Chat(format_chat("bob", "hi"));
        assert_eq!(msg.to_payload(), b"bob: hi");
    }

    #[test]
    fn commands() {
        assert_eq!(Command::parse("am-end\n"), Command::End);
        assert_eq!(Command::parse("am-find\r\n"), Command::Find);
        assert_eq!(Command::parse("am-find"), Command::Find);
        assert_eq!(Command::parse("hello\n"), Command::Say("hello".into()));
        assert_eq!(Command::parse("\n"), Command::Say(String::new()));
        assert_eq!(Command::parse("say am-end\n"), Command::Say("say am-end".into()));
    }

    #[test]
    fn name_limits() {
        assert!(is_valid_name("alice"));
        assert!(is_valid_name("abcdefghij"));
        assert!(!is_valid_name("abcdefghijk"));
        assert!(!is_valid_name(""));
    }
}
