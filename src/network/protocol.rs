use crate::{RelayError, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound for a single encoded envelope.
pub const MAX_ENVELOPE_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Text,
    Image,
    Audio,
    Video,
    File,
    Request,
}

/// The unit exchanged over a relay connection.
///
/// `parameter` is interpreted according to `kind`:
/// - `Text`: the message body
/// - `Image` / `File`: `"<name>;<size>"`, see [`TransferHeader`]
/// - `Request`: `"<scope>;<operation>,<argument>"`, see [`RequestParameter`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub source: String,
    pub target: String,
    pub kind: DataKind,
    pub parameter: String,
    pub payload: Payload,
    /// Correlates a database request with its `Client;RequestResult` reply.
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Payload {
    #[default]
    None,
    User(User),
    Users(Vec<User>),
    RequestResult(RequestResult),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct User {
    pub user_id: i32,
    pub user_name: String,
    pub password: String,
    pub nick_name: String,
    pub gender: String,
    pub age: i32,
    pub head_icon: Vec<u8>,
    pub state: i32,
}

/// Outcome of a database request. `success` is `None` when the handler
/// could not decide (e.g. the backing store failed).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestResult {
    pub success: Option<bool>,
    pub object: Option<ResultObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultObject {
    User(User),
    Users(Vec<User>),
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_ENVELOPE_SIZE)
        .reject_trailing_bytes()
}

impl Envelope {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        kind: DataKind,
        parameter: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            parameter: parameter.into(),
            payload: Payload::None,
            request_id: None,
        }
    }

    pub fn text(source: &str, target: &str, message: &str) -> Self {
        Self::new(source, target, DataKind::Text, message)
    }

    pub fn image(source: &str, target: &str, header: &TransferHeader) -> Self {
        Self::new(source, target, DataKind::Image, header.to_string())
    }

    pub fn file(source: &str, target: &str, header: &TransferHeader) -> Self {
        Self::new(source, target, DataKind::File, header.to_string())
    }

    pub fn control(source: &str, target: &str, command: ControlCommand) -> Self {
        Self::new(
            source,
            target,
            DataKind::Request,
            RequestParameter::Control(command).to_string(),
        )
    }

    /// Asks `target` for a secondary channel. The peer echoes this envelope,
    /// negotiation id included, as the first frame of the channel it opens.
    pub fn add_socket(source: &str, target: &str, negotiation: Uuid) -> Self {
        Self {
            request_id: Some(negotiation),
            ..Self::control(source, target, ControlCommand::AddSocket)
        }
    }

    /// A database request is always addressed to the requester itself.
    pub fn database_request(
        source: &str,
        operation: &str,
        argument: &str,
        payload: Payload,
        request_id: Uuid,
    ) -> Self {
        let parameter = RequestParameter::Database {
            operation: operation.to_string(),
            argument: argument.to_string(),
        };
        Self {
            payload,
            request_id: Some(request_id),
            ..Self::new(source, source, DataKind::Request, parameter.to_string())
        }
    }

    /// Builds the reply the relay sends back to the originator of `request`.
    pub fn request_result(request: &Envelope, result: RequestResult) -> Self {
        Self {
            payload: Payload::RequestResult(result),
            request_id: request.request_id,
            ..Self::control(&request.source, &request.source, ControlCommand::RequestResult)
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(codec().serialize(self)?)
    }

    /// Decodes the first `valid_len` bytes of `bytes`. Anything that does not
    /// match the envelope schema exactly is rejected.
    pub fn decode(bytes: &[u8], valid_len: usize) -> Result<Self> {
        let data = bytes.get(..valid_len).ok_or_else(|| {
            RelayError::Decode(format!(
                "valid length {} exceeds buffer of {} bytes",
                valid_len,
                bytes.len()
            ))
        })?;

        let envelope: Envelope = codec()
            .deserialize(data)
            .map_err(|e| RelayError::Decode(e.to_string()))?;

        if envelope.source.is_empty() {
            return Err(RelayError::Decode("envelope has no source".to_string()));
        }

        Ok(envelope)
    }

    pub fn transfer_header(&self) -> Result<TransferHeader> {
        match self.kind {
            DataKind::Image | DataKind::File => self.parameter.parse(),
            other => Err(RelayError::InvalidParameter(format!(
                "{:?} envelopes carry no transfer header",
                other
            ))),
        }
    }

    pub fn request_parameter(&self) -> Result<RequestParameter> {
        match self.kind {
            DataKind::Request => self.parameter.parse(),
            other => Err(RelayError::InvalidParameter(format!(
                "{:?} envelopes carry no request parameter",
                other
            ))),
        }
    }
}

/// `"<name>;<size>"` parameter of image and file envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub name: String,
    pub size: u64,
}

impl TransferHeader {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

impl fmt::Display for TransferHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.name, self.size)
    }
}

impl FromStr for TransferHeader {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        // The size is always the last field; names may themselves contain ';'.
        let (name, size) = s
            .rsplit_once(';')
            .ok_or_else(|| RelayError::InvalidParameter(format!("missing size in '{}'", s)))?;

        if name.is_empty() {
            return Err(RelayError::InvalidParameter(format!(
                "missing name in '{}'",
                s
            )));
        }

        let size: u64 = size
            .trim()
            .parse()
            .map_err(|_| RelayError::InvalidParameter(format!("invalid size in '{}'", s)))?;

        if size == 0 {
            return Err(RelayError::InvalidParameter(format!(
                "empty transfer '{}'",
                name
            )));
        }

        Ok(Self::new(name, size))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Server asks a peer to open a secondary channel.
    AddSocket,
    /// Server delivers the result of an earlier database request.
    RequestResult,
}

impl ControlCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::AddSocket => "AddSocket",
            ControlCommand::RequestResult => "RequestResult",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestParameter {
    Control(ControlCommand),
    Database { operation: String, argument: String },
}

impl fmt::Display for RequestParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestParameter::Control(command) => write!(f, "Client;{}", command.as_str()),
            RequestParameter::Database {
                operation,
                argument,
            } => write!(f, "Database;{},{}", operation, argument),
        }
    }
}

impl FromStr for RequestParameter {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        let (scope, rest) = s
            .split_once(';')
            .ok_or_else(|| RelayError::InvalidParameter(format!("missing scope in '{}'", s)))?;

        match scope {
            "Client" => match rest {
                "AddSocket" => Ok(RequestParameter::Control(ControlCommand::AddSocket)),
                "RequestResult" => Ok(RequestParameter::Control(ControlCommand::RequestResult)),
                other => Err(RelayError::InvalidParameter(format!(
                    "unknown control command '{}'",
                    other
                ))),
            },
            "Database" => {
                let (operation, argument) = rest.split_once(',').unwrap_or((rest, ""));
                if operation.is_empty() {
                    return Err(RelayError::InvalidParameter(format!(
                        "missing operation in '{}'",
                        s
                    )));
                }
                Ok(RequestParameter::Database {
                    operation: operation.to_string(),
                    argument: argument.to_string(),
                })
            }
            other => Err(RelayError::InvalidParameter(format!(
                "unknown request scope '{}'",
                other
            ))),
        }
    }
}

/// Operations the persistence collaborator understands. The relay never
/// interprets these; it passes the raw operation name through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseOperation {
    Signup,
    Login,
    AlterInfo,
    AlterPassword,
    GetUserInfo,
    GetFriends,
    AddFriend,
    RemoveFriend,
}

impl DatabaseOperation {
    pub const ALL: [DatabaseOperation; 8] = [
        DatabaseOperation::Signup,
        DatabaseOperation::Login,
        DatabaseOperation::AlterInfo,
        DatabaseOperation::AlterPassword,
        DatabaseOperation::GetUserInfo,
        DatabaseOperation::GetFriends,
        DatabaseOperation::AddFriend,
        DatabaseOperation::RemoveFriend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseOperation::Signup => "Signup",
            DatabaseOperation::Login => "Login",
            DatabaseOperation::AlterInfo => "AlterInfo",
            DatabaseOperation::AlterPassword => "AlterPassword",
            DatabaseOperation::GetUserInfo => "GetUserInfo",
            DatabaseOperation::GetFriends => "GetFriends",
            DatabaseOperation::AddFriend => "AddFriend",
            DatabaseOperation::RemoveFriend => "RemoveFriend",
        }
    }
}

impl fmt::Display for DatabaseOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseOperation {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| RelayError::InvalidParameter(format!("unknown operation '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            user_id: 7,
            user_name: "alice".to_string(),
            password: "secret".to_string(),
            nick_name: "Al".to_string(),
            gender: "F".to_string(),
            age: 30,
            head_icon: vec![0x89, 0x50, 0x4e, 0x47],
            state: 1,
        }
    }

    fn round_trip(envelope: &Envelope) -> Envelope {
        let bytes = envelope.encode().unwrap();
        Envelope::decode(&bytes, bytes.len()).unwrap()
    }

    #[test]
    fn test_round_trip_every_kind() {
        let header = TransferHeader::new("photo.png", 4096);
        let request_id = Uuid::new_v4();
        let request = Envelope::database_request(
            "alice",
            "GetUserInfo",
            "",
            Payload::User(sample_user()),
            request_id,
        );
        let reply = Envelope::request_result(
            &request,
            RequestResult {
                success: Some(true),
                object: Some(ResultObject::Users(vec![sample_user()])),
            },
        );

        let envelopes = vec![
            Envelope::text("alice", "bob", "hi"),
            Envelope::image("alice", "bob", &header),
            Envelope::file("alice", "bob", &TransferHeader::new("notes;v2.txt", 12)),
            Envelope::new("alice", "bob", DataKind::Audio, "clip.ogg;10"),
            Envelope::new("alice", "bob", DataKind::Video, "clip.mp4;10"),
            Envelope::control("alice", "bob", ControlCommand::AddSocket),
            request,
            reply,
        ];

        for envelope in &envelopes {
            assert_eq!(&round_trip(envelope), envelope);
        }
    }

    #[test]
    fn test_decode_respects_valid_length() {
        let envelope = Envelope::text("alice", "bob", "hello");
        let mut buffer = envelope.encode().unwrap();
        let valid = buffer.len();
        buffer.extend_from_slice(&[0xAA; 64]);

        assert_eq!(Envelope::decode(&buffer, valid).unwrap(), envelope);
        // Trailing garbage inside the valid range is a failure, not a partial object.
        assert!(Envelope::decode(&buffer, valid + 1).is_err());
        assert!(Envelope::decode(&buffer, buffer.len() + 1).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Envelope::decode(&[], 0).is_err());
        assert!(Envelope::decode(&[1, 2, 3, 4, 5], 5).is_err());

        let envelope = Envelope::text("alice", "bob", "hello");
        let bytes = envelope.encode().unwrap();
        assert!(Envelope::decode(&bytes, bytes.len() - 1).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_payload_variant() {
        let envelope = Envelope::text("alice", "bob", "hello");
        let mut bytes = envelope.encode().unwrap();
        // Payload discriminant sits right before the trailing Option<Uuid> tag.
        let tag_index = bytes.len() - 1 - 4;
        assert_eq!(&bytes[tag_index..tag_index + 4], &[0, 0, 0, 0]);
        bytes[tag_index] = 42;
        assert!(matches!(
            Envelope::decode(&bytes, bytes.len()),
            Err(RelayError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_source() {
        let envelope = Envelope::text("", "bob", "hello");
        let bytes = envelope.encode().unwrap();
        assert!(Envelope::decode(&bytes, bytes.len()).is_err());
    }

    #[test]
    fn test_transfer_header_parsing() {
        let header: TransferHeader = "cat.jpg;2048".parse().unwrap();
        assert_eq!(header, TransferHeader::new("cat.jpg", 2048));

        let header: TransferHeader = "a;b.bin;5".parse().unwrap();
        assert_eq!(header.name, "a;b.bin");
        assert_eq!(header.size, 5);

        assert!("cat.jpg".parse::<TransferHeader>().is_err());
        assert!(";12".parse::<TransferHeader>().is_err());
        assert!("cat.jpg;-3".parse::<TransferHeader>().is_err());
        assert!("cat.jpg;abc".parse::<TransferHeader>().is_err());
        assert!("cat.jpg;0".parse::<TransferHeader>().is_err());
    }

    #[test]
    fn test_transfer_header_only_for_sized_kinds() {
        let text = Envelope::text("alice", "bob", "x;5");
        assert!(text.transfer_header().is_err());

        let image = Envelope::image("alice", "bob", &TransferHeader::new("x.png", 5));
        assert_eq!(image.transfer_header().unwrap().size, 5);
    }

    #[test]
    fn test_request_parameter_grammar() {
        assert_eq!(
            "Client;AddSocket".parse::<RequestParameter>().unwrap(),
            RequestParameter::Control(ControlCommand::AddSocket)
        );
        assert_eq!(
            "Client;RequestResult".parse::<RequestParameter>().unwrap(),
            RequestParameter::Control(ControlCommand::RequestResult)
        );
        assert_eq!(
            "Database;AddFriend,bob".parse::<RequestParameter>().unwrap(),
            RequestParameter::Database {
                operation: "AddFriend".to_string(),
                argument: "bob".to_string()
            }
        );
        assert_eq!(
            "Database;Login".parse::<RequestParameter>().unwrap(),
            RequestParameter::Database {
                operation: "Login".to_string(),
                argument: String::new()
            }
        );

        assert!("Client;Reboot".parse::<RequestParameter>().is_err());
        assert!("Database;,x".parse::<RequestParameter>().is_err());
        assert!("Admin;Login,x".parse::<RequestParameter>().is_err());
        assert!("Database".parse::<RequestParameter>().is_err());
    }

    #[test]
    fn test_database_request_addressing() {
        let id = Uuid::new_v4();
        let request =
            Envelope::database_request("alice", "AlterPassword", "newpw", Payload::None, id);
        assert_eq!(request.target, "alice");
        assert_eq!(request.parameter, "Database;AlterPassword,newpw");

        let reply = Envelope::request_result(&request, RequestResult::default());
        assert_eq!(reply.source, "alice");
        assert_eq!(reply.target, "alice");
        assert_eq!(reply.parameter, "Client;RequestResult");
        assert_eq!(reply.request_id, Some(id));
    }

    #[test]
    fn test_add_socket_carries_negotiation_id() {
        let id = Uuid::new_v4();
        let request = Envelope::add_socket("alice", "bob", id);
        assert_eq!(request.kind, DataKind::Request);
        assert_eq!(request.parameter, "Client;AddSocket");
        assert_eq!(request.request_id, Some(id));
        assert_eq!(
            request.request_parameter().unwrap(),
            RequestParameter::Control(ControlCommand::AddSocket)
        );
    }

    #[test]
    fn test_database_operation_names() {
        for op in DatabaseOperation::ALL {
            assert_eq!(op.as_str().parse::<DatabaseOperation>().unwrap(), op);
        }
        assert!("DropTables".parse::<DatabaseOperation>().is_err());
    }
}
