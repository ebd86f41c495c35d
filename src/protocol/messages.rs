//! Control message shapes and the session endpoint URL.
//!
//! The remote service speaks in numbered commands. The numbers stop at this
//! module: everything above works with [`Command`] and [`RemoteEvent`].

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::TransportConfig;

/// Command numbers of the remote conversion protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Session start (outbound)
    Init,
    /// Image metadata (outbound)
    Metadata,
    /// Remote is analyzing the uploaded image
    Analyzing,
    /// Remote is tracing shapes
    Tracing,
    /// Vector result is available; carries the result token
    ResultToken,
    /// Remote is rendering previews
    Rendering,
    /// Result ready, session complete
    Ready,
    /// Error report, fatal when flagged unrecoverable
    Error,
    /// All chunks sent (outbound)
    UploadFinished,
}

impl Command {
    /// Wire value of this command
    pub fn code(&self) -> u8 {
        match self {
            Command::Init => 0,
            Command::Metadata => 2,
            Command::Analyzing => 5,
            Command::Tracing => 6,
            Command::ResultToken => 7,
            Command::Rendering => 8,
            Command::Ready => 9,
            Command::Error => 10,
            Command::UploadFinished => 11,
        }
    }

    /// Parse a wire value; unknown values yield `None`
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Command::Init),
            2 => Some(Command::Metadata),
            5 => Some(Command::Analyzing),
            6 => Some(Command::Tracing),
            7 => Some(Command::ResultToken),
            8 => Some(Command::Rendering),
            9 => Some(Command::Ready),
            10 => Some(Command::Error),
            11 => Some(Command::UploadFinished),
            _ => None,
        }
    }

    /// Session progress reached when this milestone arrives
    pub fn milestone_progress(&self) -> Option<u8> {
        match self {
            Command::Analyzing => Some(75),
            Command::Tracing => Some(80),
            Command::ResultToken => Some(85),
            Command::Rendering => Some(90),
            Command::Ready => Some(100),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct Bare {
    index: usize,
    command: u8,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageMeta {
    width: u32,
    height: u32,
    dpi: u32,
    is_cmyk: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetadataBody<'a> {
    job_id: &'a str,
    host: &'a str,
    meta: ImageMeta,
}

#[derive(Serialize)]
struct WithBody<'a> {
    index: usize,
    command: u8,
    body: MetadataBody<'a>,
}

/// Session-start message: `{index, command: 0}`
pub fn init_message(index: usize) -> Value {
    bare(index, Command::Init)
}

/// Upload-finished message: `{index, command: 11}`
pub fn upload_finished_message(index: usize) -> Value {
    bare(index, Command::UploadFinished)
}

fn bare(index: usize, command: Command) -> Value {
    serde_json::json!(Bare {
        index,
        command: command.code(),
    })
}

/// Image metadata sent before any binary chunk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionMeta<'a> {
    /// Job index in the batch
    pub index: usize,
    /// Client-generated session identifier
    pub job_id: &'a str,
    /// Host identifier from the transport config
    pub host: &'a str,
    /// Declared width in pixels
    pub width: u32,
    /// Declared height in pixels
    pub height: u32,
    /// Declared resolution
    pub dpi: u32,
    /// Whether the image is CMYK
    pub is_cmyk: bool,
}

/// Metadata message: `{index, command: 2, body: {jobId, host, meta: {...}}}`
pub fn metadata_message(meta: &SessionMeta<'_>) -> Value {
    serde_json::json!(WithBody {
        index: meta.index,
        command: Command::Metadata.code(),
        body: MetadataBody {
            job_id: meta.job_id,
            host: meta.host,
            meta: ImageMeta {
                width: meta.width,
                height: meta.height,
                dpi: meta.dpi,
                is_cmyk: meta.is_cmyk,
            },
        },
    })
}

/// A decoded inbound control message
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteEvent {
    /// Processing milestone without extra payload
    Milestone(Command),
    /// The result token became available
    ResultToken(String),
    /// Result ready; terminal
    Ready,
    /// Unrecoverable remote error; terminal
    Fatal(String),
    /// Recoverable error report, informational only
    Notice(String),
    /// Message with an unknown or missing command
    Unknown(Value),
}

/// Decode an inbound `{command, body}` control message
pub fn parse_inbound(message: &Value) -> RemoteEvent {
    let Some(command) = message
        .get("command")
        .and_then(Value::as_u64)
        .and_then(Command::from_code)
    else {
        return RemoteEvent::Unknown(message.clone());
    };
    let body = message.get("body");

    match command {
        Command::ResultToken => {
            match body
                .and_then(|b| b.pointer("/spec/token"))
                .and_then(Value::as_str)
            {
                Some(token) => RemoteEvent::ResultToken(token.to_string()),
                None => RemoteEvent::Milestone(command),
            }
        }
        Command::Ready => RemoteEvent::Ready,
        Command::Error => {
            let text = error_text(body);
            let unrecoverable = body
                .and_then(|b| b.get("unrecoverable"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if unrecoverable {
                RemoteEvent::Fatal(text)
            } else {
                RemoteEvent::Notice(text)
            }
        }
        Command::Analyzing | Command::Tracing | Command::Rendering => {
            RemoteEvent::Milestone(command)
        }
        Command::Init | Command::Metadata | Command::UploadFinished => {
            RemoteEvent::Unknown(message.clone())
        }
    }
}

fn error_text(body: Option<&Value>) -> String {
    body.and_then(|b| {
        b.get("message")
            .or_else(|| b.get("error"))
            .and_then(Value::as_str)
    })
    .map(str::to_string)
    .unwrap_or_else(|| "remote service reported an unrecoverable error".to_string())
}

/// Parameters encoded in the session endpoint query
#[derive(Clone, Debug)]
pub struct EndpointParams<'a> {
    /// Target locale
    pub locale: &'a str,
    /// Declared payload length in bytes
    pub size: usize,
    /// Declared width in pixels
    pub width: u32,
    /// Declared height in pixels
    pub height: u32,
    /// Original filename
    pub filename: &'a str,
}

/// Build the streaming URL for one session
pub fn session_url(
    config: &TransportConfig,
    params: &EndpointParams<'_>,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&config.endpoint)?;
    url.query_pairs_mut()
        .append_pair("locale", params.locale)
        .append_pair("size", &params.size.to_string())
        .append_pair("width", &params.width.to_string())
        .append_pair("height", &params.height.to_string())
        .append_pair("filename", params.filename)
        .append_pair("version", &config.protocol_version);
    Ok(url)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_codes_are_stable() {
        for code in [0u64, 2, 5, 6, 7, 8, 9, 10, 11] {
            let command = Command::from_code(code).unwrap();
            assert_eq!(u64::from(command.code()), code);
        }
        assert_eq!(Command::from_code(1), None);
        assert_eq!(Command::from_code(42), None);
    }

    #[test]
    fn outbound_shapes() {
        assert_eq!(init_message(4), json!({"index": 4, "command": 0}));
        assert_eq!(upload_finished_message(4), json!({"index": 4, "command": 11}));

        let meta = metadata_message(&SessionMeta {
            index: 4,
            job_id: "abc123",
            host: "vectorq",
            width: 640,
            height: 480,
            dpi: 300,
            is_cmyk: true,
        });
        assert_eq!(
            meta,
            json!({
                "index": 4,
                "command": 2,
                "body": {
                    "jobId": "abc123",
                    "host": "vectorq",
                    "meta": {"width": 640, "height": 480, "dpi": 300, "isCmyk": true}
                }
            })
        );
    }

    #[test]
    fn parses_token_and_terminal_messages() {
        assert_eq!(
            parse_inbound(&json!({"command": 7, "body": {"spec": {"token": "tok-1"}}})),
            RemoteEvent::ResultToken("tok-1".to_string())
        );
        assert_eq!(
            parse_inbound(&json!({"command": 7, "body": {}})),
            RemoteEvent::Milestone(Command::ResultToken)
        );
        assert_eq!(parse_inbound(&json!({"command": 9})), RemoteEvent::Ready);
        assert_eq!(
            parse_inbound(&json!({"command": 6, "body": null})),
            RemoteEvent::Milestone(Command::Tracing)
        );
    }

    #[test]
    fn error_is_fatal_only_when_flagged() {
        assert_eq!(
            parse_inbound(&json!({"command": 10, "body": {"unrecoverable": true, "message": "bad image"}})),
            RemoteEvent::Fatal("bad image".to_string())
        );
        assert_eq!(
            parse_inbound(&json!({"command": 10, "body": {"message": "slow down"}})),
            RemoteEvent::Notice("slow down".to_string())
        );
    }

    #[test]
    fn unknown_commands_are_preserved() {
        let msg = json!({"command": 3, "body": {"x": 1}});
        assert_eq!(parse_inbound(&msg), RemoteEvent::Unknown(msg.clone()));
        let msg = json!({"hello": "world"});
        assert_eq!(parse_inbound(&msg), RemoteEvent::Unknown(msg.clone()));
    }

    #[test]
    fn session_url_carries_parameters() {
        let config = TransportConfig {
            endpoint: "wss://vec.example.com/ws".to_string(),
            protocol_version: "7".to_string(),
            ..Default::default()
        };
        let url = session_url(
            &config,
            &EndpointParams {
                locale: "de-DE",
                size: 2048,
                width: 100,
                height: 50,
                filename: "my logo.png",
            },
        )
        .unwrap();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("locale".into(), "de-DE".into()),
                ("size".into(), "2048".into()),
                ("width".into(), "100".into()),
                ("height".into(), "50".into()),
                ("filename".into(), "my logo.png".into()),
                ("version".into(), "7".into()),
            ]
        );
    }
}
