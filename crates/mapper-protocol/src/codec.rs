//! WebSocket message codec.
//!
//! Messages travel as JSON text frames of the form `{"cmd": ..., "args": ...}`.
//! Outbound events serialize directly; inbound commands are decoded in two
//! steps (envelope, then per-command arguments) so an unknown command name is
//! reported separately from malformed arguments.

use serde::Deserialize;
use serde_json::{Map as JsonMap, Value};
use thiserror::Error;

use crate::messages::{InboundCommand, LoadRequest, MapRequest, OutboundEvent, SaveRequest, SubscribeTarget};

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("Failed to serialize message: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// The command name is not part of the protocol.
    #[error("Unknown command {0:?}")]
    UnknownCommand(String),

    /// The command's arguments have the wrong shape.
    #[error("Invalid arguments for {cmd}: {reason}")]
    InvalidArgs { cmd: String, reason: String },

    /// Received binary frame instead of text.
    #[error("Expected text frame, received binary")]
    BinaryFrame,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    cmd: String,
    #[serde(default)]
    args: Value,
}

/// A source list given either as one key or as a list of keys.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(key) => vec![key],
            OneOrMany::Many(keys) => keys,
        }
    }
}

/// `[sources, destination]` or `[sources, destination, properties]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MapArgs {
    WithProperties(OneOrMany, String, Value),
    Bare(OneOrMany, String),
}

impl From<MapArgs> for MapRequest {
    fn from(args: MapArgs) -> Self {
        let (sources, destination, properties) = match args {
            MapArgs::WithProperties(s, d, p) => (s, d, p),
            MapArgs::Bare(s, d) => (s, d, Value::Null),
        };
        MapRequest {
            sources: sources.into(),
            destination,
            // Anything other than an object carries no properties.
            properties: match properties {
                Value::Object(props) => Some(props),
                _ => None,
            },
        }
    }
}

fn args<T: for<'de> Deserialize<'de>>(cmd: &str, args: Value) -> Result<T, CodecError> {
    serde_json::from_value(args).map_err(|e| CodecError::InvalidArgs {
        cmd: cmd.to_string(),
        reason: e.to_string(),
    })
}

/// Encode an outbound event to a JSON string for WebSocket transmission.
pub fn encode_event(event: &OutboundEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(CodecError::from)
}

/// Decode an outbound event, as a client does.
pub fn decode_event(text: &str) -> Result<OutboundEvent, CodecError> {
    serde_json::from_str(text).map_err(CodecError::from)
}

/// Decode an inbound command from a JSON string received over WebSocket.
pub fn decode_command(text: &str) -> Result<InboundCommand, CodecError> {
    let raw: RawCommand = serde_json::from_str(text)?;
    command_from_parts(&raw.cmd, raw.args)
}

/// Build an inbound command from its name and arguments.
///
/// Snapshot, `refresh` and `get_interfaces` commands ignore their arguments.
pub fn command_from_parts(cmd: &str, arg: Value) -> Result<InboundCommand, CodecError> {
    let command = match cmd {
        "add_devices" => InboundCommand::AddDevices,
        "add_signals" => InboundCommand::AddSignals,
        "add_maps" => InboundCommand::AddMaps,
        "refresh" => InboundCommand::Refresh,
        "get_interfaces" => InboundCommand::GetInterfaces,
        "subscribe" => {
            let target: String = args(cmd, arg)?;
            InboundCommand::Subscribe(SubscribeTarget::from_arg(&target))
        }
        "set_map" => InboundCommand::SetMap(args::<JsonMap<String, Value>>(cmd, arg)?),
        "map" => InboundCommand::Map(args::<MapArgs>(cmd, arg)?.into()),
        "unmap" => {
            let mut request: MapRequest = args::<MapArgs>(cmd, arg)?.into();
            request.properties = None;
            InboundCommand::Unmap(request)
        }
        "save" => InboundCommand::Save(args::<SaveRequest>(cmd, arg)?),
        "load" => InboundCommand::Load(args::<LoadRequest>(cmd, arg)?),
        "select_interface" => InboundCommand::SelectInterface(args(cmd, arg)?),
        other => return Err(CodecError::UnknownCommand(other.to_string())),
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_snapshot_without_args() {
        assert_eq!(decode_command(r#"{"cmd":"add_maps"}"#).unwrap(), InboundCommand::AddMaps);
        assert_eq!(
            decode_command(r#"{"cmd":"add_devices","args":null}"#).unwrap(),
            InboundCommand::AddDevices
        );
    }

    #[test]
    fn test_decode_map_with_properties() {
        let text = r#"{"cmd":"map","args":[["synth/freq"],"filter/cutoff",{"expr":"y=x*2"}]}"#;
        match decode_command(text).unwrap() {
            InboundCommand::Map(req) => {
                assert_eq!(req.sources, vec!["synth/freq".to_string()]);
                assert_eq!(req.destination, "filter/cutoff");
                assert_eq!(req.properties.unwrap()["expr"], "y=x*2");
            }
            other => panic!("Expected Map, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_map_single_source_string() {
        let text = r#"{"cmd":"map","args":["synth/freq","filter/cutoff"]}"#;
        match decode_command(text).unwrap() {
            InboundCommand::Map(req) => {
                assert_eq!(req.sources, vec!["synth/freq".to_string()]);
                assert!(req.properties.is_none());
            }
            other => panic!("Expected Map, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_map_non_object_properties_ignored() {
        let text = r#"{"cmd":"map","args":[["a/1","b/1"],"c/1","y=x"]}"#;
        match decode_command(text).unwrap() {
            InboundCommand::Map(req) => {
                assert_eq!(req.sources.len(), 2);
                assert!(req.properties.is_none());
            }
            other => panic!("Expected Map, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unmap() {
        let text = r#"{"cmd":"unmap","args":[["a/1","b/1"],"c/1"]}"#;
        assert_eq!(
            decode_command(text).unwrap(),
            InboundCommand::Unmap(MapRequest {
                sources: vec!["a/1".into(), "b/1".into()],
                destination: "c/1".into(),
                properties: None,
            })
        );
    }

    #[test]
    fn test_decode_subscribe_and_interface() {
        assert_eq!(
            decode_command(r#"{"cmd":"subscribe","args":"all_devices"}"#).unwrap(),
            InboundCommand::Subscribe(SubscribeTarget::AllDevices)
        );
        assert_eq!(
            decode_command(r#"{"cmd":"select_interface","args":"en0"}"#).unwrap(),
            InboundCommand::SelectInterface("en0".into())
        );
    }

    #[test]
    fn test_decode_load() {
        let text = json!({
            "cmd": "load",
            "args": {"sources": ["synth2"], "loading": {"fileversion": "2.4"}}
        })
        .to_string();
        match decode_command(&text).unwrap() {
            InboundCommand::Load(req) => {
                assert_eq!(req.sources, vec!["synth2".to_string()]);
                assert!(req.destinations.is_empty());
                assert_eq!(req.loading["fileversion"], "2.4");
            }
            other => panic!("Expected Load, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_command(r#"{"cmd":"launch"}"#),
            Err(CodecError::UnknownCommand(name)) if name == "launch"
        ));
        assert!(matches!(
            decode_command(r#"{"cmd":"map","args":"synth/freq"}"#),
            Err(CodecError::InvalidArgs { .. })
        ));
        assert!(matches!(
            decode_command(r#"{"cmd":"save","args":{}}"#),
            Err(CodecError::InvalidArgs { .. })
        ));
        assert!(matches!(decode_command("not json"), Err(CodecError::SerializeError(_))));
    }

    #[test]
    fn test_encode_decode_event() {
        let event = OutboundEvent::ActiveInterface("lo0".into());
        let text = encode_event(&event).unwrap();
        assert_eq!(text, r#"{"cmd":"active_interface","args":"lo0"}"#);
        assert_eq!(decode_event(&text).unwrap(), event);
    }
}
