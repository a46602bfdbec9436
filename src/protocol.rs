//! Wire format between the engine and an agent client.
//!
//! One UTF-8 JSON document per line, in both directions. Engine messages are tagged by their
//! `header` field; commands are tagged by `command_type`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::game_interface::{Command, GameSnapshot};

/// Per-team line of a `GAME_FINISHED` message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoreEntry {
    /// Team id
    pub team: u8,
    /// Final score, in seconds
    #[serde(deserialize_with = "lenient_f32")]
    pub score: f32,
    /// Whether the engine declared this team the winner
    pub won: bool,
    /// Not sent by every engine version
    #[serde(default)]
    pub username: Option<String>,
}

/// A message received from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// `ASK_COMMAND`: the engine waits for one command
    AskCommand(GameSnapshot),
    /// `GAME_FINISHED`: final scores, one entry per team
    GameFinished(Vec<ScoreEntry>),
    /// `ABORT`: the match was stopped, `blame` names who caused it
    Abort {
        /// What went wrong
        error: String,
        /// Username or component held responsible
        blame: String,
    },
}

#[derive(Deserialize)]
struct AskCommandPayload {
    snapshot: GameSnapshot,
}

#[derive(Deserialize)]
struct GameFinishedPayload {
    score: Vec<ScoreEntry>,
}

#[derive(Deserialize)]
struct AbortPayload {
    error: String,
    blame: String,
}

const ASK_COMMAND: &str = "ASK_COMMAND";
const GAME_FINISHED: &str = "GAME_FINISHED";
const ABORT: &str = "ABORT";

/// Parses one line sent by the engine.
///
/// # Errors
/// - [`ProtocolError::MalformedJson`] when the line is not a JSON document
/// - [`ProtocolError::MissingHeader`] when there is no string `header`
/// - [`ProtocolError::UnknownHeader`] for any header other than the three known ones
/// - [`ProtocolError::InvalidPayload`] when a required field is missing or has the wrong shape
pub fn parse_message(line: &str) -> Result<EngineMessage, ProtocolError> {
    let value: Value = serde_json::from_str(line).map_err(ProtocolError::MalformedJson)?;
    let header = value
        .get("header")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingHeader)?
        .to_owned();

    match header.as_str() {
        ASK_COMMAND => {
            let payload: AskCommandPayload = from_payload(ASK_COMMAND, value)?;
            Ok(EngineMessage::AskCommand(payload.snapshot))
        }
        GAME_FINISHED => {
            let payload: GameFinishedPayload = from_payload(GAME_FINISHED, value)?;
            Ok(EngineMessage::GameFinished(payload.score))
        }
        ABORT => {
            let payload: AbortPayload = from_payload(ABORT, value)?;
            Ok(EngineMessage::Abort {
                error: payload.error,
                blame: payload.blame,
            })
        }
        _ => Err(ProtocolError::UnknownHeader(header)),
    }
}

fn from_payload<T: for<'de> Deserialize<'de>>(
    header: &'static str,
    value: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidPayload { header, source })
}

/// Serializes a command into one line, newline included.
pub fn encode_command(command: &Command) -> String {
    // a Command only holds strings and floats, serialization cannot fail
    let mut line = serde_json::to_string(command).unwrap_or_else(|_| {
        r#"{"command_type":"INVALID","whatever_value":"unserializable command"}"#.to_owned()
    });
    line.push('\n');
    line
}

/// Reads a float from either a JSON number or a numeric string.
pub(crate) fn lenient_f32<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n as f32),
        NumberOrText::Text(s) => s
            .trim()
            .parse::<f32>()
            .map_err(|e| serde::de::Error::custom(format!("'{s}' is not a float: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_interface::{PlayerState, Vec3};

    const ASK: &str = r#"{"header":"ASK_COMMAND","snapshot":{
        "controlledPlayer":{"pos":{"x":1,"y":2.5,"z":0},"speed":{"x":0,"y":0,"z":0},
            "state":"MOVING","health":100,"team":0,"score":"3.5"},
        "otherPlayers":[{"pos":{"x":-1,"y":0,"z":0},"speed":{"x":1,"y":0,"z":0},
            "health":80.5,"team":1,"score":0}],
        "projectiles":[{"pos":{"x":0,"y":0,"z":0},"speed":{"x":0,"y":5,"z":0}}]}}"#;

    #[test]
    fn test_parse_ask_command() {
        let EngineMessage::AskCommand(snapshot) = parse_message(ASK).unwrap() else {
            panic!("not an ASK_COMMAND");
        };
        let me = &snapshot.controlled_player;
        assert_eq!(me.position, Vec3::new(1.0, 2.5, 0.0));
        assert_eq!(me.score, 3.5);
        assert_eq!(me.state, Some(PlayerState::Moving));
        assert_eq!(snapshot.other_players.len(), 1);
        assert_eq!(snapshot.other_players[0].health, 80.5);
        assert_eq!(snapshot.other_players[0].state, None);
        assert_eq!(snapshot.projectiles[0].velocity, Vec3::new(0.0, 5.0, 0.0));
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let line = r#"{"header":"ASK_COMMAND","snapshot":{"controlledPlayer":{"pos":{"x":1,"y":2},
            "speed":{"x":0,"y":0,"z":0},"health":1,"team":0,"score":0},
            "otherPlayers":[],"projectiles":[]}}"#;
        assert!(matches!(
            parse_message(line),
            Err(ProtocolError::InvalidPayload {
                header: "ASK_COMMAND",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_finished_and_abort() {
        let finished = r#"{"header":"GAME_FINISHED","score":[
            {"team":0,"username":"a","score":12.0,"won":true},{"team":1,"score":3,"won":false}]}"#;
        let EngineMessage::GameFinished(scores) = parse_message(finished).unwrap() else {
            panic!("not a GAME_FINISHED");
        };
        assert_eq!(scores.len(), 2);
        assert!(scores[0].won);
        assert_eq!(scores[1].username, None);

        let abort = r#"{"header":"ABORT","error":"bad command","blame":"player_1"}"#;
        assert_eq!(
            parse_message(abort).unwrap(),
            EngineMessage::Abort {
                error: "bad command".into(),
                blame: "player_1".into()
            }
        );
    }

    #[test]
    fn test_bad_headers() {
        assert!(matches!(
            parse_message("not json"),
            Err(ProtocolError::MalformedJson(_))
        ));
        assert!(matches!(
            parse_message(r#"{"score":[]}"#),
            Err(ProtocolError::MissingHeader)
        ));
        assert!(matches!(
            parse_message(r#"{"header":"PING"}"#),
            Err(ProtocolError::UnknownHeader(h)) if h == "PING"
        ));
    }

    #[test]
    fn test_encode_commands() {
        let line = encode_command(&Command::move_towards(Vec3::new(1.0, 0.0, 0.0)));
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["command_type"], "MOVE");
        assert_eq!(value["move_direction"], serde_json::json!([1.0, 0.0, 0.0]));

        let value: Value = serde_json::from_str(&encode_command(&Command::shoot(90.0))).unwrap();
        assert_eq!(value["command_type"], "SHOOT");
        assert_eq!(value["shoot_angle"], 90.0);

        let value: Value =
            serde_json::from_str(&encode_command(&Command::invalid("timeout"))).unwrap();
        assert_eq!(value["command_type"], "INVALID");
        assert_eq!(value["whatever_value"], "timeout");
    }

    #[test]
    fn test_move_direction_survives_the_engine_schema() {
        #[derive(Deserialize)]
        struct EngineSideMove {
            command_type: String,
            move_direction: Vec<f32>,
        }
        let line = encode_command(&Command::move_towards(Vec3::new(1.0, 0.0, 0.0)));
        let parsed: EngineSideMove = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed.command_type, "MOVE");
        assert_eq!(parsed.move_direction, vec![1.0, 0.0, 0.0]);
    }
}
