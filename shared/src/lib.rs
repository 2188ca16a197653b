use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const HANDLER_AUTH: &str = "auth";
pub const HANDLER_RACER: &str = "racer";
pub const HANDLER_RACE: &str = "race";
pub const HANDLER_BET: &str = "bet";

/// A single client request. One JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub handler: String,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl Request {
    pub fn new<P: Serialize>(
        handler: &str,
        action: &str,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            handler: handler.to_string(),
            action: action.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Request without a payload.
    pub fn bare(handler: &str, action: &str) -> Self {
        Self {
            handler: handler.to_string(),
            action: action.to_string(),
            payload: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Protocol,
    Validation,
    DomainState,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Reply to exactly one [`Request`], written on the same connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub handler: String,
    pub action: String,
    pub status: Status,
    #[serde(default)]
    pub payload: Value,
}

impl Response {
    pub fn ok(handler: &str, action: &str, payload: Value) -> Self {
        Self {
            handler: handler.to_string(),
            action: action.to_string(),
            status: Status::Ok,
            payload,
        }
    }

    pub fn error(handler: &str, action: &str, body: ErrorBody) -> Self {
        Self {
            handler: handler.to_string(),
            action: action.to_string(),
            status: Status::Error,
            payload: serde_json::to_value(&body).unwrap_or(Value::Null),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn error_body(&self) -> Option<ErrorBody> {
        match self.status {
            Status::Ok => None,
            Status::Error => serde_json::from_value(self.payload.clone()).ok(),
        }
    }

    /// Decodes the success payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Asynchronous push sent to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "handler", content = "payload")]
pub enum Notification {
    #[serde(rename = "onRaceStarted", rename_all = "camelCase")]
    RaceStarted { race_name: String },
    #[serde(rename = "onHorseFinished")]
    HorseFinished { racer: RacerDto, position: usize },
    #[serde(rename = "onRaceFinished", rename_all = "camelCase")]
    RaceFinished {
        race_name: String,
        final_positions: Vec<RacerDto>,
    },
}

/// Anything the server can write to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Response(Response),
    Notification(Notification),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RacerKind {
    Horse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceStatus {
    NotStarted,
    InProgress,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RacerDto {
    pub id: u32,
    pub name: String,
    pub kind: RacerKind,
    pub speed_min: u32,
    pub speed_max: u32,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDto {
    pub name: String,
    pub length: u32,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceDto {
    pub id: u64,
    pub name: String,
    pub track: TrackDto,
    pub scheduled_start: u64,
    pub status: RaceStatus,
    pub racers: Vec<RacerDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetDto {
    pub id: u64,
    pub race_id: u64,
    pub race_name: String,
    pub racer_id: u32,
    pub username: String,
    pub amount: u64,
    pub winning: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub username: String,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowDto {
    pub race_name: Option<String>,
    pub open: bool,
    pub open_bets: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRacerPayload {
    pub name: String,
    pub speed_min: u32,
    pub speed_max: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RacerIdPayload {
    pub id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadAllRacersPayload {
    #[serde(default)]
    pub kind: Option<RacerKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRacePayload {
    pub name: String,
    pub track: String,
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub start_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBetPayload {
    pub racer_id: u32,
    pub amount: u64,
    #[serde(default)]
    pub race_name: Option<String>,
}

/// Serializes a message as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_racer(id: u32) -> RacerDto {
        RacerDto {
            id,
            name: format!("Horse {}", id),
            kind: RacerKind::Horse,
            speed_min: 1,
            speed_max: 5,
            position: 100,
        }
    }

    #[test]
    fn test_request_line_roundtrip() {
        let payload = CreateBetPayload {
            racer_id: 3,
            amount: 100,
            race_name: Some("Derby".to_string()),
        };
        let request = Request::new(HANDLER_BET, "createBet", &payload).unwrap();

        let line = encode_line(&request).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let decoded: Request = decode_line(&line).unwrap();
        assert_eq!(decoded, request);

        let decoded_payload: CreateBetPayload = serde_json::from_value(decoded.payload).unwrap();
        assert_eq!(decoded_payload, payload);
    }

    #[test]
    fn test_request_without_payload() {
        let decoded: Request = decode_line(r#"{"handler":"auth","action":"logout"}"#).unwrap();
        assert_eq!(decoded, Request::bare(HANDLER_AUTH, "logout"));
        assert_eq!(decoded.payload, Value::Null);
    }

    #[test]
    fn test_payload_fields_are_camel_case() {
        let value = serde_json::to_value(CreateRacerPayload {
            name: "Comet".to_string(),
            speed_min: 2,
            speed_max: 6,
        })
        .unwrap();

        assert_eq!(value, json!({"name": "Comet", "speedMin": 2, "speedMax": 6}));
    }

    #[test]
    fn test_notification_wire_shape() {
        let started = Notification::RaceStarted {
            race_name: "Derby".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&started).unwrap(),
            json!({"handler": "onRaceStarted", "payload": {"raceName": "Derby"}})
        );

        let finished = Notification::RaceFinished {
            race_name: "Derby".to_string(),
            final_positions: vec![sample_racer(2), sample_racer(1)],
        };
        let value = serde_json::to_value(&finished).unwrap();
        assert_eq!(value["handler"], "onRaceFinished");
        assert_eq!(value["payload"]["finalPositions"][0]["id"], 2);
        assert_eq!(value["payload"]["finalPositions"][0]["kind"], "HORSE");

        let horse = Notification::HorseFinished {
            racer: sample_racer(7),
            position: 1,
        };
        let value = serde_json::to_value(&horse).unwrap();
        assert_eq!(value["handler"], "onHorseFinished");
        assert_eq!(value["payload"]["position"], 1);
        assert_eq!(value["payload"]["racer"]["speedMax"], 5);
    }

    #[test]
    fn test_server_message_classification() {
        let response = Response::ok(HANDLER_RACER, "readRacer", json!({"id": 1}));
        let line = encode_line(&response).unwrap();
        match decode_line::<ServerMessage>(&line).unwrap() {
            ServerMessage::Response(r) => assert_eq!(r, response),
            other => panic!("Expected response, got {:?}", other),
        }

        let notification = Notification::RaceStarted {
            race_name: "Sprint".to_string(),
        };
        let line = encode_line(&notification).unwrap();
        match decode_line::<ServerMessage>(&line).unwrap() {
            ServerMessage::Notification(n) => assert_eq!(n, notification),
            other => panic!("Expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_error_response_body() {
        let response = Response::error(
            HANDLER_BET,
            "createBet",
            ErrorBody {
                kind: ErrorKind::DomainState,
                message: "betting closed".to_string(),
            },
        );

        assert!(!response.is_ok());
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["payload"]["kind"], "domain_state");

        let body = response.error_body().unwrap();
        assert_eq!(body.kind, ErrorKind::DomainState);
        assert_eq!(body.message, "betting closed");

        let ok = Response::ok(HANDLER_BET, "readWindow", Value::Null);
        assert!(ok.is_ok());
        assert!(ok.error_body().is_none());
    }

    #[test]
    fn test_optional_payload_fields_default() {
        let payload: CreateRacePayload =
            serde_json::from_value(json!({"name": "Cup", "track": "Ascot"})).unwrap();
        assert_eq!(payload.capacity, None);
        assert_eq!(payload.start_delay_secs, None);

        let payload: ReadAllRacersPayload = serde_json::from_value(json!({})).unwrap();
        assert_eq!(payload.kind, None);
    }

    #[test]
    fn test_malformed_lines_are_rejected() {
        assert!(decode_line::<Request>("").is_err());
        assert!(decode_line::<Request>("{\"handler\":\"bet\"").is_err());
        assert!(decode_line::<Request>("{\"action\":\"createBet\"}").is_err());
        assert!(decode_line::<Request>("not json").is_err());
    }
}
