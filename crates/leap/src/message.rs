//! The wire envelope: communique types, headers, status lines, and the
//! encode/decode entry points.
//!
//! Each message is one line of JSON. Requests carry `CommuniqueType`,
//! `Header.ClientTag`, `Header.Url` and an optional `Body`. Responses add
//! `Header.StatusCode` and, when a body follows, `Header.MessageBodyType`
//! naming which shape to decode `Body` as.

use core::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::body::Body;
use crate::error::{DecodeError, LeapError};

/// The fixed set of request/response kinds the protocol speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommuniqueType {
    CreateRequest,
    CreateResponse,
    DeleteRequest,
    DeleteResponse,
    ExceptionResponse,
    MetadataRequest,
    MetadataResponse,
    ReadRequest,
    ReadResponse,
    SubscribeRequest,
    SubscribeResponse,
    UnsubscribeRequest,
    UnsubscribeResponse,
    UpdateRequest,
    UpdateResponse,
}

/// Status line of a response header, parsed from a `"<digits> <text>"`
/// string such as `"200 OK"` or `"204 NoContent"`.
///
/// When the leading token is not an integer the whole string is kept as the
/// message and `code` is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStatus {
    pub code: Option<u16>,
    pub message: String,
}

impl ResponseStatus {
    pub fn parse(s: &str) -> Self {
        if let Some((first, rest)) = s.split_once(' ') {
            if let Ok(code) = first.parse::<u16>() {
                return Self {
                    code: Some(code),
                    message: rest.to_owned(),
                };
            }
        }
        Self {
            code: None,
            message: s.to_owned(),
        }
    }

    /// True when a code is present and in [200, 300).
    pub fn is_successful(&self) -> bool {
        matches!(self.code, Some(c) if (200..300).contains(&c))
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code} {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Serialize for ResponseStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResponseStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// Response header. Every field is optional on the wire; an absent
/// `ClientTag` marks the message as unsolicited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "StatusCode", skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
    #[serde(rename = "Url", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "MessageBodyType", skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    #[serde(rename = "ClientTag", skip_serializing_if = "Option::is_none")]
    pub client_tag: Option<String>,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub communique_type: CommuniqueType,
    pub header: Header,
    pub body: Option<Body>,
}

#[derive(Deserialize)]
struct ResponseWire {
    #[serde(rename = "CommuniqueType")]
    communique_type: CommuniqueType,
    #[serde(rename = "Header", default)]
    header: Header,
    #[serde(rename = "Body")]
    body: Option<serde_json::Value>,
}

impl Response {
    /// Decode one line of the stream.
    ///
    /// The body is decoded only when the header names a body type; an
    /// unknown body type is a [`DecodeError::UnimplementedBodyType`], which
    /// the reader loop treats like any other undecodable frame.
    pub fn decode(line: &[u8]) -> Result<Self, DecodeError> {
        let wire: ResponseWire = serde_json::from_slice(line)?;
        let body = match (wire.header.body_type.as_deref(), wire.body) {
            (Some(kind), Some(raw)) => Some(Body::parse(kind, raw)?),
            _ => None,
        };
        Ok(Self {
            communique_type: wire.communique_type,
            header: wire.header,
            body,
        })
    }
}

/// A response paired with the tag its request was sent under.
///
/// Returned by subscribe so the caller can tell a failed subscription apart
/// from a successful one while still knowing the tag in play.
#[derive(Debug, Clone)]
pub struct ResponseWithTag {
    pub response: Response,
    pub tag: String,
}

/// An outbound request.
#[derive(Debug, Clone)]
pub struct Request {
    pub communique_type: CommuniqueType,
    pub tag: String,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct RequestWire<'a> {
    #[serde(rename = "CommuniqueType")]
    communique_type: CommuniqueType,
    #[serde(rename = "Header")]
    header: RequestHeaderWire<'a>,
    #[serde(rename = "Body", skip_serializing_if = "Option::is_none")]
    body: Option<&'a serde_json::Value>,
}

#[derive(Serialize)]
struct RequestHeaderWire<'a> {
    #[serde(rename = "ClientTag")]
    client_tag: &'a str,
    #[serde(rename = "Url")]
    url: &'a str,
}

impl Request {
    /// Serialize to one line of JSON. The caller appends the `\n` delimiter
    /// when writing.
    pub fn encode(&self) -> Result<String, LeapError> {
        Ok(serde_json::to_string(&RequestWire {
            communique_type: self.communique_type,
            header: RequestHeaderWire {
                client_tag: &self.tag,
                url: &self.url,
            },
            body: self.body.as_ref(),
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_with_code_and_message() {
        let status = ResponseStatus::parse("200 OK");
        assert_eq!(status.code, Some(200));
        assert_eq!(status.message, "OK");
        assert!(status.is_successful());
    }

    #[test]
    fn status_no_content_is_successful() {
        let status = ResponseStatus::parse("204 NoContent");
        assert_eq!(status.code, Some(204));
        assert!(status.is_successful());
    }

    #[test]
    fn status_server_error_is_not_successful() {
        let status = ResponseStatus::parse("500 InternalError");
        assert_eq!(status.code, Some(500));
        assert!(!status.is_successful());
    }

    #[test]
    fn status_without_leading_code_keeps_whole_message() {
        let status = ResponseStatus::parse("InternalError");
        assert_eq!(status.code, None);
        assert_eq!(status.message, "InternalError");
        assert!(!status.is_successful());
    }

    #[test]
    fn status_non_numeric_first_token_keeps_whole_message() {
        let status = ResponseStatus::parse("not a code");
        assert_eq!(status.code, None);
        assert_eq!(status.message, "not a code");
    }

    #[test]
    fn status_round_trips_through_serde() {
        let json = serde_json::to_string(&ResponseStatus::parse("200 OK")).unwrap();
        assert_eq!(json, "\"200 OK\"");
        let status: ResponseStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status.code, Some(200));
    }

    #[test]
    fn encode_minimal_request() {
        let request = Request {
            communique_type: CommuniqueType::ReadRequest,
            tag: "d2018137-c87f-4315-ab04-e727c4fc973b".to_owned(),
            url: "/device".to_owned(),
            body: None,
        };
        assert_eq!(
            request.encode().unwrap(),
            r#"{"CommuniqueType":"ReadRequest","Header":{"ClientTag":"d2018137-c87f-4315-ab04-e727c4fc973b","Url":"/device"}}"#
        );
    }

    #[test]
    fn encode_request_with_body() {
        let request = Request {
            communique_type: CommuniqueType::UpdateRequest,
            tag: "t".to_owned(),
            url: "/zone/1/commandprocessor".to_owned(),
            body: Some(serde_json::json!({"Command": {"CommandType": "GoToLevel"}})),
        };
        let line = request.encode().unwrap();
        assert!(line.contains("\"Body\":{\"Command\""));
        assert!(line.ends_with('}'));
    }

    #[test]
    fn decode_response_with_device_body() {
        let line = br#"{"CommuniqueType": "ReadResponse", "Header": {"ClientTag": "T", "MessageBodyType": "MultipleDeviceDefinition", "StatusCode": "200 OK", "Url": "/device"}, "Body": {"Devices": [{"href": "/device/1", "Name": "Smart Bridge"}]}}"#;
        let response = Response::decode(line).unwrap();
        assert_eq!(response.communique_type, CommuniqueType::ReadResponse);
        assert_eq!(response.header.client_tag.as_deref(), Some("T"));
        assert!(response.header.status.as_ref().unwrap().is_successful());
        match response.body {
            Some(Body::MultipleDeviceDefinition(d)) => {
                assert_eq!(d.devices.len(), 1);
                assert_eq!(d.devices[0].name, "Smart Bridge");
            }
            other => panic!("wrong body: {other:?}"),
        }
    }

    #[test]
    fn decode_unknown_body_type_is_an_error() {
        let line = br#"{"CommuniqueType": "ReadResponse", "Header": {"MessageBodyType": "OneGalaxyDefinition"}, "Body": {}}"#;
        match Response::decode(line) {
            Err(DecodeError::UnimplementedBodyType(t)) => assert_eq!(t, "OneGalaxyDefinition"),
            other => panic!("expected unimplemented body type, got {other:?}"),
        }
    }

    #[test]
    fn decode_body_without_type_tag_is_ignored() {
        let line = br#"{"CommuniqueType": "ReadResponse", "Header": {"ClientTag": "T"}, "Body": {"Devices": []}}"#;
        let response = Response::decode(line).unwrap();
        assert!(response.body.is_none());
    }

    #[test]
    fn decode_missing_header_defaults_to_untagged() {
        let line = br#"{"CommuniqueType": "ReadResponse"}"#;
        let response = Response::decode(line).unwrap();
        assert!(response.header.client_tag.is_none());
        assert!(response.header.status.is_none());
    }

    #[test]
    fn decode_garbage_is_an_error() {
        assert!(Response::decode(b"this is not valid JSON").is_err());
    }

    #[test]
    fn decode_exception_response() {
        let line = br#"{"CommuniqueType": "ExceptionResponse", "Header": {"ClientTag": "T", "MessageBodyType": "ExceptionDetail", "StatusCode": "400 BadRequest"}, "Body": {"Message": "no such resource"}}"#;
        let response = Response::decode(line).unwrap();
        assert_eq!(response.communique_type, CommuniqueType::ExceptionResponse);
        match response.body {
            Some(Body::ExceptionDetail(d)) => assert_eq!(d.message, "no such resource"),
            other => panic!("wrong body: {other:?}"),
        }
    }

    #[test]
    fn encoded_request_decodes_back() {
        let request = Request {
            communique_type: CommuniqueType::SubscribeRequest,
            tag: "5433bbcc".to_owned(),
            url: "/occupancygroup/status".to_owned(),
            body: None,
        };
        let line = request.encode().unwrap();
        let decoded = Response::decode(line.as_bytes()).unwrap();
        assert_eq!(decoded.communique_type, CommuniqueType::SubscribeRequest);
        assert_eq!(decoded.header.client_tag.as_deref(), Some("5433bbcc"));
        assert_eq!(decoded.header.url.as_deref(), Some("/occupancygroup/status"));
    }
}
