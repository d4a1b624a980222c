//! SDP wire codec
//!
//! Wire form is the JSON object browsers and `webrtc` use:
//! `{"type": "offer", "sdp": "v=0..."}`

use serde_json::{json, Value};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::types::{DecodeError, SdpType, SessionDescription};

pub fn encode(desc: &SessionDescription) -> Value {
    json!({
        "type": desc.kind().canonical_form(),
        "sdp": desc.body(),
    })
}

pub fn decode(value: &Value) -> Result<SessionDescription, DecodeError> {
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let kind = match obj.get("type") {
        None | Some(Value::Null) => return Err(DecodeError::MissingType),
        Some(Value::String(s)) => s.parse::<SdpType>()?,
        Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
    };

    let sdp = obj
        .get("sdp")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingSdp)?;

    Ok(SessionDescription::new(kind, sdp))
}

impl SessionDescription {
    /// Convert from a description produced by a `webrtc` peer connection.
    pub fn from_rtc(desc: &RTCSessionDescription) -> Result<Self, DecodeError> {
        let kind = desc.sdp_type.to_string().parse::<SdpType>()?;
        Ok(Self::new(kind, desc.sdp.clone()))
    }

    /// Convert into the form `set_remote_description` expects.
    pub fn to_rtc(&self) -> Result<RTCSessionDescription, serde_json::Error> {
        serde_json::from_value(encode(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    #[test]
    fn test_encode_wire_format() {
        let value = encode(&SessionDescription::offer(SDP));
        assert_eq!(value["type"], "offer");
        assert_eq!(value["sdp"], SDP);
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_round_trip_every_kind() {
        for kind in SdpType::ALL {
            let desc = SessionDescription::new(kind, SDP);
            assert_eq!(decode(&encode(&desc)).unwrap(), desc);
        }
    }

    #[test]
    fn test_round_trip_empty_body() {
        let desc = SessionDescription::new(SdpType::Rollback, "");
        assert_eq!(decode(&encode(&desc)).unwrap(), desc);
    }

    #[test]
    fn test_decode_browser_json() {
        let raw = r#"{"type":"answer","sdp":"v=0\r\n"}"#;
        let value: Value = serde_json::from_str(raw).unwrap();
        let desc = decode(&value).unwrap();
        assert_eq!(desc.kind(), SdpType::Answer);
        assert_eq!(desc.body(), "v=0\r\n");
    }

    #[test]
    fn test_decode_rejects_missing_type() {
        let err = decode(&json!({ "sdp": SDP })).unwrap_err();
        assert_eq!(err, DecodeError::MissingType);
    }

    #[test]
    fn test_decode_rejects_missing_sdp() {
        let err = decode(&json!({ "type": "offer" })).unwrap_err();
        assert_eq!(err, DecodeError::MissingSdp);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = decode(&json!({ "type": "OFFER", "sdp": SDP })).unwrap_err();
        assert_eq!(err, DecodeError::UnknownType("OFFER".to_string()));

        let err = decode(&json!({ "type": 1, "sdp": SDP })).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(_)));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert_eq!(decode(&json!("offer")).unwrap_err(), DecodeError::NotAnObject);
        assert_eq!(decode(&Value::Null).unwrap_err(), DecodeError::NotAnObject);
    }

    #[test]
    fn test_rtc_interop() {
        let desc = SessionDescription::answer(SDP);
        let rtc = desc.to_rtc().unwrap();
        assert_eq!(rtc.sdp, SDP);
        assert_eq!(SessionDescription::from_rtc(&rtc).unwrap(), desc);
    }
}
