use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};

/// Decode the payload segment of a compact JWT without verifying the
/// signature.
///
/// This establishes *display* identity only and must never be treated as a
/// trust boundary; any authorization decision is re-validated server-side.
/// Anything other than a well-formed three-segment token with a base64url
/// JSON-object payload yields `None`, never an error and never a partial
/// object.
pub fn decode(token: &str) -> Option<Map<String, Value>> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    // Tokens are unpadded base64url, but some issuers pad anyway.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let json = std::str::from_utf8(&bytes).ok()?;

    match serde_json::from_str::<Value>(json).ok()? {
        Value::Object(claims) => Some(claims),
        _ => None,
    }
}

/// First present claim among `names`, coerced to a string. Subjects arrive
/// as JSON numbers from some backends.
pub fn string_claim(claims: &Map<String, Value>, names: &[&str]) -> Option<String> {
    for name in names {
        match claims.get(*name) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;

    fn fake_token(payload: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.as_bytes());
        format!("{header}.{body}.sig")
    }

    #[test]
    fn decode_returns_original_claims() {
        let claims = json!({"sub": "u1", "username": "alice", "exp": 1_999_999_999});
        let token = fake_token(&claims.to_string());

        let decoded = decode(&token).expect("valid token");
        assert_eq!(Value::Object(decoded), claims);
    }

    #[test]
    fn decode_round_trips_a_signed_token() {
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &json!({"userId": 42, "username": "bob", "exp": 1_999_999_999}),
            &jsonwebtoken::EncodingKey::from_secret(b"secret"),
        )
        .expect("encode");

        let decoded = decode(&token).expect("valid token");
        assert_eq!(decoded.get("username"), Some(&json!("bob")));
        assert_eq!(string_claim(&decoded, &["userId", "sub"]), Some("42".into()));
    }

    #[test]
    fn decode_rejects_wrong_segment_count() {
        assert!(decode("").is_none());
        assert!(decode("onlyone").is_none());
        assert!(decode("two.parts").is_none());
        assert!(decode("a.b.c.d").is_none());
    }

    #[test]
    fn decode_rejects_bad_base64() {
        assert!(decode("h.!!!not-base64!!!.s").is_none());
    }

    #[test]
    fn decode_rejects_bad_json() {
        let token = fake_token("{not json");
        assert!(decode(&token).is_none());

        // Well-formed JSON that is not an object is also rejected whole.
        let token = fake_token("[1,2,3]");
        assert!(decode(&token).is_none());
    }

    #[test]
    fn string_claim_prefers_first_present_name() {
        let claims = decode(&fake_token(r#"{"sub":"s1","id":"i1"}"#)).unwrap();
        assert_eq!(string_claim(&claims, &["userId", "sub", "id"]), Some("s1".into()));
        assert_eq!(string_claim(&claims, &["missing"]), None);
    }
}
