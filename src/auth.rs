use anyhow::{Context, bail};
use axum::http::{HeaderMap, header};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const SESSION_COOKIE: &str = "chatbot_session";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
}

/// Verifies the HS256 session tokens issued by the login service.
#[derive(Clone)]
pub struct SessionVerifier {
    secret: Vec<u8>,
}

impl SessionVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let mut parts = token.split('.');
        let (Some(header_segment), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("malformed session token");
        };

        let header: TokenHeader = serde_json::from_slice(&decode_segment(header_segment)?)
            .context("invalid session token header")?;
        if header.alg != "HS256" {
            bail!("unsupported session token algorithm {}", header.alg);
        }

        let signature = decode_segment(signature)?;
        let mut mac = self.mac()?;
        mac.update(format!("{header_segment}.{payload}").as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| anyhow::anyhow!("session token signature mismatch"))?;

        let claims: SessionClaims = serde_json::from_slice(&decode_segment(payload)?)
            .context("invalid session token claims")?;
        if let Some(exp) = claims.exp {
            if exp <= Utc::now().timestamp() {
                bail!("session token expired");
            }
        }
        if claims.user_id.is_empty() {
            bail!("session token has no user");
        }
        Ok(claims)
    }

    /// Signs `claims` the way the login service does.
    pub fn issue(&self, claims: &SessionClaims) -> anyhow::Result<String> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let input = format!("{header}.{payload}");

        let mut mac = self.mac()?;
        mac.update(input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{input}.{signature}"))
    }

    fn mac(&self) -> anyhow::Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| anyhow::anyhow!("invalid session secret"))
    }
}

/// The session token from the `chatbot_session` cookie, or failing that an
/// `Authorization: Bearer` header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_owned());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
            .map(|token| token.trim().to_owned())
    })
}

fn decode_segment(segment: &str) -> anyhow::Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .context("session token is not base64url")
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, header};
    use chrono::Utc;

    use super::{SessionClaims, SessionVerifier, session_token};

    fn claims(exp: Option<i64>) -> SessionClaims {
        SessionClaims {
            user_id: "u1".to_owned(),
            session_id: "s1".to_owned(),
            phone: "+911234567890".to_owned(),
            exp,
        }
    }

    #[test]
    fn issued_tokens_verify_with_the_same_secret() {
        let verifier = SessionVerifier::new("secret");
        let token = verifier
            .issue(&claims(Some(Utc::now().timestamp() + 3600)))
            .expect("issue should succeed");

        let verified = verifier.verify(&token).expect("verify should succeed");
        assert_eq!(verified.user_id, "u1");
        assert_eq!(verified.session_id, "s1");
    }

    #[test]
    fn wrong_secret_and_tampering_are_rejected() {
        let token = SessionVerifier::new("secret")
            .issue(&claims(None))
            .expect("issue should succeed");

        assert!(SessionVerifier::new("other").verify(&token).is_err());

        let mut parts = token.split('.').map(str::to_owned).collect::<Vec<_>>();
        parts[1] = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            br#"{"userId":"u2"}"#,
        );
        assert!(SessionVerifier::new("secret").verify(&parts.join(".")).is_err());
        assert!(SessionVerifier::new("secret").verify("not-a-token").is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let verifier = SessionVerifier::new("secret");
        let token = verifier
            .issue(&claims(Some(Utc::now().timestamp() - 10)))
            .expect("issue should succeed");
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn cookie_wins_over_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(session_token(&headers).as_deref(), Some("from-header"));

        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; chatbot_session=from-cookie"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("from-cookie"));

        assert_eq!(session_token(&HeaderMap::new()), None);
    }
}
