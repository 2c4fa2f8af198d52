//! Authentication (RFC 2326 §D.2, RFC 7617, RFC 7616).
//!
//! Credentials come from the userinfo part of the camera URL and are only
//! sent after the camera answers `401`. When the camera offers both Digest
//! and Basic, Digest is used.

use base64::prelude::{BASE64_STANDARD, Engine as _};
use digest_auth::{AuthContext, HttpMethod, WwwAuthenticateHeader};

/// Username/password taken from the camera URL.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Value for the `Authorization` header.
    pub fn basic_authorization(&self) -> String {
        let token = BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", token)
    }
}

/// Scheme selected from a `401` challenge. Produces the `Authorization`
/// value for every later request on the connection.
pub enum Authenticator {
    Basic(String),
    Digest {
        credentials: Credentials,
        challenge: WwwAuthenticateHeader,
    },
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.scheme())
    }
}

impl Authenticator {
    /// Pick a scheme from the camera's `WWW-Authenticate` values.
    ///
    /// A malformed Digest challenge falls back to Basic when that is also
    /// offered. Returns the reason when neither is usable.
    pub fn from_challenges<'a>(
        credentials: &Credentials,
        challenges: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, String> {
        let mut basic = false;
        let mut digest = None;
        for challenge in challenges {
            let challenge = challenge.trim();
            match challenge.split_whitespace().next() {
                Some(scheme) if scheme.eq_ignore_ascii_case("digest") && digest.is_none() => {
                    match digest_auth::parse(challenge) {
                        Ok(parsed) => digest = Some(parsed),
                        Err(e) => tracing::debug!(error = %e, "ignoring malformed Digest challenge"),
                    }
                }
                Some(scheme) if scheme.eq_ignore_ascii_case("basic") => basic = true,
                _ => {}
            }
        }

        match digest {
            Some(challenge) => Ok(Self::Digest {
                credentials: credentials.clone(),
                challenge,
            }),
            None if basic => Ok(Self::Basic(credentials.basic_authorization())),
            None => Err("camera offers neither Digest nor Basic authentication".into()),
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Basic(_) => "Basic",
            Self::Digest { .. } => "Digest",
        }
    }

    /// `Authorization` value for one request. Digest responses depend on
    /// the method and URI and advance the nonce count.
    pub fn authorize(&mut self, method: &str, uri: &str) -> Result<String, digest_auth::Error> {
        match self {
            Self::Basic(value) => Ok(value.clone()),
            Self::Digest {
                credentials,
                challenge,
            } => {
                let context = AuthContext::new_with_method(
                    &credentials.username,
                    &credentials.password,
                    uri,
                    Option::<&'static [u8]>::None,
                    HttpMethod::from(method),
                );
                Ok(challenge.respond(&context)?.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Credentials {
        Credentials {
            username: "admin".into(),
            password: "secret".into(),
        }
    }

    #[test]
    fn basic_header_value() {
        assert_eq!(admin().basic_authorization(), "Basic YWRtaW46c2VjcmV0");
    }

    #[test]
    fn basic_only_challenge() {
        let mut auth = Authenticator::from_challenges(&admin(), ["Basic realm=\"cam\""]).unwrap();
        assert_eq!(auth.scheme(), "Basic");
        assert_eq!(
            auth.authorize("DESCRIBE", "rtsp://10.0.0.2/live").unwrap(),
            "Basic YWRtaW46c2VjcmV0"
        );
    }

    #[test]
    fn digest_preferred_over_basic() {
        let auth = Authenticator::from_challenges(
            &admin(),
            ["basic realm=\"cam\"", "Digest realm=\"cam\", nonce=\"abc123\""],
        )
        .unwrap();
        assert_eq!(auth.scheme(), "Digest");
    }

    #[test]
    fn digest_response_without_qop() {
        let mut auth =
            Authenticator::from_challenges(&admin(), ["Digest realm=\"cam\", nonce=\"abc123\""])
                .unwrap();
        let value = auth.authorize("DESCRIBE", "rtsp://10.0.0.2/live").unwrap();
        assert!(value.starts_with("Digest "), "{value}");
        assert!(value.contains("username=\"admin\""), "{value}");
        assert!(value.contains("realm=\"cam\""), "{value}");
        assert!(value.contains("nonce=\"abc123\""), "{value}");
        assert!(value.contains("uri=\"rtsp://10.0.0.2/live\""), "{value}");
        // MD5(MD5(admin:cam:secret):abc123:MD5(DESCRIBE:rtsp://10.0.0.2/live))
        assert!(
            value.contains("response=\"e2e55e0aa5e995ecf05aeaa435b1485b\""),
            "{value}"
        );
    }

    #[test]
    fn digest_qop_advances_nonce_count() {
        let mut auth = Authenticator::from_challenges(
            &admin(),
            ["Digest realm=\"cam\", nonce=\"n1\", qop=\"auth\""],
        )
        .unwrap();
        let first = auth.authorize("DESCRIBE", "rtsp://10.0.0.2/live").unwrap();
        let second = auth.authorize("SETUP", "rtsp://10.0.0.2/live/trackID=1").unwrap();
        assert!(first.contains("nc=00000001"), "{first}");
        assert!(second.contains("nc=00000002"), "{second}");
        assert!(second.contains("uri=\"rtsp://10.0.0.2/live/trackID=1\""), "{second}");
    }

    #[test]
    fn unusable_challenges() {
        assert!(Authenticator::from_challenges(&admin(), ["Bearer realm=\"x\""]).is_err());
        assert!(Authenticator::from_challenges(&admin(), []).is_err());
    }

    #[test]
    fn debug_redacts_password() {
        assert!(!format!("{:?}", admin()).contains("secret"));
        let auth = Authenticator::from_challenges(&admin(), ["Basic realm=\"cam\""]).unwrap();
        assert_eq!(format!("{:?}", auth), "Basic");
    }
}
