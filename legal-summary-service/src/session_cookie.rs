//! Signed session cookie.
//!
//! The cookie value is `<session id>.<base64url(HMAC-SHA256(secret, session id))>`;
//! a value whose signature does not verify is treated as no cookie at all.

use axum::http::{HeaderMap, HeaderValue, header};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac, digest::InvalidLength};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "session";

/// Session id resolved for the current request.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionId {
    pub id: String,
    /// True when the request carried no valid cookie and one must be set.
    pub is_new: bool,
}

pub struct CookieSigner {
    keyed: HmacSha256,
}

impl CookieSigner {
    pub fn new(secret: &str) -> Result<Self, InvalidLength> {
        Ok(Self {
            keyed: HmacSha256::new_from_slice(secret.as_bytes())?,
        })
    }

    fn mac(&self) -> HmacSha256 {
        self.keyed.clone()
    }

    pub fn sign(&self, session_id: &str) -> String {
        let mut mac = self.mac();
        mac.update(session_id.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{session_id}.{signature}")
    }

    /// Returns the session id when `value` carries a valid signature.
    pub fn verify(&self, value: &str) -> Option<String> {
        let (session_id, signature) = value.rsplit_once('.')?;
        Uuid::parse_str(session_id).ok()?;

        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        let mut mac = self.mac();
        mac.update(session_id.as_bytes());
        mac.verify_slice(&signature).ok()?;

        Some(session_id.to_string())
    }

    /// Resolve the session for a request, minting a new id when needed.
    pub fn resolve(&self, headers: &HeaderMap) -> SessionId {
        match cookie_value(headers, COOKIE_NAME).and_then(|v| self.verify(&v)) {
            Some(id) => SessionId { id, is_new: false },
            None => SessionId {
                id: Uuid::new_v4().to_string(),
                is_new: true,
            },
        }
    }

    pub fn set_cookie_header(&self, session_id: &str) -> Option<HeaderValue> {
        let cookie = format!(
            "{COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax",
            self.sign(session_id)
        );
        HeaderValue::from_str(&cookie).ok()
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
