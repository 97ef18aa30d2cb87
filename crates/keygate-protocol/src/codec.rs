//! Reading claims out of compact tokens.
//!
//! Identity provider client libraries hand over the access token as a
//! compact JWT (`header.payload.signature`, each segment base64url). The
//! session layer needs the payload as [`Claims`]. Verifying the signature is
//! the provider's and the backend's job, not ours, so the codec only
//! decodes.
//!
//! [`CompactJwt`] can also *build* unsigned tokens (`alg: none`). That exists
//! for the in-memory identity provider and for tests; nothing should accept
//! such a token as proof of anything.

use crate::{Claims, ProtocolError};

/// Converts between compact token strings and [`Claims`].
pub trait TokenCodec: Send + Sync + 'static {
    /// Extracts the claims from a token without verifying it.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MalformedToken`] for a token that doesn't
    /// have three segments or whose payload isn't base64url, and
    /// `ProtocolError::Decode` when the payload isn't a JSON object.
    fn decode_claims(&self, token: &str) -> Result<Claims, ProtocolError>;

    /// Produces an unsigned token carrying `claims`.
    fn encode_unsigned(&self, claims: &Claims) -> Result<String, ProtocolError>;
}

// ---------------------------------------------------------------------------
// CompactJwt
// ---------------------------------------------------------------------------

/// A [`TokenCodec`] for the JWS compact serialization.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactJwt;

#[cfg(feature = "json")]
impl TokenCodec for CompactJwt {
    fn decode_claims(&self, token: &str) -> Result<Claims, ProtocolError> {
        use base64::Engine as _;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let mut segments = token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return Err(ProtocolError::MalformedToken(
                "expected three dot-separated segments".into(),
            ));
        };

        // Some encoders pad anyway. The no-pad engine rejects '=', so strip it.
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| ProtocolError::MalformedToken(format!("payload is not base64url: {e}")))?;

        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(&bytes).map_err(ProtocolError::Decode)?;
        Ok(Claims::from(map))
    }

    fn encode_unsigned(&self, claims: &Claims) -> Result<String, ProtocolError> {
        use base64::Engine as _;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = serde_json::to_vec(claims).map_err(ProtocolError::Encode)?;
        let payload = URL_SAFE_NO_PAD.encode(payload);
        // Empty third segment: there is no signature.
        Ok(format!("{header}.{payload}."))
    }
}
