//! Token-based identity.
//!
//! - [`TokenAuthority`] issues and verifies signed tokens using the active key
//!   from a shared [`KeyStore`](crate::keystore::KeyStore).
//! - [`Claims`] is the verified identity, carried through a request in its
//!   [`RequestContext`](crate::web::RequestContext).
//!
//! ## Usage
//!
//! ```ignore
//! let authority = TokenAuthority::new("k1", keystore.clone())?;
//! let token = authority.issue(&claims)?;
//!
//! let claims = authority.verify(parse_bearer(header_value)?)?;
//! if claims.authorized(&[ROLE_ADMIN]) { /* ... */ }
//! ```

mod authority;
mod claims;

pub use authority::{AuthError, SignatureAlgorithm, TokenAuthority};
pub use claims::{Claims, ROLE_ADMIN, ROLE_USER};

/// Extract the token from an `Authorization` header value.
///
/// The value must be exactly two space-separated parts, the first of which is
/// `bearer` in any letter case.
pub fn parse_bearer(header: &str) -> Result<&str, AuthError> {
    let parts: Vec<&str> = header.split(' ').collect();
    match parts.as_slice() {
        [scheme, token] if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => Ok(*token),
        _ => Err(AuthError::MalformedAuthHeader),
    }
}
