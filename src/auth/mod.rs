//! Bearer-token authentication.
//!
//! Every inbound request carries an OAuth2/OIDC bearer token, validated
//! offline against a cached JWKS document (no calls to the IdP's
//! introspection endpoint on the request path). A validated token becomes an
//! [`AuthenticatedPrincipal`], which the rest of the gateway treats as the
//! caller's identity for role checks and as the `subject_token` forwarded
//! into RFC 8693 token exchange.

pub mod jwks;
pub mod principal;

pub use jwks::{DEFAULT_CACHE_TTL_SECONDS, JwksCache, JwksCacheError, JwtClaims};
pub use principal::AuthenticatedPrincipal;
