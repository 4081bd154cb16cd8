//! # Auth Module
//!
//! Password and OAuth sign-in, server-side sessions and request rate
//! limiting.

pub mod crypto;
pub mod errors;
pub mod oauth;
pub mod password;
pub mod rate_limit;
pub mod security;
pub mod service;
pub mod session;

pub use errors::{AuthError, AuthResult};
pub use oauth::{
    InMemoryOAuthAccountRepository, OAuthAccount, OAuthAccountRepository, OAuthLogin, OAuthProvider,
    OAuthProviderConfig, OAuthService, OAuthTokenResponse, OAuthTransport, OAuthUserInfo, ReqwestTransport,
};
pub use rate_limit::{RateLimitDecision, RateLimitRule, RateLimiter};
pub use security::SecurityConfig;
pub use service::{AuthService, Credentials, Registration, SignedIn};
pub use session::{InMemorySessionStore, Session, SessionConfig, SessionManager, SessionStore, SessionValidation};
