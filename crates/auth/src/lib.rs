//! `walletd-auth` — authentication boundary.
//!
//! Token signing/verification, password hashing and the login use-case. This
//! crate is decoupled from HTTP; user storage is reached through [`UserDirectory`].

pub mod claims;
pub mod login;
pub mod password;
pub mod token;

pub use claims::Claims;
pub use login::{AccessToken, DirectoryError, LoginError, LoginService, UserDirectory, UserRecord};
pub use password::{BcryptHasher, PasswordError, PasswordHasher};
pub use token::{HmacTokenManager, TokenError, TokenOptions, TokenSigner, TokenVerifier};
