//! Bearer-token authentication for the admin API.

pub mod extractor;
pub mod jwt;
pub mod layer;
pub mod types;

pub use extractor::{AdminAuth, Auth};
pub use jwt::TokenService;
pub use layer::{authenticate, AuthLayer, AuthMiddleware};
pub use types::{AccessToken, AuthUser, Claims, TokenPair, TokenType, ISSUER};
