//! Storage keys and backend contract strings

/// Token store key for the short-lived bearer token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Token store key for the long-lived refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

pub const REFRESH_PATH: &str = "/api/auth/token/refresh/";
pub const LOGIN_PATH: &str = "/api/auth/login/";
pub const REGISTER_PATH: &str = "/api/auth/register/";
pub const LOGOUT_PATH: &str = "/api/auth/logout/";
pub const ME_PATH: &str = "/api/auth/me/";

/// Prefix of the `detail` the backend sends with a 404 from the refresh
/// endpoint when the token's user was deleted. The backend exposes no error
/// code for this case, so the string itself is the contract.
pub const USER_NOT_FOUND_DETAIL: &str = "User associated with refresh token does not exist";
