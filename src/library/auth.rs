use rand::Rng;
use rand_distr::Alphanumeric;

const TOKEN_LENGTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthTokenValue(pub String);

impl AuthTokenValue {
    pub fn generate() -> AuthTokenValue {
        let random_string: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        AuthTokenValue(random_string)
    }

    /// Accepts both a bare token and the `Bearer <token>` form.
    pub fn from_header(raw: &str) -> Option<AuthTokenValue> {
        let raw = raw.trim();
        let token = raw
            .strip_prefix("Bearer ")
            .or_else(|| raw.strip_prefix("bearer "))
            .unwrap_or(raw)
            .trim();
        if token.is_empty() {
            None
        } else {
            Some(AuthTokenValue(token.to_string()))
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthToken {
    pub user_id: usize,
    pub value: AuthTokenValue,
    pub created: i64,
    pub last_used: Option<i64>,
}
