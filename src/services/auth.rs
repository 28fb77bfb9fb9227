use std::collections::HashMap;
use std::time::Duration;
use chrono::Utc;
use hyper::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tokio::sync::{OnceCell, RwLock};
use uuid::Uuid;
use crate::config::Config;
use crate::errors::GatewayError;
use crate::models::{AuthResponse, Claims, LoginRequest, PublicUser, RegisterRequest, Role, User};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_BYTES: usize = 72; // bcrypt ignores anything past this
const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// In-memory user table. Stands in for a database.
#[derive(Default)]
pub struct UserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new account. The first account becomes an admin.
    pub async fn create(
        &self,
        username: String,
        email: String,
        full_name: Option<String>,
        password_hash: String,
    ) -> Result<User, GatewayError> {
        let mut users = self.users.write().await;
        Self::ensure_unique(&users, &username, &email)?;

        let role = if users.is_empty() { Role::Admin } else { Role::User };
        let user = User {
            id: Uuid::new_v4(),
            username,
            email,
            full_name,
            role,
            password_hash,
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    pub async fn is_available(&self, username: &str, email: &str) -> Result<(), GatewayError> {
        let users = self.users.read().await;
        Self::ensure_unique(&users, username, email)
    }

    fn ensure_unique(users: &HashMap<Uuid, User>, username: &str, email: &str) -> Result<(), GatewayError> {
        for user in users.values() {
            if user.username.eq_ignore_ascii_case(username) {
                return Err(GatewayError::Conflict("Username already taken".to_string()));
            }
            if user.email.eq_ignore_ascii_case(email) {
                return Err(GatewayError::Conflict("Email already registered".to_string()));
            }
        }
        Ok(())
    }

    /// Look up by username or email, case-insensitively.
    pub async fn find_by_login(&self, login: &str) -> Option<User> {
        let users = self.users.read().await;
        users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(login) || u.email.eq_ignore_ascii_case(login))
            .cloned()
    }

    pub async fn get(&self, id: &Uuid) -> Option<User> {
        self.users.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        users
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

/// Registration, login and HS256 token handling.
pub struct AuthService {
    users: UserStore,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration: Duration,
    bcrypt_cost: u32,
    /// Hash at the configured cost, verified against when the login names no account.
    pub(crate) dummy_hash: OnceCell<String>,
}

impl AuthService {
    pub fn new(config: &Config) -> Self {
        Self {
            users: UserStore::new(),
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            expiration: config.jwt_expiration,
            bcrypt_cost: config.bcrypt_cost,
            dummy_hash: OnceCell::new(),
        }
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, GatewayError> {
        let username = request.username.trim().to_string();
        let email = request.email.trim().to_lowercase();
        let full_name = request
            .full_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        validate_username(&username)?;
        validate_email(&email)?;
        validate_password(&request.password)?;

        // Fail fast before paying for the hash; `create` re-checks under the write lock.
        self.users.is_available(&username, &email).await?;

        let password_hash = hash_password(request.password, self.bcrypt_cost).await?;
        let user = self.users.create(username, email, full_name, password_hash).await?;

        tracing::info!(user_id = %user.id, username = %user.username, role = ?user.role, "User registered");

        let token = self.issue_token(&user)?;
        Ok(AuthResponse {
            token,
            user: PublicUser::from(&user),
        })
    }

    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, GatewayError> {
        let login = request.username.trim();
        if login.is_empty() || request.password.is_empty() {
            return Err(GatewayError::BadRequest("Username and password are required".to_string()));
        }

        let user = match self.users.find_by_login(login).await {
            Some(user) => user,
            None => {
                // Unknown users cost one bcrypt verify, the same as a wrong password.
                let dummy = self
                    .dummy_hash
                    .get_or_try_init(|| hash_password(String::from("unknown-account"), self.bcrypt_cost))
                    .await?;
                verify_password(request.password, dummy.clone()).await?;
                tracing::warn!("Login failed: unknown user");
                return Err(GatewayError::BadRequest(INVALID_CREDENTIALS.to_string()));
            }
        };

        if !verify_password(request.password, user.password_hash.clone()).await? {
            tracing::warn!(user_id = %user.id, "Login failed: wrong password");
            return Err(GatewayError::BadRequest(INVALID_CREDENTIALS.to_string()));
        }

        tracing::info!(user_id = %user.id, "User logged in");

        let token = self.issue_token(&user)?;
        Ok(AuthResponse {
            token,
            user: PublicUser::from(&user),
        })
    }

    pub fn issue_token(&self, user: &User) -> Result<String, GatewayError> {
        let now = Utc::now().timestamp();
        let exp = i64::try_from(self.expiration.as_secs())
            .ok()
            .and_then(|secs| now.checked_add(secs))
            .ok_or_else(|| GatewayError::Internal("token expiration out of range".to_string()))?;
        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            iat: now,
            exp,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, "Failed to sign token");
            GatewayError::Internal(e.to_string())
        })
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, GatewayError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token rejected");
                GatewayError::Unauthorized("Invalid or expired token".to_string())
            })
    }

    /// Resolve the account a verified token belongs to.
    pub async fn current_user(&self, claims: &Claims) -> Result<User, GatewayError> {
        let id = Uuid::parse_str(&claims.sub)
            .map_err(|_| GatewayError::Unauthorized("Invalid token subject".to_string()))?;
        self.users
            .get(&id)
            .await
            .ok_or_else(|| GatewayError::NotFound("User not found".to_string()))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, GatewayError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| GatewayError::Unauthorized("No token provided".to_string()))?;
    let value = value
        .to_str()
        .map_err(|_| GatewayError::Unauthorized("Malformed authorization header".to_string()))?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(GatewayError::Unauthorized("Malformed authorization header".to_string())),
    }
}

pub fn require_role(claims: &Claims, role: Role) -> Result<(), GatewayError> {
    if claims.role >= role {
        Ok(())
    } else {
        Err(GatewayError::Forbidden("Insufficient permissions".to_string()))
    }
}

async fn hash_password(password: String, cost: u32) -> Result<String, GatewayError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to hash password");
            GatewayError::Internal(e.to_string())
        })
}

async fn verify_password(password: String, hash: String) -> Result<bool, GatewayError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?
        .map_err(|e| {
            tracing::error!(error = %e, "Stored password hash is unreadable");
            GatewayError::Internal(e.to_string())
        })
}

fn validate_username(username: &str) -> Result<(), GatewayError> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(GatewayError::BadRequest(
            "Username must be between 3 and 32 characters".to_string(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(GatewayError::BadRequest(
            "Username may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), GatewayError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(GatewayError::BadRequest("Invalid email address".to_string()))
    }
}

fn validate_password(password: &str) -> Result<(), GatewayError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(GatewayError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(GatewayError::BadRequest(format!(
            "Password must be at most {} bytes",
            MAX_PASSWORD_BYTES
        )));
    }
    Ok(())
}
