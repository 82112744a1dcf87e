//! Server configuration assembled from CLI flags and environment variables.

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string (Supabase pooler URLs work unmodified).
    pub database_url: String,
    /// Port the API server binds on.
    pub port: u16,
    /// HS256 secret for verifying bearer tokens. Unset means dev mode:
    /// tokens are decoded without signature verification.
    pub jwt_secret: Option<String>,
    /// Webhook endpoint for transactional mail. Unset disables mail.
    pub mailer_url: Option<String>,
    /// From address stamped on outgoing mail.
    pub mailer_from: String,
}

impl Config {
    /// CLI-provided values take precedence; everything else comes from the
    /// environment with sensible defaults.
    pub fn from_env(database_url: String, port: u16) -> Self {
        Self {
            database_url,
            port,
            jwt_secret: env_opt("HASHVAULT_JWT_SECRET"),
            mailer_url: env_opt("MAILER_URL"),
            mailer_from: std::env::var("MAILER_FROM")
                .unwrap_or_else(|_| "no-reply@hashvault.io".to_string()),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
