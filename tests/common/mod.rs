//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;
use uuid::Uuid;

use hashvault::db::Database;

/// HS256 secret used to sign test tokens; the test app verifies with the same.
pub const TEST_JWT_SECRET: &str = "hashvault-test-secret";

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// One-time schema initialization.
static SCHEMA_INIT: Once = Once::new();

/// Ensure the test database schema is set up (runs migrations once per test suite).
pub fn ensure_schema() {
    SCHEMA_INIT.call_once(|| {
        // Run on a dedicated thread: building a runtime (and block_on) inside
        // the caller's tokio runtime panics.
        std::thread::spawn(|| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let db = Database::connect(&test_db_url()).await.unwrap();
                db.migrate().await.unwrap();
            });
        })
        .join()
        .unwrap();
    });
}

/// Connect to the test database (also ensures schema is set up).
pub async fn setup_test_db() -> Database {
    ensure_schema();
    let db = Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    reset_tables(db.pool()).await;
    db
}

/// Build an Axum test app router connected to the test database. Returns the
/// database handle alongside so tests can arrange fixtures directly.
pub async fn build_test_app() -> (axum::Router, Database) {
    let db = setup_test_db().await;
    let config = hashvault::config::Config {
        database_url: test_db_url(),
        port: 0,
        jwt_secret: Some(TEST_JWT_SECRET.to_string()),
        mailer_url: None,
        mailer_from: "test@hashvault.io".to_string(),
    };
    let state = hashvault::api::AppState::new(db.clone(), &config);
    (hashvault::api::build_router(state), db)
}

/// Truncate mutable tables and restore seeded configuration, so each test
/// starts from launch state.
pub async fn reset_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql(
        "TRUNCATE TABLE wheel_spins, transactions, user_tasks, user_devices,
                       announcements, task_durations, tasks, devices, profiles
         CASCADE",
    )
    .execute(pool)
    .await
    .unwrap();

    // Restore launch settings (tests tweak rates and minimums)
    sqlx::raw_sql(
        "INSERT INTO app_settings (key, value) VALUES
          ('referral_purchase_l1_bps', '500'),
          ('referral_purchase_l2_bps', '300'),
          ('referral_task_l1_bps',     '300'),
          ('referral_task_l2_bps',     '100'),
          ('tcoin_per_usdc',           '100'),
          ('tcoin_min_conversion',     '100'),
          ('wheel_daily_spins',        '3'),
          ('wheel_prizes',             '5:40,10:30,20:15,50:10,100:5'),
          ('renewal_window_days',      '3'),
          ('withdrawal_min_micros',    '10000000'),
          ('deposit_wallet_address',   '')
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
    )
    .execute(pool)
    .await
    .unwrap();

    // Restore launch level ladder (tests retune thresholds)
    sqlx::raw_sql(
        "INSERT INTO referral_levels (level, rank, min_direct_referrals, min_team_power_ghs, monthly_salary_micros) VALUES
          ('starter',  0,   0,       0,          0),
          ('bronze',   1,   3,   10000,   10000000),
          ('silver',   2,  10,   50000,   50000000),
          ('gold',     3,  25,  200000,  200000000),
          ('platinum', 4,  50,  500000,  500000000),
          ('diamond',  5, 100, 1500000, 1500000000)
         ON CONFLICT (level) DO UPDATE SET
           rank = EXCLUDED.rank,
           min_direct_referrals = EXCLUDED.min_direct_referrals,
           min_team_power_ghs = EXCLUDED.min_team_power_ghs,
           monthly_salary_micros = EXCLUDED.monthly_salary_micros",
    )
    .execute(pool)
    .await
    .unwrap();
}

// ── Fixtures ────────────────────────────────────────────────────

/// Register a fresh user with a unique email; returns the profile.
pub async fn register(db: &Database, invite_code: Option<&str>) -> hashvault::db::ProfileRow {
    let user_id = Uuid::new_v4();
    let email = format!("user-{user_id}@test.hashvault.io");
    db.register_user(user_id, &email, invite_code).await.unwrap()
}

/// Credit a user's wallet through the ledger (admin credit).
pub async fn fund(db: &Database, user_id: Uuid, amount_micros: i64) {
    db.admin_credit(user_id, amount_micros, Some("test funding"))
        .await
        .unwrap();
}

/// Promote a user to admin role.
pub async fn make_admin(db: &Database, user_id: Uuid) {
    sqlx::query("UPDATE profiles SET role = 'admin' WHERE user_id = $1")
        .bind(user_id)
        .execute(db.pool())
        .await
        .unwrap();
}

/// Set a user's transaction PIN directly through the public API.
pub async fn set_pin(db: &Database, user_id: Uuid, pin: &str) {
    db.set_pin(user_id, pin, None).await.unwrap();
}

/// Backdate a task run so it becomes claimable immediately.
pub async fn make_run_claimable(db: &Database, run_id: i64) {
    sqlx::query(
        "UPDATE user_tasks SET started_at = started_at - INTERVAL '30 days',
                               ends_at = NOW() - INTERVAL '1 hour'
         WHERE id = $1",
    )
    .bind(run_id)
    .execute(db.pool())
    .await
    .unwrap();
}

/// Move a rental's expiry so it falls inside (or outside) the renewal window.
pub async fn set_rental_expiry_days_from_now(db: &Database, rental_id: i64, days: i32) {
    sqlx::query(
        "UPDATE user_devices SET rental_expires_at = NOW() + make_interval(days => $2)
         WHERE id = $1",
    )
    .bind(rental_id)
    .bind(days)
    .execute(db.pool())
    .await
    .unwrap();
}

/// Mint a signed bearer token for a user, accepted by the test app.
pub fn make_token(user_id: Uuid) -> String {
    #[derive(serde::Serialize)]
    struct TestClaims {
        sub: String,
        aud: &'static str,
        role: &'static str,
        exp: i64,
    }
    let claims = TestClaims {
        sub: user_id.to_string(),
        aud: "authenticated",
        role: "authenticated",
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}
