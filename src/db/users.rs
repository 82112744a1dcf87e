//! User profiles: registration with referral codes, transaction PINs, and
//! the row-lock helper every balance-mutating operation starts from.

use super::referrals::recompute_level;
use super::{Database, ProfileLock, ProfileRow};
use crate::ledger::{self, LedgerError, Result};
use base64::prelude::*;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::{Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

/// Column list shared by every query that returns a [`ProfileRow`].
const PROFILE_COLS: &str = "user_id, email, role, referral_code, invited_by, referral_level, \
     wallet_balance_micros, tcoin_balance, total_power_ghs, total_earnings_micros, \
     saved_wallet_address, (pin_hash IS NOT NULL) AS has_pin, created_at";

/// Referral code alphabet avoids 0/O, 1/I/L lookalikes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 8;

fn generate_referral_code() -> String {
    let mut rng = rand::rngs::OsRng;
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    BASE64_STANDARD.encode(bytes)
}

fn hash_pin(salt: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(pin.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// Take the profile row lock that serializes balance mutations for one user.
pub(crate) async fn lock_profile(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<ProfileLock> {
    sqlx::query_as::<_, ProfileLock>(
        "SELECT invited_by, referral_level, tcoin_balance, total_power_ghs \
         FROM profiles WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(LedgerError::NotFound("profile"))
}

impl Database {
    /// Create the profile row for a freshly authenticated user. The caller
    /// supplies the identity (JWT subject); an optional invite code links
    /// the new account into the inviter's referral tree permanently, and
    /// the inviter's level is refreshed in the same transaction.
    pub async fn register_user(
        &self,
        user_id: Uuid,
        email: &str,
        invite_code: Option<&str>,
    ) -> Result<ProfileRow> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(LedgerError::validation("email", "not a valid address"));
        }
        let invited_by = match invite_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let inviter: Option<Uuid> =
                    sqlx::query_scalar("SELECT user_id FROM profiles WHERE referral_code = $1")
                        .bind(code)
                        .fetch_optional(&self.pool)
                        .await?;
                let inviter = inviter
                    .ok_or_else(|| LedgerError::validation("referral_code", "unknown code"))?;
                if inviter == user_id {
                    return Err(LedgerError::validation(
                        "referral_code",
                        "cannot use your own code",
                    ));
                }
                Some(inviter)
            }
            None => None,
        };

        // Collisions on the generated code are vanishingly rare; retry a
        // few times rather than pre-checking.
        for _ in 0..4 {
            let code = generate_referral_code();
            let mut tx = self.pool.begin().await?;
            let res = sqlx::query_as::<_, ProfileRow>(&format!(
                "INSERT INTO profiles (user_id, email, referral_code, invited_by) \
                 VALUES ($1, $2, $3, $4) RETURNING {PROFILE_COLS}"
            ))
            .bind(user_id)
            .bind(&email)
            .bind(&code)
            .bind(invited_by)
            .fetch_one(&mut *tx)
            .await;
            match res {
                Ok(row) => {
                    if let Some(inviter) = invited_by {
                        // The direct team just grew by one; headcount alone
                        // can cross a level threshold.
                        recompute_level(&mut tx, inviter).await?;
                    }
                    tx.commit().await?;
                    info!(user = %user_id, invited = invited_by.is_some(), "profile registered");
                    return Ok(row);
                }
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    tx.rollback().await?;
                    if e.constraint() == Some("profiles_referral_code_key") {
                        continue;
                    }
                    return Err(LedgerError::AlreadyExists("profile"));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LedgerError::validation(
            "referral_code",
            "could not allocate a unique code",
        ))
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<Option<ProfileRow>> {
        Ok(sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLS} FROM profiles WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Role for authorization decisions. Users without a profile yet are
    /// plain users.
    pub async fn get_user_role(&self, user_id: Uuid) -> Result<String> {
        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(role.unwrap_or_else(|| "user".to_string()))
    }

    pub async fn list_users(&self, limit: i64, offset: i64) -> Result<Vec<ProfileRow>> {
        Ok(sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLS} FROM profiles ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit.clamp(1, 200))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn count_users(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Set or change the six-digit transaction PIN. Changing an existing
    /// PIN requires the current one.
    pub async fn set_pin(
        &self,
        user_id: Uuid,
        new_pin: &str,
        current_pin: Option<&str>,
    ) -> Result<()> {
        ledger::validate_pin(new_pin)?;
        let mut tx = self.pool.begin().await?;
        let existing: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT pin_hash, pin_salt FROM profiles WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (hash, salt) = existing.ok_or(LedgerError::NotFound("profile"))?;
        if let (Some(hash), Some(salt)) = (hash, salt) {
            let current = current_pin.ok_or(LedgerError::PinInvalid)?;
            if hash_pin(&salt, current) != hash {
                return Err(LedgerError::PinInvalid);
            }
        }
        let salt = generate_salt();
        let hash = hash_pin(&salt, new_pin);
        sqlx::query(
            "UPDATE profiles SET pin_hash = $2, pin_salt = $3, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(hash)
        .bind(salt)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(user = %user_id, "transaction PIN updated");
        Ok(())
    }

    /// Check a PIN before a sensitive operation. Missing and mismatched
    /// PINs are distinct errors so the client can prompt appropriately.
    pub async fn verify_pin(&self, user_id: Uuid, pin: &str) -> Result<()> {
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT pin_hash, pin_salt FROM profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        match row.ok_or(LedgerError::NotFound("profile"))? {
            (Some(hash), Some(salt)) if hash_pin(&salt, pin) == hash => Ok(()),
            (Some(_), Some(_)) => Err(LedgerError::PinInvalid),
            _ => Err(LedgerError::PinNotSet),
        }
    }

    pub async fn set_saved_wallet_address(&self, user_id: Uuid, address: &str) -> Result<()> {
        let address = address.trim();
        if address.is_empty() || address.len() > 128 {
            return Err(LedgerError::validation(
                "wallet_address",
                "must be 1-128 characters",
            ));
        }
        let updated = sqlx::query(
            "UPDATE profiles SET saved_wallet_address = $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(address)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::NotFound("profile"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_codes_use_safe_alphabet() {
        for _ in 0..50 {
            let code = generate_referral_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn pin_hash_is_deterministic_and_salted() {
        let a = hash_pin("saltA", "123456");
        assert_eq!(a, hash_pin("saltA", "123456"));
        assert_ne!(a, hash_pin("saltB", "123456"));
        assert_ne!(a, hash_pin("saltA", "654321"));
    }

    #[test]
    fn salts_are_unique() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
