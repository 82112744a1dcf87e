//! Device catalog and rentals: purchase, admin gifting, renewal, and the
//! background sweep that retires lapsed rentals.
//!
//! Power accounting is cached on the profile: a purchase or gift adds the
//! device's GH/s to `total_power_ghs`, the sweep subtracts it when the
//! rental lapses, and a late renewal adds it back.

use super::referrals::{cascade_referral, recompute_level, CascadeTrigger};
use super::users::lock_profile;
use super::wallet::{post_completed, Posting};
use super::{
    Database, DeviceRow, GiftOutcome, PurchaseOutcome, RenewOutcome, UserDeviceRow,
};
use crate::ledger::{LedgerError, Result, TxType};
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

const DEVICE_COLS: &str =
    "id, name, power_ghs, price_micros, rental_period_days, is_promo, is_active, created_at";

const USER_DEVICE_COLS: &str = "ud.id, ud.user_id, ud.device_id, d.name AS device_name, \
     d.power_ghs, ud.status, ud.is_rental_active, ud.gifted, ud.purchased_at, ud.rental_expires_at";

fn validate_device(name: &str, power_ghs: i64, price_micros: i64, period_days: i32) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::validation("name", "must not be empty"));
    }
    if power_ghs <= 0 {
        return Err(LedgerError::validation("power_ghs", "must be positive"));
    }
    if price_micros < 0 {
        return Err(LedgerError::validation("price_micros", "must not be negative"));
    }
    if period_days <= 0 {
        return Err(LedgerError::validation(
            "rental_period_days",
            "must be positive",
        ));
    }
    Ok(())
}

impl Database {
    pub async fn list_devices(&self, include_inactive: bool) -> Result<Vec<DeviceRow>> {
        let sql = if include_inactive {
            format!("SELECT {DEVICE_COLS} FROM devices ORDER BY price_micros, id")
        } else {
            format!("SELECT {DEVICE_COLS} FROM devices WHERE is_active ORDER BY price_micros, id")
        };
        Ok(sqlx::query_as::<_, DeviceRow>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn create_device(
        &self,
        name: &str,
        power_ghs: i64,
        price_micros: i64,
        rental_period_days: i32,
        is_promo: bool,
        is_active: bool,
    ) -> Result<DeviceRow> {
        validate_device(name, power_ghs, price_micros, rental_period_days)?;
        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            "INSERT INTO devices (name, power_ghs, price_micros, rental_period_days, \
             is_promo, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {DEVICE_COLS}"
        ))
        .bind(name.trim())
        .bind(power_ghs)
        .bind(price_micros)
        .bind(rental_period_days)
        .bind(is_promo)
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?;
        info!(device = row.id, name = %row.name, "device created");
        Ok(row)
    }

    /// Full replace of a catalog entry. Existing rentals keep the power
    /// they were sold with — the cached profile power is not rewritten
    /// retroactively.
    pub async fn update_device(
        &self,
        id: i64,
        name: &str,
        power_ghs: i64,
        price_micros: i64,
        rental_period_days: i32,
        is_promo: bool,
        is_active: bool,
    ) -> Result<DeviceRow> {
        validate_device(name, power_ghs, price_micros, rental_period_days)?;
        sqlx::query_as::<_, DeviceRow>(&format!(
            "UPDATE devices \
             SET name = $2, power_ghs = $3, price_micros = $4, rental_period_days = $5, \
                 is_promo = $6, is_active = $7 \
             WHERE id = $1 RETURNING {DEVICE_COLS}"
        ))
        .bind(id)
        .bind(name.trim())
        .bind(power_ghs)
        .bind(price_micros)
        .bind(rental_period_days)
        .bind(is_promo)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound("device"))
    }

    /// Rent a device: debit the wallet, add its power, open the rental,
    /// and pay the referral cascade — all in one transaction.
    pub async fn purchase_device(&self, user_id: Uuid, device_id: i64) -> Result<PurchaseOutcome> {
        let mut tx = self.pool.begin().await?;
        let device = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {DEVICE_COLS} FROM devices WHERE id = $1 AND is_active"
        ))
        .bind(device_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::NotFound("device"))?;

        // Serializes concurrent purchases by one user and pins invited_by
        // for the post-commit level recompute.
        let profile = lock_profile(&mut tx, user_id).await?;

        let notes = format!("purchase: {}", device.name);
        let (tx_id, new_balance_micros) = post_completed(
            &mut tx,
            Posting::new(user_id, TxType::Purchase, device.price_micros).notes(&notes),
        )
        .await?;

        sqlx::query(
            "UPDATE profiles SET total_power_ghs = total_power_ghs + $2, updated_at = NOW() \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(device.power_ghs)
        .execute(&mut *tx)
        .await?;

        let (rental_id, rental_expires_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO user_devices (user_id, device_id, rental_expires_at) \
             VALUES ($1, $2, NOW() + make_interval(days => $3)) \
             RETURNING id, rental_expires_at",
        )
        .bind(user_id)
        .bind(device_id)
        .bind(device.rental_period_days)
        .fetch_one(&mut *tx)
        .await?;

        cascade_referral(&mut tx, user_id, device.price_micros, CascadeTrigger::Purchase).await?;
        if let Some(inviter) = profile.invited_by {
            // The buyer's power grew, which may push the inviter over a
            // team-power threshold.
            recompute_level(&mut tx, inviter).await?;
        }
        tx.commit().await?;
        info!(
            user = %user_id,
            device = device_id,
            rental = rental_id,
            price_micros = device.price_micros,
            "device purchased"
        );
        Ok(PurchaseOutcome {
            rental_id,
            tx_id,
            power_ghs: device.power_ghs,
            new_balance_micros,
            rental_expires_at,
        })
    }

    /// Admin grant of a device at no charge. No transaction row and no
    /// referral cascade; the power still counts toward the inviter's team.
    pub async fn gift_device(&self, user_id: Uuid, device_id: i64) -> Result<GiftOutcome> {
        let mut tx = self.pool.begin().await?;
        let device = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {DEVICE_COLS} FROM devices WHERE id = $1"
        ))
        .bind(device_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::NotFound("device"))?;
        let profile = lock_profile(&mut tx, user_id).await?;

        sqlx::query(
            "UPDATE profiles SET total_power_ghs = total_power_ghs + $2, updated_at = NOW() \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(device.power_ghs)
        .execute(&mut *tx)
        .await?;
        let (rental_id, rental_expires_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO user_devices (user_id, device_id, gifted, rental_expires_at) \
             VALUES ($1, $2, TRUE, NOW() + make_interval(days => $3)) \
             RETURNING id, rental_expires_at",
        )
        .bind(user_id)
        .bind(device_id)
        .bind(device.rental_period_days)
        .fetch_one(&mut *tx)
        .await?;
        if let Some(inviter) = profile.invited_by {
            recompute_level(&mut tx, inviter).await?;
        }
        tx.commit().await?;
        info!(user = %user_id, device = device_id, rental = rental_id, "device gifted");
        Ok(GiftOutcome {
            rental_id,
            power_ghs: device.power_ghs,
            rental_expires_at,
        })
    }

    /// Renew a rental at the device's current price. Only allowed inside
    /// the renewal window (or after expiry); renewing a lapsed rental
    /// revives it and re-credits the power the sweep removed.
    pub async fn renew_rental(&self, user_id: Uuid, rental_id: i64) -> Result<RenewOutcome> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT ud.rental_expires_at, ud.is_rental_active, \
                    d.name, d.power_ghs, d.price_micros, d.rental_period_days \
             FROM user_devices ud JOIN devices d ON d.id = ud.device_id \
             WHERE ud.id = $1 AND ud.user_id = $2 FOR UPDATE OF ud",
        )
        .bind(rental_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::NotFound("rental"))?;
        let expires_at: DateTime<Utc> = row.try_get("rental_expires_at")?;
        let was_active: bool = row.try_get("is_rental_active")?;
        let name: String = row.try_get("name")?;
        let power_ghs: i64 = row.try_get("power_ghs")?;
        let price_micros: i64 = row.try_get("price_micros")?;
        let period_days: i32 = row.try_get("rental_period_days")?;

        let window_days =
            super::settings::setting_i64(&mut *tx, "renewal_window_days", 3).await?;
        let renewable_from = expires_at - Duration::days(window_days);
        if Utc::now() < renewable_from {
            return Err(LedgerError::RenewalNotDue { renewable_from });
        }

        let notes = format!("renewal: {name}");
        let (tx_id, new_balance_micros) = post_completed(
            &mut tx,
            Posting::new(user_id, TxType::RentalRenewal, price_micros).notes(&notes),
        )
        .await?;

        // Extending from GREATEST(expiry, now) means an early renewal
        // stacks onto the remaining time while a late one restarts today.
        let rental_expires_at: DateTime<Utc> = sqlx::query_scalar(
            "UPDATE user_devices \
             SET rental_expires_at = GREATEST(rental_expires_at, NOW()) \
                     + make_interval(days => $2), \
                 is_rental_active = TRUE, status = 'active' \
             WHERE id = $1 RETURNING rental_expires_at",
        )
        .bind(rental_id)
        .bind(period_days)
        .fetch_one(&mut *tx)
        .await?;
        if !was_active {
            sqlx::query(
                "UPDATE profiles SET total_power_ghs = total_power_ghs + $2, updated_at = NOW() \
                 WHERE user_id = $1",
            )
            .bind(user_id)
            .bind(power_ghs)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!(user = %user_id, rental = rental_id, revived = !was_active, "rental renewed");
        Ok(RenewOutcome {
            rental_id,
            tx_id,
            new_balance_micros,
            rental_expires_at,
        })
    }

    pub async fn list_user_devices(&self, user_id: Uuid) -> Result<Vec<UserDeviceRow>> {
        Ok(sqlx::query_as::<_, UserDeviceRow>(&format!(
            "SELECT {USER_DEVICE_COLS} FROM user_devices ud \
             JOIN devices d ON d.id = ud.device_id \
             WHERE ud.user_id = $1 ORDER BY ud.purchased_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Retire every rental past its expiry and subtract the lost power
    /// from the owners' cached totals. One statement, so a crash can never
    /// leave a rental retired but its power still counted.
    pub async fn sweep_expired_rentals(&self) -> Result<i64> {
        let swept: i64 = sqlx::query_scalar(
            "WITH expired AS ( \
                 UPDATE user_devices ud \
                 SET is_rental_active = FALSE, status = 'completed' \
                 FROM devices d \
                 WHERE d.id = ud.device_id AND ud.is_rental_active \
                   AND ud.rental_expires_at < NOW() \
                 RETURNING ud.user_id, d.power_ghs \
             ), losses AS ( \
                 SELECT user_id, SUM(power_ghs)::BIGINT AS lost \
                 FROM expired GROUP BY user_id \
             ), debited AS ( \
                 UPDATE profiles p \
                 SET total_power_ghs = GREATEST(p.total_power_ghs - l.lost, 0), \
                     updated_at = NOW() \
                 FROM losses l WHERE p.user_id = l.user_id \
                 RETURNING p.user_id \
             ) SELECT COUNT(*)::BIGINT FROM expired",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(swept)
    }
}
