//! Coupon evaluation and redemption.
//!
//! Evaluation is a pure function over a coupon snapshot; it never mutates
//! the usage count. The count is incremented only by `redeem`, called from
//! payment reconciliation when an order reaches PAID, so concurrent
//! checkouts racing a near-exhausted coupon are serialized at commit time.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::instrument;

use crate::{
    errors::{CouponError, ServiceError},
    models::{Coupon, DiscountRule},
};

/// Validates `coupon` against an order subtotal at time `now` and returns
/// the discount in minor units, clamped so the total never goes negative.
pub fn evaluate(coupon: &Coupon, subtotal: i64, now: DateTime<Utc>) -> Result<i64, CouponError> {
    if now > coupon.expires_at {
        return Err(CouponError::Expired);
    }
    if subtotal < coupon.min_subtotal {
        return Err(CouponError::BelowMinimum {
            min_subtotal: coupon.min_subtotal,
            subtotal,
        });
    }
    if coupon.usage_count >= coupon.usage_limit {
        return Err(CouponError::UsageExhausted);
    }

    let discount = match coupon.rule {
        DiscountRule::Percentage { percent } => subtotal * i64::from(percent.min(100)) / 100,
        DiscountRule::Fixed { amount } => amount,
    };
    Ok(discount.clamp(0, subtotal))
}

#[derive(Default)]
pub struct CouponService {
    coupons: DashMap<String, Coupon>,
}

impl CouponService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, coupon: Coupon) {
        self.coupons.insert(coupon.code.clone(), coupon);
    }

    pub fn get(&self, code: &str) -> Option<Coupon> {
        self.coupons.get(code).map(|c| c.clone())
    }

    /// Looks up `code` and evaluates it against `subtotal`. Read-only.
    #[instrument(skip(self))]
    pub fn evaluate_code(
        &self,
        code: &str,
        subtotal: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        let coupon = self.get(code).ok_or(CouponError::NotFound)?;
        Ok(evaluate(&coupon, subtotal, now)?)
    }

    /// Atomically consumes one use of the coupon. The check and the
    /// increment happen under the entry's write guard, so the usage count
    /// can never exceed the limit regardless of concurrent redeemers.
    #[instrument(skip(self))]
    pub fn redeem(&self, code: &str) -> Result<(), CouponError> {
        let mut entry = self.coupons.get_mut(code).ok_or(CouponError::NotFound)?;
        if entry.usage_count >= entry.usage_limit {
            return Err(CouponError::UsageExhausted);
        }
        entry.usage_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;

    fn coupon(rule: DiscountRule) -> Coupon {
        Coupon {
            code: "SAVE".into(),
            rule,
            min_subtotal: 500,
            expires_at: Utc::now() + Duration::days(1),
            usage_limit: 2,
            usage_count: 0,
        }
    }

    #[test]
    fn percentage_discount_is_computed_from_subtotal() {
        let c = coupon(DiscountRule::Percentage { percent: 10 });
        assert_eq!(evaluate(&c, 1000, Utc::now()).unwrap(), 100);
    }

    #[test]
    fn fixed_discount_is_clamped_to_subtotal() {
        let c = coupon(DiscountRule::Fixed { amount: 2000 });
        assert_eq!(evaluate(&c, 600, Utc::now()).unwrap(), 600);
    }

    #[test]
    fn expired_coupon_is_rejected() {
        let mut c = coupon(DiscountRule::Fixed { amount: 100 });
        c.expires_at = Utc::now() - Duration::hours(1);
        assert_matches!(evaluate(&c, 1000, Utc::now()), Err(CouponError::Expired));
    }

    #[test]
    fn below_minimum_subtotal_is_rejected() {
        let c = coupon(DiscountRule::Fixed { amount: 100 });
        assert_matches!(
            evaluate(&c, 499, Utc::now()),
            Err(CouponError::BelowMinimum {
                min_subtotal: 500,
                subtotal: 499
            })
        );
    }

    #[test]
    fn exhausted_coupon_is_rejected_at_evaluation() {
        let mut c = coupon(DiscountRule::Fixed { amount: 100 });
        c.usage_count = c.usage_limit;
        assert_matches!(
            evaluate(&c, 1000, Utc::now()),
            Err(CouponError::UsageExhausted)
        );
    }

    #[test]
    fn evaluation_does_not_consume_usage() {
        let svc = CouponService::new();
        svc.upsert(coupon(DiscountRule::Fixed { amount: 100 }));
        svc.evaluate_code("SAVE", 1000, Utc::now()).unwrap();
        svc.evaluate_code("SAVE", 1000, Utc::now()).unwrap();
        assert_eq!(svc.get("SAVE").unwrap().usage_count, 0);
    }

    #[test]
    fn redeem_stops_at_the_usage_limit() {
        let svc = CouponService::new();
        svc.upsert(coupon(DiscountRule::Fixed { amount: 100 }));
        svc.redeem("SAVE").unwrap();
        svc.redeem("SAVE").unwrap();
        assert_matches!(svc.redeem("SAVE"), Err(CouponError::UsageExhausted));
        assert_eq!(svc.get("SAVE").unwrap().usage_count, 2);
    }

    #[test]
    fn unknown_code_is_not_found() {
        let svc = CouponService::new();
        assert_matches!(
            svc.evaluate_code("NOPE", 1000, Utc::now()),
            Err(ServiceError::Coupon(CouponError::NotFound))
        );
        assert_matches!(svc.redeem("NOPE"), Err(CouponError::NotFound));
    }
}
