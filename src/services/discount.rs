//! Campaign and coupon discount rules.
//!
//! Campaigns act per line and change the effective unit price. Coupons act on
//! the cart subtotal after every campaign has been applied. The two stack.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Campaign, Coupon, DiscountKind},
    money,
};

const MAX_COUPON_CODE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AppliedCampaign {
    pub id: Uuid,
    pub name: String,
    pub discount_kind: DiscountKind,
    #[schema(value_type = String)]
    pub discount_value: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CampaignPrice {
    pub unit_price: Decimal,
    pub campaign: Option<AppliedCampaign>,
}

/// Resolve the effective unit price of a product under the campaigns in force at `now`.
///
/// When several campaigns cover the product the one producing the lowest price
/// wins; equal prices go to the campaign ending soonest.
pub fn campaign_price(
    list_price: Decimal,
    product_id: Uuid,
    campaigns: &[Campaign],
    now: DateTime<Utc>,
) -> CampaignPrice {
    let best = campaigns
        .iter()
        .filter(|c| c.is_effective(now) && c.covers(product_id))
        .map(|c| (discounted(list_price, c.discount_kind, c.discount_value), c))
        .min_by(|(price_a, a), (price_b, b)| {
            price_a
                .cmp(price_b)
                .then(a.end_date.cmp(&b.end_date))
                .then(a.id.cmp(&b.id))
        });

    match best {
        Some((unit_price, campaign)) => CampaignPrice {
            unit_price,
            campaign: Some(AppliedCampaign {
                id: campaign.id,
                name: campaign.name.clone(),
                discount_kind: campaign.discount_kind,
                discount_value: campaign.discount_value,
            }),
        },
        None => CampaignPrice {
            unit_price: money::cents(list_price),
            campaign: None,
        },
    }
}

fn discounted(price: Decimal, kind: DiscountKind, value: Decimal) -> Decimal {
    match kind {
        DiscountKind::Percentage => money::non_negative(price - money::percent_of(price, value)),
        DiscountKind::Fixed => money::non_negative(price - value),
    }
}

/// Coupon discount on a post-campaign subtotal. Never exceeds the subtotal.
pub fn coupon_discount(coupon: &Coupon, subtotal: Decimal) -> Decimal {
    let raw = match coupon.discount_kind {
        DiscountKind::Percentage => money::percent_of(subtotal, coupon.discount_value),
        DiscountKind::Fixed => coupon.discount_value,
    };
    money::non_negative(raw.min(subtotal))
}

/// Policy checks for attaching (or keeping) a coupon on a cart.
pub fn check_coupon(coupon: &Coupon, subtotal: Decimal, now: DateTime<Utc>) -> AppResult<()> {
    if coupon.expires_at.is_some_and(|expiry| now >= expiry) {
        return Err(AppError::CouponExpired(coupon.code.clone()));
    }
    if coupon
        .usage_limit
        .is_some_and(|limit| coupon.times_used >= limit)
    {
        return Err(AppError::CouponUsageExceeded(coupon.code.clone()));
    }
    if let Some(minimum) = coupon.min_subtotal.filter(|minimum| subtotal < *minimum) {
        return Err(AppError::CouponMinimumNotMet {
            code: coupon.code.clone(),
            minimum: money::cents(minimum),
            shortfall: money::cents(minimum - subtotal),
        });
    }
    Ok(())
}

/// Canonical form of a shopper-entered coupon code.
pub fn normalize_coupon_code(code: &str) -> AppResult<String> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        return Err(AppError::ValidationFailed("coupon code must not be empty".into()));
    }
    if code.len() > MAX_COUPON_CODE_LEN {
        return Err(AppError::ValidationFailed(format!(
            "coupon code must be at most {MAX_COUPON_CODE_LEN} characters"
        )));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::ValidationFailed(
            "coupon code may only contain letters, digits, '-' and '_'".into(),
        ));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::CampaignStatus;

    fn dollars(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn campaign(
        product_id: Uuid,
        kind: DiscountKind,
        value: Decimal,
        ends_in_days: i64,
        now: DateTime<Utc>,
    ) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            name: format!("{} {}", kind.as_str(), value),
            status: CampaignStatus::Active,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(ends_in_days),
            discount_kind: kind,
            discount_value: value,
            product_ids: vec![product_id],
        }
    }

    fn coupon(kind: DiscountKind, value: Decimal) -> Coupon {
        Coupon {
            code: "SAVE".into(),
            discount_kind: kind,
            discount_value: value,
            min_subtotal: None,
            expires_at: None,
            usage_limit: None,
            times_used: 0,
        }
    }

    #[test]
    fn no_campaign_keeps_list_price() {
        let now = Utc::now();
        let price = campaign_price(dollars(2000), Uuid::new_v4(), &[], now);
        assert_eq!(price.unit_price, dollars(2000));
        assert!(price.campaign.is_none());
    }

    #[test]
    fn picks_the_campaign_with_the_lowest_resulting_price() {
        let now = Utc::now();
        let product = Uuid::new_v4();
        let pct = campaign(product, DiscountKind::Percentage, Decimal::from(20), 10, now);
        let fixed = campaign(product, DiscountKind::Fixed, dollars(500), 10, now);

        let price = campaign_price(dollars(2000), product, &[pct, fixed.clone()], now);

        assert_eq!(price.unit_price, dollars(1500));
        assert_eq!(price.campaign.map(|c| c.id), Some(fixed.id));
    }

    #[test]
    fn equal_prices_go_to_the_soonest_ending_campaign() {
        let now = Utc::now();
        let product = Uuid::new_v4();
        let later = campaign(product, DiscountKind::Percentage, Decimal::from(25), 30, now);
        let sooner = campaign(product, DiscountKind::Fixed, dollars(500), 2, now);

        let price = campaign_price(dollars(2000), product, &[later, sooner.clone()], now);

        assert_eq!(price.unit_price, dollars(1500));
        assert_eq!(price.campaign.map(|c| c.id), Some(sooner.id));
    }

    #[test]
    fn ignores_inactive_future_expired_and_unrelated_campaigns() {
        let now = Utc::now();
        let product = Uuid::new_v4();

        let mut inactive = campaign(product, DiscountKind::Fixed, dollars(100), 5, now);
        inactive.status = CampaignStatus::Inactive;
        let mut future = campaign(product, DiscountKind::Fixed, dollars(200), 5, now);
        future.start_date = now + Duration::hours(1);
        let mut ended = campaign(product, DiscountKind::Fixed, dollars(300), 5, now);
        ended.end_date = now;
        let other = campaign(Uuid::new_v4(), DiscountKind::Fixed, dollars(400), 5, now);

        let price = campaign_price(dollars(2000), product, &[inactive, future, ended, other], now);

        assert_eq!(price.unit_price, dollars(2000));
        assert!(price.campaign.is_none());
    }

    #[test]
    fn campaign_price_never_goes_below_zero() {
        let now = Utc::now();
        let product = Uuid::new_v4();
        let huge = campaign(product, DiscountKind::Fixed, dollars(5000), 5, now);

        let price = campaign_price(dollars(2000), product, &[huge], now);

        assert_eq!(price.unit_price, Decimal::ZERO);
    }

    #[test]
    fn coupon_discount_by_kind() {
        let pct = coupon(DiscountKind::Percentage, Decimal::from(10));
        assert_eq!(coupon_discount(&pct, dollars(1500)), dollars(150));

        let fixed = coupon(DiscountKind::Fixed, dollars(2000));
        assert_eq!(coupon_discount(&fixed, dollars(1500)), dollars(1500));
        assert_eq!(coupon_discount(&fixed, dollars(4000)), dollars(2000));
    }

    #[test]
    fn coupon_policy_errors() {
        let now = Utc::now();

        let mut expired = coupon(DiscountKind::Fixed, dollars(100));
        expired.expires_at = Some(now - Duration::minutes(1));
        assert!(matches!(
            check_coupon(&expired, dollars(1000), now),
            Err(AppError::CouponExpired(_))
        ));

        let mut exhausted = coupon(DiscountKind::Fixed, dollars(100));
        exhausted.usage_limit = Some(3);
        exhausted.times_used = 3;
        assert!(matches!(
            check_coupon(&exhausted, dollars(1000), now),
            Err(AppError::CouponUsageExceeded(_))
        ));

        let mut minimum = coupon(DiscountKind::Fixed, dollars(100));
        minimum.min_subtotal = Some(dollars(5000));
        match check_coupon(&minimum, dollars(4250), now) {
            Err(AppError::CouponMinimumNotMet { shortfall, .. }) => {
                assert_eq!(shortfall, dollars(750))
            }
            other => panic!("expected minimum-not-met, got {other:?}"),
        }
        assert!(check_coupon(&minimum, dollars(5000), now).is_ok());
    }

    #[test]
    fn coupon_codes_are_case_insensitive_and_validated() {
        assert_eq!(normalize_coupon_code("  save-10 ").ok().as_deref(), Some("SAVE-10"));
        assert!(matches!(
            normalize_coupon_code("   "),
            Err(AppError::ValidationFailed(_))
        ));
        assert!(matches!(
            normalize_coupon_code("DROP TABLE;"),
            Err(AppError::ValidationFailed(_))
        ));
    }
}
