use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use marketplace_cart::db::{DbPool, create_pool, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set to seed"))?;

    let pool = create_pool(&database_url).await?;
    // Ensure migrations are applied.
    run_migrations(&pool).await?;

    let vendor_a = Uuid::new_v4();
    let vendor_b = Uuid::new_v4();
    let products = [
        (vendor_a, "Ferris Hoodie", Decimal::new(4500, 2), None, 50),
        (vendor_a, "Ferris Mug", Decimal::new(1200, 2), Some(Decimal::new(999, 2)), 100),
        (vendor_b, "Sticker Pack", Decimal::new(500, 2), None, 200),
        (vendor_b, "Limited Poster", Decimal::new(2500, 2), None, 1),
    ];
    let mut ids = Vec::with_capacity(products.len());
    for (vendor_id, name, price, sale_price, stock) in products {
        ids.push(ensure_product(&pool, vendor_id, name, price, sale_price, stock).await?);
    }

    // 20% off the hoodie and the stickers.
    seed_campaign(&pool, "Launch week", Decimal::from(20), &[ids[0], ids[2]]).await?;
    ensure_coupon(&pool, "WELCOME5", "fixed", Decimal::from(5), None, None).await?;
    ensure_coupon(
        &pool,
        "TENOFF",
        "percentage",
        Decimal::from(10),
        Some(Decimal::from(30)),
        Some(100),
    )
    .await?;

    println!("Seed completed. {} products", ids.len());
    Ok(())
}

async fn ensure_product(
    pool: &DbPool,
    vendor_id: Uuid,
    name: &str,
    price: Decimal,
    sale_price: Option<Decimal>,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO products (id, vendor_id, name, price, sale_price, stock)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (name) DO UPDATE
        SET price = EXCLUDED.price, sale_price = EXCLUDED.sale_price, stock = EXCLUDED.stock
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(vendor_id)
    .bind(name)
    .bind(price)
    .bind(sale_price)
    .bind(stock)
    .fetch_one(pool)
    .await?;

    println!("Ensured product {name} ({stock} in stock)");
    Ok(id)
}

async fn seed_campaign(
    pool: &DbPool,
    name: &str,
    percent_off: Decimal,
    products: &[Uuid],
) -> anyhow::Result<()> {
    let existing: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM campaigns WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    let campaign_id = match existing {
        Some((id,)) => id,
        None => {
            let id = Uuid::new_v4();
            let now = Utc::now();
            sqlx::query(
                r#"
                INSERT INTO campaigns (id, name, status, start_date, end_date, discount_type, discount_value)
                VALUES ($1, $2, 'active', $3, $4, 'percentage', $5)
                "#,
            )
            .bind(id)
            .bind(name)
            .bind(now - Duration::days(1))
            .bind(now + Duration::days(30))
            .bind(percent_off)
            .execute(pool)
            .await?;
            id
        }
    };

    for product_id in products {
        sqlx::query(
            "INSERT INTO campaign_products (campaign_id, product_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(campaign_id)
        .bind(product_id)
        .execute(pool)
        .await?;
    }

    println!("Ensured campaign {name} on {} products", products.len());
    Ok(())
}

async fn ensure_coupon(
    pool: &DbPool,
    code: &str,
    discount_type: &str,
    value: Decimal,
    min_subtotal: Option<Decimal>,
    usage_limit: Option<i32>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO coupons (code, discount_type, discount_value, min_subtotal, usage_limit)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (code) DO NOTHING
        "#,
    )
    .bind(code)
    .bind(discount_type)
    .bind(value)
    .bind(min_subtotal)
    .bind(usage_limit)
    .execute(pool)
    .await?;

    println!("Ensured coupon {code}");
    Ok(())
}
