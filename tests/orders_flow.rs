use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, EntityTrait, QuerySelect, Set, Statement, TransactionTrait,
    sea_query::LockType,
};
use uuid::Uuid;

use marketplace_cart::{
    db::{OrmConn, create_pool, orm_from_pool, run_migrations},
    dto::{
        cart::{AddToCartRequest, ApplyCouponRequest},
        orders::{CheckoutRequest, UpdateOrderStatusRequest},
    },
    entity::{
        Products, campaign_products::ActiveModel as CampaignProductActive,
        campaigns::ActiveModel as CampaignActive, coupons::ActiveModel as CouponActive,
        products::ActiveModel as ProductActive,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::{OrderStatus, ShippingAddress, Shopper},
    routes::params::Pagination,
    services::{admin_service, cart_service, order_service, pricing::PricingPolicy},
    state::AppState,
};

// Postgres flow: concurrent adds -> campaign + coupon -> checkout -> last-unit race -> fulfilment.
#[tokio::test]
async fn postgres_checkout_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let (state, orm) = setup_state(&database_url).await?;

    let lamp = insert_product(&orm, "Test Lamp", Decimal::new(2000, 2), 10).await?;
    let poster = insert_product(&orm, "Test Poster", Decimal::new(2500, 2), 1).await?;
    insert_campaign(&orm, lamp, Decimal::from(25)).await?;
    CouponActive {
        code: Set("TENOFF".into()),
        discount_type: Set("percentage".into()),
        discount_value: Set(Decimal::from(10)),
        min_subtotal: Set(None),
        expires_at: Set(None),
        usage_limit: Set(Some(5)),
        times_used: Set(0),
        created_at: NotSet,
    }
    .insert(&orm)
    .await?;

    let user = Shopper::User(Uuid::new_v4());

    // Two concurrent adds of the same product must both count.
    let add = |quantity| AddToCartRequest {
        product_id: lamp,
        quantity,
        attributes: None,
    };
    let (first, second) = tokio::join!(
        cart_service::add_to_cart(&state, &user, add(1)),
        cart_service::add_to_cart(&state, &user, add(2)),
    );
    first?;
    second?;
    let priced = cart_service::get_cart(&state, &user)
        .await?
        .data
        .expect("cart");
    assert_eq!(priced.lines.len(), 1);
    assert_eq!(priced.lines[0].quantity, 3);
    assert_eq!(priced.lines[0].effective_unit_price, Some(Decimal::new(1500, 2)));

    let priced = cart_service::apply_coupon(
        &state,
        &user,
        ApplyCouponRequest {
            code: "tenoff".into(),
        },
    )
    .await?
    .data
    .expect("cart");
    assert_eq!(priced.totals.subtotal, Decimal::new(4500, 2));
    assert_eq!(priced.totals.discount, Decimal::new(450, 2));

    let order = order_service::checkout(&state, &user, checkout_request())
        .await?
        .data
        .expect("order");
    assert_eq!(order.total, Decimal::new(4500 - 450 + 599, 2));
    assert_eq!(order.items.len(), 1);
    assert_eq!(stock_of(&orm, lamp).await?, 7);
    assert!(
        cart_service::get_cart(&state, &user)
            .await?
            .data
            .expect("cart")
            .is_empty()
    );

    let listed = order_service::list_orders(&state, &user, Pagination::default()).await?;
    assert_eq!(listed.meta.and_then(|m| m.total), Some(1));

    // Last unit: exactly one of two shoppers gets it.
    let alice = Shopper::Guest("pg-flow-alice".into());
    let bob = Shopper::Guest("pg-flow-bob".into());
    for shopper in [&alice, &bob] {
        cart_service::add_to_cart(
            &state,
            shopper,
            AddToCartRequest {
                product_id: poster,
                quantity: 1,
                attributes: None,
            },
        )
        .await?;
    }
    let (a, b) = tokio::join!(
        order_service::checkout(&state, &alice, checkout_request()),
        order_service::checkout(&state, &bob, checkout_request()),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(AppError::InsufficientStock { .. })))
    );
    assert_eq!(stock_of(&orm, poster).await?, 0);

    let admin = AuthUser {
        user_id: Uuid::new_v4(),
        role: "admin".into(),
    };
    let updated = admin_service::update_order_status(
        &state,
        &admin,
        &order.order_number,
        UpdateOrderStatusRequest {
            status: OrderStatus::Processing,
        },
    )
    .await?;
    assert_eq!(updated.data.map(|o| o.status), Some(OrderStatus::Processing));

    line_added_during_checkout_survives(&state, &orm).await?;

    Ok(())
}

// A line added while checkout holds its transaction open is not part of the
// order and must still be in the cart afterwards.
async fn line_added_during_checkout_survives(state: &AppState, orm: &OrmConn) -> anyhow::Result<()> {
    let kettle = insert_product(orm, "Test Kettle", Decimal::new(3000, 2), 5).await?;
    let cups = insert_product(orm, "Test Cups", Decimal::new(800, 2), 5).await?;
    let tray = insert_product(orm, "Test Tray", Decimal::new(1200, 2), 5).await?;
    let carol = Shopper::Guest("pg-flow-carol".into());
    for product_id in [kettle, cups] {
        cart_service::add_to_cart(
            state,
            &carol,
            AddToCartRequest {
                product_id,
                quantity: 1,
                attributes: None,
            },
        )
        .await?;
    }

    // Hold the kettle row so checkout stalls inside its transaction.
    let blocker = orm.begin().await?;
    Products::find_by_id(kettle)
        .lock(LockType::Update)
        .one(&blocker)
        .await?;

    let pending = tokio::spawn({
        let state = state.clone();
        let carol = carol.clone();
        async move { order_service::checkout(&state, &carol, checkout_request()).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    cart_service::add_to_cart(
        state,
        &carol,
        AddToCartRequest {
            product_id: tray,
            quantity: 1,
            attributes: None,
        },
    )
    .await?;
    blocker.commit().await?;

    let order = pending.await??.data.expect("order");
    let ordered: Vec<Uuid> = order.items.iter().map(|i| i.product_id).collect();
    assert_eq!(ordered, vec![kettle, cups]);

    let left = cart_service::get_cart(state, &carol)
        .await?
        .data
        .expect("cart");
    assert_eq!(left.lines.len(), 1);
    assert_eq!(left.lines[0].product_id, tray);

    // Items read back in cart order.
    let stored = order_service::get_order(state, &carol, &order.order_number)
        .await?
        .data
        .expect("order");
    let stored: Vec<Uuid> = stored.items.iter().map(|i| i.product_id).collect();
    assert_eq!(stored, vec![kettle, cups]);
    Ok(())
}

fn checkout_request() -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: ShippingAddress {
            recipient_name: "Flow Tester".into(),
            line1: "10 Integration Ave".into(),
            line2: None,
            city: "Testville".into(),
            region: None,
            postal_code: "10001".into(),
            country: "US".into(),
            phone: None,
        },
        payment_method: "card".into(),
        tax: None,
    }
}

async fn setup_state(database_url: &str) -> anyhow::Result<(AppState, OrmConn)> {
    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;
    let orm = orm_from_pool(&pool);

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_items, orders, cart_lines, carts, campaign_products, campaigns, coupons, products, audit_logs CASCADE",
    ))
    .await?;

    Ok((AppState::postgres(pool, PricingPolicy::default()), orm))
}

async fn insert_product(
    orm: &OrmConn,
    name: &str,
    price: Decimal,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        vendor_id: Set(Uuid::new_v4()),
        name: Set(name.into()),
        image_url: Set(None),
        price: Set(price),
        sale_price: Set(None),
        stock: Set(stock),
        created_at: NotSet,
    }
    .insert(orm)
    .await?;
    Ok(product.id)
}

async fn insert_campaign(orm: &OrmConn, product_id: Uuid, percent: Decimal) -> anyhow::Result<()> {
    let now = Utc::now();
    let campaign = CampaignActive {
        id: Set(Uuid::new_v4()),
        name: Set("Flow sale".into()),
        status: Set("active".into()),
        start_date: Set((now - Duration::days(1)).into()),
        end_date: Set((now + Duration::days(1)).into()),
        discount_type: Set("percentage".into()),
        discount_value: Set(percent),
        created_at: NotSet,
    }
    .insert(orm)
    .await?;

    CampaignProductActive {
        campaign_id: Set(campaign.id),
        product_id: Set(product_id),
    }
    .insert(orm)
    .await?;
    Ok(())
}

async fn stock_of(orm: &OrmConn, product_id: Uuid) -> anyhow::Result<i32> {
    Ok(Products::find_by_id(product_id)
        .one(orm)
        .await?
        .map(|p| p.stock)
        .unwrap_or_default())
}
