mod common;

use assert_matches::assert_matches;
use checkout_api::{errors::ServiceError, services::carts::CartUpdate};
use common::TestHarness;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn add_item_creates_line_with_price_snapshot() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Walnut desk", dec!(249.99), 10).await;

    let item = app
        .services
        .carts
        .add_item(user_id, product_id, 2)
        .await
        .unwrap();

    assert_eq!(item.quantity, 2);
    assert_eq!(item.price_at_add, dec!(249.99));

    let cart = app.services.carts.get_cart(user_id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.subtotal, dec!(499.98));
}

#[tokio::test]
async fn add_item_merges_quantities_for_same_product() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Desk lamp", dec!(39.50), 20).await;

    app.services
        .carts
        .add_item(user_id, product_id, 3)
        .await
        .unwrap();
    let merged = app
        .services
        .carts
        .add_item(user_id, product_id, 4)
        .await
        .unwrap();

    assert_eq!(merged.quantity, 7);
    let cart = app.services.carts.get_cart(user_id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn add_item_rejects_unknown_inactive_and_out_of_stock_products() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();

    let missing = app
        .services
        .carts
        .add_item(user_id, Uuid::new_v4(), 1)
        .await;
    assert_matches!(missing, Err(ServiceError::NotFound(_)));

    let inactive = app
        .seed_product_with("Retired chair", dec!(80.00), 5, false)
        .await;
    let unavailable = app.services.carts.add_item(user_id, inactive, 1).await;
    assert_matches!(unavailable, Err(ServiceError::ItemUnavailable(_)));

    let scarce = app.seed_product("Last unit", dec!(15.00), 1).await;
    let too_many = app.services.carts.add_item(user_id, scarce, 2).await;
    assert_matches!(too_many, Err(ServiceError::InsufficientStock(_)));

    // Nothing was stored along the way.
    let cart = app.services.carts.get_cart(user_id).await.unwrap();
    assert!(cart.items.is_empty());
}

#[tokio::test]
async fn add_item_enforces_per_line_cap() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Bulk paper", dec!(4.00), 500).await;

    app.services
        .carts
        .add_item(user_id, product_id, 60)
        .await
        .unwrap();

    // 60 + 41 = 101 > the cap of 100
    let over_cap = app.services.carts.add_item(user_id, product_id, 41).await;
    assert_matches!(over_cap, Err(ServiceError::ValidationFailed(_)));
}

#[tokio::test]
async fn update_to_zero_removes_line_like_it_was_never_added() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Notebook", dec!(7.25), 30).await;

    let item = app
        .services
        .carts
        .add_item(user_id, product_id, 3)
        .await
        .unwrap();

    let update = app
        .services
        .carts
        .update_item(user_id, item.id, 0)
        .await
        .unwrap();
    assert_matches!(update, CartUpdate::Removed);

    let cart = app.services.carts.get_cart(user_id).await.unwrap();
    assert!(cart.items.is_empty());
    assert_eq!(cart.subtotal, rust_decimal::Decimal::ZERO);
}

#[tokio::test]
async fn update_with_positive_quantity_reports_updated() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Mug", dec!(12.00), 50).await;

    let item = app
        .services
        .carts
        .add_item(user_id, product_id, 1)
        .await
        .unwrap();

    let update = app
        .services
        .carts
        .update_item(user_id, item.id, 5)
        .await
        .unwrap();
    assert_matches!(update, CartUpdate::Updated(ref updated) if updated.quantity == 5);
}

#[tokio::test]
async fn foreign_users_cart_items_look_missing() {
    let app = TestHarness::new().await;
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let product_id = app.seed_product("Headphones", dec!(99.00), 10).await;

    let item = app
        .services
        .carts
        .add_item(owner, product_id, 1)
        .await
        .unwrap();

    let update = app.services.carts.update_item(stranger, item.id, 2).await;
    assert_matches!(update, Err(ServiceError::NotFound(_)));

    let removal = app.services.carts.remove_item(stranger, item.id).await;
    assert_matches!(removal, Err(ServiceError::NotFound(_)));

    // The owner's line is untouched.
    let cart = app.services.carts.get_cart(owner).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 1);
}

#[tokio::test]
async fn clear_empties_the_cart() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let first = app.seed_product("Plate", dec!(8.00), 10).await;
    let second = app.seed_product("Bowl", dec!(6.00), 10).await;

    app.services.carts.add_item(user_id, first, 2).await.unwrap();
    app.services.carts.add_item(user_id, second, 1).await.unwrap();

    app.services.carts.clear(user_id).await.unwrap();

    let cart = app.services.carts.get_cart(user_id).await.unwrap();
    assert!(cart.items.is_empty());
}

#[tokio::test]
async fn validate_for_checkout_flags_empty_and_stale_carts() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();

    let empty = app.services.carts.validate_for_checkout(user_id).await;
    assert_matches!(empty, Err(ServiceError::CartEmpty));

    let product_id = app.seed_product("Poster", dec!(18.00), 3).await;
    app.services
        .carts
        .add_item(user_id, product_id, 3)
        .await
        .unwrap();

    // Stock drains after the add (another shopper checks out).
    app.services
        .inventory
        .reserve(product_id, 2)
        .await
        .unwrap();

    let stale = app.services.carts.validate_for_checkout(user_id).await;
    assert_matches!(stale, Err(ServiceError::InsufficientStock(_)));
}

#[tokio::test]
async fn cart_never_mutates_inventory() {
    let app = TestHarness::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Keyboard", dec!(75.00), 8).await;

    app.services
        .carts
        .add_item(user_id, product_id, 5)
        .await
        .unwrap();
    app.services.carts.clear(user_id).await.unwrap();

    assert_eq!(app.stock_of(product_id).await, 8);
}
