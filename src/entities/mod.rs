/// Checkout core entities
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment_intent;
pub mod product;
pub mod refund;

// Re-export entities
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use order::{
    Entity as Order, Model as OrderModel, OrderStatus, PaymentMethod, PaymentStatus,
};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment_intent::{
    Entity as PaymentIntent, Model as PaymentIntentModel, PaymentIntentStatus,
};
pub use product::{Entity as Product, Model as ProductModel};
pub use refund::{Entity as Refund, Model as RefundModel};
