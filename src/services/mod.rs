pub mod admin_service;
pub mod cart_service;
pub mod discount;
pub mod order_service;
pub mod pricing;
