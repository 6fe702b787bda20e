pub mod campaign_products;
pub mod campaigns;
pub mod cart_lines;
pub mod carts;
pub mod coupons;
pub mod order_items;
pub mod orders;
pub mod products;

pub use campaign_products::Entity as CampaignProducts;
pub use campaigns::Entity as Campaigns;
pub use cart_lines::Entity as CartLines;
pub use carts::Entity as Carts;
pub use coupons::Entity as Coupons;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
