//! Storefront resources built on the sync engine.

pub mod cart;
pub mod filters;
pub mod members;
pub mod orders;
pub mod restock;

pub use cart::{AddToCart, Cart, CartApi, LineItem};
pub use filters::{FilterUpdate, ShopFilters, SortKey};
pub use members::UpdateMemberInfo;
pub use orders::Order;
pub use restock::BackInStockRequest;
