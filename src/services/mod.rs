// Checkout/payment pipeline services
pub mod catalog;
pub mod checkout;
pub mod coupons;
pub mod inventory;
pub mod orders;
pub mod reconciliation;

pub use catalog::CatalogService;
pub use checkout::{CheckoutConfirmation, CheckoutService};
pub use coupons::CouponService;
pub use inventory::InventoryService;
pub use orders::OrderService;
pub use reconciliation::{ReconcileOutcome, ReconciliationService};
