pub mod config;
pub mod fulfillment;
pub mod i18n;
pub mod logger;
pub mod migration;
pub mod notifier;
pub mod store;

pub use fulfillment::{process_paid_order, OrderAction, PaidOrder};
pub use notifier::{alert_admins, notify_user, Notifier};
pub use store::{SqliteStore, Store};
