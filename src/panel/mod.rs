// Panel abstraction layer: one capability trait, one adapter per vendor family
pub mod credentials;
pub mod error;
pub mod factory;
pub mod http;
pub mod lifecycle;
pub mod registry;
pub mod status;
pub mod traits;
pub mod vendors;

pub use error::{PanelError, PanelResult};
pub use factory::{AdapterFactory, DefaultFactory};
pub use lifecycle::{apply_gift, extend_account, Extension};
pub use registry::ClientRegistry;
pub use traits::PanelClient;
