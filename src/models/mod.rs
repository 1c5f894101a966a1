pub mod account;
pub mod config;
pub mod job;
pub mod panel;
pub mod service;

pub use account::{Account, AccountPatch, AccountSpec, AccountStatus, InboundOption, NodeHealth};
pub use config::AppConfig;
pub use job::{ItemState, Job, JobItem, JobKind, JobProgress, JobState};
pub use panel::{ExtendMethod, PanelConfig, PanelCredentials, VendorKind};
pub use service::{
    DailyReport, LocationChange, Order, OrderKind, PanelSales, PendingTransition, ServiceRecord,
    ServiceStatus,
};
