pub mod config;
pub mod daemon;
pub mod enforcement_manager;
pub mod notification_tracker;
pub mod policy_engine;
pub mod scheduler;
pub mod sources;
pub mod surface;

pub use enforcement_manager::{EnforcementManager, Trigger};
pub use notification_tracker::NotificationTracker;
pub use surface::EnforcementSurface;
