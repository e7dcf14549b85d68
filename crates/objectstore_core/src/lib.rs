//! Object persistence convenience layer.
//!
//! Declare a model with [`ModelBuilder`], load stores through a
//! [`StoreManager`], run work on the view session or in the background, and
//! observe outcomes through [`Publisher`]s and change subscriptions.

pub mod background;
pub mod db;
pub mod error;
pub mod logging;
pub mod manager;
pub mod predicate;
pub mod publisher;
pub mod record;
pub mod schema;
pub mod session;
pub mod value;

pub use background::{BackgroundResult, FinishingPool};
pub use db::{StoreDescription, StoreKind};
pub use error::{Error, Result, SharedError, StoreLoadError, StoreLoadFailure};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError, LoggingStatus};
pub use manager::{ManagerConfig, StoreManager};
pub use predicate::{Expr, FetchRequest, Predicate, SortDescriptor};
pub use publisher::{Completion, Demand, Publisher, Resolver, Scheduler, Subscriber, Subscription};
pub use record::{ModelObject, ObjectId, Record};
pub use schema::{
    AttributeType, DeleteRule, EntityDescription, EntityId, Model, ModelBuilder, SchemaError,
};
pub use session::{ChangeSubscription, ChangedObjects, Session, SessionContext, SessionKind};
pub use value::Value;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
