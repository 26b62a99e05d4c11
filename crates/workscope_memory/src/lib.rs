//! In-memory persistence contexts for the workscope engine.
//!
//! `workscope_memory` is the reference adapter behind the
//! [`workscope_core`] collaborator contracts:
//!
//! - [`backend`] - the shared entity store standing in for a database
//! - [`context`] - [`EntityContext<E>`](context::EntityContext), a
//!   change-tracking context with snapshot transactions
//! - [`refresh`] - the parent-scope entity refresh strategy
//!
//! # Example
//!
//! ```ignore
//! use workscope_core::prelude::*;
//! use workscope_memory::prelude::*;
//!
//! #[derive(Clone)]
//! struct User { id: u64, name: String }
//! impl Entity for User {
//!     fn key(&self) -> u64 { self.id }
//! }
//!
//! let backend = MemoryBackend::new();
//! let registry = ContextRegistry::new().register::<EntityContext<User>, _>({
//!     let backend = backend.clone();
//!     move |read_only| Ok(EntityContext::new(backend.clone(), read_only))
//! });
//! let factory = ScopeFactory::new(registry)
//!     .with_refresh_strategy(MemoryRefreshStrategy::new().register::<User>());
//! ```

/// Shared in-memory entity store.
pub mod backend;

/// Change-tracking contexts and snapshot transactions.
pub mod context;

/// Parent-scope entity refresh.
pub mod refresh;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::backend::MemoryBackend;
    pub use crate::context::{Entity, EntityContext, EntityState, MemoryTransaction};
    pub use crate::refresh::MemoryRefreshStrategy;
}
