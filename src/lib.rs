//! Ambient unit-of-work scopes for Rust persistence code.
//!

pub use workscope_core::*;

/// In-memory reference adapter (contexts, backend, refresh strategy).
pub use workscope_memory as memory;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use workscope_core::prelude::*;
    pub use workscope_memory::prelude::*;
}
