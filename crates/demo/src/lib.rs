//! User-management services demonstrating ambient unit-of-work scopes.
//!
//! The layering mirrors a typical business application:
//!
//! - [`UserRepository`] - data access; sees only the ambient context via
//!   [`AmbientContexts`], never a scope
//! - [`UserCreationService`] / [`UserQueryService`] /
//!   [`UserCreditScoreService`] / [`WelcomeEmailService`] - business logic;
//!   each service method is one business transaction wrapped in a scope
//!
//! [`AmbientContexts`]: workscope_core::locator::AmbientContexts

use std::sync::Arc;
use workscope_core::context::{EntityRef, IsolationLevel};
use workscope_core::error::{ContextError, ScopeError};
use workscope_core::factory::{ScopeFactory, ScopeOption};
use workscope_core::locator::AmbientContexts;
use workscope_memory::context::{Entity, EntityContext};

/// A user of the imaginary product.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    /// Store key.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Contact address.
    pub email: String,
    /// Creditworthiness, recalculated in batch.
    pub credit_score: u32,
    /// Whether the welcome email went out.
    pub welcome_email_sent: bool,
}

impl Entity for User {
    fn key(&self) -> u64 {
        self.id
    }
}

/// The persistence context type for users.
pub type UserContext = EntityContext<User>;

// ─────────────────────────────────────────────────────────────────────────────
// Repository layer
// ─────────────────────────────────────────────────────────────────────────────

/// Data access for users.
///
/// Works against whatever scope is ambient; creating, saving and disposing
/// scopes is the service layer's job.
#[derive(Clone, Copy, Default)]
pub struct UserRepository {
    contexts: AmbientContexts,
}

impl UserRepository {
    /// Creates a repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a user by id through the ambient context.
    pub fn get(&self, id: u64) -> Result<Option<User>, ScopeError> {
        let users = self.require_context()?;
        users.find(id).map_err(ScopeError::Context)
    }

    /// Tracks a new user for insertion.
    pub fn add(&self, user: User) -> Result<(), ScopeError> {
        let users = self.require_context()?;
        users.add(user).map_err(ScopeError::Context)
    }

    /// Tracks a modification to a user.
    pub fn update(&self, user: User) -> Result<(), ScopeError> {
        let users = self.require_context()?;
        users.update(user).map_err(ScopeError::Context)
    }

    fn require_context(&self) -> Result<Arc<UserContext>, ScopeError> {
        self.contexts.get::<UserContext>()?.ok_or_else(|| {
            ScopeError::Context(ContextError::new(
                "UserRepository must be called within a scope",
            ))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service layer
// ─────────────────────────────────────────────────────────────────────────────

/// Creates users. Each call is one business transaction.
pub struct UserCreationService {
    factory: ScopeFactory,
    repository: UserRepository,
}

impl UserCreationService {
    /// Creates the service.
    #[must_use]
    pub fn new(factory: ScopeFactory) -> Self {
        Self {
            factory,
            repository: UserRepository::new(),
        }
    }

    /// Creates a single user.
    pub fn create_user(&self, user: User) -> Result<(), ScopeError> {
        let mut scope = self.factory.create(ScopeOption::JoinExisting)?;
        self.repository.add(user)?;
        scope.save_changes()?;
        scope.dispose()
    }

    /// Creates a batch of users as one all-or-nothing transaction.
    pub fn create_users(&self, users: Vec<User>) -> Result<usize, ScopeError> {
        let mut scope = self.factory.create(ScopeOption::JoinExisting)?;
        for user in users {
            self.repository.add(user)?;
        }
        let written = scope.save_changes()?;
        scope.dispose()?;
        Ok(written)
    }
}

/// Reads users through read-only scopes.
pub struct UserQueryService {
    factory: ScopeFactory,
    repository: UserRepository,
}

impl UserQueryService {
    /// Creates the service.
    #[must_use]
    pub fn new(factory: ScopeFactory) -> Self {
        Self {
            factory,
            repository: UserRepository::new(),
        }
    }

    /// Loads a user by id.
    ///
    /// The scope is read-only: contexts are created without change tracking
    /// and disposal commits automatically.
    pub fn get_user(&self, id: u64) -> Result<Option<User>, ScopeError> {
        let mut scope = self.factory.create_read_only(ScopeOption::JoinExisting)?;
        let user = self.repository.get(id)?;
        scope.dispose()?;
        Ok(user)
    }
}

/// Sends welcome emails, marking each user in its own committed transaction.
pub struct WelcomeEmailService {
    factory: ScopeFactory,
    repository: UserRepository,
}

impl WelcomeEmailService {
    /// Creates the service.
    #[must_use]
    pub fn new(factory: ScopeFactory) -> Self {
        Self {
            factory,
            repository: UserRepository::new(),
        }
    }

    /// Marks the user as welcomed, committing independently of any caller
    /// scope, then refreshes the caller's stale copy.
    ///
    /// The forced-new scope means the mark survives even when the calling
    /// transaction rolls back - the email did go out, after all.
    pub fn send_welcome_email(&self, id: u64) -> Result<(), ScopeError> {
        let mut scope = self.factory.create(ScopeOption::ForceCreateNew)?;

        let Some(mut user) = self.repository.get(id)? else {
            return scope.dispose();
        };
        tracing::info!(user = %user.name, email = %user.email, "sending welcome email");
        user.welcome_email_sent = true;
        self.repository.update(user.clone())?;
        scope.save_changes()?;

        // The caller's scope may have loaded this user before we changed it.
        let entities: Vec<EntityRef> = vec![Arc::new(user)];
        scope.refresh_entities_in_parent(&entities)?;
        scope.dispose()
    }
}

/// Recalculates credit scores under an explicit isolation level.
pub struct UserCreditScoreService {
    factory: ScopeFactory,
    repository: UserRepository,
}

impl UserCreditScoreService {
    /// Creates the service.
    #[must_use]
    pub fn new(factory: ScopeFactory) -> Self {
        Self {
            factory,
            repository: UserRepository::new(),
        }
    }

    /// Recalculates the credit score of every listed user in one
    /// serializable transaction.
    pub fn update_credit_scores(&self, ids: &[u64]) -> Result<usize, ScopeError> {
        let mut scope = self
            .factory
            .create_with_isolation(IsolationLevel::Serializable)?;

        for &id in ids {
            if let Some(mut user) = self.repository.get(id)? {
                user.credit_score = recalculate_score(&user);
                self.repository.update(user)?;
            }
        }

        let written = scope.save_changes()?;
        scope.dispose()?;
        Ok(written)
    }
}

fn recalculate_score(user: &User) -> u32 {
    // Proprietary scoring model.
    let base = user.credit_score.max(300);
    (base + u32::try_from(user.name.len()).unwrap_or(0)).min(850)
}
