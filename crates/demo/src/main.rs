//! Demo walking through the scope engine end to end.
//!
//! Runs user creation, read-only queries, a forced-new scope with
//! parent refresh, a serializable credit-score batch, and a suppressed
//! parallel fan-out, all against the in-memory adapter.

use demo::{
    User, UserContext, UserCreationService, UserCreditScoreService, UserQueryService,
    UserRepository, WelcomeEmailService,
};
use tracing_subscriber::EnvFilter;
use workscope_core::ambient;
use workscope_core::error::ScopeError;
use workscope_core::factory::{ScopeFactory, ScopeOption};
use workscope_core::registry::ContextRegistry;
use workscope_memory::backend::MemoryBackend;
use workscope_memory::context::EntityContext;
use workscope_memory::refresh::MemoryRefreshStrategy;

fn user(id: u64, name: &str, email: &str) -> User {
    User {
        id,
        name: name.into(),
        email: email.into(),
        credit_score: 640,
        welcome_email_sent: false,
    }
}

fn build_factory(backend: &MemoryBackend) -> ScopeFactory {
    let backend = backend.clone();
    ScopeFactory::new(ContextRegistry::new().register::<UserContext, _>(
        move |read_only| Ok(EntityContext::new(backend.clone(), read_only)),
    ))
    .with_refresh_strategy(MemoryRefreshStrategy::new().register::<User>())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let backend = MemoryBackend::new();
    let factory = build_factory(&backend);

    if let Err(err) = ambient::bind(run(backend, factory)).await {
        tracing::error!(error = %err, "demo failed");
        std::process::exit(1);
    }
}

async fn run(backend: MemoryBackend, factory: ScopeFactory) -> Result<(), ScopeError> {
    let creation = UserCreationService::new(factory.clone());
    let queries = UserQueryService::new(factory.clone());
    let emails = WelcomeEmailService::new(factory.clone());
    let scores = UserCreditScoreService::new(factory.clone());

    // One business transaction per service call.
    creation.create_user(user(1, "Ada", "ada@example.org"))?;
    let created = creation.create_users(vec![
        user(2, "Grace", "grace@example.org"),
        user(3, "Edsger", "edsger@example.org"),
    ])?;
    tracing::info!(created, "batch insert committed");

    let ada = queries.get_user(1)?.expect("ada was just created");
    tracing::info!(name = %ada.name, credit_score = ada.credit_score, "read through a read-only scope");

    // A forced-new scope commits independently, then refreshes our stale
    // copy: the outer scope loaded Ada before the welcome email was marked.
    let mut outer = factory.create(ScopeOption::JoinExisting)?;
    let repository = UserRepository::new();
    let before = repository.get(1)?.expect("ada exists");
    assert!(!before.welcome_email_sent);

    emails.send_welcome_email(1)?;

    let after = repository.get(1)?.expect("ada exists");
    tracing::info!(
        welcome_email_sent = after.welcome_email_sent,
        "outer scope sees the inner scope's committed change after refresh"
    );
    outer.save_changes()?;
    outer.dispose()?;

    // Batch recalculation under an explicit serializable transaction.
    let rescored = scores.update_credit_scores(&[1, 2, 3])?;
    tracing::info!(rescored, "credit scores recalculated");

    // Parallel fan-out: hide the ambient scope first so no spawned task can
    // capture it, then give every task its own chain and scope.
    let mut outer = factory.create(ScopeOption::JoinExisting)?;
    {
        let _suppressed = factory.suppress_ambient();
        let mut handles = Vec::new();
        for id in 4..=6 {
            let factory = factory.clone();
            handles.push(tokio::spawn(ambient::bind(async move {
                let mut scope = factory.create(ScopeOption::ForceCreateNew)?;
                scope.context::<UserContext>()?.add(user(
                    id,
                    &format!("Import {id}"),
                    &format!("import{id}@example.org"),
                ))
                .map_err(ScopeError::Context)?;
                scope.save_changes()?;
                scope.dispose()
            })));
        }
        for handle in handles {
            handle.await.expect("import task panicked")?;
        }
    }
    // Our own scope is ambient again.
    outer.save_changes()?;
    outer.dispose()?;

    let everyone = backend.all::<User>();
    tracing::info!(total = everyone.len(), "final user count");
    for u in &everyone {
        tracing::info!(
            id = u.id,
            name = %u.name,
            credit_score = u.credit_score,
            welcomed = u.welcome_email_sent,
            "user"
        );
    }

    Ok(())
}
