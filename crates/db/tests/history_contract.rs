use concierge_core::domain::conversation::{ChatRole, ChatTurn};
use concierge_core::domain::request::UserId;
use concierge_db::{
    connect_with_settings, migrations, ChatHistoryRepository, InMemoryChatHistoryRepository,
    SqlChatHistoryRepository,
};

type ContractResult<T = ()> = Result<T, String>;

macro_rules! require_eq {
    ($left:expr, $right:expr, $($arg:tt)*) => {
        if $left != $right {
            return Err(format!($($arg)*));
        }
    };
}

async fn exercise(repo: &dyn ChatHistoryRepository, label: &str) -> ContractResult {
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");

    repo.save_message(&alice, ChatRole::User, "first").await.map_err(|err| err.to_string())?;
    repo.save_message(&alice, ChatRole::Assistant, "second").await.map_err(|err| err.to_string())?;
    repo.save_message(&bob, ChatRole::User, "other").await.map_err(|err| err.to_string())?;
    repo.save_message(&alice, ChatRole::User, "third").await.map_err(|err| err.to_string())?;

    let history = repo.get_history(&alice, 10).await.map_err(|err| err.to_string())?;
    require_eq!(
        history,
        vec![ChatTurn::user("first"), ChatTurn::assistant("second"), ChatTurn::user("third")],
        "{label}: reads should return append order"
    );

    let tail = repo.get_history(&alice, 1).await.map_err(|err| err.to_string())?;
    require_eq!(tail, vec![ChatTurn::user("third")], "{label}: limit keeps the newest turns");

    let none = repo.get_history(&UserId::new("nobody"), 10).await.map_err(|err| err.to_string())?;
    require_eq!(none.len(), 0, "{label}: unknown users have empty history");

    repo.clear_history(&alice).await.map_err(|err| err.to_string())?;
    let cleared = repo.get_history(&alice, 10).await.map_err(|err| err.to_string())?;
    require_eq!(cleared.len(), 0, "{label}: clear should empty the log");

    let untouched = repo.get_history(&bob, 10).await.map_err(|err| err.to_string())?;
    require_eq!(untouched.len(), 1, "{label}: clear must not touch other users");

    Ok(())
}

#[tokio::test]
async fn in_memory_repository_satisfies_history_contract() -> ContractResult {
    let repo = InMemoryChatHistoryRepository::new();
    exercise(&repo, "memory").await
}

#[tokio::test]
async fn sql_repository_satisfies_history_contract() -> ContractResult {
    let pool = connect_with_settings("sqlite::memory:", 1, 5).await.map_err(|err| err.to_string())?;
    migrations::run_pending(&pool).await.map_err(|err| err.to_string())?;

    let repo = SqlChatHistoryRepository::new(pool.clone());
    let result = exercise(&repo, "sqlite").await;
    pool.close().await;
    result
}
