//! recall-cli - ローカルで一通り動かすためのデモ
//!
//! ```text
//! cargo run -p recall-cli -- [config.toml]
//! ```
//!
//! memo を 1 件作って card が生成されるのを待ち、最初の card に回答して終わる。
//! 途中で Ctrl-C すると runner を止める（processing の task は次回の起動で回収される）。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

use recall_core::app::{AppBuilder, MemoService, ReviewService};
use recall_core::config::Config;
use recall_core::domain::{CardContent, GenerationError, ReviewOutcome, UserId};
use recall_core::impls::SqliteStore;
use recall_core::observability::init_tracing;
use recall_core::ports::{CardGenerator, Clock, SystemClock};
use recall_core::srs::SrsEngine;
use recall_core::tasks::{MemoGenerationHandler, MemoGenerationTask};
use recall_core::typed::Task;

const DEMO_MEMO: &str = "\
What does the borrow checker enforce? :: Aliasing XOR mutability
What does `?` do? :: Returns early with the error converted via From
What is a CancellationToken for? :: Cooperative cancellation across tasks";

/// `front :: back` の行をそのまま card にする。外部サービスの代わり。
struct LineGenerator;

#[async_trait]
impl CardGenerator for LineGenerator {
    async fn generate_cards(
        &self,
        text: &str,
        _user_id: UserId,
        cancel: &CancellationToken,
    ) -> Result<Vec<CardContent>, GenerationError> {
        // 外部 API っぽく少し待つ
        tokio::select! {
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            _ = sleep(Duration::from_millis(200)) => {}
        }

        let cards: Vec<CardContent> = text
            .lines()
            .filter_map(|line| line.split_once("::"))
            .map(|(front, back)| CardContent::new(front.trim(), back.trim()))
            .collect();
        if cards.is_empty() {
            return Err(GenerationError::InvalidInput(
                "no `front :: back` lines found".to_string(),
            ));
        }
        Ok(cards)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // (A) 設定とログ
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    init_tracing(&config.log)?;

    // (B) store と App の組み立て
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(SqliteStore::open_with_clock(&config.database.path, clock.clone())?);
    let handler = MemoGenerationHandler::new(
        store.clone(),
        store.clone(),
        Arc::new(LineGenerator),
        clock.clone(),
    )
    .with_status_retries(config.runner.status_update_retries, config.runner.status_retry_delay());
    let app = AppBuilder::new()
        .register::<MemoGenerationTask, _>(handler)?
        .expect_tasks(&[MemoGenerationTask::TYPE])
        .runner_config(config.runner.clone())
        .clock(clock.clone())
        .build(store.clone())?;
    app.runner.start().await?;

    let memos = MemoService::new(store.clone(), store.clone(), app.runner.clone(), clock.clone());
    let reviews = ReviewService::new(
        store.clone(),
        store.clone(),
        SrsEngine::new(config.srs.clone())?,
        clock.clone(),
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received");
                shutdown.cancel();
            }
        });
    }

    // (C) memo を作って generation task を投入
    let user = UserId::generate();
    let memo = memos.create_memo_and_enqueue(user, DEMO_MEMO, &shutdown).await?;
    println!("created memo {} (user {user})", memo.id);

    // (D) memo が終端状態になるまでポーリング
    let memo = loop {
        let current = memos.get_memo(user, memo.id).await?;
        if current.status.is_terminal() {
            break Some(current);
        }
        tokio::select! {
            _ = shutdown.cancelled() => break None,
            _ = sleep(Duration::from_millis(50)) => {}
        }
    };

    // (E) 最初の card に回答
    if let Some(memo) = memo {
        println!("memo {} finished: {}", memo.id, memo.status);
        for card in memos.cards_for_memo(user, memo.id).await? {
            println!("  [{}] {} -> {}", card.id, card.content.front, card.content.back);
        }
        if let Some((card, _)) = reviews.next_due_card(user).await? {
            let stats = reviews.submit_answer(user, card.id, ReviewOutcome::Good).await?;
            println!(
                "answered {}: interval={}d ease={:.2} next={}",
                card.id, stats.interval, stats.ease_factor, stats.next_review_at
            );
        }
    }

    println!("runner: {}", serde_json::to_string(&app.runner.status().await)?);
    println!("tasks:  {}", serde_json::to_string(&app.runner.task_counts().await?)?);

    app.runner.stop().await?;
    Ok(())
}
