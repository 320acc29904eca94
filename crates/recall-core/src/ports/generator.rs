//! CardGenerator port - 外部の生成サービス
//!
//! 実体（LLM API など）はこの crate の外。text を渡して card の中身を受け取るだけ。
//! 実装は `cancel` を見て、長い I/O を途中で打ち切れるようにしておくこと。

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{CardContent, GenerationError, UserId};

#[async_trait]
pub trait CardGenerator: Send + Sync {
    async fn generate_cards(
        &self,
        text: &str,
        user_id: UserId,
        cancel: &CancellationToken,
    ) -> Result<Vec<CardContent>, GenerationError>;
}
