//! TaskPayload trait - task_type と payload 型の対応付け

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A payload type bound to exactly one task type.
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct ReviewAnalysis {
///     product_url: String,
/// }
///
/// impl TaskPayload for ReviewAnalysis {
///     const TYPE: &'static str = "analysis.reviews.v1";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: `enqueue_typed` で JSON にするため
/// - `DeserializeOwned`: Handler に渡す前に JSON から復元するため
/// - `Send + Sync + 'static`: Arc 越しに worker task へ渡すため
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 命名規約: `{domain}.{action}.v{major}`
    const TYPE: &'static str;
}
