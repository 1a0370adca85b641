use serde::Serialize;

/// 提取决策结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExtractionDecision {
    pub extract: bool,
    pub reason: DecisionReason,
    pub score: f32, // 运动: 平均光流像素; 模糊: 拉普拉斯方差
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Motion,         // 运动足够，保留
    ForcedInterval, // 首帧或强制保留
    Blurry,         // 模糊，跳过
    DuplicateSkip,  // 与参考帧太相似，跳过
}

impl ExtractionDecision {
    pub fn keep(reason: DecisionReason, score: f32) -> Self {
        Self {
            extract: true,
            reason,
            score,
        }
    }

    pub fn skip(reason: DecisionReason, score: f32) -> Self {
        Self {
            extract: false,
            reason,
            score,
        }
    }
}
