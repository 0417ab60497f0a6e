//! Sender 指标收集模块
//!
//! 基于 `MetricsSnapshot` 导出 Prometheus 指标，并计算区间吞吐。

use std::time::Duration;

use contracts::MetricsSnapshot;
use metrics::{counter, gauge};

/// 从 MetricsSnapshot 记录指标
///
/// 计数器使用绝对值写入，可重复调用。
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_sender_metrics;
///
/// record_sender_metrics(sender.name(), &sender.metrics());
/// ```
pub fn record_sender_metrics(sender: &str, snapshot: &MetricsSnapshot) {
    let sender = sender.to_string();

    // 队列深度
    gauge!("span_sender_queue_len", "sender" => sender.clone()).set(snapshot.queue_len as f64);

    // 提交计数
    counter!(
        "span_sender_submissions_total",
        "sender" => sender.clone(),
        "status" => "accepted"
    )
    .absolute(snapshot.accepted_count);
    counter!(
        "span_sender_submissions_total",
        "sender" => sender.clone(),
        "status" => "rejected"
    )
    .absolute(snapshot.rejected_count);

    // 按流写入计数
    counter!(
        "span_sender_writes_total",
        "sender" => sender.clone(),
        "stream" => "span"
    )
    .absolute(snapshot.span_written_count);
    counter!(
        "span_sender_writes_total",
        "sender" => sender.clone(),
        "stream" => "span_chunk"
    )
    .absolute(snapshot.span_chunk_written_count);

    // 丢弃与失败
    counter!("span_sender_unsupported_total", "sender" => sender.clone())
        .absolute(snapshot.unsupported_count);
    counter!("span_sender_failures_total", "sender" => sender.clone())
        .absolute(snapshot.failure_count);
    counter!("span_sender_discarded_total", "sender" => sender.clone())
        .absolute(snapshot.discarded_count);

    // 服务端响应
    counter!("span_sender_acks_total", "sender" => sender.clone()).absolute(snapshot.ack_count);
    counter!("span_sender_stream_errors_total", "sender" => sender)
        .absolute(snapshot.stream_error_count);
}

/// 区间吞吐统计
///
/// 保存上一次快照，计算两次采样之间的增量。
#[derive(Debug, Clone, Default)]
pub struct ThroughputTracker {
    last: MetricsSnapshot,
}

impl ThroughputTracker {
    /// 创建新的统计器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新并返回本区间摘要
    pub fn update(&mut self, snapshot: MetricsSnapshot, interval: Duration) -> IntervalSummary {
        let accepted = snapshot.accepted_count.saturating_sub(self.last.accepted_count);
        let rejected = snapshot.rejected_count.saturating_sub(self.last.rejected_count);
        let written = snapshot
            .written_count()
            .saturating_sub(self.last.written_count());
        self.last = snapshot;

        let secs = interval.as_secs_f64();
        IntervalSummary {
            accepted,
            rejected,
            written,
            write_rate: if secs > 0.0 { written as f64 / secs } else { 0.0 },
            reject_rate: if accepted + rejected > 0 {
                rejected as f64 / (accepted + rejected) as f64 * 100.0
            } else {
                0.0
            },
            queue_len: snapshot.queue_len,
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 区间摘要
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IntervalSummary {
    pub accepted: u64,
    pub rejected: u64,
    pub written: u64,
    /// 每秒写入数
    pub write_rate: f64,
    /// 拒绝比例 (%)
    pub reject_rate: f64,
    pub queue_len: usize,
}
