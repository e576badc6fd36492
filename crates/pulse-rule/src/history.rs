use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// 指标历史：每个指标一个有界滑动缓冲，容量满时 FIFO 淘汰最旧样本。
/// 趋势与异常检测规则共享同一缓冲，每轮评估每个指标只追加一次。
pub struct MetricHistory {
    capacity: usize,
    buffers: RwLock<HashMap<String, VecDeque<f64>>>,
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// 追加一个样本
    pub async fn record(&self, metric: &str, value: f64) {
        let mut buffers = self.buffers.write().await;
        let buffer = buffers
            .entry(metric.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(value);
    }

    /// 最近 n 个样本（不足 n 个时返回全部），按时间先后排列
    pub async fn recent(&self, metric: &str, n: usize) -> Vec<f64> {
        let buffers = self.buffers.read().await;
        match buffers.get(metric) {
            Some(buffer) => {
                let start = buffer.len().saturating_sub(n);
                buffer.iter().skip(start).copied().collect()
            }
            None => Vec::new(),
        }
    }

    /// 当前样本数
    pub async fn sample_count(&self, metric: &str) -> usize {
        let buffers = self.buffers.read().await;
        buffers.get(metric).map(|b| b.len()).unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
