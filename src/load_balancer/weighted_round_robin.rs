use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use crate::load_balancer::{Balancer, BalancerError, Endpoint, EndpointOptions, DEFAULT_WEIGHT};

/// 注册表与游标必须在同一把锁下读写：选择算法同时依赖权重快照和游标位置
#[derive(Debug)]
struct PoolState<H> {
    endpoints: Vec<Endpoint<H>>,
    // 上一次访问的位置，None 表示尚未开始
    index: Option<usize>,
    current_weight: i64,
}

impl<H> PoolState<H> {
    fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            index: None,
            current_weight: 0,
        }
    }

    fn reset(&mut self) {
        self.index = None;
        self.current_weight = 0;
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.endpoints.iter().position(|e| e.id == id)
    }

    fn max_weight(&self) -> u32 {
        self.endpoints.iter().map(|e| e.weight).max().unwrap_or(0)
    }

    fn weight_gcd(&self) -> u32 {
        self.endpoints.iter().fold(0, |acc, e| gcd(acc, e.weight))
    }

    /// 平滑加权轮询：每绕回起点一次就把阈值减去 GCD，
    /// 权重不低于阈值的节点才会被选中，从而把重节点分散到整个周期中
    fn next(&mut self) -> Result<&Endpoint<H>, BalancerError> {
        if self.endpoints.is_empty() {
            return Err(BalancerError::EmptyPool);
        }

        let gcd = i64::from(self.weight_gcd());
        let max = i64::from(self.max_weight());
        // 全部为 0 时不移动游标，保证后续调用继续失败
        if max == 0 {
            return Err(BalancerError::ZeroWeightPool);
        }
        let len = self.endpoints.len();

        loop {
            let index = self.index.map_or(0, |i| (i + 1) % len);
            self.index = Some(index);

            if index == 0 {
                self.current_weight -= gcd;
                if self.current_weight <= 0 {
                    self.current_weight = max;
                }
            }

            if i64::from(self.endpoints[index].weight) >= self.current_weight {
                return Ok(&self.endpoints[index]);
            }
        }
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// 线程安全的动态加权轮询负载均衡器
///
/// 所有注册表修改与选择都在同一把互斥锁内完成，
/// 任何修改都会把游标重置到初始状态。
#[derive(Debug)]
pub struct WeightedRoundRobin<H> {
    state: Mutex<PoolState<H>>,
}

impl<H> Default for WeightedRoundRobin<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> WeightedRoundRobin<H> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<H>> {
        // 锁内没有半途而废的修改，中毒后直接沿用
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 删除节点，保持其余节点的相对顺序
    pub fn remove(&self, id: &str) -> Result<(), BalancerError> {
        let mut state = self.lock();
        let index = state
            .position(id)
            .ok_or_else(|| BalancerError::NotFound(id.to_string()))?;
        state.endpoints.remove(index);
        state.reset();
        debug!(backend = id, "endpoint removed");
        Ok(())
    }

    /// 查询节点权重
    pub fn weight_of(&self, id: &str) -> Option<u32> {
        let state = self.lock();
        state.position(id).map(|i| state.endpoints[i].weight)
    }

    pub fn len(&self) -> usize {
        self.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<H: Clone> WeightedRoundRobin<H> {
    /// 当前注册表快照（按注册顺序）
    pub fn endpoints(&self) -> Vec<Endpoint<H>> {
        self.lock().endpoints.clone()
    }
}

impl<H> Balancer for WeightedRoundRobin<H>
where
    H: Clone + Send + Sync,
{
    type Handler = H;

    fn find_by_id(&self, id: &str) -> Option<(Endpoint<H>, usize)> {
        let state = self.lock();
        state
            .position(id)
            .map(|i| (state.endpoints[i].clone(), i))
    }

    fn next(&self) -> Result<Endpoint<H>, BalancerError> {
        self.lock().next().cloned()
    }

    fn upsert(&self, id: &str, handler: H, options: EndpointOptions) -> Result<(), BalancerError> {
        // 先校验，失败时注册表保持不变
        let weight = options.validated_weight()?;

        let mut state = self.lock();
        match state.position(id) {
            Some(index) => {
                // 已存在：只更新权重，不替换 handler
                let endpoint = &mut state.endpoints[index];
                if let Some(w) = weight {
                    endpoint.weight = w;
                }
                debug!(backend = id, weight = endpoint.weight, "endpoint updated");
            }
            None => {
                let weight = weight.unwrap_or(DEFAULT_WEIGHT);
                state.endpoints.push(Endpoint {
                    id: id.to_string(),
                    handler,
                    weight,
                });
                debug!(backend = id, weight, "endpoint added");
            }
        }
        state.reset();
        Ok(())
    }
}
