pub mod endpoint;
pub mod weighted_round_robin;
pub mod sticky;

use std::sync::Arc;
use thiserror::Error;

pub use endpoint::{Endpoint, EndpointOptions, DEFAULT_WEIGHT};
pub use weighted_round_robin::WeightedRoundRobin;
pub use sticky::{is_valid_token, InvalidToken, StickyBalancer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    #[error("weight should be >= 0, got {0}")]
    InvalidWeight(i64),
    #[error("no servers in the pool")]
    EmptyPool,
    #[error("all servers have 0 weight")]
    ZeroWeightPool,
    #[error("server {0} not found")]
    NotFound(String),
}

/// 负载均衡器能力：按 id 查找、选择下一个节点、插入或更新节点
pub trait Balancer: Send + Sync {
    type Handler: Clone + Send + Sync;

    /// 返回节点及其在注册表中的位置
    fn find_by_id(&self, id: &str) -> Option<(Endpoint<Self::Handler>, usize)>;

    fn next(&self) -> Result<Endpoint<Self::Handler>, BalancerError>;

    fn upsert(
        &self,
        id: &str,
        handler: Self::Handler,
        options: EndpointOptions,
    ) -> Result<(), BalancerError>;
}

impl<B: Balancer + ?Sized> Balancer for Arc<B> {
    type Handler = B::Handler;

    fn find_by_id(&self, id: &str) -> Option<(Endpoint<Self::Handler>, usize)> {
        (**self).find_by_id(id)
    }

    fn next(&self) -> Result<Endpoint<Self::Handler>, BalancerError> {
        (**self).next()
    }

    fn upsert(
        &self,
        id: &str,
        handler: Self::Handler,
        options: EndpointOptions,
    ) -> Result<(), BalancerError> {
        (**self).upsert(id, handler, options)
    }
}
