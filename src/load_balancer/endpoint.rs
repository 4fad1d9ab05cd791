use serde::Deserialize;
use crate::load_balancer::BalancerError;

/// 未指定权重时的默认值；权重 0 的节点永远不会被选中
pub const DEFAULT_WEIGHT: u32 = 0;

/// 注册在负载均衡器中的一个后端节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint<H> {
    pub id: String,
    pub handler: H,
    pub weight: u32,
}

/// upsert 时可设置的节点选项，在修改注册表之前统一校验
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct EndpointOptions {
    pub weight: Option<i64>,
}

impl EndpointOptions {
    #[cfg(test)]
    pub fn weight(w: i64) -> Self {
        Self { weight: Some(w) }
    }

    /// 校验并返回权重（None 表示未设置）
    pub(crate) fn validated_weight(&self) -> Result<Option<u32>, BalancerError> {
        match self.weight {
            None => Ok(None),
            Some(w) => u32::try_from(w)
                .map(Some)
                .map_err(|_| BalancerError::InvalidWeight(w)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_validation() {
        assert_eq!(EndpointOptions::default().validated_weight(), Ok(None));
        assert_eq!(EndpointOptions::weight(0).validated_weight(), Ok(Some(0)));
        assert_eq!(EndpointOptions::weight(7).validated_weight(), Ok(Some(7)));
        assert_eq!(
            EndpointOptions::weight(-1).validated_weight(),
            Err(BalancerError::InvalidWeight(-1))
        );
        // 超过 u32 范围同样视为非法
        let huge = i64::from(u32::MAX) + 1;
        assert_eq!(
            EndpointOptions::weight(huge).validated_weight(),
            Err(BalancerError::InvalidWeight(huge))
        );
    }
}
