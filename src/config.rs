use serde::Deserialize;
use std::time::Duration;
use crate::load_balancer::EndpointOptions;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Http,
    Tcp,
}

/// backends.toml 中的一个后端
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub id: String,
    /// http 后端为上游 base URL，tcp 后端为 host:port
    pub url: String,
    pub weight: Option<i64>,
    #[serde(default)]
    pub transport: Transport,
}

impl BackendConfig {
    pub fn options(&self) -> EndpointOptions {
        EndpointOptions { weight: self.weight }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub gateway_bind: String,
    /// 设置后启用基于 cookie 的会话保持
    pub sticky_cookie: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub admin_enabled: Option<bool>,
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(10))
    }

    pub fn admin_enabled(&self) -> bool {
        self.admin_enabled.unwrap_or(false)
    }
}

pub fn load_settings() -> Result<Settings, config::ConfigError> {
    // also load .env
    dotenvy::dotenv().ok();
    let c = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(config::Environment::default())
        .build()?;
    c.try_deserialize::<Settings>()
}

#[derive(Debug, Deserialize)]
struct BackendsFile {
    #[serde(default)]
    backends: Vec<BackendConfig>,
}

fn parse_backends(
    source: impl config::Source + Send + Sync + 'static,
) -> Result<Vec<BackendConfig>, config::ConfigError> {
    let c = config::Config::builder().add_source(source).build()?;
    let bf: BackendsFile = c.try_deserialize()?;
    Ok(bf.backends)
}

pub fn load_backends() -> Result<Vec<BackendConfig>, config::ConfigError> {
    // 固定使用 TOML 文件格式，文件名 backends.toml；文件缺失得到空列表，内容错误直接返回
    parse_backends(config::File::new("backends", config::FileFormat::Toml).required(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backends() {
        let toml = r#"
            [[backends]]
            id = "svc-a"
            url = "http://127.0.0.1:30000"
            weight = 3

            [[backends]]
            id = "svc-b"
            url = "http://127.0.0.1:30001"

            [[backends]]
            id = "raw"
            url = "127.0.0.1:9000"
            weight = 1
            transport = "tcp"
        "#;
        let backends = parse_backends(config::File::from_str(toml, config::FileFormat::Toml)).unwrap();

        assert_eq!(backends.len(), 3);
        assert_eq!(backends[0].id, "svc-a");
        assert_eq!(backends[0].options(), EndpointOptions::weight(3));
        assert_eq!(backends[0].transport, Transport::Http);
        assert_eq!(backends[1].options(), EndpointOptions::default());
        assert_eq!(backends[2].transport, Transport::Tcp);
    }

    #[test]
    fn test_parse_backends_rejects_malformed_entry() {
        // 缺少 url
        let missing_url = r#"
            [[backends]]
            id = "svc-a"
            weight = 3
        "#;
        assert!(parse_backends(config::File::from_str(missing_url, config::FileFormat::Toml)).is_err());

        let bad_weight = r#"
            [[backends]]
            id = "svc-a"
            url = "http://127.0.0.1:30000"
            weight = "heavy"
        "#;
        assert!(parse_backends(config::File::from_str(bad_weight, config::FileFormat::Toml)).is_err());

        let bad_transport = r#"
            [[backends]]
            id = "svc-a"
            url = "http://127.0.0.1:30000"
            transport = "udp"
        "#;
        assert!(parse_backends(config::File::from_str(bad_transport, config::FileFormat::Toml)).is_err());
    }

    #[test]
    fn test_missing_backends_file_is_empty() {
        let source = config::File::new("no-such-backends-file", config::FileFormat::Toml).required(false);
        assert!(parse_backends(source).unwrap().is_empty());

        let empty = parse_backends(config::File::from_str("", config::FileFormat::Toml)).unwrap();
        assert!(empty.is_empty());
    }
}
