//! HTTPS 证书与 TLS 配置
//!
//! 启用 TLS 时，若证书文件不存在则生成自签名证书（localhost）并落盘。
//! 仅允许 TLS 1.2 及以上版本。

use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use tracing::{info, warn};

/// TLS 配置加载错误
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("生成自签名证书失败: {0}")]
    Generate(String),

    #[error("读取证书文件失败: {path}: {source}")]
    ReadCert {
        path: String,
        source: std::io::Error,
    },

    #[error("读取私钥文件失败: {path}: {source}")]
    ReadKey {
        path: String,
        source: std::io::Error,
    },

    #[error("写入证书文件失败: {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("证书解析失败: {0}")]
    Parse(String),

    #[error("私钥文件中未找到私钥")]
    MissingKey,

    #[error("TLS 配置无效: {0}")]
    Config(#[from] rustls::Error),
}

/// PEM 格式的证书和私钥
pub struct PemPair {
    pub cert_pem: String,
    pub key_pem: String,
}

/// 生成 localhost 自签名证书
pub fn generate_self_signed() -> Result<PemPair, TlsError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| TlsError::Generate(e.to_string()))?;

    Ok(PemPair {
        cert_pem: cert.cert.pem(),
        key_pem: cert.key_pair.serialize_pem(),
    })
}

/// 确保证书存在，不存在时生成自签名证书，返回是否新生成
pub fn ensure_certificate(cert_path: &Path, key_path: &Path) -> Result<bool, TlsError> {
    if cert_path.exists() && key_path.exists() {
        return Ok(false);
    }

    warn!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "未找到证书，生成自签名证书"
    );

    let pair = generate_self_signed()?;
    write_pem(cert_path, &pair.cert_pem)?;
    write_pem(key_path, &pair.key_pem)?;

    Ok(true)
}

fn write_pem(path: &Path, contents: &str) -> Result<(), TlsError> {
    let to_err = |source| TlsError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(to_err)?;
    }
    std::fs::write(path, contents).map_err(to_err)
}

/// 从 PEM 构建 rustls 服务端配置（TLS 1.2 / 1.3）
pub fn build_server_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Parse(e.to_string()))?;
    if certs.is_empty() {
        return Err(TlsError::Parse("证书文件为空".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| TlsError::Parse(e.to_string()))?
        .ok_or(TlsError::MissingKey)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// 读取（必要时生成）证书并构建服务端配置
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, TlsError> {
    if ensure_certificate(cert_path, key_path)? {
        info!(cert = %cert_path.display(), "自签名证书已生成");
    }

    let cert_pem = std::fs::read(cert_path).map_err(|source| TlsError::ReadCert {
        path: cert_path.display().to_string(),
        source,
    })?;
    let key_pem = std::fs::read(key_path).map_err(|source| TlsError::ReadKey {
        path: key_path.display().to_string(),
        source,
    })?;

    build_server_config(&cert_pem, &key_pem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_certificate_builds_server_config() {
        let pair = generate_self_signed().unwrap();
        assert!(pair.cert_pem.contains("BEGIN CERTIFICATE"));

        let config = build_server_config(pair.cert_pem.as_bytes(), pair.key_pem.as_bytes()).unwrap();
        assert_eq!(config.alpn_protocols.len(), 2);
    }

    #[test]
    fn test_ensure_certificate_only_generates_once() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("nested/cert.pem");
        let key = dir.path().join("nested/key.pem");

        assert!(ensure_certificate(&cert, &key).unwrap());
        let first = std::fs::read_to_string(&cert).unwrap();

        // 已存在时不覆盖
        assert!(!ensure_certificate(&cert, &key).unwrap());
        assert_eq!(std::fs::read_to_string(&cert).unwrap(), first);

        load_server_config(&cert, &key).unwrap();
    }

    #[test]
    fn test_missing_private_key_is_rejected() {
        let pair = generate_self_signed().unwrap();
        let result = build_server_config(pair.cert_pem.as_bytes(), b"");
        assert!(matches!(result, Err(TlsError::MissingKey)));
    }
}
