//! HTTP / HTTPS 监听
//!
//! 启用 TLS 时逐连接完成握手后交给 hyper 的 auto 构建器（HTTP/1.1 与 h2），
//! 关闭 TLS 时直接使用 `axum::serve`。两种方式都在收到关闭信号后停止接收新连接。

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wecarry_shared::config::ServerConfig;
use wecarry_shared::tls;

pub async fn serve(
    config: &ServerConfig,
    addr: &str,
    app: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("监听地址绑定失败: {addr}"))?;

    if config.disable_tls {
        warn!(%addr, "TLS 已关闭，使用明文 HTTP");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        return Ok(());
    }

    let tls_config = tls::load_server_config(&config.cert_path, &config.key_path)?;
    info!(%addr, cert = %config.cert_path.display(), "HTTPS 监听已启动");
    serve_tls(listener, TlsAcceptor::from(tls_config), app, shutdown).await;
    Ok(())
}

async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "接受连接失败");
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, acceptor, app).await;
        });
    }

    info!("HTTPS 监听已停止");
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    app: Router,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(s) => s,
        Err(e) => {
            // 扫描器和版本过低的客户端很常见
            debug!(%peer, error = %e, "TLS 握手失败");
            return;
        }
    };

    let service = TowerToHyperService::new(app);
    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
        .await
    {
        debug!(%peer, error = %e, "连接处理结束");
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到 Ctrl+C，开始优雅关闭"),
        _ = terminate => info!("收到 SIGTERM，开始优雅关闭"),
    }
}
