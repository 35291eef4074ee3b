use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::RawQuery;
use axum::response::Html;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use url::Url;

const DONE_PAGE: &str =
    "<!doctype html><title>authkit</title><p>Authorization received. You can close this window.</p>";

/// Bind the host and port of `redirect_uri`.
pub async fn bind(redirect_uri: &str) -> Result<(TcpListener, String)> {
    let url = Url::parse(redirect_uri).context("redirect_uri is not a URL")?;
    let host = url
        .host_str()
        .context("redirect_uri has no host to listen on")?
        .to_owned();
    let port = url
        .port_or_known_default()
        .context("redirect_uri has no port")?;

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to listen on {host}:{port}"))?;
    tracing::info!(%host, port, path = url.path(), "waiting for the OAuth2 redirect");
    Ok((listener, url.path().to_owned()))
}

/// Serve `path` until the first request arrives and return its raw query.
pub async fn receive_query(listener: TcpListener, path: &str) -> Result<String> {
    let (query_tx, query_rx) = oneshot::channel::<String>();
    let query_tx = Arc::new(Mutex::new(Some(query_tx)));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let app = Router::new().route(
        path,
        get(move |RawQuery(query): RawQuery| {
            let query_tx = query_tx.clone();
            async move {
                let sender = query_tx.lock().ok().and_then(|mut slot| slot.take());
                if let Some(sender) = sender {
                    let _ = sender.send(query.unwrap_or_default());
                }
                Html(DONE_PAGE)
            }
        }),
    );

    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .into_future(),
    );

    let query = query_rx
        .await
        .context("callback listener stopped before a redirect arrived")?;
    let _ = stop_tx.send(());
    server
        .await
        .context("callback listener task failed")?
        .context("callback listener failed")?;

    Ok(query)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use authkit_http::{HttpClientBuilder, HttpClientConfig};

    #[tokio::test]
    async fn returns_the_first_redirect_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let receiver = tokio::spawn(async move { receive_query(listener, "/cb").await });

        let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing())
            .build()
            .unwrap();
        let resp = client
            .get(&format!("http://{addr}/cb?code=4%2F0Ab&state=s1"))
            .send()
            .await
            .unwrap();
        assert!(resp.text().await.unwrap().contains("Authorization received"));

        let query = receiver.await.unwrap().unwrap();
        assert_eq!(query, "code=4%2F0Ab&state=s1");
    }

    #[tokio::test]
    async fn bind_uses_redirect_host_and_port() {
        let (listener, path) = bind("http://127.0.0.1:0/oauth2/callback").await.unwrap();
        assert_eq!(path, "/oauth2/callback");
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }
}
