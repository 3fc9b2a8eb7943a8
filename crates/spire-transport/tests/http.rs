//! End-to-end HTTP over a real socket.
#![cfg(feature = "http-server")]

use std::sync::Arc;

use spire_core::{HandlerResult, Method, Request, Response, Route, Router};
use spire_transport::{bind, serve};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

async fn hello(req: Request) -> HandlerResult<Response> {
    let name = req
        .params()
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    Ok(Response::text(format!("hello {name}")))
}

async fn echo(req: Request) -> HandlerResult<Response> {
    Ok(Response::text(req.text().unwrap_or_default()))
}

fn app() -> Arc<Router> {
    let router = Router::new()
        .route(Route::get("/hello/{name}", hello).unwrap())
        .unwrap()
        .route(Route::http("/echo", [Method::Post], echo).unwrap())
        .unwrap();
    Arc::new(router)
}

async fn roundtrip(addr: std::net::SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_serves_routes_over_tcp() {
    let listener = bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(listener, app(), shutdown.clone()));

    let ok = roundtrip(
        addr,
        "GET /hello/world HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(ok.starts_with("HTTP/1.1 200"), "{ok}");
    assert!(ok.ends_with("hello world"), "{ok}");

    let echoed = roundtrip(
        addr,
        "POST /echo HTTP/1.1\r\nHost: test\r\nContent-Length: 4\r\nConnection: close\r\n\r\nping",
    )
    .await;
    assert!(echoed.ends_with("ping"), "{echoed}");

    let missing = roundtrip(
        addr,
        "GET /nope HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

    let wrong_method = roundtrip(
        addr,
        "DELETE /echo HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(wrong_method.starts_with("HTTP/1.1 405"), "{wrong_method}");
    assert!(wrong_method.to_ascii_lowercase().contains("allow: post"), "{wrong_method}");

    shutdown.cancel();
    server.await.unwrap().unwrap();
}
