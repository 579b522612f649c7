//! Helpers shared by the test modules: throwaway upstream servers.

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use std::{convert::Infallible, net::SocketAddr, time::Duration};

/// Start an upstream on an ephemeral port that answers as `name`.
///
/// - `/teapot` answers 418
/// - `/slow` answers after 500ms
/// - `/echo` answers with the request body
/// - anything else answers `"<name> <METHOD> <path?query>"`
///
/// Every response carries `x-backend: <name>` and echoes the request's
/// `x-custom` header back as `x-seen-custom`.
pub async fn spawn_backend(name: &'static str) -> SocketAddr {
    let make_service = make_service_fn(move |_conn| async move {
        Ok::<_, Infallible>(service_fn(move |req: Request<Body>| respond(name, req)))
    });

    let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_service);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

async fn respond(name: &'static str, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_string();
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let custom = req.headers().get("x-custom").cloned();

    let mut builder = Response::builder().header("x-backend", name);
    if let Some(custom) = custom {
        builder = builder.header("x-seen-custom", custom);
    }

    let response = match path.as_str() {
        "/teapot" => builder.status(StatusCode::IM_A_TEAPOT).body(Body::from("short and stout")),
        "/slow" => {
            tokio::time::sleep(Duration::from_millis(500)).await;
            builder.body(Body::from("finally"))
        }
        "/echo" => {
            let body = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
            builder.body(Body::from(body))
        }
        _ => builder.body(Body::from(format!("{} {} {}", name, req.method(), target))),
    };
    Ok(response.unwrap())
}

/// An address nothing listens on.
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
