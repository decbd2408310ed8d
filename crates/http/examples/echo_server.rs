use std::thread;

use http::StatusCode;
use micro_http::server::{HttpServer, Response};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

// curl -v -d "hello" http://127.0.0.1:8080/test
// curl -v -d "close" http://127.0.0.1:8080/test
#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let server = match HttpServer::bind(8080) {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    let runner = server.clone();
    let reactor = thread::spawn(move || {
        if let Err(e) = runner.run() {
            error!(cause = %e, "http server failed");
        }
    });
    info!(port = 8080, "http echo server started");

    while let Some(request) = server.next_request().await {
        let body = request.body().await;
        if !body.is_success() {
            warn!(path = request.path(), "request body was not received");
            continue;
        }

        info!(method = %request.method(), path = request.path(), len = body.content().len(), "echoing request");
        let closing = body.content().as_ref() == b"close";
        let content_type = request.header("Content-Type").and_then(|value| value.parse().ok()).unwrap_or(mime::TEXT_PLAIN);
        request.respond(Response::from_status(StatusCode::OK).with_content(content_type, body.into_content()));

        if closing {
            server.stop();
        }
    }

    if reactor.join().is_err() {
        error!("reactor thread panicked");
    }
    info!("http echo server stopped");
}
