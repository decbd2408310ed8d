use std::sync::Arc;

use micro_netw::{EchoProtocol, NetwServer};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let server = match NetwServer::builder().port(8080).build(Arc::new(EchoProtocol)) {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    info!(port = 8080, "echo server started");
    if let Err(e) = server.run() {
        error!(cause = %e, "echo server failed");
    }
}
