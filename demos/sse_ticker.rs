use std::{thread, time::Duration};

use anyhow::Error;
use tracing::{event, Level};
use wharf::{
    plugin::{EventSink, SsePlugin},
    proto::{sse::SseEvent, HttpRequest},
    Server, ServerConfig, ServerModule,
};

fn main() -> Result<(), Error> {
    devutils::init_logging();

    let config = ServerConfig::from_toml_str("task_threads = 4")?;
    let mut server = Server::new(config)?;

    let module = ServerModule::builder("sse-ticker")
        .bind("127.0.0.1:1234".parse()?)
        .plugin(SsePlugin::new().stream("/ticks", ticker))
        .task_pool(server.pool().clone())
        .build()?;
    server.add_module(module);

    let shutdown = server.shutdown_handle();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(60));
        shutdown.shutdown();
    });

    server.run()
}

/// Sends the time every second, for a minute, to each subscriber.
fn ticker(request: &HttpRequest, sink: EventSink) {
    // Resume from where a reconnecting client left off
    let start = request
        .headers()
        .get("Last-Event-ID")
        .and_then(|id| id.parse::<u64>().ok())
        .map_or(0, |id| id + 1);

    for tick in start..60 {
        let event = SseEvent::new(format!("tick {}", tick))
            .with_id(tick.to_string())
            .with_name("tick")
            .with_retry(2000);

        if let Err(error) = sink.send(event) {
            event!(Level::INFO, ?error, "subscriber left");
            return;
        }
        thread::sleep(Duration::from_secs(1));
    }

    sink.finish();
}
