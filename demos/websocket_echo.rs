use anyhow::Error;
use tracing::{event, Level};
use wharf::{
    plugin::{WebSocketEndpoint, WebSocketPlugin, WsSession},
    proto::websocket::{CloseFrame, Message},
    Server, ServerConfig, ServerModule,
};

fn main() -> Result<(), Error> {
    devutils::init_logging();

    let config = ServerConfig::from_toml_str("task_threads = 1")?;
    let mut server = Server::new(config)?;

    let plugin = WebSocketPlugin::new()
        .max_message_size(1024 * 1024)
        .endpoint("/echo", || Echo { received: 0 });

    let module = ServerModule::builder("websocket-echo")
        .bind("127.0.0.1:1234".parse()?)
        .plugin(plugin)
        .task_pool(server.pool().clone())
        .build()?;
    server.add_module(module);

    server.run()
}

struct Echo {
    received: usize,
}

impl WebSocketEndpoint for Echo {
    fn on_open(&mut self, session: &mut WsSession) -> Result<(), Error> {
        event!(Level::INFO, peer = ?session.peer_addr(), "client connected");
        Ok(())
    }

    fn on_message(&mut self, session: &mut WsSession, message: Message) -> Result<(), Error> {
        self.received += 1;
        session.send(message)?;
        Ok(())
    }

    fn on_close(&mut self, session: &mut WsSession, frame: Option<&CloseFrame>) {
        event!(
            Level::INFO,
            peer = ?session.peer_addr(),
            received = self.received,
            code = ?frame.map(|frame| frame.code),
            "client left"
        );
    }
}
