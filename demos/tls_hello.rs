use anyhow::Error;
use wharf::{
    plugin::RoutePlugin,
    proto::{HttpRequest, HttpResponse},
    HandlerRegistry, Server, ServerConfig, ServerModule, SessionContext, TlsContext,
};

fn main() -> Result<(), Error> {
    devutils::init_logging();

    // Self-signed, clients need to skip verification, e.g. `curl -k`
    let certificate = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let cert_pem = certificate.serialize_pem()?;
    let key_pem = certificate.serialize_private_key_pem();
    let tls = TlsContext::from_pem(cert_pem.as_bytes(), key_pem.as_bytes(), None)?;

    let mut registry = HandlerRegistry::new();
    registry.register_request("hello", || hello);

    let config = ServerConfig::from_toml_str("task_threads = 1")?;
    let mut server = Server::new(config)?;

    let module = ServerModule::builder("tls-hello")
        .bind("127.0.0.1:1443".parse()?)
        .tls(tls)
        .factory(registry)
        .plugin(RoutePlugin::new().route("/", "hello"))
        .task_pool(server.pool().clone())
        .build()?;
    server.add_module(module);

    server.run()
}

fn hello(_request: &HttpRequest, cx: &mut SessionContext) -> Result<HttpResponse, Error> {
    let body = format!("Hello over TLS, {}!", cx.peer_addr());

    Ok(HttpResponse::new(200)
        .with_header("Content-Type", "text/plain")
        .with_body(body))
}
