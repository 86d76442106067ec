use anyhow::Error;
use tracing::{event, Level};
use wharf::{
    plugin::{RoutePlugin, PATH_PARAMS},
    proto::{HttpRequest, HttpResponse},
    HandlerRegistry, PathParams, Server, ServerConfig, ServerModule, SessionContext,
    TracingLayer,
};

fn main() -> Result<(), Error> {
    devutils::init_logging();

    let mut registry = HandlerRegistry::new();
    registry.register_request("index", || index);
    registry.register_request("greet", || greet);

    let routes = RoutePlugin::new()
        .route_method("GET", "/", "index")
        .route_method("GET", "/greet/{name}", "greet");

    let config = ServerConfig::from_toml_str("task_threads = 2")?;
    let mut server = Server::new(config)?;

    let module = ServerModule::builder("http-hello")
        .bind("127.0.0.1:1234".parse()?)
        .factory(registry)
        .plugin(routes)
        .layer(TracingLayer)
        .task_pool(server.pool().clone())
        .build()?;
    server.add_module(module);

    server.run()
}

fn index(request: &HttpRequest, _cx: &mut SessionContext) -> Result<HttpResponse, Error> {
    event!(Level::INFO, agent = ?request.headers().get("User-Agent"), "received request");

    Ok(HttpResponse::new(200)
        .with_header("Content-Type", "text/html")
        .with_body(RESPONSE))
}

fn greet(_request: &HttpRequest, cx: &mut SessionContext) -> Result<HttpResponse, Error> {
    let name = cx
        .attributes()
        .get::<PathParams>(PATH_PARAMS)
        .and_then(|params| params.get("name"))
        .unwrap_or("stranger");

    Ok(HttpResponse::new(200)
        .with_header("Content-Type", "text/plain")
        .with_body(format!("Hello, {}!", name)))
}

const RESPONSE: &str = "<!DOCTYPE html><html><body><h1>Hello, World!</h1></body></html>";
