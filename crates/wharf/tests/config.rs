use anyhow::Error;
use tracing_test::traced_test;
use wharf::{ConfigError, ModuleConfig, ServerConfig, ServerModule};

#[test]
#[traced_test]
fn module_defaults_are_filled_in() -> Result<(), Error> {
    let config = ServerConfig::from_toml_str(
        r#"
        [[modules]]
        name = "web"
        bind = ["127.0.0.1:8080"]
        "#,
    )?;

    assert_eq!(config.task_threads, 4);
    let module = config.module("web").unwrap();
    assert_eq!(*module, ModuleConfig::new("web", vec!["127.0.0.1:8080".parse()?]));
    assert_eq!(module.protocol, "HTTP");
    assert_eq!(module.read_buffer_size, 8192);
    assert_eq!(module.write_queue_limit, 64);
    assert!(module.keep_alive);
    assert!(!module.short_read_heuristic);
    assert!(module.tls.is_none());

    Ok(())
}

#[test]
#[traced_test]
fn full_config_is_parsed() -> Result<(), Error> {
    let config = ServerConfig::from_toml_str(
        r#"
        task_threads = 2

        [[modules]]
        name = "web"
        bind = ["127.0.0.1:8080", "[::1]:8080"]
        keep_alive = false
        max_header_size = 4096
        short_read_heuristic = true

        [[modules]]
        name = "secure"
        bind = ["0.0.0.0:8443"]

        [modules.tls]
        cert_path = "cert.pem"
        key_path = "key.pem"
        "#,
    )?;

    assert_eq!(config.task_threads, 2);

    let web = config.module("web").unwrap();
    assert_eq!(web.bind.len(), 2);
    assert!(!web.keep_alive);
    let limits = web.limits();
    assert_eq!(limits.max_header_size, 4096);
    assert!(limits.short_read_heuristic);

    let secure = config.module("secure").unwrap();
    let tls = secure.tls.as_ref().unwrap();
    assert_eq!(tls.cert_path, "cert.pem");
    assert!(tls.client_ca_path.is_none());

    Ok(())
}

#[test]
#[traced_test]
fn unknown_keys_are_rejected() {
    let result = ServerConfig::from_toml_str(
        r#"
        [[modules]]
        name = "web"
        bind = ["127.0.0.1:8080"]
        colour = "blue"
        "#,
    );

    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
#[traced_test]
fn invalid_values_are_rejected() {
    let cases = [
        "task_threads = 0",
        "[[modules]]\nname = \"a\"\nbind = []",
        "[[modules]]\nname = \"a\"\nbind = [\"127.0.0.1:1\"]\nwrite_queue_limit = 0",
        "[[modules]]\nname = \"a\"\nbind = [\"127.0.0.1:1\"]\nprotocol = \"SMTP\"",
        "[[modules]]\nname = \"a\"\nbind = [\"127.0.0.1:1\"]\n\
         [[modules]]\nname = \"a\"\nbind = [\"127.0.0.1:2\"]",
    ];

    for case in cases {
        let result = ServerConfig::from_toml_str(case);
        assert!(matches!(result, Err(ConfigError::Invalid(_))), "{}", case);
    }
}

#[test]
#[traced_test]
fn missing_file_is_an_io_error() {
    let result = ServerConfig::load("/nonexistent/wharf.toml");
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
#[traced_test]
fn missing_certificate_fails_module() {
    let mut config = ModuleConfig::new("secure", vec!["127.0.0.1:0".parse().unwrap()]);
    config.tls = Some(wharf::TlsSettings {
        cert_path: "/nonexistent/cert.pem".into(),
        key_path: "/nonexistent/key.pem".into(),
        client_ca_path: None,
    });

    let result = ServerModule::from_config(&config);
    assert!(matches!(result, Err(ConfigError::Tls(_))));
}
