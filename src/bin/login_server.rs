use std::sync::Arc;
use anyhow::{Context, Result};
use shardlink::config::ServerConfig;
use shardlink::servers::login::LoginState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/server.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: login_server [--conf FILE]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            _ => {}
        }
        i += 1;
    }

    let config = ServerConfig::from_file(&conf_file)
        .with_context(|| format!("Cannot load config: {}", conf_file))?;
    if config.worlds.is_empty() {
        tracing::warn!("[login] [config] No worlds configured; every world server will be turned away.");
    }

    tracing::info!(
        "[login] [started] Login Server Started worlds={} port={}",
        config.worlds.len(),
        config.login_interserver_port
    );

    let state = Arc::new(LoginState::new(config));
    LoginState::run(state).await?;
    Ok(())
}
