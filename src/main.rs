// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use cask_log::{server, Config, Engine};
use tokio::{net::TcpListener, signal};

const BIND_ADDR: &str = "0.0.0.0:1379";
const DEFAULT_BASE_DIR: &str = "data";

#[tokio::main]
async fn main() -> cask_log::Result<()> {
    env_logger::init();

    let base_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_BASE_DIR.to_owned());

    let engine = Engine::open(Config::new(base_dir))?;

    let listener = TcpListener::bind(BIND_ADDR).await?;
    log::info!("listening on {BIND_ADDR}");

    server::run(engine.clone(), listener, signal::ctrl_c()).await;

    engine.shutdown().await;

    Ok(())
}
