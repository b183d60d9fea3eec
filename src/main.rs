//! Dry run: play one URL into a loopback voice connection and report what
//! came out.

use std::{sync::Arc, time::Duration};

use futures::FutureExt;
use tracing::{error, info};
use tunelink::{
    common::{
        logger,
        types::{AnyError, AnyResult, ChannelKey},
    },
    configs::Config,
    player::{AudioEngine, Notifier},
    voice::{ConnectionStatus, LoopbackTransport},
};

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Arc::new(Config::load()?);
    logger::init(&config);

    let Some(input) = std::env::args().nth(1) else {
        eprintln!("usage: tunelink <url>");
        std::process::exit(2);
    };

    let engine = AudioEngine::with_extractor(config.clone());
    let transport = LoopbackTransport::new(ConnectionStatus::Ready);
    let key = ChannelKey::new("dry-run", 0u64);
    let notifier: Notifier = Arc::new(|message: String| {
        async move {
            info!("notice: {}", message);
            Ok::<(), AnyError>(())
        }
        .boxed()
    });

    engine
        .connect(key.clone(), Arc::new(transport.clone()), notifier)
        .await?;

    if let Err(e) = engine.play(&key, &input).await {
        error!("{}", e.user_message());
        engine.shutdown().await;
        return Err(e.into());
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = wait_for_end(&engine, &key) => info!("stream finished"),
    }

    info!(
        "drained {} bytes, stats: {}",
        transport.bytes_drained(),
        serde_json::to_string(&engine.stats())?
    );
    engine.shutdown().await;
    Ok(())
}

async fn wait_for_end(engine: &AudioEngine, key: &ChannelKey) {
    let mut interval = tokio::time::interval(Duration::from_millis(500));
    loop {
        interval.tick().await;
        let Some(session) = engine.session(key) else {
            return;
        };
        let snapshot = session.snapshot().await;
        if !snapshot.playing && !snapshot.paused {
            return;
        }
    }
}
