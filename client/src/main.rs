//! Headless roaming client: joins the relay and wanders the map one random
//! step per second, exercising the full engine without a renderer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{error, info, warn};

use client::chunks::DirChunkSource;
use client::collision::CollisionMap;
use client::config;
use client::engine::{Engine, EngineConfig};
use client::net::Connection;
use client::player::Direction;
use client::progress::LoadProgress;
use client::sprites::DirSpriteSource;

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        error!(%info, ?backtrace, "panic");
    }));
}

#[tokio::main]
async fn main() {
    init_runtime();

    let url = config::relay_url();
    let conn = match Connection::open(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            error!(%url, error = %e, "failed to reach the relay");
            std::process::exit(1);
        }
    };

    let assets = config::assets_dir();
    let (mut progress, _watch) = LoadProgress::new();
    let collision = match CollisionMap::load(&assets.join("collision.txt"), |pct| {
        progress.set_collision(pct);
    }) {
        Ok(map) => map,
        Err(e) => {
            // A headless wanderer only needs map bounds to stay sane.
            warn!(error = %e, "collision map unavailable; treating the map as open");
            progress.set_collision(100);
            CollisionMap::all_passable()
        }
    };

    let mut engine = Engine::new(
        conn,
        collision,
        Arc::new(DirChunkSource::new(assets.clone())),
        Arc::new(DirSpriteSource::new(assets)),
        progress,
        EngineConfig {
            name: config::player_name(),
            sprite_index: config::sprite_index(),
            view_width: 960.0,
            view_height: 540.0,
        },
    );

    let mut frame = tokio::time::interval(Duration::from_secs_f32(config::FIXED_TICK));
    let mut wander = tokio::time::interval(Duration::from_secs(1));
    let mut last = Instant::now();
    let mut held: Option<Direction> = None;
    let mut announced_loaded = false;
    let mut rng = rand::rng();

    loop {
        tokio::select! {
            _ = frame.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;

                engine.advance(dt);
                engine.render();

                // Each wander pick takes at most one step; clear the intent
                // once a frame has had the chance to start it.
                if let Some(direction) = held.take() {
                    engine.release(direction);
                }

                if !announced_loaded && engine.progress().loaded() {
                    announced_loaded = true;
                    info!("world loaded");
                }
            }
            _ = wander.tick() => {
                let direction = match rng.random_range(0..4) {
                    0 => Direction::Up,
                    1 => Direction::Down,
                    2 => Direction::Left,
                    _ => Direction::Right,
                };
                engine.press(direction);
                held = Some(direction);

                let (x, y) = engine.local().position();
                info!(
                    x = x as i32,
                    y = y as i32,
                    others = engine.remotes().len(),
                    "wandering",
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                engine.shutdown();
                break;
            }
        }
    }
}
