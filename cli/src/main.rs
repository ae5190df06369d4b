mod http;
mod ws;

#[cfg(test)]
#[path = "main_test.rs"]
mod main_test;

use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use pinboard::state::draft::{self, MapClick};
use pinboard::state::popup;
use pinboard::state::recency::Recency;
use pinboard::state::viewport::ViewportController;
use pinboard::sync::{self, PinSync};
use pinboard::{ClientConfig, PinDetails, PinStore, Position, PushEvent, SyncError, session};

use crate::http::HttpApi;
use crate::ws::PushSocket;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] pinboard::ConfigError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("http client setup failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("websocket failed: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("subscription server rejected the connection: {0}")]
    ConnectionRejected(String),
    #[error("websocket closed")]
    WsClosed,
    #[error("timed out waiting for connection_ack")]
    Timeout,
    #[error(transparent)]
    Codec(#[from] wire::CodecError),
    #[error("pin {0} not found")]
    PinNotFound(String),
}

#[derive(Parser, Debug)]
#[command(name = "pinwatch", about = "Headless pin map session")]
struct Cli {
    #[arg(long, env = "PINBOARD_GRAPHQL_URL")]
    graphql_url: Option<String>,

    #[arg(long, env = "PINBOARD_WS_URL")]
    ws_url: Option<String>,

    #[arg(long, env = "PINBOARD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Fallback map latitude.
    #[arg(long, global = true, env = "PINBOARD_DEFAULT_LATITUDE", allow_negative_numbers = true)]
    default_latitude: Option<String>,

    /// Fallback map longitude.
    #[arg(long, global = true, env = "PINBOARD_DEFAULT_LONGITUDE", allow_negative_numbers = true)]
    default_longitude: Option<String>,

    /// Fallback map zoom.
    #[arg(long, global = true, env = "PINBOARD_DEFAULT_ZOOM")]
    default_zoom: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the user behind the token.
    Me,
    /// List every pin with its recency class.
    Pins,
    /// Follow live changes until Ctrl-C.
    Watch {
        /// "My location" latitude; the map stays on the default viewport without it.
        #[arg(long, allow_negative_numbers = true, requires = "longitude")]
        latitude: Option<f64>,
        #[arg(long, allow_negative_numbers = true, requires = "latitude")]
        longitude: Option<f64>,
    },
    /// Drop a pin at a point.
    Drop {
        #[arg(long, allow_negative_numbers = true)]
        latitude: f64,
        #[arg(long, allow_negative_numbers = true)]
        longitude: f64,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(long, default_value = "")]
        image: String,
    },
    /// Delete a pin you authored.
    Delete { pin_id: String },
    /// Comment on a pin.
    Comment { pin_id: String, text: String },
}

impl Cli {
    /// Clap has already folded the matching env vars into the flags.
    fn config(&self) -> Result<ClientConfig, CliError> {
        let config = ClientConfig::from_lookup(|key| match key {
            "PINBOARD_GRAPHQL_URL" => self.graphql_url.clone(),
            "PINBOARD_WS_URL" => self.ws_url.clone(),
            "PINBOARD_TOKEN" => self.token.clone(),
            "PINBOARD_DEFAULT_LATITUDE" => self.default_latitude.clone(),
            "PINBOARD_DEFAULT_LONGITUDE" => self.default_longitude.clone(),
            "PINBOARD_DEFAULT_ZOOM" => self.default_zoom.clone(),
            _ => None,
        })?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), CliError> {
    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            eprintln!("ignoring unreadable .env: {error}");
        }
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = cli.config()?;
    let api = HttpApi::new(&config)?;

    match cli.command {
        Command::Me => run_me(&api).await,
        Command::Pins => run_pins(&api).await,
        Command::Watch { latitude, longitude } => {
            let position = latitude.zip(longitude).map(|(latitude, longitude)| Position { latitude, longitude });
            run_watch(&config, &api, position).await
        }
        Command::Drop { latitude, longitude, title, content, image } => {
            run_drop(&api, MapClick::primary(latitude, longitude), PinDetails { title, content, image }).await
        }
        Command::Delete { pin_id } => run_delete(&api, &pin_id).await,
        Command::Comment { pin_id, text } => run_comment(&api, &pin_id, &text).await,
    }
}

async fn run_me(api: &HttpApi) -> Result<(), CliError> {
    let mut store = PinStore::new();
    let user = session::login(&mut store, api).await?;
    println!("{}\t{}\t{}", user.id, user.name, user.email);
    Ok(())
}

async fn run_pins(api: &HttpApi) -> Result<(), CliError> {
    let mut store = PinStore::new();
    sync::load(api, &mut store).await?;
    print_pins(&store);
    Ok(())
}

async fn run_watch(config: &ClientConfig, api: &HttpApi, position: Option<Position>) -> Result<(), CliError> {
    let mut store = PinStore::new();
    store.subscribe(|state| {
        tracing::debug!(pins = state.pins.len(), popup = ?state.popup, logged_in = state.is_logged_in, "state changed");
    });

    let mut viewport = ViewportController::new(config.default_viewport);
    viewport.locate(async move { position }).await;
    let view = viewport.viewport();
    tracing::info!(latitude = view.latitude, longitude = view.longitude, zoom = view.zoom, "viewport");

    if session::login(&mut store, api).await.is_err() {
        eprintln!("continuing signed out");
    }
    if let Err(error) = sync::load(api, &mut store).await {
        eprintln!("initial load failed, waiting for live changes: {error}");
    }

    let (socket, streams) = PushSocket::open(config).await?;
    let mut sync = PinSync::new();
    let handles: Vec<_> = streams.into_iter().map(|(kind, stream)| tokio::spawn(sync.subscribe(kind, stream))).collect();
    let channels = futures::future::join_all(handles);
    tokio::pin!(channels);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    eprintln!("watching {} pins; Ctrl-C to stop", store.state().pins.len());
    let finished = loop {
        tokio::select! {
            Some(event) = sync.next_event() => {
                print_event(&event);
                sync::apply(&mut store, event);
            }
            exits = &mut channels => break Some(exits),
            signal = &mut ctrl_c => {
                if let Err(error) = signal {
                    tracing::warn!(%error, "ctrl-c handler failed");
                }
                break None;
            }
        }
    };

    sync.stop();
    socket.close().await;
    let exits = match finished {
        Some(exits) => exits,
        None => channels.await,
    };
    for exit in exits {
        match exit {
            Ok(exit) => tracing::info!(?exit, "push channel finished"),
            Err(error) => tracing::warn!(%error, "push channel task failed"),
        }
    }
    let late = sync.drain(&mut store);
    eprintln!("stopped with {} pins ({late} late events applied)", store.state().pins.len());
    Ok(())
}

async fn run_drop(api: &HttpApi, click: MapClick, details: PinDetails) -> Result<(), CliError> {
    let mut store = PinStore::new();
    session::login(&mut store, api).await?;
    draft::on_map_click(&mut store, click);
    let pin = draft::submit(&mut store, api, details).await?;
    println!("{}\t{:.5},{:.5}\t{}", pin.id, pin.latitude, pin.longitude, pin.title);
    Ok(())
}

async fn run_delete(api: &HttpApi, pin_id: &str) -> Result<(), CliError> {
    let mut store = PinStore::new();
    session::login(&mut store, api).await?;
    sync::load(api, &mut store).await?;
    select_known(&mut store, pin_id)?;
    let deleted = popup::delete_selected(&mut store, api).await?;
    println!("deleted {deleted}");
    Ok(())
}

async fn run_comment(api: &HttpApi, pin_id: &str, text: &str) -> Result<(), CliError> {
    let mut store = PinStore::new();
    session::login(&mut store, api).await?;
    let pin = session::add_comment(&store, api, pin_id, text).await?;
    println!("{}\t{} comments", pin.id, pin.comments.len());
    Ok(())
}

/// Open the popup on a loaded pin, failing when the id is not in the collection.
fn select_known(store: &mut PinStore, pin_id: &str) -> Result<(), CliError> {
    if store.state().pin(pin_id).is_none() {
        return Err(CliError::PinNotFound(pin_id.to_owned()));
    }
    popup::select(store, pin_id);
    Ok(())
}

fn print_pins(store: &PinStore) {
    let now = now_ms();
    for pin in store.state().pins_by_age() {
        let recency = match pin.recency(now) {
            Recency::New => "new",
            Recency::Established => "established",
        };
        println!(
            "{}\t{:.5},{:.5}\t{recency}\t{}\t{}",
            pin.id, pin.latitude, pin.longitude, pin.title, pin.author.name
        );
    }
}

fn print_event(event: &PushEvent) {
    match event {
        PushEvent::Added(pin) => println!("+ {}\t{}\t{}", pin.id, pin.title, pin.author.name),
        PushEvent::Updated(pin) => println!("~ {}\t{}\t{} comments", pin.id, pin.title, pin.comments.len()),
        PushEvent::Deleted(id) => println!("- {id}"),
    }
}

fn now_ms() -> i64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(duration.as_millis()).unwrap_or(0)
}
