use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use stagecast_lib::capture::SourceKind;
use stagecast_lib::config::AppConfig;
use stagecast_lib::model::{DisplayContent, OrganizationId, PresentationSettings};
use stagecast_lib::notifier::{ChangeFeed, HttpChangeFeed};
use stagecast_lib::peer::ice::probe_ice_server;
use stagecast_lib::peer::{RemoteTrack, RtcPeerFactory, ServerConfig, VideoSink};
use stagecast_lib::store::{Connectivity, HttpStoreClient, StoreClient};
use stagecast_lib::{
    logger, AuthContext, DisplaySink, ProjectorSession, ReceiverEngine, SenderEngine,
    SenderSession, StateSynchronizer, SyncOptions, SyntheticCapture,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stagecast", version, about = "Projector display sync and live camera signaling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct Remote {
    /// Базовый URL сервера, например http://127.0.0.1:8080
    #[arg(long, env = "STAGECAST_SERVER")]
    server: String,
    #[arg(long, env = "STAGECAST_TOKEN")]
    token: String,
    #[arg(long, env = "STAGECAST_ORG", default_value = "default")]
    org: String,
    /// Файл конфигурации (интервалы синхронизации, ICE-серверы)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Сервер сигналинга и состояния дисплея
    Serve {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Проверка связи с сервером и вывод текущей записи
    Probe {
        #[command(flatten)]
        remote: Remote,
    },
    /// Проверка доступности STUN/TURN сервера
    ProbeIce {
        #[arg(long)]
        url: String,
        #[arg(long = "type", default_value = "stun")]
        kind: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        credential: Option<String>,
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Headless-отправитель: синтетическая камера в эфир до Ctrl-C
    Send {
        #[command(flatten)]
        remote: Remote,
        #[arg(long, value_enum, default_value = "front")]
        source: SourceArg,
    },
    /// Headless-проектор: показывает состояние в логе до Ctrl-C
    Project {
        #[command(flatten)]
        remote: Remote,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum SourceArg {
    Front,
    Back,
    Screen,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Front => SourceKind::Front,
            SourceArg::Back => SourceKind::Back,
            SourceArg::Screen => SourceKind::Screen,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

struct Clients {
    store: Arc<HttpStoreClient>,
    factory: Arc<RtcPeerFactory>,
    sync: StateSynchronizer,
}

fn connect(remote: &Remote, config: &AppConfig) -> Clients {
    let auth = AuthContext::new(OrganizationId::new(remote.org.clone()), remote.token.clone());
    let store = Arc::new(HttpStoreClient::new(
        remote.server.clone(),
        auth.clone(),
        config.sync.probe_timeout(),
    )
    .with_request_timeout(config.sync.request_timeout()));
    let feed: Arc<dyn ChangeFeed> = Arc::new(
        HttpChangeFeed::new(remote.server.clone(), auth)
            .with_connect_timeout(config.sync.request_timeout()),
    );
    let factory = Arc::new(RtcPeerFactory::new(
        config.ice_servers.clone(),
        config.negotiation.gathering_timeout(),
    ));
    let sync = StateSynchronizer::new(
        store.clone(),
        Some(feed),
        SyncOptions::from(&config.sync),
    );
    Clients {
        store,
        factory,
        sync,
    }
}

struct LogDisplay;

impl DisplaySink for LogDisplay {
    fn render(&self, content: &DisplayContent, settings: &PresentationSettings) {
        match content {
            DisplayContent::None => info!("display: blank"),
            DisplayContent::Text { title, lines } => {
                info!(%title, lines = lines.len(), scale = settings.font_scale, "display: text")
            }
            DisplayContent::Media { uri } => info!(%uri, "display: media"),
            DisplayContent::LiveFeed => info!("display: live feed"),
        }
    }
}

struct LogVideo;

impl VideoSink for LogVideo {
    fn bind(&self, track: RemoteTrack) {
        info!(track = %track.id, stream = %track.stream_id, kind = %track.kind, "video track bound");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => {
            let config = load_config(config.as_ref())?;
            info!(bind = %config.server.bind, orgs = config.tokens.len(), "starting signaling server");
            stagecast_lib::server::serve(&config, shutdown_signal())
                .await
                .context("server failed")?;
        }
        Command::Probe { remote } => {
            let config = load_config(remote.config.as_ref())?;
            let clients = connect(&remote, &config);
            match clients.store.probe().await {
                Connectivity::Connected => {
                    let record = clients.store.fetch_record().await?;
                    println!("connected, signaling record:");
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                Connectivity::Disconnected => println!("disconnected"),
            }
        }
        Command::ProbeIce {
            url,
            kind,
            username,
            credential,
            timeout_ms,
        } => {
            let server = ServerConfig {
                id: "cli".into(),
                r#type: kind,
                url,
                username,
                credential,
            };
            let ok = probe_ice_server(&server, Duration::from_millis(timeout_ms)).await;
            println!("{}", if ok { "available" } else { "unavailable" });
        }
        Command::Send { remote, source } => {
            let config = load_config(remote.config.as_ref())?;
            let clients = connect(&remote, &config);
            let engine = SenderEngine::new(clients.store.clone(), clients.factory.clone());
            let mut session =
                SenderSession::mount(&clients.sync, engine, SyntheticCapture::new());
            let offer = session.go_live(source.into()).await?;
            info!(offer = %offer.fingerprint(), "live, press ctrl-c to stop");
            shutdown_signal().await;
            if let Err(e) = session.stop().await {
                warn!(error = %e, "stop did not clear signaling");
            }
            session.unmount().await;
        }
        Command::Project { remote } => {
            let config = load_config(remote.config.as_ref())?;
            let clients = connect(&remote, &config);
            let engine = ReceiverEngine::new(clients.store.clone(), clients.factory.clone())
                .with_video_sink(Arc::new(LogVideo));
            let session = ProjectorSession::mount(&clients.sync, engine, Some(Arc::new(LogDisplay)));
            shutdown_signal().await;
            session.unmount().await;
        }
    }
    Ok(())
}
