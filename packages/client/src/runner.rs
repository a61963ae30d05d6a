//! Interactive client run loop.

use std::{path::PathBuf, sync::Arc, time::Duration};

use rustyline::{DefaultEditor, error::ReadlineError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    api::{BackendApi, HttpBackendApi},
    channel::{ConnectionManager, WebSocketTransport},
    config::ClientConfig,
    context::{LocationContext, LocationHandle},
    domain::{ApplicationId, Coordinate, PostingId, SearchRadius, User, UserId},
    error::ClientError,
    formatter::MapFormatter,
    location::{PermissionStatus, SimulatedLocationProvider},
    map::MapState,
    notification::MediatorState,
    notifier::ConsoleNotifier,
    postings::PostingDesk,
    screen::{MapScreen, MapScreenDeps},
    session::SessionStore,
};

const PROMPT: &str = "map> ";
const HELP: &str = "Commands: fix <lat> <lng> | radius <km> | tap <userId> | close | move <lat> <lng> | \
recenter | accept | dismiss | markers | nearby | applications <postingId> | approve <applicationId> | \
notify <postingId> | logout | quit";

/// Options that only make sense for the interactive binary
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dni: Option<String>,
    pub password: Option<String>,
    /// File of `lat,lng` lines replayed as position fixes
    pub route: Option<PathBuf>,
    /// Delay between replayed fixes
    pub route_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Fix(Coordinate),
    Radius(SearchRadius),
    Tap(UserId),
    Close,
    Move(Coordinate),
    Recenter,
    Accept,
    Dismiss,
    Markers,
    Nearby,
    Posting(PostingCommand),
    Help,
    Logout,
    Quit,
}

/// Commands of the posting owner
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostingCommand {
    Applications(PostingId),
    Approve(ApplicationId),
    Notify(PostingId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command '{0}'")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Radius must be one of 2, 5, 10, 20, 50 km")]
    InvalidRadius,

    #[error("Invalid route line {line}: '{text}'")]
    InvalidRoute { line: usize, text: String },
}

fn parse_coordinate(lat: Option<&str>, lng: Option<&str>) -> Option<Coordinate> {
    let lat = lat?.parse::<f64>().ok()?;
    let lng = lng?.parse::<f64>().ok()?;
    let valid = (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng);
    valid.then(|| Coordinate::new(lat, lng))
}

fn parse_id(id: Option<&str>) -> Option<u64> {
    id?.parse::<u64>().ok()
}

/// Parse one line typed at the prompt.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return Err(CommandError::Usage(HELP));
    };

    match name {
        "fix" => parse_coordinate(parts.next(), parts.next())
            .map(Command::Fix)
            .ok_or(CommandError::Usage("fix <lat> <lng>")),
        "move" => parse_coordinate(parts.next(), parts.next())
            .map(Command::Move)
            .ok_or(CommandError::Usage("move <lat> <lng>")),
        "radius" => {
            let km = parts
                .next()
                .and_then(|km| km.parse::<u32>().ok())
                .ok_or(CommandError::Usage("radius <km>"))?;
            SearchRadius::try_from(km)
                .map(Command::Radius)
                .map_err(|_| CommandError::InvalidRadius)
        }
        "tap" => parse_id(parts.next())
            .map(|id| Command::Tap(UserId::new(id)))
            .ok_or(CommandError::Usage("tap <userId>")),
        "applications" => parse_id(parts.next())
            .map(|id| Command::Posting(PostingCommand::Applications(PostingId::new(id))))
            .ok_or(CommandError::Usage("applications <postingId>")),
        "approve" => parse_id(parts.next())
            .map(|id| Command::Posting(PostingCommand::Approve(ApplicationId::new(id))))
            .ok_or(CommandError::Usage("approve <applicationId>")),
        "notify" => parse_id(parts.next())
            .map(|id| Command::Posting(PostingCommand::Notify(PostingId::new(id))))
            .ok_or(CommandError::Usage("notify <postingId>")),
        "close" => Ok(Command::Close),
        "recenter" => Ok(Command::Recenter),
        "accept" => Ok(Command::Accept),
        "dismiss" => Ok(Command::Dismiss),
        "markers" => Ok(Command::Markers),
        "nearby" => Ok(Command::Nearby),
        "help" => Ok(Command::Help),
        "logout" => Ok(Command::Logout),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// Parse a route file: one `lat,lng` per line, blank lines and `#` comments
/// skipped.
pub fn parse_route(text: &str) -> Result<Vec<Coordinate>, CommandError> {
    text.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line, text)| {
            let mut parts = text.split(',').map(str::trim);
            parse_coordinate(parts.next(), parts.next()).ok_or_else(|| {
                CommandError::InvalidRoute {
                    line,
                    text: text.to_string(),
                }
            })
        })
        .collect()
}

async fn resolve_user(
    api: &dyn BackendApi,
    session: &SessionStore,
    options: &RunOptions,
) -> Result<Option<User>, ClientError> {
    if let (Some(dni), Some(password)) = (&options.dni, &options.password) {
        let response = api.login(dni, password).await?;
        let user = response.user.ok_or(ClientError::NotLoggedIn)?;
        session.save(&user).await?;
        tracing::info!("Logged in as {} (#{})", user.display_name(), user.id);
        return Ok(Some(user));
    }

    let user = session.load().await?;
    match &user {
        Some(user) => tracing::info!("Restored session of {} (#{})", user.display_name(), user.id),
        None => tracing::warn!("No session found; location will not be shared"),
    }
    Ok(user)
}

/// Print markers, the detail modal and notifications as they change.
async fn render_loop(
    mut map: watch::Receiver<MapState>,
    mut mediator: watch::Receiver<MediatorState>,
    cancel: CancellationToken,
) {
    let mut shown = map.borrow_and_update().clone();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = map.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = map.borrow_and_update().clone();
                if state.markers != shown.markers {
                    print!("{}", MapFormatter::format_markers(&state.markers));
                }
                if state.selection != shown.selection
                    && let Some(selection) = &state.selection
                {
                    print!("{}", MapFormatter::format_selection(selection));
                }
                if state.camera_moves != shown.camera_moves
                    && let Some(fix) = &state.last_fix
                {
                    print!("{}", MapFormatter::format_fix(fix));
                }
                shown = state;
            }
            changed = mediator.changed() => {
                if changed.is_err() {
                    break;
                }
                if let MediatorState::Visible(card) = &*mediator.borrow_and_update() {
                    print!("{}", MapFormatter::format_notification(card));
                }
            }
        }
    }
}

fn spawn_route_replay(
    provider: Arc<SimulatedLocationProvider>,
    route: Vec<Coordinate>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tracing::info!("Replaying route of {} fixes", route.len());
        for coordinate in route {
            if !provider.push_fix(coordinate) {
                tracing::debug!("Route fix dropped, location not watched");
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!("Route replay finished");
    });
}

fn spawn_readline() -> mpsc::UnboundedReceiver<String> {
    let (input_tx, input_rx) = mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                tracing::error!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            match rl.readline(PROMPT) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    input_rx
}

/// What the command loop should do next
enum Flow {
    Continue,
    Logout,
    Quit,
}

/// Run a posting-owner command. Returns the text to print, if any.
async fn handle_posting_command(
    command: PostingCommand,
    desk: &PostingDesk,
    context: &LocationHandle,
) -> Result<Option<String>, ClientError> {
    match command {
        PostingCommand::Applications(posting_id) => {
            let applications = desk.applications(posting_id).await?;
            Ok(Some(MapFormatter::format_applications(
                posting_id,
                &applications,
            )))
        }
        PostingCommand::Approve(application_id) => {
            desk.approve(application_id).await?;
            Ok(None)
        }
        PostingCommand::Notify(posting_id) => {
            let location = context.get()?;
            desk.notify_nearby(posting_id, location).await?;
            Ok(None)
        }
    }
}

async fn handle_command(
    command: Command,
    screen: &MapScreen,
    desk: &PostingDesk,
    provider: &SimulatedLocationProvider,
) -> Result<Flow, ClientError> {
    match command {
        Command::Fix(coordinate) => {
            if !provider.push_fix(coordinate) {
                println!("Location is not being watched");
            }
        }
        Command::Radius(radius) => {
            screen.select_radius(radius)?;
            println!("Radius set to {}", radius);
        }
        Command::Tap(user_id) => {
            screen.tap_marker(user_id);
        }
        Command::Close => screen.close_marker_detail(),
        Command::Move(center) => screen.region_changed(center),
        Command::Recenter => {
            if !screen.recenter() {
                println!("No position yet");
            }
        }
        Command::Accept => {
            if screen.accept_notification().await.is_none() {
                println!("No notification to accept");
            }
        }
        Command::Dismiss => {
            if !screen.dismiss_notification() {
                println!("No notification to dismiss");
            }
        }
        Command::Markers => {
            print!("{}", MapFormatter::format_markers(&screen.map().snapshot().markers));
        }
        Command::Nearby => {
            let state = screen.map().snapshot();
            print!(
                "{}",
                MapFormatter::format_nearby(&state.nearby, state.loading_nearby)
            );
        }
        Command::Posting(command) => {
            if let Some(output) = handle_posting_command(command, desk, screen.context()).await? {
                print!("{}", output);
            }
        }
        Command::Help => println!("{}", HELP),
        Command::Logout => return Ok(Flow::Logout),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Log in (or restore the session), mount the map screen and run the
/// command loop until `quit`, `logout` or end of input.
pub async fn run_client(
    config: ClientConfig,
    options: RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let api = Arc::new(HttpBackendApi::new(
        config.base_url.clone(),
        config.rest_timeout,
    )?);
    let session = SessionStore::new(config.session_dir.clone());
    let user = resolve_user(api.as_ref(), &session, &options).await?;

    let route = match &options.route {
        Some(path) => parse_route(&tokio::fs::read_to_string(path).await?)?,
        None => Vec::new(),
    };

    let transport = Arc::new(WebSocketTransport::new(
        config.socket_url(),
        config.connect_timeout,
    ));
    let channel = Arc::new(
        ConnectionManager::new(transport).with_ack_timeout(config.rest_timeout),
    );
    let provider = Arc::new(SimulatedLocationProvider::new(PermissionStatus::Granted));
    let context = LocationContext::provide();

    let desk = PostingDesk::new(
        api.clone(),
        Arc::new(ConsoleNotifier),
        user.as_ref().map(|user| user.id),
    );
    let deps = MapScreenDeps {
        api,
        channel,
        provider: provider.clone(),
        notifier: Arc::new(ConsoleNotifier),
        context: context.handle(),
    };
    let screen = MapScreen::mount(deps, &config, user).await;

    let cancel = CancellationToken::new();
    let render = tokio::spawn(render_loop(
        screen.map().subscribe(),
        screen.mediator().subscribe(),
        cancel.clone(),
    ));
    if !route.is_empty() {
        spawn_route_replay(
            provider.clone(),
            route,
            options.route_interval,
            cancel.clone(),
        );
    }

    println!("\n{}\n", HELP);
    let mut input = spawn_readline();
    let mut logout = false;

    while let Some(line) = input.recv().await {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        match handle_command(command, &screen, &desk, &provider).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Logout) => {
                logout = true;
                break;
            }
            Ok(Flow::Quit) => break,
            Err(e) => println!("{}", e),
        }
    }

    cancel.cancel();
    render.await.ok();
    screen.teardown().await;

    if logout {
        session.clear().await?;
        tracing::info!("Logged out");
    }
    Ok(())
}
