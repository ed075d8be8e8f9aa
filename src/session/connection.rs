//! Per-connection handling: read commands, apply them, and render the
//! stream of events the connection is subscribed to.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::constants::{DEFAULT_STREAM, REPLAY_LIMIT_ON_CONNECT};
use crate::domain::engine::Engine;
use crate::domain::event::{Actor, EventType};
use crate::session::auth::{AuthErrorCode, AuthSession, Authenticator};
use crate::session::commands::Command;
use crate::session::registry::SessionRegistry;
use crate::session::render::render;

/// Everything a connection needs, bundled so `handle_connection`'s
/// signature doesn't grow a parameter every time a new dependency is
/// threaded through.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub engine: Arc<Engine>,
    pub authenticator: Arc<dyn Authenticator>,
    pub registry: Arc<SessionRegistry>,
}

/// Welcome banner, two lines exactly.
const WELCOME: &str = "Welcome to HoloMUSH!\nUse: connect <username> <password>";

type ReadHalf = tokio::net::tcp::OwnedReadHalf;
type WriteHalf = tokio::net::tcp::OwnedWriteHalf;

/// Drive one client connection to completion. Never returns an error:
/// any I/O failure or protocol violation ends the connection and is
/// logged, matching this server's fire-and-forget per-connection task
/// model — a single misbehaving client must never take the process down.
pub async fn handle_connection(connection_id: u64, socket: TcpStream, deps: ConnectionDeps, shutdown: CancellationToken) {
    let peer = socket.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    if write_half.write_all(format!("{WELCOME}\n").as_bytes()).await.is_err() {
        return;
    }

    let auth_session = match authenticate(&mut lines, &mut write_half, &deps, connection_id, &peer, &shutdown).await {
        Some(s) => s,
        None => {
            debug!(connection_id, peer, "connection closed before authentication");
            return;
        }
    };
    let character_id = auth_session.character.character_id.clone();

    info!(connection_id, peer, character = %character_id, "character connected");
    if let Err(e) = deps
        .engine
        .emit(DEFAULT_STREAM, EventType::Arrive, Actor::character(&character_id), presence_payload(&character_id))
        .await
    {
        warn!(connection_id, error = %e, "arrive event rejected");
    }

    run_authenticated(connection_id, &auth_session, &mut lines, &mut write_half, &deps, &shutdown).await;

    if let Err(e) = deps
        .engine
        .emit(DEFAULT_STREAM, EventType::Leave, Actor::character(&character_id), presence_payload(&character_id))
        .await
    {
        warn!(connection_id, error = %e, "leave event rejected");
    }
    deps.authenticator.logout(&auth_session.session_id).await;
    deps.registry.unregister(&character_id, connection_id);
    info!(connection_id, character = %character_id, "character disconnected");
}

/// Repeatedly prompts for `connect`/`create` until one succeeds, the
/// client quits, or the connection drops. Returns the claimed auth
/// session, with the character it resolved to.
async fn authenticate(lines: &mut tokio::io::Lines<BufReader<ReadHalf>>, write_half: &mut WriteHalf, deps: &ConnectionDeps, connection_id: u64, peer: &str, shutdown: &CancellationToken) -> Option<AuthSession> {
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return None,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(l)) => l,
            Ok(None) => return None,
            Err(e) => {
                debug!(connection_id, error = %e, "read error before authentication");
                return None;
            }
        };
        match Command::parse(&line) {
            Command::Connect { username, password } => match deps.authenticator.login(&username, &password, "", peer).await {
                Ok((auth_session, _token)) => {
                    if let Some(s) = claim(write_half, deps, connection_id, auth_session).await {
                        return Some(s);
                    }
                }
                Err(code) => {
                    let _ = write_half.write_all(format!("{}\n", login_message(code)).as_bytes()).await;
                }
            },
            Command::Create { username, password } => match deps.authenticator.register(&username, &password).await {
                Ok(identity) => match deps.authenticator.login(&username, &password, "", peer).await {
                    Ok((auth_session, _token)) => {
                        if let Some(s) = claim(write_half, deps, connection_id, auth_session).await {
                            return Some(s);
                        }
                    }
                    Err(code) => {
                        warn!(event = "create", operation = "login_after_register", error = ?code, character = %identity.character_id, "login immediately after registration failed unexpectedly");
                        let _ = write_half.write_all(b"Registration succeeded, but the automatic login failed. Please connect manually.\n").await;
                    }
                },
                Err(code) => {
                    let _ = write_half.write_all(format!("{}\n", register_message(code)).as_bytes()).await;
                }
            },
            Command::Quit => return None,
            Command::Empty => {}
            _ => {
                let _ = write_half.write_all(b"Please connect <username> <password> first.\n").await;
            }
        }
    }
}

/// Claim the session registry slot for a freshly authenticated auth
/// session. Returns it unchanged on success, or `None` after telling
/// the client the character is already connected elsewhere (and
/// logging the auth session back out, since nothing will ever use it).
async fn claim(write_half: &mut WriteHalf, deps: &ConnectionDeps, connection_id: u64, auth_session: AuthSession) -> Option<AuthSession> {
    match deps.registry.register(&auth_session.character.character_id, connection_id) {
        Ok(()) => {
            let _ = write_half.write_all(format!("Connected as {}.\n", auth_session.character.display_name).as_bytes()).await;
            Some(auth_session)
        }
        Err(_) => {
            let _ = write_half.write_all(b"Already connected.\n").await;
            deps.authenticator.logout(&auth_session.session_id).await;
            None
        }
    }
}

/// Maps a login failure to its fixed user-visible line.
fn login_message(code: AuthErrorCode) -> &'static str {
    match code {
        AuthErrorCode::InvalidCredentials => code.message(),
        AuthErrorCode::AccountLocked => code.message(),
        _ => {
            warn!(event = "login", operation = "authenticate", error = ?code, "unexpected login error");
            "Login failed. Please try again."
        }
    }
}

/// Maps a registration failure to its fixed user-visible line: a
/// taken username and an invalid username or password each produce
/// their own fixed line.
fn register_message(code: AuthErrorCode) -> &'static str {
    match code {
        AuthErrorCode::UsernameTaken | AuthErrorCode::InvalidUsername | AuthErrorCode::InvalidPassword => code.message(),
        _ => {
            warn!(event = "register", operation = "register", error = ?code, "unexpected registration error");
            "Registration failed. Please try again."
        }
    }
}

async fn run_authenticated(connection_id: u64, auth_session: &AuthSession, lines: &mut tokio::io::Lines<BufReader<ReadHalf>>, write_half: &mut WriteHalf, deps: &ConnectionDeps, shutdown: &CancellationToken) {
    let character_id = auth_session.character.character_id.as_str();
    let mut subscription = deps.engine.subscribe(DEFAULT_STREAM);
    if send_replay(write_half, deps, connection_id, character_id).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                let _ = write_half.write_all(b"Server is shutting down.\n").await;
                return;
            }
            event = subscription.recv() => {
                let Some(event) = event else { return };
                if is_own_event(&event.actor, character_id) {
                    continue;
                }
                if write_half.write_all(format!("{}\n", render(&event)).as_bytes()).await.is_err() {
                    debug!(connection_id, "write failed, dropping event for this connection");
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(l)) => l,
                    Ok(None) => return,
                    Err(e) => {
                        debug!(connection_id, error = %e, "read error, closing connection");
                        return;
                    }
                };
                if !dispatch(connection_id, character_id, &line, write_half, deps).await {
                    return;
                }
            }
        }
    }
}

/// Handle one authenticated command line. Returns `false` when the
/// connection should close (`quit`).
async fn dispatch(connection_id: u64, character_id: &str, line: &str, write_half: &mut WriteHalf, deps: &ConnectionDeps) -> bool {
    match Command::parse(line) {
        Command::Say(text) => {
            match deps.engine.emit(DEFAULT_STREAM, EventType::Say, Actor::character(character_id), say_payload(&text)).await {
                Ok(_) => {
                    let _ = write_half.write_all(format!("You say, \"{text}\"\n").as_bytes()).await;
                }
                Err(e) => {
                    warn!(connection_id, error = %e, "say rejected");
                    let _ = write_half.write_all(b"Error: Your message could not be sent. Please try again.\n").await;
                }
            }
            true
        }
        Command::Pose(text) => {
            match deps.engine.emit(DEFAULT_STREAM, EventType::Pose, Actor::character(character_id), pose_payload(&text)).await {
                Ok(_) => {
                    let _ = write_half.write_all(format!("You {text}\n").as_bytes()).await;
                }
                Err(e) => {
                    warn!(connection_id, error = %e, "pose rejected");
                    let _ = write_half.write_all(b"Error: Your message could not be sent. Please try again.\n").await;
                }
            }
            true
        }
        Command::Look => {
            if send_replay(write_half, deps, connection_id, character_id).await.is_err() {
                return false;
            }
            true
        }
        Command::Play(name) => {
            let message = if name.eq_ignore_ascii_case(character_id) {
                format!("You are already playing as {character_id}.\n")
            } else {
                format!("{}\n", AuthErrorCode::CharacterNotFound.message())
            };
            let _ = write_half.write_all(message.as_bytes()).await;
            true
        }
        Command::Quit => {
            let _ = write_half.write_all(b"Goodbye.\n").await;
            false
        }
        Command::Empty => true,
        Command::Connect { .. } | Command::Create { .. } => {
            let _ = write_half.write_all(b"Already connected.\n").await;
            true
        }
        Command::Unknown(verb) => {
            let _ = write_half.write_all(format!("Unknown command: {verb}\n").as_bytes()).await;
            true
        }
    }
}

/// Replay up to `REPLAY_LIMIT_ON_CONNECT` events for the shared
/// location stream, bracketed by delimiter lines.
async fn send_replay(write_half: &mut WriteHalf, deps: &ConnectionDeps, connection_id: u64, character_id: &str) -> std::io::Result<()> {
    let events = deps.engine.replay(character_id, DEFAULT_STREAM, None, Some(REPLAY_LIMIT_ON_CONNECT));
    if events.is_empty() {
        return Ok(());
    }
    write_half.write_all(format!("--- {} missed events ---\n", events.len()).as_bytes()).await.inspect_err(|_| {
        debug!(connection_id, "write failed during replay");
    })?;
    for event in &events {
        write_half.write_all(format!("{}\n", render(event)).as_bytes()).await?;
    }
    write_half.write_all(b"--- end of replay ---\n").await?;
    Ok(())
}

fn is_own_event(actor: &Actor, character_id: &str) -> bool {
    actor.kind == crate::domain::event::ActorKind::Character && actor.id == character_id
}

fn say_payload(message: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "message": message })).unwrap_or_default()
}

fn pose_payload(action: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "action": action })).unwrap_or_default()
}

/// Payload shape shared by `arrive` and `leave`, per spec.md §6.
fn presence_payload(character_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "character_id": character_id })).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    use crate::broadcast::Broadcaster;
    use crate::domain::store::InMemoryEventStore;
    use crate::session::auth::DemoAuthenticator;

    fn deps() -> ConnectionDeps {
        ConnectionDeps {
            engine: Arc::new(Engine::new(Arc::new(InMemoryEventStore::new()), Arc::new(Broadcaster::new(16)))),
            authenticator: Arc::new(DemoAuthenticator::new().with_account("alice", "hunter2", "alice").with_account("bob", "swordfish", "bob")),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Accept connections on an ephemeral loopback port, handing each
    /// one to its own `handle_connection` task with a fresh connection
    /// id, exactly as `LineServer` does.
    async fn spawn_server(deps: ConnectionDeps) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut next_id = 1u64;
            while let Ok((socket, _)) = listener.accept().await {
                let id = next_id;
                next_id += 1;
                tokio::spawn(handle_connection(id, socket, deps.clone(), CancellationToken::new()));
            }
        });
        addr
    }

    async fn connect_client(addr: std::net::SocketAddr) -> (WriteHalf, tokio::io::Lines<BufReader<ReadHalf>>) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        (write_half, BufReader::new(read_half).lines())
    }

    async fn drain_welcome(lines: &mut tokio::io::Lines<BufReader<ReadHalf>>) {
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "Welcome to HoloMUSH!");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "Use: connect <username> <password>");
    }

    async fn drain_replay_block(lines: &mut tokio::io::Lines<BufReader<ReadHalf>>) -> Vec<String> {
        let header = lines.next_line().await.unwrap().unwrap();
        assert!(header.starts_with("--- ") && header.ends_with(" missed events ---"), "unexpected replay header: {header}");
        let mut body = Vec::new();
        loop {
            let line = lines.next_line().await.unwrap().unwrap();
            if line == "--- end of replay ---" {
                return body;
            }
            body.push(line);
        }
    }

    #[tokio::test]
    async fn welcome_banner_is_exactly_two_lines() {
        let addr = spawn_server(deps()).await;
        let (_w, mut r) = connect_client(addr).await;
        drain_welcome(&mut r).await;
    }

    #[tokio::test]
    async fn connecting_claims_the_character_and_acknowledges() {
        let addr = spawn_server(deps()).await;
        let (mut w, mut r) = connect_client(addr).await;
        drain_welcome(&mut r).await;
        w.write_all(b"connect alice hunter2\n").await.unwrap();
        // The fresh arrival event replays back to the connecting session
        // itself (replay is not actor-filtered), so a one-line replay
        // block precedes the acknowledgment.
        let body = drain_replay_block(&mut r).await;
        assert_eq!(body, vec!["[alice] alice has arrived."]);
        assert_eq!(r.next_line().await.unwrap().unwrap(), "Connected as alice.");
    }

    #[tokio::test]
    async fn second_connect_for_an_already_online_character_is_rejected() {
        let addr = spawn_server(deps()).await;

        let (mut w1, mut r1) = connect_client(addr).await;
        drain_welcome(&mut r1).await;
        w1.write_all(b"connect alice hunter2\n").await.unwrap();
        drain_replay_block(&mut r1).await;
        assert_eq!(r1.next_line().await.unwrap().unwrap(), "Connected as alice.");

        let (mut w2, mut r2) = connect_client(addr).await;
        drain_welcome(&mut r2).await;
        w2.write_all(b"connect alice hunter2\n").await.unwrap();
        assert_eq!(r2.next_line().await.unwrap().unwrap(), "Already connected.");
    }

    #[tokio::test]
    async fn say_is_filtered_for_the_speaker_but_relayed_to_other_sessions() {
        let addr = spawn_server(deps()).await;

        let (mut wa, mut ra) = connect_client(addr).await;
        drain_welcome(&mut ra).await;
        wa.write_all(b"connect alice hunter2\n").await.unwrap();
        drain_replay_block(&mut ra).await;
        assert_eq!(ra.next_line().await.unwrap().unwrap(), "Connected as alice.");

        let (mut wb, mut rb) = connect_client(addr).await;
        drain_welcome(&mut rb).await;
        wb.write_all(b"connect bob swordfish\n").await.unwrap();
        let bob_replay = drain_replay_block(&mut rb).await;
        // Bob's replay includes alice's earlier arrival plus his own.
        assert!(bob_replay.iter().any(|l| l == "[alice] alice has arrived."));
        assert_eq!(rb.next_line().await.unwrap().unwrap(), "Connected as bob.");

        // Alice sees bob's arrival live before she speaks.
        assert_eq!(ra.next_line().await.unwrap().unwrap(), "[bob] bob has arrived.");

        wa.write_all(b"say hello\n").await.unwrap();
        assert_eq!(ra.next_line().await.unwrap().unwrap(), "You say, \"hello\"");
        assert_eq!(rb.next_line().await.unwrap().unwrap(), "[alice] alice says, \"hello\"");
    }

    #[tokio::test]
    async fn replay_on_connect_surfaces_events_published_before_subscribing() {
        let d = deps();
        d.engine
            .emit(DEFAULT_STREAM, EventType::System, Actor::system(), br#"{"message":"The world shifts."}"#.to_vec())
            .await
            .unwrap();
        d.engine
            .emit(DEFAULT_STREAM, EventType::System, Actor::system(), br#"{"message":"A bell tolls."}"#.to_vec())
            .await
            .unwrap();

        let addr = spawn_server(d).await;
        let (mut w, mut r) = connect_client(addr).await;
        drain_welcome(&mut r).await;
        w.write_all(b"connect alice hunter2\n").await.unwrap();

        let body = drain_replay_block(&mut r).await;
        assert_eq!(
            body,
            vec![
                "[system] *** The world shifts. ***".to_string(),
                "[system] *** A bell tolls. ***".to_string(),
                "[alice] alice has arrived.".to_string(),
            ]
        );
        assert_eq!(r.next_line().await.unwrap().unwrap(), "Connected as alice.");
    }

    #[tokio::test]
    async fn unknown_command_after_authentication_reports_the_verb() {
        let addr = spawn_server(deps()).await;
        let (mut w, mut r) = connect_client(addr).await;
        drain_welcome(&mut r).await;
        w.write_all(b"connect alice hunter2\n").await.unwrap();
        drain_replay_block(&mut r).await;
        assert_eq!(r.next_line().await.unwrap().unwrap(), "Connected as alice.");

        w.write_all(b"dance\n").await.unwrap();
        assert_eq!(r.next_line().await.unwrap().unwrap(), "Unknown command: dance");
    }

    #[tokio::test]
    async fn quit_closes_the_connection() {
        let addr = spawn_server(deps()).await;
        let (mut w, mut r) = connect_client(addr).await;
        drain_welcome(&mut r).await;
        w.write_all(b"connect alice hunter2\n").await.unwrap();
        drain_replay_block(&mut r).await;
        assert_eq!(r.next_line().await.unwrap().unwrap(), "Connected as alice.");

        w.write_all(b"quit\n").await.unwrap();
        assert_eq!(r.next_line().await.unwrap().unwrap(), "Goodbye.");
        assert_eq!(r.next_line().await.unwrap(), None);
    }
}
