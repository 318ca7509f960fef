//! # Game Session
//!
//! Connection lifecycle and the command surface built on top of it.
//!
//! A session walks a fixed ladder during connect:
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingDhParams -> AwaitingDhComplete
//!              -> CryptoEstablished -> Authenticated
//! ```
//!
//! Connecting covers the socket (and optional SOCKS5 tunnel) plus the
//! client hello. The two awaiting states are the RSA-signed DH
//! exchange; once the shared secret is derived both directions get a
//! fresh keystream cipher and the identification burst goes out. The
//! server's authentication acknowledgment completes the ladder.
//!
//! Handshake frames arriving out of order are fatal for the attempt.
//! Reconnection applies to the initial connect only, per the configured
//! policy; once authenticated, any transport fault tears the session
//! down without retrying.

use crate::config::{ClientConfig, NetworkConfig, ReconnectPolicy};
use crate::core::packet::{Field, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, Route};
use crate::protocol::headers::HeaderMap;
use crate::protocol::key_exchange::{KeyExchange, PkcsPadding};
use crate::transport::node::{Node, NodeReader, NodeWriter};
use crate::utils::cipher::Rc4;
use crate::utils::{fingerprint, timeout};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Platform token reported in the client hello.
const CLIENT_PLATFORM: &str = "UNITY1";
/// Length of the random session token sent with the hello.
const HELLO_TOKEN_DIGITS: usize = 24;

/// Message names resolved through the header table.
mod messages {
    pub const CLIENT_HELLO: &str = "ClientHello";
    pub const INIT_DH_HANDSHAKE: &str = "InitDhHandshake";
    pub const COMPLETE_DH_HANDSHAKE: &str = "CompleteDhHandshake";
    pub const PONG: &str = "Pong";
    pub const GET_IDENTITY_AGREEMENT_TYPES: &str = "GetIdentityAgreementTypes";
    pub const VERSION_CHECK: &str = "VersionCheck";
    pub const UNIQUE_MACHINE_ID: &str = "UniqueMachineId";
    pub const LOGIN_WITH_TICKET: &str = "LoginWithTicket";
    pub const STAR_GEM: &str = "StarGem";
    pub const REQUEST_ROOM_LOAD: &str = "RequestRoomLoad";
    pub const FRIEND_REQUEST: &str = "FriendRequest";
    pub const REQUEST_GUILD_JOIN: &str = "RequestGuildJoin";
    pub const ROOM_USER_GIVE_RESPECT: &str = "RoomUserGiveRespect";
    pub const SCRATCH_PET: &str = "ScratchPet";

    pub const PING: &str = "Ping";
    pub const DH_INIT_HANDSHAKE: &str = "DhInitHandshake";
    pub const DH_COMPLETE_HANDSHAKE: &str = "DhCompleteHandshake";
    pub const AUTHENTICATION_OK: &str = "AuthenticationOk";
    pub const ACTIVITY_POINT_NOTIFICATION: &str = "ActivityPointNotification";
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingDhParams,
    AwaitingDhComplete,
    CryptoEstablished,
    Authenticated,
}

/// State shared between the session handle and its receive task.
#[derive(Debug)]
struct Shared {
    state: StdMutex<ConnectionState>,
    writer: Mutex<NodeWriter<OwnedWriteHalf>>,
    /// At most one gift exchange waits for a balance notification.
    gift_slot: Mutex<Option<oneshot::Sender<i32>>>,
    activity_points: AtomicI32,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = state;
        }
    }

    fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|guard| *guard)
            .unwrap_or(ConnectionState::Disconnected)
    }
}

/// An authenticated connection to the game server.
///
/// Produced by [`GameSession::connect`], which only returns once the
/// full handshake and login exchange has completed. Commands may then
/// be issued from any task holding the session.
#[derive(Debug)]
pub struct GameSession {
    shared: Arc<Shared>,
    headers: HeaderMap,
    client: ClientConfig,
    receive_task: JoinHandle<()>,
}

impl GameSession {
    /// Connects, handshakes, and authenticates with the configured
    /// server. Transport faults during connect are retried under the
    /// configured [`ReconnectPolicy`]; handshake verification failures
    /// are fatal immediately, retrying cannot make a bad signature good.
    pub async fn connect(
        config: NetworkConfig,
        headers: HeaderMap,
        sso_ticket: &str,
    ) -> Result<GameSession> {
        config.validate_strict()?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(attempt, host = %config.client.host, "connecting");

            let err = match Self::connect_once(&config, &headers, sso_ticket).await {
                Ok(session) => {
                    info!(attempt, "session authenticated");
                    return Ok(session);
                }
                Err(err) => err,
            };

            let retryable = err.is_transport_fault()
                || matches!(err, ProtocolError::Timeout | ProtocolError::ProxyError(_));
            if !retryable {
                return Err(err);
            }
            match config.client.reconnect {
                ReconnectPolicy::Unbounded => {}
                ReconnectPolicy::Limited(max) if attempt < max => {}
                ReconnectPolicy::Limited(_) => return Err(err),
            }

            warn!(attempt, error = %err, "connect attempt failed, retrying");
            tokio::time::sleep(config.client.reconnect_delay).await;
        }
    }

    async fn connect_once(
        config: &NetworkConfig,
        headers: &HeaderMap,
        sso_ticket: &str,
    ) -> Result<GameSession> {
        let mut node = Node::connect(&config.client, &config.transport).await?;
        drive_handshake(&mut node, &config.client, headers, sso_ticket).await?;

        let (reader, writer) = node.split();
        let shared = Arc::new(Shared {
            state: StdMutex::new(ConnectionState::Authenticated),
            writer: Mutex::new(writer),
            gift_slot: Mutex::new(None),
            activity_points: AtomicI32::new(0),
        });

        let dispatcher = build_dispatcher(headers)?;
        let pong_id = headers.outgoing(messages::PONG)?;
        let receive_task = tokio::spawn(receive_loop(
            reader,
            Arc::clone(&shared),
            dispatcher,
            pong_id,
        ));

        Ok(GameSession {
            shared,
            headers: headers.clone(),
            client: config.client.clone(),
            receive_task,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Authenticated
    }

    /// Last activity-point balance reported by the server.
    pub fn activity_points(&self) -> i32 {
        self.shared.activity_points.load(Ordering::Relaxed)
    }

    /// Tears the session down. Safe to call more than once.
    pub async fn disconnect(&self) {
        self.shared.set_state(ConnectionState::Disconnected);
        self.receive_task.abort();
        self.shared.writer.lock().await.disconnect().await;
        self.shared.gift_slot.lock().await.take();
        info!("session disconnected");
    }

    /// Sends a prebuilt packet. The escape hatch for messages the
    /// command surface does not cover.
    pub async fn send_packet(&self, packet: Packet) -> Result<()> {
        self.send(packet).await
    }

    /// Opens a room by id.
    pub async fn load_room(&self, room_id: i32) -> Result<()> {
        let id = self.headers.outgoing(messages::REQUEST_ROOM_LOAD)?;
        self.send(Packet::new(
            id,
            &[
                Field::Int(0),
                Field::Int(room_id),
                Field::Str(String::new()),
                Field::Int(-1),
                Field::Int(-1),
            ],
        ))
        .await
    }

    /// Sends a friend request to a user by name.
    pub async fn add_friend(&self, username: &str) -> Result<()> {
        let id = self.headers.outgoing(messages::FRIEND_REQUEST)?;
        self.send(Packet::new(id, &[Field::Str(username.to_owned())]))
            .await
    }

    /// Requests membership in a group.
    pub async fn join_group(&self, group_id: i32) -> Result<()> {
        let id = self.headers.outgoing(messages::REQUEST_GUILD_JOIN)?;
        self.send(Packet::new(id, &[Field::Int(group_id)])).await
    }

    /// Gives respect to a user in the current room.
    pub async fn respect(&self, user_id: i32) -> Result<()> {
        let id = self.headers.outgoing(messages::ROOM_USER_GIVE_RESPECT)?;
        self.send(Packet::new(id, &[Field::Int(user_id)])).await
    }

    /// Scratches a pet in the current room.
    pub async fn scratch_pet(&self, pet_id: i32) -> Result<()> {
        let id = self.headers.outgoing(messages::SCRATCH_PET)?;
        self.send(Packet::new(id, &[Field::Int(pet_id)])).await
    }

    /// Gifts the full activity-point balance to a user.
    ///
    /// Sends a single-point gift first, waits for the balance
    /// notification it triggers, then gifts the remaining balance after
    /// a short pacing delay. Returns the total number of points
    /// gifted. Only one gift exchange may be outstanding at a time.
    pub async fn send_gift(&self, user_id: i32) -> Result<i32> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut slot = self.shared.gift_slot.lock().await;
            if slot.is_some() {
                return Err(ProtocolError::Custom(constants::ERR_GIFT_IN_FLIGHT.into()));
            }
            *slot = Some(sender);
        }

        if let Err(err) = self.send_star_gem(user_id, 1).await {
            self.shared.gift_slot.lock().await.take();
            return Err(err);
        }

        let waited = timeout::with_timeout_error(
            async { receiver.await.map_err(|_| ProtocolError::ConnectionClosed) },
            self.client.handshake_deadline,
        )
        .await;
        let balance = match waited {
            Ok(balance) => balance,
            Err(err) => {
                self.shared.gift_slot.lock().await.take();
                return Err(err);
            }
        };

        if balance < 1 {
            return Ok(1);
        }
        tokio::time::sleep(timeout::GIFT_PACING).await;
        self.send_star_gem(user_id, balance).await?;
        Ok(balance + 1)
    }

    async fn send_star_gem(&self, user_id: i32, quantity: i32) -> Result<()> {
        let id = self.headers.outgoing(messages::STAR_GEM)?;
        self.send(Packet::new(
            id,
            &[Field::Int(0), Field::Int(user_id), Field::Int(quantity)],
        ))
        .await
    }

    async fn send(&self, mut packet: Packet) -> Result<()> {
        if !self.is_connected() {
            return Err(ProtocolError::Custom(constants::ERR_NOT_CONNECTED.into()));
        }
        self.shared.writer.lock().await.send_packet(&mut packet).await
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        self.receive_task.abort();
    }
}

/// Runs the hello and handshake exchange to completion on an unsplit
/// node. Each awaited frame runs under the configured deadline.
async fn drive_handshake<R, W>(
    node: &mut Node<R, W>,
    client: &ClientConfig,
    headers: &HeaderMap,
    sso_ticket: &str,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let dispatcher = build_dispatcher(headers)?;
    let mut exchange = KeyExchange::new(client.rsa_exponent, &client.rsa_modulus)?;
    let mut state = ConnectionState::Connecting;

    let hello_token = fingerprint::random_hex(HELLO_TOKEN_DIGITS);
    let mut hello = Packet::new(
        headers.outgoing(messages::CLIENT_HELLO)?,
        &[
            Field::Str(hello_token),
            Field::Str(CLIENT_PLATFORM.to_owned()),
            Field::Int(0),
            Field::Int(0),
        ],
    );
    node.send_packet(&mut hello).await?;
    let mut init = Packet::new(headers.outgoing(messages::INIT_DH_HANDSHAKE)?, &[]);
    node.send_packet(&mut init).await?;
    state = transition(state, ConnectionState::AwaitingDhParams);

    loop {
        let mut packet =
            timeout::with_timeout_error(node.receive_packet(), client.handshake_deadline).await?;
        if packet.is_corrupted() {
            warn!("corrupted frame during handshake, ignoring");
            continue;
        }

        match dispatcher.dispatch(packet.id()) {
            Route::Ping => {
                let mut pong = Packet::new(headers.outgoing(messages::PONG)?, &[]);
                node.send_packet(&mut pong).await?;
            }
            Route::DhParams => {
                if state != ConnectionState::AwaitingDhParams {
                    return Err(out_of_order(state));
                }
                let prime = packet.read_string()?;
                let generator = packet.read_string()?;
                exchange.verify_signed_primes(&prime, &generator)?;
                exchange.set_padding(PkcsPadding::RandomByte);

                let mut complete = Packet::new(
                    headers.outgoing(messages::COMPLETE_DH_HANDSHAKE)?,
                    &[Field::Str(exchange.public_key_hex()?)],
                );
                node.send_packet(&mut complete).await?;
                state = transition(state, ConnectionState::AwaitingDhComplete);
            }
            Route::DhComplete => {
                if state != ConnectionState::AwaitingDhComplete {
                    return Err(out_of_order(state));
                }
                let server_public = packet.read_string()?;
                let shared_key = exchange.derive_shared_key(&server_public)?;
                node.set_encrypter(Rc4::new(&shared_key));
                node.set_decrypter(Rc4::new(&shared_key));
                state = transition(state, ConnectionState::CryptoEstablished);

                send_identification(node, client, headers, sso_ticket).await?;
            }
            Route::AuthOk => {
                if state != ConnectionState::CryptoEstablished {
                    return Err(out_of_order(state));
                }
                transition(state, ConnectionState::Authenticated);
                return Ok(());
            }
            Route::ActivityPoints | Route::Ignore => {}
        }
    }
}

/// The ciphered burst identifying the client: agreement query, version
/// report, machine fingerprint, then the login ticket.
async fn send_identification<R, W>(
    node: &mut Node<R, W>,
    client: &ClientConfig,
    headers: &HeaderMap,
    sso_ticket: &str,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut agreements = Packet::new(
        headers.outgoing(messages::GET_IDENTITY_AGREEMENT_TYPES)?,
        &[],
    );
    node.send_packet(&mut agreements).await?;

    let mut version = Packet::new(
        headers.outgoing(messages::VERSION_CHECK)?,
        &[
            Field::Int(0),
            Field::Str(client.product_version.clone()),
            Field::Str(String::new()),
        ],
    );
    node.send_packet(&mut version).await?;

    let mut machine_id = Packet::new(
        headers.outgoing(messages::UNIQUE_MACHINE_ID)?,
        &[
            Field::Str(fingerprint::machine_hash()),
            Field::Str("n/a".to_owned()),
            Field::Str("Chrome 90".to_owned()),
            Field::Str("n/a".to_owned()),
        ],
    );
    node.send_packet(&mut machine_id).await?;

    let mut login = Packet::new(
        headers.outgoing(messages::LOGIN_WITH_TICKET)?,
        &[Field::Str(sso_ticket.to_owned()), Field::Int(0)],
    );
    node.send_packet(&mut login).await?;
    Ok(())
}

fn transition(from: ConnectionState, to: ConnectionState) -> ConnectionState {
    debug!(?from, ?to, "handshake state transition");
    to
}

fn out_of_order(state: ConnectionState) -> ProtocolError {
    ProtocolError::Custom(format!("handshake frame out of order in state {state:?}"))
}

/// Builds the id route table from the header map. All lifecycle
/// messages must resolve; a table missing any of them cannot carry a
/// session.
fn build_dispatcher(headers: &HeaderMap) -> Result<Dispatcher> {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(headers.incoming(messages::PING)?, Route::Ping);
    dispatcher.register(headers.incoming(messages::DH_INIT_HANDSHAKE)?, Route::DhParams);
    dispatcher.register(
        headers.incoming(messages::DH_COMPLETE_HANDSHAKE)?,
        Route::DhComplete,
    );
    dispatcher.register(headers.incoming(messages::AUTHENTICATION_OK)?, Route::AuthOk);
    dispatcher.register(
        headers.incoming(messages::ACTIVITY_POINT_NOTIFICATION)?,
        Route::ActivityPoints,
    );
    Ok(dispatcher)
}

/// Post-authentication receive loop. Answers pings, tracks activity
/// points, and wakes a waiting gift exchange. Any receive or send
/// fault ends the session.
async fn receive_loop(
    mut reader: NodeReader<OwnedReadHalf>,
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    pong_id: u16,
) {
    loop {
        let mut packet = match reader.receive_packet().await {
            Ok(packet) => packet,
            Err(err) => {
                debug!(error = %err, "receive loop ending");
                break;
            }
        };
        if packet.is_corrupted() {
            warn!(bytes = packet.length(), "dropping corrupted frame");
            continue;
        }

        match dispatcher.dispatch(packet.id()) {
            Route::Ping => {
                let mut pong = Packet::new(pong_id, &[]);
                if shared.writer.lock().await.send_packet(&mut pong).await.is_err() {
                    break;
                }
            }
            Route::ActivityPoints => {
                let balance = match packet.read_i32() {
                    Ok(balance) => balance,
                    Err(err) => {
                        warn!(error = %err, "malformed activity point notification");
                        continue;
                    }
                };
                shared.activity_points.store(balance, Ordering::Relaxed);
                if let Some(sender) = shared.gift_slot.lock().await.take() {
                    let _ = sender.send(balance);
                }
            }
            // Handshake routes cannot recur once authenticated.
            Route::DhParams | Route::DhComplete | Route::AuthOk | Route::Ignore => {}
        }
    }

    shared.set_state(ConnectionState::Disconnected);
    shared.gift_slot.lock().await.take();
}
