//! Integration tests for a client/server connection pair.
//!
//! No sockets: the bytes one side's `ConnectionIo` flushes are fed straight
//! into the other side's, so every test is deterministic.

use std::sync::Arc;
use std::time::Duration;

use chipper_connection::{Connection, ConnectionConfig, ConnectionError, ConnectionIo, Inbox, LossSimulation};
use chipper_protocol::{
    ACKNOWLEDGED, ClientContext, ClientSide, Clientbound, CodecError, Direction, Identifier,
    Marshaller, Message, MessageType, Packet, PacketId, Peer, ProtocolBuilder, ProtocolDefinition,
    ProtocolError, ProtocolRegistry, RegistryError, Role, SendMode, ServerContext, ServerSide,
    Serverbound, Unmarshaller, split_stream_frame,
};
use chipper_transport::ConnectionId;

// =========================================================================
// Test protocol
// =========================================================================

/// Reliable text, both ways.
#[derive(Debug, Clone, PartialEq)]
struct Chat(String);

/// Unreliable position update, both ways.
#[derive(Debug, Clone, PartialEq)]
struct Position(f32);

/// Cosmetic effect; fine to lose.
#[derive(Debug, Clone, PartialEq)]
struct Sparkle;

/// Client → server only.
#[derive(Debug, Clone, PartialEq)]
struct Move(u8);

/// Starts the game protocol.
#[derive(Debug, Clone, PartialEq)]
struct StartGame;

impl Message for Chat {
    fn id(&self) -> Identifier {
        Self::ID
    }

    fn marshal(&self, out: &mut Marshaller) {
        out.write_str(&self.0);
    }
}

impl MessageType for Chat {
    const ID: Identifier = Identifier::from_static("game", "chat");
    const DIRECTION: Direction = Direction::Bidirectional;

    fn unmarshal(input: &mut Unmarshaller<'_>) -> Result<Self, CodecError> {
        Ok(Self(input.read_string()?))
    }
}

impl Message for Position {
    fn id(&self) -> Identifier {
        Self::ID
    }

    fn send_mode(&self) -> SendMode {
        SendMode::Unreliable
    }

    fn marshal(&self, out: &mut Marshaller) {
        out.write_f32(self.0);
    }
}

impl MessageType for Position {
    const ID: Identifier = Identifier::from_static("game", "position");
    const DIRECTION: Direction = Direction::Bidirectional;

    fn unmarshal(input: &mut Unmarshaller<'_>) -> Result<Self, CodecError> {
        Ok(Self(input.read_f32()?))
    }
}

impl Message for Sparkle {
    fn id(&self) -> Identifier {
        Self::ID
    }

    fn send_mode(&self) -> SendMode {
        SendMode::Unimportant
    }

    fn marshal(&self, _out: &mut Marshaller) {}
}

impl MessageType for Sparkle {
    const ID: Identifier = Identifier::from_static("game", "sparkle");
    const DIRECTION: Direction = Direction::Bidirectional;

    fn unmarshal(_input: &mut Unmarshaller<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

impl Message for Move {
    fn id(&self) -> Identifier {
        Self::ID
    }

    fn marshal(&self, out: &mut Marshaller) {
        out.write_u8(self.0);
    }
}

impl MessageType for Move {
    const ID: Identifier = Identifier::from_static("game", "move");
    const DIRECTION: Direction = Direction::Serverbound;

    fn unmarshal(input: &mut Unmarshaller<'_>) -> Result<Self, CodecError> {
        Ok(Self(input.read_u8()?))
    }
}

impl Message for StartGame {
    fn id(&self) -> Identifier {
        Self::ID
    }

    fn marshal(&self, _out: &mut Marshaller) {}
}

impl MessageType for StartGame {
    const ID: Identifier = Identifier::from_static("game", "start");
    const DIRECTION: Direction = Direction::Bidirectional;

    fn unmarshal(_input: &mut Unmarshaller<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

impl Serverbound for Chat {
    fn process_server(self: Box<Self>, ctx: &mut dyn ServerContext) {
        if let Some(ctx) = ctx.downcast_mut::<ServerCtx>() {
            ctx.log.chats.push(self.0);
        }
    }
}

impl Clientbound for Chat {
    fn process_client(self: Box<Self>, ctx: &mut dyn ClientContext) {
        if let Some(ctx) = ctx.downcast_mut::<ClientCtx>() {
            ctx.log.chats.push(self.0);
        }
    }
}

impl Serverbound for Position {
    fn process_server(self: Box<Self>, ctx: &mut dyn ServerContext) {
        if let Some(ctx) = ctx.downcast_mut::<ServerCtx>() {
            ctx.log.positions.push(self.0);
        }
    }
}

impl Clientbound for Position {
    fn process_client(self: Box<Self>, ctx: &mut dyn ClientContext) {
        if let Some(ctx) = ctx.downcast_mut::<ClientCtx>() {
            ctx.log.positions.push(self.0);
        }
    }
}

impl Serverbound for Sparkle {
    fn process_server(self: Box<Self>, _ctx: &mut dyn ServerContext) {}
}

impl Clientbound for Sparkle {
    fn process_client(self: Box<Self>, _ctx: &mut dyn ClientContext) {}
}

impl Serverbound for Move {
    fn process_server(self: Box<Self>, ctx: &mut dyn ServerContext) {
        if let Some(ctx) = ctx.downcast_mut::<ServerCtx>() {
            ctx.log.moves.push(self.0);
        }
    }
}

impl Serverbound for StartGame {
    fn process_server(self: Box<Self>, _ctx: &mut dyn ServerContext) {}
}

impl Clientbound for StartGame {
    fn process_client(self: Box<Self>, ctx: &mut dyn ClientContext) {
        if let Some(ctx) = ctx.downcast_mut::<ClientCtx>() {
            ctx.log.started = true;
        }
    }
}

struct GameProtocol;

impl ProtocolDefinition for GameProtocol {
    const NAME: &'static str = "game";

    fn start_message() -> Option<Identifier> {
        Some(StartGame::ID)
    }

    fn define(builder: &mut ProtocolBuilder) -> Result<(), RegistryError> {
        builder
            .bidirectional::<StartGame>()?
            .bidirectional::<Chat>()?
            .bidirectional::<Position>()?
            .bidirectional::<Sparkle>()?
            .serverbound::<Move>()?;
        Ok(())
    }
}

// =========================================================================
// Contexts
// =========================================================================

#[derive(Debug, Default)]
struct Log {
    chats: Vec<String>,
    positions: Vec<f32>,
    moves: Vec<u8>,
    started: bool,
    /// Disconnect record as seen from inside `on_remote_goodbye`.
    remote_goodbye: Option<(Option<Identifier>, Vec<String>, bool)>,
}

struct ServerCtx {
    conn: Connection,
    log: Log,
}

struct ClientCtx {
    conn: Connection,
    log: Log,
}

fn snapshot(conn: &Connection) -> (Option<Identifier>, Vec<String>, bool) {
    (
        conn.disconnect_reason(),
        conn.disconnect_extras(),
        conn.did_remote_disconnect(),
    )
}

impl ServerContext for ServerCtx {
    fn peer(&self) -> &dyn Peer {
        &self.conn
    }

    fn on_remote_goodbye(&mut self) {
        self.log.remote_goodbye = Some(snapshot(&self.conn));
    }
}

impl ClientContext for ClientCtx {
    fn peer(&self) -> &dyn Peer {
        &self.conn
    }

    fn on_remote_goodbye(&mut self) {
        self.log.remote_goodbye = Some(snapshot(&self.conn));
    }
}

// =========================================================================
// Harness
// =========================================================================

struct Pair {
    registry: Arc<ProtocolRegistry>,
    client: Connection,
    client_io: ConnectionIo<ClientSide>,
    client_inbox: Inbox<ClientSide>,
    client_ctx: ClientCtx,
    server: Connection,
    server_io: ConnectionIo<ServerSide>,
    server_inbox: Inbox<ServerSide>,
    server_ctx: ServerCtx,
}

fn registry() -> Arc<ProtocolRegistry> {
    let mut registry = ProtocolRegistry::new();
    registry.register::<GameProtocol>().unwrap();
    Arc::new(registry)
}

/// A pair still speaking the base protocol.
fn base_pair(config: ConnectionConfig) -> Pair {
    let registry = registry();
    let (client, client_io, client_inbox) = Connection::open::<ClientSide>(
        ConnectionId::new(1),
        None,
        Arc::clone(&registry),
        config.clone(),
    );
    let (server, server_io, server_inbox) = Connection::open::<ServerSide>(
        ConnectionId::new(2),
        None,
        Arc::clone(&registry),
        config,
    );
    Pair {
        registry,
        client_ctx: ClientCtx {
            conn: client.clone(),
            log: Log::default(),
        },
        server_ctx: ServerCtx {
            conn: server.clone(),
            log: Log::default(),
        },
        client,
        client_io,
        client_inbox,
        server,
        server_io,
        server_inbox,
    }
}

/// A pair that already switched to the game protocol.
fn game_pair_with(config: ConnectionConfig) -> Pair {
    let mut pair = base_pair(config);
    let game = Arc::clone(pair.registry.get::<GameProtocol>().unwrap());
    pair.client_io.switch_protocol(Arc::clone(&game));
    pair.server_io.switch_protocol(game);
    pair
}

fn game_pair() -> Pair {
    game_pair_with(ConnectionConfig::default())
}

fn accept(result: Result<impl Sized, ConnectionError>) {
    match result {
        Ok(_) | Err(ConnectionError::Closed) => {}
        Err(e) => panic!("unexpected violation: {e}"),
    }
}

impl Pair {
    /// Moves bytes both ways until neither side has anything left to send.
    fn pump(&mut self) {
        loop {
            let up = self.client_io.flush_outbound();
            let down = self.server_io.flush_outbound();
            if up.taken == 0 && down.taken == 0 {
                break;
            }
            if !up.stream.is_empty() {
                accept(self.server_io.feed_stream_bytes(&up.stream));
            }
            for datagram in &up.datagrams {
                accept(self.server_io.feed_datagram(datagram));
            }
            if !down.stream.is_empty() {
                accept(self.client_io.feed_stream_bytes(&down.stream));
            }
            for datagram in &down.datagrams {
                accept(self.client_io.feed_datagram(datagram));
            }
        }
    }

    /// Processes everything waiting on both sides.
    fn process(&mut self) {
        self.server_inbox.process_pending(&mut self.server_ctx, usize::MAX);
        self.client_inbox.process_pending(&mut self.client_ctx, usize::MAX);
    }

    /// Pumps and processes until quiet.
    fn settle(&mut self) {
        for _ in 0..8 {
            self.pump();
            self.process();
        }
    }
}

/// Splits a flushed stream buffer into its packets.
fn packets(mut stream: &[u8]) -> Vec<Packet> {
    let mut out = Vec::new();
    while let Some((body, used)) = split_stream_frame(stream, usize::MAX).unwrap() {
        out.push(Packet::decode(&mut Unmarshaller::new(body)).unwrap());
        stream = &stream[used..];
    }
    assert!(stream.is_empty(), "partial frame left over");
    out
}

fn frame(packet: &Packet) -> Vec<u8> {
    packet.to_stream_frame()
}

fn chat_payload(text: &str) -> Vec<u8> {
    let mut out = Marshaller::new();
    Chat(text.into()).marshal(&mut out);
    out.finish()
}

// =========================================================================
// Short IDs
// =========================================================================

#[test]
fn test_first_send_is_long_and_later_sends_are_short() {
    let mut pair = game_pair();
    let mut wire = Vec::new();
    for text in ["one", "two", "three"] {
        pair.client.send_message(Chat(text.into()));
        let flush = pair.client_io.flush_outbound();
        wire.extend(packets(&flush.stream));
        pair.server_io.feed_stream_bytes(&flush.stream).unwrap();
    }

    assert_eq!(
        wire[0].id,
        PacketId::Long {
            short_id: 1,
            id: Chat::ID
        }
    );
    assert_eq!(wire[1].id, PacketId::Short(1));
    assert_eq!(wire[2].id, PacketId::Short(1));

    pair.process();
    assert_eq!(pair.server_ctx.log.chats, vec!["one", "two", "three"]);
}

#[test]
fn test_each_direction_numbers_independently() {
    let mut pair = game_pair();
    pair.client.send_message(Chat("hi".into()));
    pair.server.send_message(Position(1.0));
    pair.server.send_message(Chat("hello".into()));

    let down = pair.server_io.flush_outbound();
    let ids: Vec<_> = packets(&down.stream).into_iter().map(|p| p.id).collect();
    assert_eq!(
        ids,
        vec![
            PacketId::Long {
                short_id: 1,
                id: Position::ID
            },
            PacketId::Long {
                short_id: 2,
                id: Chat::ID
            },
        ]
    );

    let up = pair.client_io.flush_outbound();
    assert_eq!(
        packets(&up.stream)[0].id,
        PacketId::Long {
            short_id: 1,
            id: Chat::ID
        }
    );
}

#[test]
fn test_redefining_a_short_id_is_a_violation() {
    let mut pair = game_pair();
    let first = Packet {
        id: PacketId::Long {
            short_id: 1,
            id: Chat::ID,
        },
        payload: chat_payload("a"),
    };
    let conflicting = Packet {
        id: PacketId::Long {
            short_id: 1,
            id: Position::ID,
        },
        payload: vec![0; 4],
    };

    assert_eq!(pair.server_io.feed_stream_bytes(&frame(&first)).unwrap(), 1);
    let err = pair
        .server_io
        .feed_stream_bytes(&frame(&conflicting))
        .unwrap_err();

    assert!(matches!(
        err,
        ConnectionError::Protocol(ProtocolError::ShortIdConflict { short_id: 1, .. })
    ));
    assert!(pair.server.is_closed());
}

#[test]
fn test_aliasing_an_identifier_under_a_new_short_id_is_a_violation() {
    let mut pair = game_pair();
    let chat_as = |short_id| Packet {
        id: PacketId::Long {
            short_id,
            id: Chat::ID,
        },
        payload: chat_payload("x"),
    };

    assert_eq!(pair.server_io.feed_stream_bytes(&frame(&chat_as(1))).unwrap(), 1);
    // Repeating the same binding is harmless.
    assert_eq!(pair.server_io.feed_stream_bytes(&frame(&chat_as(1))).unwrap(), 1);

    let mut flood = Vec::new();
    for short_id in 2..10_000 {
        flood.extend(frame(&chat_as(short_id)));
    }
    let err = pair.server_io.feed_stream_bytes(&flood).unwrap_err();

    assert!(matches!(
        err,
        ConnectionError::Protocol(ProtocolError::ShortIdAlias {
            existing: 1,
            received: 2,
            ..
        })
    ));
    assert!(pair.server.is_closed());
    assert_eq!(pair.server_io.short_ids().sizes(), (1, 0));
}

#[test]
fn test_unknown_short_id_is_a_violation() {
    let mut pair = game_pair();
    let packet = Packet {
        id: PacketId::Short(5),
        payload: chat_payload("?"),
    };
    let err = pair.server_io.feed_stream_bytes(&frame(&packet)).unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::Protocol(ProtocolError::UnknownShortId(5))
    ));
    assert!(!pair.server.is_connected());
}

#[test]
fn test_unknown_short_id_in_datagram_is_a_violation() {
    let mut pair = game_pair();
    let packet = Packet {
        id: PacketId::Short(3),
        payload: vec![0; 4],
    };
    let err = pair.server_io.feed_datagram(&packet.to_datagram()).unwrap_err();
    assert!(err.is_violation());
    assert!(pair.server.is_closed());
}

// =========================================================================
// Stream reassembly
// =========================================================================

fn two_chats() -> Vec<u8> {
    let mut pair = game_pair();
    pair.client.send_message(Chat("first message".into()));
    pair.client.send_message(Chat("second".into()));
    pair.client_io.flush_outbound().stream
}

#[test]
fn test_split_at_every_offset_yields_the_same_messages() {
    let bytes = two_chats();
    for split in 0..=bytes.len() {
        let mut pair = game_pair();
        let (head, tail) = bytes.split_at(split);
        let queued = pair.server_io.feed_stream_bytes(head).unwrap()
            + pair.server_io.feed_stream_bytes(tail).unwrap();
        assert_eq!(queued, 2, "split at {split}");
        assert_eq!(pair.server_io.buffered(), 0);

        pair.process();
        assert_eq!(pair.server_ctx.log.chats, vec!["first message", "second"]);
    }
}

#[test]
fn test_byte_at_a_time_feed() {
    let bytes = two_chats();
    let mut pair = game_pair();
    let mut queued = 0;
    for byte in &bytes {
        queued += pair.server_io.feed_stream_bytes(std::slice::from_ref(byte)).unwrap();
    }
    assert_eq!(queued, 2);
    pair.process();
    assert_eq!(pair.server_ctx.log.chats.len(), 2);
}

#[test]
fn test_partial_frame_stays_buffered() {
    let bytes = two_chats();
    let mut pair = game_pair();
    assert_eq!(pair.server_io.feed_stream_bytes(&bytes[..3]).unwrap(), 0);
    assert_eq!(pair.server_io.buffered(), 3);
    assert!(pair.server.is_connected());
}

// =========================================================================
// Channels
// =========================================================================

#[test]
fn test_without_datagrams_unreliable_falls_back_and_unimportant_is_dropped() {
    let mut pair = game_pair();
    pair.client.send_message(Position(2.5));
    pair.client.send_message(Sparkle);

    let flush = pair.client_io.flush_outbound();
    assert_eq!(flush.taken, 2);
    assert!(flush.datagrams.is_empty());
    let sent = packets(&flush.stream);
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0].id, PacketId::Long { id, .. } if *id == Position::ID));
    assert_eq!(pair.client.stats().dropped_no_channel, 1);

    pair.server_io.feed_stream_bytes(&flush.stream).unwrap();
    pair.process();
    assert_eq!(pair.server_ctx.log.positions, vec![2.5]);
}

#[test]
fn test_with_datagrams_both_degraded_modes_use_them() {
    let mut pair = game_pair();
    pair.client_io.set_datagram_channel(true);
    pair.server_io.set_datagram_channel(true);

    pair.client.send_message(Chat("reliable".into()));
    pair.client.send_message(Position(4.0));
    pair.client.send_message(Sparkle);

    let flush = pair.client_io.flush_outbound();
    assert_eq!(packets(&flush.stream).len(), 1);
    assert_eq!(flush.datagrams.len(), 2);

    let position = Packet::from_datagram(&flush.datagrams[0]).unwrap();
    assert_eq!(
        position.id,
        PacketId::Long {
            short_id: 0,
            id: Position::ID
        }
    );

    for datagram in &flush.datagrams {
        assert!(pair.server_io.feed_datagram(datagram).unwrap());
    }
    pair.process();
    assert_eq!(pair.server_ctx.log.positions, vec![4.0]);
}

#[test]
fn test_datagram_overtaking_the_stream_still_decodes() {
    let mut pair = game_pair();
    pair.client.send_message(Position(1.0));
    let first = pair.client_io.flush_outbound();
    assert_eq!(
        packets(&first.stream)[0].id,
        PacketId::Long {
            short_id: 1,
            id: Position::ID
        }
    );

    pair.client_io.set_datagram_channel(true);
    pair.client.send_message(Position(2.0));
    let second = pair.client_io.flush_outbound();
    assert_eq!(
        Packet::from_datagram(&second.datagrams[0]).unwrap().id,
        PacketId::Long {
            short_id: 0,
            id: Position::ID
        }
    );

    // UDP gets there before the frame that defined short id 1.
    assert!(pair.server_io.feed_datagram(&second.datagrams[0]).unwrap());
    assert!(pair.server.is_connected());
    assert_eq!(pair.server_io.feed_stream_bytes(&first.stream).unwrap(), 1);

    pair.process();
    assert_eq!(pair.server_ctx.log.positions, vec![2.0, 1.0]);
}

#[test]
fn test_loss_simulation_only_touches_unreliable_messages() {
    let mut pair = game_pair_with(ConnectionConfig {
        loss: Some(LossSimulation { drop_chance: 1.0 }),
        ..Default::default()
    });
    pair.client.send_message(Chat("kept".into()));
    pair.client.send_message(Position(1.0));
    pair.client.send_message(Sparkle);
    pair.settle();

    assert_eq!(pair.server_ctx.log.chats, vec!["kept"]);
    assert!(pair.server_ctx.log.positions.is_empty());
    assert_eq!(pair.client.stats().dropped_by_loss, 2);
}

#[test]
fn test_zero_loss_drops_nothing() {
    let mut pair = game_pair_with(ConnectionConfig {
        loss: Some(LossSimulation { drop_chance: 0.0 }),
        ..Default::default()
    });
    for i in 0..50 {
        pair.client.send_message(Position(i as f32));
    }
    pair.settle();
    assert_eq!(pair.server_ctx.log.positions.len(), 50);
    assert_eq!(pair.client.stats().dropped_by_loss, 0);
}

// =========================================================================
// Roles and protocols
// =========================================================================

#[test]
fn test_serverbound_message_reaches_server() {
    let mut pair = game_pair();
    pair.client.send_message(Move(3));
    pair.settle();
    assert_eq!(pair.server_ctx.log.moves, vec![3]);
}

#[test]
fn test_serverbound_message_at_client_is_a_violation() {
    let mut pair = game_pair();
    pair.server.send_message(Move(3));
    let flush = pair.server_io.flush_outbound();
    let err = pair.client_io.feed_stream_bytes(&flush.stream).unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::Protocol(ProtocolError::UnknownMessage {
            role: Role::Client,
            ..
        })
    ));
    assert!(pair.client.is_closed());
}

#[test]
fn test_start_message_switches_protocol() {
    let mut pair = base_pair(ConnectionConfig::default());
    assert_eq!(pair.client_io.protocol().name(), "chipper:base");

    pair.server.send_message(StartGame);
    pair.server.send_message(Chat("welcome".into()));
    pair.settle();

    assert_eq!(pair.client_io.protocol().name(), "game");
    assert!(pair.client_ctx.log.started);
    assert_eq!(pair.client_ctx.log.chats, vec!["welcome"]);
}

#[test]
fn test_foreign_message_without_switch_is_a_violation() {
    let mut pair = base_pair(ConnectionConfig::default());
    pair.server.send_message(Chat("too early".into()));
    let flush = pair.server_io.flush_outbound();
    let err = pair.client_io.feed_stream_bytes(&flush.stream).unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::Protocol(ProtocolError::UnknownMessage { .. })
    ));
}

// =========================================================================
// Goodbye
// =========================================================================

#[test]
fn test_goodbye_twice_sends_one_goodbye() {
    let mut pair = game_pair();
    pair.client.goodbye(Identifier::new("game", "quit"), vec![]);
    pair.client.goodbye(Identifier::new("game", "again"), vec![]);

    let flush = pair.client_io.flush_outbound();
    let sent = packets(&flush.stream);
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0].id, PacketId::Long { id, .. } if id.to_string() == "chipper:goodbye"));
    assert_eq!(pair.client.disconnect_reason(), Some(Identifier::new("game", "quit")));
}

#[test]
fn test_send_after_goodbye_enqueues_nothing() {
    let mut pair = game_pair();
    pair.client.goodbye(Identifier::new("game", "quit"), vec![]);
    let _ = pair.client_io.flush_outbound();

    pair.client.send_message(Chat("ignored".into()));
    assert_eq!(pair.client.stats().outbound_depth, 0);
    assert_eq!(pair.client.stats().dropped_after_goodbye, 1);
    assert_eq!(pair.client_io.flush_outbound().taken, 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_is_dropped_after_grace_period() {
    let pair = game_pair();
    pair.client.goodbye(Identifier::new("game", "quit"), vec![]);
    let deadline = pair.client.goodbye_deadline().unwrap();
    assert_eq!(deadline - tokio::time::Instant::now(), Duration::from_secs(5));

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(!pair.client.is_connected());
}

#[test]
fn test_kick_scenario() {
    let mut pair = game_pair();
    pair.server.goodbye(
        Identifier::new("game", "kicked"),
        vec!["too slow".to_string()],
    );
    pair.settle();

    // The client saw the server's reason from inside its hook.
    let (reason, extras, remote) = pair.client_ctx.log.remote_goodbye.clone().unwrap();
    assert_eq!(reason, Some(Identifier::new("game", "kicked")));
    assert_eq!(extras, vec!["too slow".to_string()]);
    assert!(remote);

    // The client acknowledged, which completed the server's handshake.
    assert!(pair.client.has_said_goodbye());
    assert!(pair.server.is_closed());
    assert!(!pair.server.did_remote_disconnect());
    assert_eq!(pair.server.disconnect_reason(), Some(Identifier::new("game", "kicked")));
    assert!(pair.server_ctx.log.remote_goodbye.is_none());
}

#[test]
fn test_acknowledgement_reason_is_sent_back() {
    let mut pair = game_pair();
    pair.client.goodbye(Identifier::new("game", "quit"), vec![]);
    let up = pair.client_io.flush_outbound();
    pair.server_io.feed_stream_bytes(&up.stream).unwrap();
    pair.process();

    assert!(pair.server.did_remote_disconnect());
    assert!(pair.server.has_said_goodbye());
    let down = pair.server_io.flush_outbound();
    let reply = &packets(&down.stream)[0];
    let mut payload = Unmarshaller::new(&reply.payload);
    assert_eq!(payload.read_identifier().unwrap(), ACKNOWLEDGED);
}

#[test]
fn test_inbound_after_goodbye_is_discarded() {
    let mut pair = game_pair();
    pair.client.send_message(Chat("in flight".into()));
    let up = pair.client_io.flush_outbound();

    pair.server.goodbye(Identifier::new("game", "closing"), vec![]);
    assert_eq!(pair.server_io.feed_stream_bytes(&up.stream).unwrap(), 0);
    assert_eq!(pair.server.stats().dropped_after_goodbye, 1);
    assert!(pair.server_inbox.is_empty());
}

#[test]
fn test_disconnect_discards_both_queues() {
    let mut pair = game_pair();
    pair.server.send_message(Chat("queued inbound".into()));
    let down = pair.server_io.flush_outbound();
    pair.client_io.feed_stream_bytes(&down.stream).unwrap();
    pair.client.send_message(Chat("queued outbound".into()));

    pair.client.disconnect();

    assert!(pair.client_io.flush_outbound().is_empty());
    assert_eq!(pair.client_inbox.process_pending(&mut pair.client_ctx, 10), 0);
    assert!(pair.client_ctx.log.chats.is_empty());
    assert_eq!(pair.client.stats().inbound_depth, 0);
}

#[tokio::test]
async fn test_inbox_recv_ends_on_disconnect() {
    // `_io` keeps the inbound sender alive, so only the disconnect can end
    // the wait.
    let Pair {
        client,
        client_io: _io,
        client_inbox: mut inbox,
        ..
    } = game_pair();
    let waiter = tokio::spawn(async move { inbox.recv().await.is_none() });
    tokio::task::yield_now().await;
    client.disconnect();
    assert!(waiter.await.unwrap());
}

// =========================================================================
// Backpressure
// =========================================================================

#[test]
fn test_queue_depths_are_tracked() {
    let mut pair = game_pair();
    for i in 0..120 {
        pair.client.send_message(Chat(i.to_string()));
    }
    assert_eq!(pair.client.stats().outbound_depth, 120);

    let flush = pair.client_io.flush_outbound();
    assert_eq!(flush.taken, 20);
    assert_eq!(pair.client.stats().outbound_depth, 100);

    pair.server_io.feed_stream_bytes(&flush.stream).unwrap();
    assert_eq!(pair.server.stats().inbound_depth, 20);
    assert_eq!(pair.server_inbox.process_pending(&mut pair.server_ctx, 5), 5);
    assert_eq!(pair.server.stats().inbound_depth, 15);
}
