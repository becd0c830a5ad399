use std::collections::VecDeque;

use log::{debug, info, warn};

use super::{FrameOutcome, Message, RollbackManager};
use crate::{
    config::RuntimeConfig,
    core::{wasm4::PLAYER_COUNT, Backend},
    error::NetplayError,
    state::State,
};

/// Number of recent local inputs repeated in every [`Message::Input`].
pub const RESEND_WINDOW: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Host,
    Client,
}

/// One peer of a netplay game.
///
/// The session does no I/O. Incoming messages are passed to
/// [`handle_message`](NetplaySession::handle_message) and the messages it
/// returns must be delivered by the caller: replies to the sender, inputs
/// to every other peer.
pub struct NetplaySession<B: Backend> {
    rollback: RollbackManager<B>,
    role: Role,
    local_player: Option<usize>,
    /// Local inputs of the frames `recent_start..recent_start + recent.len()`.
    recent: VecDeque<u8>,
    recent_start: u32,
}

impl<B: Backend> NetplaySession<B> {
    /// Host a game as player 1, starting right away.
    pub fn host(mut backend: B, config: &RuntimeConfig) -> Self {
        backend.set_netplay(Some(0));
        info!("hosting netplay session");
        Self {
            rollback: RollbackManager::new(backend, config, 0),
            role: Role::Host,
            local_player: Some(0),
            recent: VecDeque::with_capacity(RESEND_WINDOW),
            recent_start: 0,
        }
    }

    /// Join a game. The returned [`Message::Join`] goes to the host.
    pub fn join(backend: B, config: &RuntimeConfig) -> (Self, Message) {
        let session = Self {
            rollback: RollbackManager::new(backend, config, 0),
            role: Role::Client,
            local_player: None,
            recent: VecDeque::with_capacity(RESEND_WINDOW),
            recent_start: 0,
        };
        (session, Message::Join)
    }

    /// The local player index, `None` until a client was accepted.
    pub fn local_player(&self) -> Option<usize> {
        self.local_player
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn rollback(&self) -> &RollbackManager<B> {
        &self.rollback
    }

    pub fn rollback_mut(&mut self) -> &mut RollbackManager<B> {
        &mut self.rollback
    }

    /// Process a message from another peer, returning the reply for it.
    pub fn handle_message(&mut self, message: Message) -> Result<Option<Message>, NetplayError> {
        match message {
            Message::Join => self.accept_player().map(Some),
            Message::Start {
                player_idx,
                frame,
                state,
            } => {
                self.start(player_idx as usize, frame, &state)?;
                Ok(None)
            }
            Message::Input {
                player_idx,
                frame,
                inputs,
            } => {
                let player = player_idx as usize;
                if self.local_player.is_none() {
                    return Err(NetplayError::NotStarted);
                }
                if Some(player) == self.local_player {
                    warn!("ignoring inputs that claim to be from the local player");
                    return Ok(None);
                }
                self.rollback.add_remote_player(player)?;
                self.rollback.add_inputs(player, frame, &inputs)?;
                Ok(None)
            }
        }
    }

    /// Simulate the next frame with the local gamepad state.
    ///
    /// Returns the outcome together with the inputs message for all other peers.
    pub fn tick(&mut self, local_input: u8) -> Result<(FrameOutcome, Message), NetplayError> {
        let player = self.local_player.ok_or(NetplayError::NotStarted)?;
        let frame = self.rollback.current_frame();

        // a stalled frame is retried with the input recorded first
        if frame == self.recent_start + self.recent.len() as u32 {
            self.rollback.add_inputs(player, frame, &[local_input])?;
            self.recent.push_back(local_input);
            if self.recent.len() > RESEND_WINDOW {
                self.recent.pop_front();
                self.recent_start += 1;
            }
        }

        let outcome = self.rollback.update();
        let message = Message::Input {
            player_idx: player as u8,
            frame: self.recent_start,
            inputs: self.recent.iter().copied().collect(),
        };
        Ok((outcome, message))
    }

    fn accept_player(&mut self) -> Result<Message, NetplayError> {
        if self.role != Role::Host {
            warn!("only the host accepts players");
            return Err(NetplayError::NotStarted);
        }

        let taken: Vec<usize> = self.rollback.remote_players().collect();
        let player = (1..PLAYER_COUNT)
            .find(|idx| !taken.contains(idx))
            .ok_or(NetplayError::SessionFull)?;
        self.rollback.add_remote_player(player)?;

        let frame = self.rollback.current_frame();
        let state = self.rollback.backend().save_state().to_bytes()?;
        info!("player {} joined at frame {}", player + 1, frame);
        Ok(Message::Start {
            player_idx: player as u8,
            frame,
            state,
        })
    }

    fn start(&mut self, player: usize, frame: u32, state: &[u8]) -> Result<(), NetplayError> {
        if self.role != Role::Client || self.local_player.is_some() {
            debug!("ignoring start message");
            return Ok(());
        }
        if player == 0 || player >= PLAYER_COUNT {
            return Err(NetplayError::UnknownPlayer(player));
        }

        let state = State::from_bytes(state)?;
        self.rollback.backend_mut().load_state(&state)?;
        self.rollback.backend_mut().set_netplay(Some(player));
        self.rollback.restart_at(frame);
        self.rollback.add_remote_player(0)?;

        self.local_player = Some(player);
        self.recent.clear();
        self.recent_start = frame;
        info!("joined as player {} at frame {}", player + 1, frame);
        Ok(())
    }
}
