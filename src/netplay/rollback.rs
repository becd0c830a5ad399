use std::collections::BTreeMap;

use log::{debug, trace, warn};

use crate::{
    config::RuntimeConfig,
    core::{wasm4::PLAYER_COUNT, Backend},
    error::NetplayError,
    state::State,
};

/// Result of [`RollbackManager::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was simulated.
    Simulated,
    /// A remote peer fell too far behind, nothing was simulated.
    Stalled,
}

/// One slot of the history ring.
#[derive(Debug, Clone, Default)]
struct HistoryFrame {
    /// Frame this slot belongs to, `None` while unused.
    frame: Option<u32>,
    inputs: [u8; PLAYER_COUNT],
    /// Whether each input was guessed rather than received.
    predicted: [bool; PLAYER_COUNT],
    /// Backend state at the beginning of the frame.
    state: State,
}

#[derive(Debug, Clone, Default)]
struct Player {
    /// Inputs received for frames that were not simulated yet.
    future_inputs: BTreeMap<u32, u8>,
    /// Remote players drive the stall check.
    remote: bool,
    /// First frame whose input has not arrived yet.
    next_expected: u32,
}

/// Collects gamepad inputs from all players and handles rollbacks.
///
/// Every frame is simulated right away. Players whose input for the frame
/// is unknown repeat their previous input. When the real input for a past
/// frame arrives and differs from the guess, the next [`update`] restores
/// the state from before that frame and simulates everything since again.
///
/// [`update`]: RollbackManager::update
pub struct RollbackManager<B: Backend> {
    backend: B,
    history: Vec<HistoryFrame>,
    players: [Player; PLAYER_COUNT],
    start_frame: u32,
    current_frame: u32,
    rollback_target: Option<u32>,
    muted: bool,
}

impl<B: Backend> RollbackManager<B> {
    /// Start managing `backend` at `start_frame`.
    pub fn new(backend: B, config: &RuntimeConfig, start_frame: u32) -> Self {
        let history_length = config.history_length.max(1);
        Self {
            backend,
            history: vec![HistoryFrame::default(); history_length],
            players: Default::default(),
            start_frame,
            current_frame: start_frame,
            rollback_target: None,
            muted: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// The next frame to be simulated.
    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    pub fn history_length(&self) -> usize {
        self.history.len()
    }

    /// The oldest frame with a pending correction.
    pub fn rollback_target(&self) -> Option<u32> {
        self.rollback_target
    }

    /// Mute audio outside of replays.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.backend.set_muted(muted);
    }

    /// Drop all history and continue at `frame`, e.g. after adopting a
    /// snapshot from another peer.
    pub fn restart_at(&mut self, frame: u32) {
        for slot in &mut self.history {
            *slot = HistoryFrame::default();
        }
        for player in &mut self.players {
            player.future_inputs.clear();
            player.next_expected = frame;
        }
        self.start_frame = frame;
        self.current_frame = frame;
        self.rollback_target = None;
    }

    /// Wait for `player`'s input before running too far ahead.
    pub fn add_remote_player(&mut self, player: usize) -> Result<(), NetplayError> {
        let current_frame = self.current_frame;
        let slot = self
            .players
            .get_mut(player)
            .ok_or(NetplayError::UnknownPlayer(player))?;
        if !slot.remote {
            debug!("player {} joined at frame {}", player, current_frame);
            slot.remote = true;
            slot.next_expected = slot.next_expected.max(current_frame);
        }
        Ok(())
    }

    pub fn remote_players(&self) -> impl Iterator<Item = usize> + '_ {
        self.players
            .iter()
            .enumerate()
            .filter(|(_, player)| player.remote)
            .map(|(idx, _)| idx)
    }

    /// Add inputs of `player` for consecutive frames starting at `frame`.
    ///
    /// Inputs for frames that were simulated on a guess correct the guess.
    /// Inputs that were already known, and inputs older than the history,
    /// are ignored. So are inputs a whole history length or more ahead of
    /// the current frame, which no peer in sync can have sent.
    pub fn add_inputs(
        &mut self,
        player: usize,
        frame: u32,
        inputs: &[u8],
    ) -> Result<(), NetplayError> {
        if player >= PLAYER_COUNT {
            return Err(NetplayError::UnknownPlayer(player));
        }

        let oldest = self.oldest_retained_frame();
        let horizon = self
            .current_frame
            .saturating_add(self.history.len() as u32);
        let mut last_received = None;
        for (offset, &input) in inputs.iter().enumerate() {
            let frame = match u32::try_from(offset)
                .ok()
                .and_then(|offset| frame.checked_add(offset))
            {
                Some(frame) if frame < horizon => frame,
                _ => {
                    warn!(
                        "dropping {} inputs of player {} beyond frame {}",
                        inputs.len() - offset,
                        player,
                        horizon
                    );
                    break;
                }
            };
            last_received = Some(frame);

            if frame >= self.current_frame {
                self.players[player]
                    .future_inputs
                    .entry(frame)
                    .or_insert(input);
            } else if frame < oldest {
                trace!("input of player {} for frame {} is too old", player, frame);
            } else {
                let slot = self.slot_mut(frame);
                if slot.predicted[player] {
                    slot.predicted[player] = false;
                    if slot.inputs[player] != input {
                        slot.inputs[player] = input;
                        self.rollback_target =
                            Some(self.rollback_target.map_or(frame, |t| t.min(frame)));
                    }
                }
            }
        }

        if let Some(last) = last_received {
            let player = &mut self.players[player];
            player.next_expected = player.next_expected.max(last + 1);
        }
        Ok(())
    }

    /// Whether some remote player is so far behind that simulating another
    /// frame would drop the history its input still has to correct.
    pub fn is_stalled(&self) -> bool {
        let limit = self.history.len() as u32;
        self.players
            .iter()
            .any(|p| p.remote && self.current_frame.saturating_sub(p.next_expected) >= limit)
    }

    /// Apply pending corrections, then simulate the current frame.
    pub fn update(&mut self) -> FrameOutcome {
        if self.is_stalled() {
            debug!("stalled at frame {}", self.current_frame);
            return FrameOutcome::Stalled;
        }

        if let Some(target) = self.rollback_target.take() {
            self.replay_from(target);
        }

        let frame = self.current_frame;
        let previous = if frame > self.start_frame {
            self.slot(frame - 1).inputs
        } else {
            [0; PLAYER_COUNT]
        };

        let len = self.history.len();
        let slot = &mut self.history[frame as usize % len];
        slot.frame = Some(frame);
        slot.state = self.backend.save_state();

        for (idx, player) in self.players.iter_mut().enumerate() {
            match player.future_inputs.remove(&frame) {
                Some(input) => {
                    slot.inputs[idx] = input;
                    slot.predicted[idx] = false;
                }
                None => {
                    slot.inputs[idx] = previous[idx];
                    slot.predicted[idx] = true;
                }
            }
        }

        let inputs = slot.inputs;
        self.simulate(inputs);
        self.current_frame += 1;
        FrameOutcome::Simulated
    }

    fn replay_from(&mut self, target: u32) {
        let end = self.current_frame;
        debug!("rolling back {} frames to frame {}", end - target, target);

        // guesses after the corrected frame repeat the corrected input
        for frame in target + 1..end {
            let previous = self.slot(frame - 1).inputs;
            let slot = self.slot_mut(frame);
            for idx in 0..PLAYER_COUNT {
                if slot.predicted[idx] {
                    slot.inputs[idx] = previous[idx];
                }
            }
        }

        self.backend.set_muted(true);
        for frame in target..end {
            let len = self.history.len();
            self.check_slot(frame);
            let slot = &mut self.history[frame as usize % len];
            if frame == target {
                if let Err(err) = self.backend.load_state(&slot.state) {
                    panic!("history snapshot of frame {frame} cannot be restored: {err}");
                }
            } else {
                slot.state = self.backend.save_state();
            }
            let inputs = slot.inputs;
            self.simulate(inputs);
        }
        self.backend.set_muted(self.muted);
    }

    fn simulate(&mut self, inputs: [u8; PLAYER_COUNT]) {
        for (idx, &input) in inputs.iter().enumerate() {
            self.backend.set_gamepad(idx, input);
        }
        self.backend.call_update();
    }

    fn oldest_retained_frame(&self) -> u32 {
        self.start_frame
            .max(self.current_frame.saturating_sub(self.history.len() as u32))
    }

    fn check_slot(&self, frame: u32) {
        let slot = &self.history[frame as usize % self.history.len()];
        if slot.frame != Some(frame) {
            panic!(
                "history is missing frame {} (slot holds {:?}, current frame {})",
                frame, slot.frame, self.current_frame
            );
        }
    }

    fn slot(&self, frame: u32) -> &HistoryFrame {
        self.check_slot(frame);
        &self.history[frame as usize % self.history.len()]
    }

    fn slot_mut(&mut self, frame: u32) -> &mut HistoryFrame {
        self.check_slot(frame);
        let len = self.history.len();
        &mut self.history[frame as usize % len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::wasm4, error::StateError};

    /// Folds every frame's gamepads into a running hash.
    #[derive(Default)]
    struct HashBackend {
        gamepads: [u8; PLAYER_COUNT],
        hash: u64,
        updates: usize,
        muted: bool,
        muted_updates: usize,
    }

    impl Backend for HashBackend {
        fn call_update(&mut self) {
            for &pad in &self.gamepads {
                self.hash = self.hash.wrapping_mul(31).wrapping_add(pad as u64);
            }
            self.updates += 1;
            if self.muted {
                self.muted_updates += 1;
            }
        }

        fn call_start(&mut self) {}

        fn read_screen(&self, _: &mut [u8; wasm4::FRAMEBUFFER_SIZE], _: &mut [u8; 16]) {}

        fn read_system_flags(&self) -> u8 {
            0
        }

        fn set_gamepad(&mut self, player: usize, buttons: u8) {
            self.gamepads[player] = buttons;
        }

        fn set_mouse(&mut self, _: i16, _: i16, _: u8) {}

        fn set_netplay(&mut self, _: Option<usize>) {}

        fn set_muted(&mut self, muted: bool) {
            self.muted = muted;
        }

        fn save_state(&self) -> State {
            let mut state = State::default();
            state.globals.insert("hash".into(), self.hash.to_string());
            state
        }

        fn load_state(&mut self, state: &State) -> Result<(), StateError> {
            let hash = &state.globals["hash"];
            self.hash = hash.parse().map_err(|_| StateError::BadGlobalValue {
                name: "hash".into(),
                value: hash.clone(),
            })?;
            Ok(())
        }
    }

    fn manager() -> RollbackManager<HashBackend> {
        RollbackManager::new(HashBackend::default(), &RuntimeConfig::default(), 0)
    }

    fn remote_input(frame: u32) -> u8 {
        (frame * 37 % 251) as u8
    }

    #[test]
    fn predicts_previous_input() {
        let mut manager = manager();
        manager.add_inputs(1, 0, &[5, 6]).unwrap();
        for _ in 0..4 {
            assert_eq!(FrameOutcome::Simulated, manager.update());
        }

        assert_eq!(4, manager.current_frame());
        assert_eq!(6, manager.backend().gamepads[1]);
        assert!(manager.slot(3).predicted[1]);
        assert!(!manager.slot(1).predicted[1]);
    }

    #[test]
    fn matching_input_does_not_roll_back() {
        let mut manager = manager();
        manager.add_inputs(1, 0, &[3]).unwrap();
        manager.update();
        manager.update();

        manager.add_inputs(1, 1, &[3]).unwrap();
        assert_eq!(None, manager.rollback_target());
        assert!(!manager.slot(1).predicted[1]);
    }

    #[test]
    fn corrections_pick_the_earliest_frame() {
        let mut manager = manager();
        for _ in 0..6 {
            manager.update();
        }

        manager.add_inputs(2, 4, &[1]).unwrap();
        assert_eq!(Some(4), manager.rollback_target());
        manager.add_inputs(3, 2, &[1, 1]).unwrap();
        assert_eq!(Some(2), manager.rollback_target());

        // confirmed inputs are never overwritten
        manager.add_inputs(2, 4, &[9]).unwrap();
        assert_eq!(1, manager.slot(4).inputs[2]);
    }

    #[test]
    fn future_inputs_keep_the_first_value() {
        let mut manager = manager();
        manager.add_inputs(0, 0, &[1]).unwrap();
        manager.add_inputs(0, 0, &[2]).unwrap();
        manager.update();
        assert_eq!(1, manager.backend().gamepads[0]);
    }

    #[test]
    fn rollback_matches_direct_simulation() {
        const FRAMES: u32 = 40;

        let mut direct = manager();
        for frame in 0..FRAMES {
            direct.add_inputs(0, frame, &[frame as u8]).unwrap();
            direct.add_inputs(1, frame, &[remote_input(frame)]).unwrap();
            direct.update();
        }

        let mut late = manager();
        late.add_remote_player(1).unwrap();
        for frame in 0..FRAMES {
            late.add_inputs(0, frame, &[frame as u8]).unwrap();
            // remote inputs arrive in batches of five, four frames late
            if frame % 5 == 4 {
                let batch: Vec<u8> = (frame - 4..=frame).map(remote_input).collect();
                late.add_inputs(1, frame - 4, &batch).unwrap();
            }
            late.update();
        }

        assert_eq!(None, late.rollback_target());
        assert_eq!(direct.backend().hash, late.backend().hash);
        assert_eq!(direct.backend().save_state(), late.backend().save_state());
        assert!(late.backend().updates > direct.backend().updates);
    }

    #[test]
    fn replay_is_muted() {
        let mut manager = manager();
        for _ in 0..5 {
            manager.update();
        }
        manager.add_inputs(1, 1, &[7]).unwrap();
        manager.update();

        // frames 1..5 again, then frame 5 itself
        assert_eq!(4, manager.backend().muted_updates);
        assert_eq!(10, manager.backend().updates);
        assert!(!manager.backend().muted);
    }

    #[test]
    fn corrected_input_is_propagated() {
        let mut manager = manager();
        for _ in 0..5 {
            manager.update();
        }
        manager.add_inputs(1, 2, &[7]).unwrap();
        manager.update();

        for frame in 3..6 {
            assert_eq!(7, manager.slot(frame).inputs[1]);
        }
        assert_eq!(7, manager.backend().gamepads[1]);
    }

    #[test]
    fn stalls_on_a_silent_peer() {
        let config = RuntimeConfig::default().with_history_length(4);
        let mut manager = RollbackManager::new(HashBackend::default(), &config, 0);
        manager.add_remote_player(1).unwrap();

        for _ in 0..4 {
            assert_eq!(FrameOutcome::Simulated, manager.update());
        }
        assert_eq!(FrameOutcome::Stalled, manager.update());
        assert_eq!(4, manager.current_frame());
        assert_eq!(4, manager.backend().updates);

        manager.add_inputs(1, 0, &[1]).unwrap();
        assert_eq!(FrameOutcome::Simulated, manager.update());
        assert_eq!(FrameOutcome::Stalled, manager.update());
    }

    #[test]
    fn old_inputs_are_ignored() {
        let config = RuntimeConfig::default().with_history_length(4);
        let mut manager = RollbackManager::new(HashBackend::default(), &config, 10);
        for _ in 0..8 {
            manager.update();
        }

        manager.add_inputs(1, 0, &[1; 15]).unwrap();
        assert_eq!(Some(14), manager.rollback_target());
    }

    #[test]
    fn inputs_beyond_the_history_are_dropped() {
        let mut manager = manager();
        manager.add_remote_player(1).unwrap();
        manager.update();

        manager.add_inputs(1, u32::MAX, &[1, 2]).unwrap();
        manager.add_inputs(1, u32::MAX - 1, &[1, 2, 3]).unwrap();
        manager.add_inputs(1, 1_000_000, &[1]).unwrap();
        assert!(manager.players[1].future_inputs.is_empty());
        assert_eq!(0, manager.players[1].next_expected);

        // the last frame still in reach is kept, everything after it dropped
        let horizon = 1 + manager.history_length() as u32;
        manager.add_inputs(1, horizon - 1, &[4, 5, 6]).unwrap();
        assert_eq!(
            vec![horizon - 1],
            manager.players[1].future_inputs.keys().copied().collect::<Vec<_>>()
        );
        assert_eq!(FrameOutcome::Simulated, manager.update());
    }

    #[test]
    fn unknown_player() {
        let mut manager = manager();
        assert!(matches!(
            manager.add_inputs(4, 0, &[1]),
            Err(NetplayError::UnknownPlayer(4))
        ));
        assert!(manager.add_remote_player(7).is_err());
    }

    #[test]
    fn restart_clears_history() {
        let mut manager = manager();
        manager.add_remote_player(1).unwrap();
        for _ in 0..3 {
            manager.update();
        }
        manager.add_inputs(1, 0, &[1]).unwrap();
        manager.add_inputs(1, 5, &[1]).unwrap();

        manager.restart_at(100);
        assert_eq!(100, manager.current_frame());
        assert_eq!(None, manager.rollback_target());
        assert_eq!(vec![1], manager.remote_players().collect::<Vec<_>>());
        assert_eq!(FrameOutcome::Simulated, manager.update());
        assert_eq!(0, manager.backend().gamepads[1]);
    }

    #[test]
    #[should_panic(expected = "history is missing frame 3")]
    fn missing_history_aborts() {
        let mut manager = manager();
        for _ in 0..5 {
            manager.update();
        }
        manager.history[3].frame = None;
        let _ = manager.add_inputs(1, 3, &[1]);
    }
}
