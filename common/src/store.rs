use crate::types::{HeatingMode, HouseState, RoomRuntimeState};

/// Per-room runtime state plus the house-level mode shown on the aggregate
/// device. Every mutation marks the store dirty so the engine publishes it.
#[derive(Debug, Clone)]
pub struct RoomStateStore {
    house_mode: HeatingMode,
    rooms: Vec<RoomRuntimeState>,
    dirty: bool,
}

impl RoomStateStore {
    pub fn new(rooms: Vec<RoomRuntimeState>) -> Self {
        Self {
            house_mode: HeatingMode::EnergySave,
            rooms,
            dirty: true,
        }
    }

    pub fn get(&self, room_id: u32) -> Option<&RoomRuntimeState> {
        self.rooms.iter().find(|room| room.room_id == room_id)
    }

    /// Replaces the state of a known room. Unknown rooms are ignored.
    pub fn set(&mut self, state: RoomRuntimeState) -> bool {
        let Some(slot) = self.rooms.iter_mut().find(|room| room.room_id == state.room_id) else {
            return false;
        };
        if *slot != state {
            *slot = state;
            self.dirty = true;
        }
        true
    }

    pub fn update(&mut self, room_id: u32, apply: impl FnOnce(&mut RoomRuntimeState)) -> bool {
        let Some(mut state) = self.get(room_id).cloned() else {
            return false;
        };
        apply(&mut state);
        self.set(state)
    }

    pub fn house_mode(&self) -> HeatingMode {
        self.house_mode
    }

    pub fn set_house_mode(&mut self, mode: HeatingMode) {
        if self.house_mode != mode {
            self.house_mode = mode;
            self.dirty = true;
        }
    }

    pub fn room_ids(&self) -> Vec<u32> {
        self.rooms.iter().map(|room| room.room_id).collect()
    }

    pub fn snapshot(&self) -> HouseState {
        HouseState {
            state: self.house_mode,
            rooms: self.rooms.clone(),
        }
    }

    /// Returns the snapshot once after each batch of mutations.
    pub fn take_changes(&mut self) -> Option<HouseState> {
        std::mem::take(&mut self.dirty).then(|| self.snapshot())
    }

    /// Back to energy-save with no target, keeping `has_schedule`.
    pub fn reset(&mut self) {
        self.house_mode = HeatingMode::EnergySave;
        for room in &mut self.rooms {
            *room = RoomRuntimeState::new(room.room_id, room.has_schedule);
        }
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RoomStateStore {
        RoomStateStore::new(vec![
            RoomRuntimeState::new(1, true),
            RoomRuntimeState::new(2, false),
        ])
    }

    #[test]
    fn publishes_once_per_batch_of_changes() {
        let mut store = store();
        assert!(store.take_changes().is_some());
        assert!(store.take_changes().is_none());

        store.update(1, |room| room.target_temp = Some(21.0));
        store.update(2, |room| room.mode = HeatingMode::Comfort);

        let published = store.take_changes().unwrap();
        assert_eq!(published.rooms[0].target_temp, Some(21.0));
        assert_eq!(published.rooms[1].mode, HeatingMode::Comfort);
        assert!(store.take_changes().is_none());
    }

    #[test]
    fn identical_state_is_not_a_change() {
        let mut store = store();
        store.take_changes();

        assert!(store.set(RoomRuntimeState::new(1, true)));
        assert!(store.take_changes().is_none());
        assert!(!store.set(RoomRuntimeState::new(9, true)));
    }

    #[test]
    fn reset_keeps_schedule_flag() {
        let mut store = store();
        store.update(1, |room| {
            room.mode = HeatingMode::Schedule;
            room.target_temp = Some(22.0);
        });
        store.set_house_mode(HeatingMode::Schedule);

        store.reset();

        assert_eq!(store.get(1), Some(&RoomRuntimeState::new(1, true)));
        assert_eq!(store.house_mode(), HeatingMode::EnergySave);
    }
}
