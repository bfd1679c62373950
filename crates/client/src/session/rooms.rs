//! Registry of joined conversation rooms.
//!
//! Purely a client-side replay list: rooms are recorded when joined and
//! re-joined in insertion order after a reconnect. No leave messages
//! exist; the set is cleared wholesale on explicit disconnect.

#[derive(Debug, Default)]
pub struct RoomRegistry {
    joined: Vec<String>,
}

impl RoomRegistry {
    /// Record a room. Returns `false` if it was already present, in
    /// which case no join should be sent again.
    pub fn insert(&mut self, room_id: String) -> bool {
        if self.contains(&room_id) {
            return false;
        }
        self.joined.push(room_id);
        true
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.joined.iter().any(|joined| joined == room_id)
    }

    pub fn clear(&mut self) {
        self.joined.clear();
    }

    /// Rooms in insertion order, for join replay.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.joined.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.joined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut registry = RoomRegistry::default();
        assert!(registry.insert("task-1".to_string()));
        assert!(!registry.insert("task-1".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut registry = RoomRegistry::default();
        registry.insert("task-3".to_string());
        registry.insert("task-1".to_string());
        registry.insert("task-2".to_string());

        let rooms: Vec<&str> = registry.iter().collect();
        assert_eq!(rooms, vec!["task-3", "task-1", "task-2"]);
    }

    #[test]
    fn clear_empties_the_set() {
        let mut registry = RoomRegistry::default();
        registry.insert("task-1".to_string());
        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains("task-1"));
    }
}
