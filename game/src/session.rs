//! Host-local view of one player's relay stream

#[derive(Debug)]
pub struct GameSession {
    pub player_id: i32,
    kicked: bool,
    /// Relay messages handled on this stream
    pub handled: u64,
}

impl GameSession {
    pub fn new(player_id: i32) -> Self {
        Self {
            player_id,
            kicked: false,
            handled: 0,
        }
    }

    /// Asks the router to end the stream after the current reply
    pub fn kick(&mut self) {
        self.kicked = true;
    }

    pub fn is_kicked(&self) -> bool {
        self.kicked
    }
}
