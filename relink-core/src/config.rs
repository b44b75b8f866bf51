/// Tunables of the coordination core
#[derive(Debug, Clone)]
pub struct Config {
    /// How many events can wait in a session's outbound queue before the session is dropped
    pub outbound_queue_size: usize,
    /// How many rooms a single session can be subscribed to at once
    pub max_rooms_per_session: usize,
    /// The longest accepted message, in characters, after trimming
    pub max_message_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            outbound_queue_size: 256,
            // The client only ever shows one chat at a time
            max_rooms_per_session: 1,
            max_message_length: 2000,
        }
    }
}
