/// What a handler wants done with its session after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    /// Carry on.
    KeepOpen,
    /// Stop reading, the handler has a complete request and will produce its response.
    ///
    /// Once the response is written and the handler returns `KeepOpen`, reading resumes with
    /// the next request and a new handler is resolved for it.
    CloseInput,
    /// The handler has nothing more to send.
    ///
    /// Queued writes are still flushed, then the write half is shut down. The session closes
    /// once input is closed as well.
    CloseOutput,
    /// Close the session now, failing any queued writes.
    CloseAll,
}

impl ChannelAction {
    /// A terminal action ends the session, nothing else can follow it.
    pub fn is_terminal(self) -> bool {
        self == ChannelAction::CloseAll
    }
}
