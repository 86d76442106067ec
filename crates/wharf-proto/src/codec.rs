/// Result of feeding bytes into a decoder.
#[derive(Debug)]
pub enum DecodeStatus<M> {
    /// The buffered bytes don't form a complete message yet.
    NeedMoreData,
    /// A complete message was decoded.
    ///
    /// Bytes following the message stay buffered for the next call.
    FullyRead(M),
    /// The peer closed the stream.
    Closed,
}

impl<M> DecodeStatus<M> {
    pub fn map<N, F>(self, f: F) -> DecodeStatus<N>
    where
        F: FnOnce(M) -> N,
    {
        match self {
            DecodeStatus::NeedMoreData => DecodeStatus::NeedMoreData,
            DecodeStatus::FullyRead(message) => DecodeStatus::FullyRead(f(message)),
            DecodeStatus::Closed => DecodeStatus::Closed,
        }
    }

    pub fn is_need_more_data(&self) -> bool {
        matches!(self, DecodeStatus::NeedMoreData)
    }
}
