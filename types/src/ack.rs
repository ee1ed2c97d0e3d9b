/// The sentinel carried as the ack-reply payload. Anything else is an
/// unknown kind and is dropped silently by the observable (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Ack,
    Nak,
    Progress,
    AckNext,
}

impl AckKind {
    pub const NAK_SENTINEL: &'static [u8] = b"-NAK";
    pub const PROGRESS_SENTINEL: &'static [u8] = b"+WPI";
    pub const ACK_NEXT_SENTINEL: &'static [u8] = b"+NXT";

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.is_empty() {
            Some(Self::Ack)
        } else if payload == Self::NAK_SENTINEL {
            Some(Self::Nak)
        } else if payload == Self::PROGRESS_SENTINEL {
            Some(Self::Progress)
        } else if payload == Self::ACK_NEXT_SENTINEL {
            Some(Self::AckNext)
        } else {
            None
        }
    }
}
