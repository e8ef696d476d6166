use std::fmt;

/// Why a generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The backend sent its completion marker.
    Completed,
    /// The user stopped the generation.
    StoppedByUser,
    /// The backend reported an error or the stream broke.
    Errored(String),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Completed => write!(f, "completed"),
            TerminationReason::StoppedByUser => write!(f, "stopped by user"),
            TerminationReason::Errored(detail) => write!(f, "error: {detail}"),
        }
    }
}

/// Lifecycle of the generation attached to one chat.
///
/// ```text
/// Idle --start--> Awaiting --ack--> Streaming --Done--> Terminated(Completed)
/// Awaiting|Streaming --stop--> Stopping --> Terminated(StoppedByUser)
/// Awaiting|Streaming --error--> Terminated(Errored)
/// Terminated --start--> Awaiting
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GenerationState {
    /// Nothing has been submitted yet.
    #[default]
    Idle,
    /// The user message is being posted; no stream is open yet.
    Awaiting,
    /// The stream is open and reply text is arriving.
    Streaming,
    /// A stop was requested and the stream is being torn down.
    Stopping,
    /// The generation is over.
    Terminated(TerminationReason),
}

impl GenerationState {
    /// Returns true if a new generation may start from this state.
    pub fn accepts_start(&self) -> bool {
        matches!(self, GenerationState::Idle | GenerationState::Terminated(_))
    }

    /// Returns true while a generation is awaiting, streaming or stopping.
    pub fn is_active(&self) -> bool {
        !self.accepts_start()
    }

    /// Returns true once the generation has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationState::Terminated(_))
    }

    /// Returns the termination reason, if terminated.
    pub fn reason(&self) -> Option<&TerminationReason> {
        match self {
            GenerationState::Terminated(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationState::Idle => write!(f, "idle"),
            GenerationState::Awaiting => write!(f, "awaiting"),
            GenerationState::Streaming => write!(f, "streaming"),
            GenerationState::Stopping => write!(f, "stopping"),
            GenerationState::Terminated(reason) => write!(f, "terminated ({reason})"),
        }
    }
}
