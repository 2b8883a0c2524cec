/// Connection lifecycle states.
///
/// `Connecting` and `Authenticating` describe the handshake phases before a
/// session object exists (a rejected handshake never materializes one); a
/// `Session` is created at `Authenticated`. `Terminated` is reached from any
/// non-terminal state on transport error or sweep eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Authenticated,
    Active,
    Closing,
    Closed,
    Terminated,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Terminated)
    }

    /// Teardown already started or finished.
    pub fn is_closing(self) -> bool {
        self == SessionState::Closing || self.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Terminated.is_terminal());
        assert!(!SessionState::Active.is_terminal());
        assert!(!SessionState::Closing.is_terminal());
    }

    #[test]
    fn test_closing_states() {
        assert!(SessionState::Closing.is_closing());
        assert!(SessionState::Closed.is_closing());
        assert!(!SessionState::Authenticated.is_closing());
    }
}
