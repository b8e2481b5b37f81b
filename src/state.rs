use serde::Serialize;

/// Where the session currently is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "detail", rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    /// Waiting for the user to scan the current QR payload.
    Pairing(String),
    Ready,
    Disconnected(String),
}

impl SessionPhase {
    /// Edges of the lifecycle. A restored session may skip pairing entirely;
    /// a disconnected one must always start over from `Uninitialized`.
    pub fn can_transition_to(&self, next: &SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Uninitialized, Pairing(_))
                | (Uninitialized, Ready)
                | (Uninitialized, Disconnected(_))
                | (Pairing(_), Pairing(_))
                | (Pairing(_), Ready)
                | (Pairing(_), Disconnected(_))
                | (Ready, Disconnected(_))
                | (Disconnected(_), Uninitialized)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::Uninitialized => "uninitialized",
            SessionPhase::Pairing(_) => "pairing",
            SessionPhase::Ready => "ready",
            SessionPhase::Disconnected(_) => "disconnected",
        }
    }
}

/// Snapshot of the single session. Replaced wholesale, never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// The client is booting or loading, which is not the same as ready.
    pub initializing: bool,
    /// Which client handle this state describes.
    pub generation: u64,
}

/// Rejected lifecycle edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            initializing: false,
            generation: 0,
        }
    }
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        self.phase == SessionPhase::Ready
    }

    pub fn qr(&self) -> Option<&str> {
        match &self.phase {
            SessionPhase::Pairing(qr) => Some(qr),
            _ => None,
        }
    }

    /// Next state along a valid edge.
    pub fn transition(
        &self,
        next: SessionPhase,
        initializing: bool,
    ) -> Result<SessionState, InvalidTransition> {
        if !self.phase.can_transition_to(&next) {
            return Err(InvalidTransition {
                from: self.phase.name(),
                to: next.name(),
            });
        }
        Ok(SessionState {
            phase: next,
            initializing,
            generation: self.generation,
        })
    }

    /// Same phase, different `initializing` flag.
    pub fn with_initializing(&self, initializing: bool) -> SessionState {
        SessionState {
            initializing,
            ..self.clone()
        }
    }

    /// Fresh state for a newly constructed handle.
    pub fn for_generation(generation: u64) -> SessionState {
        SessionState {
            phase: SessionPhase::Uninitialized,
            initializing: true,
            generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_replaces_qr_and_reaches_ready() {
        let state = SessionState::for_generation(1);
        let state = state.transition(SessionPhase::Pairing("qr-1".into()), true).unwrap();
        assert_eq!(state.qr(), Some("qr-1"));
        let state = state.transition(SessionPhase::Pairing("qr-2".into()), true).unwrap();
        assert_eq!(state.qr(), Some("qr-2"));
        let state = state.transition(SessionPhase::Ready, false).unwrap();
        assert!(state.is_ready());
        assert_eq!(state.qr(), None);
        assert_eq!(state.generation, 1);
    }

    #[test]
    fn disconnected_never_jumps_to_ready() {
        let state = SessionState {
            phase: SessionPhase::Disconnected("NAVIGATION".into()),
            initializing: false,
            generation: 3,
        };
        assert_eq!(
            state.transition(SessionPhase::Ready, false),
            Err(InvalidTransition {
                from: "disconnected",
                to: "ready"
            })
        );
        assert!(state
            .transition(SessionPhase::Pairing("qr".into()), true)
            .is_err());
        assert!(state.transition(SessionPhase::Uninitialized, true).is_ok());
    }

    #[test]
    fn ready_only_leaves_through_disconnect() {
        let ready = SessionState {
            phase: SessionPhase::Ready,
            initializing: false,
            generation: 1,
        };
        assert!(ready.transition(SessionPhase::Pairing("qr".into()), true).is_err());
        assert!(ready.transition(SessionPhase::Uninitialized, true).is_err());
        assert!(ready
            .transition(SessionPhase::Disconnected("LOGOUT".into()), false)
            .is_ok());
    }

    #[test]
    fn serializes_phase_with_detail() {
        let state = SessionState {
            phase: SessionPhase::Pairing("abc".into()),
            initializing: true,
            generation: 2,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["phase"]["phase"], "pairing");
        assert_eq!(json["phase"]["detail"], "abc");
    }
}
