use std::fmt;

use crate::error::ProxyError;

use super::EventKind;

/// Lifecycle of one installed proxy version.
///
/// `Registered -> Installing -> Installed -> Activating -> Active`, with
/// `InstallFailed` as the dead end of a failed install and `Redundant` for a
/// worker replaced by a newer version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Registered,
    Installing,
    Installed,
    Activating,
    Active,
    InstallFailed,
    Redundant,
}

impl WorkerState {
    /// Move to `next`, or fail if the lifecycle does not allow it.
    pub fn advance(self, next: WorkerState) -> Result<WorkerState, ProxyError> {
        use WorkerState::*;

        let allowed = matches!(
            (self, next),
            (Registered, Installing)
                | (Installing, Installed)
                | (Installing, InstallFailed)
                | (Installed, Activating)
                | (Activating, Active)
                | (Installed, Redundant)
                | (Active, Redundant)
        );
        if allowed {
            Ok(next)
        } else {
            Err(ProxyError::InvalidTransition { from: self, to: next })
        }
    }

    /// Whether a worker in this state handles events of `kind`
    pub fn accepts(self, kind: EventKind) -> bool {
        matches!(
            (self, kind),
            (WorkerState::Installing, EventKind::Install)
                | (WorkerState::Activating, EventKind::Activate)
                | (WorkerState::Active, EventKind::Fetch)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::InstallFailed | WorkerState::Redundant)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Registered => "registered",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::InstallFailed => "install-failed",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::WorkerState::*;

    #[test]
    fn test_happy_path() {
        let mut state = Registered;
        for next in [Installing, Installed, Activating, Active] {
            state = state.advance(next).unwrap();
        }
        assert_eq!(state, Active);
    }

    #[test]
    fn test_transitions_are_one_directional() {
        assert!(Active.advance(Installing).is_err());
        assert!(Installed.advance(Installing).is_err());
        assert!(Registered.advance(Active).is_err());
        assert!(InstallFailed.advance(Installing).is_err());
        assert!(Redundant.advance(Active).is_err());
    }

    #[test]
    fn test_install_failure_is_terminal() {
        let failed = Installing.advance(InstallFailed).unwrap();
        assert!(failed.is_terminal());
        assert_eq!(failed.to_string(), "install-failed");
    }

    #[test]
    fn test_event_acceptance() {
        assert!(Installing.accepts(EventKind::Install));
        assert!(Activating.accepts(EventKind::Activate));
        assert!(Active.accepts(EventKind::Fetch));
        assert!(!Installed.accepts(EventKind::Fetch));
        assert!(!Active.accepts(EventKind::Install));
    }
}
