//! Connection lifecycle state machine.
//!
//! Tracks how far a client has progressed through startup and rejects
//! out-of-order transitions.

use std::time::{Duration, Instant};

use crate::error::{ChatPlugError, Result};

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    /// Constructed, nothing sent yet
    Created,
    /// Coordinator acknowledged the instance status
    Announced,
    /// Event streams are open
    Subscribed,
    /// Waiting for configuration values
    Configuring,
    /// Startup finished
    Ready,
}

impl LifecycleState {
    /// Whether event streams have been opened
    pub fn is_subscribed(self) -> bool {
        self >= LifecycleState::Subscribed
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Announced => "announced",
            Self::Subscribed => "subscribed",
            Self::Configuring => "configuring",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one client instance
#[derive(Debug, Clone)]
pub struct Lifecycle {
    /// Current state
    state: LifecycleState,
    /// Every state entered, in order
    history: Vec<LifecycleState>,
    /// Creation time
    created_at: Instant,
    /// When `Ready` was reached
    ready_at: Option<Instant>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// New lifecycle in `Created`
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Created,
            history: vec![LifecycleState::Created],
            created_at: Instant::now(),
            ready_at: None,
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// States entered so far, starting with `Created`
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    /// Whether startup finished
    pub fn is_ready(&self) -> bool {
        self.state == LifecycleState::Ready
    }

    /// Time from creation to `Ready`
    pub fn startup_duration(&self) -> Option<Duration> {
        self.ready_at.map(|t| t.duration_since(self.created_at))
    }

    /// `Created → Announced`
    pub fn announced(&mut self) -> Result<()> {
        self.advance(&[LifecycleState::Created], LifecycleState::Announced)
    }

    /// `Announced → Subscribed`
    pub fn subscribed(&mut self) -> Result<()> {
        self.advance(&[LifecycleState::Announced], LifecycleState::Subscribed)
    }

    /// `Subscribed → Configuring`
    pub fn configuring(&mut self) -> Result<()> {
        self.advance(&[LifecycleState::Subscribed], LifecycleState::Configuring)
    }

    /// `Subscribed | Configuring → Ready`
    pub fn ready(&mut self) -> Result<()> {
        self.advance(
            &[LifecycleState::Subscribed, LifecycleState::Configuring],
            LifecycleState::Ready,
        )?;
        self.ready_at = Some(Instant::now());
        Ok(())
    }

    fn advance(&mut self, from: &[LifecycleState], to: LifecycleState) -> Result<()> {
        if !from.contains(&self.state) {
            return Err(ChatPlugError::Protocol(format!(
                "Cannot move to {to} from {}",
                self.state
            )));
        }
        tracing::debug!(from = %self.state, to = %to, "lifecycle transition");
        self.state = to;
        self.history.push(to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_without_configuration() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.announced().unwrap();
        lifecycle.subscribed().unwrap();
        lifecycle.ready().unwrap();

        assert!(lifecycle.is_ready());
        assert!(lifecycle.startup_duration().is_some());
        assert_eq!(
            lifecycle.history(),
            &[
                LifecycleState::Created,
                LifecycleState::Announced,
                LifecycleState::Subscribed,
                LifecycleState::Ready
            ]
        );
    }

    #[test]
    fn test_startup_with_configuration() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.announced().unwrap();
        lifecycle.subscribed().unwrap();
        lifecycle.configuring().unwrap();
        lifecycle.ready().unwrap();
        assert_eq!(lifecycle.history().len(), 5);
    }

    #[test]
    fn test_rejects_skipped_states() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.subscribed().is_err());
        assert!(lifecycle.ready().is_err());
        assert_eq!(lifecycle.state(), LifecycleState::Created);

        lifecycle.announced().unwrap();
        assert!(lifecycle.configuring().is_err());
    }

    #[test]
    fn test_ready_is_terminal() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.announced().unwrap();
        lifecycle.subscribed().unwrap();
        lifecycle.ready().unwrap();

        assert!(lifecycle.ready().is_err());
        assert!(lifecycle.announced().is_err());
        assert_eq!(lifecycle.history().len(), 4);
    }

    #[test]
    fn test_state_ordering() {
        assert!(!LifecycleState::Announced.is_subscribed());
        assert!(LifecycleState::Subscribed.is_subscribed());
        assert!(LifecycleState::Ready.is_subscribed());
    }
}
