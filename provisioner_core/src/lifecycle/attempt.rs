use container_driver_interface::ContainerHandle;
use provisioner_shared_types::{InstanceId, InstanceState, PresetKind};
use tracing::{debug, info, warn};

/// Book-keeping for one provisioning pipeline: its state and everything it
/// acquired that rollback has to release.
#[derive(Debug)]
pub(crate) struct ProvisionAttempt {
    pub(crate) id: InstanceId,
    kind: PresetKind,
    state: InstanceState,
    verbose: bool,
    handle: Option<ContainerHandle>,
}

impl ProvisionAttempt {
    pub(crate) fn new(id: InstanceId, kind: PresetKind, verbose: bool) -> Self {
        let attempt = Self {
            id,
            kind,
            state: InstanceState::Creating,
            verbose,
            handle: None,
        };
        attempt.log_state(None);
        attempt
    }

    pub(crate) fn state(&self) -> InstanceState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: InstanceState) {
        if !self.state.can_transition_to(next) {
            warn!(
                instance_id = %self.id,
                from = %self.state,
                to = %next,
                "Ignoring illegal state transition"
            );
            return;
        }
        let from = std::mem::replace(&mut self.state, next);
        self.log_state(Some(from));
    }

    pub(crate) fn acquired(&mut self, handle: ContainerHandle) {
        debug!(instance_id = %self.id, container_id = %handle.id, "Container registered for rollback");
        self.handle = Some(handle);
    }

    pub(crate) fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    fn log_state(&self, from: Option<InstanceState>) {
        let from = from.map(|s| s.to_string()).unwrap_or_default();
        if self.verbose {
            info!(instance_id = %self.id, kind = %self.kind, from = %from, to = %self.state, "Instance state changed");
        } else {
            debug!(instance_id = %self.id, kind = %self.kind, from = %from, to = %self.state, "Instance state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut attempt = ProvisionAttempt::new(Uuid::new_v4(), PresetKind::Redis, false);
        attempt.transition(InstanceState::Seeding);
        assert_eq!(attempt.state(), InstanceState::Creating);

        attempt.transition(InstanceState::Starting);
        attempt.transition(InstanceState::Failed);
        assert_eq!(attempt.state(), InstanceState::Failed);
    }

    #[test]
    fn test_acquired_handle_is_kept_for_rollback() {
        let mut attempt = ProvisionAttempt::new(Uuid::new_v4(), PresetKind::Redis, true);
        assert!(attempt.handle().is_none());

        attempt.acquired(ContainerHandle::new("abc"));
        assert_eq!(attempt.handle().map(|h| h.id.as_str()), Some("abc"));
    }
}
