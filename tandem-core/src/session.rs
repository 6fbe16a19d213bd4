//! Session and role state shared by both coordinators.
//!
//! All mutation goes through named methods. Role-affecting changes publish a
//! [`Roles`] snapshot on a watch channel so dependents (the host heartbeat)
//! start and stop without polling.

use parking_lot::RwLock;
use tandem_proto::{RoomId, UserId};
use tokio::sync::watch;
use tracing::info;

/// Derived authority of the local member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roles {
    pub active: bool,
    pub is_host: bool,
    pub can_broadcast: bool,
}

#[derive(Debug, Clone)]
struct SessionState {
    active: bool,
    room_id: Option<RoomId>,
    host_user_id: Option<UserId>,
    guest_control_enabled: bool,
}

#[derive(Debug)]
pub struct Session {
    local_user_id: UserId,
    state: RwLock<SessionState>,
    roles: watch::Sender<Roles>,
}

impl Session {
    #[must_use]
    pub fn new(local_user_id: UserId) -> Self {
        let (roles, _) = watch::channel(Roles::default());
        Self {
            local_user_id,
            state: RwLock::new(SessionState {
                active: false,
                room_id: None,
                host_user_id: None,
                guest_control_enabled: false,
            }),
            roles,
        }
    }

    /// Party start
    pub fn start(&self, room_id: RoomId) {
        {
            let mut state = self.state.write();
            state.active = true;
            state.room_id = Some(room_id.clone());
        }
        info!(room_id = %room_id, user_id = %self.local_user_id, "Session started");
        self.publish();
    }

    /// Party stop; roles and room are forgotten
    pub fn stop(&self) {
        {
            let mut state = self.state.write();
            state.active = false;
            state.room_id = None;
            state.host_user_id = None;
            state.guest_control_enabled = false;
        }
        info!(user_id = %self.local_user_id, "Session stopped");
        self.publish();
    }

    pub fn set_host(&self, host: Option<UserId>) {
        let host = host.filter(|id| !id.is_empty());
        {
            let mut state = self.state.write();
            if state.host_user_id == host {
                return;
            }
            state.host_user_id.clone_from(&host);
        }
        info!(
            host = host.as_ref().map_or("none", UserId::as_str),
            local_is_host = host.as_ref() == Some(&self.local_user_id),
            "Host changed"
        );
        self.publish();
    }

    pub fn set_guest_control(&self, enabled: bool) {
        {
            let mut state = self.state.write();
            if state.guest_control_enabled == enabled {
                return;
            }
            state.guest_control_enabled = enabled;
        }
        info!(enabled, "Guest control toggled");
        self.publish();
    }

    #[must_use]
    pub fn local_user_id(&self) -> &UserId {
        &self.local_user_id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.read().active
    }

    #[must_use]
    pub fn room_id(&self) -> Option<RoomId> {
        self.state.read().room_id.clone()
    }

    #[must_use]
    pub fn host_user_id(&self) -> Option<UserId> {
        self.state.read().host_user_id.clone()
    }

    #[must_use]
    pub fn is_host(&self) -> bool {
        self.state.read().host_user_id.as_ref() == Some(&self.local_user_id)
    }

    #[must_use]
    pub fn is_host_user(&self, user: &UserId) -> bool {
        self.state.read().host_user_id.as_ref() == Some(user)
    }

    #[must_use]
    pub fn guest_control_enabled(&self) -> bool {
        self.state.read().guest_control_enabled
    }

    /// Host, or any member while guest control is on
    #[must_use]
    pub fn can_broadcast(&self) -> bool {
        self.roles().can_broadcast
    }

    #[must_use]
    pub fn roles(&self) -> Roles {
        let state = self.state.read();
        let is_host = state.host_user_id.as_ref() == Some(&self.local_user_id);
        Roles {
            active: state.active,
            is_host,
            can_broadcast: state.active && (is_host || state.guest_control_enabled),
        }
    }

    /// Receive a snapshot whenever the derived roles change
    #[must_use]
    pub fn subscribe_roles(&self) -> watch::Receiver<Roles> {
        self.roles.subscribe()
    }

    fn publish(&self) {
        let roles = self.roles();
        self.roles.send_if_modified(|current| {
            if *current == roles {
                false
            } else {
                *current = roles;
                true
            }
        });
    }
}
