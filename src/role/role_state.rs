use std::fmt;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Holds the master lease, publishes work and heartbeats.
    Generator,
    /// Consumes work and watches the master's heartbeat.
    Subscriber,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleState {
    Starting,
    Active(Role),
    Stopped,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Generator => write!(f, "Generator"),
            Role::Subscriber => write!(f, "Subscriber"),
        }
    }
}

pub(crate) fn new() -> (RoleChangeNotifier, RoleChangeListener) {
    let (snd, rcv) = watch::channel(RoleState::Starting);

    (RoleChangeNotifier { snd }, RoleChangeListener { rcv })
}

pub(crate) struct RoleChangeNotifier {
    snd: watch::Sender<RoleState>,
}

impl RoleChangeNotifier {
    pub(super) fn notify_new_state(&self, new_state: RoleState) {
        // Kept even with no listener attached, so one created later starts from the truth.
        self.snd.send_replace(new_state);
    }
}

/// RoleChangeListener observes the node's role. Like any watch, it doesn't queue: several
/// changes between two calls to `next()` collapse into the most recent one.
#[derive(Clone)]
pub struct RoleChangeListener {
    rcv: watch::Receiver<RoleState>,
}

impl RoleChangeListener {
    pub fn current(&self) -> RoleState {
        *self.rcv.borrow()
    }

    /// None once the node has been dropped.
    pub async fn next(&mut self) -> Option<RoleState> {
        match self.rcv.changed().await {
            Ok(_) => Some(*self.rcv.borrow_and_update()),
            Err(_) => None,
        }
    }

    /// Wait until the node is in `state`. Returns false if the node went away first.
    pub async fn wait_for(&mut self, state: RoleState) -> bool {
        if *self.rcv.borrow_and_update() == state {
            return true;
        }
        while let Some(current) = self.next().await {
            if current == state {
                return true;
            }
        }
        false
    }
}
