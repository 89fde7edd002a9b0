/// Keyspace names every record this crate keeps in the shared store. An optional prefix lets
/// several independent pools share one store.
#[derive(Clone, Debug, Default)]
pub struct Keyspace {
    prefix: Option<String>,
}

impl Keyspace {
    pub fn new(prefix: Option<String>) -> Self {
        Keyspace { prefix }
    }

    fn key(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, name),
            None => name.to_string(),
        }
    }

    pub fn master(&self) -> String {
        self.key("master")
    }

    pub fn heartbeat(&self) -> String {
        self.key("lastSend")
    }

    pub fn changer(&self) -> String {
        self.key("changer")
    }

    pub fn errors(&self) -> String {
        self.key("errors")
    }

    pub(crate) fn queue_ready(&self, queue: &str) -> String {
        self.key(&format!("queue::{}::ready", queue))
    }

    pub(crate) fn queue_rejected(&self, queue: &str) -> String {
        self.key(&format!("queue::{}::rejected", queue))
    }

    pub(crate) fn queue_unacked(&self, queue: &str, consumer_tag: &str) -> String {
        self.key(&format!("queue::{}::unacked::{}", queue, consumer_tag))
    }

    pub(crate) fn queue_consumers(&self, queue: &str) -> String {
        self.key(&format!("queue::{}::consumers", queue))
    }

    pub(crate) fn queue_consumer_alive(&self, queue: &str, consumer_tag: &str) -> String {
        self.key(&format!("queue::{}::consumer::{}", queue, consumer_tag))
    }
}
