//! The node's internal actor: owns the publication and subscription
//! tables and the single connection-id generator behind one task, so that
//! every mutation is serialized through one mailbox `NodeServerHandle` is the cheap,
//! `Clone`-able front door callers and connections hold.

use crate::publication::Publication;
use crate::subscription::Subscription;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum Command {
    InsertPublication {
        topic: String,
        publication: Arc<Publication>,
    },
    RemovePublication {
        topic: String,
        reply: oneshot::Sender<Option<Arc<Publication>>>,
    },
    GetPublication {
        topic: String,
        reply: oneshot::Sender<Option<Arc<Publication>>>,
    },
    ListPublications {
        reply: oneshot::Sender<Vec<(String, String)>>,
    },
    AllPublications {
        reply: oneshot::Sender<Vec<Arc<Publication>>>,
    },
    InsertSubscription {
        topic: String,
        subscription: Arc<Subscription>,
    },
    RemoveSubscription {
        topic: String,
        reply: oneshot::Sender<Option<Arc<Subscription>>>,
    },
    GetSubscription {
        topic: String,
        reply: oneshot::Sender<Option<Arc<Subscription>>>,
    },
    ListSubscriptions {
        reply: oneshot::Sender<Vec<(String, String)>>,
    },
    AllSubscriptions {
        reply: oneshot::Sender<Vec<Arc<Subscription>>>,
    },
    NextConnectionId {
        reply: oneshot::Sender<u64>,
    },
    DrainAll {
        reply: oneshot::Sender<(Vec<Arc<Publication>>, Vec<Arc<Subscription>>)>,
    },
}

struct ActorState {
    publications: HashMap<String, Arc<Publication>>,
    subscriptions: HashMap<String, Arc<Subscription>>,
    next_connection_id: u64,
}

async fn run(mut rx: mpsc::Receiver<Command>) {
    let mut state = ActorState {
        publications: HashMap::new(),
        subscriptions: HashMap::new(),
        next_connection_id: 1,
    };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::InsertPublication { topic, publication } => {
                state.publications.insert(topic, publication);
            }
            Command::RemovePublication { topic, reply } => {
                let _ = reply.send(state.publications.remove(&topic));
            }
            Command::GetPublication { topic, reply } => {
                let _ = reply.send(state.publications.get(&topic).cloned());
            }
            Command::ListPublications { reply } => {
                let list = state
                    .publications
                    .values()
                    .map(|p| (p.info().topic.clone(), p.info().data_type.clone()))
                    .collect();
                let _ = reply.send(list);
            }
            Command::AllPublications { reply } => {
                let _ = reply.send(state.publications.values().cloned().collect());
            }
            Command::InsertSubscription { topic, subscription } => {
                state.subscriptions.insert(topic, subscription);
            }
            Command::RemoveSubscription { topic, reply } => {
                let _ = reply.send(state.subscriptions.remove(&topic));
            }
            Command::GetSubscription { topic, reply } => {
                let _ = reply.send(state.subscriptions.get(&topic).cloned());
            }
            Command::ListSubscriptions { reply } => {
                let list = state
                    .subscriptions
                    .values()
                    .map(|s| (s.topic().to_string(), s.data_type().to_string()))
                    .collect();
                let _ = reply.send(list);
            }
            Command::AllSubscriptions { reply } => {
                let _ = reply.send(state.subscriptions.values().cloned().collect());
            }
            Command::NextConnectionId { reply } => {
                let id = state.next_connection_id;
                state.next_connection_id += 1;
                let _ = reply.send(id);
            }
            Command::DrainAll { reply } => {
                let pubs = state.publications.drain().map(|(_, v)| v).collect();
                let subs = state.subscriptions.drain().map(|(_, v)| v).collect();
                let _ = reply.send((pubs, subs));
            }
        }
    }
}

/// Cheap, `Clone`-able handle to the node's table-owning actor task.
#[derive(Clone)]
pub struct NodeServerHandle {
    tx: mpsc::Sender<Command>,
}

impl NodeServerHandle {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run(rx));
        Self { tx }
    }

    pub async fn insert_publication(&self, topic: String, publication: Arc<Publication>) {
        let _ = self.tx.send(Command::InsertPublication { topic, publication }).await;
    }

    pub async fn remove_publication(&self, topic: &str) -> Option<Arc<Publication>> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::RemovePublication { topic: topic.to_string(), reply })
            .await;
        rx.await.unwrap_or(None)
    }

    pub async fn get_publication(&self, topic: &str) -> Option<Arc<Publication>> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::GetPublication { topic: topic.to_string(), reply })
            .await;
        rx.await.unwrap_or(None)
    }

    pub async fn list_publications(&self) -> Vec<(String, String)> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::ListPublications { reply }).await;
        rx.await.unwrap_or_default()
    }

    /// Every live `Publication`, for `getBusStats`/`getBusInfo` aggregation
    ///
    pub async fn all_publications(&self) -> Vec<Arc<Publication>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::AllPublications { reply }).await;
        rx.await.unwrap_or_default()
    }

    pub async fn insert_subscription(&self, topic: String, subscription: Arc<Subscription>) {
        let _ = self.tx.send(Command::InsertSubscription { topic, subscription }).await;
    }

    pub async fn remove_subscription(&self, topic: &str) -> Option<Arc<Subscription>> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::RemoveSubscription { topic: topic.to_string(), reply })
            .await;
        rx.await.unwrap_or(None)
    }

    pub async fn get_subscription(&self, topic: &str) -> Option<Arc<Subscription>> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::GetSubscription { topic: topic.to_string(), reply })
            .await;
        rx.await.unwrap_or(None)
    }

    pub async fn list_subscriptions(&self) -> Vec<(String, String)> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::ListSubscriptions { reply }).await;
        rx.await.unwrap_or_default()
    }

    /// Every live `Subscription`, for `getBusStats`/`getBusInfo` aggregation
    ///
    pub async fn all_subscriptions(&self) -> Vec<Arc<Subscription>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::AllSubscriptions { reply }).await;
        rx.await.unwrap_or_default()
    }

    /// Mints the next globally unique connection id
    pub async fn next_connection_id(&self) -> u64 {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::NextConnectionId { reply }).await;
        rx.await.unwrap_or(0)
    }

    /// Removes and returns every publication and subscription, for
    /// `shutdown` to close unconditionally
    pub async fn drain_all(&self) -> (Vec<Arc<Publication>>, Vec<Arc<Subscription>>) {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::DrainAll { reply }).await;
        rx.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::publication::PublicationInfo;
    use ros1_core_types::{ResolvedType, RosValue};
    use std::sync::Arc as StdArc;

    fn resolved() -> ResolvedType {
        ResolvedType {
            md5sum: "*".into(),
            definition_text: String::new(),
            reader: StdArc::new(|b: &[u8]| Ok(RosValue::Bytes(b.to_vec()))),
            writer: StdArc::new(|_v: &RosValue| Ok(Vec::new())),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let handle = NodeServerHandle::spawn();
        let info = PublicationInfo {
            topic: "/t".into(),
            data_type: "std_msgs/Bool".into(),
            md5sum: "*".into(),
            latching: false,
            message_definition: String::new(),
            caller_id: "/n".into(),
        };
        let publication = Arc::new(Publication::new(info, resolved()));
        handle.insert_publication("/t".into(), publication.clone()).await;
        assert!(handle.get_publication("/t").await.is_some());
        assert!(handle.remove_publication("/t").await.is_some());
        assert!(handle.get_publication("/t").await.is_none());
    }

    #[tokio::test]
    async fn connection_ids_are_unique() {
        let handle = NodeServerHandle::spawn();
        let a = handle.next_connection_id().await;
        let b = handle.next_connection_id().await;
        assert!(b > a);
    }
}
