use actix::prelude::*;
use log::{debug, error, info};
use mongodb::bson::doc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::db::MongoDB;
use crate::models::Workspace;

/// Serialized event pushed down a websocket connection.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct ServerEvent(pub String);

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub conn_id: String,
    pub user_id: String,
    pub addr: Recipient<ServerEvent>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub conn_id: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct JoinWorkspace {
    pub conn_id: String,
    pub user_id: String,
    pub workspace_id: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct LeaveWorkspace {
    pub conn_id: String,
    pub workspace_id: String,
}

/// Fan-out of a task/comment mutation to every connection in the workspace
/// room. The acting user's own connections receive the echo too; clients
/// reconcile idempotently.
#[derive(Message)]
#[rtype(result = "()")]
pub struct WorkspaceEvent {
    pub workspace_id: String,
    pub event: &'static str,
    pub payload: serde_json::Value,
}

/// Personal notification delivered to every connection of one user,
/// regardless of which workspace room they are in.
#[derive(Message)]
#[rtype(result = "()")]
pub struct NotifyUser {
    pub user_id: String,
    pub payload: serde_json::Value,
}

struct Session {
    user_id: String,
    addr: Recipient<ServerEvent>,
}

/// In-memory registry of live connections and workspace rooms. A connection
/// is in at most one workspace room at a time; joining a new room leaves the
/// previous one first.
#[derive(Default)]
pub struct Rooms {
    sessions: HashMap<String, Session>,
    workspaces: HashMap<String, HashSet<String>>,
}

impl Rooms {
    pub fn connect(&mut self, conn_id: String, user_id: String, addr: Recipient<ServerEvent>) {
        self.sessions.insert(conn_id, Session { user_id, addr });
    }

    pub fn disconnect(&mut self, conn_id: &str) {
        self.sessions.remove(conn_id);
        self.workspaces.retain(|_, conns| {
            conns.remove(conn_id);
            !conns.is_empty()
        });
    }

    /// Adds the connection to the workspace room, leaving any other room it
    /// was in. Returns false for a connection that never registered.
    pub fn join(&mut self, conn_id: &str, workspace_id: &str) -> bool {
        if !self.sessions.contains_key(conn_id) {
            return false;
        }
        self.workspaces.retain(|_, conns| {
            conns.remove(conn_id);
            !conns.is_empty()
        });
        self.workspaces
            .entry(workspace_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
        true
    }

    pub fn leave(&mut self, conn_id: &str, workspace_id: &str) {
        if let Some(conns) = self.workspaces.get_mut(workspace_id) {
            conns.remove(conn_id);
            if conns.is_empty() {
                self.workspaces.remove(workspace_id);
            }
        }
    }

    /// Sends `text` to every connection in the room. Returns how many
    /// connections were addressed.
    pub fn broadcast_workspace(&self, workspace_id: &str, text: &str) -> usize {
        let Some(conns) = self.workspaces.get(workspace_id) else {
            return 0;
        };
        let mut sent = 0;
        for conn_id in conns {
            if let Some(session) = self.sessions.get(conn_id) {
                session.addr.do_send(ServerEvent(text.to_string()));
                sent += 1;
            }
        }
        sent
    }

    /// Sends `text` to every connection belonging to `user_id`.
    pub fn notify_user(&self, user_id: &str, text: &str) -> usize {
        let mut sent = 0;
        for session in self.sessions.values() {
            if session.user_id == user_id {
                session.addr.do_send(ServerEvent(text.to_string()));
                sent += 1;
            }
        }
        sent
    }

    pub fn room_size(&self, workspace_id: &str) -> usize {
        self.workspaces.get(workspace_id).map_or(0, HashSet::len)
    }

    pub fn in_room(&self, conn_id: &str, workspace_id: &str) -> bool {
        self.workspaces
            .get(workspace_id)
            .map_or(false, |conns| conns.contains(conn_id))
    }
}

fn envelope(event: &str, data: &serde_json::Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

/// Process-wide broadcast channel. Handlers reach it through the address
/// stored in `AppState`; emission is fire-and-forget, so a dead channel can
/// never fail the mutation that triggered it.
pub struct BroadcastServer {
    rooms: Rooms,
    db: Arc<MongoDB>,
}

impl BroadcastServer {
    pub fn new(db: Arc<MongoDB>) -> Self {
        BroadcastServer {
            rooms: Rooms::default(),
            db,
        }
    }
}

impl Actor for BroadcastServer {
    type Context = Context<Self>;
}

impl Handler<Connect> for BroadcastServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        info!("User {} connected (WS), conn {}", msg.user_id, msg.conn_id);
        self.rooms.connect(msg.conn_id, msg.user_id, msg.addr);
    }
}

impl Handler<Disconnect> for BroadcastServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        debug!("Connection {} dropped, leaving all rooms", msg.conn_id);
        self.rooms.disconnect(&msg.conn_id);
    }
}

impl Handler<JoinWorkspace> for BroadcastServer {
    type Result = ();

    // Room join requires workspace membership; a socket may not observe a
    // workspace it does not belong to.
    fn handle(&mut self, msg: JoinWorkspace, ctx: &mut Context<Self>) {
        let db = self.db.clone();
        let JoinWorkspace {
            conn_id,
            user_id,
            workspace_id,
        } = msg;
        let check = async move {
            let workspaces = db.db.collection::<Workspace>("workspaces");
            let allowed = match workspaces
                .find_one(doc! { "workspace_id": &workspace_id })
                .await
            {
                Ok(Some(ws)) => ws.is_member(&user_id),
                Ok(None) => false,
                Err(e) => {
                    error!("Membership check for room join failed: {}", e);
                    false
                }
            };
            (allowed, conn_id, user_id, workspace_id)
        };
        ctx.spawn(check.into_actor(self).map(
            |(allowed, conn_id, user_id, workspace_id), act, _| {
                if allowed && act.rooms.join(&conn_id, &workspace_id) {
                    info!("User {} joined workspace room {}", user_id, workspace_id);
                } else {
                    info!(
                        "Denied workspace room {} to user {} (conn {})",
                        workspace_id, user_id, conn_id
                    );
                }
            },
        ));
    }
}

impl Handler<LeaveWorkspace> for BroadcastServer {
    type Result = ();

    fn handle(&mut self, msg: LeaveWorkspace, _: &mut Context<Self>) {
        self.rooms.leave(&msg.conn_id, &msg.workspace_id);
    }
}

impl Handler<WorkspaceEvent> for BroadcastServer {
    type Result = ();

    fn handle(&mut self, msg: WorkspaceEvent, _: &mut Context<Self>) {
        let text = envelope(msg.event, &msg.payload);
        let sent = self.rooms.broadcast_workspace(&msg.workspace_id, &text);
        debug!(
            "Broadcast {} to workspace {} ({} connections)",
            msg.event, msg.workspace_id, sent
        );
    }
}

impl Handler<NotifyUser> for BroadcastServer {
    type Result = ();

    fn handle(&mut self, msg: NotifyUser, _: &mut Context<Self>) {
        let text = envelope("notification", &msg.payload);
        let sent = self.rooms.notify_user(&msg.user_id, &text);
        debug!("Notification for user {} ({} connections)", msg.user_id, sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Probe {
        received: Arc<Mutex<Vec<String>>>,
    }

    impl Actor for Probe {
        type Context = Context<Self>;
    }

    impl Handler<ServerEvent> for Probe {
        type Result = ();

        fn handle(&mut self, msg: ServerEvent, _: &mut Context<Self>) {
            if let Ok(mut received) = self.received.lock() {
                received.push(msg.0);
            }
        }
    }

    #[derive(Message)]
    #[rtype(result = "Vec<String>")]
    struct Drain;

    impl Handler<Drain> for Probe {
        type Result = MessageResult<Drain>;

        fn handle(&mut self, _: Drain, _: &mut Context<Self>) -> Self::Result {
            MessageResult(
                self.received
                    .lock()
                    .map(|r| r.clone())
                    .unwrap_or_default(),
            )
        }
    }

    fn probe() -> (Addr<Probe>, Recipient<ServerEvent>) {
        let addr = Probe {
            received: Arc::new(Mutex::new(Vec::new())),
        }
        .start();
        let recipient = addr.clone().recipient();
        (addr, recipient)
    }

    #[actix_web::test]
    async fn join_switches_rooms() {
        let (_probe, recipient) = probe();
        let mut rooms = Rooms::default();
        rooms.connect("c1".into(), "u1".into(), recipient);

        assert!(rooms.join("c1", "w1"));
        assert!(rooms.in_room("c1", "w1"));

        // joining another workspace leaves the previous room
        assert!(rooms.join("c1", "w2"));
        assert!(!rooms.in_room("c1", "w1"));
        assert!(rooms.in_room("c1", "w2"));
        assert_eq!(rooms.room_size("w1"), 0);
    }

    #[actix_web::test]
    async fn unknown_connection_cannot_join() {
        let mut rooms = Rooms::default();
        assert!(!rooms.join("ghost", "w1"));
        assert_eq!(rooms.room_size("w1"), 0);
    }

    #[actix_web::test]
    async fn disconnect_leaves_every_room() {
        let (_probe, recipient) = probe();
        let mut rooms = Rooms::default();
        rooms.connect("c1".into(), "u1".into(), recipient);
        rooms.join("c1", "w1");

        rooms.disconnect("c1");
        assert_eq!(rooms.room_size("w1"), 0);
        assert!(!rooms.join("c1", "w1"));
    }

    #[actix_web::test]
    async fn broadcast_reaches_all_room_members_including_actor() {
        let (probe1, rec1) = probe();
        let (probe2, rec2) = probe();
        let (_probe3, rec3) = probe();
        let mut rooms = Rooms::default();
        rooms.connect("c1".into(), "u1".into(), rec1);
        rooms.connect("c2".into(), "u2".into(), rec2);
        rooms.connect("c3".into(), "u3".into(), rec3);
        rooms.join("c1", "w1");
        rooms.join("c2", "w1");
        // c3 stays outside the room

        let sent = rooms.broadcast_workspace("w1", "payload");
        assert_eq!(sent, 2);

        let received1 = probe1.send(Drain).await.unwrap();
        let received2 = probe2.send(Drain).await.unwrap();
        assert_eq!(received1, vec!["payload".to_string()]);
        assert_eq!(received2, vec!["payload".to_string()]);
    }

    #[actix_web::test]
    async fn notify_user_targets_only_that_users_connections() {
        let (probe1, rec1) = probe();
        let (probe2, rec2) = probe();
        let mut rooms = Rooms::default();
        // two connections for u1, one for u2
        rooms.connect("c1".into(), "u1".into(), rec1.clone());
        rooms.connect("c1b".into(), "u1".into(), rec1);
        rooms.connect("c2".into(), "u2".into(), rec2);

        let sent = rooms.notify_user("u1", "ping");
        assert_eq!(sent, 2);

        let received1 = probe1.send(Drain).await.unwrap();
        let received2 = probe2.send(Drain).await.unwrap();
        assert_eq!(received1.len(), 2);
        assert!(received2.is_empty());
    }

    #[test]
    fn envelope_wraps_event_and_data() {
        let text = envelope("taskCreated", &json!({ "task_id": "t1" }));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "taskCreated");
        assert_eq!(value["data"]["task_id"], "t1");
    }
}
