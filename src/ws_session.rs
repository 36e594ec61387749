use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, warn};
use serde::Deserialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::validate_jwt;
use crate::broadcast::{
    BroadcastServer, Connect, Disconnect, JoinWorkspace, LeaveWorkspace, ServerEvent,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Room-membership commands a connected client may send. Everything else on
/// the socket is server-to-client fan-out.
#[derive(Deserialize)]
struct ClientCommand {
    action: String,
    #[serde(rename = "workspaceId")]
    workspace_id: String,
}

pub struct WsSession {
    conn_id: String,
    user_id: String,
    /// The workspace room this connection currently sits in, if any. A join
    /// for a different workspace leaves this one first.
    joined_workspace: Option<String>,
    hb: Instant,
    server: Addr<BroadcastServer>,
}

impl WsSession {
    pub fn new(user_id: String, server: Addr<BroadcastServer>) -> Self {
        WsSession {
            conn_id: Uuid::new_v4().to_string(),
            user_id,
            joined_workspace: None,
            hb: Instant::now(),
            server,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                debug!("WebSocket client heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_command(&mut self, cmd: ClientCommand) {
        match cmd.action.as_str() {
            "joinWorkspace" => {
                if let Some(previous) = self.joined_workspace.take() {
                    self.server.do_send(LeaveWorkspace {
                        conn_id: self.conn_id.clone(),
                        workspace_id: previous,
                    });
                }
                self.server.do_send(JoinWorkspace {
                    conn_id: self.conn_id.clone(),
                    user_id: self.user_id.clone(),
                    workspace_id: cmd.workspace_id.clone(),
                });
                self.joined_workspace = Some(cmd.workspace_id);
            }
            "leaveWorkspace" => {
                if self.joined_workspace.as_deref() == Some(cmd.workspace_id.as_str()) {
                    self.joined_workspace = None;
                }
                self.server.do_send(LeaveWorkspace {
                    conn_id: self.conn_id.clone(),
                    workspace_id: cmd.workspace_id,
                });
            }
            other => warn!("Unknown socket action: {}", other),
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        let addr = ctx.address();
        self.server
            .send(Connect {
                conn_id: self.conn_id.clone(),
                user_id: self.user_id.clone(),
                addr: addr.recipient(),
            })
            .into_actor(self)
            .then(|res, _, ctx| {
                if res.is_err() {
                    warn!("Failed to register with broadcast server");
                    ctx.stop();
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        // Room membership cleanup happens server-side on disconnect.
        self.server.do_send(Disconnect {
            conn_id: self.conn_id.clone(),
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => warn!("Failed to parse socket command: {}", e),
            },
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<ServerEvent> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: ServerEvent, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.text(msg.0);
    }
}

#[derive(Deserialize)]
pub struct WsQuery {
    token: String,
}

/// GET /ws?token=<jwt>. The socket authenticates at connect; an invalid
/// token never reaches the broadcast server.
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    query: web::Query<WsQuery>,
) -> Result<HttpResponse, Error> {
    let claims = match validate_jwt(&query.token, &data.config.jwt_secret) {
        Ok(claims) => claims,
        Err(_) => return Ok(HttpResponse::Unauthorized().finish()),
    };
    ws::start(WsSession::new(claims.sub, data.broadcast.clone()), &req, stream)
}
