// src/main.rs

mod activity;
mod app_state;
mod auth;
mod broadcast;
mod config;
mod db;
mod models;
mod notifications;
mod storage;
mod task;
mod workspace;
mod ws_session;

use std::env;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpResponse, HttpServer,
};
use env_logger::Env;
use futures::future::{ok, Ready};

use crate::activity::task_activity;
use crate::app_state::AppState;
use crate::auth::{login, signup, validate_jwt};
use crate::notifications::{list_notifications, mark_notification_read};
use crate::task::{
    add_comment, create_task, delete_attachment, delete_comment, delete_task, get_task,
    list_workspace_tasks, update_task, upload_attachments,
};
use crate::workspace::{
    create_workspace, delete_workspace, get_workspace, join_workspace, my_workspaces,
    regenerate_invite_code, update_settings,
};
use crate::ws_session::ws_index;

#[derive(Debug)]
pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware { service })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    // Resolves "Bearer <token>" into the actor's user id, stored as a request
    // extension. Requests without a header pass through; the handlers answer
    // 401 when no identity was injected.
    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
            if let Ok(auth_str) = auth_header.to_str() {
                if auth_str.starts_with("Bearer ") {
                    let token = auth_str.trim_start_matches("Bearer ").trim();
                    match verify_token(token) {
                        Ok(user_id) => {
                            req.extensions_mut().insert(user_id);
                        }
                        Err(_) => {
                            let (req_parts, _payload) = req.into_parts();
                            let resp = HttpResponse::Unauthorized()
                                .json(serde_json::json!({
                                    "success": false,
                                    "message": "Invalid token"
                                }))
                                .map_into_boxed_body();
                            let srv_resp = ServiceResponse::new(req_parts, resp);
                            return Box::pin(async move { Ok(srv_resp) });
                        }
                    }
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

fn verify_token(token: &str) -> Result<String, String> {
    let secret = env::var("JWT_SECRET").unwrap_or_else(|_| "secret".to_string());
    match validate_jwt(token, &secret) {
        Ok(claims) => Ok(claims.sub),
        Err(e) => Err(format!("Token decode error: {}", e)),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env();
    let mongodb = Arc::new(db::MongoDB::init(&config.mongo_uri, &config.database_name).await);
    // The broadcast channel is constructed here and handed to the handlers
    // through AppState; nothing else holds a reference to it.
    let broadcast = broadcast::BroadcastServer::new(mongodb.clone()).start();

    let frontend_origin = config.frontend_origin.clone();

    println!("Server running at http://0.0.0.0:8080");
    println!("Allowed CORS Origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication)
            .app_data(web::Data::new(AppState {
                broadcast: broadcast.clone(),
                mongodb: mongodb.clone(),
                config: config.clone(),
            }))
            .service(
                web::scope("/auth")
                    .route("/signup", web::post().to(signup))
                    .route("/login", web::post().to(login)),
            )
            // WORKSPACES
            .service(
                web::scope("/workspace")
                    .route("/create", web::post().to(create_workspace))
                    .route("/my-workspaces", web::get().to(my_workspaces))
                    .route("/join/{invite_code}", web::post().to(join_workspace))
                    .route("/{workspace_id}", web::get().to(get_workspace))
                    .route("/{workspace_id}", web::delete().to(delete_workspace))
                    .route("/{workspace_id}/settings", web::put().to(update_settings))
                    .route(
                        "/{workspace_id}/regenerate-code",
                        web::post().to(regenerate_invite_code),
                    ),
            )
            // TASKS
            .service(
                web::scope("/task")
                    .route("/workspace/{workspace_id}", web::get().to(list_workspace_tasks))
                    .route("", web::post().to(create_task))
                    .route("/{task_id}", web::get().to(get_task))
                    .route("/{task_id}", web::put().to(update_task))
                    .route("/{task_id}", web::delete().to(delete_task))
                    .route("/{task_id}/upload", web::post().to(upload_attachments))
                    .route(
                        "/{task_id}/attachment/{filename}",
                        web::delete().to(delete_attachment),
                    )
                    .route("/{task_id}/comments", web::post().to(add_comment))
                    .route(
                        "/{task_id}/comments/{comment_id}",
                        web::delete().to(delete_comment),
                    ),
            )
            // NOTIFICATIONS
            .service(
                web::scope("/notifications")
                    .route("", web::get().to(list_notifications))
                    .route(
                        "/{notification_id}/read",
                        web::put().to(mark_notification_read),
                    ),
            )
            // ACTIVITY LOG
            .service(
                web::scope("/activity").route("/task/{task_id}", web::get().to(task_activity)),
            )
            // WEBSOCKET route for real-time
            .service(web::resource("/ws").route(web::get().to(ws_index)))
    })
    .bind("0.0.0.0:8080")?
    .run()
    .await
}
