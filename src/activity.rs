use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, Responder};
use futures_util::StreamExt;
use log::error;
use mongodb::bson::doc;
use serde_json::json;

use crate::app_state::AppState;
use crate::models::{ActivityLogEntry, Task, Workspace};

// GET /activity/task/{task_id}
// Read-only feed, newest 100 entries. Requires membership of the task's
// workspace, same as every other task read.
pub async fn task_activity(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> impl Responder {
    let current_user = match req.extensions().get::<String>() {
        Some(id) => id.clone(),
        None => return HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" })),
    };

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    let task = match tasks.find_one(doc! { "task_id": &*task_id }).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({ "success": false, "message": "Task not found" }));
        }
        Err(e) => {
            error!("Error fetching task: {}", e);
            return HttpResponse::InternalServerError()
                .json(json!({ "success": false, "message": "Failed to get activity logs" }));
        }
    };

    let workspaces = data.mongodb.db.collection::<Workspace>("workspaces");
    match workspaces
        .find_one(doc! { "workspace_id": &task.workspace_id })
        .await
    {
        Ok(Some(ws)) if ws.is_member(&current_user) => {}
        Ok(_) => {
            return HttpResponse::Forbidden()
                .json(json!({ "success": false, "message": "Access denied" }));
        }
        Err(e) => {
            error!("Error checking membership: {}", e);
            return HttpResponse::InternalServerError()
                .json(json!({ "success": false, "message": "Failed to get activity logs" }));
        }
    }

    let activity = data.mongodb.db.collection::<ActivityLogEntry>("activity_log");
    let mut cursor = match activity
        .find(doc! { "task_id": &*task_id })
        .sort(doc! { "created_at": -1 })
        .limit(100)
        .await
    {
        Ok(cursor) => cursor,
        Err(e) => {
            error!("Error fetching activity logs: {}", e);
            return HttpResponse::InternalServerError()
                .json(json!({ "success": false, "message": "Failed to get activity logs" }));
        }
    };

    let mut entries = Vec::new();
    while let Some(res) = cursor.next().await {
        match res {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                error!("Error iterating activity logs: {}", e);
                return HttpResponse::InternalServerError()
                    .json(json!({ "success": false, "message": "Failed to get activity logs" }));
            }
        }
    }

    HttpResponse::Ok().json(json!({ "success": true, "activity_logs": entries }))
}
